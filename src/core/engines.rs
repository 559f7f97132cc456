use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Algorithm, Document};
use crate::services::embedding::{EmbeddingClient, EmbeddingError};

/// Errors from a single engine call. Always absorbed by the service as "no
/// contribution" for that candidate/algorithm pair, never propagated.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("embedding service error: {0}")]
    Embedding(#[from] EmbeddingError),
}

/// Contract implemented by each similarity engine: a stateless function of
/// two documents returning a score in [0, 1].
#[async_trait]
pub trait MatchEngine: Send + Sync {
    fn algorithm(&self) -> Algorithm;

    async fn match_documents(
        &self,
        source: &Document,
        candidate: &Document,
    ) -> Result<f64, EngineError>;
}

/// Normalized edit-distance similarity over document content.
#[derive(Debug, Default)]
pub struct FuzzyMatchEngine {
    /// Content is truncated to this many characters before comparison to
    /// bound the O(n*m) distance computation.
    max_len: usize,
}

impl FuzzyMatchEngine {
    const DEFAULT_MAX_LEN: usize = 512;

    pub fn new() -> Self {
        Self {
            max_len: Self::DEFAULT_MAX_LEN,
        }
    }
}

#[async_trait]
impl MatchEngine for FuzzyMatchEngine {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Fuzzy
    }

    async fn match_documents(
        &self,
        source: &Document,
        candidate: &Document,
    ) -> Result<f64, EngineError> {
        let max_len = if self.max_len == 0 {
            Self::DEFAULT_MAX_LEN
        } else {
            self.max_len
        };
        let a = normalize_content(&source.content, max_len);
        let b = normalize_content(&candidate.content, max_len);

        if a.is_empty() && b.is_empty() {
            return Ok(0.0);
        }

        let distance = levenshtein(&a, &b);
        let longest = a.chars().count().max(b.chars().count()) as f64;
        Ok((1.0 - distance as f64 / longest).clamp(0.0, 1.0))
    }
}

fn normalize_content(content: &str, max_len: usize) -> String {
    content
        .chars()
        .filter(|c| !c.is_control())
        .take(max_len)
        .collect::<String>()
        .to_lowercase()
}

/// Two-row Levenshtein distance over char boundaries.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }

    prev[b.len()]
}

/// Cosine similarity over document embeddings.
///
/// Precomputed embeddings on the documents are used directly; otherwise the
/// configured embedding service is called. With neither available the engine
/// reports itself unavailable and the pair simply loses the semantic factor.
pub struct SemanticMatchEngine {
    embeddings: Option<EmbeddingClient>,
}

impl SemanticMatchEngine {
    pub fn new(embeddings: Option<EmbeddingClient>) -> Self {
        Self { embeddings }
    }

    async fn embedding_for(&self, document: &Document) -> Result<Vec<f32>, EngineError> {
        if let Some(embedding) = &document.embedding {
            return Ok(embedding.clone());
        }
        match &self.embeddings {
            Some(client) => Ok(client.embed(&document.content).await?),
            None => Err(EngineError::Unavailable(format!(
                "document {} has no embedding and no embedding service is configured",
                document.id
            ))),
        }
    }
}

#[async_trait]
impl MatchEngine for SemanticMatchEngine {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Semantic
    }

    async fn match_documents(
        &self,
        source: &Document,
        candidate: &Document,
    ) -> Result<f64, EngineError> {
        let a = self.embedding_for(source).await?;
        let b = self.embedding_for(candidate).await?;
        Ok(cosine_similarity(&a, &b))
    }
}

/// Cosine similarity mapped to [0, 1]. Mismatched or zero vectors score 0.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }

    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }

    let cosine = dot / (norm_a.sqrt() * norm_b.sqrt());
    ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// Date-proximity similarity with exponential decay.
///
/// Same-day documents score 1.0 and the score halves roughly every
/// `half_life_days`; beyond `max_days` the score is 0.
#[derive(Debug)]
pub struct DateMatchEngine {
    half_life_days: f64,
    max_days: i64,
}

impl Default for DateMatchEngine {
    fn default() -> Self {
        Self {
            half_life_days: 7.0,
            max_days: 365,
        }
    }
}

impl DateMatchEngine {
    pub fn new(half_life_days: f64, max_days: i64) -> Self {
        Self {
            half_life_days,
            max_days,
        }
    }
}

#[async_trait]
impl MatchEngine for DateMatchEngine {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Date
    }

    async fn match_documents(
        &self,
        source: &Document,
        candidate: &Document,
    ) -> Result<f64, EngineError> {
        let (a, b) = match (source.date, candidate.date) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                return Err(EngineError::Unavailable(
                    "one of the documents carries no date".to_string(),
                ))
            }
        };

        let days = (a - b).num_days().abs();
        if days >= self.max_days {
            return Ok(0.0);
        }

        // Exponential decay, rate chosen so score halves every half_life_days
        let rate = std::f64::consts::LN_2 / self.half_life_days;
        Ok((-(days as f64) * rate).exp().clamp(0.0, 1.0))
    }
}

/// Amount similarity under a relative tolerance.
///
/// Identical amounts score 1.0, the score decays linearly with the relative
/// difference and reaches 0 at `tolerance` (default 10%).
#[derive(Debug)]
pub struct AmountMatchEngine {
    tolerance: f64,
}

impl Default for AmountMatchEngine {
    fn default() -> Self {
        Self { tolerance: 0.10 }
    }
}

impl AmountMatchEngine {
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }
}

#[async_trait]
impl MatchEngine for AmountMatchEngine {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Amount
    }

    async fn match_documents(
        &self,
        source: &Document,
        candidate: &Document,
    ) -> Result<f64, EngineError> {
        let (a, b) = match (source.amount, candidate.amount) {
            (Some(a), Some(b)) => (a, b),
            _ => {
                return Err(EngineError::Unavailable(
                    "one of the documents carries no amount".to_string(),
                ))
            }
        };

        if a == b {
            return Ok(1.0);
        }

        let scale = a.abs().max(b.abs());
        if scale == 0.0 || self.tolerance <= 0.0 {
            return Ok(0.0);
        }

        let relative = (a - b).abs() / scale;
        Ok((1.0 - relative / self.tolerance).clamp(0.0, 1.0))
    }
}

/// The default engine set, in canonical order.
pub fn default_engines(
    embeddings: Option<EmbeddingClient>,
) -> Vec<std::sync::Arc<dyn MatchEngine>> {
    vec![
        std::sync::Arc::new(FuzzyMatchEngine::new()),
        std::sync::Arc::new(SemanticMatchEngine::new(embeddings)),
        std::sync::Arc::new(DateMatchEngine::default()),
        std::sync::Arc::new(AmountMatchEngine::default()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn doc(id: &str, content: &str) -> Document {
        Document {
            id: id.to_string(),
            doc_type: "invoice".to_string(),
            content: content.to_string(),
            date: None,
            amount: None,
            embedding: None,
            metadata: Default::default(),
        }
    }

    #[test]
    fn test_levenshtein_basics() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }

    #[tokio::test]
    async fn test_fuzzy_identical_content_scores_one() {
        let engine = FuzzyMatchEngine::new();
        let score = engine
            .match_documents(&doc("a", "Invoice #1042 ACME Corp"), &doc("b", "invoice #1042 acme corp"))
            .await
            .unwrap();
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_fuzzy_disjoint_content_scores_low() {
        let engine = FuzzyMatchEngine::new();
        let score = engine
            .match_documents(&doc("a", "aaaaaaaaaa"), &doc("b", "zzzzzzzzzz"))
            .await
            .unwrap();
        assert!(score < 0.1);
    }

    #[tokio::test]
    async fn test_semantic_uses_precomputed_embeddings() {
        let engine = SemanticMatchEngine::new(None);
        let mut a = doc("a", "x");
        let mut b = doc("b", "y");
        a.embedding = Some(vec![1.0, 0.0, 0.0]);
        b.embedding = Some(vec![1.0, 0.0, 0.0]);
        let score = engine.match_documents(&a, &b).await.unwrap();
        assert!((score - 1.0).abs() < 1e-6);

        b.embedding = Some(vec![-1.0, 0.0, 0.0]);
        let opposite = engine.match_documents(&a, &b).await.unwrap();
        assert!(opposite < 1e-6);
    }

    #[tokio::test]
    async fn test_semantic_unavailable_without_embeddings() {
        let engine = SemanticMatchEngine::new(None);
        let result = engine.match_documents(&doc("a", "x"), &doc("b", "y")).await;
        assert!(matches!(result, Err(EngineError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_date_same_day_scores_one() {
        let engine = DateMatchEngine::default();
        let now = Utc::now();
        let mut a = doc("a", "");
        let mut b = doc("b", "");
        a.date = Some(now);
        b.date = Some(now);
        let score = engine.match_documents(&a, &b).await.unwrap();
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_date_decays_with_distance() {
        let engine = DateMatchEngine::default();
        let now = Utc::now();
        let mut a = doc("a", "");
        let mut near = doc("b", "");
        let mut far = doc("c", "");
        a.date = Some(now);
        near.date = Some(now - Duration::days(3));
        far.date = Some(now - Duration::days(60));

        let near_score = engine.match_documents(&a, &near).await.unwrap();
        let far_score = engine.match_documents(&a, &far).await.unwrap();
        assert!(near_score > far_score);

        let mut beyond = doc("d", "");
        beyond.date = Some(now - Duration::days(400));
        let beyond_score = engine.match_documents(&a, &beyond).await.unwrap();
        assert_eq!(beyond_score, 0.0);
    }

    #[tokio::test]
    async fn test_date_unavailable_without_dates() {
        let engine = DateMatchEngine::default();
        let result = engine.match_documents(&doc("a", ""), &doc("b", "")).await;
        assert!(matches!(result, Err(EngineError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_amount_exact_and_tolerance() {
        let engine = AmountMatchEngine::default();
        let mut a = doc("a", "");
        let mut b = doc("b", "");
        a.amount = Some(250.0);
        b.amount = Some(250.0);
        assert_eq!(engine.match_documents(&a, &b).await.unwrap(), 1.0);

        // 5% off under a 10% tolerance lands mid-scale
        b.amount = Some(262.5);
        let close = engine.match_documents(&a, &b).await.unwrap();
        assert!(close > 0.4 && close < 0.6);

        // 20% off is out of tolerance
        b.amount = Some(300.0);
        assert_eq!(engine.match_documents(&a, &b).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_default_engine_set_covers_all_algorithms() {
        let engines = default_engines(None);
        let algorithms: Vec<Algorithm> = engines.iter().map(|e| e.algorithm()).collect();
        assert_eq!(algorithms, Algorithm::ALL.to_vec());
    }
}
