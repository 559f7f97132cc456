use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use crate::core::engines::MatchEngine;
use crate::core::scoring::{ConfidenceScorer, ScorerError};
use crate::models::{
    Algorithm, AlgorithmScore, BatchFailure, BatchMatchResult, BatchOptions, BatchProgress,
    BatchStatus, Document, FactorScores, MatchOptions, MatchResult, MatchStatistics, MatchStatus,
    ProgressCallback, UserFeedback, WeightSet,
};
use crate::services::{DocumentStore, MatchCache, MatchStore, StoreError};

/// Request-level errors surfaced by the service. Per-algorithm and
/// per-candidate failures never appear here; they are absorbed inside the
/// pipeline.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("invalid weights: {0} weight is negative")]
    InvalidWeights(Algorithm),

    #[error("match {0} has already been reviewed")]
    AlreadyReviewed(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),
}

impl From<ScorerError> for MatchError {
    fn from(error: ScorerError) -> Self {
        match error {
            ScorerError::InvalidWeights(algorithm) => MatchError::InvalidWeights(algorithm),
            ScorerError::UnknownExperiment(id) => {
                MatchError::NotFound(format!("experiment {}", id))
            }
        }
    }
}

/// Feedback queued for the background learning worker.
struct LearningJob {
    accepted: bool,
    factors: FactorScores,
    source_document_id: String,
}

/// Orchestrates the matching pipeline: cache lookup, candidate loading,
/// concurrent per-candidate engine fan-out, confidence scoring, filtering
/// and sorting, caching, batch processing, and feedback ingestion.
pub struct MatchService {
    documents: Arc<dyn DocumentStore>,
    matches: Arc<dyn MatchStore>,
    cache: Arc<dyn MatchCache>,
    engines: Vec<Arc<dyn MatchEngine>>,
    scorer: Arc<ConfidenceScorer>,
    learning_tx: mpsc::UnboundedSender<LearningJob>,
}

impl MatchService {
    /// Build the service and spawn its background learning worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        matches: Arc<dyn MatchStore>,
        cache: Arc<dyn MatchCache>,
        engines: Vec<Arc<dyn MatchEngine>>,
        scorer: Arc<ConfidenceScorer>,
    ) -> Arc<Self> {
        let (learning_tx, learning_rx) = mpsc::unbounded_channel();

        tokio::spawn(learning_worker(
            learning_rx,
            Arc::clone(&scorer),
            Arc::clone(&cache),
            Arc::clone(&documents),
        ));

        Arc::new(Self {
            documents,
            matches,
            cache,
            engines,
            scorer,
            learning_tx,
        })
    }

    pub fn scorer(&self) -> &Arc<ConfidenceScorer> {
        &self.scorer
    }

    /// Find candidate matches for a document, ordered by confidence
    /// descending.
    ///
    /// The cached entry (when present and `use_cache` is set) holds the
    /// fuller pre-threshold list; threshold and limit are re-applied per
    /// read so calls with different thresholds share one entry. A cache
    /// read failure degrades to a miss, and engine failures cost the
    /// affected candidate one factor, never the whole request.
    pub async fn find_matches(
        &self,
        document_id: &str,
        options: &MatchOptions,
    ) -> Result<Vec<MatchResult>, MatchError> {
        if options.use_cache {
            match self.cache.get_cached(document_id).await {
                Ok(Some(cached)) => {
                    tracing::debug!(
                        "Cache hit for document {} ({} candidates)",
                        document_id,
                        cached.len()
                    );
                    return Ok(apply_result_view(cached, options));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        "Cache read failed for document {}, treating as miss: {}",
                        document_id,
                        e
                    );
                }
            }
        }

        let source = self
            .documents
            .load_document(document_id)
            .await?
            .ok_or_else(|| MatchError::NotFound(format!("document {}", document_id)))?;

        let candidates = self
            .documents
            .load_candidates(&source, &options.filters)
            .await?;

        tracing::debug!(
            "Evaluating {} candidates for document {}",
            candidates.len(),
            document_id
        );

        let enabled: Vec<Arc<dyn MatchEngine>> = self
            .engines
            .iter()
            .filter(|engine| options.algorithms.contains(&engine.algorithm()))
            .cloned()
            .collect();

        let source = Arc::new(source);
        let mut tasks = JoinSet::new();
        for candidate in candidates {
            let source = Arc::clone(&source);
            let candidate = Arc::new(candidate);
            let engines = enabled.clone();
            let scorer = Arc::clone(&self.scorer);
            tasks.spawn(async move {
                let scores = evaluate_candidate(&engines, &source, &candidate).await;
                let breakdown = scorer
                    .calculate_confidence(&scores, Some(&source.doc_type))
                    .await;
                MatchResult {
                    match_id: uuid::Uuid::new_v4().to_string(),
                    source_document_id: source.id.clone(),
                    target_document_id: candidate.id.clone(),
                    confidence: breakdown.overall,
                    tier: breakdown.tier,
                    factors: breakdown.factors,
                    explanation: breakdown.explanation,
                    status: MatchStatus::Pending,
                    created_at: chrono::Utc::now(),
                }
            });
        }

        // Candidate evaluations race freely; the sort below restores the
        // deterministic output ordering.
        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => tracing::warn!("Candidate evaluation task failed: {}", e),
            }
        }
        sort_results(&mut results);

        if options.use_cache {
            if let Err(e) = self.cache.set_cached(document_id, &results).await {
                tracing::warn!("Cache write failed for document {}: {}", document_id, e);
            }
        }

        // Persist the full pre-threshold list, not just the served view: a
        // later cache hit under a looser threshold hands out ids from the
        // fuller list, and every one of them must resolve in the store.
        self.matches.store_matches(&results).await?;

        let view = apply_result_view(results, options);

        tracing::info!(
            "Returning {} matches for document {}",
            view.len(),
            document_id
        );
        Ok(view)
    }

    /// Process a set of documents with a hard cap on simultaneously
    /// in-flight find calls. Individual failures are collected, never
    /// abort the batch, and progress is reported after each group.
    pub async fn batch_match(
        self: &Arc<Self>,
        document_ids: &[String],
        options: &BatchOptions,
        on_progress: Option<ProgressCallback>,
    ) -> BatchMatchResult {
        let started = Instant::now();
        let total = document_ids.len();
        let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));

        let mut results = Vec::new();
        let mut failed = Vec::new();
        let mut processed = 0usize;

        for group in document_ids.chunks(options.batch_size.max(1)) {
            let mut tasks = JoinSet::new();
            for document_id in group {
                let service = Arc::clone(self);
                let semaphore = Arc::clone(&semaphore);
                let match_options = options.match_options.clone();
                let document_id = document_id.clone();
                tasks.spawn(async move {
                    // The semaphore is owned by this call and never closed
                    let _permit = semaphore.acquire_owned().await.ok();
                    let outcome = service.find_matches(&document_id, &match_options).await;
                    (document_id, outcome)
                });
            }

            let mut current_document = String::new();
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((document_id, Ok(found))) => {
                        processed += 1;
                        current_document = document_id;
                        results.extend(found);
                    }
                    Ok((document_id, Err(e))) => {
                        processed += 1;
                        tracing::warn!("Batch item {} failed: {}", document_id, e);
                        failed.push(BatchFailure {
                            error: e.to_string(),
                            document_id: document_id.clone(),
                        });
                        current_document = document_id;
                    }
                    Err(e) => {
                        processed += 1;
                        tracing::warn!("Batch task failed: {}", e);
                    }
                }
            }

            if let Some(callback) = &on_progress {
                let elapsed_ms = started.elapsed().as_millis() as f64;
                let estimated_remaining_ms = if processed > 0 {
                    (elapsed_ms / processed as f64) * (total - processed) as f64
                } else {
                    0.0
                };
                callback(BatchProgress {
                    processed,
                    total,
                    current_document,
                    estimated_remaining_ms: estimated_remaining_ms as u64,
                });
            }
        }

        let average_confidence = if results.is_empty() {
            0.0
        } else {
            results.iter().map(|r| r.confidence).sum::<f64>() / results.len() as f64
        };

        let status = if failed.is_empty() {
            BatchStatus::Completed
        } else if failed.len() >= total {
            BatchStatus::Failed
        } else {
            BatchStatus::PartiallyFailed
        };

        BatchMatchResult {
            results,
            average_confidence,
            failed,
            status,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Record accept/reject feedback against a match.
    ///
    /// Persists the feedback, applies the one-way status transition,
    /// invalidates the source document's cache entry, and queues the
    /// learning update for the background worker. Learning failures never
    /// reach this caller.
    pub async fn validate_match(
        &self,
        match_id: &str,
        feedback: UserFeedback,
    ) -> Result<(), MatchError> {
        let existing = self
            .matches
            .get_match(match_id)
            .await?
            .ok_or_else(|| MatchError::NotFound(format!("match {}", match_id)))?;

        if existing.status.is_final() {
            return Err(MatchError::AlreadyReviewed(match_id.to_string()));
        }

        self.matches.store_feedback(&feedback).await?;

        let status = if feedback.accepted {
            MatchStatus::Accepted
        } else {
            MatchStatus::Rejected
        };
        self.matches.update_match_status(match_id, status).await?;

        if let Err(e) = self
            .cache
            .invalidate_document(&existing.source_document_id)
            .await
        {
            tracing::warn!(
                "Failed to invalidate cache for document {}: {}",
                existing.source_document_id,
                e
            );
        }

        let job = LearningJob {
            accepted: feedback.accepted,
            factors: existing.factors,
            source_document_id: existing.source_document_id,
        };
        if self.learning_tx.send(job).is_err() {
            tracing::warn!("Learning worker unavailable, feedback not applied to weights");
        }

        Ok(())
    }

    /// Replace the active base weight set and drop every cached entry;
    /// all previously cached confidences are stale under new weights.
    pub async fn update_weights(&self, weights: WeightSet) -> Result<(), MatchError> {
        self.scorer.update_weights(weights).await?;
        if let Err(e) = self.cache.clear_all().await {
            tracing::warn!("Failed to clear cache after weight update: {}", e);
        }
        Ok(())
    }

    pub async fn get_weights(&self, doc_type: Option<&str>) -> WeightSet {
        self.scorer.get_weights(doc_type).await
    }

    pub async fn get_match(&self, match_id: &str) -> Result<MatchResult, MatchError> {
        self.matches
            .get_match(match_id)
            .await?
            .ok_or_else(|| MatchError::NotFound(format!("match {}", match_id)))
    }

    pub async fn get_statistics(&self) -> Result<MatchStatistics, MatchError> {
        Ok(self.matches.statistics().await?)
    }
}

/// Fan out the enabled engines for one candidate pair concurrently.
///
/// A failing engine is logged and contributes no factor; the remaining
/// scores still feed the scorer.
async fn evaluate_candidate(
    engines: &[Arc<dyn MatchEngine>],
    source: &Arc<Document>,
    candidate: &Arc<Document>,
) -> Vec<AlgorithmScore> {
    let mut tasks = JoinSet::new();
    for engine in engines {
        let engine = Arc::clone(engine);
        let source = Arc::clone(source);
        let candidate = Arc::clone(candidate);
        tasks.spawn(async move {
            let outcome = engine.match_documents(&source, &candidate).await;
            (engine.algorithm(), candidate.id.clone(), outcome)
        });
    }

    let mut scores = Vec::with_capacity(engines.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((algorithm, _, Ok(score))) => scores.push(AlgorithmScore { algorithm, score }),
            Ok((algorithm, candidate_id, Err(e))) => {
                tracing::warn!(
                    "{} engine failed for candidate {}: {}",
                    algorithm,
                    candidate_id,
                    e
                );
            }
            Err(e) => tracing::warn!("Engine task failed: {}", e),
        }
    }
    scores
}

/// Deterministic output ordering: confidence descending, ties broken toward
/// the result backed by more contributing factors, then by target id.
fn sort_results(results: &mut [MatchResult]) {
    results.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.factors.contributing().cmp(&a.factors.contributing()))
            .then_with(|| a.target_document_id.cmp(&b.target_document_id))
    });
}

/// Re-apply the caller's view of a (possibly cached) candidate list:
/// exclusions, confidence threshold, and result limit.
fn apply_result_view(results: Vec<MatchResult>, options: &MatchOptions) -> Vec<MatchResult> {
    let mut view: Vec<MatchResult> = results
        .into_iter()
        .filter(|r| {
            !options
                .filters
                .exclude_documents
                .contains(&r.target_document_id)
        })
        .filter(|r| r.confidence >= options.min_confidence)
        .collect();
    view.truncate(options.max_results);
    view
}

/// Applies queued feedback to the scorer, then drops stale cache entries.
/// All failures are logged and absorbed; nothing propagates to the
/// validate_match caller.
async fn learning_worker(
    mut jobs: mpsc::UnboundedReceiver<LearningJob>,
    scorer: Arc<ConfidenceScorer>,
    cache: Arc<dyn MatchCache>,
    documents: Arc<dyn DocumentStore>,
) {
    while let Some(job) = jobs.recv().await {
        let doc_type = match documents.load_document(&job.source_document_id).await {
            Ok(Some(document)) => Some(document.doc_type),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(
                    "Learning: failed to load source document {}: {}",
                    job.source_document_id,
                    e
                );
                None
            }
        };

        scorer
            .learn_from_feedback(job.accepted, &job.factors, doc_type.as_deref())
            .await;

        // The nudge changed the global weight set; cached confidences are
        // stale now.
        if let Err(e) = cache.clear_all().await {
            tracing::warn!("Failed to clear cache after learning update: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConfidenceTier;

    fn result(target: &str, confidence: f64, factors: FactorScores) -> MatchResult {
        MatchResult {
            match_id: uuid::Uuid::new_v4().to_string(),
            source_document_id: "src".to_string(),
            target_document_id: target.to_string(),
            confidence,
            tier: ConfidenceTier::from_confidence(confidence),
            factors,
            explanation: String::new(),
            status: MatchStatus::Pending,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_sort_results_by_confidence_descending() {
        let mut results = vec![
            result("a", 0.6, FactorScores::default()),
            result("b", 0.9, FactorScores::default()),
            result("c", 0.75, FactorScores::default()),
        ];
        sort_results(&mut results);
        let confidences: Vec<f64> = results.iter().map(|r| r.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.75, 0.6]);
    }

    #[test]
    fn test_sort_ties_broken_by_contributing_factors() {
        let two_factors = FactorScores {
            fuzzy: 0.8,
            amount: 0.8,
            ..Default::default()
        };
        let one_factor = FactorScores {
            fuzzy: 0.8,
            ..Default::default()
        };
        let mut results = vec![
            result("thin", 0.8, one_factor),
            result("full", 0.8, two_factors),
        ];
        sort_results(&mut results);
        assert_eq!(results[0].target_document_id, "full");
    }

    #[test]
    fn test_apply_result_view_threshold_and_limit() {
        let results = vec![
            result("a", 0.95, FactorScores::default()),
            result("b", 0.80, FactorScores::default()),
            result("c", 0.55, FactorScores::default()),
            result("d", 0.30, FactorScores::default()),
        ];
        let options = MatchOptions {
            min_confidence: 0.5,
            max_results: 2,
            ..Default::default()
        };
        let view = apply_result_view(results, &options);
        assert_eq!(view.len(), 2);
        assert_eq!(view[0].target_document_id, "a");
        assert_eq!(view[1].target_document_id, "b");
    }

    #[test]
    fn test_apply_result_view_exclusions() {
        let results = vec![
            result("a", 0.95, FactorScores::default()),
            result("b", 0.90, FactorScores::default()),
        ];
        let mut options = MatchOptions::default();
        options.filters.exclude_documents = vec!["a".to_string()];
        let view = apply_result_view(results, &options);
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].target_document_id, "b");
    }
}
