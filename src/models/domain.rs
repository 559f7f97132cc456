use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// The closed set of similarity algorithms the service fans out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Fuzzy,
    Semantic,
    Date,
    Amount,
}

impl Algorithm {
    /// All four engines, in canonical order.
    pub const ALL: [Algorithm; 4] = [
        Algorithm::Fuzzy,
        Algorithm::Semantic,
        Algorithm::Date,
        Algorithm::Amount,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Fuzzy => "fuzzy",
            Algorithm::Semantic => "semantic",
            Algorithm::Date => "date",
            Algorithm::Amount => "amount",
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document as read from the document store.
///
/// The core never mutates documents; the structured `date`, `amount` and
/// `embedding` fields are what the Date/Amount/Semantic engines consume,
/// everything else lives in `metadata`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(rename = "documentType")]
    pub doc_type: String,
    pub content: String,
    #[serde(default)]
    pub date: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// One engine's score for a candidate pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AlgorithmScore {
    pub algorithm: Algorithm,
    pub score: f64,
}

/// Raw per-algorithm scores attached to a match result.
///
/// Algorithms that did not run (disabled or failed) are reported as 0 so the
/// breakdown stays transparent to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FactorScores {
    pub fuzzy: f64,
    pub semantic: f64,
    pub date: f64,
    pub amount: f64,
    pub metadata: f64,
}

impl FactorScores {
    pub fn get(&self, algorithm: Algorithm) -> f64 {
        match algorithm {
            Algorithm::Fuzzy => self.fuzzy,
            Algorithm::Semantic => self.semantic,
            Algorithm::Date => self.date,
            Algorithm::Amount => self.amount,
        }
    }

    pub fn set(&mut self, algorithm: Algorithm, score: f64) {
        match algorithm {
            Algorithm::Fuzzy => self.fuzzy = score,
            Algorithm::Semantic => self.semantic = score,
            Algorithm::Date => self.date = score,
            Algorithm::Amount => self.amount = score,
        }
    }

    /// Number of factors with a non-zero contribution, used as the sort
    /// tie-breaker between equal confidences.
    pub fn contributing(&self) -> usize {
        [self.fuzzy, self.semantic, self.date, self.amount, self.metadata]
            .iter()
            .filter(|s| **s > 0.0)
            .count()
    }
}

/// Lifecycle of a match: pending until a user accepts or rejects it, and
/// never moves again after that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Pending,
    Accepted,
    Rejected,
}

impl MatchStatus {
    pub fn is_final(&self) -> bool {
        !matches!(self, MatchStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Pending => "pending",
            MatchStatus::Accepted => "accepted",
            MatchStatus::Rejected => "rejected",
        }
    }
}

/// Discrete confidence bucket derived from the continuous score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    VeryLow,
    Low,
    Medium,
    High,
}

impl ConfidenceTier {
    /// Boundaries are inclusive on their lower bound.
    pub fn from_confidence(overall: f64) -> Self {
        if overall >= 0.9 {
            ConfidenceTier::High
        } else if overall >= 0.7 {
            ConfidenceTier::Medium
        } else if overall >= 0.5 {
            ConfidenceTier::Low
        } else {
            ConfidenceTier::VeryLow
        }
    }
}

/// A scored link between a source and a target document.
///
/// Confidence and factors are fixed at creation; only `status` moves, and
/// only away from `Pending`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    #[serde(rename = "matchId")]
    pub match_id: String,
    #[serde(rename = "sourceDocumentId")]
    pub source_document_id: String,
    #[serde(rename = "targetDocumentId")]
    pub target_document_id: String,
    pub confidence: f64,
    pub tier: ConfidenceTier,
    pub factors: FactorScores,
    pub explanation: String,
    pub status: MatchStatus,
    #[serde(rename = "createdAt")]
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Accept/reject signal recorded against a match. Write-once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserFeedback {
    #[serde(rename = "matchId")]
    pub match_id: String,
    pub accepted: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Per-algorithm base weights. All entries stay >= 0; the scorer
/// renormalizes over the algorithms actually present in a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightSet {
    pub fuzzy: f64,
    pub semantic: f64,
    pub date: f64,
    pub amount: f64,
}

impl WeightSet {
    pub fn get(&self, algorithm: Algorithm) -> f64 {
        match algorithm {
            Algorithm::Fuzzy => self.fuzzy,
            Algorithm::Semantic => self.semantic,
            Algorithm::Date => self.date,
            Algorithm::Amount => self.amount,
        }
    }

    pub fn set(&mut self, algorithm: Algorithm, weight: f64) {
        match algorithm {
            Algorithm::Fuzzy => self.fuzzy = weight,
            Algorithm::Semantic => self.semantic = weight,
            Algorithm::Date => self.date = weight,
            Algorithm::Amount => self.amount = weight,
        }
    }

    pub fn sum(&self) -> f64 {
        self.fuzzy + self.semantic + self.date + self.amount
    }

    /// First negative entry, if any.
    pub fn first_negative(&self) -> Option<Algorithm> {
        Algorithm::ALL.iter().copied().find(|a| self.get(*a) < 0.0)
    }

    /// Rescale so the full set sums to 1. A zero set is left untouched.
    pub fn normalized(&self) -> WeightSet {
        let sum = self.sum();
        if sum <= 0.0 {
            return *self;
        }
        WeightSet {
            fuzzy: self.fuzzy / sum,
            semantic: self.semantic / sum,
            date: self.date / sum,
            amount: self.amount / sum,
        }
    }
}

impl Default for WeightSet {
    fn default() -> Self {
        Self {
            fuzzy: 0.25,
            semantic: 0.25,
            date: 0.20,
            amount: 0.30,
        }
    }
}

/// Full weight state owned by the scorer: base weights plus optional
/// per-document-type multipliers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfidenceWeights {
    pub base: WeightSet,
    #[serde(rename = "typeMultipliers", default)]
    pub type_multipliers: HashMap<String, WeightSet>,
}

impl ConfidenceWeights {
    /// Weights effective for a document type: base merged with the type's
    /// multiplier when one is registered.
    pub fn effective_for(&self, doc_type: Option<&str>) -> WeightSet {
        let mut effective = self.base;
        if let Some(multiplier) = doc_type.and_then(|t| self.type_multipliers.get(t)) {
            for algorithm in Algorithm::ALL {
                effective.set(
                    algorithm,
                    effective.get(algorithm) * multiplier.get(algorithm),
                );
            }
        }
        effective
    }
}

/// Candidate pre-filters applied by the document store before any engine runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchFilters {
    #[serde(rename = "dateRange", default)]
    pub date_range: Option<DateRange>,
    #[serde(rename = "amountRange", default)]
    pub amount_range: Option<AmountRange>,
    #[serde(rename = "documentTypes", default)]
    pub document_types: Vec<String>,
    #[serde(rename = "excludeDocuments", default)]
    pub exclude_documents: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DateRange {
    pub from: chrono::DateTime<chrono::Utc>,
    pub to: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AmountRange {
    pub min: f64,
    pub max: f64,
}

/// Options for a single find_matches call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchOptions {
    #[serde(rename = "minConfidence", default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(rename = "maxResults", default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_algorithms")]
    pub algorithms: Vec<Algorithm>,
    #[serde(rename = "useCache", default = "default_true")]
    pub use_cache: bool,
    #[serde(default)]
    pub filters: MatchFilters,
}

fn default_min_confidence() -> f64 {
    0.5
}

fn default_max_results() -> usize {
    10
}

fn default_algorithms() -> Vec<Algorithm> {
    Algorithm::ALL.to_vec()
}

fn default_true() -> bool {
    true
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            max_results: default_max_results(),
            algorithms: default_algorithms(),
            use_cache: default_true(),
            filters: MatchFilters::default(),
        }
    }
}

/// Options for batch processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOptions {
    #[serde(rename = "batchSize", default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(flatten)]
    pub match_options: MatchOptions,
}

fn default_batch_size() -> usize {
    100
}

fn default_concurrency() -> usize {
    4
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            match_options: MatchOptions::default(),
        }
    }
}

/// Progress snapshot reported after each batch group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchProgress {
    pub processed: usize,
    pub total: usize,
    #[serde(rename = "currentDocument")]
    pub current_document: String,
    #[serde(rename = "estimatedRemainingMs")]
    pub estimated_remaining_ms: u64,
}

/// Callback invoked with batch progress snapshots.
pub type ProgressCallback = Arc<dyn Fn(BatchProgress) + Send + Sync>;

/// Terminal state of a batch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Completed,
    PartiallyFailed,
    Failed,
}

/// One document that failed inside a batch, with the surfaced error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFailure {
    #[serde(rename = "documentId")]
    pub document_id: String,
    pub error: String,
}

/// Aggregated outcome of a batch job. Ephemeral, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMatchResult {
    pub results: Vec<MatchResult>,
    #[serde(rename = "averageConfidence")]
    pub average_confidence: f64,
    pub failed: Vec<BatchFailure>,
    pub status: BatchStatus,
    #[serde(rename = "elapsedMs")]
    pub elapsed_ms: u64,
}

/// Aggregation over stored match results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchStatistics {
    pub total: u64,
    pub pending: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
    #[serde(rename = "veryLow")]
    pub very_low: u64,
    #[serde(rename = "averageConfidence")]
    pub average_confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(ConfidenceTier::from_confidence(0.9), ConfidenceTier::High);
        assert_eq!(
            ConfidenceTier::from_confidence(0.89999),
            ConfidenceTier::Medium
        );
        assert_eq!(ConfidenceTier::from_confidence(0.7), ConfidenceTier::Medium);
        assert_eq!(ConfidenceTier::from_confidence(0.5), ConfidenceTier::Low);
        assert_eq!(
            ConfidenceTier::from_confidence(0.49999),
            ConfidenceTier::VeryLow
        );
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        let weights = WeightSet::default();
        assert!((weights.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalized_sums_to_one() {
        let weights = WeightSet {
            fuzzy: 2.0,
            semantic: 1.0,
            date: 1.0,
            amount: 0.0,
        };
        let normalized = weights.normalized();
        assert!((normalized.sum() - 1.0).abs() < 1e-9);
        assert!((normalized.fuzzy - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_effective_weights_apply_type_multiplier() {
        let mut weights = ConfidenceWeights::default();
        weights.type_multipliers.insert(
            "invoice".to_string(),
            WeightSet {
                fuzzy: 1.0,
                semantic: 1.0,
                date: 2.0,
                amount: 1.0,
            },
        );

        let effective = weights.effective_for(Some("invoice"));
        assert!((effective.date - weights.base.date * 2.0).abs() < 1e-9);

        // Unregistered type falls back to the base set
        let plain = weights.effective_for(Some("receipt"));
        assert_eq!(plain, weights.base);
    }

    #[test]
    fn test_status_transitions() {
        assert!(!MatchStatus::Pending.is_final());
        assert!(MatchStatus::Accepted.is_final());
        assert!(MatchStatus::Rejected.is_final());
    }

    #[test]
    fn test_contributing_counts_nonzero_factors() {
        let factors = FactorScores {
            fuzzy: 0.9,
            semantic: 0.8,
            date: 0.0,
            amount: 1.0,
            metadata: 0.0,
        };
        assert_eq!(factors.contributing(), 3);
    }
}
