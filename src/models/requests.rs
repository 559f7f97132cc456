use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::domain::{Algorithm, MatchFilters, WeightSet};

/// Request to find matches for a single document
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FindMatchesRequest {
    #[validate(length(min = 1))]
    #[serde(alias = "document_id", rename = "documentId")]
    pub document_id: String,
    #[serde(rename = "minConfidence")]
    pub min_confidence: Option<f64>,
    #[serde(rename = "maxResults")]
    pub max_results: Option<usize>,
    #[serde(default)]
    pub algorithms: Option<Vec<Algorithm>>,
    #[serde(rename = "useCache")]
    pub use_cache: Option<bool>,
    #[serde(default)]
    pub filters: Option<MatchFilters>,
}

/// Request to run matching over a set of documents
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BatchMatchRequest {
    #[validate(length(min = 1))]
    #[serde(alias = "document_ids", rename = "documentIds")]
    pub document_ids: Vec<String>,
    #[serde(rename = "batchSize")]
    pub batch_size: Option<usize>,
    pub concurrency: Option<usize>,
    #[serde(rename = "minConfidence")]
    pub min_confidence: Option<f64>,
    #[serde(rename = "maxResults")]
    pub max_results: Option<usize>,
    #[serde(rename = "useCache")]
    pub use_cache: Option<bool>,
}

/// Request to record accept/reject feedback against a match
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateMatchRequest {
    pub accepted: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Request to replace the active weight set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateWeightsRequest {
    pub fuzzy: f64,
    pub semantic: f64,
    pub date: f64,
    pub amount: f64,
}

impl UpdateWeightsRequest {
    pub fn into_weight_set(self) -> WeightSet {
        WeightSet {
            fuzzy: self.fuzzy,
            semantic: self.semantic,
            date: self.date,
            amount: self.amount,
        }
    }
}
