use serde::{Deserialize, Serialize};

use crate::models::domain::{MatchResult, WeightSet};

/// Response for the find matches endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindMatchesResponse {
    pub matches: Vec<MatchResult>,
    #[serde(rename = "totalResults")]
    pub total_results: usize,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}

/// Response after recording feedback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateMatchResponse {
    pub success: bool,
    #[serde(rename = "matchId")]
    pub match_id: String,
}

/// Currently active base weights
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightsResponse {
    pub weights: WeightSet,
}
