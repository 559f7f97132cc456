// Model exports
pub mod domain;
pub mod requests;
pub mod responses;

pub use domain::{
    Algorithm, AlgorithmScore, AmountRange, BatchFailure, BatchMatchResult, BatchOptions,
    BatchProgress, BatchStatus, ConfidenceTier, ConfidenceWeights, DateRange, Document,
    FactorScores, MatchFilters, MatchOptions, MatchResult, MatchStatistics, MatchStatus,
    ProgressCallback, UserFeedback, WeightSet,
};
pub use requests::{
    BatchMatchRequest, FindMatchesRequest, UpdateWeightsRequest, ValidateMatchRequest,
};
pub use responses::{
    ErrorResponse, FindMatchesResponse, HealthResponse, ValidateMatchResponse, WeightsResponse,
};
