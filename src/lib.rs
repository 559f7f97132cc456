//! docmatch - Document matching engine for Intelligent Finder
//!
//! This library links related documents (e.g. invoices to bank transactions)
//! by fanning each candidate pair out to independent similarity engines and
//! aggregating their scores into one calibrated confidence value that adapts
//! from accept/reject feedback.

pub mod config;
pub mod core;
pub mod models;
pub mod routes;
pub mod services;

// Re-export commonly used types
pub use crate::core::{ConfidenceScorer, MatchEngine, MatchError, MatchService};
pub use models::{
    Algorithm, AlgorithmScore, BatchMatchResult, BatchOptions, ConfidenceTier, ConfidenceWeights,
    Document, FactorScores, MatchOptions, MatchResult, MatchStatus, UserFeedback, WeightSet,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        // Verify that the library exports work correctly
        let tier = ConfidenceTier::from_confidence(0.95);
        assert_eq!(tier, ConfidenceTier::High);
    }
}
