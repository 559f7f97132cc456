// Core engine exports
pub mod engines;
pub mod scoring;
pub mod service;

pub use engines::{
    default_engines, AmountMatchEngine, DateMatchEngine, EngineError, FuzzyMatchEngine,
    MatchEngine, SemanticMatchEngine,
};
pub use scoring::{ConfidenceScorer, ScoreBreakdown, ScorerError};
pub use service::{MatchError, MatchService};
