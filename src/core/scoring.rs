use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::{
    Algorithm, AlgorithmScore, ConfidenceTier, ConfidenceWeights, FactorScores, WeightSet,
};

/// Errors raised by the scorer
#[derive(Debug, Error)]
pub enum ScorerError {
    #[error("invalid weights: {0} weight is negative")]
    InvalidWeights(Algorithm),

    #[error("unknown experiment: {0}")]
    UnknownExperiment(String),
}

/// Full scoring breakdown for one candidate pair.
#[derive(Debug, Clone)]
pub struct ScoreBreakdown {
    pub overall: f64,
    pub tier: ConfidenceTier,
    pub factors: FactorScores,
    /// Effective weights after renormalization over the algorithms present.
    /// Absent algorithms carry weight 0.
    pub weights: WeightSet,
    pub explanation: String,
}

/// Aggregates per-algorithm similarity scores into one calibrated confidence.
///
/// The scorer is the sole owner of the adaptive weight state. All reads and
/// updates go through a single `RwLock`, so concurrent learning updates
/// cannot race with concurrent scoring reads. Weights effective for a
/// comparison are renormalized over the algorithms actually present, which
/// keeps a missing or failed engine from depressing confidence.
pub struct ConfidenceScorer {
    weights: RwLock<ConfidenceWeights>,
    experiments: RwLock<HashMap<String, ConfidenceWeights>>,
    learning_rate: f64,
}

impl ConfidenceScorer {
    pub const DEFAULT_LEARNING_RATE: f64 = 0.02;

    pub fn new(weights: ConfidenceWeights, learning_rate: f64) -> Self {
        Self {
            weights: RwLock::new(weights),
            experiments: RwLock::new(HashMap::new()),
            learning_rate,
        }
    }

    pub fn with_default_weights() -> Self {
        Self::new(ConfidenceWeights::default(), Self::DEFAULT_LEARNING_RATE)
    }

    /// Score a candidate pair against the live weight set.
    pub async fn calculate_confidence(
        &self,
        matches: &[AlgorithmScore],
        doc_type: Option<&str>,
    ) -> ScoreBreakdown {
        let weights = self.weights.read().await;
        score_with(&weights, matches, doc_type)
    }

    /// Weights effective for a document type (base merged with the type
    /// multiplier, not renormalized).
    pub async fn get_weights(&self, doc_type: Option<&str>) -> WeightSet {
        self.weights.read().await.effective_for(doc_type)
    }

    /// Snapshot of the full weight state.
    pub async fn snapshot(&self) -> ConfidenceWeights {
        self.weights.read().await.clone()
    }

    /// Replace the active base weight set. The update is all-or-nothing: a
    /// negative entry rejects the whole payload and leaves live state alone.
    pub async fn update_weights(&self, base: WeightSet) -> Result<(), ScorerError> {
        if let Some(algorithm) = base.first_negative() {
            return Err(ScorerError::InvalidWeights(algorithm));
        }
        let mut weights = self.weights.write().await;
        weights.base = base;
        tracing::info!(
            fuzzy = base.fuzzy,
            semantic = base.semantic,
            date = base.date,
            amount = base.amount,
            "replaced active weight set"
        );
        Ok(())
    }

    /// Register a per-document-type weight multiplier.
    pub async fn set_type_multiplier(
        &self,
        doc_type: &str,
        multiplier: WeightSet,
    ) -> Result<(), ScorerError> {
        if let Some(algorithm) = multiplier.first_negative() {
            return Err(ScorerError::InvalidWeights(algorithm));
        }
        let mut weights = self.weights.write().await;
        weights
            .type_multipliers
            .insert(doc_type.to_string(), multiplier);
        Ok(())
    }

    /// Online bounded weight update from accept/reject feedback.
    ///
    /// Each algorithm that contributed to the match is nudged up (accepted)
    /// or down (rejected) in proportion to its share of the overall score,
    /// scaled by the learning rate. Weights are clamped to [0, 1] and the
    /// base set renormalized to sum to 1 before the lock is released.
    pub async fn learn_from_feedback(
        &self,
        accepted: bool,
        factors: &FactorScores,
        doc_type: Option<&str>,
    ) -> WeightSet {
        let mut weights = self.weights.write().await;
        let effective = weights.effective_for(doc_type);

        let overall: f64 = Algorithm::ALL
            .iter()
            .map(|a| effective.get(*a) * factors.get(*a))
            .sum();

        if overall > 0.0 {
            let direction = if accepted { 1.0 } else { -1.0 };
            let mut base = weights.base;
            for algorithm in Algorithm::ALL {
                let contribution = effective.get(algorithm) * factors.get(algorithm);
                if contribution <= 0.0 {
                    continue;
                }
                let share = contribution / overall;
                let nudged = base.get(algorithm) + direction * self.learning_rate * share;
                base.set(algorithm, nudged.clamp(0.0, 1.0));
            }
            weights.base = base.normalized();
        }

        tracing::debug!(
            accepted,
            fuzzy = weights.base.fuzzy,
            semantic = weights.base.semantic,
            date = weights.base.date,
            amount = weights.base.amount,
            "applied feedback to weights"
        );

        weights.base
    }

    /// Register a tagged weight set for A/B comparison.
    pub async fn register_experiment(
        &self,
        experiment_id: &str,
        weights: ConfidenceWeights,
    ) -> Result<(), ScorerError> {
        if let Some(algorithm) = weights.base.first_negative() {
            return Err(ScorerError::InvalidWeights(algorithm));
        }
        self.experiments
            .write()
            .await
            .insert(experiment_id.to_string(), weights);
        Ok(())
    }

    /// Score against a registered experimental weight set. Live weight state
    /// is never touched.
    pub async fn experimental_score(
        &self,
        matches: &[AlgorithmScore],
        doc_type: Option<&str>,
        experiment_id: &str,
    ) -> Result<ScoreBreakdown, ScorerError> {
        let experiments = self.experiments.read().await;
        let weights = experiments
            .get(experiment_id)
            .ok_or_else(|| ScorerError::UnknownExperiment(experiment_id.to_string()))?;
        Ok(score_with(weights, matches, doc_type))
    }
}

/// Weighted aggregation of the scores present in `matches`.
fn score_with(
    weights: &ConfidenceWeights,
    matches: &[AlgorithmScore],
    doc_type: Option<&str>,
) -> ScoreBreakdown {
    let effective = weights.effective_for(doc_type);

    let mut factors = FactorScores::default();
    let mut present: Vec<(Algorithm, f64)> = Vec::with_capacity(matches.len());
    for m in matches {
        let score = m.score.clamp(0.0, 1.0);
        factors.set(m.algorithm, score);
        present.push((m.algorithm, score));
    }

    // Renormalize so only the present algorithms' weights sum to 1.
    let denom: f64 = present.iter().map(|(a, _)| effective.get(*a)).sum();
    let mut normalized = WeightSet {
        fuzzy: 0.0,
        semantic: 0.0,
        date: 0.0,
        amount: 0.0,
    };
    let mut overall = 0.0;
    for (algorithm, score) in &present {
        let weight = if denom > 0.0 {
            effective.get(*algorithm) / denom
        } else if !present.is_empty() {
            1.0 / present.len() as f64
        } else {
            0.0
        };
        normalized.set(*algorithm, weight);
        overall += weight * score;
    }
    let overall = overall.clamp(0.0, 1.0);

    ScoreBreakdown {
        overall,
        tier: ConfidenceTier::from_confidence(overall),
        factors,
        weights: normalized,
        explanation: build_explanation(overall, &normalized, &factors, &present),
    }
}

/// Names the top two factors by weighted contribution.
fn build_explanation(
    overall: f64,
    weights: &WeightSet,
    factors: &FactorScores,
    present: &[(Algorithm, f64)],
) -> String {
    if present.is_empty() {
        return "No algorithm signals available".to_string();
    }

    let mut contributions: Vec<(Algorithm, f64)> = present
        .iter()
        .map(|(a, _)| (*a, weights.get(*a) * factors.get(*a)))
        .collect();
    contributions.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let tier = ConfidenceTier::from_confidence(overall);
    let level = match tier {
        ConfidenceTier::High => "Strong",
        ConfidenceTier::Medium => "Good",
        ConfidenceTier::Low => "Possible",
        ConfidenceTier::VeryLow => "Weak",
    };

    let top: Vec<String> = contributions
        .iter()
        .take(2)
        .map(|(a, _)| format!("{} ({:.2})", a, factors.get(*a)))
        .collect();

    format!("{} match driven by {}", level, top.join(" and "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(pairs: &[(Algorithm, f64)]) -> Vec<AlgorithmScore> {
        pairs
            .iter()
            .map(|(algorithm, score)| AlgorithmScore {
                algorithm: *algorithm,
                score: *score,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_overall_in_unit_range() {
        let scorer = ConfidenceScorer::with_default_weights();
        let breakdown = scorer
            .calculate_confidence(
                &scores(&[
                    (Algorithm::Fuzzy, 1.0),
                    (Algorithm::Semantic, 1.0),
                    (Algorithm::Date, 1.0),
                    (Algorithm::Amount, 1.0),
                ]),
                None,
            )
            .await;
        assert!(breakdown.overall >= 0.0 && breakdown.overall <= 1.0);
        assert!((breakdown.overall - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_single_algorithm_equals_raw_score() {
        let scorer = ConfidenceScorer::with_default_weights();
        let breakdown = scorer
            .calculate_confidence(&scores(&[(Algorithm::Date, 0.73)]), None)
            .await;
        assert!((breakdown.overall - 0.73).abs() < 1e-9);
        assert!((breakdown.weights.date - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_absent_algorithms_reported_as_zero() {
        let scorer = ConfidenceScorer::with_default_weights();
        let breakdown = scorer
            .calculate_confidence(
                &scores(&[(Algorithm::Fuzzy, 0.8), (Algorithm::Amount, 0.9)]),
                None,
            )
            .await;
        assert_eq!(breakdown.factors.semantic, 0.0);
        assert_eq!(breakdown.factors.date, 0.0);
        assert!(breakdown.factors.fuzzy > 0.0);
    }

    #[tokio::test]
    async fn test_invoice_scenario() {
        // C1 with all four engines firing under the default weights
        let scorer = ConfidenceScorer::with_default_weights();
        let breakdown = scorer
            .calculate_confidence(
                &scores(&[
                    (Algorithm::Fuzzy, 0.9),
                    (Algorithm::Semantic, 0.8),
                    (Algorithm::Date, 0.95),
                    (Algorithm::Amount, 1.0),
                ]),
                Some("invoice"),
            )
            .await;
        assert!((breakdown.overall - 0.915).abs() < 0.01);
        assert_eq!(breakdown.tier, ConfidenceTier::High);
    }

    #[tokio::test]
    async fn test_explanation_names_top_two_factors() {
        let scorer = ConfidenceScorer::with_default_weights();
        let breakdown = scorer
            .calculate_confidence(
                &scores(&[
                    (Algorithm::Fuzzy, 0.1),
                    (Algorithm::Amount, 1.0),
                    (Algorithm::Date, 0.9),
                ]),
                None,
            )
            .await;
        assert!(breakdown.explanation.contains("amount"));
        assert!(breakdown.explanation.contains("date"));
        assert!(!breakdown.explanation.contains("fuzzy"));
    }

    #[tokio::test]
    async fn test_update_weights_rejects_negative() {
        let scorer = ConfidenceScorer::with_default_weights();
        let result = scorer
            .update_weights(WeightSet {
                fuzzy: 0.5,
                semantic: -0.1,
                date: 0.3,
                amount: 0.3,
            })
            .await;
        assert!(matches!(
            result,
            Err(ScorerError::InvalidWeights(Algorithm::Semantic))
        ));
        // Live state untouched
        let live = scorer.get_weights(None).await;
        assert_eq!(live, WeightSet::default());
    }

    #[tokio::test]
    async fn test_feedback_moves_dominant_weight_up() {
        let scorer = ConfidenceScorer::with_default_weights();
        let before = scorer.get_weights(None).await;

        let factors = FactorScores {
            fuzzy: 0.1,
            semantic: 0.95,
            date: 0.1,
            amount: 0.1,
            metadata: 0.0,
        };
        let after = scorer.learn_from_feedback(true, &factors, None).await;

        assert!(after.semantic > before.semantic);
        assert!(after.semantic - before.semantic <= ConfidenceScorer::DEFAULT_LEARNING_RATE);
        assert!(after.first_negative().is_none());
        assert!((after.sum() - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_rejection_moves_dominant_weight_down() {
        let scorer = ConfidenceScorer::with_default_weights();
        let before = scorer.get_weights(None).await;

        let factors = FactorScores {
            fuzzy: 0.0,
            semantic: 0.0,
            date: 0.0,
            amount: 0.9,
            metadata: 0.0,
        };
        let after = scorer.learn_from_feedback(false, &factors, None).await;

        assert!(after.amount < before.amount);
        assert!((after.sum() - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_feedback_with_no_contributions_is_a_noop() {
        let scorer = ConfidenceScorer::with_default_weights();
        let after = scorer
            .learn_from_feedback(true, &FactorScores::default(), None)
            .await;
        assert_eq!(after, WeightSet::default());
    }

    #[tokio::test]
    async fn test_experimental_score_does_not_mutate_live_weights() {
        let scorer = ConfidenceScorer::with_default_weights();
        let experimental = ConfidenceWeights {
            base: WeightSet {
                fuzzy: 1.0,
                semantic: 0.0,
                date: 0.0,
                amount: 0.0,
            },
            ..Default::default()
        };
        scorer
            .register_experiment("fuzzy-only", experimental)
            .await
            .unwrap();

        let input = scores(&[(Algorithm::Fuzzy, 0.4), (Algorithm::Amount, 1.0)]);
        let exp = scorer
            .experimental_score(&input, None, "fuzzy-only")
            .await
            .unwrap();
        assert!((exp.overall - 0.4).abs() < 1e-9);

        let live = scorer.calculate_confidence(&input, None).await;
        assert!(live.overall > exp.overall);
        assert_eq!(scorer.get_weights(None).await, WeightSet::default());
    }

    #[tokio::test]
    async fn test_unknown_experiment_is_an_error() {
        let scorer = ConfidenceScorer::with_default_weights();
        let result = scorer
            .experimental_score(&scores(&[(Algorithm::Fuzzy, 0.5)]), None, "missing")
            .await;
        assert!(matches!(result, Err(ScorerError::UnknownExperiment(_))));
    }
}
