use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::{
    ConfidenceTier, Document, MatchFilters, MatchResult, MatchStatistics, MatchStatus,
    UserFeedback,
};

/// Errors that can occur when interacting with the stores
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrateError(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Read-only access to the document corpus. All candidate pre-filtering by
/// date range, amount range, document type and exclusion list happens here,
/// before any engine runs.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn load_document(&self, id: &str) -> Result<Option<Document>, StoreError>;

    async fn load_candidates(
        &self,
        source: &Document,
        filters: &MatchFilters,
    ) -> Result<Vec<Document>, StoreError>;
}

/// Persistence for match results and feedback.
#[async_trait]
pub trait MatchStore: Send + Sync {
    async fn store_matches(&self, results: &[MatchResult]) -> Result<(), StoreError>;

    async fn get_match(&self, match_id: &str) -> Result<Option<MatchResult>, StoreError>;

    async fn update_match_status(
        &self,
        match_id: &str,
        status: MatchStatus,
    ) -> Result<(), StoreError>;

    async fn store_feedback(&self, feedback: &UserFeedback) -> Result<(), StoreError>;

    async fn statistics(&self) -> Result<MatchStatistics, StoreError>;
}

/// Does a candidate pass the pre-filters for a given source document?
pub fn candidate_passes_filters(
    source: &Document,
    candidate: &Document,
    filters: &MatchFilters,
) -> bool {
    if candidate.id == source.id {
        return false;
    }

    if filters.exclude_documents.contains(&candidate.id) {
        return false;
    }

    if !filters.document_types.is_empty() && !filters.document_types.contains(&candidate.doc_type)
    {
        return false;
    }

    if let Some(range) = &filters.date_range {
        match candidate.date {
            Some(date) if date >= range.from && date <= range.to => {}
            _ => return false,
        }
    }

    if let Some(range) = &filters.amount_range {
        match candidate.amount {
            Some(amount) if amount >= range.min && amount <= range.max => {}
            _ => return false,
        }
    }

    true
}

/// In-memory store backing tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryStore {
    documents: RwLock<HashMap<String, Document>>,
    matches: RwLock<HashMap<String, MatchResult>>,
    feedback: RwLock<Vec<UserFeedback>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_document(&self, document: Document) {
        self.documents
            .write()
            .await
            .insert(document.id.clone(), document);
    }

    pub async fn insert_documents(&self, documents: impl IntoIterator<Item = Document>) {
        let mut map = self.documents.write().await;
        for document in documents {
            map.insert(document.id.clone(), document);
        }
    }

    pub async fn feedback_count(&self) -> usize {
        self.feedback.read().await.len()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn load_document(&self, id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self.documents.read().await.get(id).cloned())
    }

    async fn load_candidates(
        &self,
        source: &Document,
        filters: &MatchFilters,
    ) -> Result<Vec<Document>, StoreError> {
        let documents = self.documents.read().await;
        let mut candidates: Vec<Document> = documents
            .values()
            .filter(|candidate| candidate_passes_filters(source, candidate, filters))
            .cloned()
            .collect();
        // Deterministic candidate order regardless of map iteration
        candidates.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(candidates)
    }
}

#[async_trait]
impl MatchStore for InMemoryStore {
    async fn store_matches(&self, results: &[MatchResult]) -> Result<(), StoreError> {
        let mut matches = self.matches.write().await;
        for result in results {
            matches.insert(result.match_id.clone(), result.clone());
        }
        Ok(())
    }

    async fn get_match(&self, match_id: &str) -> Result<Option<MatchResult>, StoreError> {
        Ok(self.matches.read().await.get(match_id).cloned())
    }

    async fn update_match_status(
        &self,
        match_id: &str,
        status: MatchStatus,
    ) -> Result<(), StoreError> {
        let mut matches = self.matches.write().await;
        let entry = matches
            .get_mut(match_id)
            .ok_or_else(|| StoreError::NotFound(format!("match {}", match_id)))?;
        entry.status = status;
        Ok(())
    }

    async fn store_feedback(&self, feedback: &UserFeedback) -> Result<(), StoreError> {
        self.feedback.write().await.push(feedback.clone());
        Ok(())
    }

    async fn statistics(&self) -> Result<MatchStatistics, StoreError> {
        let matches = self.matches.read().await;
        let mut stats = MatchStatistics::default();
        let mut confidence_sum = 0.0;

        for result in matches.values() {
            stats.total += 1;
            confidence_sum += result.confidence;
            match result.status {
                MatchStatus::Pending => stats.pending += 1,
                MatchStatus::Accepted => stats.accepted += 1,
                MatchStatus::Rejected => stats.rejected += 1,
            }
            match result.tier {
                ConfidenceTier::High => stats.high += 1,
                ConfidenceTier::Medium => stats.medium += 1,
                ConfidenceTier::Low => stats.low += 1,
                ConfidenceTier::VeryLow => stats.very_low += 1,
            }
        }

        if stats.total > 0 {
            stats.average_confidence = confidence_sum / stats.total as f64;
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AmountRange, DateRange};
    use chrono::{Duration, Utc};

    fn doc(id: &str, doc_type: &str, amount: Option<f64>) -> Document {
        Document {
            id: id.to_string(),
            doc_type: doc_type.to_string(),
            content: String::new(),
            date: Some(Utc::now()),
            amount,
            embedding: None,
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_load_candidates_excludes_source_and_exclusions() {
        let store = InMemoryStore::new();
        store
            .insert_documents([
                doc("src", "invoice", None),
                doc("a", "transaction", None),
                doc("b", "transaction", None),
            ])
            .await;

        let source = store.load_document("src").await.unwrap().unwrap();
        let filters = MatchFilters {
            exclude_documents: vec!["b".to_string()],
            ..Default::default()
        };
        let candidates = store.load_candidates(&source, &filters).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, "a");
    }

    #[tokio::test]
    async fn test_load_candidates_applies_type_and_range_filters() {
        let store = InMemoryStore::new();
        let mut old = doc("old", "transaction", Some(100.0));
        old.date = Some(Utc::now() - Duration::days(90));
        store
            .insert_documents([
                doc("src", "invoice", Some(100.0)),
                doc("a", "transaction", Some(100.0)),
                doc("b", "transaction", Some(900.0)),
                doc("c", "receipt", Some(100.0)),
                old,
            ])
            .await;

        let source = store.load_document("src").await.unwrap().unwrap();
        let filters = MatchFilters {
            document_types: vec!["transaction".to_string()],
            amount_range: Some(AmountRange {
                min: 50.0,
                max: 200.0,
            }),
            date_range: Some(DateRange {
                from: Utc::now() - Duration::days(30),
                to: Utc::now() + Duration::days(1),
            }),
            ..Default::default()
        };

        let candidates = store.load_candidates(&source, &filters).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, "a");
    }

    #[tokio::test]
    async fn test_statistics_aggregation() {
        use crate::models::{ConfidenceTier, FactorScores};

        let store = InMemoryStore::new();
        let make = |id: &str, confidence: f64, status: MatchStatus| MatchResult {
            match_id: id.to_string(),
            source_document_id: "s".to_string(),
            target_document_id: "t".to_string(),
            confidence,
            tier: ConfidenceTier::from_confidence(confidence),
            factors: FactorScores::default(),
            explanation: String::new(),
            status,
            created_at: Utc::now(),
        };

        store
            .store_matches(&[
                make("m1", 0.95, MatchStatus::Accepted),
                make("m2", 0.75, MatchStatus::Pending),
                make("m3", 0.55, MatchStatus::Rejected),
            ])
            .await
            .unwrap();

        let stats = store.statistics().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.high, 1);
        assert_eq!(stats.medium, 1);
        assert_eq!(stats.low, 1);
        assert!((stats.average_confidence - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_update_status_of_missing_match_errors() {
        let store = InMemoryStore::new();
        let result = store
            .update_match_status("missing", MatchStatus::Accepted)
            .await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }
}
