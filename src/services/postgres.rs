use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;

use crate::models::{
    Document, FactorScores, MatchFilters, MatchResult, MatchStatistics, MatchStatus, UserFeedback,
};
use crate::services::store::{DocumentStore, MatchStore, StoreError};

/// PostgreSQL-backed document and match store.
///
/// Documents live in `documents`, computed matches in `match_results`, and
/// accept/reject feedback in `match_feedback`. Candidate pre-filtering is
/// pushed into SQL so no unfiltered corpus ever crosses the wire.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new store from a connection string
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(600))
            .test_before_acquire(true)
            .connect(database_url)
            .await?;

        // Run migrations on startup
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Create a new store from settings
    pub async fn from_settings(
        url: &str,
        max_connections: Option<u32>,
        min_connections: Option<u32>,
    ) -> Result<Self, StoreError> {
        tracing::info!("Connecting to PostgreSQL");
        Self::new(
            url,
            max_connections.unwrap_or(10),
            min_connections.unwrap_or(1),
        )
        .await
    }

    /// Health check for the database connection
    pub async fn health_check(&self) -> Result<bool, StoreError> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| true)
            .map_err(Into::into)
    }

    fn document_from_row(row: &sqlx::postgres::PgRow) -> Result<Document, StoreError> {
        let embedding: Option<serde_json::Value> = row.get("embedding");
        let metadata: Option<serde_json::Value> = row.get("metadata");

        Ok(Document {
            id: row.get("id"),
            doc_type: row.get("doc_type"),
            content: row.get("content"),
            date: row.get("date"),
            amount: row.get("amount"),
            embedding: embedding.map(serde_json::from_value).transpose()?,
            metadata: metadata
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or_default(),
        })
    }

    fn match_from_row(row: &sqlx::postgres::PgRow) -> Result<MatchResult, StoreError> {
        let factors: serde_json::Value = row.get("factors");
        let confidence: f64 = row.get("confidence");
        let status: String = row.get("status");

        Ok(MatchResult {
            match_id: row.get("match_id"),
            source_document_id: row.get("source_document_id"),
            target_document_id: row.get("target_document_id"),
            confidence,
            tier: crate::models::ConfidenceTier::from_confidence(confidence),
            factors: serde_json::from_value::<FactorScores>(factors)?,
            explanation: row.get("explanation"),
            status: serde_json::from_value(serde_json::Value::String(status))?,
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl DocumentStore for PostgresStore {
    async fn load_document(&self, id: &str) -> Result<Option<Document>, StoreError> {
        let query = r#"
            SELECT id, doc_type, content, date, amount, embedding, metadata
            FROM documents
            WHERE id = $1
        "#;

        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::document_from_row).transpose()
    }

    async fn load_candidates(
        &self,
        source: &Document,
        filters: &MatchFilters,
    ) -> Result<Vec<Document>, StoreError> {
        let query = r#"
            SELECT id, doc_type, content, date, amount, embedding, metadata
            FROM documents
            WHERE id <> $1
              AND ($2::timestamptz IS NULL OR (date IS NOT NULL AND date >= $2))
              AND ($3::timestamptz IS NULL OR (date IS NOT NULL AND date <= $3))
              AND ($4::float8 IS NULL OR (amount IS NOT NULL AND amount >= $4))
              AND ($5::float8 IS NULL OR (amount IS NOT NULL AND amount <= $5))
              AND (cardinality($6::text[]) = 0 OR doc_type = ANY($6))
              AND NOT (id = ANY($7))
            ORDER BY id
        "#;

        let rows = sqlx::query(query)
            .bind(&source.id)
            .bind(filters.date_range.map(|r| r.from))
            .bind(filters.date_range.map(|r| r.to))
            .bind(filters.amount_range.map(|r| r.min))
            .bind(filters.amount_range.map(|r| r.max))
            .bind(&filters.document_types)
            .bind(&filters.exclude_documents)
            .fetch_all(&self.pool)
            .await?;

        let candidates: Result<Vec<Document>, StoreError> =
            rows.iter().map(Self::document_from_row).collect();

        let candidates = candidates?;
        tracing::debug!(
            "Loaded {} candidates for document {}",
            candidates.len(),
            source.id
        );
        Ok(candidates)
    }
}

#[async_trait]
impl MatchStore for PostgresStore {
    async fn store_matches(&self, results: &[MatchResult]) -> Result<(), StoreError> {
        // Confidence and factors are immutable once created, so conflicting
        // re-inserts are ignored rather than updated.
        let query = r#"
            INSERT INTO match_results
                (match_id, source_document_id, target_document_id,
                 confidence, factors, explanation, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (match_id) DO NOTHING
        "#;

        for result in results {
            sqlx::query(query)
                .bind(&result.match_id)
                .bind(&result.source_document_id)
                .bind(&result.target_document_id)
                .bind(result.confidence)
                .bind(serde_json::to_value(result.factors)?)
                .bind(&result.explanation)
                .bind(result.status.as_str())
                .bind(result.created_at)
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    async fn get_match(&self, match_id: &str) -> Result<Option<MatchResult>, StoreError> {
        let query = r#"
            SELECT match_id, source_document_id, target_document_id,
                   confidence, factors, explanation, status, created_at
            FROM match_results
            WHERE match_id = $1
        "#;

        let row = sqlx::query(query)
            .bind(match_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::match_from_row).transpose()
    }

    async fn update_match_status(
        &self,
        match_id: &str,
        status: MatchStatus,
    ) -> Result<(), StoreError> {
        let query = r#"
            UPDATE match_results
            SET status = $2
            WHERE match_id = $1
        "#;

        let result = sqlx::query(query)
            .bind(match_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("match {}", match_id)));
        }
        Ok(())
    }

    async fn store_feedback(&self, feedback: &UserFeedback) -> Result<(), StoreError> {
        let query = r#"
            INSERT INTO match_feedback (match_id, accepted, reason, created_at)
            VALUES ($1, $2, $3, NOW())
        "#;

        sqlx::query(query)
            .bind(&feedback.match_id)
            .bind(feedback.accepted)
            .bind(&feedback.reason)
            .execute(&self.pool)
            .await?;

        tracing::debug!(
            "Recorded feedback for match {}: accepted={}",
            feedback.match_id,
            feedback.accepted
        );
        Ok(())
    }

    async fn statistics(&self) -> Result<MatchStatistics, StoreError> {
        let query = r#"
            SELECT
                COUNT(*) as total,
                COUNT(*) FILTER (WHERE status = 'pending') as pending,
                COUNT(*) FILTER (WHERE status = 'accepted') as accepted,
                COUNT(*) FILTER (WHERE status = 'rejected') as rejected,
                COUNT(*) FILTER (WHERE confidence >= 0.9) as high,
                COUNT(*) FILTER (WHERE confidence >= 0.7 AND confidence < 0.9) as medium,
                COUNT(*) FILTER (WHERE confidence >= 0.5 AND confidence < 0.7) as low,
                COUNT(*) FILTER (WHERE confidence < 0.5) as very_low,
                COALESCE(AVG(confidence), 0.0) as average_confidence
            FROM match_results
        "#;

        let row = sqlx::query(query).fetch_one(&self.pool).await?;

        Ok(MatchStatistics {
            total: row.get::<i64, _>("total") as u64,
            pending: row.get::<i64, _>("pending") as u64,
            accepted: row.get::<i64, _>("accepted") as u64,
            rejected: row.get::<i64, _>("rejected") as u64,
            high: row.get::<i64, _>("high") as u64,
            medium: row.get::<i64, _>("medium") as u64,
            low: row.get::<i64, _>("low") as u64,
            very_low: row.get::<i64, _>("very_low") as u64,
            average_confidence: row.get("average_confidence"),
        })
    }
}
