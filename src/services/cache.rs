use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::models::MatchResult;

/// Errors that can occur with cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Cache key builder
pub struct CacheKey;

impl CacheKey {
    /// Build a cache key for a source document's candidate list
    pub fn matches(document_id: &str) -> String {
        format!("matches:{}", document_id)
    }

    /// Pattern covering every match entry
    pub fn all_matches() -> &'static str {
        "matches:*"
    }
}

/// Cache of previously computed candidate lists, keyed by source document id.
///
/// Entries hold the fuller pre-threshold list; readers re-apply their own
/// threshold and limit. A read failure is always recoverable; the service
/// degrades to a cache miss.
#[async_trait]
pub trait MatchCache: Send + Sync {
    async fn get_cached(&self, document_id: &str)
        -> Result<Option<Vec<MatchResult>>, CacheError>;

    async fn set_cached(
        &self,
        document_id: &str,
        results: &[MatchResult],
    ) -> Result<(), CacheError>;

    async fn invalidate_document(&self, document_id: &str) -> Result<(), CacheError>;

    async fn clear_all(&self) -> Result<(), CacheError>;
}

/// Single-process in-memory cache.
///
/// Used in tests and as the fallback when Redis is unreachable at startup.
pub struct MemoryCache {
    entries: moka::future::Cache<String, Arc<Vec<MatchResult>>>,
}

impl MemoryCache {
    pub fn new(capacity: u64, ttl_secs: u64) -> Self {
        let entries = moka::future::CacheBuilder::new(capacity)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();
        Self { entries }
    }
}

#[async_trait]
impl MatchCache for MemoryCache {
    async fn get_cached(
        &self,
        document_id: &str,
    ) -> Result<Option<Vec<MatchResult>>, CacheError> {
        let key = CacheKey::matches(document_id);
        Ok(self.entries.get(&key).await.map(|v| (*v).clone()))
    }

    async fn set_cached(
        &self,
        document_id: &str,
        results: &[MatchResult],
    ) -> Result<(), CacheError> {
        let key = CacheKey::matches(document_id);
        self.entries.insert(key, Arc::new(results.to_vec())).await;
        Ok(())
    }

    async fn invalidate_document(&self, document_id: &str) -> Result<(), CacheError> {
        self.entries.invalidate(&CacheKey::matches(document_id)).await;
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), CacheError> {
        self.entries.invalidate_all();
        Ok(())
    }
}

/// Two-tier cache: L1 in-memory (moka), L2 Redis shared across instances.
pub struct TieredCache {
    // ConnectionManager lives behind a Mutex for interior mutability
    redis: Arc<tokio::sync::Mutex<ConnectionManager>>,
    l1_cache: moka::future::Cache<String, Vec<u8>>,
    ttl_secs: u64,
}

impl TieredCache {
    pub async fn new(redis_url: &str, l1_size: u64, ttl_secs: u64) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        let redis = redis::aio::ConnectionManager::new(client).await?;

        let l1_cache = moka::future::CacheBuilder::new(l1_size)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Ok(Self {
            redis: Arc::new(tokio::sync::Mutex::new(redis)),
            l1_cache,
            ttl_secs,
        })
    }
}

#[async_trait]
impl MatchCache for TieredCache {
    async fn get_cached(
        &self,
        document_id: &str,
    ) -> Result<Option<Vec<MatchResult>>, CacheError> {
        let key = CacheKey::matches(document_id);

        // Try L1 first
        if let Some(bytes) = self.l1_cache.get(&key).await {
            tracing::trace!("L1 cache hit: {}", key);
            return Ok(Some(serde_json::from_slice(&bytes)?));
        }

        // Then L2 (Redis)
        let mut conn = self.redis.lock().await;
        let value: Option<String> = redis::cmd("GET")
            .arg(&key)
            .query_async(&mut *conn)
            .await?;
        drop(conn);

        if let Some(json) = value {
            tracing::trace!("L2 cache hit: {}", key);

            // Populate L1
            self.l1_cache
                .insert(key, json.as_bytes().to_vec())
                .await;

            return Ok(Some(serde_json::from_str(&json)?));
        }

        tracing::trace!("Cache miss: {}", key);
        Ok(None)
    }

    async fn set_cached(
        &self,
        document_id: &str,
        results: &[MatchResult],
    ) -> Result<(), CacheError> {
        let key = CacheKey::matches(document_id);
        let json = serde_json::to_string(results)?;

        self.l1_cache
            .insert(key.clone(), json.as_bytes().to_vec())
            .await;

        let mut conn = self.redis.lock().await;
        redis::cmd("SETEX")
            .arg(&key)
            .arg(self.ttl_secs)
            .arg(json)
            .query_async::<()>(&mut *conn)
            .await?;
        drop(conn);

        tracing::trace!("Cache set: {}", key);
        Ok(())
    }

    async fn invalidate_document(&self, document_id: &str) -> Result<(), CacheError> {
        let key = CacheKey::matches(document_id);
        self.l1_cache.invalidate(&key).await;
        let mut conn = self.redis.lock().await;
        redis::cmd("DEL")
            .arg(&key)
            .query_async::<()>(&mut *conn)
            .await?;
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), CacheError> {
        // L1 has no pattern scan; drop everything
        self.l1_cache.invalidate_all();

        let mut conn = self.redis.lock().await;
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(CacheKey::all_matches())
            .query_async(&mut *conn)
            .await?;

        if !keys.is_empty() {
            redis::cmd("DEL")
                .arg(keys)
                .query_async::<()>(&mut *conn)
                .await?;
        }

        tracing::debug!("Cleared all cached match entries");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConfidenceTier, FactorScores, MatchStatus};

    fn result(source: &str, target: &str, confidence: f64) -> MatchResult {
        MatchResult {
            match_id: uuid::Uuid::new_v4().to_string(),
            source_document_id: source.to_string(),
            target_document_id: target.to_string(),
            confidence,
            tier: ConfidenceTier::from_confidence(confidence),
            factors: FactorScores::default(),
            explanation: String::new(),
            status: MatchStatus::Pending,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_cache_key_builder() {
        assert_eq!(CacheKey::matches("doc123"), "matches:doc123");
        assert_eq!(CacheKey::all_matches(), "matches:*");
    }

    #[tokio::test]
    async fn test_memory_cache_roundtrip() {
        let cache = MemoryCache::new(100, 60);
        assert!(cache.get_cached("d1").await.unwrap().is_none());

        let results = vec![result("d1", "d2", 0.8), result("d1", "d3", 0.6)];
        cache.set_cached("d1", &results).await.unwrap();

        let cached = cache.get_cached("d1").await.unwrap().unwrap();
        assert_eq!(cached.len(), 2);
        assert_eq!(cached[0].target_document_id, "d2");
    }

    #[tokio::test]
    async fn test_memory_cache_invalidation() {
        let cache = MemoryCache::new(100, 60);
        cache
            .set_cached("d1", &[result("d1", "d2", 0.8)])
            .await
            .unwrap();
        cache
            .set_cached("d9", &[result("d9", "d2", 0.7)])
            .await
            .unwrap();

        cache.invalidate_document("d1").await.unwrap();
        assert!(cache.get_cached("d1").await.unwrap().is_none());
        assert!(cache.get_cached("d9").await.unwrap().is_some());

        cache.clear_all().await.unwrap();
        // moka applies invalidate_all on next read
        assert!(cache.get_cached("d9").await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "Requires Redis"]
    async fn test_tiered_cache_roundtrip() {
        let cache = TieredCache::new("redis://127.0.0.1:6379", 1000, 60)
            .await
            .expect("Failed to create cache");

        let results = vec![result("d1", "d2", 0.8)];
        cache.set_cached("d1", &results).await.unwrap();
        let cached = cache.get_cached("d1").await.unwrap().unwrap();
        assert_eq!(cached.len(), 1);

        cache.invalidate_document("d1").await.unwrap();
        assert!(cache.get_cached("d1").await.unwrap().is_none());
    }
}
