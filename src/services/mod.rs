// Service exports
pub mod cache;
pub mod embedding;
pub mod postgres;
pub mod store;

pub use cache::{CacheError, CacheKey, MatchCache, MemoryCache, TieredCache};
pub use embedding::{EmbeddingClient, EmbeddingError};
pub use postgres::PostgresStore;
pub use store::{DocumentStore, InMemoryStore, MatchStore, StoreError};
