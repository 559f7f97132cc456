use actix_cors::Cors;
use actix_web::{error, http::StatusCode, middleware, web, App, HttpResponse, HttpServer};
use std::sync::Arc;
use tracing::{error, info, warn};

use docmatch::config::Settings;
use docmatch::core::{default_engines, ConfidenceScorer, MatchService};
use docmatch::models::{ConfidenceWeights, WeightSet};
use docmatch::routes::matches::AppState;
use docmatch::services::{EmbeddingClient, MatchCache, MemoryCache, PostgresStore, TieredCache};

/// JSON error response for JSON payload errors
#[derive(Debug, serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}

impl std::fmt::Display for JsonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error, self.message)
    }
}

impl std::error::Error for JsonError {}

impl error::ResponseError for JsonError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::BAD_REQUEST),
        )
        .content_type("application/json")
        .body(serde_json::to_string(self).unwrap())
    }
}

/// Handle JSON payload errors
pub fn handle_json_payload_error(
    err: error::JsonPayloadError,
    req: &actix_web::HttpRequest,
) -> actix_web::Error {
    tracing::info!("JSON payload error on {}: {}", req.path(), err);
    JsonError {
        error: "invalid_json".to_string(),
        message: format!("Invalid JSON: {}", err),
        status_code: 400,
    }
    .into()
}

/// Handle query payload errors
pub fn handle_query_payload_error(
    err: error::QueryPayloadError,
    _req: &actix_web::HttpRequest,
) -> actix_web::Error {
    JsonError {
        error: "invalid_query".to_string(),
        message: format!("Invalid query: {}", err),
        status_code: 400,
    }
    .into()
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenv::dotenv().ok();

    // Load configuration before logging so the subscriber can use it
    let settings = Settings::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {}", e);
        panic!("Configuration error: {}", e);
    });

    // Initialize logging; RUST_LOG overrides the configured level
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.logging.level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true);

    if settings.logging.format == "pretty" {
        subscriber.pretty().init();
    } else {
        subscriber.init();
    }

    info!("Starting docmatch matching service...");
    info!("Configuration loaded successfully");

    // Initialize cache: two-tier when Redis is reachable, in-memory otherwise
    let cache_ttl = settings.cache.ttl_secs.unwrap_or(300);
    let l1_cache_size = settings.cache.l1_cache_size.unwrap_or(1000);

    let cache: Arc<dyn MatchCache> =
        match TieredCache::new(&settings.cache.redis_url, l1_cache_size, cache_ttl).await {
            Ok(tiered) => {
                info!(
                    "Tiered cache initialized (L1: {} entries, TTL: {}s)",
                    l1_cache_size, cache_ttl
                );
                Arc::new(tiered)
            }
            Err(e) => {
                warn!(
                    "Failed to connect to Redis ({}), falling back to in-memory cache",
                    e
                );
                Arc::new(MemoryCache::new(l1_cache_size, cache_ttl))
            }
        };

    // Initialize PostgreSQL store
    let store = Arc::new(
        PostgresStore::from_settings(
            &settings.database.url,
            settings.database.max_connections,
            settings.database.min_connections,
        )
        .await
        .unwrap_or_else(|e| {
            error!("Failed to connect to PostgreSQL: {}", e);
            panic!("PostgreSQL connection error: {}", e);
        }),
    );

    info!("PostgreSQL store initialized");

    // Similarity engines; semantic falls back to stored embeddings when no
    // embedding service is configured
    let embeddings = settings
        .embedding
        .endpoint
        .as_ref()
        .map(|endpoint| EmbeddingClient::new(endpoint.clone(), settings.embedding.api_key.clone()));
    if embeddings.is_some() {
        info!("Embedding service configured for semantic matching");
    }
    let engines = default_engines(embeddings);

    // Confidence scorer with configured weights
    let weights = ConfidenceWeights {
        base: WeightSet {
            fuzzy: settings.scoring.weights.fuzzy,
            semantic: settings.scoring.weights.semantic,
            date: settings.scoring.weights.date,
            amount: settings.scoring.weights.amount,
        },
        ..Default::default()
    };
    let scorer = Arc::new(ConfidenceScorer::new(
        weights,
        settings.scoring.learning_rate,
    ));

    info!("Scorer initialized with weights: {:?}", scorer.get_weights(None).await);

    let service = MatchService::new(store.clone(), store.clone(), cache, engines, scorer);

    let app_state = AppState { service };

    // Configure HTTP server
    let host = settings.server.host.clone();
    let port = settings.server.port;
    let workers = settings.server.workers.unwrap_or(4);

    info!("Starting HTTP server on {}:{}", host, port);

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::JsonConfig::default().error_handler(handle_json_payload_error))
            .app_data(web::QueryConfig::default().error_handler(handle_query_payload_error))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .configure(docmatch::routes::configure_routes)
    })
    .workers(workers)
    .bind((host, port))?
    .run()
    .await
}
