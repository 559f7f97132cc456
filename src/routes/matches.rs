use actix_web::{web, HttpResponse, Responder};
use std::sync::Arc;
use validator::Validate;

use crate::core::{MatchError, MatchService};
use crate::models::{
    BatchMatchRequest, BatchOptions, ErrorResponse, FindMatchesRequest, FindMatchesResponse,
    HealthResponse, MatchOptions, UpdateWeightsRequest, UserFeedback, ValidateMatchRequest,
    ValidateMatchResponse, WeightsResponse,
};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<MatchService>,
}

/// Configure all match-related routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/matches/find", web::post().to(find_matches))
        .route("/matches/batch", web::post().to(batch_match))
        .route("/matches/{match_id}", web::get().to(get_match))
        .route("/matches/{match_id}/validate", web::post().to(validate_match))
        .route("/weights", web::get().to(get_weights))
        .route("/weights", web::put().to(update_weights))
        .route("/statistics", web::get().to(get_statistics));
}

fn error_response(error: &MatchError) -> HttpResponse {
    let (status_code, name) = match error {
        MatchError::NotFound(_) => (404u16, "not_found"),
        MatchError::InvalidWeights(_) => (400, "invalid_weights"),
        MatchError::AlreadyReviewed(_) => (409, "already_reviewed"),
        MatchError::Persistence(_) => (500, "persistence_error"),
    };
    let body = ErrorResponse {
        error: name.to_string(),
        message: error.to_string(),
        status_code,
    };
    match status_code {
        404 => HttpResponse::NotFound().json(body),
        400 => HttpResponse::BadRequest().json(body),
        409 => HttpResponse::Conflict().json(body),
        _ => HttpResponse::InternalServerError().json(body),
    }
}

/// Health check endpoint
async fn health_check(state: web::Data<AppState>) -> impl Responder {
    // The statistics query doubles as a store connectivity probe
    let store_healthy = state.service.get_statistics().await.is_ok();
    let status = if store_healthy { "healthy" } else { "degraded" };

    HttpResponse::Ok().json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
    })
}

/// Find matches endpoint
///
/// POST /api/v1/matches/find
async fn find_matches(
    state: web::Data<AppState>,
    req: web::Json<FindMatchesRequest>,
) -> impl Responder {
    if let Err(errors) = req.validate() {
        tracing::info!("Validation failed for find_matches request: {:?}", errors);
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Validation failed".to_string(),
            message: errors.to_string(),
            status_code: 400,
        });
    }

    let defaults = MatchOptions::default();
    let options = MatchOptions {
        min_confidence: req.min_confidence.unwrap_or(defaults.min_confidence),
        max_results: req.max_results.unwrap_or(defaults.max_results).min(100),
        algorithms: req.algorithms.clone().unwrap_or(defaults.algorithms),
        use_cache: req.use_cache.unwrap_or(defaults.use_cache),
        filters: req.filters.clone().unwrap_or_default(),
    };

    tracing::info!("Finding matches for document: {}", req.document_id);

    match state.service.find_matches(&req.document_id, &options).await {
        Ok(matches) => {
            let total_results = matches.len();
            HttpResponse::Ok().json(FindMatchesResponse {
                matches,
                total_results,
            })
        }
        Err(e) => {
            tracing::error!("find_matches failed for {}: {}", req.document_id, e);
            error_response(&e)
        }
    }
}

/// Batch match endpoint
///
/// POST /api/v1/matches/batch
async fn batch_match(
    state: web::Data<AppState>,
    req: web::Json<BatchMatchRequest>,
) -> impl Responder {
    if let Err(errors) = req.validate() {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Validation failed".to_string(),
            message: errors.to_string(),
            status_code: 400,
        });
    }

    let defaults = BatchOptions::default();
    let mut options = BatchOptions {
        batch_size: req.batch_size.unwrap_or(defaults.batch_size),
        concurrency: req.concurrency.unwrap_or(defaults.concurrency),
        match_options: defaults.match_options,
    };
    if let Some(min_confidence) = req.min_confidence {
        options.match_options.min_confidence = min_confidence;
    }
    if let Some(max_results) = req.max_results {
        options.match_options.max_results = max_results.min(100);
    }
    if let Some(use_cache) = req.use_cache {
        options.match_options.use_cache = use_cache;
    }

    tracing::info!(
        "Batch matching {} documents (concurrency: {})",
        req.document_ids.len(),
        options.concurrency
    );

    let result = state
        .service
        .batch_match(&req.document_ids, &options, None)
        .await;

    HttpResponse::Ok().json(result)
}

/// Fetch a stored match
///
/// GET /api/v1/matches/{match_id}
async fn get_match(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let match_id = path.into_inner();
    match state.service.get_match(&match_id).await {
        Ok(result) => HttpResponse::Ok().json(result),
        Err(e) => error_response(&e),
    }
}

/// Record feedback against a match
///
/// POST /api/v1/matches/{match_id}/validate
async fn validate_match(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<ValidateMatchRequest>,
) -> impl Responder {
    let match_id = path.into_inner();
    let feedback = UserFeedback {
        match_id: match_id.clone(),
        accepted: req.accepted,
        reason: req.reason.clone(),
    };

    match state.service.validate_match(&match_id, feedback).await {
        Ok(()) => HttpResponse::Ok().json(ValidateMatchResponse {
            success: true,
            match_id,
        }),
        Err(e) => {
            tracing::error!("validate_match failed for {}: {}", match_id, e);
            error_response(&e)
        }
    }
}

/// Currently active weights
///
/// GET /api/v1/weights?documentType={type}
async fn get_weights(
    state: web::Data<AppState>,
    query: web::Query<std::collections::HashMap<String, String>>,
) -> impl Responder {
    let doc_type = query.get("documentType").map(String::as_str);
    let weights = state.service.get_weights(doc_type).await;
    HttpResponse::Ok().json(WeightsResponse { weights })
}

/// Replace the active weight set
///
/// PUT /api/v1/weights
async fn update_weights(
    state: web::Data<AppState>,
    req: web::Json<UpdateWeightsRequest>,
) -> impl Responder {
    let weights = req.into_inner().into_weight_set();
    match state.service.update_weights(weights).await {
        Ok(()) => HttpResponse::Ok().json(WeightsResponse { weights }),
        Err(e) => {
            tracing::info!("Weight update rejected: {}", e);
            error_response(&e)
        }
    }
}

/// Aggregated match statistics
///
/// GET /api/v1/statistics
async fn get_statistics(state: web::Data<AppState>) -> impl Responder {
    match state.service.get_statistics().await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => {
            tracing::error!("Failed to compute statistics: {}", e);
            error_response(&e)
        }
    }
}
