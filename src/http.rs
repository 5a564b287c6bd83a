//! Thin HTTP wrapper over the search core.

use crate::core::types::{
    BatchSearchRequest, Characteristics, ErrorResponse, Query, SearchRequest, SearchResult,
};
use crate::tools::batch_search::{prepare_queries, search_batch};
use crate::AppState;
use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Upper bound for client-requested batch concurrency.
const MAX_BATCH_CONCURRENCY: usize = 16;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(msg: impl Into<String>) -> ApiError {
    let error = msg.into();
    warn!("rejected request: {}", error);
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { error }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/search", post(search_handler))
        .route("/search/batch", post(batch_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "market-scout",
        "version": env!("CARGO_PKG_VERSION"),
        "sources": state.source_count,
    }))
}

async fn search_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResult>, ApiError> {
    let characteristics =
        Characteristics::from_map(&request.characteristics).map_err(|e| bad_request(e.to_string()))?;
    let query = Query::new(request.query, characteristics).map_err(|e| bad_request(e.to_string()))?;
    Ok(Json(state.search.search(&query).await))
}

/// Streams one JSON line per finished query (`application/x-ndjson`).
async fn batch_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BatchSearchRequest>,
) -> Result<Response, ApiError> {
    let characteristics =
        Characteristics::from_map(&request.characteristics).map_err(|e| bad_request(e.to_string()))?;
    let queries =
        prepare_queries(&request.queries, &characteristics).map_err(|e| bad_request(e.to_string()))?;
    let concurrency = request
        .max_concurrent
        .unwrap_or(state.config.batch_concurrency)
        .clamp(1, MAX_BATCH_CONCURRENCY);
    info!(
        "Batch request: {} unique queries (concurrency: {})",
        queries.len(),
        concurrency
    );

    let lines = search_batch(Arc::clone(&state.search), queries, concurrency).map(|item| {
        let mut line = serde_json::to_string(&item).unwrap_or_else(|e| {
            error!("batch item serialization failed: {}", e);
            serde_json::json!({ "batchId": item.batch_id, "error": e.to_string() }).to_string()
        });
        line.push('\n');
        Ok::<_, Infallible>(line)
    });

    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response())
}
