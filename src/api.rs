use std::sync::Arc;

use serde_json::json;
use shuttle_axum::axum::{
    extract::{Path, Query, State},
    http::{header::HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::aggregate::{AggregateError, AggregateQuery, Aggregator};

pub const CACHE_HEADER: &str = "x-aggregator-cache";

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
}

impl AppState {
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        Self { aggregator }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/feeds", get(list_feeds))
        .route("/api/feeds/{feed}", get(get_feed))
        .route("/debug/limits/{key}", get(debug_limits))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(serde::Serialize)]
struct FeedInfo {
    name: String,
    sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sponsored: Option<String>,
}

async fn list_feeds(State(state): State<AppState>) -> Json<Vec<FeedInfo>> {
    let out = state
        .aggregator
        .feeds()
        .iter()
        .map(|f| FeedInfo {
            name: f.name().to_string(),
            sources: f.source_names(),
            sponsored: f.sponsored_name().map(str::to_string),
        })
        .collect();
    Json(out)
}

async fn get_feed(
    State(state): State<AppState>,
    Path(feed): Path<String>,
    Query(q): Query<AggregateQuery>,
) -> Response {
    match state.aggregator.aggregate(&feed, &q).await {
        Ok(result) => {
            let header = HeaderValue::from_static(result.cache_status.header_value());
            (
                [(HeaderName::from_static(CACHE_HEADER), header)],
                Json(result),
            )
                .into_response()
        }
        Err(AggregateError::UnknownFeed(name)) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "unknown feed", "feed": name })),
        )
            .into_response(),
    }
}

async fn debug_limits(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    match state.aggregator.limiter().snapshot(&key) {
        Some(snap) => Json(snap).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no bucket", "key": key })),
        )
            .into_response(),
    }
}
