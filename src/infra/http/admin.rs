//! `/admin/cache/*` surface.

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::Deserialize;

use super::AppState;
use super::error::ApiError;
use super::identity::require_role;

pub const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Deserialize)]
pub(super) struct InvalidateRequest {
    #[serde(default)]
    patterns: Vec<String>,
}

pub(super) fn build_admin_router() -> Router<AppState> {
    Router::new()
        .route("/stats", get(cache_stats))
        .route("/health", get(cache_health))
        .route("/flush", delete(flush_cache))
        .route("/invalidate", post(invalidate_cache))
        .route_layer(from_fn_with_state(ADMIN_ROLE, require_role))
}

async fn cache_stats(State(state): State<AppState>) -> Response {
    Json(state.admin.stats().await).into_response()
}

async fn cache_health(State(state): State<AppState>) -> Response {
    Json(state.admin.health().await).into_response()
}

async fn flush_cache(State(state): State<AppState>) -> Response {
    Json(state.admin.flush().await).into_response()
}

async fn invalidate_cache(
    State(state): State<AppState>,
    body: Result<Json<InvalidateRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = body.map_err(|rejection| {
        ApiError::bad_request("Invalid request body", Some(rejection.body_text()))
    })?;
    let deleted = state.admin.invalidate(&request.patterns).await?;
    Ok(Json(deleted).into_response())
}
