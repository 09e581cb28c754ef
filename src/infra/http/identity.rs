//! Caller identity plumbing for deployments behind an authenticating proxy.

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::identity::CallerIdentity;

use super::error::ApiError;

pub const CALLER_ID_HEADER: &str = "x-caller-id";
pub const CALLER_ROLES_HEADER: &str = "x-caller-roles";

/// Insert a [`CallerIdentity`] built from the trusted proxy headers, if present.
///
/// An identity already placed by an outer layer wins.
pub async fn resolve_caller(mut request: Request<Body>, next: Next) -> Response {
    if request.extensions().get::<CallerIdentity>().is_none()
        && let Some(caller) = caller_from_headers(request.headers())
    {
        request.extensions_mut().insert(caller);
    }
    next.run(request).await
}

/// Reject callers that do not carry `role`.
pub async fn require_role(
    State(role): State<&'static str>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match request.extensions().get::<CallerIdentity>() {
        Some(caller) if caller.has_role(role) => next.run(request).await,
        Some(caller) => {
            debug!(caller = %caller.id, role, "caller lacks role");
            ApiError::forbidden(role).into_response()
        }
        None => ApiError::forbidden(role).into_response(),
    }
}

fn caller_from_headers(headers: &HeaderMap) -> Option<CallerIdentity> {
    let id = headers
        .get(CALLER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())?;

    let roles = headers
        .get(CALLER_ROLES_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|roles| {
            roles
                .split(',')
                .map(str::trim)
                .filter(|role| !role.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    Some(CallerIdentity::new(id, roles))
}
