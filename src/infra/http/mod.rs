mod admin;
mod catalog;
pub mod error;
pub mod identity;
mod middleware;

use std::sync::Arc;

use axum::{Router, middleware::from_fn};

use crate::application::cache_admin::CacheAdminService;
use crate::cache::CacheState;
use crate::domain::catalog::Catalog;

pub use admin::ADMIN_ROLE;
pub use identity::{CALLER_ID_HEADER, CALLER_ROLES_HEADER};
pub use middleware::RequestContext;

/// State shared by every route.
#[derive(Clone)]
pub struct AppState {
    pub cache: CacheState,
    pub admin: CacheAdminService,
    pub catalog: Arc<Catalog>,
}

impl AppState {
    pub fn new(cache: CacheState, catalog: Arc<Catalog>) -> Self {
        let admin = CacheAdminService::new(cache.store.clone());
        Self {
            cache,
            admin,
            catalog,
        }
    }
}

/// Catalog API plus the cache admin surface under `/admin/cache`.
///
/// Caller identity is resolved from the trusted proxy headers before any route runs.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(catalog::build_catalog_router(&state))
        .nest("/admin/cache", admin::build_admin_router())
        .layer(from_fn(middleware::log_responses))
        .layer(from_fn(identity::resolve_caller))
        .layer(from_fn(middleware::set_request_context))
        .with_state(state)
}
