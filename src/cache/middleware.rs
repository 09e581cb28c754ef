//! Read-through and invalidation middleware.
//!
//! Both are plain `axum::middleware::from_fn_with_state` functions. The state carries the route's
//! policy, so each route is wrapped with its own [`ReadThrough`] or [`Invalidation`] value:
//!
//! ```ignore
//! get(list_products).layer(from_fn_with_state(
//!     cache.read_through(ReadThroughPolicy::new("products")),
//!     read_through_layer,
//! ))
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, HttpBody},
    extract::{FromRequestParts, RawPathParams, State},
    http::{HeaderValue, Request, StatusCode, header::CONTENT_TYPE, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::{Value, value::RawValue};
use tracing::{Instrument, debug, debug_span, instrument, warn};

use super::{CacheConfig, CacheStore, InvalidationPolicy, KeyBuilder, ReadThroughPolicy};
use crate::identity::CallerIdentity;

/// Response header reporting the cache outcome of an eligible read.
pub const X_CACHE: &str = "x-cache";

/// Parameter carrying the caller id in user-scoped keys.
pub const USER_SCOPE_PARAM: &str = "userId";

const HIT: &str = "HIT";
const MISS: &str = "MISS";

/// Shared cache state; hands out per-route middleware state.
#[derive(Clone)]
pub struct CacheState {
    pub config: Arc<CacheConfig>,
    pub store: Arc<CacheStore>,
}

impl CacheState {
    pub fn new(config: CacheConfig, store: Arc<CacheStore>) -> Self {
        Self {
            config: Arc::new(config),
            store,
        }
    }

    pub fn read_through(&self, policy: ReadThroughPolicy) -> ReadThrough {
        ReadThrough {
            cache: self.clone(),
            policy: Arc::new(policy),
        }
    }

    pub fn invalidation(&self, policy: InvalidationPolicy) -> Invalidation {
        Invalidation {
            cache: self.clone(),
            policy: Arc::new(policy),
        }
    }
}

/// State of [`read_through_layer`] for one route.
#[derive(Clone)]
pub struct ReadThrough {
    cache: CacheState,
    policy: Arc<ReadThroughPolicy>,
}

/// State of [`invalidation_layer`] for one route.
#[derive(Clone)]
pub struct Invalidation {
    cache: CacheState,
    policy: Arc<InvalidationPolicy>,
}

/// Stored form of a cached response. `body` keeps the handler's JSON text byte for byte.
#[derive(Debug, Deserialize)]
struct CachedPayload {
    status: u16,
    #[serde(default)]
    content_type: Option<String>,
    body: Box<RawValue>,
}

#[derive(Serialize)]
struct CachedPayloadRef<'a> {
    status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<&'a str>,
    body: &'a RawValue,
}

/// Serve eligible reads from the cache and write fresh 2xx responses back.
///
/// Only `GET` and `HEAD` are considered. Every considered response carries `X-Cache`. Write-back
/// runs on a spawned task; the response never waits for the store.
#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn read_through_layer(
    State(route): State<ReadThrough>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ReadThrough { cache, policy } = route;

    if !cache.config.enabled || !is_cacheable_method(&request) {
        return next.run(request).await;
    }

    let (mut parts, body) = request.into_parts();
    let key = request_key(cache.store.keys(), &policy, &mut parts).await;
    let request = Request::from_parts(parts, body);

    let Some(key) = key else {
        debug!(outcome = "bypass", "user-scoped read without caller identity");
        counter!("cache_aside_miss_total").increment(1);
        return mark(next.run(request).await, MISS);
    };

    if let Some(stored) = cache.store.get(&key).await {
        match serde_json::from_slice::<CachedPayload>(&stored) {
            Ok(payload) => {
                debug!(key = %key, outcome = "hit", "serving cached response");
                counter!("cache_aside_hit_total").increment(1);
                return mark(cached_response(payload), HIT);
            }
            Err(error) => {
                warn!(key = %key, error = %error, "discarding undecodable cache entry");
            }
        }
    }

    debug!(key = %key, outcome = "miss", "cache miss, executing handler");
    counter!("cache_aside_miss_total").increment(1);

    let response = next.run(request).await;
    if !response.status().is_success() {
        return mark(response, MISS);
    }

    let within_limit = response
        .body()
        .size_hint()
        .upper()
        .is_some_and(|upper| upper <= cache.config.max_body_bytes as u64);
    if !within_limit {
        debug!(key = %key, "response body too large or unbounded, not caching");
        return mark(response, MISS);
    }

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, cache.config.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(error) => {
            warn!(key = %key, error = %error, "failed to collect response body");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let ttl = cache.config.ttl_for(&policy);
    spawn_write_back(
        cache.store.clone(),
        key,
        parts.status,
        content_type,
        bytes.clone(),
        ttl,
    );

    mark(Response::from_parts(parts, Body::from(bytes)), MISS)
}

/// Purge the route's patterns after a successful mutation, before the response is released.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn invalidation_layer(
    State(route): State<Invalidation>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Invalidation { cache, policy } = route;

    if !cache.config.enabled || request.method().is_safe() {
        return next.run(request).await;
    }

    let response = next.run(request).await;
    if !response.status().is_success() {
        return response;
    }

    let mut removed = 0;
    for pattern in &policy.patterns {
        removed += cache.store.delete_pattern(pattern).await;
    }
    debug!(
        patterns = policy.patterns.len(),
        removed, "invalidated cache after mutation"
    );
    response
}

fn is_cacheable_method(request: &Request<Body>) -> bool {
    matches!(request.method().as_str(), "GET" | "HEAD")
}

/// Derive the cache key from path params, query params and, on user-scoped routes, the caller.
///
/// Returns `None` when a user-scoped route has no resolved caller.
async fn request_key(
    keys: &KeyBuilder,
    policy: &ReadThroughPolicy,
    parts: &mut Parts,
) -> Option<String> {
    let mut params: Vec<(String, Value)> = RawPathParams::from_request_parts(parts, &())
        .await
        .map(|path| {
            path.iter()
                .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
                .collect()
        })
        .unwrap_or_default();

    if let Some(query) = parts.uri.query() {
        params.extend(
            url::form_urlencoded::parse(query.as_bytes())
                .filter(|(_, value)| !value.is_empty())
                .map(|(name, value)| (name.into_owned(), Value::String(value.into_owned()))),
        );
    }

    if policy.user_scoped {
        let caller = parts.extensions.get::<CallerIdentity>()?;
        params.retain(|(name, _)| name != USER_SCOPE_PARAM);
        params.push((USER_SCOPE_PARAM.to_string(), Value::String(caller.id.clone())));
    }

    Some(keys.build(&policy.resource, params))
}

fn encode_payload(
    status: StatusCode,
    content_type: Option<&str>,
    body: &[u8],
) -> Result<Vec<u8>, serde_json::Error> {
    let body: &RawValue = serde_json::from_slice(body)?;
    serde_json::to_vec(&CachedPayloadRef {
        status: status.as_u16(),
        content_type,
        body,
    })
}

fn spawn_write_back(
    store: Arc<CacheStore>,
    key: String,
    status: StatusCode,
    content_type: Option<String>,
    body: Bytes,
    ttl: Duration,
) {
    let span = debug_span!("cache_write_back", key = %key);
    tokio::spawn(
        async move {
            match encode_payload(status, content_type.as_deref(), &body) {
                Ok(payload) => {
                    if store.set(&key, &payload, ttl).await {
                        debug!(ttl_secs = ttl.as_secs(), "cached response");
                    }
                }
                Err(error) => {
                    counter!("cache_aside_write_failed_total").increment(1);
                    warn!(error = %error, "response body is not JSON, not caching");
                }
            }
        }
        .instrument(span),
    );
}

fn cached_response(payload: CachedPayload) -> Response {
    let status = StatusCode::from_u16(payload.status).unwrap_or(StatusCode::OK);
    let content_type = payload
        .content_type
        .as_deref()
        .and_then(|value| HeaderValue::from_str(value).ok())
        .unwrap_or(HeaderValue::from_static("application/json"));

    let mut response = Response::new(Body::from(payload.body.get().to_owned()));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, content_type);
    response
}

fn mark(mut response: Response, outcome: &'static str) -> Response {
    response
        .headers_mut()
        .insert(X_CACHE, HeaderValue::from_static(outcome));
    response
}
