#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, Response, StatusCode},
};
use cache_aside::cache::{
    CacheBackend, CacheConfig, CacheState, CacheStore, MemoryBackend, ScanPage, StoreError,
    X_CACHE,
};
use cache_aside::domain::catalog::Catalog;
use http_body_util::BodyExt;
use cache_aside::infra::http::{self, AppState, CALLER_ID_HEADER, CALLER_ROLES_HEADER};
use serde_json::Value;
use tower::ServiceExt;

pub const NAMESPACE: &str = "ns";

pub struct TestApp {
    pub router: Router,
    pub store: Arc<CacheStore>,
    pub backend: Arc<MemoryBackend>,
    pub catalog: Arc<Catalog>,
    pub cache: CacheState,
}

pub fn config() -> CacheConfig {
    CacheConfig {
        namespace: NAMESPACE.to_string(),
        operation_timeout: Duration::from_millis(200),
        ..CacheConfig::default()
    }
}

pub fn app() -> TestApp {
    app_with(config())
}

pub fn app_with(config: CacheConfig) -> TestApp {
    let backend = Arc::new(MemoryBackend::new());
    let store = Arc::new(CacheStore::with_backend(&config, backend.clone()));
    build(config, store, backend)
}

/// App whose store fails every call.
pub fn broken_app() -> TestApp {
    let config = config();
    let store = Arc::new(CacheStore::with_backend(&config, Arc::new(FailingBackend)));
    build(config, store, Arc::new(MemoryBackend::new()))
}

fn build(config: CacheConfig, store: Arc<CacheStore>, backend: Arc<MemoryBackend>) -> TestApp {
    let catalog = Arc::new(Catalog::seeded());
    let cache = CacheState::new(config, store.clone());
    let router = http::build_router(AppState::new(cache.clone(), catalog.clone()));
    TestApp {
        router,
        store,
        backend,
        catalog,
        cache,
    }
}

pub struct Caller<'a> {
    pub id: &'a str,
    pub roles: &'a str,
}

pub const ADMIN: Caller<'static> = Caller {
    id: "ops",
    roles: "admin",
};

pub async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    caller: Option<&Caller<'_>>,
    body: Option<Value>,
) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(caller) = caller {
        builder = builder
            .header(CALLER_ID_HEADER, caller.id)
            .header(CALLER_ROLES_HEADER, caller.roles);
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request should build");

    router
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond")
}

pub fn cache_header(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get(X_CACHE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("body should collect")
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).expect("body should be JSON")
}

/// Wait for the spawned write-back of `key` to land.
pub async fn wait_for_key(store: &CacheStore, key: &str) {
    for _ in 0..200 {
        if store.exists(key).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("key `{key}` was never written");
}

pub fn assert_status(response: &Response<Body>, status: StatusCode) {
    assert_eq!(response.status(), status, "unexpected status");
}

/// Backend that rejects every command.
pub struct FailingBackend;

fn down(op: &'static str) -> StoreError {
    StoreError::rejected(op, "connection refused")
}

#[async_trait]
impl CacheBackend for FailingBackend {
    fn kind(&self) -> &'static str {
        "failing"
    }

    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Err(down("get"))
    }

    async fn set_ex(&self, _key: &str, _value: &[u8], _ttl: u64) -> Result<(), StoreError> {
        Err(down("setex"))
    }

    async fn del(&self, _keys: &[String]) -> Result<u64, StoreError> {
        Err(down("del"))
    }

    async fn scan(&self, _cursor: u64, _pattern: &str, _count: usize) -> Result<ScanPage, StoreError> {
        Err(down("scan"))
    }

    async fn exists(&self, _key: &str) -> Result<bool, StoreError> {
        Err(down("exists"))
    }

    async fn ttl(&self, _key: &str) -> Result<i64, StoreError> {
        Err(down("ttl"))
    }

    async fn info(&self, _section: &str) -> Result<String, StoreError> {
        Err(down("info"))
    }

    async fn dbsize(&self) -> Result<u64, StoreError> {
        Err(down("dbsize"))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Err(down("ping"))
    }
}
