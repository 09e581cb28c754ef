//! Fail-open client over the backing key-value store.
//!
//! Every operation degrades to its neutral value (`None`, `false`, `0`, [`KeyTtl::Missing`],
//! unavailable stats) when the store is disconnected, errors or exceeds the operation timeout.
//! Failures are logged and counted here and never reach callers.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use metrics::{counter, histogram};
use tracing::{debug, info, warn};

use super::backend::{CacheBackend, KeyTtl, StoreError};
use super::config::CacheConfig;
use super::keys::KeyBuilder;
use super::lock::{rw_read, rw_write};
use super::memory::MemoryBackend;
use super::redis_backend::RedisBackend;
use super::stats::CacheStats;

const SOURCE: &str = "cache::store";

/// Shared cache store handle.
pub struct CacheStore {
    backend: RwLock<Option<Arc<dyn CacheBackend>>>,
    keys: KeyBuilder,
    available: AtomicBool,
    operation_timeout: Duration,
    scan_batch_size: NonZeroUsize,
}

impl CacheStore {
    /// A disconnected store. Every call fails open until a backend is attached.
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            backend: RwLock::new(None),
            keys: KeyBuilder::new(config.namespace.clone()),
            available: AtomicBool::new(false),
            operation_timeout: config.operation_timeout,
            scan_batch_size: config.scan_batch_size,
        }
    }

    pub fn with_backend(config: &CacheConfig, backend: Arc<dyn CacheBackend>) -> Self {
        let store = Self::new(config);
        store.attach(backend);
        store
    }

    /// Connect according to `config`.
    ///
    /// A disabled cache or an unreachable Redis leaves the store disconnected; startup continues.
    pub async fn connect(config: &CacheConfig) -> Self {
        let store = Self::new(config);
        if !config.enabled {
            info!(namespace = %config.namespace, "Cache disabled; store left disconnected");
            return store;
        }

        match config.url.as_deref() {
            Some(url) => match RedisBackend::connect(url, config.connect_timeout).await {
                Ok(backend) => {
                    store.attach(Arc::new(backend));
                    info!(namespace = %config.namespace, backend = "redis", "Cache store connected");
                }
                Err(error) => warn!(
                    namespace = %config.namespace,
                    error = %error,
                    "Cache store unreachable; serving without cache"
                ),
            },
            None => {
                store.attach(Arc::new(MemoryBackend::with_capacity(
                    config.memory_max_entries,
                )));
                info!(namespace = %config.namespace, backend = "memory", "Cache store connected");
            }
        }
        store
    }

    pub fn attach(&self, backend: Arc<dyn CacheBackend>) {
        *rw_write(&self.backend, SOURCE, "attach") = Some(backend);
        self.available.store(true, Ordering::Relaxed);
    }

    /// Drop the backend handle. Later calls fail open.
    pub fn close(&self) {
        if rw_write(&self.backend, SOURCE, "close").take().is_some() {
            info!(namespace = %self.keys.namespace(), "Cache store closed");
        }
        self.available.store(false, Ordering::Relaxed);
    }

    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    /// Outcome of the most recent store call, `false` while disconnected.
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
            && rw_read(&self.backend, SOURCE, "is_available").is_some()
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.run("get", key, |backend| async move { backend.get(key).await })
            .await
            .ok()
            .flatten()
    }

    /// Store `value` under `key` for `ttl` (at least one second). Returns whether it was written.
    pub async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> bool {
        let ttl_secs = ttl.as_secs().max(1);
        let written = self
            .run("set", key, |backend| async move {
                backend.set_ex(key, value, ttl_secs).await
            })
            .await
            .is_ok();

        if written {
            counter!("cache_aside_write_total").increment(1);
        } else {
            counter!("cache_aside_write_failed_total").increment(1);
        }
        written
    }

    pub async fn delete(&self, key: &str) -> u64 {
        let keys = &[key.to_string()];
        let removed = self
            .run("delete", key, |backend| async move { backend.del(keys).await })
            .await
            .unwrap_or(0);
        counter!("cache_aside_invalidated_keys_total").increment(removed);
        removed
    }

    /// Delete every key matching `pattern`, scoped under the namespace.
    ///
    /// Walks the keyspace with `SCAN` and issues one `DEL` per non-empty batch. A failure part way
    /// through stops the walk and returns what was deleted so far.
    pub async fn delete_pattern(&self, pattern: &str) -> u64 {
        let pattern = self.keys.pattern(pattern);
        self.delete_matching(&pattern).await
    }

    /// Delete every key in this store's namespace, leaving other namespaces alone.
    pub async fn flush_namespace(&self) -> u64 {
        let pattern = self.keys.namespace_pattern();
        self.delete_matching(&pattern).await
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.run("exists", key, |backend| async move { backend.exists(key).await })
            .await
            .unwrap_or(false)
    }

    pub async fn ttl(&self, key: &str) -> KeyTtl {
        self.run("ttl", key, |backend| async move { backend.ttl(key).await })
            .await
            .map_or(KeyTtl::Missing, KeyTtl::from_reply)
    }

    /// Memory, hit/miss and size figures. Reports `available: false` when nothing answered.
    pub async fn stats(&self) -> CacheStats {
        let Some(kind) = self.backend().map(|backend| backend.kind()) else {
            return CacheStats::unavailable();
        };

        let (memory, counters, size) = tokio::join!(
            self.run("info", "memory", |backend| async move {
                backend.info("memory").await
            }),
            self.run("info", "stats", |backend| async move {
                backend.info("stats").await
            }),
            self.run("dbsize", "", |backend| async move { backend.dbsize().await }),
        );

        CacheStats::from_replies(
            kind,
            memory.ok().as_deref(),
            counters.ok().as_deref(),
            size.ok(),
        )
    }

    pub async fn ping(&self) -> bool {
        self.run("ping", "", |backend| async move { backend.ping().await })
            .await
            .is_ok()
    }

    async fn delete_matching(&self, pattern: &str) -> u64 {
        let count = self.scan_batch_size.get();
        let mut cursor = 0;
        let mut removed = 0;
        let mut batches = 0_u32;

        loop {
            let page = match self
                .run("scan", pattern, |backend| async move {
                    backend.scan(cursor, pattern, count).await
                })
                .await
            {
                Ok(page) => page,
                Err(_) => break,
            };
            batches += 1;

            if !page.keys.is_empty() {
                let keys = &page.keys;
                match self
                    .run("delete_pattern", pattern, |backend| async move {
                        backend.del(keys).await
                    })
                    .await
                {
                    Ok(deleted) => removed += deleted,
                    Err(_) => break,
                }
            }

            if page.cursor == 0 {
                break;
            }
            cursor = page.cursor;
        }

        histogram!("cache_aside_scan_batches").record(f64::from(batches));
        counter!("cache_aside_invalidated_keys_total").increment(removed);
        debug!(pattern, removed, batches, "Deleted keys by pattern");
        removed
    }

    fn backend(&self) -> Option<Arc<dyn CacheBackend>> {
        rw_read(&self.backend, SOURCE, "backend").clone()
    }

    /// Run one backend command under the operation timeout and record its outcome.
    async fn run<T, F, Fut>(
        &self,
        op: &'static str,
        subject: &str,
        call: F,
    ) -> Result<T, StoreError>
    where
        F: FnOnce(Arc<dyn CacheBackend>) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let result = match self.backend() {
            Some(backend) => tokio::time::timeout(self.operation_timeout, call(backend))
                .await
                .unwrap_or(Err(StoreError::Timeout {
                    op,
                    after: self.operation_timeout,
                })),
            None => Err(StoreError::Disconnected),
        };

        match &result {
            Ok(_) => self.available.store(true, Ordering::Relaxed),
            Err(StoreError::Disconnected) => {
                self.available.store(false, Ordering::Relaxed);
                debug!(op, subject, "Cache store disconnected; failing open");
                counter!("cache_aside_store_error_total", "op" => op).increment(1);
            }
            Err(error) => {
                self.available.store(false, Ordering::Relaxed);
                warn!(op, subject, error = %error, "Cache store call failed; failing open");
                counter!("cache_aside_store_error_total", "op" => op).increment(1);
            }
        }
        result
    }
}
