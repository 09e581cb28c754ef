//! Cache configuration and per-route policies.
//!
//! Store-wide settings come from the `[cache]` table of `cache-aside.toml`; each wrapped route
//! supplies a [`ReadThroughPolicy`] or an [`InvalidationPolicy`] when the router is built.

use std::num::NonZeroUsize;
use std::time::Duration;

pub(crate) const DEFAULT_NAMESPACE: &str = "app";
pub(crate) const DEFAULT_TTL_SECS: u64 = 300;
pub(crate) const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 500;
pub(crate) const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2000;
pub(crate) const DEFAULT_SCAN_BATCH_SIZE: usize = 100;
pub(crate) const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
pub(crate) const DEFAULT_MEMORY_MAX_ENTRIES: usize = 10_000;

/// Store-wide cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Serve and populate the cache. When off, the middleware passes every request through.
    pub enabled: bool,
    /// Redis URL. Without one the in-process memory backend is used.
    pub url: Option<String>,
    /// Prefix of every key this service owns.
    pub namespace: String,
    /// TTL applied to routes that do not set their own.
    pub default_ttl: Duration,
    /// Upper bound for any single store command.
    pub operation_timeout: Duration,
    /// Upper bound for establishing the store connection at startup.
    pub connect_timeout: Duration,
    /// `COUNT` hint for each `SCAN` batch during pattern deletes.
    pub scan_batch_size: NonZeroUsize,
    /// Largest response body captured for write-back.
    pub max_body_bytes: usize,
    /// Capacity of the in-process backend; least recently used entries are evicted beyond it.
    pub memory_max_entries: NonZeroUsize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            default_ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            operation_timeout: Duration::from_millis(DEFAULT_OPERATION_TIMEOUT_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            scan_batch_size: NonZeroUsize::new(DEFAULT_SCAN_BATCH_SIZE)
                .unwrap_or(NonZeroUsize::MIN),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            memory_max_entries: NonZeroUsize::new(DEFAULT_MEMORY_MAX_ENTRIES)
                .unwrap_or(NonZeroUsize::MIN),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            url: settings.url.clone(),
            namespace: settings.namespace.clone(),
            default_ttl: settings.default_ttl,
            operation_timeout: settings.operation_timeout,
            connect_timeout: settings.connect_timeout,
            scan_batch_size: settings.scan_batch_size,
            max_body_bytes: settings.max_body_bytes.get(),
            memory_max_entries: settings.memory_max_entries,
        }
    }
}

impl CacheConfig {
    /// Effective TTL for a route, never below one second.
    pub fn ttl_for(&self, policy: &ReadThroughPolicy) -> Duration {
        policy
            .ttl
            .unwrap_or(self.default_ttl)
            .max(Duration::from_secs(1))
    }
}

/// Caching behaviour of one read route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadThroughPolicy {
    /// Resource segment of the key (`products` in `app:products:page=1`).
    pub resource: String,
    /// Entry lifetime; `None` uses [`CacheConfig::default_ttl`].
    pub ttl: Option<Duration>,
    /// Mix the caller's identity into the key so entries are never shared between callers.
    pub user_scoped: bool,
}

impl ReadThroughPolicy {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            ttl: None,
            user_scoped: false,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn user_scoped(mut self) -> Self {
        self.user_scoped = true;
        self
    }
}

/// Patterns purged after a successful write on one route, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationPolicy {
    pub patterns: Vec<String>,
}

impl InvalidationPolicy {
    pub fn new<I, P>(patterns: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(config.enabled);
        assert_eq!(config.url, None);
        assert_eq!(config.namespace, "app");
        assert_eq!(config.default_ttl, Duration::from_secs(300));
        assert_eq!(config.operation_timeout, Duration::from_millis(500));
        assert_eq!(config.connect_timeout, Duration::from_millis(2000));
        assert_eq!(config.scan_batch_size.get(), 100);
        assert_eq!(config.max_body_bytes, 1024 * 1024);
    }

    #[test]
    fn policy_defaults() {
        let policy = ReadThroughPolicy::new("products");
        assert_eq!(policy.resource, "products");
        assert_eq!(policy.ttl, None);
        assert!(!policy.user_scoped);
    }

    #[test]
    fn route_ttl_overrides_default() {
        let config = CacheConfig::default();
        let policy = ReadThroughPolicy::new("products").with_ttl(Duration::from_secs(60));
        assert_eq!(config.ttl_for(&policy), Duration::from_secs(60));
        assert_eq!(
            config.ttl_for(&ReadThroughPolicy::new("orders")),
            Duration::from_secs(300)
        );
    }

    #[test]
    fn sub_second_ttl_is_clamped() {
        let config = CacheConfig::default();
        let policy = ReadThroughPolicy::new("p").with_ttl(Duration::from_millis(10));
        assert_eq!(config.ttl_for(&policy), Duration::from_secs(1));
    }

    #[test]
    fn invalidation_policy_keeps_order() {
        let policy = InvalidationPolicy::new(["products:*", "categories:*"]);
        assert_eq!(policy.patterns, vec!["products:*", "categories:*"]);
    }
}
