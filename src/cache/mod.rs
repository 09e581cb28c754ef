//! Cache-aside layer.
//!
//! - [`KeyBuilder`] derives deterministic keys from a namespace, a resource and parameters.
//! - [`CacheStore`] is the fail-open client over a [`CacheBackend`] (Redis or in-process memory).
//! - [`read_through_layer`] and [`invalidation_layer`] wrap read and write routes.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! url = "redis://127.0.0.1:6379"
//! namespace = "app"
//! default_ttl_seconds = 300
//! # ... see config.rs for all options
//! ```

mod backend;
pub mod config;
pub(crate) mod glob;
mod keys;
pub(crate) mod lock;
mod memory;
mod middleware;
mod redis_backend;
mod stats;
mod store;

pub use backend::{CacheBackend, KeyTtl, ScanPage, StoreError};
pub use config::{CacheConfig, InvalidationPolicy, ReadThroughPolicy};
pub use keys::{ALL_PARAMS, KeyBuilder};
pub use memory::MemoryBackend;
pub use middleware::{
    CacheState, Invalidation, ReadThrough, USER_SCOPE_PARAM, X_CACHE, invalidation_layer,
    read_through_layer,
};
pub use redis_backend::RedisBackend;
pub use stats::{CacheStats, MemoryInfo, hit_ratio};
pub use store::CacheStore;
