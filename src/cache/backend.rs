//! Raw command surface of the key-value store behind [`CacheStore`](super::CacheStore).
//!
//! Backends report every failure as a [`StoreError`]; turning those into fail-open outcomes is the
//! store's job, not the backend's.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Failure talking to the backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis command failed: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("`{op}` timed out after {}ms", .after.as_millis())]
    Timeout { op: &'static str, after: Duration },
    #[error("cache store is not connected")]
    Disconnected,
    #[error("backend rejected `{op}`: {message}")]
    Rejected { op: &'static str, message: String },
}

impl StoreError {
    pub fn rejected(op: &'static str, message: impl Into<String>) -> Self {
        Self::Rejected {
            op,
            message: message.into(),
        }
    }
}

/// One batch of a cursor scan. A `cursor` of `0` means the scan is complete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    pub cursor: u64,
    pub keys: Vec<String>,
}

/// Remaining lifetime of a key as reported by `TTL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// Key exists and expires after this many seconds.
    Expires(u64),
    /// Key exists without an expiry.
    Persistent,
    /// Key does not exist (or the store could not be asked).
    Missing,
}

impl KeyTtl {
    /// Interpret the integer reply of `TTL` (`-2` missing, `-1` no expiry).
    pub fn from_reply(reply: i64) -> Self {
        match reply {
            -1 => Self::Persistent,
            secs if secs >= 0 => Self::Expires(secs as u64),
            _ => Self::Missing,
        }
    }
}

/// The commands the cache layer issues against its store.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short label used in logs and stats (`redis`, `memory`, ...).
    fn kind(&self) -> &'static str;

    /// `GET key`
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// `SETEX key ttl value`
    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<(), StoreError>;

    /// `DEL key [key...]`, returning how many keys were removed.
    async fn del(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// `SCAN cursor MATCH pattern COUNT count`
    async fn scan(&self, cursor: u64, pattern: &str, count: usize)
    -> Result<ScanPage, StoreError>;

    /// `EXISTS key`
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// `TTL key`, raw integer reply.
    async fn ttl(&self, key: &str) -> Result<i64, StoreError>;

    /// `INFO section`, raw text reply.
    async fn info(&self, section: &str) -> Result<String, StoreError>;

    /// `DBSIZE`
    async fn dbsize(&self) -> Result<u64, StoreError>;

    /// `PING`
    async fn ping(&self) -> Result<(), StoreError>;
}
