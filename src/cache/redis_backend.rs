//! Redis implementation of [`CacheBackend`] over a multiplexed connection manager.

use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::ConnectionManager};

use super::backend::{CacheBackend, ScanPage, StoreError};

/// Shared, reconnecting Redis handle. Clones share the same multiplexed connection.
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    /// Open a connection manager for `url`, giving up after `connect_timeout`.
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let conn = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout {
                op: "connect",
                after: connect_timeout,
            })??;
        Ok(Self { conn })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn kind(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let value: Option<Vec<u8>> = self.conn().get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<(), StoreError> {
        let _: () = self.conn().set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let removed: u64 = self.conn().del(keys).await?;
        Ok(removed)
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<ScanPage, StoreError> {
        let mut conn = self.conn();
        let (cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok(ScanPage { cursor, keys })
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let exists: bool = self.conn().exists(key).await?;
        Ok(exists)
    }

    async fn ttl(&self, key: &str) -> Result<i64, StoreError> {
        let ttl: i64 = self.conn().ttl(key).await?;
        Ok(ttl)
    }

    async fn info(&self, section: &str) -> Result<String, StoreError> {
        let mut conn = self.conn();
        let text: String = redis::cmd("INFO").arg(section).query_async(&mut conn).await?;
        Ok(text)
    }

    async fn dbsize(&self) -> Result<u64, StoreError> {
        let mut conn = self.conn();
        let size: u64 = redis::cmd("DBSIZE").query_async(&mut conn).await?;
        Ok(size)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        if reply.eq_ignore_ascii_case("PONG") {
            Ok(())
        } else {
            Err(StoreError::rejected("ping", format!("unexpected reply `{reply}`")))
        }
    }
}
