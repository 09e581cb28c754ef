//! Administrative cache operations shared by the HTTP admin surface and the CLI.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::cache::{CacheStats, CacheStore};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdminError {
    #[error("at least one non-blank pattern is required")]
    EmptyPatterns,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedCount {
    pub deleted_count: u64,
}

#[derive(Clone)]
pub struct CacheAdminService {
    store: Arc<CacheStore>,
}

impl CacheAdminService {
    pub fn new(store: Arc<CacheStore>) -> Self {
        Self { store }
    }

    pub async fn stats(&self) -> CacheStats {
        self.store.stats().await
    }

    pub async fn health(&self) -> HealthReport {
        let status = if self.store.ping().await {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        HealthReport { status }
    }

    /// Delete every key under the namespace. Keys outside it are never touched.
    pub async fn flush(&self) -> DeletedCount {
        let deleted_count = self.store.flush_namespace().await;
        info!(
            namespace = %self.store.keys().namespace(),
            deleted_count, "Flushed cache namespace"
        );
        DeletedCount { deleted_count }
    }

    /// Delete every key matching any of `patterns`. Blank entries are ignored.
    pub async fn invalidate<S: AsRef<str>>(
        &self,
        patterns: &[S],
    ) -> Result<DeletedCount, AdminError> {
        let patterns: Vec<&str> = patterns
            .iter()
            .map(|pattern| pattern.as_ref().trim())
            .filter(|pattern| !pattern.is_empty())
            .collect();
        if patterns.is_empty() {
            return Err(AdminError::EmptyPatterns);
        }

        let mut deleted_count = 0;
        for pattern in &patterns {
            deleted_count += self.store.delete_pattern(pattern).await;
        }
        info!(?patterns, deleted_count, "Invalidated cache patterns");
        Ok(DeletedCount { deleted_count })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::cache::{CacheConfig, MemoryBackend};

    fn service() -> (CacheAdminService, Arc<CacheStore>, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let config = CacheConfig {
            namespace: "ns".to_string(),
            ..CacheConfig::default()
        };
        let store = Arc::new(CacheStore::with_backend(&config, backend.clone()));
        (CacheAdminService::new(store.clone()), store, backend)
    }

    #[tokio::test]
    async fn flush_only_touches_namespace() {
        let (admin, store, backend) = service();
        store.set("ns:products:all", b"1", Duration::from_secs(60)).await;
        store.set("ns:cart:userId=a", b"1", Duration::from_secs(60)).await;
        backend.set_persistent("billing:invoices:all", b"1");

        assert_eq!(admin.flush().await, DeletedCount { deleted_count: 2 });
        assert_eq!(backend.len(), 1);
        assert_eq!(admin.flush().await.deleted_count, 0);
    }

    #[tokio::test]
    async fn invalidate_sums_patterns() {
        let (admin, store, _) = service();
        for key in ["ns:products:all", "ns:products:page=2", "ns:cart:userId=a", "ns:orders:all"] {
            store.set(key, b"1", Duration::from_secs(60)).await;
        }

        let deleted = admin
            .invalidate(&["products:*", "  ", "cart:*"])
            .await
            .expect("patterns");
        assert_eq!(deleted.deleted_count, 3);
        assert!(store.exists("ns:orders:all").await);
    }

    #[tokio::test]
    async fn blank_pattern_lists_are_rejected() {
        let (admin, _, _) = service();
        let empty: [&str; 0] = [];
        assert_eq!(admin.invalidate(&empty).await, Err(AdminError::EmptyPatterns));
        assert_eq!(
            admin.invalidate(&["", " "]).await,
            Err(AdminError::EmptyPatterns)
        );
    }

    #[tokio::test]
    async fn health_follows_ping() {
        let (admin, store, _) = service();
        assert!(admin.health().await.is_healthy());

        store.close();
        let report = admin.health().await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(
            serde_json::to_value(report).expect("serialize"),
            json!({"status": "unhealthy"})
        );
    }

    #[test]
    fn deleted_count_serializes_camel_case() {
        assert_eq!(
            serde_json::to_value(DeletedCount { deleted_count: 4 }).expect("serialize"),
            json!({"deletedCount": 4})
        );
    }
}
