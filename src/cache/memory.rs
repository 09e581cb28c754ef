//! In-process [`CacheBackend`] for single-instance deployments and tests.
//!
//! Mirrors the store-side behaviour the cache layer relies on: TTL expiry, glob `MATCH`,
//! resumable `SCAN` cursors that stay valid while keys are deleted between batches, and an `INFO`
//! reply carrying the same fields Redis reports. Entries are bounded by an LRU capacity, and
//! expired entries are swept before a walk starts, before sizes are reported and before an
//! eviction would be needed.

use std::num::NonZeroUsize;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use tracing::{debug, warn};

use super::backend::{CacheBackend, ScanPage, StoreError};
use super::config::DEFAULT_MEMORY_MAX_ENTRIES;
use super::glob::glob_match;
use super::lock::{mutex_lock, rw_read, rw_write};

const SOURCE: &str = "cache::memory";
const MAX_OPEN_CURSORS: NonZeroUsize = NonZeroUsize::MIN.saturating_add(1023);

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }

    fn size(&self, key: &str) -> usize {
        key.len() + self.value.len()
    }
}

/// Memory-backed key-value store holding at most `capacity` entries.
pub struct MemoryBackend {
    entries: RwLock<LruCache<String, Entry>>,
    // Open scan cursors, keyed by cursor id, holding the last key examined.
    cursors: Mutex<LruCache<u64, String>>,
    next_cursor: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    evicted: AtomicU64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_capacity(
            NonZeroUsize::new(DEFAULT_MEMORY_MAX_ENTRIES).unwrap_or(NonZeroUsize::MIN),
        )
    }

    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            cursors: Mutex::new(LruCache::new(MAX_OPEN_CURSORS)),
            next_cursor: AtomicU64::new(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Store a value without expiry (`SET key value`).
    pub fn set_persistent(&self, key: &str, value: &[u8]) {
        self.insert(
            key,
            Entry {
                value: value.to_vec(),
                expires_at: None,
            },
        );
    }

    /// Number of live keys, regardless of namespace.
    pub fn len(&self) -> usize {
        self.purge_expired("len");
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, key: &str, entry: Entry) {
        let mut entries = rw_write(&self.entries, SOURCE, "insert");
        if entries.len() == entries.cap().get() && !entries.contains(key) {
            self.expired
                .fetch_add(sweep(&mut entries, Instant::now()), Ordering::Relaxed);
        }
        if let Some((evicted, _)) = entries.push(key.to_string(), entry)
            && evicted != key
        {
            self.evicted.fetch_add(1, Ordering::Relaxed);
            debug!(key = %evicted, capacity = entries.cap().get(), "Evicted least recently used entry");
        }
    }

    /// Look up `key`, dropping it if it has expired. Check and removal share one write lock.
    fn live_entry(&self, key: &str) -> Option<Entry> {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "lookup");
        let live = entries.peek(key)?.is_live(now);
        if !live {
            entries.pop(key);
            self.expired.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        entries.get(key).cloned()
    }

    fn purge_expired(&self, op: &'static str) {
        let removed = sweep(&mut rw_write(&self.entries, SOURCE, op), Instant::now());
        self.expired.fetch_add(removed, Ordering::Relaxed);
    }

    fn open_cursor(&self, last_key: String) -> u64 {
        let mut id = self.next_cursor.fetch_add(1, Ordering::Relaxed);
        if id == 0 {
            id = self.next_cursor.fetch_add(1, Ordering::Relaxed);
        }
        let mut cursors = mutex_lock(&self.cursors, SOURCE, "open_cursor");
        if let Some((dropped, _)) = cursors.push(id, last_key) {
            debug!(cursor = dropped, "Dropped least recently opened scan cursor");
        }
        id
    }
}

/// Remove every expired entry, returning how many were removed.
fn sweep(entries: &mut LruCache<String, Entry>, now: Instant) -> u64 {
    let expired: Vec<String> = entries
        .iter()
        .filter(|(_, entry)| !entry.is_live(now))
        .map(|(key, _)| key.clone())
        .collect();
    for key in &expired {
        entries.pop(key);
    }
    expired.len() as u64
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self.live_entry(key).map(|entry| entry.value);
        let counter = if value.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl_secs: u64) -> Result<(), StoreError> {
        if ttl_secs == 0 {
            return Err(StoreError::rejected(
                "setex",
                "invalid expire time in 'setex' command",
            ));
        }
        self.insert(
            key,
            Entry {
                value: value.to_vec(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "del");
        let removed = keys
            .iter()
            .filter_map(|key| entries.pop(key))
            .filter(|entry| entry.is_live(now))
            .count();
        Ok(removed as u64)
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<ScanPage, StoreError> {
        let start = if cursor == 0 {
            self.purge_expired("scan.sweep");
            Bound::Unbounded
        } else {
            match mutex_lock(&self.cursors, SOURCE, "scan.resume").pop(&cursor) {
                Some(last_key) => Bound::Excluded(last_key),
                // Unknown cursors end the scan, as an invalid cursor would on the server.
                None => {
                    warn!(cursor, pattern, "Scan cursor unknown or dropped; walk ends early");
                    return Ok(ScanPage::default());
                }
            }
        };

        let now = Instant::now();
        let count = count.max(1);
        let entries = rw_read(&self.entries, SOURCE, "scan");
        let mut remaining: Vec<(&String, &Entry)> = entries
            .iter()
            .filter(|(key, _)| match &start {
                Bound::Excluded(last) => key.as_str() > last.as_str(),
                _ => true,
            })
            .collect();
        remaining.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));

        let batch = &remaining[..count.min(remaining.len())];
        let keys = batch
            .iter()
            .filter(|(key, entry)| entry.is_live(now) && glob_match(pattern, key))
            .map(|(key, _)| (*key).clone())
            .collect();
        let resume_after = match batch.last() {
            Some((last, _)) if remaining.len() > count => Some((*last).clone()),
            _ => None,
        };
        drop(entries);

        let cursor = resume_after.map_or(0, |last| self.open_cursor(last));
        Ok(ScanPage { cursor, keys })
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.live_entry(key).is_some())
    }

    async fn ttl(&self, key: &str) -> Result<i64, StoreError> {
        let Some(entry) = self.live_entry(key) else {
            return Ok(-2);
        };
        Ok(match entry.expires_at {
            Some(at) => at.saturating_duration_since(Instant::now()).as_secs() as i64,
            None => -1,
        })
    }

    async fn info(&self, section: &str) -> Result<String, StoreError> {
        match section.to_ascii_lowercase().as_str() {
            "memory" => {
                self.purge_expired("info.memory");
                let entries = rw_read(&self.entries, SOURCE, "info.memory");
                let used: usize = entries.iter().map(|(key, entry)| entry.size(key)).sum();
                Ok(format!(
                    "# Memory\r\nused_memory:{used}\r\nused_memory_human:{}\r\nmaxmemory:0\r\nmaxmemory_policy:allkeys-lru\r\n",
                    human_bytes(used as u64)
                ))
            }
            "stats" => Ok(format!(
                "# Stats\r\nkeyspace_hits:{}\r\nkeyspace_misses:{}\r\nexpired_keys:{}\r\nevicted_keys:{}\r\n",
                self.hits.load(Ordering::Relaxed),
                self.misses.load(Ordering::Relaxed),
                self.expired.load(Ordering::Relaxed),
                self.evicted.load(Ordering::Relaxed)
            )),
            _ => Ok(String::new()),
        }
    }

    async fn dbsize(&self) -> Result<u64, StoreError> {
        Ok(self.len() as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Format a byte count the way `INFO memory` does (`1.50K`, `2.00M`).
fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["K", "M", "G", "T"];
    if bytes < 1024 {
        return format!("{bytes}B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2}{}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn scan_all(backend: &MemoryBackend, pattern: &str, count: usize) -> Vec<String> {
        let mut cursor = 0;
        let mut found = Vec::new();
        loop {
            let page = backend.scan(cursor, pattern, count).await.expect("scan");
            found.extend(page.keys);
            if page.cursor == 0 {
                return found;
            }
            cursor = page.cursor;
        }
    }

    #[tokio::test]
    async fn get_set_roundtrip_tracks_hits_and_misses() {
        let backend = MemoryBackend::new();
        backend.set_ex("k", b"v", 60).await.expect("set");

        assert_eq!(backend.get("k").await.expect("get"), Some(b"v".to_vec()));
        assert_eq!(backend.get("absent").await.expect("get"), None);

        let stats = backend.info("stats").await.expect("info");
        assert!(stats.contains("keyspace_hits:1"));
        assert!(stats.contains("keyspace_misses:1"));
    }

    #[tokio::test]
    async fn zero_ttl_is_rejected_like_setex() {
        let backend = MemoryBackend::new();
        assert!(backend.set_ex("k", b"v", 0).await.is_err());
    }

    #[tokio::test]
    async fn ttl_reports_expiry_persistence_and_absence() {
        let backend = MemoryBackend::new();
        backend.set_ex("expiring", b"v", 100).await.expect("set");
        backend.set_persistent("forever", b"v");

        let ttl = backend.ttl("expiring").await.expect("ttl");
        assert!((98..=100).contains(&ttl), "unexpected ttl {ttl}");
        assert_eq!(backend.ttl("forever").await.expect("ttl"), -1);
        assert_eq!(backend.ttl("missing").await.expect("ttl"), -2);
    }

    #[tokio::test]
    async fn scan_walks_every_batch_until_cursor_returns_to_zero() {
        let backend = MemoryBackend::new();
        for i in 0..25 {
            backend.set_persistent(&format!("app:products:page={i}"), b"x");
        }
        backend.set_persistent("app:orders:all", b"x");
        backend.set_persistent("other:products:all", b"x");

        let mut found = scan_all(&backend, "app:products:*", 4).await;
        found.sort();
        assert_eq!(found.len(), 25);
        assert!(found.iter().all(|key| key.starts_with("app:products:")));
    }

    #[tokio::test]
    async fn scan_survives_deletes_between_batches() {
        let backend = MemoryBackend::new();
        for i in 0..10 {
            backend.set_persistent(&format!("app:k{i:02}"), b"x");
        }

        let mut cursor = 0;
        let mut removed = 0;
        loop {
            let page = backend.scan(cursor, "app:*", 3).await.expect("scan");
            removed += backend.del(&page.keys).await.expect("del");
            if page.cursor == 0 {
                break;
            }
            cursor = page.cursor;
        }

        assert_eq!(removed, 10);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn unknown_cursor_ends_scan() {
        let backend = MemoryBackend::new();
        backend.set_persistent("a", b"x");
        let page = backend.scan(9_999, "*", 10).await.expect("scan");
        assert_eq!(page, ScanPage::default());
    }

    #[tokio::test]
    async fn del_counts_only_existing_keys() {
        let backend = MemoryBackend::new();
        backend.set_persistent("a", b"x");
        backend.set_persistent("b", b"x");
        let removed = backend
            .del(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .expect("del");
        assert_eq!(removed, 2);
    }

    fn set_short_lived(backend: &MemoryBackend, key: &str) {
        backend.insert(
            key,
            Entry {
                value: vec![b'x'; 100],
                expires_at: Some(Instant::now() + Duration::from_millis(5)),
            },
        );
    }

    fn stored(backend: &MemoryBackend) -> usize {
        rw_read(&backend.entries, SOURCE, "test").len()
    }

    #[tokio::test]
    async fn expired_entries_are_reclaimed_before_reporting_memory() {
        let backend = MemoryBackend::new();
        for i in 0..1000 {
            set_short_lived(&backend, &format!("app:k{i}"));
        }
        backend.set_persistent("app:keep", b"v");
        tokio::time::sleep(Duration::from_millis(20)).await;

        let memory = backend.info("memory").await.expect("info");
        assert!(memory.contains("used_memory:9\r\n"), "unexpected info: {memory}");
        assert_eq!(stored(&backend), 1);
        assert!(
            backend
                .info("stats")
                .await
                .expect("info")
                .contains("expired_keys:1000")
        );
    }

    #[tokio::test]
    async fn scan_walk_sweeps_expired_entries() {
        let backend = MemoryBackend::new();
        for i in 0..10 {
            set_short_lived(&backend, &format!("app:k{i}"));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(scan_all(&backend, "other:*", 4).await.is_empty());
        assert_eq!(stored(&backend), 0);
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_used() {
        let backend = MemoryBackend::with_capacity(NonZeroUsize::new(2).expect("non-zero"));
        backend.set_ex("a", b"1", 60).await.expect("set");
        backend.set_ex("b", b"2", 60).await.expect("set");
        assert!(backend.get("a").await.expect("get").is_some());

        backend.set_ex("c", b"3", 60).await.expect("set");

        assert_eq!(backend.get("b").await.expect("get"), None);
        assert!(backend.exists("a").await.expect("exists"));
        assert!(backend.exists("c").await.expect("exists"));
        assert!(
            backend
                .info("stats")
                .await
                .expect("info")
                .contains("evicted_keys:1")
        );
    }

    #[tokio::test]
    async fn full_store_drops_expired_entries_before_evicting_live_ones() {
        let backend = MemoryBackend::with_capacity(NonZeroUsize::new(2).expect("non-zero"));
        backend.set_persistent("live", b"v");
        set_short_lived(&backend, "stale");
        tokio::time::sleep(Duration::from_millis(20)).await;

        backend.set_persistent("new", b"v");

        assert!(backend.exists("live").await.expect("exists"));
        assert!(backend.exists("new").await.expect("exists"));
        assert!(backend.info("stats").await.expect("info").contains("evicted_keys:0"));
    }

    #[tokio::test]
    async fn refreshed_key_survives_lookup_of_its_expired_value() {
        let backend = MemoryBackend::new();
        set_short_lived(&backend, "k");
        tokio::time::sleep(Duration::from_millis(20)).await;
        backend.set_ex("k", b"fresh", 60).await.expect("set");

        assert_eq!(backend.get("k").await.expect("get"), Some(b"fresh".to_vec()));
        assert_eq!(stored(&backend), 1);
    }

    #[tokio::test]
    async fn opening_many_cursors_keeps_recent_scans_resumable() {
        let backend = MemoryBackend::new();
        for i in 0..4 {
            backend.set_persistent(&format!("app:k{i}"), b"x");
        }

        let first = backend.scan(0, "app:*", 1).await.expect("scan");
        let mut latest = first.cursor;
        for _ in 0..MAX_OPEN_CURSORS.get() {
            latest = backend.scan(0, "app:*", 1).await.expect("scan").cursor;
        }

        let resumed = backend.scan(latest, "app:*", 1).await.expect("scan");
        assert_eq!(resumed.keys, vec!["app:k1".to_string()]);
        assert_eq!(
            backend.scan(first.cursor, "app:*", 1).await.expect("scan"),
            ScanPage::default()
        );
    }

    #[test]
    fn human_bytes_matches_info_style() {
        assert_eq!(human_bytes(512), "512B");
        assert_eq!(human_bytes(1536), "1.50K");
        assert_eq!(human_bytes(2 * 1024 * 1024), "2.00M");
    }
}
