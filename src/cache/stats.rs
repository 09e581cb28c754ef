//! Normalized store statistics built from `INFO` and `DBSIZE` replies.

use std::collections::HashMap;

use serde::Serialize;

/// Memory figures reported by `INFO memory`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_human: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_human: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_bytes: Option<u64>,
}

/// Snapshot of the backing store as seen by this service.
///
/// On outage only `available: false` is reported. Figures the store did not provide are omitted
/// rather than guessed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_estimate: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hits: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub misses: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_ratio: Option<f64>,
}

impl CacheStats {
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Assemble stats from whichever replies the store returned.
    pub(crate) fn from_replies(
        backend: &'static str,
        memory: Option<&str>,
        stats: Option<&str>,
        size: Option<u64>,
    ) -> Self {
        if memory.is_none() && stats.is_none() && size.is_none() {
            return Self::unavailable();
        }

        let memory = memory.map(parse_info).map(|fields| MemoryInfo {
            used_bytes: number(&fields, "used_memory"),
            used_human: text(&fields, "used_memory_human"),
            peak_human: text(&fields, "used_memory_peak_human"),
            max_bytes: number(&fields, "maxmemory"),
        });

        let counters = stats.map(parse_info).unwrap_or_default();
        let hits = number(&counters, "keyspace_hits");
        let misses = number(&counters, "keyspace_misses");

        Self {
            available: true,
            backend: Some(backend),
            size_estimate: size,
            memory,
            hits,
            misses,
            hit_ratio: hit_ratio(hits, misses),
        }
    }
}

/// `hits / (hits + misses)`, or unknown when either counter is missing or no lookups happened.
pub fn hit_ratio(hits: Option<u64>, misses: Option<u64>) -> Option<f64> {
    let (hits, misses) = (hits?, misses?);
    let total = hits.checked_add(misses)?;
    (total > 0).then(|| hits as f64 / total as f64)
}

/// Parse `field:value` lines of an `INFO` reply, skipping section headers.
fn parse_info(reply: &str) -> HashMap<&str, &str> {
    reply
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .collect()
}

fn number(fields: &HashMap<&str, &str>, name: &str) -> Option<u64> {
    fields.get(name).and_then(|value| value.parse().ok())
}

fn text(fields: &HashMap<&str, &str>, name: &str) -> Option<String> {
    fields.get(name).map(|value| value.to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const MEMORY: &str = "# Memory\r\nused_memory:1048576\r\nused_memory_human:1.00M\r\nused_memory_peak_human:2.00M\r\nmaxmemory:0\r\n";
    const STATS: &str = "# Stats\r\ntotal_connections_received:4\r\nkeyspace_hits:30\r\nkeyspace_misses:10\r\n";

    #[test]
    fn ratio_from_both_counters() {
        assert_eq!(hit_ratio(Some(30), Some(10)), Some(0.75));
        assert_eq!(hit_ratio(Some(0), Some(5)), Some(0.0));
    }

    #[test]
    fn ratio_is_unknown_without_lookups_or_counters() {
        assert_eq!(hit_ratio(Some(0), Some(0)), None);
        assert_eq!(hit_ratio(None, Some(3)), None);
        assert_eq!(hit_ratio(Some(3), None), None);
        assert_eq!(hit_ratio(Some(u64::MAX), Some(1)), None);
    }

    #[test]
    fn assembles_full_snapshot() {
        let stats = CacheStats::from_replies("redis", Some(MEMORY), Some(STATS), Some(42));

        assert!(stats.available);
        assert_eq!(stats.size_estimate, Some(42));
        assert_eq!(stats.hits, Some(30));
        assert_eq!(stats.misses, Some(10));
        assert_eq!(stats.hit_ratio, Some(0.75));
        let memory = stats.memory.expect("memory info");
        assert_eq!(memory.used_bytes, Some(1_048_576));
        assert_eq!(memory.used_human.as_deref(), Some("1.00M"));
        assert_eq!(memory.peak_human.as_deref(), Some("2.00M"));
        assert_eq!(memory.max_bytes, Some(0));
    }

    #[test]
    fn partial_replies_leave_gaps_instead_of_guesses() {
        let stats = CacheStats::from_replies("redis", None, None, Some(7));
        assert!(stats.available);
        assert_eq!(stats.size_estimate, Some(7));
        assert_eq!(stats.hit_ratio, None);
        assert_eq!(stats.memory, None);
    }

    #[test]
    fn outage_serializes_as_available_false_only() {
        let stats = CacheStats::from_replies("redis", None, None, None);
        assert_eq!(
            serde_json::to_value(&stats).expect("serialize"),
            json!({"available": false})
        );
    }

    #[test]
    fn serializes_camel_case() {
        let stats = CacheStats::from_replies("memory", Some(MEMORY), Some(STATS), Some(1));
        let value = serde_json::to_value(&stats).expect("serialize");
        assert_eq!(value["sizeEstimate"], json!(1));
        assert_eq!(value["hitRatio"], json!(0.75));
        assert_eq!(value["memory"]["usedHuman"], json!("1.00M"));
        assert_eq!(value["backend"], json!("memory"));
    }
}
