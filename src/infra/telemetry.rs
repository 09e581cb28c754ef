use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for every metric the cache layer emits.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "cache_aside_hit_total",
            Unit::Count,
            "Reads served from the cache."
        );
        describe_counter!(
            "cache_aside_miss_total",
            Unit::Count,
            "Reads that fell through to the handler."
        );
        describe_counter!(
            "cache_aside_write_total",
            Unit::Count,
            "Entries written to the store."
        );
        describe_counter!(
            "cache_aside_write_failed_total",
            Unit::Count,
            "Write-backs that failed or were not serializable."
        );
        describe_counter!(
            "cache_aside_invalidated_keys_total",
            Unit::Count,
            "Keys removed by deletes, pattern invalidation and flushes."
        );
        describe_counter!(
            "cache_aside_store_error_total",
            Unit::Count,
            "Store calls that failed open, labelled by operation."
        );
        describe_histogram!(
            "cache_aside_scan_batches",
            Unit::Count,
            "SCAN batches walked per pattern delete."
        );
    });
}
