use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the cache-aside binary.
#[derive(Debug, Parser)]
#[command(
    name = "cache-aside",
    version,
    about = "Fail-open cache-aside layer for JSON read APIs"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "CACHE_ASIDE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Serve the catalog API and the cache admin surface.
    Serve(Box<ServeArgs>),
    /// Print store statistics as JSON.
    Stats(CacheArgs),
    /// Ping the store; exits with status 1 when it is unhealthy.
    Health(CacheArgs),
    /// Delete every key in the configured namespace.
    Flush(CacheArgs),
    /// Delete every key matching the given patterns.
    Invalidate(InvalidateArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct CacheArgs {
    #[command(flatten)]
    pub cache: CacheOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct InvalidateArgs {
    #[command(flatten)]
    pub cache: CacheOverrides,

    /// Glob patterns relative to the namespace, e.g. `products:*`.
    #[arg(value_name = "PATTERN")]
    pub patterns: Vec<String>,
}

/// Store connection flags shared by every command.
#[derive(Debug, Args, Default, Clone)]
pub struct CacheOverrides {
    /// Override the Redis URL.
    #[arg(long = "cache-url", value_name = "URL")]
    pub cache_url: Option<String>,

    /// Override the key namespace.
    #[arg(long = "cache-namespace", value_name = "NAME")]
    pub cache_namespace: Option<String>,

    /// Override the per-command timeout.
    #[arg(long = "cache-operation-timeout-ms", value_name = "MILLIS")]
    pub cache_operation_timeout_ms: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub cache: CacheOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Turn caching on or off without touching the store settings.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the default entry TTL.
    #[arg(long = "cache-default-ttl-seconds", value_name = "SECONDS")]
    pub cache_default_ttl_seconds: Option<u64>,

    /// Override the `SCAN` batch size used by pattern deletes.
    #[arg(long = "cache-scan-batch-size", value_name = "COUNT")]
    pub cache_scan_batch_size: Option<u64>,

    /// Override the largest response body captured for caching.
    #[arg(long = "cache-max-body-bytes", value_name = "BYTES")]
    pub cache_max_body_bytes: Option<u64>,

    /// Override the entry capacity of the in-process store.
    #[arg(long = "cache-memory-max-entries", value_name = "COUNT")]
    pub cache_memory_max_entries: Option<u64>,
}
