//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroUsize, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::config::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_MAX_BODY_BYTES, DEFAULT_MEMORY_MAX_ENTRIES,
    DEFAULT_NAMESPACE, DEFAULT_OPERATION_TIMEOUT_MS, DEFAULT_SCAN_BATCH_SIZE, DEFAULT_TTL_SECS,
};

mod cli;

pub use cli::{
    CacheArgs, CacheOverrides, CliArgs, Command, InvalidateArgs, ServeArgs, ServeOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "cache-aside";
const ENV_PREFIX: &str = "CACHE_ASIDE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const REDIS_SCHEMES: [&str; 4] = ["redis", "rediss", "redis+unix", "unix"];
const NAMESPACE_FORBIDDEN: [char; 6] = ['*', '?', '[', ']', '\\', ':'];

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub url: Option<String>,
    pub namespace: String,
    pub default_ttl: Duration,
    pub operation_timeout: Duration,
    pub connect_timeout: Duration,
    pub scan_batch_size: NonZeroUsize,
    pub max_body_bytes: NonZeroUsize,
    pub memory_max_entries: NonZeroUsize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Stats(args) | Command::Health(args) | Command::Flush(args)) => {
            raw.apply_cache_overrides(&args.cache)
        }
        Some(Command::Invalidate(args)) => raw.apply_cache_overrides(&args.cache),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(seconds) = overrides.cache_default_ttl_seconds {
            self.cache.default_ttl_seconds = Some(seconds);
        }
        if let Some(count) = overrides.cache_scan_batch_size {
            self.cache.scan_batch_size = Some(count);
        }
        if let Some(bytes) = overrides.cache_max_body_bytes {
            self.cache.max_body_bytes = Some(bytes);
        }
        if let Some(entries) = overrides.cache_memory_max_entries {
            self.cache.memory_max_entries = Some(entries);
        }

        self.apply_cache_overrides(&overrides.cache);
    }

    fn apply_cache_overrides(&mut self, overrides: &CacheOverrides) {
        if let Some(url) = overrides.cache_url.as_ref() {
            self.cache.url = Some(url.clone());
        }
        if let Some(namespace) = overrides.cache_namespace.as_ref() {
            self.cache.namespace = Some(namespace.clone());
        }
        if let Some(millis) = overrides.cache_operation_timeout_ms {
            self.cache.operation_timeout_ms = Some(millis);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;

        Ok(Self {
            server,
            logging,
            cache,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    let graceful_shutdown = Duration::from_secs(non_zero_u64(
        graceful_secs,
        "server.graceful_shutdown_seconds",
    )?);

    Ok(ServerSettings {
        addr,
        graceful_shutdown,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let url = cache
        .url
        .and_then(|value| {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .map(validate_url)
        .transpose()?;

    let namespace = cache
        .namespace
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
    validate_namespace(&namespace)?;

    let default_ttl = Duration::from_secs(non_zero_u64(
        cache.default_ttl_seconds.unwrap_or(DEFAULT_TTL_SECS),
        "cache.default_ttl_seconds",
    )?);
    let operation_timeout = Duration::from_millis(non_zero_u64(
        cache
            .operation_timeout_ms
            .unwrap_or(DEFAULT_OPERATION_TIMEOUT_MS),
        "cache.operation_timeout_ms",
    )?);
    let connect_timeout = Duration::from_millis(non_zero_u64(
        cache.connect_timeout_ms.unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
        "cache.connect_timeout_ms",
    )?);
    let scan_batch_size = non_zero_usize(
        cache
            .scan_batch_size
            .unwrap_or(DEFAULT_SCAN_BATCH_SIZE as u64),
        "cache.scan_batch_size",
    )?;
    let max_body_bytes = non_zero_usize(
        cache.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES as u64),
        "cache.max_body_bytes",
    )?;
    let memory_max_entries = non_zero_usize(
        cache
            .memory_max_entries
            .unwrap_or(DEFAULT_MEMORY_MAX_ENTRIES as u64),
        "cache.memory_max_entries",
    )?;

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        url,
        namespace,
        default_ttl,
        operation_timeout,
        connect_timeout,
        scan_batch_size,
        max_body_bytes,
        memory_max_entries,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    url: Option<String>,
    namespace: Option<String>,
    default_ttl_seconds: Option<u64>,
    operation_timeout_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    scan_batch_size: Option<u64>,
    max_body_bytes: Option<u64>,
    memory_max_entries: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn validate_url(value: String) -> Result<String, LoadError> {
    let parsed = Url::parse(&value)
        .map_err(|err| LoadError::invalid("cache.url", format!("failed to parse: {err}")))?;
    if !REDIS_SCHEMES.contains(&parsed.scheme()) {
        return Err(LoadError::invalid(
            "cache.url",
            format!("unsupported scheme `{}`", parsed.scheme()),
        ));
    }
    Ok(value)
}

fn validate_namespace(namespace: &str) -> Result<(), LoadError> {
    if namespace.is_empty() {
        return Err(LoadError::invalid("cache.namespace", "must not be empty"));
    }
    if let Some(found) = namespace
        .chars()
        .find(|ch| NAMESPACE_FORBIDDEN.contains(ch) || ch.is_whitespace())
    {
        return Err(LoadError::invalid(
            "cache.namespace",
            format!("must not contain `{found}`"),
        ));
    }
    Ok(())
}

fn non_zero_u64(value: u64, key: &'static str) -> Result<u64, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(value)
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
