//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::infra::kv::StoreBackend;

mod cli;

pub use cli::{CliArgs, Command, SelftestArgs, ServeArgs, ServeOverrides, StoreOverride};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "cachet";
const ENV_PREFIX: &str = "CACHET";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_STORE_URL: &str = "redis://localhost:6379";
const DEFAULT_STORE_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_STORE_COMMAND_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_STORE_BACKOFF_STEP_MS: u64 = 50;
const DEFAULT_STORE_BACKOFF_CAP_MS: u64 = 2_000;
const DEFAULT_STORE_MAX_CONNECT_ATTEMPTS: u64 = 3;
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_CACHE_LISTING_TTL_SECS: u64 = 3600;
const DEFAULT_CACHE_POPULATION_CONCURRENCY: u64 = 32;
const DEFAULT_CACHE_RESPONSE_BODY_LIMIT_BYTES: u64 = 1024 * 1024;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u64 = 20;

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub store: StoreSettings,
    pub cache: CacheSettings,
    pub rate_limit: RateLimitSettings,
    pub content: ContentSettings,
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub url: String,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub backoff_step: Duration,
    pub backoff_cap: Duration,
    pub max_connect_attempts: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub default_ttl_secs: NonZeroU64,
    pub listing_ttl_secs: NonZeroU64,
    pub population_concurrency: NonZeroU32,
    pub response_body_limit_bytes: NonZeroU64,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub window_secs: NonZeroU64,
    pub max_requests: NonZeroU32,
    pub key_prefix: String,
}

#[derive(Debug, Clone, Default)]
pub struct ContentSettings {
    pub seed_file: Option<PathBuf>,
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
        Some(Command::Selftest(args)) => raw.apply_store_override(&args.store),
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
    store: RawStoreSettings,
    cache: RawCacheSettings,
    rate_limit: RawRateLimitSettings,
    content: RawContentSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        self.apply_store_override(&overrides.store);
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
        if let Some(count) = overrides.cache_population_concurrency {
            self.cache.population_concurrency = Some(count);
        }
        if let Some(seconds) = overrides.rate_limit_window_seconds {
            self.rate_limit.window_seconds = Some(seconds);
        }
        if let Some(count) = overrides.rate_limit_max_requests {
            self.rate_limit.max_requests = Some(count);
        }
        if let Some(path) = overrides.content_seed_file.as_ref() {
            self.content.seed_file = Some(path.clone());
        }
    }

    fn apply_store_override(&mut self, overrides: &StoreOverride) {
        if let Some(backend) = overrides.store_backend.as_ref() {
            self.store.backend = Some(backend.clone());
        }
        if let Some(url) = overrides.store_url.as_ref() {
            self.store.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            store,
            cache,
            rate_limit,
            content,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            store: build_store_settings(store)?,
            cache: build_cache_settings(cache)?,
            rate_limit: build_rate_limit_settings(rate_limit)?,
            content: build_content_settings(content),
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
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
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

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let backend = match store.backend {
        Some(value) => StoreBackend::from_str(&value)
            .map_err(|reason| LoadError::invalid("store.backend", reason))?,
        None => StoreBackend::Redis,
    };

    let url = store
        .url
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_STORE_URL.to_string());
    if backend == StoreBackend::Redis {
        let parsed = url::Url::parse(&url)
            .map_err(|err| LoadError::invalid("store.url", format!("invalid url: {err}")))?;
        if !matches!(parsed.scheme(), "redis" | "rediss") {
            return Err(LoadError::invalid(
                "store.url",
                format!("unsupported scheme `{}`", parsed.scheme()),
            ));
        }
    }

    let connect_timeout = non_zero_millis(
        store
            .connect_timeout_ms
            .unwrap_or(DEFAULT_STORE_CONNECT_TIMEOUT_MS),
        "store.connect_timeout_ms",
    )?;
    let command_timeout = non_zero_millis(
        store
            .command_timeout_ms
            .unwrap_or(DEFAULT_STORE_COMMAND_TIMEOUT_MS),
        "store.command_timeout_ms",
    )?;
    let backoff_step = non_zero_millis(
        store.backoff_step_ms.unwrap_or(DEFAULT_STORE_BACKOFF_STEP_MS),
        "store.backoff_step_ms",
    )?;
    let backoff_cap = non_zero_millis(
        store.backoff_cap_ms.unwrap_or(DEFAULT_STORE_BACKOFF_CAP_MS),
        "store.backoff_cap_ms",
    )?;
    if backoff_cap < backoff_step {
        return Err(LoadError::invalid(
            "store.backoff_cap_ms",
            "must not be smaller than store.backoff_step_ms",
        ));
    }

    let max_connect_attempts = non_zero_u32(
        store
            .max_connect_attempts
            .unwrap_or(DEFAULT_STORE_MAX_CONNECT_ATTEMPTS),
        "store.max_connect_attempts",
    )?;

    Ok(StoreSettings {
        backend,
        url,
        connect_timeout,
        command_timeout,
        backoff_step,
        backoff_cap,
        max_connect_attempts,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let default_ttl_secs = non_zero_u64(
        cache.default_ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS),
        "cache.default_ttl_seconds",
    )?;
    let listing_ttl_secs = non_zero_u64(
        cache
            .listing_ttl_seconds
            .unwrap_or(DEFAULT_CACHE_LISTING_TTL_SECS),
        "cache.listing_ttl_seconds",
    )?;
    let population_concurrency = non_zero_u32(
        cache
            .population_concurrency
            .unwrap_or(DEFAULT_CACHE_POPULATION_CONCURRENCY),
        "cache.population_concurrency",
    )?;
    let response_body_limit_bytes = non_zero_u64(
        cache
            .response_body_limit_bytes
            .unwrap_or(DEFAULT_CACHE_RESPONSE_BODY_LIMIT_BYTES),
        "cache.response_body_limit_bytes",
    )?;

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        default_ttl_secs,
        listing_ttl_secs,
        population_concurrency,
        response_body_limit_bytes,
    })
}

fn build_rate_limit_settings(
    rate_limit: RawRateLimitSettings,
) -> Result<RateLimitSettings, LoadError> {
    let window_secs = non_zero_u64(
        rate_limit
            .window_seconds
            .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_SECS),
        "rate_limit.window_seconds",
    )?;
    let max_requests = non_zero_u32(
        rate_limit
            .max_requests
            .unwrap_or(DEFAULT_RATE_LIMIT_MAX_REQUESTS),
        "rate_limit.max_requests",
    )?;

    let key_prefix = rate_limit
        .key_prefix
        .unwrap_or_else(|| crate::rate_limit::DEFAULT_KEY_PREFIX.to_string());
    if key_prefix.trim().is_empty() {
        return Err(LoadError::invalid(
            "rate_limit.key_prefix",
            "must not be empty",
        ));
    }
    if key_prefix.contains(['*', '?', '[']) {
        return Err(LoadError::invalid(
            "rate_limit.key_prefix",
            "must not contain glob characters",
        ));
    }

    Ok(RateLimitSettings {
        window_secs,
        max_requests,
        key_prefix,
    })
}

fn build_content_settings(content: RawContentSettings) -> ContentSettings {
    ContentSettings {
        seed_file: content
            .seed_file
            .filter(|path| !path.as_os_str().is_empty()),
    }
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
struct RawStoreSettings {
    backend: Option<String>,
    url: Option<String>,
    connect_timeout_ms: Option<u64>,
    command_timeout_ms: Option<u64>,
    backoff_step_ms: Option<u64>,
    backoff_cap_ms: Option<u64>,
    max_connect_attempts: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    default_ttl_seconds: Option<u64>,
    listing_ttl_seconds: Option<u64>,
    population_concurrency: Option<u64>,
    response_body_limit_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRateLimitSettings {
    window_seconds: Option<u64>,
    max_requests: Option<u64>,
    key_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawContentSettings {
    seed_file: Option<PathBuf>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_u64(value: u64, key: &'static str) -> Result<NonZeroU64, LoadError> {
    NonZeroU64::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    non_zero_u64(value, key).map(|millis| Duration::from_millis(millis.get()))
}

#[cfg(test)]
mod tests;
