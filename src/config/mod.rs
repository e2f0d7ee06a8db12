//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{collections::HashMap, path::Path, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{CacheConfig, NamespaceTtl};

pub use cli::{BumpArgs, CliArgs, Command, EvictArgs, GlobalOverrides, PointKind, ResetArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "vynox";
const ENV_PREFIX: &str = "VYNOX";
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
const DEFAULT_REDIS_CONNECT_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_REDIS_COMMAND_TIMEOUT_MS: u64 = 500;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub redis: RedisSettings,
    pub cache: CacheSettings,
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
pub struct RedisSettings {
    /// `None` when no URL is configured; the Redis backend then runs disabled.
    pub url: Option<String>,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Redis,
    Memory,
    Disabled,
}

impl FromStr for CacheBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            "disabled" | "off" | "none" => Ok(Self::Disabled),
            other => Err(format!(
                "unknown cache backend `{other}` (expected redis, memory or disabled)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: CacheBackend,
    pub config: CacheConfig,
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
    let mut raw = load_raw(cli.config_file.as_deref())?;
    raw.apply_global_overrides(&cli.overrides);
    Settings::from_raw(raw)
}

fn load_raw(config_file: Option<&Path>) -> Result<RawSettings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    Ok(builder.build()?.try_deserialize()?)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    redis: RawRedisSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_global_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.redis_url.as_ref() {
            self.redis.url = Some(url.clone());
        }
        if let Some(backend) = overrides.cache_backend.as_ref() {
            self.cache.backend = Some(backend.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let logging = build_logging_settings(raw.logging)?;
        let redis = build_redis_settings(raw.redis)?;
        let cache = build_cache_settings(raw.cache)?;

        Ok(Self {
            logging,
            redis,
            cache,
        })
    }
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

fn build_redis_settings(redis: RawRedisSettings) -> Result<RedisSettings, LoadError> {
    let url = match redis.url {
        Some(value) => {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        None => Some(DEFAULT_REDIS_URL.to_string()),
    };

    let connect_timeout = non_zero_millis(
        redis
            .connect_timeout_ms
            .unwrap_or(DEFAULT_REDIS_CONNECT_TIMEOUT_MS),
        "redis.connect_timeout_ms",
    )?;
    let command_timeout = non_zero_millis(
        redis
            .command_timeout_ms
            .unwrap_or(DEFAULT_REDIS_COMMAND_TIMEOUT_MS),
        "redis.command_timeout_ms",
    )?;

    Ok(RedisSettings {
        url,
        connect_timeout,
        command_timeout,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let backend = match cache.backend {
        Some(value) => CacheBackend::from_str(&value)
            .map_err(|reason| LoadError::invalid("cache.backend", reason))?,
        None => CacheBackend::Redis,
    };

    let defaults = CacheConfig::default();
    let mut namespaces = defaults.namespaces;
    for (namespace, overrides) in cache.namespaces {
        if namespace.trim().is_empty() {
            return Err(LoadError::invalid(
                "cache.namespaces",
                "namespace names must not be empty",
            ));
        }
        namespaces.insert(namespace, overrides);
    }

    let config = CacheConfig {
        enabled: cache.enabled.unwrap_or(defaults.enabled),
        list_ttl_secs: cache.list_ttl_secs.unwrap_or(defaults.list_ttl_secs),
        point_ttl_secs: cache.point_ttl_secs.unwrap_or(defaults.point_ttl_secs),
        lookup_ttl_secs: cache.lookup_ttl_secs.unwrap_or(defaults.lookup_ttl_secs),
        aggregate_ttl_secs: cache
            .aggregate_ttl_secs
            .unwrap_or(defaults.aggregate_ttl_secs),
        memory_capacity: cache.memory_capacity.unwrap_or(defaults.memory_capacity),
        namespaces,
    };

    Ok(CacheSettings { backend, config })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRedisSettings {
    url: Option<String>,
    connect_timeout_ms: Option<u64>,
    command_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    backend: Option<String>,
    list_ttl_secs: Option<u64>,
    point_ttl_secs: Option<u64>,
    lookup_ttl_secs: Option<u64>,
    aggregate_ttl_secs: Option<u64>,
    memory_capacity: Option<usize>,
    namespaces: HashMap<String, NamespaceTtl>,
}

fn non_zero_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
