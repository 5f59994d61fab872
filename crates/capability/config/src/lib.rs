//! 应用运行配置加载。

mod definitions;

use std::env;
use std::time::Duration;

pub use definitions::{
    ChannelDefinition, PointDefinition, load_channel_definitions, load_point_definitions,
    parse_channel_definitions, parse_point_definitions,
};

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
    #[error("cannot read {0}: {1}")]
    Read(String, String),
    #[error("invalid point definitions: {0}")]
    Points(String),
}

/// 应用运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_addr: String,
    pub http_enabled: bool,
    pub channels_file: String,
    pub points_file: Option<String>,
    pub batch_window_ms: u64,
    pub disconnected_backoff_ms: u64,
    pub in_flight_timeout_ms: Option<u64>,
    pub pipeline_batch_size: usize,
    pub pipeline_dedup_cache_size: usize,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let channels_file = env::var("EMS_CHANNELS_FILE")
            .map_err(|_| ConfigError::Missing("EMS_CHANNELS_FILE".to_string()))?;
        let points_file = read_optional("EMS_POINTS_FILE");
        let http_addr = env::var("EMS_HTTP_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let http_enabled = read_bool_with_default("EMS_HTTP_ENABLED", true);
        let batch_window_ms = read_u64_with_default("EMS_BATCH_WINDOW_MS", 50)?;
        let disconnected_backoff_ms = read_u64_with_default("EMS_DISCONNECTED_BACKOFF_MS", 1000)?;
        let in_flight_timeout_ms =
            read_optional_u64("EMS_IN_FLIGHT_TIMEOUT_MS")?.filter(|value| *value > 0);
        let pipeline_batch_size = read_usize_with_default("EMS_PIPELINE_BATCH_SIZE", 100)?;
        let pipeline_dedup_cache_size =
            read_usize_with_default("EMS_PIPELINE_DEDUP_CACHE_SIZE", 10_000)?;

        Ok(Self {
            http_addr,
            http_enabled,
            channels_file,
            points_file,
            batch_window_ms,
            disconnected_backoff_ms,
            in_flight_timeout_ms,
            pipeline_batch_size,
            pipeline_dedup_cache_size,
        })
    }

    pub fn disconnected_backoff(&self) -> Duration {
        Duration::from_millis(self.disconnected_backoff_ms)
    }

    pub fn in_flight_timeout(&self) -> Option<Duration> {
        self.in_flight_timeout_ms.map(Duration::from_millis)
    }
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_usize_with_default(key: &str, default: usize) -> Result<usize, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    match value.parse::<usize>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(ConfigError::Invalid(key.to_string(), value)),
    }
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_optional_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match env::var(key) {
        Ok(value) if value.is_empty() => Ok(None),
        Ok(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(key.to_string(), value)),
        Err(_) => Ok(None),
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}
