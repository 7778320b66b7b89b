use std::{net::SocketAddr, time::Duration};

use chrono_tz::Tz;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub gemini: GeminiConfig,
    pub proxy: ProxyConfig,
    pub client: ClientConfig,
    pub capture: CaptureConfig,
    pub map: MapConfig,
    pub directories: DirectoryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub api_base: String,
}

/// Server side of the analysis boundary.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub bind: SocketAddr,
    pub daily_limit: u32,
    /// Day boundary for the quota. `None` means the server's local date.
    pub quota_timezone: Option<Tz>,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub proxy_url: Url,
    pub analysis_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub settle_delay: Duration,
    pub jpeg_quality: u8,
    pub fit_padding: u32,
}

#[derive(Debug, Clone)]
pub struct MapConfig {
    pub tile_url: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub logs_dir: String,
    pub export_dir: String,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for environment variable {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}
