use std::{env, str::FromStr, time::Duration};

use chrono_tz::Tz;
use url::Url;

use super::env::{
    AppConfig, CaptureConfig, ClientConfig, ConfigError, DirectoryConfig, GeminiConfig,
    LoggingConfig, MapConfig, ProxyConfig,
};

const DEFAULT_TILE_URL: &str =
    "https://server.arcgisonline.com/ArcGIS/rest/services/World_Imagery/MapServer/tile/{z}/{y}/{x}";

pub fn load_config() -> Result<AppConfig, ConfigError> {
    AppConfig::from_env()
}

impl AppConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let gemini = GeminiConfig {
            api_key: env::var("GEMINI_API_KEY").ok().filter(|v| !v.is_empty()),
            model: env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.5-flash".to_string()),
            api_base: env::var("GEMINI_API_BASE").unwrap_or_else(|_| {
                "https://generativelanguage.googleapis.com/v1beta".to_string()
            }),
        };

        let bind_raw = env::var("PROXY_BIND").unwrap_or_else(|_| "127.0.0.1:8787".to_string());
        let bind = bind_raw.parse().map_err(|err: std::net::AddrParseError| {
            ConfigError::Invalid {
                key: "PROXY_BIND",
                value: bind_raw.clone(),
                reason: err.to_string(),
            }
        })?;

        let quota_timezone = match env::var("QUOTA_TIMEZONE").ok().filter(|v| !v.is_empty()) {
            Some(raw) => Some(raw.parse::<Tz>().map_err(|err| ConfigError::Invalid {
                key: "QUOTA_TIMEZONE",
                value: raw.clone(),
                reason: err.to_string(),
            })?),
            None => None,
        };

        let proxy = ProxyConfig {
            bind,
            daily_limit: parse_env("DAILY_ANALYSIS_LIMIT").unwrap_or(50),
            quota_timezone,
        };

        let proxy_url_raw = env::var("PROXY_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8787/api/analyze".to_string());
        let proxy_url = Url::parse(&proxy_url_raw).map_err(|err| ConfigError::Invalid {
            key: "PROXY_URL",
            value: proxy_url_raw.clone(),
            reason: err.to_string(),
        })?;

        let client = ClientConfig {
            proxy_url,
            analysis_timeout: Duration::from_millis(
                parse_env("ANALYSIS_TIMEOUT_MS").unwrap_or(90_000),
            ),
        };

        let capture = CaptureConfig {
            settle_delay: Duration::from_millis(parse_env("CAPTURE_SETTLE_MS").unwrap_or(1_500)),
            jpeg_quality: parse_env::<u8>("CAPTURE_JPEG_QUALITY")
                .unwrap_or(80)
                .clamp(1, 100),
            fit_padding: parse_env("CAPTURE_FIT_PADDING").unwrap_or(10),
        };

        let map = MapConfig {
            tile_url: env::var("MAP_TILE_URL").unwrap_or_else(|_| DEFAULT_TILE_URL.to_string()),
            viewport_width: parse_env("MAP_VIEWPORT_WIDTH").unwrap_or(1024),
            viewport_height: parse_env("MAP_VIEWPORT_HEIGHT").unwrap_or(768),
        };

        let directories = DirectoryConfig {
            logs_dir: env::var("LOGS_DIR").unwrap_or_else(|_| "logs".to_string()),
            export_dir: env::var("EXPORT_DIR").unwrap_or_else(|_| "exports".to_string()),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        };

        Ok(Self {
            gemini,
            proxy,
            client,
            capture,
            map,
            directories,
            logging,
        })
    }
}

fn parse_env<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|value| value.trim().parse::<T>().ok())
}
