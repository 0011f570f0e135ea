//! Gateway client configuration
//!
//! Loads configuration from environment variables (and a `.env` file if present).

use gateway_core::{Intents, Snowflake};
use serde::Deserialize;
use std::{env, str::FromStr, time::Duration};

/// Main client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub gateway: GatewaySettings,
    pub reconnect: ReconnectConfig,
    pub rate_limit: RateLimitConfig,
    pub notify: NotifySettings,
    pub close_codes: CloseCodeOverrides,
    pub log: LogSettings,
}

/// Connection and authentication settings
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySettings {
    pub token: String,
    #[serde(default)]
    pub intents: Intents,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Used when the REST lookup of the gateway URL fails
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    #[serde(default = "default_api_version")]
    pub api_version: u8,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Upper bound on one REST call, including notice delivery
    #[serde(default = "default_rest_timeout_ms")]
    pub rest_timeout_ms: u64,
}

impl GatewaySettings {
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    #[must_use]
    pub fn rest_timeout(&self) -> Duration {
        Duration::from_millis(self.rest_timeout_ms)
    }
}

/// Reconnect retry bounds
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_min_ms")]
    pub backoff_min_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_min_ms: default_backoff_min_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

/// Outbound gateway write limit
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit")]
    pub limit: u32,
    #[serde(default = "default_rate_window_ms")]
    pub window_ms: u64,
}

impl RateLimitConfig {
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: default_rate_limit(),
            window_ms: default_rate_window_ms(),
        }
    }
}

/// Who receives operator notices and who may issue control commands
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifySettings {
    #[serde(default)]
    pub control_user_ids: Vec<Snowflake>,
    #[serde(default = "default_notify_on_failure")]
    pub notify_on_failure: bool,
}

impl NotifySettings {
    #[must_use]
    pub fn is_control_user(&self, id: Snowflake) -> bool {
        self.control_user_ids.contains(&id)
    }
}

/// Close codes whose classification differs from the built-in table
///
/// `session_invalid` replaces the built-in session-invalidating set when present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CloseCodeOverrides {
    #[serde(default)]
    pub session_invalid: Option<Vec<u16>>,
    #[serde(default)]
    pub fatal: Vec<u16>,
}

/// Log output settings
#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

// Default value functions
fn default_api_base_url() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_gateway_url() -> String {
    "wss://gateway.discord.gg".to_string()
}

fn default_api_version() -> u8 {
    10
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_rest_timeout_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_min_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    4_000
}

fn default_rate_limit() -> u32 {
    120
}

fn default_rate_window_ms() -> u64 {
    60_000 // 1 minute
}

fn default_notify_on_failure() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ClientConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if `GATEWAY_TOKEN` is missing or a value does not parse
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &'static str| lookup(key).filter(|v| !v.trim().is_empty());

        let token = var("GATEWAY_TOKEN").ok_or(ConfigError::MissingVar("GATEWAY_TOKEN"))?;

        let intents = match var("GATEWAY_INTENTS") {
            Some(raw) => Intents::parse(&raw)
                .map_err(|_| ConfigError::InvalidValue("GATEWAY_INTENTS", raw))?,
            None => Intents::default(),
        };

        let control_user_ids = match var("GATEWAY_CONTROL_USERS") {
            Some(raw) => parse_list::<Snowflake>("GATEWAY_CONTROL_USERS", &raw)?,
            None => Vec::new(),
        };

        let notify_on_failure = match var("GATEWAY_NOTIFY_ON_FAILURE") {
            Some(raw) => parse_bool("GATEWAY_NOTIFY_ON_FAILURE", &raw)?,
            None => default_notify_on_failure(),
        };

        let reconnect = ReconnectConfig {
            max_retries: parse_or("GATEWAY_MAX_RETRIES", var("GATEWAY_MAX_RETRIES"), default_max_retries)?,
            backoff_min_ms: parse_or(
                "GATEWAY_BACKOFF_MIN_MS",
                var("GATEWAY_BACKOFF_MIN_MS"),
                default_backoff_min_ms,
            )?,
            backoff_max_ms: parse_or(
                "GATEWAY_BACKOFF_MAX_MS",
                var("GATEWAY_BACKOFF_MAX_MS"),
                default_backoff_max_ms,
            )?,
        };
        if reconnect.backoff_min_ms > reconnect.backoff_max_ms {
            return Err(ConfigError::InvalidValue(
                "GATEWAY_BACKOFF_MIN_MS",
                format!("{} exceeds maximum {}", reconnect.backoff_min_ms, reconnect.backoff_max_ms),
            ));
        }

        let log_format = match var("LOG_FORMAT") {
            Some(raw) => match raw.trim().to_lowercase().as_str() {
                "pretty" => LogFormat::Pretty,
                "json" => LogFormat::Json,
                _ => return Err(ConfigError::InvalidValue("LOG_FORMAT", raw)),
            },
            None => LogFormat::default(),
        };

        Ok(Self {
            gateway: GatewaySettings {
                token,
                intents,
                api_base_url: var("GATEWAY_API_BASE_URL").unwrap_or_else(default_api_base_url),
                gateway_url: var("GATEWAY_URL").unwrap_or_else(default_gateway_url),
                api_version: parse_or("GATEWAY_API_VERSION", var("GATEWAY_API_VERSION"), default_api_version)?,
                handshake_timeout_ms: parse_or(
                    "GATEWAY_HANDSHAKE_TIMEOUT_MS",
                    var("GATEWAY_HANDSHAKE_TIMEOUT_MS"),
                    default_handshake_timeout_ms,
                )?,
                rest_timeout_ms: parse_or(
                    "GATEWAY_REST_TIMEOUT_MS",
                    var("GATEWAY_REST_TIMEOUT_MS"),
                    default_rest_timeout_ms,
                )?,
            },
            reconnect,
            rate_limit: RateLimitConfig {
                limit: parse_or("GATEWAY_RATE_LIMIT", var("GATEWAY_RATE_LIMIT"), default_rate_limit)?,
                window_ms: parse_or(
                    "GATEWAY_RATE_WINDOW_MS",
                    var("GATEWAY_RATE_WINDOW_MS"),
                    default_rate_window_ms,
                )?,
            },
            notify: NotifySettings {
                control_user_ids,
                notify_on_failure,
            },
            close_codes: CloseCodeOverrides {
                session_invalid: var("GATEWAY_SESSION_INVALID_CODES")
                    .map(|raw| parse_list("GATEWAY_SESSION_INVALID_CODES", &raw))
                    .transpose()?,
                fatal: match var("GATEWAY_FATAL_CODES") {
                    Some(raw) => parse_list("GATEWAY_FATAL_CODES", &raw)?,
                    None => Vec::new(),
                },
            },
            log: LogSettings {
                level: var("LOG_LEVEL").unwrap_or_else(default_log_level),
                format: log_format,
            },
        })
    }
}

fn parse_or<T: FromStr>(
    key: &'static str,
    raw: Option<String>,
    default: fn() -> T,
) -> Result<T, ConfigError> {
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key, raw)),
        None => Ok(default()),
    }
}

fn parse_list<T: FromStr>(key: &'static str, raw: &str) -> Result<Vec<T>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .map_err(|_| ConfigError::InvalidValue(key, s.to_string()))
        })
        .collect()
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue(key, raw.to_string())),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ClientConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ClientConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("GATEWAY_TOKEN", "abc")]).unwrap();

        assert_eq!(config.gateway.token, "abc");
        assert_eq!(config.gateway.intents.bits(), 31_997);
        assert_eq!(config.gateway.api_version, 10);
        assert_eq!(config.gateway.gateway_url, "wss://gateway.discord.gg");
        assert_eq!(config.gateway.handshake_timeout(), Duration::from_secs(10));
        assert_eq!(config.gateway.rest_timeout(), Duration::from_secs(10));
        assert_eq!(config.reconnect.max_retries, 3);
        assert_eq!(config.rate_limit.limit, 120);
        assert_eq!(config.rate_limit.window(), Duration::from_secs(60));
        assert!(config.notify.notify_on_failure);
        assert!(config.notify.control_user_ids.is_empty());
        assert!(config.close_codes.session_invalid.is_none());
        assert_eq!(config.log.format, LogFormat::Pretty);
    }

    #[test]
    fn test_missing_token() {
        let err = config_from(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar("GATEWAY_TOKEN")));

        let err = config_from(&[("GATEWAY_TOKEN", "  ")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar("GATEWAY_TOKEN")));
    }

    #[test]
    fn test_invalid_number() {
        let err = config_from(&[("GATEWAY_TOKEN", "abc"), ("GATEWAY_MAX_RETRIES", "many")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue("GATEWAY_MAX_RETRIES", _)));
    }

    #[test]
    fn test_control_users_and_overrides() {
        let config = config_from(&[
            ("GATEWAY_TOKEN", "abc"),
            ("GATEWAY_CONTROL_USERS", "111, 222,"),
            ("GATEWAY_FATAL_CODES", "4004"),
            ("GATEWAY_SESSION_INVALID_CODES", "4007,4009"),
            ("GATEWAY_NOTIFY_ON_FAILURE", "no"),
            ("LOG_FORMAT", "JSON"),
            ("GATEWAY_REST_TIMEOUT_MS", "2500"),
        ])
        .unwrap();

        assert!(config.notify.is_control_user(Snowflake::new(222)));
        assert!(!config.notify.is_control_user(Snowflake::new(333)));
        assert!(!config.notify.notify_on_failure);
        assert_eq!(config.close_codes.fatal, vec![4004]);
        assert_eq!(config.close_codes.session_invalid, Some(vec![4007, 4009]));
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.gateway.rest_timeout(), Duration::from_millis(2_500));
    }

    #[test]
    fn test_backoff_bounds_checked() {
        let err = config_from(&[
            ("GATEWAY_TOKEN", "abc"),
            ("GATEWAY_BACKOFF_MIN_MS", "5000"),
            ("GATEWAY_BACKOFF_MAX_MS", "100"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue("GATEWAY_BACKOFF_MIN_MS", _)));
    }

    #[test]
    fn test_default_values() {
        assert_eq!(default_api_base_url(), "https://discord.com/api/v10");
        assert_eq!(default_backoff_min_ms(), 1_000);
        assert_eq!(default_backoff_max_ms(), 4_000);
        assert_eq!(default_rate_window_ms(), 60_000);
    }
}
