//! # gateway-common
//!
//! Shared utilities including configuration, error handling, and telemetry.

pub mod config;
pub mod error;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use config::{
    ClientConfig, CloseCodeOverrides, ConfigError, GatewaySettings, LogFormat, LogSettings,
    NotifySettings, RateLimitConfig, ReconnectConfig,
};
pub use error::{AppError, AppResult, ErrorReport};
pub use telemetry::{try_init_tracing, try_init_tracing_with_config, TracingConfig, TracingError};
