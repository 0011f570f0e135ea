//! Configuration structs

mod client_config;

pub use client_config::{
    ClientConfig, CloseCodeOverrides, ConfigError, GatewaySettings, LogFormat, LogSettings,
    NotifySettings, RateLimitConfig, ReconnectConfig,
};
