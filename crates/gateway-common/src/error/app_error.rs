//! Application error types
//!
//! Top-level error surfaced by the binary's composition root.

use crate::config::ConfigError;
use crate::telemetry::TracingError;
use serde::Serialize;
use std::fmt;

/// Application-wide error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Startup errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tracing(#[from] TracingError),

    // Gateway errors
    #[error("Gateway connection failed: {0}")]
    Connection(String),

    #[error("Gateway session ended: {0}")]
    SessionEnded(String),
}

impl AppError {
    /// Get a stable error code for logs and notices
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Tracing(_) => "TRACING_ERROR",
            Self::Connection(_) => "CONNECTION_ERROR",
            Self::SessionEnded(_) => "SESSION_ENDED",
        }
    }

    /// Check if the error happened before the gateway was contacted
    #[must_use]
    pub fn is_startup_error(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Tracing(_))
    }

    /// Create a connection error
    #[must_use]
    pub fn connection(msg: impl fmt::Display) -> Self {
        Self::Connection(msg.to_string())
    }

    /// Create a session-ended error
    #[must_use]
    pub fn session_ended(reason: impl fmt::Display) -> Self {
        Self::SessionEnded(reason.to_string())
    }
}

/// Serializable error summary, used in failure notices
#[derive(Debug, Serialize)]
pub struct ErrorReport {
    pub code: String,
    pub message: String,
}

impl From<&AppError> for ErrorReport {
    fn from(err: &AppError) -> Self {
        Self {
            code: err.error_code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
