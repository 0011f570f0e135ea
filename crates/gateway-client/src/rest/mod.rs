//! REST collaborator seam
//!
//! The gateway client only needs a handful of REST actions: resolving the
//! gateway host and sending DMs to control users. Everything goes through the
//! [`RestExecutor`] trait so tests can record calls instead of hitting HTTP.

mod http;

pub use http::HttpRestExecutor;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Named REST actions used by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RestAction {
    /// `GET /gateway`
    GetGateway,
    /// `POST /users/@me/channels` with `recipient_id`
    CreateDm,
    /// `POST /channels/{channel_id}/messages`
    CreateMessage,
}

impl RestAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GetGateway => "get_gateway",
            Self::CreateDm => "create_dm",
            Self::CreateMessage => "create_message",
        }
    }

    /// Parameters that are part of the path rather than the body
    #[must_use]
    pub const fn path_params(self) -> &'static [&'static str] {
        match self {
            Self::GetGateway | Self::CreateDm => &[],
            Self::CreateMessage => &["channel_id"],
        }
    }
}

impl fmt::Display for RestAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded response of one action
#[derive(Debug, Clone, PartialEq)]
pub struct RestResponse {
    pub status: u16,
    pub body: Value,
}

impl RestResponse {
    #[must_use]
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// String field of the body, e.g. `id` or `url`
    #[must_use]
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.body.get(key).and_then(Value::as_str)
    }
}

/// REST failures
///
/// `RateLimitExceeded` is never retried by the client; callers decide.
#[derive(Debug, Error)]
pub enum RestError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{action} returned status {status}")]
    Status { action: RestAction, status: u16 },

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimitExceeded { retry_after: Option<Duration> },

    #[error("Missing parameter '{param}' for {action}")]
    MissingParam {
        action: RestAction,
        param: &'static str,
    },
}

impl RestError {
    #[must_use]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. })
    }
}

/// Executes a named REST action with a JSON parameter map
#[async_trait]
pub trait RestExecutor: Send + Sync {
    async fn execute(&self, action: RestAction, params: Value) -> Result<RestResponse, RestError>;
}

#[async_trait]
impl<T: RestExecutor + ?Sized> RestExecutor for std::sync::Arc<T> {
    async fn execute(&self, action: RestAction, params: Value) -> Result<RestResponse, RestError> {
        (**self).execute(action, params).await
    }
}
