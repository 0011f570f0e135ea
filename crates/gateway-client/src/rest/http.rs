//! reqwest-backed REST executor

use super::{RestAction, RestError, RestExecutor, RestResponse};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

const RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATELIMIT_RESET_AFTER: &str = "x-ratelimit-reset-after";

/// Executes actions against the HTTP API with bot authentication
#[derive(Debug, Clone)]
pub struct HttpRestExecutor {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpRestExecutor {
    /// `base_url` already carries the API version, e.g. `https://discord.com/api/v10`
    ///
    /// Every request, body included, must finish within `timeout`.
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RestError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(http, base_url, token))
    }

    #[must_use]
    pub fn with_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl RestExecutor for HttpRestExecutor {
    async fn execute(&self, action: RestAction, params: Value) -> Result<RestResponse, RestError> {
        let (method, path, body) = build_request(action, params)?;
        let url = format!("{}{}", self.base_url, path);
        debug!(%action, %method, %url, "REST request");

        let mut request = self
            .http
            .request(method, &url)
            .header(AUTHORIZATION, format!("Bot {}", self.token));
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();

        if let Some(retry_after) = rate_limited(status, response.headers()) {
            warn!(%action, retry_after = ?retry_after, "REST rate limit exhausted");
            return Err(RestError::RateLimitExceeded { retry_after });
        }

        if !status.is_success() {
            return Err(RestError::Status {
                action,
                status: status.as_u16(),
            });
        }

        let text = response.text().await?;
        let body = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(RestResponse::new(status.as_u16(), body))
    }
}

/// Method, path and optional JSON body for an action
fn build_request(
    action: RestAction,
    params: Value,
) -> Result<(Method, String, Option<Value>), RestError> {
    let mut params = match params {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    match action {
        RestAction::GetGateway => Ok((Method::GET, "/gateway".to_string(), None)),
        RestAction::CreateDm => {
            if !params.contains_key("recipient_id") {
                return Err(RestError::MissingParam {
                    action,
                    param: "recipient_id",
                });
            }
            Ok((
                Method::POST,
                "/users/@me/channels".to_string(),
                Some(Value::Object(params)),
            ))
        }
        RestAction::CreateMessage => {
            let channel_id = take_id(&mut params, "channel_id").ok_or(RestError::MissingParam {
                action,
                param: "channel_id",
            })?;
            Ok((
                Method::POST,
                format!("/channels/{channel_id}/messages"),
                Some(Value::Object(params)),
            ))
        }
    }
}

/// Remove a path parameter given as a string or number
fn take_id(params: &mut Map<String, Value>, key: &str) -> Option<String> {
    match params.remove(key)? {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `Some(retry_after)` when the response signals an exhausted bucket
fn rate_limited(status: StatusCode, headers: &HeaderMap) -> Option<Option<Duration>> {
    let exhausted = headers
        .get(RATELIMIT_REMAINING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0");

    if status != StatusCode::TOO_MANY_REQUESTS && !exhausted {
        return None;
    }

    Some(parse_retry_after(headers))
}

/// Retry delay from `Retry-After` or the bucket reset header (seconds, may be fractional)
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    [RETRY_AFTER.as_str(), RATELIMIT_RESET_AFTER]
        .iter()
        .filter_map(|name| headers.get(*name)?.to_str().ok())
        .find_map(|raw| raw.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}
