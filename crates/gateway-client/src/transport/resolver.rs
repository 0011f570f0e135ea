//! Gateway host resolution

use super::{GatewayTarget, TransportError};
use crate::rest::{RestAction, RestExecutor};
use serde_json::Value;
use tracing::{debug, warn};

/// Asks the REST API for the gateway URL, falling back to a configured one
#[derive(Debug, Clone)]
pub struct GatewayResolver {
    fallback_url: String,
    api_version: u8,
}

impl GatewayResolver {
    #[must_use]
    pub fn new(fallback_url: impl Into<String>, api_version: u8) -> Self {
        Self {
            fallback_url: fallback_url.into(),
            api_version,
        }
    }

    #[must_use]
    pub fn api_version(&self) -> u8 {
        self.api_version
    }

    /// Parse a URL with this resolver's API version
    pub fn target(&self, url: &str) -> Result<GatewayTarget, TransportError> {
        GatewayTarget::parse(url, self.api_version)
    }

    /// Resolve a fresh target via `GET /gateway`
    ///
    /// Any REST failure or unusable URL falls back to the configured URL.
    pub async fn resolve<R>(&self, rest: &R) -> Result<GatewayTarget, TransportError>
    where
        R: RestExecutor + ?Sized,
    {
        match rest.execute(RestAction::GetGateway, Value::Null).await {
            Ok(response) => match response.str_field("url").map(|url| self.target(url)) {
                Some(Ok(target)) => {
                    debug!(%target, "Gateway resolved");
                    return Ok(target);
                }
                Some(Err(e)) => warn!(error = %e, "Resolved gateway URL is unusable"),
                None => warn!(status = response.status, "Gateway response has no url"),
            },
            Err(e) => warn!(error = %e, "Gateway lookup failed, using configured URL"),
        }

        self.target(&self.fallback_url)
    }
}
