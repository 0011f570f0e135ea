//! HTTP/1.1 upgrade handshake
//!
//! Builds the client upgrade request and checks the server's response. Only
//! the `Connection` header decides success, compared case-insensitively.

use super::TransportError;
use base64::Engine;
use std::fmt;
use url::Url;

/// Where to open the gateway socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayTarget {
    pub host: String,
    pub port: u16,
    /// Request path including the version/encoding query
    pub path: String,
    pub tls: bool,
}

impl GatewayTarget {
    /// Parse a `wss://host[:port]` URL; a bare host is taken as `wss://`
    pub fn parse(raw: &str, api_version: u8) -> Result<Self, TransportError> {
        let raw = raw.trim();
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("wss://{raw}")
        };

        let url = Url::parse(&with_scheme)
            .map_err(|e| TransportError::InvalidUrl(format!("{raw}: {e}")))?;

        let tls = match url.scheme() {
            "wss" => true,
            "ws" => false,
            other => {
                return Err(TransportError::InvalidUrl(format!(
                    "unsupported scheme: {other}"
                )))
            }
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| TransportError::InvalidUrl(format!("{raw}: missing host")))?
            .to_string();
        let port = url
            .port_or_known_default()
            .unwrap_or(if tls { 443 } else { 80 });

        let path = format!("{}?v={api_version}&encoding=json", url.path());

        Ok(Self {
            host,
            port,
            path,
            tls,
        })
    }

    /// Host header value; the port is omitted when it is the scheme default
    #[must_use]
    pub fn host_header(&self) -> String {
        let default_port = if self.tls { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    #[must_use]
    pub fn origin(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}", self.host_header())
    }
}

impl fmt::Display for GatewayTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls { "wss" } else { "ws" };
        write!(f, "{scheme}://{}{}", self.host_header(), self.path)
    }
}

/// Serialized upgrade request and the key it carries
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    pub key: String,
    pub bytes: Vec<u8>,
}

/// Build the upgrade request with a fresh random key
#[must_use]
pub fn build_upgrade_request(target: &GatewayTarget) -> UpgradeRequest {
    let key = base64::engine::general_purpose::STANDARD.encode(rand::random::<[u8; 16]>());
    let request = format!(
        "GET {} HTTP/1.1\r\n\
         Host: {}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Origin: {}\r\n\
         Sec-WebSocket-Key: {}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n",
        target.path,
        target.host_header(),
        target.origin(),
        key
    );

    UpgradeRequest {
        key,
        bytes: request.into_bytes(),
    }
}

/// Parsed status line and headers of the upgrade response
#[derive(Debug, Clone)]
pub struct UpgradeResponse {
    pub status: u16,
    /// Header names lowercased
    headers: Vec<(String, String)>,
}

impl UpgradeResponse {
    pub fn parse(raw: &[u8]) -> Result<Self, TransportError> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| TransportError::HandshakeRejected("response is not UTF-8".into()))?;
        let mut lines = text.lines();

        let status_line = lines
            .next()
            .ok_or_else(|| TransportError::HandshakeRejected("empty response".into()))?;
        let status = status_line
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse().ok())
            .ok_or_else(|| {
                TransportError::HandshakeRejected(format!("bad status line: {status_line}"))
            })?;

        let headers = lines
            .take_while(|line| !line.is_empty())
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
            .collect();

        Ok(Self { status, headers })
    }

    /// Header value by case-insensitive name
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Succeeds iff the `Connection` header contains `upgrade` in any case
pub fn check_upgrade_response(raw: &[u8]) -> Result<UpgradeResponse, TransportError> {
    let response = UpgradeResponse::parse(raw)?;

    let connection = response.header("connection").ok_or_else(|| {
        TransportError::HandshakeRejected(format!(
            "status {} without Connection header",
            response.status
        ))
    })?;

    if !connection.to_ascii_lowercase().contains("upgrade") {
        return Err(TransportError::HandshakeRejected(format!(
            "status {}, Connection: {connection}",
            response.status
        )));
    }

    Ok(response)
}

/// Offset just past the blank line ending the response head
#[must_use]
pub fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}
