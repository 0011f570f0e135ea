//! Gateway socket transport
//!
//! [`GatewayTransport`] is the seam between the runtime loop and the socket.
//! [`TlsTransport`] is the production implementation; tests script their own.

mod handshake;
mod resolver;
mod tls;

pub use handshake::{
    build_upgrade_request, check_upgrade_response, find_head_end, GatewayTarget, UpgradeRequest,
    UpgradeResponse,
};
pub use resolver::GatewayResolver;
pub use tls::TlsTransport;

use crate::codec::{CloseNotice, CodecError, FrameType};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Socket-level failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid gateway URL: {0}")]
    InvalidUrl(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("Frame encoding failed: {0}")]
    Encoding(#[from] CodecError),

    #[error("Inbound frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    #[error("Text frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Not connected")]
    NotConnected,
}

impl TransportError {
    /// Outbound payload could not be framed; the connection must be closed
    #[must_use]
    pub fn is_encoding_overflow(&self) -> bool {
        matches!(self, Self::Encoding(CodecError::PayloadTooLarge { .. }))
    }
}

/// One inbound unit handed to the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// Complete text frame payload
    Text(String),
    /// Close frame, or any frame that is not text/ping/pong
    Close(CloseNotice),
    /// Ping payload to echo back in a pong
    Ping(Vec<u8>),
}

/// Connection to one gateway host
///
/// `read_message` must be cancel-safe: the runtime polls it under a short
/// timeout and a cancelled read must not lose buffered bytes.
#[async_trait]
pub trait GatewayTransport: Send {
    /// Open the socket and complete the upgrade handshake
    async fn connect(&mut self, target: &GatewayTarget) -> Result<(), TransportError>;

    async fn read_message(&mut self) -> Result<Incoming, TransportError>;

    /// Frame and write one payload
    async fn send(&mut self, frame_type: FrameType, payload: &[u8]) -> Result<(), TransportError>;

    /// Send a close frame with `code` and drop the socket
    async fn close(&mut self, code: u16) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;
}
