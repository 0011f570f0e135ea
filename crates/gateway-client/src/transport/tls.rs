//! TLS socket transport
//!
//! Plain `ws://` targets skip TLS so a local gateway can be used in
//! development.

use super::handshake::{build_upgrade_request, check_upgrade_response, find_head_end};
use super::{GatewayTarget, GatewayTransport, Incoming, TransportError};
use crate::codec::{self, CloseNotice, Decoded, FrameHeader, FrameType};
use crate::timing::{HeartbeatTimer, TimerSlot};
use async_trait::async_trait;
use rustls::pki_types::ServerName;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, trace};

const HANDSHAKE_POLL: Duration = Duration::from_millis(100);
const READ_CHUNK: usize = 8 * 1024;

trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// One budget covering TCP connect, TLS handshake and the HTTP upgrade
struct HandshakeClock {
    timer: HeartbeatTimer,
    limit: Duration,
}

impl HandshakeClock {
    fn start(limit: Duration) -> Self {
        let mut timer = HeartbeatTimer::millis();
        timer.start(TimerSlot::Handshake);
        Self { timer, limit }
    }

    /// Drive `step` in short slices, checking the budget between them
    async fn bound<F, T, E>(&self, step: F) -> Result<T, TransportError>
    where
        F: Future<Output = Result<T, E>>,
        TransportError: From<E>,
    {
        tokio::pin!(step);
        loop {
            if self.timer.elapsed_duration(TimerSlot::Handshake) > self.limit {
                return Err(TransportError::HandshakeTimeout(self.limit));
            }
            if let Ok(result) = tokio::time::timeout(HANDSHAKE_POLL, step.as_mut()).await {
                return result.map_err(TransportError::from);
            }
        }
    }
}

pub struct TlsTransport {
    connector: TlsConnector,
    stream: Option<Box<dyn Stream>>,
    /// Bytes read from the socket but not yet consumed as frames
    buffer: Vec<u8>,
    handshake_timeout: Duration,
    max_frame_len: usize,
}

impl TlsTransport {
    /// Inbound frames larger than this are rejected
    pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

    /// Transport trusting the webpki root set
    #[must_use]
    pub fn new(handshake_timeout: Duration) -> Self {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        Self {
            connector: TlsConnector::from(Arc::new(config)),
            stream: None,
            buffer: Vec::with_capacity(READ_CHUNK),
            handshake_timeout,
            max_frame_len: Self::DEFAULT_MAX_FRAME_LEN,
        }
    }

    #[must_use]
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    async fn open_stream(
        connector: TlsConnector,
        target: &GatewayTarget,
        clock: &HandshakeClock,
    ) -> Result<Box<dyn Stream>, TransportError> {
        let tcp = clock
            .bound(TcpStream::connect((target.host.as_str(), target.port)))
            .await?;
        tcp.set_nodelay(true)?;

        if !target.tls {
            return Ok(Box::new(tcp));
        }

        let server_name = ServerName::try_from(target.host.clone())
            .map_err(|e| TransportError::Tls(format!("{}: {e}", target.host)))?;
        let tls = clock.bound(connector.connect(server_name, tcp)).await?;
        Ok(Box::new(tls))
    }

    /// Send the upgrade request and wait for the response head
    ///
    /// Bytes after the head stay in the buffer; the server may send Hello
    /// in the same segment.
    async fn upgrade(
        &mut self,
        stream: &mut Box<dyn Stream>,
        target: &GatewayTarget,
        clock: &HandshakeClock,
    ) -> Result<(), TransportError> {
        let request = build_upgrade_request(target);
        clock.bound(stream.write_all(&request.bytes)).await?;
        clock.bound(stream.flush()).await?;

        let head_end = loop {
            if let Some(end) = find_head_end(&self.buffer) {
                break end;
            }
            if clock.bound(stream.read_buf(&mut self.buffer)).await? == 0 {
                return Err(TransportError::ConnectionClosed);
            }
        };

        let response = check_upgrade_response(&self.buffer[..head_end])?;
        self.buffer.drain(..head_end);
        debug!(status = response.status, leftover = self.buffer.len(), "Upgrade accepted");
        Ok(())
    }

    /// Pop the next complete frame from the buffer, skipping pongs
    fn take_frame(&mut self) -> Result<Option<Incoming>, TransportError> {
        loop {
            let Some(header) = FrameHeader::parse(&self.buffer) else {
                return Ok(None);
            };
            let frame_len = header
                .frame_len()
                .map_err(|_| TransportError::FrameTooLarge(usize::MAX))?;
            if frame_len > self.max_frame_len {
                return Err(TransportError::FrameTooLarge(frame_len));
            }
            if self.buffer.len() < frame_len {
                return Ok(None);
            }

            let bytes: Vec<u8> = self.buffer.drain(..frame_len).collect();
            match codec::decode(&bytes)? {
                Decoded::Close(notice) => return Ok(Some(Incoming::Close(notice))),
                Decoded::Frame(frame) => match frame.frame_type() {
                    Some(FrameType::Text) => {
                        return String::from_utf8(frame.payload)
                            .map(|text| Some(Incoming::Text(text)))
                            .map_err(|_| TransportError::InvalidUtf8);
                    }
                    Some(FrameType::Ping) => return Ok(Some(Incoming::Ping(frame.payload))),
                    _ => trace!(len = frame.payload.len(), "Pong received"),
                },
            }
        }
    }
}

#[async_trait]
impl GatewayTransport for TlsTransport {
    async fn connect(&mut self, target: &GatewayTarget) -> Result<(), TransportError> {
        if self.stream.take().is_some() {
            debug!("Dropping previous connection");
        }
        self.buffer.clear();

        let clock = HandshakeClock::start(self.handshake_timeout);
        let mut stream = Self::open_stream(self.connector.clone(), target, &clock).await?;
        self.upgrade(&mut stream, target, &clock).await?;
        self.stream = Some(stream);

        info!(%target, "Gateway socket connected");
        Ok(())
    }

    async fn read_message(&mut self) -> Result<Incoming, TransportError> {
        loop {
            if let Some(incoming) = self.take_frame()? {
                if matches!(incoming, Incoming::Close(_)) {
                    self.stream = None;
                }
                return Ok(incoming);
            }

            let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
            self.buffer.reserve(READ_CHUNK);
            if stream.read_buf(&mut self.buffer).await? == 0 {
                self.stream = None;
                return Ok(Incoming::Close(CloseNotice::abnormal()));
            }
        }
    }

    async fn send(&mut self, frame_type: FrameType, payload: &[u8]) -> Result<(), TransportError> {
        let frame = codec::encode(payload, frame_type, true)?;
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        stream.write_all(&frame).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn close(&mut self, code: u16) -> Result<(), TransportError> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        self.buffer.clear();

        let frame = codec::encode(&code.to_be_bytes(), FrameType::Close, true)?;
        let written = stream.write_all(&frame).await;
        if let Err(e) = stream.shutdown().await {
            debug!(error = %e, "Socket shutdown failed");
        }
        written?;

        debug!(code, "Close frame sent");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

impl std::fmt::Debug for TlsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsTransport")
            .field("connected", &self.stream.is_some())
            .field("buffered", &self.buffer.len())
            .field("handshake_timeout", &self.handshake_timeout)
            .finish()
    }
}
