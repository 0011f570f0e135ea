//! Test doubles for the transport and REST seams
//!
//! Both doubles keep their state behind an `Arc`, so a test holds a clone
//! for inspection after the double has moved into the client.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use gateway_client::codec::{self, CloseNotice, Decoded, FrameHeader, FrameType};
use gateway_client::rest::{RestAction, RestError, RestExecutor, RestResponse};
use gateway_client::session::Backoff;
use gateway_client::transport::{
    find_head_end, GatewayTarget, GatewayTransport, Incoming, TransportError,
};
use gateway_client::GatewayClient;
use gateway_common::ClientConfig;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::fixtures::CONTROL_USER_ID;

pub const GATEWAY_URL: &str = "wss://gateway.test";

/// One connection's worth of inbound messages
pub type Script = Vec<Incoming>;

#[derive(Debug, Default)]
struct TransportLog {
    scripts: VecDeque<Script>,
    current: VecDeque<Incoming>,
    failing_connects: usize,
    connects: Vec<String>,
    /// Text payloads written, tagged with the connection index
    sent: Vec<(usize, Value)>,
    pongs: usize,
    closes: Vec<u16>,
    connected: bool,
}

/// Transport that replays one script per connection
///
/// Once a script runs dry, reads pend forever so the runtime's poll timeout
/// fires and the paused clock advances.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    log: Arc<Mutex<TransportLog>>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<Script>) -> Self {
        let transport = Self::default();
        transport.log.lock().scripts = scripts.into();
        transport
    }

    /// Fail the next `count` connect calls
    pub fn fail_next_connects(&self, count: usize) {
        self.log.lock().failing_connects = count;
    }

    /// Targets of every successful connect, in order
    pub fn connects(&self) -> Vec<String> {
        self.log.lock().connects.clone()
    }

    /// Text payloads sent on connection `index` (0-based)
    pub fn sent_on(&self, index: usize) -> Vec<Value> {
        self.log
            .lock()
            .sent
            .iter()
            .filter(|(conn, _)| *conn == index)
            .map(|(_, value)| value.clone())
            .collect()
    }

    /// Opcodes of every text payload sent
    pub fn sent_ops(&self) -> Vec<u64> {
        self.log
            .lock()
            .sent
            .iter()
            .filter_map(|(_, value)| value["op"].as_u64())
            .collect()
    }

    pub fn pongs(&self) -> usize {
        self.log.lock().pongs
    }

    pub fn closes(&self) -> Vec<u16> {
        self.log.lock().closes.clone()
    }
}

#[async_trait]
impl GatewayTransport for ScriptedTransport {
    async fn connect(&mut self, target: &GatewayTarget) -> Result<(), TransportError> {
        let mut log = self.log.lock();
        if log.failing_connects > 0 {
            log.failing_connects -= 1;
            return Err(TransportError::HandshakeRejected("status 502".into()));
        }

        log.connects.push(target.to_string());
        log.current = log.scripts.pop_front().unwrap_or_default().into();
        log.connected = true;
        Ok(())
    }

    async fn read_message(&mut self) -> Result<Incoming, TransportError> {
        let next = self.log.lock().current.pop_front();
        match next {
            Some(message) => Ok(message),
            None => std::future::pending().await,
        }
    }

    async fn send(&mut self, frame_type: FrameType, payload: &[u8]) -> Result<(), TransportError> {
        let mut log = self.log.lock();
        if !log.connected {
            return Err(TransportError::NotConnected);
        }
        match frame_type {
            FrameType::Text => {
                let value = serde_json::from_slice(payload).map_err(std::io::Error::from)?;
                let index = log.connects.len().saturating_sub(1);
                log.sent.push((index, value));
            }
            FrameType::Pong => log.pongs += 1,
            FrameType::Ping | FrameType::Close => {}
        }
        Ok(())
    }

    async fn close(&mut self, code: u16) -> Result<(), TransportError> {
        let mut log = self.log.lock();
        log.closes.push(code);
        log.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.log.lock().connected
    }
}

/// REST double answering gateway lookups and DM delivery
#[derive(Debug, Clone)]
pub struct RecordingRest {
    gateway_url: String,
    calls: Arc<Mutex<Vec<(RestAction, Value)>>>,
}

impl RecordingRest {
    pub fn new(gateway_url: impl Into<String>) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Vec<(RestAction, Value)> {
        self.calls.lock().clone()
    }

    /// `content` of every message posted
    pub fn messages(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|(action, _)| *action == RestAction::CreateMessage)
            .filter_map(|(_, body)| body["content"].as_str().map(str::to_string))
            .collect()
    }
}

impl Default for RecordingRest {
    fn default() -> Self {
        Self::new(GATEWAY_URL)
    }
}

#[async_trait]
impl RestExecutor for RecordingRest {
    async fn execute(&self, action: RestAction, params: Value) -> Result<RestResponse, RestError> {
        self.calls.lock().push((action, params.clone()));
        let body = match action {
            RestAction::GetGateway => json!({"url": self.gateway_url}),
            RestAction::CreateDm => json!({"id": format!("dm-{}", params["recipient_id"].as_str().unwrap_or_default())}),
            RestAction::CreateMessage => json!({"id": "1"}),
        };
        Ok(RestResponse::new(200, body))
    }
}

/// Client configuration from a set of environment-style overrides
pub fn test_config(overrides: &[(&str, &str)]) -> ClientConfig {
    let mut vars: HashMap<String, String> = HashMap::from([
        ("GATEWAY_TOKEN".to_string(), "test-token".to_string()),
        ("GATEWAY_CONTROL_USERS".to_string(), CONTROL_USER_ID.to_string()),
    ]);
    for (key, value) in overrides {
        vars.insert((*key).to_string(), (*value).to_string());
    }

    ClientConfig::from_lookup(|key| vars.get(key).cloned()).expect("test config is valid")
}

/// Client over scripted doubles with no reconnect delay
pub fn scripted_client(
    config: ClientConfig,
    transport: &ScriptedTransport,
    rest: &RecordingRest,
) -> GatewayClient<ScriptedTransport, RecordingRest> {
    GatewayClient::new(config, transport.clone(), rest.clone()).with_backoff(Backoff::none())
}

const ACCEPT: &[u8] =
    b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n";

/// Minimal gateway server on a local port, speaking plain `ws://`
pub struct FakeGateway {
    listener: TcpListener,
}

impl FakeGateway {
    pub async fn bind() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        Ok(Self { listener })
    }

    pub fn url(&self) -> Result<String> {
        Ok(format!("ws://{}", self.listener.local_addr()?))
    }

    /// Accept one client and complete the upgrade
    pub async fn accept(&self) -> Result<GatewayPeer> {
        let (mut socket, _) = self.listener.accept().await?;

        let mut head = Vec::new();
        while find_head_end(&head).is_none() {
            let mut chunk = [0u8; 512];
            let n = socket.read(&mut chunk).await?;
            anyhow::ensure!(n > 0, "client closed during upgrade");
            head.extend_from_slice(&chunk[..n]);
        }
        socket.write_all(ACCEPT).await?;

        Ok(GatewayPeer {
            socket,
            buffer: Vec::new(),
            request: String::from_utf8_lossy(&head).into_owned(),
        })
    }
}

/// What the server side read from the client
#[derive(Debug, Clone, PartialEq)]
pub enum PeerFrame {
    Text(Value),
    Close(CloseNotice),
    Other(u8),
}

/// Server side of one upgraded connection
pub struct GatewayPeer {
    socket: TcpStream,
    buffer: Vec<u8>,
    /// Raw upgrade request head
    pub request: String,
}

impl GatewayPeer {
    pub async fn send_json(&mut self, value: &Value) -> Result<()> {
        let frame = codec::encode(value.to_string().as_bytes(), FrameType::Text, false)?;
        self.socket.write_all(&frame).await?;
        Ok(())
    }

    pub async fn send_close(&mut self, code: u16) -> Result<()> {
        let frame = codec::encode(&code.to_be_bytes(), FrameType::Close, false)?;
        self.socket.write_all(&frame).await?;
        Ok(())
    }

    /// Read the next complete frame
    pub async fn recv(&mut self) -> Result<PeerFrame> {
        loop {
            if let Some(header) = FrameHeader::parse(&self.buffer) {
                let len = header.frame_len()?;
                if self.buffer.len() >= len {
                    let frame: Vec<u8> = self.buffer.drain(..len).collect();
                    anyhow::ensure!(header.masked, "client frames must be masked");
                    return Ok(match codec::decode(&frame)? {
                        Decoded::Close(notice) => PeerFrame::Close(notice),
                        Decoded::Frame(decoded) if decoded.frame_type() == Some(FrameType::Text) => {
                            PeerFrame::Text(serde_json::from_slice(&decoded.payload)?)
                        }
                        Decoded::Frame(decoded) => PeerFrame::Other(decoded.opcode),
                    });
                }
            }

            let mut chunk = [0u8; 4096];
            let n = self.socket.read(&mut chunk).await?;
            anyhow::ensure!(n > 0, "client closed the socket");
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    /// Read frames until a text frame arrives
    pub async fn recv_json(&mut self) -> Result<Value> {
        loop {
            match self.recv().await? {
                PeerFrame::Text(value) => return Ok(value),
                PeerFrame::Close(notice) => anyhow::bail!("unexpected close {notice}"),
                PeerFrame::Other(_) => {}
            }
        }
    }
}
