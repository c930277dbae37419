//! Realtime transports.
//!
//! A [`Connector`] opens one [`TransportLink`] per connection attempt. The
//! link has already completed the server handshake when it is handed out,
//! so it always knows its session id.
//!
//! - [`WebSocketConnector`]: primary transport over a WebSocket
//! - [`SseConnector`]: Server-Sent Events downstream, HTTP POST upstream
//! - [`FallbackConnector`]: tries a list of connectors in order
//!
//! Every message in either direction is a [`Frame`]: `{"event": ..., "data": ...}`.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, COOKIE};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use crate::bus::{EVENT_AUTHENTICATE, EVENT_CONNECT, EVENT_USER_ACTIVITY};
use crate::config::{SyncConfig, TransportKind};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
    #[error("transport closed")]
    Closed,
    #[error("invalid transport configuration: {0}")]
    Config(String),
    #[error("all transports failed: {0}")]
    Exhausted(String),
}

impl TransportError {
    pub fn connection(err: impl std::fmt::Display) -> Self {
        Self::Connection(err.to_string())
    }
}

// ============================================================================
// Wire frame
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn authenticate(user_id: &str) -> Self {
        Self::new(EVENT_AUTHENTICATE, Value::String(user_id.to_string()))
    }

    pub fn user_activity(user_id: &str) -> Self {
        Self::new(EVENT_USER_ACTIVITY, Value::String(user_id.to_string()))
    }

    pub fn parse(text: &str) -> Result<Self, TransportError> {
        serde_json::from_str(text).map_err(|e| TransportError::InvalidFrame(e.to_string()))
    }

    pub fn to_text(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|e| TransportError::InvalidFrame(e.to_string()))
    }

    /// Session id carried by the server's `connect` frame.
    fn session_id(&self) -> Result<String, TransportError> {
        if self.event != EVENT_CONNECT {
            return Err(TransportError::Handshake(format!(
                "expected '{EVENT_CONNECT}' frame, got '{}'",
                self.event
            )));
        }
        self.data
            .get("sid")
            .and_then(Value::as_str)
            .filter(|sid| !sid.is_empty())
            .map(str::to_string)
            .ok_or_else(|| TransportError::Handshake("connect frame without sid".to_string()))
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Opens transport links. Implementations are reused across reconnects.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn TransportLink>, TransportError>;
}

/// One established, handshaken connection.
///
/// `next_frame` must be cancel-safe: the connection driver polls it inside
/// `tokio::select!` alongside its command channel.
#[async_trait]
pub trait TransportLink: Send {
    fn kind(&self) -> TransportKind;

    fn session_id(&self) -> &str;

    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError>;

    /// Next inbound frame, or `None` once the server closed the connection.
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Build the connector chain described by `config.transports`.
pub fn connector_from_config(config: &SyncConfig) -> Result<Arc<dyn Connector>, TransportError> {
    let mut connectors: Vec<(TransportKind, Box<dyn Connector>)> = Vec::new();
    for kind in &config.transports {
        let connector: Box<dyn Connector> = match kind {
            TransportKind::WebSocket => Box::new(WebSocketConnector::from_config(config)),
            TransportKind::Sse => Box::new(SseConnector::from_config(config)?),
        };
        connectors.push((*kind, connector));
    }

    match connectors.len() {
        0 => Err(TransportError::Config(
            "no transports configured".to_string(),
        )),
        1 => {
            let (_, connector) = connectors.remove(0);
            Ok(Arc::from(connector))
        }
        _ => Ok(Arc::new(FallbackConnector::new(connectors))),
    }
}

// ============================================================================
// WebSocket transport
// ============================================================================

pub struct WebSocketConnector {
    url: String,
    cookie: Option<String>,
    handshake_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>, cookie: Option<String>, handshake_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            cookie,
            handshake_timeout,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.websocket_url(),
            config.session_cookie.clone(),
            config.handshake_timeout(),
        )
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn TransportLink>, TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Config(format!("invalid url '{}': {e}", self.url)))?;
        if let Some(cookie) = &self.cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| TransportError::Config(format!("invalid session cookie: {e}")))?;
            request.headers_mut().insert(COOKIE, value);
        }

        debug!(url = %self.url, "opening websocket");
        let (stream, _response) =
            timeout(self.handshake_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| TransportError::HandshakeTimeout(self.handshake_timeout))?
                .map_err(TransportError::connection)?;

        let mut link = WebSocketLink {
            stream,
            session_id: String::new(),
        };
        let first = timeout(self.handshake_timeout, link.next_frame())
            .await
            .map_err(|_| TransportError::HandshakeTimeout(self.handshake_timeout))?
            .ok_or_else(|| TransportError::Handshake("closed before connect frame".to_string()))??;
        link.session_id = first.session_id()?;

        info!(url = %self.url, session_id = %link.session_id, "websocket handshake complete");
        Ok(Box::new(link))
    }
}

pub struct WebSocketLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    session_id: String,
}

#[async_trait]
impl TransportLink for WebSocketLink {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let text = frame.to_text()?;
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(TransportError::connection)
    }

    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            // Pings are answered by tungstenite on the next read/flush.
            match self.stream.next().await? {
                Ok(Message::Text(text)) => {
                    trace!(len = text.len(), "websocket frame");
                    return Some(Frame::parse(text.as_str()));
                }
                Ok(Message::Close(close)) => {
                    debug!(?close, "websocket closed by server");
                    return None;
                }
                Ok(Message::Binary(bytes)) => {
                    debug!(len = bytes.len(), "ignoring binary websocket message");
                }
                Ok(_) => {}
                Err(e) => return Some(Err(TransportError::connection(e))),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.stream.close(None).await {
            Ok(()) => Ok(()),
            Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed)
            | Err(tokio_tungstenite::tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::connection(e)),
        }
    }
}

// ============================================================================
// SSE transport
// ============================================================================

/// One parsed Server-Sent Events block.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event_type: String,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

impl SseEvent {
    /// Parse a block of lines. Returns `None` for comment-only or empty
    /// blocks (keep-alives).
    pub fn parse(block: &str) -> Option<Self> {
        let mut event_type = "message".to_string();
        let mut data = String::new();
        let mut has_data = false;
        let mut id = None;
        let mut retry = None;

        for line in block.lines() {
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let (key, value) = match line.split_once(':') {
                Some((key, value)) => (key, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match key {
                "event" => event_type = value.to_string(),
                "data" => {
                    if has_data {
                        data.push('\n');
                    }
                    data.push_str(value);
                    has_data = true;
                }
                "id" => id = Some(value.to_string()),
                "retry" => retry = value.parse::<u64>().ok(),
                other => trace!(field = other, "unknown SSE field"),
            }
        }

        has_data.then_some(Self {
            event_type,
            data,
            id,
            retry,
        })
    }

    /// Non-JSON data is passed through as a string value.
    pub fn into_frame(self) -> Frame {
        let data = serde_json::from_str(&self.data).unwrap_or(Value::String(self.data));
        Frame::new(self.event_type, data)
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, TransportError>> + Send>>;

pub struct SseConnector {
    client: reqwest::Client,
    events_url: String,
    emit_url: String,
    cookie: Option<String>,
    handshake_timeout: Duration,
    request_timeout: Duration,
    last_event_id: Arc<Mutex<Option<String>>>,
}

impl SseConnector {
    pub fn new(
        events_url: impl Into<String>,
        emit_url: impl Into<String>,
        cookie: Option<String>,
        handshake_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        // No overall timeout: the event stream is long-lived.
        let client = reqwest::Client::builder()
            .connect_timeout(handshake_timeout)
            .pool_max_idle_per_host(1)
            .build()
            .map_err(|e| TransportError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            events_url: events_url.into(),
            emit_url: emit_url.into(),
            cookie,
            handshake_timeout,
            request_timeout,
            last_event_id: Arc::new(Mutex::new(None)),
        })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self, TransportError> {
        Self::new(
            config.events_url(),
            config.emit_url(),
            config.session_cookie.clone(),
            config.handshake_timeout(),
            config.request_timeout(),
        )
    }

    fn last_event_id(&self) -> Option<String> {
        self.last_event_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Connector for SseConnector {
    async fn connect(&self) -> Result<Box<dyn TransportLink>, TransportError> {
        let mut request = self
            .client
            .get(&self.events_url)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(cookie) = &self.cookie {
            request = request.header(reqwest::header::COOKIE, cookie);
        }
        if let Some(last_id) = self.last_event_id() {
            request = request.header("Last-Event-ID", last_id);
        }

        debug!(url = %self.events_url, "opening event stream");
        let response = timeout(self.handshake_timeout, request.send())
            .await
            .map_err(|_| TransportError::HandshakeTimeout(self.handshake_timeout))?
            .map_err(TransportError::connection)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Http {
                status: status.as_u16(),
                message: body,
            });
        }

        let body: ByteStream = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(TransportError::connection)),
        );
        let mut link = SseLink {
            client: self.client.clone(),
            emit_url: self.emit_url.clone(),
            cookie: self.cookie.clone(),
            request_timeout: self.request_timeout,
            body,
            undecoded: Vec::new(),
            buffer: String::new(),
            session_id: String::new(),
            last_event_id: self.last_event_id.clone(),
        };

        let first = timeout(self.handshake_timeout, link.next_frame())
            .await
            .map_err(|_| TransportError::HandshakeTimeout(self.handshake_timeout))?
            .ok_or_else(|| TransportError::Handshake("stream ended before connect frame".to_string()))??;
        link.session_id = first.session_id()?;

        info!(url = %self.events_url, session_id = %link.session_id, "event stream handshake complete");
        Ok(Box::new(link))
    }
}

pub struct SseLink {
    client: reqwest::Client,
    emit_url: String,
    cookie: Option<String>,
    request_timeout: Duration,
    body: ByteStream,
    undecoded: Vec<u8>,
    buffer: String,
    session_id: String,
    last_event_id: Arc<Mutex<Option<String>>>,
}

impl SseLink {
    /// Pop one complete block (terminated by a blank line) off the buffer.
    fn take_block(&mut self) -> Option<String> {
        let end = self.buffer.find("\n\n")?;
        let block = self.buffer[..end].to_string();
        self.buffer.drain(..end + 2);
        Some(block)
    }

    fn remember_event_id(&self, id: &str) {
        *self.last_event_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(id.to_string());
    }
}

#[async_trait]
impl TransportLink for SseLink {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let mut request = self
            .client
            .post(&self.emit_url)
            .query(&[("sid", self.session_id.as_str())])
            .timeout(self.request_timeout)
            .json(frame);
        if let Some(cookie) = &self.cookie {
            request = request.header(reqwest::header::COOKIE, cookie);
        }

        let response = request.send().await.map_err(TransportError::connection)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Http {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            while let Some(block) = self.take_block() {
                if let Some(event) = SseEvent::parse(&block) {
                    if let Some(id) = &event.id {
                        self.remember_event_id(id);
                    }
                    return Some(Ok(event.into_frame()));
                }
            }

            match self.body.next().await? {
                Ok(bytes) => {
                    trace!(len = bytes.len(), "event stream chunk");
                    self.undecoded.extend_from_slice(&bytes);
                    // Keep an incomplete trailing UTF-8 sequence for the next chunk.
                    let complete = match std::str::from_utf8(&self.undecoded) {
                        Ok(text) => text.len(),
                        Err(e) if e.error_len().is_none() => e.valid_up_to(),
                        Err(_) => self.undecoded.len(),
                    };
                    let decoded: Vec<u8> = self.undecoded.drain(..complete).collect();
                    let text = String::from_utf8_lossy(&decoded);
                    self.buffer.push_str(&text.replace("\r\n", "\n"));
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.body = Box::pin(futures::stream::empty());
        self.undecoded.clear();
        self.buffer.clear();
        Ok(())
    }
}

// ============================================================================
// Fallback chain
// ============================================================================

/// Tries each connector in order and returns the first link that completes
/// its handshake.
pub struct FallbackConnector {
    connectors: Vec<(TransportKind, Box<dyn Connector>)>,
}

impl FallbackConnector {
    pub fn new(connectors: Vec<(TransportKind, Box<dyn Connector>)>) -> Self {
        Self { connectors }
    }
}

#[async_trait]
impl Connector for FallbackConnector {
    async fn connect(&self) -> Result<Box<dyn TransportLink>, TransportError> {
        let mut failures = Vec::new();
        for (kind, connector) in &self.connectors {
            match connector.connect().await {
                Ok(link) => return Ok(link),
                Err(e) => {
                    warn!(transport = %kind, error = %e, "transport failed, trying next");
                    failures.push(format!("{kind}: {e}"));
                }
            }
        }
        Err(TransportError::Exhausted(failures.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use super::*;

    #[test]
    fn sse_block_parsing() {
        let event = SseEvent::parse("event: notification\ndata: {\"id\":\"n1\"}\nid: 7")
            .expect("block has data");
        assert_eq!(event.event_type, "notification");
        assert_eq!(event.id.as_deref(), Some("7"));
        assert_eq!(event.into_frame().data, json!({ "id": "n1" }));

        assert!(SseEvent::parse(": keep-alive").is_none());

        let multi = SseEvent::parse("data: first\ndata: second").expect("data lines");
        assert_eq!(multi.event_type, "message");
        assert_eq!(multi.data, "first\nsecond");
        assert_eq!(multi.into_frame().data, json!("first\nsecond"));
    }

    #[test]
    fn connect_frame_must_carry_sid() {
        let ok = Frame::new(EVENT_CONNECT, json!({ "sid": "abc" }));
        assert_eq!(ok.session_id().expect("sid"), "abc");

        let missing = Frame::new(EVENT_CONNECT, json!({}));
        assert!(matches!(missing.session_id(), Err(TransportError::Handshake(_))));

        let wrong = Frame::new("notification", json!({ "sid": "abc" }));
        assert!(matches!(wrong.session_id(), Err(TransportError::Handshake(_))));
    }

    #[test]
    fn frame_wire_format() {
        let frame = Frame::authenticate("u1");
        let text = frame.to_text().expect("serializable");
        assert_eq!(
            serde_json::from_str::<Value>(&text).expect("json"),
            json!({ "event": "authenticate", "data": "u1" })
        );
        assert!(Frame::parse("not json").is_err());
    }

    #[tokio::test]
    async fn sse_chunks_may_split_multibyte_characters() {
        let text = "event: record-viewed\ndata: {\"viewerName\":\"Zoë\"}\n\n".as_bytes();
        let split = text.iter().position(|&b| b == 0xC3).expect("two-byte char") + 1;
        let chunks = vec![Ok(text[..split].to_vec()), Ok(text[split..].to_vec())];
        let mut link = SseLink {
            client: reqwest::Client::new(),
            emit_url: String::new(),
            cookie: None,
            request_timeout: Duration::from_secs(1),
            body: Box::pin(futures::stream::iter(chunks)),
            undecoded: Vec::new(),
            buffer: String::new(),
            session_id: "s".to_string(),
            last_event_id: Arc::new(Mutex::new(None)),
        };

        let frame = link.next_frame().await.expect("frame").expect("valid");
        assert_eq!(frame.data["viewerName"], "Zoë");
    }

    fn sse_connector(server: &MockServer) -> SseConnector {
        SseConnector::new(
            server.url("/realtime/events"),
            server.url("/realtime/emit"),
            Some("sid=secret".to_string()),
            Duration::from_secs(2),
            Duration::from_secs(2),
        )
        .expect("client builds")
    }

    #[tokio::test]
    async fn sse_link_reads_handshake_then_frames() {
        let server = MockServer::start_async().await;
        let stream = server.mock_async(|when, then| {
            when.method(GET)
                .path("/realtime/events")
                .header("cookie", "sid=secret");
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(concat!(
                    "event: connect\ndata: {\"sid\":\"s-1\"}\n\n",
                    ": ping\n\n",
                    "event: notification\r\ndata: {\"id\":\"n1\",\"message\":\"hi\"}\r\nid: 3\r\n\r\n",
                ));
        }).await;

        let mut link = sse_connector(&server).connect().await.expect("handshake");
        assert_eq!(link.session_id(), "s-1");
        assert_eq!(link.kind(), TransportKind::Sse);

        let frame = link.next_frame().await.expect("frame").expect("valid");
        assert_eq!(frame.event, "notification");
        assert_eq!(frame.data["id"], "n1");

        assert!(link.next_frame().await.is_none(), "stream ended");
        stream.assert_async().await;
    }

    #[tokio::test]
    async fn sse_send_posts_to_emit_with_session() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(GET).path("/realtime/events");
            then.status(200)
                .body("event: connect\ndata: {\"sid\":\"s-9\"}\n\n");
        }).await;
        let emit = server.mock_async(|when, then| {
            when.method(POST)
                .path("/realtime/emit")
                .query_param("sid", "s-9")
                .json_body(json!({ "event": "authenticate", "data": "u1" }));
            then.status(204);
        }).await;

        let mut link = sse_connector(&server).connect().await.expect("handshake");
        link.send(&Frame::authenticate("u1")).await.expect("emit accepted");
        emit.assert_async().await;
    }

    #[tokio::test]
    async fn sse_http_error_is_reported() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(GET).path("/realtime/events");
            then.status(401).body("no session");
        }).await;

        let err = sse_connector(&server).connect().await.err().expect("must fail");
        assert!(matches!(err, TransportError::Http { status: 401, .. }));
    }

    #[tokio::test]
    async fn sse_requires_connect_frame_first() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(GET).path("/realtime/events");
            then.status(200)
                .body("event: notification\ndata: {}\n\n");
        }).await;

        let err = sse_connector(&server).connect().await.err().expect("must fail");
        assert!(matches!(err, TransportError::Handshake(_)));
    }

    #[tokio::test]
    async fn fallback_uses_next_transport() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(GET).path("/realtime/events");
            then.status(200)
                .body("event: connect\ndata: {\"sid\":\"fallback\"}\n\n");
        }).await;

        let unreachable = WebSocketConnector::new(
            "ws://127.0.0.1:1/realtime/ws",
            None,
            Duration::from_millis(500),
        );
        let chain = FallbackConnector::new(vec![
            (TransportKind::WebSocket, Box::new(unreachable)),
            (TransportKind::Sse, Box::new(sse_connector(&server))),
        ]);

        let link = chain.connect().await.expect("sse fallback");
        assert_eq!(link.session_id(), "fallback");
        assert_eq!(link.kind(), TransportKind::Sse);
    }

    #[tokio::test]
    async fn secure_websocket_url_is_supported() {
        let config = SyncConfig {
            server_url: "https://cv.example.com/realtime/".to_string(),
            ..SyncConfig::default()
        };
        let url = config.websocket_url();
        assert_eq!(url, "wss://cv.example.com/realtime/ws");
        let request = url.as_str().into_client_request().expect("wss request builds");
        assert_eq!(request.uri().scheme_str(), Some("wss"));

        let connector = WebSocketConnector::new(
            "wss://127.0.0.1:1/realtime/ws",
            Some("session=abc".to_string()),
            Duration::from_millis(500),
        );
        let err = connector.connect().await.err().expect("nothing listens there");
        assert!(matches!(err, TransportError::Connection(_)), "{err}");
        assert!(!err.to_string().contains("TLS support not compiled"), "{err}");
    }

    #[tokio::test]
    async fn fallback_reports_every_failure() {
        let chain = FallbackConnector::new(vec![(
            TransportKind::WebSocket,
            Box::new(WebSocketConnector::new(
                "ws://127.0.0.1:1/ws",
                None,
                Duration::from_millis(500),
            )),
        )]);
        let err = chain.connect().await.err().expect("must fail");
        let TransportError::Exhausted(detail) = err else {
            panic!("expected exhausted error");
        };
        assert!(detail.starts_with("websocket:"));
    }
}
