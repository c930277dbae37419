//! Local WebSocket server speaking the realtime frame protocol.
//!
//! Every accepted connection gets a `connect` frame with a fresh session id.
//! The test drives the newest connection: push frames, close it, and inspect
//! what the client sent and which cookies it presented.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::Message;

use cvsync_lib::realtime::Frame;

enum ServerCommand {
    Send(String),
    Close,
}

#[derive(Default)]
struct ServerState {
    sessions: AtomicUsize,
    cookies: Mutex<Vec<Option<String>>>,
    received: Mutex<Vec<Frame>>,
    current: Mutex<Option<mpsc::UnboundedSender<ServerCommand>>>,
}

pub struct WsServer {
    url: String,
    state: Arc<ServerState>,
    accept_loop: JoinHandle<()>,
}

impl WsServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind local listener");
        let addr = listener.local_addr().expect("local addr");
        let state = Arc::new(ServerState::default());

        let shared = Arc::clone(&state);
        let accept_loop = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&shared)));
            }
        });

        Self {
            url: format!("ws://{addr}/realtime"),
            state,
            accept_loop,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send an event on the newest connection. Returns false if none is open.
    pub fn push(&self, event: &str, data: Value) -> bool {
        let text = Frame::new(event, data).to_text().expect("serializable frame");
        self.send_raw(text)
    }

    pub fn send_raw(&self, text: impl Into<String>) -> bool {
        self.command(ServerCommand::Send(text.into()))
    }

    /// Close the newest connection from the server side.
    pub fn close_current(&self) -> bool {
        self.command(ServerCommand::Close)
    }

    fn command(&self, command: ServerCommand) -> bool {
        self.state
            .current
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| tx.send(command).is_ok())
    }

    pub fn sessions(&self) -> usize {
        self.state.sessions.load(Ordering::SeqCst)
    }

    pub fn cookies(&self) -> Vec<Option<String>> {
        self.state.cookies.lock().unwrap().clone()
    }

    /// Frames received from clients, across all connections.
    pub fn received(&self) -> Vec<Frame> {
        self.state.received.lock().unwrap().clone()
    }

    pub fn received_named(&self, event: &str) -> Vec<Frame> {
        self.received()
            .into_iter()
            .filter(|f| f.event == event)
            .collect()
    }
}

impl Drop for WsServer {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

async fn serve(stream: TcpStream, state: Arc<ServerState>) {
    let mut cookie = None;
    let capture = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        cookie = request
            .headers()
            .get(COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(response)
    };
    let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, capture).await else {
        return;
    };
    state.cookies.lock().unwrap().push(cookie);

    let session = state.sessions.fetch_add(1, Ordering::SeqCst) + 1;
    let hello = Frame::new("connect", json!({ "sid": format!("ws-{session}") }));
    let Ok(text) = hello.to_text() else {
        return;
    };
    if ws.send(Message::Text(text.into())).await.is_err() {
        return;
    }

    let (tx, mut commands) = mpsc::unbounded_channel();
    *state.current.lock().unwrap() = Some(tx);

    loop {
        tokio::select! {
            inbound = ws.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(frame) = Frame::parse(text.as_str()) {
                        state.received.lock().unwrap().push(frame);
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
            command = commands.recv() => match command {
                Some(ServerCommand::Send(text)) => {
                    if ws.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(ServerCommand::Close) | None => {
                    let _ = ws.close(None).await;
                    break;
                }
            },
        }
    }
}
