//! Shared test infrastructure
//!
//! - `ScriptedEngine`: a session engine whose events are pushed by the test
//!   and which records every submission and teardown
//! - `start_test_server`: serves the full application on an ephemeral port

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc as event_channel;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use session_gateway::{
    AgentConfig, BoxedSessionEngine, EngineError, EngineHandle, EngineResult, EngineSession,
    RealtimeEvent, ServerConfig, SessionEngine, TeardownContext, routes, state::AppState,
};

pub type TestSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

type EventSender = event_channel::UnboundedSender<EngineResult<RealtimeEvent>>;

/// Engine driven by the test
#[derive(Default)]
pub struct ScriptedEngine {
    pub starts: AtomicUsize,
    pub closes: Arc<AtomicUsize>,
    pub texts: Arc<Mutex<Vec<String>>>,
    pub audio: Arc<Mutex<Vec<Bytes>>>,
    pub fail_start: bool,
    senders: Mutex<Vec<EventSender>>,
}

impl ScriptedEngine {
    pub fn failing() -> Self {
        Self {
            fail_start: true,
            ..Default::default()
        }
    }

    /// Push an event on the most recently started session.
    pub fn emit(&self, event: RealtimeEvent) {
        let senders = self.senders.lock();
        let sender = senders.last().expect("no engine session started");
        sender
            .unbounded_send(Ok(event))
            .expect("engine event stream closed");
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

struct ScriptedHandle {
    texts: Arc<Mutex<Vec<String>>>,
    audio: Arc<Mutex<Vec<Bytes>>>,
}

#[async_trait]
impl EngineHandle for ScriptedHandle {
    async fn submit_audio(&self, audio: Bytes) -> EngineResult<()> {
        self.audio.lock().push(audio);
        Ok(())
    }

    async fn submit_text(&self, text: &str) -> EngineResult<()> {
        self.texts.lock().push(text.to_string());
        Ok(())
    }
}

struct ScriptedTeardown {
    closes: Arc<AtomicUsize>,
    tx: EventSender,
}

#[async_trait]
impl TeardownContext for ScriptedTeardown {
    async fn close(self: Box<Self>) -> EngineResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.tx.close_channel();
        Ok(())
    }
}

#[async_trait]
impl SessionEngine for ScriptedEngine {
    async fn start(&self, _agent: &AgentConfig) -> EngineResult<EngineSession> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(EngineError::StartFailed("engine offline".to_string()));
        }
        let (tx, rx) = event_channel::unbounded();
        self.senders.lock().push(tx.clone());
        Ok(EngineSession {
            handle: Arc::new(ScriptedHandle {
                texts: self.texts.clone(),
                audio: self.audio.clone(),
            }),
            events: Box::pin(rx),
            teardown: Box::new(ScriptedTeardown {
                closes: self.closes.clone(),
                tx,
            }),
        })
    }
}

/// Configuration for tests: loopback address, rate limiting off
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        rate_limit_requests_per_second: 100_000,
        ..Default::default()
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<AppState>,
}

impl TestServer {
    pub fn ws_url(&self, session_id: &str) -> String {
        format!("ws://{}/ws/{}", self.addr, session_id)
    }

    pub async fn connect(&self, session_id: &str) -> TestSocket {
        let (socket, _) = timeout(Duration::from_secs(5), connect_async(self.ws_url(session_id)))
            .await
            .expect("connect timed out")
            .expect("websocket handshake failed");
        socket
    }
}

/// Serve the full application with the given engine on an ephemeral port.
pub async fn start_test_server(config: ServerConfig, engine: BoxedSessionEngine) -> TestServer {
    let state = AppState::with_engine(config, engine);
    let app = routes::create_app(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get address");

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .ok();
    });

    TestServer { addr, state }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub async fn send_json(socket: &mut TestSocket, value: serde_json::Value) {
    socket
        .send(Message::Text(value.to_string().into()))
        .await
        .expect("send failed");
}

/// Next JSON record from the server, skipping control frames.
pub async fn next_json(socket: &mut TestSocket) -> serde_json::Value {
    loop {
        let message = timeout(Duration::from_secs(2), socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .expect("socket error");
        match message {
            Message::Text(text) => return serde_json::from_str(&text).expect("invalid JSON"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("Expected text frame, got {other:?}"),
        }
    }
}

/// Next record of the given type, skipping others.
pub async fn next_of_type(socket: &mut TestSocket, event_type: &str) -> serde_json::Value {
    loop {
        let record = next_json(socket).await;
        if record["type"] == event_type {
            return record;
        }
    }
}

/// True once the server closes the socket.
pub async fn closed_by_server(socket: &mut TestSocket) -> bool {
    loop {
        match timeout(Duration::from_secs(2), socket.next()).await {
            Err(_) => return false,
            Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => return true,
            Ok(Some(Ok(_))) => continue,
        }
    }
}
