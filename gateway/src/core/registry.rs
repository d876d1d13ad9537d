//! Session registry.
//!
//! Owns the mapping from session identifier to its attached connections and
//! (at most one) live engine session. The registry starts the engine lazily
//! on the first attach, runs one relay task per live engine that fans events
//! out to every attached connection, and tears the engine down when the
//! session loses its owner or its last connection.
//!
//! # Session lifecycle
//!
//! ```text
//! Unbound --first attach--> Starting --engine ready--> Active
//!    |                         |                          |
//!    +------ owner / last detach: entry removed, engine released once
//! ```
//!
//! All bookkeeping lives behind a single registry-wide lock that is never
//! held across an await point. Teardown removes the entry under the lock
//! and releases the engine afterwards, so concurrent detaches release the
//! engine exactly once.

use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::engine::{
    AgentConfig, BoxedSessionEngine, EngineHandle, EngineResult, EngineSession, EventStream,
    RealtimeEvent, TeardownContext,
};
use crate::core::serializer::serialize_event;
use crate::errors::{GatewayError, GatewayResult};

/// Opaque session identifier.
pub type SessionId = String;

/// Identifier of one attached transport endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Frame pushed from the registry to a connection's writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Serialized JSON record
    Text(Arc<str>),
    /// Close the transport
    Close,
}

/// Handle to one attached connection.
///
/// The registry only ever pushes with `try_send`, so a slow or dead
/// connection cannot stall delivery to its siblings.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<OutboundFrame>,
    closed: CancellationToken,
}

impl Connection {
    pub fn new(tx: mpsc::Sender<OutboundFrame>) -> Self {
        Self {
            id: ConnectionId::new(),
            tx,
            closed: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Cancelled when the registry closes this connection during teardown.
    pub fn closed(&self) -> &CancellationToken {
        &self.closed
    }

    fn push(&self, frame: OutboundFrame) -> Result<(), mpsc::error::TrySendError<OutboundFrame>> {
        self.tx.try_send(frame)
    }

    fn close(&self) {
        let _ = self.tx.try_send(OutboundFrame::Close);
        self.closed.cancel();
    }
}

/// When a session is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TeardownPolicy {
    /// Tear down when the owner leaves or the last connection leaves
    #[default]
    Owner,
    /// Tear down only when the last connection leaves
    Last,
}

impl FromStr for TeardownPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "owner" => Ok(TeardownPolicy::Owner),
            "last" => Ok(TeardownPolicy::Last),
            other => Err(format!(
                "Invalid teardown policy '{other}'. Must be 'owner' or 'last'"
            )),
        }
    }
}

impl fmt::Display for TeardownPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeardownPolicy::Owner => write!(f, "owner"),
            TeardownPolicy::Last => write!(f, "last"),
        }
    }
}

/// Externally visible lifecycle phase of a registered session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Registered, no engine bound
    Unbound,
    /// First connection attached, engine being constructed
    Starting,
    /// Engine bound and relay running
    Active,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Unbound => write!(f, "unbound"),
            SessionPhase::Starting => write!(f, "starting"),
            SessionPhase::Active => write!(f, "active"),
        }
    }
}

struct ActiveEngine {
    epoch: u64,
    handle: Arc<dyn EngineHandle>,
    teardown: Box<dyn TeardownContext>,
    relay_cancel: CancellationToken,
}

#[derive(Default)]
enum EngineSlot {
    #[default]
    Unbound,
    Starting {
        epoch: u64,
    },
    Active(ActiveEngine),
}

#[derive(Default)]
struct SessionEntry {
    connections: Vec<Connection>,
    owner: Option<ConnectionId>,
    engine: EngineSlot,
}

impl SessionEntry {
    fn phase(&self) -> SessionPhase {
        match self.engine {
            EngineSlot::Unbound => SessionPhase::Unbound,
            EngineSlot::Starting { .. } => SessionPhase::Starting,
            EngineSlot::Active(_) => SessionPhase::Active,
        }
    }

    fn is_epoch(&self, epoch: u64) -> bool {
        match &self.engine {
            EngineSlot::Starting { epoch: current } => *current == epoch,
            EngineSlot::Active(active) => active.epoch == epoch,
            EngineSlot::Unbound => false,
        }
    }

    fn handle(&self) -> Option<Arc<dyn EngineHandle>> {
        match &self.engine {
            EngineSlot::Active(active) => Some(active.handle.clone()),
            _ => None,
        }
    }
}

type SessionMap = Arc<Mutex<HashMap<SessionId, SessionEntry>>>;

/// Registry of sessions, their connections, and their engines.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct SessionRegistry {
    engine: BoxedSessionEngine,
    agent: Arc<AgentConfig>,
    policy: TeardownPolicy,
    sessions: SessionMap,
    epochs: Arc<AtomicU64>,
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("agent", &self.agent.name)
            .field("policy", &self.policy)
            .field("sessions", &self.sessions.lock().len())
            .finish()
    }
}

impl SessionRegistry {
    pub fn new(engine: BoxedSessionEngine, agent: AgentConfig, policy: TeardownPolicy) -> Self {
        Self {
            engine,
            agent: Arc::new(agent),
            policy,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            epochs: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn teardown_policy(&self) -> TeardownPolicy {
        self.policy
    }

    /// Register a fresh session identifier without starting an engine.
    pub fn create_session(&self) -> SessionId {
        let session_id = uuid::Uuid::new_v4().to_string();
        self.sessions
            .lock()
            .insert(session_id.clone(), SessionEntry::default());
        info!(session_id = %session_id, "Session created");
        session_id
    }

    /// All known session identifiers, sorted ascending.
    pub fn list_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Lifecycle phase of a session, `None` if the id is unknown.
    pub fn session_phase(&self, session_id: &str) -> Option<SessionPhase> {
        self.sessions.lock().get(session_id).map(SessionEntry::phase)
    }

    /// Number of connections attached to a session.
    pub fn connection_count(&self, session_id: &str) -> usize {
        self.sessions
            .lock()
            .get(session_id)
            .map_or(0, |entry| entry.connections.len())
    }

    /// Attach a connection to a session, registering the id if unknown.
    ///
    /// The first connection of an unbound session becomes its owner and
    /// starts the engine; the call returns once the engine is bound and its
    /// relay is running. Later connections join without waiting.
    ///
    /// If the engine fails to start, the session is torn down and the error
    /// is returned.
    pub async fn attach(&self, connection: Connection, session_id: &str) -> GatewayResult<()> {
        let connection_id = connection.id();
        let start_epoch = {
            let mut sessions = self.sessions.lock();
            let entry = sessions.entry(session_id.to_string()).or_default();
            entry.connections.push(connection);

            if matches!(entry.engine, EngineSlot::Unbound) {
                let epoch = self.epochs.fetch_add(1, Ordering::Relaxed);
                entry.engine = EngineSlot::Starting { epoch };
                entry.owner = Some(connection_id);
                Some(epoch)
            } else {
                None
            }
        };

        let Some(epoch) = start_epoch else {
            info!(
                session_id = %session_id,
                connection_id = %connection_id,
                "Connection joined session"
            );
            return Ok(());
        };

        info!(
            session_id = %session_id,
            connection_id = %connection_id,
            agent = %self.agent.name,
            "Owner attached, starting engine"
        );

        match self.engine.start(&self.agent).await {
            Ok(engine_session) => {
                self.bind(session_id, epoch, engine_session).await;
                Ok(())
            }
            Err(source) => {
                error!(session_id = %session_id, "Engine start failed: {}", source);
                let entry = {
                    let mut sessions = self.sessions.lock();
                    match sessions.get(session_id) {
                        Some(entry) if entry.is_epoch(epoch) => sessions.remove(session_id),
                        _ => None,
                    }
                };
                if let Some(entry) = entry {
                    // Only the connection whose attach started the engine hears why
                    if let Some(origin) = entry
                        .connections
                        .iter()
                        .find(|connection| connection.id() == connection_id)
                    {
                        let record = serialize_event(&RealtimeEvent::Error {
                            error: Some(format!("Failed to start session: {source}")),
                        });
                        let _ = origin.push(OutboundFrame::Text(Arc::from(record.to_json())));
                    }
                    release(session_id, entry).await;
                }
                Err(GatewayError::EngineStart {
                    session_id: session_id.to_string(),
                    source,
                })
            }
        }
    }

    /// Store a started engine and launch its relay, unless the session was
    /// torn down while the engine was starting.
    async fn bind(&self, session_id: &str, epoch: u64, engine_session: EngineSession) {
        let EngineSession {
            handle,
            events,
            teardown,
        } = engine_session;
        let relay_cancel = CancellationToken::new();

        let stale = {
            let mut sessions = self.sessions.lock();
            match sessions.get_mut(session_id) {
                Some(entry) if matches!(entry.engine, EngineSlot::Starting { epoch: e } if e == epoch) => {
                    entry.engine = EngineSlot::Active(ActiveEngine {
                        epoch,
                        handle,
                        teardown,
                        relay_cancel: relay_cancel.clone(),
                    });
                    None
                }
                _ => Some(teardown),
            }
        };

        if let Some(teardown) = stale {
            warn!(
                session_id = %session_id,
                "Session closed while engine was starting, releasing engine"
            );
            if let Err(e) = teardown.close().await {
                warn!(session_id = %session_id, "Failed to release engine: {}", e);
            }
            return;
        }

        tokio::spawn(relay_events(
            self.sessions.clone(),
            session_id.to_string(),
            epoch,
            events,
            relay_cancel,
        ));
        info!(session_id = %session_id, "Engine bound, relay started");
    }

    /// Detach a connection from a session.
    ///
    /// Tears the session down when the last connection leaves, or when the
    /// owner leaves under [`TeardownPolicy::Owner`]. Unknown sessions and
    /// connections are ignored, so repeated or concurrent detaches are safe.
    pub async fn detach(&self, connection_id: ConnectionId, session_id: &str) {
        let removed = {
            let mut sessions = self.sessions.lock();
            let Some(entry) = sessions.get_mut(session_id) else {
                return;
            };
            let Some(position) = entry
                .connections
                .iter()
                .position(|connection| connection.id() == connection_id)
            else {
                return;
            };
            entry.connections.remove(position);

            let owner_left = entry.owner == Some(connection_id);
            let teardown = entry.connections.is_empty()
                || (owner_left && self.policy == TeardownPolicy::Owner);

            info!(
                session_id = %session_id,
                connection_id = %connection_id,
                remaining = entry.connections.len(),
                owner = owner_left,
                "Connection detached"
            );

            if teardown {
                sessions.remove(session_id)
            } else {
                None
            }
        };

        if let Some(entry) = removed {
            release(session_id, entry).await;
        }
    }

    /// Feed audio to the session's engine. No-op if no engine is bound.
    pub async fn forward_audio(&self, session_id: &str, audio: Bytes) -> EngineResult<()> {
        let Some(handle) = self.engine_handle(session_id) else {
            debug!(session_id = %session_id, "No engine bound, dropping audio");
            return Ok(());
        };
        handle.submit_audio(audio).await
    }

    /// Feed text to the session's engine. No-op if no engine is bound.
    pub async fn forward_text(&self, session_id: &str, text: &str) -> EngineResult<()> {
        let Some(handle) = self.engine_handle(session_id) else {
            debug!(session_id = %session_id, "No engine bound, dropping text");
            return Ok(());
        };
        handle.submit_text(text).await
    }

    fn engine_handle(&self, session_id: &str) -> Option<Arc<dyn EngineHandle>> {
        self.sessions
            .lock()
            .get(session_id)
            .and_then(SessionEntry::handle)
    }

    /// Tear down every session. Used on server shutdown.
    pub async fn shutdown(&self) {
        let entries: Vec<(SessionId, SessionEntry)> = self.sessions.lock().drain().collect();
        if !entries.is_empty() {
            info!(sessions = entries.len(), "Tearing down all sessions");
        }
        for (session_id, entry) in entries {
            release(&session_id, entry).await;
        }
    }
}

/// Close remaining connections and release the engine of a removed entry.
async fn release(session_id: &str, entry: SessionEntry) {
    for connection in &entry.connections {
        connection.close();
    }

    match entry.engine {
        EngineSlot::Active(active) => {
            active.relay_cancel.cancel();
            if let Err(e) = active.teardown.close().await {
                warn!(session_id = %session_id, "Engine teardown reported an error: {}", e);
            }
            info!(session_id = %session_id, "Session torn down");
        }
        // The pending start notices the missing entry and releases its engine
        EngineSlot::Starting { .. } => {
            info!(session_id = %session_id, "Session torn down before engine was ready");
        }
        EngineSlot::Unbound => {
            info!(session_id = %session_id, "Session removed");
        }
    }
}

/// Relay one engine's events to every connection attached at emission time.
async fn relay_events(
    sessions: SessionMap,
    session_id: SessionId,
    epoch: u64,
    mut events: EventStream,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(session_id = %session_id, "Relay cancelled");
                break;
            }
            next = events.next() => next,
        };

        let event = match next {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                error!(session_id = %session_id, "Error processing engine events: {}", e);
                break;
            }
            None => {
                info!(session_id = %session_id, "Engine event stream ended");
                break;
            }
        };

        let record = serialize_event(&event);
        let text: Arc<str> = Arc::from(record.to_json());

        let targets = {
            let sessions = sessions.lock();
            match sessions.get(&session_id) {
                Some(entry) if entry.is_epoch(epoch) => entry.connections.clone(),
                _ => break,
            }
        };

        for connection in targets {
            if let Err(e) = connection.push(OutboundFrame::Text(text.clone())) {
                warn!(
                    session_id = %session_id,
                    connection_id = %connection.id(),
                    event_type = record.event_type(),
                    "Error sending event: {}",
                    e
                );
            }
        }
    }
}
