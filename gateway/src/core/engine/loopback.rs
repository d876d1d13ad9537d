//! Loopback engine.
//!
//! Echoes client input back as engine events without contacting a model:
//! text becomes a `history-updated` event with the user message and an
//! assistant echo, audio comes back unchanged as an `audio-chunk`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use super::{
    AgentConfig, AgentRef, AudioChunk, EngineError, EngineHandle, EngineResult, EngineSession,
    HistoryItem, MessageRole, RealtimeEvent, SessionEngine, TeardownContext,
};

/// Engine that mirrors its input.
#[derive(Debug, Default, Clone)]
pub struct LoopbackEngine;

impl LoopbackEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SessionEngine for LoopbackEngine {
    async fn start(&self, agent: &AgentConfig) -> EngineResult<EngineSession> {
        let (tx, rx) = mpsc::unbounded();

        tx.unbounded_send(Ok(RealtimeEvent::AgentStart {
            agent: AgentRef::new(agent.name.clone()),
        }))
        .map_err(|_| EngineError::StartFailed("event channel closed".to_string()))?;

        debug!(agent = %agent.name, "Loopback engine session started");

        let handle = LoopbackHandle {
            tx: tx.clone(),
            history: Mutex::new(Vec::new()),
        };

        Ok(EngineSession {
            handle: Arc::new(handle),
            events: Box::pin(rx),
            teardown: Box::new(LoopbackTeardown { tx }),
        })
    }
}

struct LoopbackHandle {
    tx: mpsc::UnboundedSender<EngineResult<RealtimeEvent>>,
    history: Mutex<Vec<HistoryItem>>,
}

impl LoopbackHandle {
    fn emit(&self, event: RealtimeEvent) -> EngineResult<()> {
        self.tx
            .unbounded_send(Ok(event))
            .map_err(|_| EngineError::Closed)
    }
}

#[async_trait]
impl EngineHandle for LoopbackHandle {
    async fn submit_audio(&self, audio: Bytes) -> EngineResult<()> {
        self.emit(RealtimeEvent::Audio {
            audio: AudioChunk::new(audio),
        })
    }

    async fn submit_text(&self, text: &str) -> EngineResult<()> {
        if self.tx.is_closed() {
            return Err(EngineError::Closed);
        }

        let history = {
            let mut history = self.history.lock();
            let next = history.len();
            history.push(HistoryItem::text_message(
                format!("item_{next}"),
                MessageRole::User,
                text,
            ));
            history.push(HistoryItem::text_message(
                format!("item_{}", next + 1),
                MessageRole::Assistant,
                text,
            ));
            history.clone()
        };

        self.emit(RealtimeEvent::HistoryUpdated { history })
    }
}

struct LoopbackTeardown {
    tx: mpsc::UnboundedSender<EngineResult<RealtimeEvent>>,
}

#[async_trait]
impl TeardownContext for LoopbackTeardown {
    async fn close(self: Box<Self>) -> EngineResult<()> {
        // Ends the event stream for every sender clone
        self.tx.close_channel();
        Ok(())
    }
}
