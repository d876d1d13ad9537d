//! Session Engine collaborator.
//!
//! The gateway never talks to a model directly. It asks a [`SessionEngine`]
//! to start a session for a starting agent, feeds the resulting
//! [`EngineHandle`] with client input, and relays the session's event
//! stream. Releasing the session goes through the [`TeardownContext`],
//! which is consumed on close so it can only be released once.
//!
//! # Engines
//!
//! - `loopback` - local engine that echoes input back as events, used for
//!   development and tests
//!
//! # Example
//!
//! ```rust,ignore
//! use session_gateway::core::engine::{create_session_engine, AgentConfig};
//!
//! let engine = create_session_engine("loopback")?;
//! let session = engine.start(&AgentConfig::default()).await?;
//! session.handle.submit_text("hola").await?;
//! ```

mod events;
mod loopback;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub use events::{
    AgentRef, AudioChunk, ContentPart, GuardrailResult, HistoryItem, ItemStatus, MessageRole,
    RawEngineEvent, RealtimeEvent, ToolRef,
};
pub use loopback::LoopbackEngine;

/// Default engine kind when none is configured.
pub const DEFAULT_ENGINE_KIND: &str = "loopback";

/// Errors reported by a Session Engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine could not be started
    #[error("Engine start failed: {0}")]
    StartFailed(String),

    /// Input was rejected by the engine
    #[error("Engine rejected input: {0}")]
    InputRejected(String),

    /// The engine session is already closed
    #[error("Engine session closed")]
    Closed,

    /// Transport or model failure inside the engine
    #[error("Engine transport error: {0}")]
    Transport(String),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Lazy, non-restartable sequence of engine events.
pub type EventStream = BoxStream<'static, EngineResult<RealtimeEvent>>;

/// Starting agent handed to the engine when a session starts.
///
/// Mirrors an agent graph: the starting agent may hand off to specialist
/// agents, which are described recursively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Display name of the agent
    pub name: String,
    /// System instructions for the agent
    pub instructions: String,
    /// Short description used when another agent hands off to this one
    pub handoff_description: Option<String>,
    /// Model identifier (engine-specific)
    pub model: Option<String>,
    /// Output voice (engine-specific)
    pub voice: Option<String>,
    /// Names of tools the agent may call
    pub tools: Vec<String>,
    /// Agents this agent may hand off to
    pub handoffs: Vec<AgentConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "Assistant".to_string(),
            instructions: "You are a helpful assistant.".to_string(),
            handoff_description: None,
            model: None,
            voice: None,
            tools: Vec::new(),
            handoffs: Vec::new(),
        }
    }
}

/// Input side of a live engine session.
#[async_trait]
pub trait EngineHandle: Send + Sync {
    /// Submit raw PCM16 audio. Returns once the engine accepted it.
    async fn submit_audio(&self, audio: Bytes) -> EngineResult<()>;

    /// Submit a user text message. Returns once the engine accepted it.
    async fn submit_text(&self, text: &str) -> EngineResult<()>;
}

/// Scoped resource owning the engine session.
///
/// `close` consumes the context. Implementations must tolerate resources
/// that are already closed (e.g. the remote side hung up first).
#[async_trait]
pub trait TeardownContext: Send {
    async fn close(self: Box<Self>) -> EngineResult<()>;
}

/// Everything the engine hands back for one started session.
pub struct EngineSession {
    pub handle: Arc<dyn EngineHandle>,
    pub events: EventStream,
    pub teardown: Box<dyn TeardownContext>,
}

impl std::fmt::Debug for EngineSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSession").finish_non_exhaustive()
    }
}

/// Factory for engine sessions.
#[async_trait]
pub trait SessionEngine: Send + Sync {
    /// Start a new session for the given starting agent.
    ///
    /// This is the expensive step (network and model setup); the registry
    /// calls it at most once per session.
    async fn start(&self, agent: &AgentConfig) -> EngineResult<EngineSession>;
}

/// Shared engine trait object.
pub type BoxedSessionEngine = Arc<dyn SessionEngine>;

/// Get list of supported engine kinds.
pub fn get_supported_engine_kinds() -> Vec<&'static str> {
    vec![DEFAULT_ENGINE_KIND]
}

/// Factory function to create a session engine by kind.
///
/// Kinds are matched case-insensitively.
pub fn create_session_engine(kind: &str) -> EngineResult<BoxedSessionEngine> {
    match kind.to_lowercase().as_str() {
        "loopback" => Ok(Arc::new(LoopbackEngine::new())),
        other => Err(EngineError::StartFailed(format!(
            "Unsupported engine kind: {other}. Supported: {:?}",
            get_supported_engine_kinds()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_session_engine() {
        assert!(create_session_engine("loopback").is_ok());
        assert!(create_session_engine("LOOPBACK").is_ok());
        assert!(create_session_engine("openai").is_err());
    }

    #[test]
    fn test_unsupported_engine_error_message() {
        match create_session_engine("invalid_engine") {
            Err(EngineError::StartFailed(msg)) => {
                assert!(msg.contains("invalid_engine"));
                assert!(msg.contains("loopback"));
            }
            _ => panic!("Expected StartFailed error"),
        }
    }

    #[test]
    fn test_agent_config_from_yaml() {
        let yaml = r#"
name: "Triage Agent"
instructions: "Delegate each request to the right specialist."
handoffs:
  - name: "Menu Agent"
    handoff_description: "Lists daily menus."
    tools: ["menu_lookup"]
  - name: "Order Agent"
    tools: ["place_order"]
"#;
        let agent: AgentConfig = serde_yaml::from_str(yaml).expect("Should deserialize");

        assert_eq!(agent.name, "Triage Agent");
        assert_eq!(agent.handoffs.len(), 2);
        assert_eq!(agent.handoffs[0].tools, vec!["menu_lookup".to_string()]);
        assert_eq!(
            agent.handoffs[0].handoff_description.as_deref(),
            Some("Lists daily menus.")
        );
        // Nested agents fall back to defaults for missing fields
        assert!(agent.handoffs[1].handoffs.is_empty());
        assert_eq!(agent.handoffs[1].instructions, "You are a helpful assistant.");
    }
}
