//! Engine event model.
//!
//! Every event a Session Engine can emit is a variant of [`RealtimeEvent`].
//! Payloads are plain structs so the serializer can match exhaustively
//! instead of probing for attributes at runtime.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Reference to an agent taking part in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRef {
    pub name: String,
}

impl AgentRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Reference to a tool invoked by an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRef {
    pub name: String,
}

impl ToolRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Chunk of synthesized audio (PCM 16-bit, mono).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub data: Bytes,
    /// Conversation item the audio belongs to, if the engine reports one
    pub item_id: Option<String>,
}

impl AudioChunk {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            item_id: None,
        }
    }
}

/// Role of a message in the conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// One part of a history message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    InputText { text: String },
    Audio {
        #[serde(skip_serializing_if = "Option::is_none")]
        transcript: Option<String>,
    },
    InputAudio {
        #[serde(skip_serializing_if = "Option::is_none")]
        transcript: Option<String>,
    },
}

/// Status of a history item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    InProgress,
    Completed,
    Incomplete,
}

/// Entry of the conversation history maintained by the engine.
///
/// Serializes to its canonical JSON form, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryItem {
    Message {
        item_id: String,
        role: MessageRole,
        content: Vec<ContentPart>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<ItemStatus>,
    },
    FunctionCall {
        item_id: String,
        name: String,
        arguments: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<ItemStatus>,
    },
}

impl HistoryItem {
    /// Build a completed text message.
    pub fn text_message(item_id: impl Into<String>, role: MessageRole, text: impl Into<String>) -> Self {
        let text = text.into();
        let part = match role {
            MessageRole::User => ContentPart::InputText { text },
            MessageRole::Assistant | MessageRole::System => ContentPart::Text { text },
        };
        HistoryItem::Message {
            item_id: item_id.into(),
            role,
            content: vec![part],
            status: Some(ItemStatus::Completed),
        }
    }

    pub fn item_id(&self) -> &str {
        match self {
            HistoryItem::Message { item_id, .. } | HistoryItem::FunctionCall { item_id, .. } => {
                item_id
            }
        }
    }
}

/// Result of a guardrail that tripped on agent output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardrailResult {
    pub guardrail_name: String,
}

/// Low-level event passed through from the model transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEngineEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
}

/// Events produced by a live engine session.
///
/// Variants without extra wire fields (`AudioEnd`, `AudioInterrupted`,
/// `HistoryAdded`) and [`RealtimeEvent::Other`] serialize to the bare
/// `{type}` record.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum RealtimeEvent {
    AgentStart { agent: AgentRef },
    AgentEnd { agent: AgentRef },
    Handoff { from: AgentRef, to: AgentRef },
    ToolStart { agent: AgentRef, tool: ToolRef },
    ToolEnd {
        agent: AgentRef,
        tool: ToolRef,
        output: serde_json::Value,
    },
    Audio { audio: AudioChunk },
    AudioEnd { item_id: Option<String> },
    AudioInterrupted { item_id: Option<String> },
    HistoryUpdated { history: Vec<HistoryItem> },
    HistoryAdded { item: HistoryItem },
    GuardrailTripped {
        guardrail_results: Vec<GuardrailResult>,
        message: String,
    },
    RawEngineEvent { data: RawEngineEvent },
    Error { error: Option<String> },
    /// Variant this gateway does not know about yet
    Other { event_type: String },
}

impl RealtimeEvent {
    /// Wire discriminator for this event.
    pub fn event_type(&self) -> &str {
        match self {
            RealtimeEvent::AgentStart { .. } => "agent-start",
            RealtimeEvent::AgentEnd { .. } => "agent-end",
            RealtimeEvent::Handoff { .. } => "handoff",
            RealtimeEvent::ToolStart { .. } => "tool-start",
            RealtimeEvent::ToolEnd { .. } => "tool-end",
            RealtimeEvent::Audio { .. } => "audio-chunk",
            RealtimeEvent::AudioEnd { .. } => "audio-end",
            RealtimeEvent::AudioInterrupted { .. } => "audio-interrupted",
            RealtimeEvent::HistoryUpdated { .. } => "history-updated",
            RealtimeEvent::HistoryAdded { .. } => "history-added",
            RealtimeEvent::GuardrailTripped { .. } => "guardrail-tripped",
            RealtimeEvent::RawEngineEvent { .. } => "raw-engine-event",
            RealtimeEvent::Error { .. } => "error",
            RealtimeEvent::Other { event_type } => event_type.as_str(),
        }
    }
}
