//! Event serializer.
//!
//! Maps engine events to flat, text-transport-safe records. Lossy but
//! deterministic: audio is base64 encoded, history items are rendered to
//! their JSON form, and everything carries a `type` discriminator. The
//! mapping never fails; variants without a dedicated mapping produce the
//! bare `{type}` record.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::warn;

use crate::core::engine::{HistoryItem, RealtimeEvent};

/// Fallback text for error events without a message.
pub const UNKNOWN_ERROR: &str = "Unknown error";

/// Serialized event ready for the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EventRecord(Map<String, Value>);

impl EventRecord {
    fn new(event_type: &str) -> Self {
        let mut fields = Map::new();
        fields.insert("type".to_string(), Value::String(event_type.to_string()));
        Self(fields)
    }

    fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// Wire discriminator of the record.
    pub fn event_type(&self) -> &str {
        self.0.get("type").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Render as a JSON text frame.
    pub fn to_json(&self) -> String {
        // A map of JSON values always serializes
        Value::Object(self.0.clone()).to_string()
    }
}

/// Serialize an engine event into its wire record.
pub fn serialize_event(event: &RealtimeEvent) -> EventRecord {
    let record = EventRecord::new(event.event_type());

    match event {
        RealtimeEvent::AgentStart { agent } | RealtimeEvent::AgentEnd { agent } => {
            record.with("agent", agent.name.as_str())
        }
        RealtimeEvent::Handoff { from, to } => record
            .with("from", from.name.as_str())
            .with("to", to.name.as_str()),
        RealtimeEvent::ToolStart { tool, .. } => record.with("tool", tool.name.as_str()),
        RealtimeEvent::ToolEnd { tool, output, .. } => record
            .with("tool", tool.name.as_str())
            .with("output", stringify_output(output)),
        RealtimeEvent::Audio { audio } => record.with("audio", BASE64.encode(&audio.data)),
        RealtimeEvent::HistoryUpdated { history } => record.with(
            "history",
            Value::Array(history.iter().map(history_item_value).collect()),
        ),
        RealtimeEvent::GuardrailTripped {
            guardrail_results, ..
        } => record.with(
            "guardrails",
            guardrail_results
                .iter()
                .map(|result| Value::String(result.guardrail_name.clone()))
                .collect::<Vec<_>>(),
        ),
        RealtimeEvent::RawEngineEvent { data } => {
            record.with("raw_event", json!({ "type": data.event_type }))
        }
        RealtimeEvent::Error { error } => record.with(
            "error",
            error.as_deref().unwrap_or(UNKNOWN_ERROR),
        ),
        RealtimeEvent::AudioEnd { .. }
        | RealtimeEvent::AudioInterrupted { .. }
        | RealtimeEvent::HistoryAdded { .. }
        | RealtimeEvent::Other { .. } => record,
    }
}

/// Tool outputs are passed through as text; strings are not re-quoted and a
/// missing (`null`) output becomes the empty string.
fn stringify_output(output: &Value) -> String {
    match output {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn history_item_value(item: &HistoryItem) -> Value {
    serde_json::to_value(item).unwrap_or_else(|e| {
        warn!(item_id = item.item_id(), "Failed to serialize history item: {}", e);
        Value::Null
    })
}
