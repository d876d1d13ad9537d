//! Session WebSocket handlers
//!
//! One WebSocket per participant, many participants per session.
//!
//! # Protocol
//!
//! ## Client → Server
//!
//! - **audio**: `{"type": "audio", "data": [int16, ...]}` PCM16 samples
//! - **text**: `{"type": "text", "text": "..."}` text for the conversation
//! - **Binary frames**: raw PCM16 audio bytes
//! - Any other `type` is ignored
//!
//! ## Server → Client
//!
//! One JSON record per engine event, always carrying `type`:
//! `agent-start`, `agent-end`, `handoff`, `tool-start`, `tool-end`,
//! `audio-chunk`, `history-updated`, `guardrail-tripped`, `raw-engine-event`,
//! `error`, and bare `{type}` records for everything else.

mod handler;
pub mod messages;

pub use handler::session_socket_handler;
