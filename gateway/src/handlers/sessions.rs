//! Session control endpoints
//!
//! - `POST /sessions` registers a new session and returns its identifier
//! - `GET /sessions` lists known session identifiers, sorted ascending
//!
//! Creating a session does not start an engine; the engine starts when the
//! first WebSocket attaches.

use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::state::AppState;

/// Response for `POST /sessions`
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
}

/// Response for `GET /sessions`
#[derive(Debug, Serialize, Deserialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<String>,
}

pub async fn create_session(State(state): State<Arc<AppState>>) -> Json<CreateSessionResponse> {
    Json(CreateSessionResponse {
        session_id: state.registry.create_session(),
    })
}

pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<ListSessionsResponse> {
    Json(ListSessionsResponse {
        sessions: state.registry.list_sessions(),
    })
}
