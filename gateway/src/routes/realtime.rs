//! Session WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::realtime::session_socket_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the session WebSocket router
///
/// # Endpoint
///
/// `GET /ws/{session_id}` - WebSocket upgrade that attaches to the session
///
/// # Example
///
/// ```json
/// // Client sends text or PCM16 samples
/// {"type": "text", "text": "What is on the menu?"}
/// {"type": "audio", "data": [0, 12, -40, 7]}
///
/// // Every connection on the session receives the engine's events
/// {"type": "agent-start", "agent": "Triage Agent"}
/// {"type": "audio-chunk", "audio": "AAwA2P8HAA=="}
/// ```
pub fn create_realtime_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws/{session_id}", get(session_socket_handler))
        .layer(TraceLayer::new_for_http())
}
