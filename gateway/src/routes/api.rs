use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::{api, sessions};
use crate::state::AppState;
use std::sync::Arc;

/// Create the REST router
///
/// # Endpoints
///
/// - `GET /health` - liveness check
/// - `POST /sessions` - register a new session
/// - `GET /sessions` - list session identifiers
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(api::health_check))
        .route(
            "/sessions",
            get(sessions::list_sessions).post(sessions::create_session),
        )
        .layer(TraceLayer::new_for_http())
}
