use axum::{Json, response::IntoResponse};
use serde::Serialize;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Liveness check, `{"status": "OK"}`.
pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse { status: "OK" })
}
