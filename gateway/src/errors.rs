//! Crate-level error types.

use thiserror::Error;

use crate::core::engine::EngineError;

/// Errors surfaced by the session registry.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The engine could not be started for a session
    #[error("Failed to start engine for session {session_id}: {source}")]
    EngineStart {
        session_id: String,
        #[source]
        source: EngineError,
    },

    /// The configured engine kind is not available
    #[error("Engine unavailable: {0}")]
    EngineUnavailable(#[from] EngineError),
}

/// Result type for registry operations.
pub type GatewayResult<T> = Result<T, GatewayError>;
