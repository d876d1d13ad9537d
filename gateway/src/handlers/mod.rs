//! HTTP and WebSocket request handlers
//!
//! This module organizes all API handlers into logical groups:
//! - `api` - Health check endpoint
//! - `realtime` - Session WebSocket (attach, stream, detach)
//! - `sessions` - Session create and list endpoints

pub mod api;
pub mod realtime;
pub mod sessions;

// Re-export commonly used handlers for convenient access
pub use realtime::session_socket_handler;
