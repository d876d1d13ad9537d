//! Server Startup Tests
//!
//! Tests for server lifecycle, configuration loading, the control endpoints,
//! and connection limits on the WebSocket route.

mod common;

use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Method, Request, StatusCode, header},
};
use serial_test::serial;
use tokio_tungstenite::{connect_async, tungstenite};
use tower::util::ServiceExt;

use common::{ScriptedEngine, closed_by_server, start_test_server, test_config, wait_until};
use session_gateway::{GatewayError, ServerConfig, TeardownPolicy, routes, state::AppState};

async fn call(app: axum::Router, method: Method, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

/// The server boots with defaults and no engine credentials
#[tokio::test]
async fn test_minimal_config_boot() {
    let state = AppState::new(test_config()).expect("state should build");
    let app = routes::create_app(state);

    let (status, body) = call(app, Method::GET, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!({"status": "OK"}));
}

#[tokio::test]
async fn test_unknown_engine_kind_fails_startup() {
    let config = ServerConfig {
        engine_kind: "openai".to_string(),
        ..test_config()
    };

    match AppState::new(config) {
        Err(GatewayError::EngineUnavailable(e)) => {
            assert!(e.to_string().contains("openai"));
        }
        Err(other) => panic!("Expected EngineUnavailable, got {other}"),
        Ok(_) => panic!("Expected startup to fail"),
    }
}

#[tokio::test]
async fn test_create_then_list_sessions() {
    let state = AppState::new(test_config()).unwrap();
    let app = routes::create_app(state.clone());

    let (status, created) = call(app.clone(), Method::POST, "/sessions").await;
    assert_eq!(status, StatusCode::OK);
    let session_id = created["session_id"].as_str().unwrap().to_string();
    assert!(!session_id.is_empty());

    let (status, listed) = call(app, Method::GET, "/sessions").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["sessions"], serde_json::json!([session_id]));

    // Created but never attached: nothing started
    assert_eq!(state.registry.connection_count(&session_id), 0);
}

#[tokio::test]
#[serial]
async fn test_boot_from_yaml_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
server:
  host: "127.0.0.1"
  port: 9100
session:
  teardown_policy: "last"
agent:
  name: "Triage Agent"
  handoffs:
    - name: "Order Agent"
"#
    )
    .unwrap();

    let config = ServerConfig::from_file(&file.path().to_path_buf()).expect("config should load");
    assert_eq!(config.address(), "127.0.0.1:9100");
    assert_eq!(config.agent.name, "Triage Agent");

    let state = AppState::new(config).expect("state should build");
    assert_eq!(state.registry.teardown_policy(), TeardownPolicy::Last);
}

#[tokio::test]
async fn test_per_ip_limit_rejects_second_socket() {
    let config = ServerConfig {
        max_connections_per_ip: 1,
        ..test_config()
    };
    let server = start_test_server(config, Arc::new(ScriptedEngine::default())).await;

    let first = server.connect("shared").await;

    match connect_async(server.ws_url("shared")).await {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        }
        Err(other) => panic!("Expected HTTP rejection, got {other}"),
        Ok(_) => panic!("Expected second connection to be rejected"),
    }

    drop(first);
    let state = server.state.clone();
    assert!(wait_until(|| state.ws_connection_count() == 0).await);

    // Slot freed, so the same client may connect again
    let _again = server.connect("shared").await;
}

#[tokio::test]
async fn test_rejected_upgrades_do_not_hold_slots() {
    let config = ServerConfig {
        max_connections_per_ip: 2,
        ..test_config()
    };
    let state = AppState::new(config).unwrap();
    let app = routes::create_app(state.clone());

    // Upgrade header without the rest of the handshake
    for _ in 0..3 {
        let mut request = Request::builder()
            .uri("/ws/abc")
            .header(header::UPGRADE, "websocket")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((Ipv4Addr::LOCALHOST, 40000))));

        let response = app.clone().oneshot(request).await.unwrap();
        assert_ne!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert_ne!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(state.ws_connection_count(), 0);
    }

    assert_eq!(state.ip_connection_count(&Ipv4Addr::LOCALHOST.into()), 0);
}

#[tokio::test]
async fn test_global_limit_returns_503() {
    let config = ServerConfig {
        max_websocket_connections: Some(0),
        ..test_config()
    };
    let server = start_test_server(config, Arc::new(ScriptedEngine::default())).await;

    match connect_async(server.ws_url("full")).await {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        }
        Err(other) => panic!("Expected HTTP rejection, got {other}"),
        Ok(_) => panic!("Expected connection to be rejected"),
    }
}

#[tokio::test]
async fn test_registry_shutdown_closes_open_sockets() {
    let engine = Arc::new(ScriptedEngine::default());
    let server = start_test_server(test_config(), engine.clone()).await;
    let registry = server.state.registry.clone();

    let mut first = server.connect("alpha").await;
    let mut second = server.connect("beta").await;
    assert!(wait_until(|| engine.start_count() == 2).await);

    registry.shutdown().await;

    assert!(closed_by_server(&mut first).await);
    assert!(closed_by_server(&mut second).await);
    assert!(registry.list_sessions().is_empty());
    assert_eq!(engine.close_count(), 2);
}
