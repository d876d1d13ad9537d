//! Router assembly
//!
//! [`create_app`] combines the REST and WebSocket routers with the shared
//! HTTP layers (CORS, rate limiting, security headers). The result must be
//! served with `into_make_service_with_connect_info::<SocketAddr>()`; the
//! connection-limit middleware and the rate limiter key on the peer address.

pub mod api;
pub mod realtime;

use axum::{Router, middleware};
use http::{
    HeaderValue, Method,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use std::sync::Arc;
use std::time::Duration;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;

use crate::middleware::connection_limit_middleware;
use crate::state::AppState;

/// Requests per second at or above which rate limiting is switched off
pub const RATE_LIMIT_DISABLED_THRESHOLD: u32 = 100_000;

/// Build the full application router.
///
/// When `static_dir` is configured, unmatched paths are served from that
/// directory, so `GET /` returns its `index.html`.
pub fn create_app(state: Arc<AppState>) -> Router {
    let config = &state.config;

    // Layer order (outer to inner): connection_limit -> handler
    let realtime_routes = realtime::create_realtime_router().layer(
        middleware::from_fn_with_state(state.clone(), connection_limit_middleware),
    );

    let governor_layer = if config.rate_limit_requests_per_second < RATE_LIMIT_DISABLED_THRESHOLD
    {
        GovernorConfigBuilder::default()
            // One token back every 1/rps seconds
            .period(Duration::from_secs(1) / config.rate_limit_requests_per_second.max(1))
            .burst_size(config.rate_limit_burst_size)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .map(|governor_config| GovernorLayer::new(governor_config))
    } else {
        info!(
            "Rate limiting disabled (rate >= {}/s)",
            RATE_LIMIT_DISABLED_THRESHOLD
        );
        None
    };

    let cors_layer = cors_layer(config.cors_allowed_origins.as_deref());

    // Security headers
    let security_headers = tower::ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ));

    let mut router = api::create_api_router().merge(realtime_routes);

    // Demo front end; API and WebSocket routes take precedence
    if let Some(static_dir) = &config.static_dir {
        info!("Serving static files from {}", static_dir.display());
        router = router.fallback_service(ServeDir::new(static_dir));
    }

    router
        .with_state(state)
        .layer(cors_layer)
        .layer(tower::util::option_layer(governor_layer))
        .layer(security_headers)
}

/// CORS from a comma-separated origin list, `*`, or nothing (same-origin only).
fn cors_layer(origins: Option<&str>) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    match origins {
        Some("*") => base.allow_origin(Any).allow_credentials(false),
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            base.allow_origin(origins).allow_credentials(true)
        }
        None => {
            info!(
                "CORS not configured, defaulting to same-origin only. \
                 Set CORS_ALLOWED_ORIGINS to enable cross-origin access."
            );
            base.allow_credentials(false)
        }
    }
}
