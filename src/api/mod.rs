//! Read-only snapshot API (plus a few operator actions)
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Liveness of the API and the history backend
//! - `GET /api/v1/stats` - Engine, router and storage counters
//! - `GET /api/v1/services` - Managed services with their latest result
//! - `GET /api/v1/services/{name}/history` - Recent results, newest first
//! - `GET /api/v1/services/{name}/uptime` - Availability over the retained history
//! - `POST /api/v1/services/{name}/check` - Run a probe cycle now
//! - `GET /api/v1/alerts` - Alert records, optionally filtered by state
//! - `POST /api/v1/alerts/mute` / `DELETE /api/v1/alerts/mute` - Maintenance mute
//!
//! The `POST`/`DELETE` routes require a bearer token when one is configured.

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod types;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;

use std::net::SocketAddr;

use axum::Router;
use axum::routing::{get, post};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::util::DEFAULT_API_ADDR;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,

    /// Token required for operator actions; without it they are open
    pub auth_token: Option<String>,

    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_API_ADDR,
            auth_token: None,
            enable_cors: true,
        }
    }
}

/// Routes without transport concerns, handy for in-process tests
pub fn router(state: ApiState, auth_token: Option<String>) -> Router {
    let mut actions = Router::new()
        .route("/api/v1/services/:name/check", post(routes::services::check_now))
        .route(
            "/api/v1/alerts/mute",
            post(routes::alerts::mute).delete(routes::alerts::unmute),
        );
    if let Some(token) = auth_token {
        actions = actions.route_layer(axum::middleware::from_fn_with_state(token, middleware::auth::require_token));
    }

    Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/stats", get(routes::stats::get_stats))
        .route("/api/v1/services", get(routes::services::list_services))
        .route("/api/v1/services/:name/history", get(routes::services::get_history))
        .route("/api/v1/services/:name/uptime", get(routes::services::get_uptime))
        .route("/api/v1/alerts", get(routes::alerts::list_alerts))
        .merge(actions)
        .with_state(state)
}

/// Bind and serve the API in a background task, returning the bound address
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let mut app = router(state, config.auth_token).layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));
    if config.enable_cors {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
        app = app.layer(cors);
    }

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
