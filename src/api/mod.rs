//! HTTP surface of the ingestion service
//!
//! Push-style broker delivery plus the endpoints used by operators, the
//! dashboard backend and the external aggregation timer.
//!
//! ## Architecture
//!
//! - **Axum** web framework with Tower middleware
//! - **Shared pipeline** ([`crate::pipeline::Pipeline`]) as router state
//! - Optional bearer token on every route
//!
//! ## Endpoints
//!
//! - `POST /api/v1/push` - Broker push delivery (`204` acks, `503` requests redelivery)
//! - `POST /api/v1/aggregate` - Aggregate one window of one source
//! - `GET /api/v1/health` - Store, dead-letter and breaker health
//! - `GET /api/v1/stats` - Pipeline counters
//! - `GET /api/v1/dead-letters` - Most recent dead letters
//! - `GET /api/v1/dead-letters/{message_id}` - One dead letter
//! - `GET /api/v1/alerts` - Most recent alerts
//! - `POST /api/v1/alerts/{alert_id}/acknowledge` - NEW → ACKNOWLEDGED

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod types;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;
pub use types::{
    AggregateRequest, AlertsResponse, DeadLettersResponse, HealthResponse, PushEnvelope,
    StatsResponse,
};

use std::net::SocketAddr;

use axum::Router;
use axum::routing::{get, post};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,

    /// Bearer token required on every request
    pub auth_token: Option<String>,

    /// Enable CORS for the dashboard
    pub enable_cors: bool,
}

impl ApiConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            auth_token: None,
            enable_cors: true,
        }
    }
}

pub fn router(config: &ApiConfig, state: ApiState) -> Router {
    let mut app = Router::new()
        .route("/api/v1/push", post(routes::push::push_delivery))
        .route("/api/v1/aggregate", post(routes::aggregate::trigger_aggregate))
        .route("/api/v1/health", get(routes::health::health_check))
        .route("/api/v1/stats", get(routes::stats::get_stats))
        .route(
            "/api/v1/dead-letters",
            get(routes::dead_letters::list_dead_letters),
        )
        .route(
            "/api/v1/dead-letters/:message_id",
            get(routes::dead_letters::get_dead_letter),
        )
        .route("/api/v1/alerts", get(routes::alerts::list_alerts))
        .route(
            "/api/v1/alerts/:alert_id/acknowledge",
            post(routes::alerts::acknowledge_alert),
        )
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    if let Some(token) = config.auth_token.clone() {
        app = app.layer(axum::middleware::from_fn_with_state(
            token,
            middleware::auth::auth_middleware,
        ));
    }

    app
}

/// Binds the listener and serves the API in a background task
///
/// Returns the bound address, which differs from the configured one when
/// port 0 was requested.
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let app = router(&config, state);
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
