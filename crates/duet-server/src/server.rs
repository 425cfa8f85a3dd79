//! Axum web server

use crate::sse;
use axum::{
    response::Json,
    routing::{get, post},
    Router,
};
use duet_agent::{ModelBackend, ModelClient};
use duet_core::{DuetConfig, RoleModels};
use duet_orchestrator::Orchestrator;
use duet_sandbox::{Sandbox, SandboxRunner};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Shared application state
pub struct AppState<M: ModelBackend, S: Sandbox> {
    pub orchestrator: Orchestrator<M, S>,
    /// Models used when a request does not name its own
    pub default_models: RoleModels,
    /// Events buffered between a run and its SSE response
    pub event_buffer: usize,
}

pub type SharedState<M, S> = Arc<AppState<M, S>>;

impl<M: ModelBackend, S: Sandbox> AppState<M, S> {
    pub fn new(orchestrator: Orchestrator<M, S>, default_models: RoleModels) -> Self {
        Self {
            orchestrator,
            default_models,
            event_buffer: 1,
        }
    }

    pub fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer;
        self
    }
}

/// Build the router over any model backend and sandbox
pub fn router<M, S>(state: SharedState<M, S>) -> Router
where
    M: ModelBackend + 'static,
    S: Sandbox + 'static,
{
    Router::new()
        .route("/api/tdd", post(sse::tdd_handler::<M, S>))
        .route("/api/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve runs with the HTTP model client and the local sandbox
pub async fn serve(config: DuetConfig, addr: SocketAddr) -> anyhow::Result<()> {
    let client = ModelClient::from_config(&config.models)?;
    let orchestrator = Orchestrator::new(client, SandboxRunner::from_config(&config.sandbox))
        .with_max_tokens(config.models.max_tokens);
    let models = RoleModels::new(&config.models.planner, &config.models.implementer);

    let state = Arc::new(
        AppState::new(orchestrator, models).with_event_buffer(config.server.event_buffer),
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("duet server listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// GET /api/health
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "duet"
    }))
}
