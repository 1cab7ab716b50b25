//! HTTP API module for the restore agent.

pub mod error;
pub mod health;
pub mod restore;
pub mod restore_tracker;

use crate::executor::RestoreContext;
use crate::store::control_plane::ControlPlaneClient;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub context: Arc<RestoreContext<ControlPlaneClient>>,
    pub tracker: restore_tracker::RestoreTracker,
    /// Cancelled when the agent shuts down; parent of every attempt's token
    pub shutdown: CancellationToken,
    pub agent_id: String,
}

/// Create shared application state
pub fn create_app_state(
    context: Arc<RestoreContext<ControlPlaneClient>>,
    shutdown: CancellationToken,
    agent_id: impl Into<String>,
) -> AppState {
    AppState {
        context,
        tracker: restore_tracker::RestoreTracker::new(),
        shutdown,
        agent_id: agent_id.into(),
    }
}

/// Create the API router with a pre-existing state
pub fn create_router_with_state(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health::health))
        .route("/version", get(health::version))
        // Restore hook endpoints
        .route("/capabilities", get(restore::capabilities))
        .route("/restore", post(restore::restore))
        .route("/restore/cancel", post(restore::cancel_restore))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
