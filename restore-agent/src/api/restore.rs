//! Restore endpoints.

use super::error::ApiError;
use super::AppState;
use crate::cluster::decode_cluster;
use crate::executor::{RestoreExecutor, RestoreResponse};
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreRequest {
    pub cluster_definition: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRestoreResponse {
    pub status: String,
    pub attempt_id: String,
}

/// GET /capabilities - Hooks implemented by this agent
pub async fn capabilities() -> Json<serde_json::Value> {
    Json(json!({
        "capabilities": [{ "kind": "RESTORE" }],
    }))
}

/// POST /restore - Restore the data directory of a cluster
///
/// The attempt runs in its own task that owns the tracker slot. If the client
/// goes away the attempt is cancelled, not dropped, so running tools get
/// their termination grace period and the slot stays held until they exit.
pub async fn restore(
    State(app_state): State<AppState>,
    Json(req): Json<RestoreRequest>,
) -> Result<Json<RestoreResponse>, ApiError> {
    let cluster = decode_cluster(req.cluster_definition)?;

    let slot = app_state
        .tracker
        .begin(&app_state.shutdown)
        .ok_or_else(|| ApiError::Busy(app_state.tracker.running_attempt().unwrap_or_default()))?;

    tracing::info!(
        "Restore requested for cluster {}/{} (attempt {})",
        cluster.namespace(),
        cluster.name(),
        slot.attempt_id()
    );

    let cancel_token = slot.cancel_token();
    let executor = RestoreExecutor::with_cancel(app_state.context.clone(), cancel_token.clone())
        .with_attempt_id(slot.attempt_id());
    let attempt = tokio::spawn(async move {
        let _slot = slot;
        executor.execute(&cluster).await
    });

    let on_disconnect = cancel_token.drop_guard();
    let result = attempt.await;
    on_disconnect.disarm();

    let response = result.map_err(|e| ApiError::Internal(format!("restore task failed: {}", e)))??;
    Ok(Json(response))
}

/// POST /restore/cancel - Cancel the running restore
pub async fn cancel_restore(
    State(app_state): State<AppState>,
) -> Result<Json<CancelRestoreResponse>, ApiError> {
    match app_state.tracker.cancel() {
        Some(attempt_id) => {
            tracing::info!("Cancelling restore {}", attempt_id);
            Ok(Json(CancelRestoreResponse {
                status: "cancelling".to_string(),
                attempt_id,
            }))
        }
        None => {
            tracing::warn!("No restore is running");
            Err(ApiError::NotFound("no restore is running".to_string()))
        }
    }
}
