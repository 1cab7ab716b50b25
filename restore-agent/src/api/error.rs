//! Mapping of restore failures to HTTP responses.

use crate::executor::exit_code::ExitClass;
use crate::RestoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("a restore is already running (attempt {0})")]
    Busy(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Restore(#[from] RestoreError),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Busy(_) => StatusCode::CONFLICT,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Restore(err) => restore_status(err),
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Busy(_) => "busy",
            ApiError::NotFound(_) => "not_found",
            ApiError::Restore(err) => err.kind(),
            ApiError::Internal(_) => "internal",
        }
    }
}

fn restore_status(err: &RestoreError) -> StatusCode {
    match err {
        RestoreError::Config(_) => StatusCode::BAD_REQUEST,
        RestoreError::NotFound(_) => StatusCode::NOT_FOUND,
        RestoreError::UnsafeDestination { .. } => StatusCode::CONFLICT,
        RestoreError::Continuity { cause, .. } if cause.is_transient() => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        RestoreError::Continuity { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        RestoreError::Mechanism {
            class: ExitClass::Connectivity,
            ..
        } => StatusCode::SERVICE_UNAVAILABLE,
        RestoreError::Http(_) | RestoreError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Restore request failed: {}", self);
        } else {
            tracing::warn!("Restore request rejected: {}", self);
        }
        (status, Json(json!({ "error": self.to_string(), "kind": self.kind() }))).into_response()
    }
}
