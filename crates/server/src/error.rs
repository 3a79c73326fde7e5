//! HTTP mapping for service-layer failures.
//!
//! Encryption and database errors deliberately return a generic message:
//! the detail is logged server-side, never leaked to the client.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use services::services::{SyncError, queue::QueueError};
use thiserror::Error;
use utils::response::ApiResponse;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl ApiError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            ApiError::Sync(err) => match err {
                SyncError::Validation(_) => (StatusCode::BAD_REQUEST, err.to_string()),
                SyncError::Authentication(_) => (StatusCode::UNAUTHORIZED, err.to_string()),
                SyncError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
                SyncError::Inactive(_)
                | SyncError::AlreadySyncing(_)
                | SyncError::Concurrency(_) => (StatusCode::CONFLICT, err.to_string()),
                SyncError::TransientExternal(_) | SyncError::PermanentExternal(_) => {
                    (StatusCode::BAD_GATEWAY, err.to_string())
                }
                SyncError::Encryption(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal encryption error".to_string(),
                ),
                SyncError::Database(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database error".to_string(),
                ),
            },
            ApiError::Queue(QueueError::Full) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "sync queue is full, try again later".to_string(),
            ),
            ApiError::Queue(QueueError::Closed) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "sync queue is closed".to_string(),
            ),
            ApiError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "database error".to_string(),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        if status.is_server_error() {
            tracing::error!(%status, error = %self, "request failed");
        } else {
            tracing::debug!(%status, error = %self, "request rejected");
        }
        (status, Json(ApiResponse::<()>::error(&message))).into_response()
    }
}
