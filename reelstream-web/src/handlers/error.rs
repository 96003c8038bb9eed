//! Mapping of core errors onto HTTP responses.
//!
//! Every error body is JSON with at least an `error` message.

use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use reelstream_core::{
    CoordinatorError, DeliveryError, DownloadError, SelectError, StoreError,
};
use serde_json::json;
use tracing::{error, warn};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error(transparent)]
    Select(#[from] SelectError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("No video with id {id}")]
    VideoNotFound { id: String },
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Coordinator(e) => match e {
                CoordinatorError::UnknownKey { .. } => StatusCode::NOT_FOUND,
                CoordinatorError::StaleLock { .. } | CoordinatorError::StateConflict { .. } => {
                    StatusCode::CONFLICT
                }
                CoordinatorError::Download(
                    DownloadError::NoPlayableFile { .. } | DownloadError::MalformedLocator { .. },
                ) => StatusCode::UNPROCESSABLE_ENTITY,
                CoordinatorError::Download(
                    DownloadError::NoPeers | DownloadError::MetadataTimeout { .. },
                ) => StatusCode::SERVICE_UNAVAILABLE,
                CoordinatorError::Download(DownloadError::Swarm(_))
                | CoordinatorError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Select(e) => match e {
                SelectError::UnknownKey { .. } => StatusCode::NOT_FOUND,
                SelectError::Unavailable { .. } => StatusCode::CONFLICT,
                SelectError::UnsafePath { .. } | SelectError::Store(_) | SelectError::Io { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::Delivery(e) => match e {
                DeliveryError::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
                DeliveryError::Transcode(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Store(StoreError::UnknownKey { .. }) | ApiError::VideoNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, %status, "Request failed");
        } else {
            warn!(error = %self, %status, "Request rejected");
        }

        let message = self.to_string();
        match self {
            ApiError::Coordinator(CoordinatorError::StaleLock { key, locked_at }) => (
                status,
                Json(json!({
                    "error": message,
                    "key": key.to_string(),
                    "status": "LOADING",
                    "locked_at": locked_at.to_rfc3339(),
                    "hint": "release the stale claim before retrying",
                })),
            )
                .into_response(),
            ApiError::Delivery(DeliveryError::RangeNotSatisfiable { total }) => (
                status,
                [(header::CONTENT_RANGE, format!("bytes */{total}"))],
                Json(json!({ "error": message })),
            )
                .into_response(),
            _ => (status, Json(json!({ "error": message }))).into_response(),
        }
    }
}
