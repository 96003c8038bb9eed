//! Download start and status endpoints.

use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use reelstream_core::coordinator::StartOutcome;
use reelstream_core::{DownloadKey, DownloadState};
use serde::Serialize;

use super::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub status: DownloadState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProgressBody {
    pub arrived: u32,
    pub boundary: u32,
    pub total: u32,
    pub drained: bool,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: DownloadState,
    pub fs_path: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressBody>,
}

/// `GET /download-video/{id}/{resolution}`
pub async fn download_video(
    State(state): State<AppState>,
    Path((id, resolution)): Path<(String, String)>,
) -> Result<Json<StartResponse>, ApiError> {
    let key = DownloadKey::new(id, resolution);
    let outcome = state.coordinator.start(&key).await?;

    let status = outcome.state();
    let (session_id, path) = match outcome {
        StartOutcome::Started { session_id } => (Some(session_id.to_string()), None),
        StartOutcome::Completed { path } => (None, Some(path)),
        StartOutcome::InProgress(_) => (None, None),
    };

    Ok(Json(StartResponse {
        status,
        session_id,
        path,
    }))
}

/// `GET /video/status/{id}/{resolution}`
pub async fn video_status(
    State(state): State<AppState>,
    Path((id, resolution)): Path<(String, String)>,
) -> Result<Json<StatusResponse>, ApiError> {
    let key = DownloadKey::new(id, resolution);
    let status = state.coordinator.status(&key).await?;

    Ok(Json(StatusResponse {
        status: status.state,
        fs_path: status.fs_path,
        locked_at: status.locked_at,
        stale: status.stale,
        progress: status.progress.map(|p| ProgressBody {
            arrived: p.arrived,
            boundary: p.boundary,
            total: p.total,
            drained: p.drained,
        }),
    }))
}
