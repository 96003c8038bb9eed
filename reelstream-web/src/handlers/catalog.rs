//! Catalog listing and detail endpoints.

use axum::Json;
use axum::extract::{Path, Query, State};
use reelstream_core::catalog::{Movie, MovieSummary};
use reelstream_core::subtitles::SubtitleTrack;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::error::ApiError;
use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct VideoPage {
    pub movies: Vec<MovieSummary>,
    pub offset: usize,
    pub limit: usize,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct VideoDetail {
    #[serde(flatten)]
    pub movie: Movie,
    pub subtitles: Vec<SubtitleTrack>,
}

/// `GET /videos?offset&limit`
pub async fn list_videos(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<VideoPage>, ApiError> {
    let offset = query.offset.unwrap_or(0);
    let limit = query
        .limit
        .unwrap_or(state.pagination.default_limit)
        .clamp(1, state.pagination.max_limit);

    let movies = state.store.list_movies(offset, limit).await?;
    let total = state.store.count_movies().await?;

    Ok(Json(VideoPage {
        movies: movies.iter().map(Movie::summary).collect(),
        offset,
        limit,
        total,
    }))
}

/// `GET /video/{id}`
///
/// A failing subtitle service degrades to an empty list.
pub async fn video_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<VideoDetail>, ApiError> {
    let movie = state
        .store
        .find_movie(&id)
        .await?
        .ok_or(ApiError::VideoNotFound { id: id.clone() })?;

    let subtitles = match state.subtitles.subtitles(&id).await {
        Ok(tracks) => tracks,
        Err(e) => {
            warn!(imdb_id = %id, error = %e, "Subtitle lookup failed");
            Vec::new()
        }
    };

    Ok(Json(VideoDetail { movie, subtitles }))
}
