//! Application state, routing and the HTTP listener.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use reelstream_core::coordinator::CoordinatorSettings;
use reelstream_core::streaming::{FfmpegTranscoder, Transcoder};
use reelstream_core::subtitles::{HttpSubtitleProvider, NoSubtitles, SubtitleProvider};
use reelstream_core::swarm::LocalSwarmEngine;
use reelstream_core::{
    ContentSourceSelector, DeliveryAdapter, DocumentStore, DownloadCoordinator, JsonFileStore,
    MemoryStore, ReelstreamConfig, ReelstreamError, SessionRegistry, SwarmEngine,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::handlers::{download_video, list_videos, video_chunks, video_detail, video_status};

/// Page size limits for catalog listings.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub default_limit: usize,
    pub max_limit: usize,
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: DownloadCoordinator,
    pub selector: ContentSourceSelector,
    pub delivery: DeliveryAdapter,
    pub store: Arc<dyn DocumentStore>,
    pub subtitles: Arc<dyn SubtitleProvider>,
    pub pagination: Pagination,
}

impl AppState {
    /// Wires the core services around explicit collaborators.
    pub fn from_parts(
        config: &ReelstreamConfig,
        store: Arc<dyn DocumentStore>,
        engine: Arc<dyn SwarmEngine>,
        transcoder: Arc<dyn Transcoder>,
        subtitles: Arc<dyn SubtitleProvider>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let coordinator = DownloadCoordinator::new(
            store.clone(),
            engine,
            registry.clone(),
            CoordinatorSettings::from(config),
        );
        let selector =
            ContentSourceSelector::new(store.clone(), registry, config.media.media_dir.clone());

        Self {
            coordinator,
            selector,
            delivery: DeliveryAdapter::from_config(config, transcoder),
            store,
            subtitles,
            pagination: Pagination {
                default_limit: config.server.default_page_size,
                max_limit: config.server.max_page_size,
            },
        }
    }
}

/// Builds production state: JSON file store (or in-memory when no path is
/// configured), the local development swarm, FFmpeg and the configured
/// subtitle service.
///
/// # Errors
///
/// - `ReelstreamError::Store` - The store file exists but cannot be loaded
pub async fn build_state(config: &ReelstreamConfig) -> Result<AppState, ReelstreamError> {
    let store: Arc<dyn DocumentStore> = match &config.store.path {
        Some(path) => Arc::new(JsonFileStore::open(path).await?),
        None => Arc::new(MemoryStore::new()),
    };
    let subtitles: Arc<dyn SubtitleProvider> = match &config.server.subtitles_url {
        Some(url) => Arc::new(HttpSubtitleProvider::new(url.clone())),
        None => Arc::new(NoSubtitles),
    };

    Ok(AppState::from_parts(
        config,
        store,
        Arc::new(LocalSwarmEngine::from_config(config)),
        Arc::new(FfmpegTranscoder::new()),
        subtitles,
    ))
}

/// All API routes over `state`.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/videos", get(list_videos))
        .route("/video/{id}", get(video_detail))
        .route("/download-video/{id}/{resolution}", get(download_video))
        .route("/video/status/{id}/{resolution}", get(video_status))
        .route("/video/chunks/{id}/{resolution}", get(video_chunks))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serves the API until Ctrl-C.
///
/// # Errors
///
/// - `ReelstreamError::Store` - The store could not be opened
/// - `ReelstreamError::Io` - The listener could not bind or the server failed
pub async fn run_server(config: ReelstreamConfig) -> Result<(), ReelstreamError> {
    let state = build_state(&config).await?;
    let coordinator = state.coordinator.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.server.bind).await?;
    info!(
        bind = %config.server.bind,
        media_dir = %config.media.media_dir.display(),
        "Reelstream API listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    coordinator.shutdown();
    Ok(())
}
