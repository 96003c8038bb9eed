//! Reelstream Core - progressive playback of swarm-downloaded media
//!
//! This crate provides the building blocks for starting playback of a media
//! file while it is still arriving from a peer swarm: the catalog model and
//! document store, the swarm seam with a local development engine, the
//! piece-continuity tracker, the download coordinator, and the range delivery
//! layer that serves bytes from either the live swarm buffer or the finished
//! file on disk.

pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod session;
pub mod store;
pub mod streaming;
pub mod subtitles;
pub mod swarm;
pub mod tracing_setup;
pub mod tracker;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export main types for convenient access
pub use catalog::import::ImportError;
pub use catalog::{DownloadKey, DownloadState, Movie, TorrentVariant};
pub use config::ReelstreamConfig;
pub use coordinator::{CoordinatorError, DownloadCoordinator, DownloadError, StartOutcome};
pub use session::{ContentFile, SessionRegistry};
pub use store::{DocumentStore, JsonFileStore, MemoryStore, StoreError};
pub use streaming::{
    ContentProvider, ContentSourceSelector, DeliveryAdapter, DeliveryError, SelectError,
    TranscodeError,
};
pub use subtitles::SubtitleError;
pub use swarm::{SwarmEngine, SwarmError};

/// Errors that can bubble up from any Reelstream subsystem.
#[derive(Debug, thiserror::Error)]
pub enum ReelstreamError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Swarm error: {0}")]
    Swarm(#[from] SwarmError),

    #[error("Coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    #[error("Source selection error: {0}")]
    Select(#[from] SelectError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Transcode error: {0}")]
    Transcode(#[from] TranscodeError),

    #[error("Subtitle error: {0}")]
    Subtitle(#[from] SubtitleError),

    #[error("Import error: {0}")]
    Import(#[from] ImportError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReelstreamError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            ReelstreamError::Coordinator(e) => match e {
                CoordinatorError::UnknownKey { key } => format!("No such video variant: {key}"),
                CoordinatorError::StaleLock { key, locked_at } => {
                    format!("Download of {key} has been stuck since {locked_at}")
                }
                CoordinatorError::StateConflict { key, actual } => {
                    format!("Download of {key} is already {actual}")
                }
                CoordinatorError::Download(DownloadError::NoPeers) => {
                    "No peers available for download".to_string()
                }
                CoordinatorError::Download(DownloadError::NoPlayableFile { .. }) => {
                    "Torrent contains no playable video file".to_string()
                }
                _ => "Download error occurred".to_string(),
            },
            ReelstreamError::Select(SelectError::Unavailable { key, .. }) => {
                format!("Video {key} is not available yet, start the download first")
            }
            ReelstreamError::Store(_) => "Storage error occurred".to_string(),
            ReelstreamError::Swarm(_) => "Download error occurred".to_string(),
            ReelstreamError::Select(_) => "Video source error occurred".to_string(),
            ReelstreamError::Delivery(_) | ReelstreamError::Transcode(_) => {
                "Streaming error occurred".to_string()
            }
            ReelstreamError::Subtitle(_) => "Subtitles are unavailable".to_string(),
            ReelstreamError::Import(e) => format!("Catalog import failed: {e}"),
            ReelstreamError::Configuration { reason } => format!("Invalid configuration: {reason}"),
            ReelstreamError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            ReelstreamError::Configuration { .. }
                | ReelstreamError::Import(ImportError::Parse { .. })
                | ReelstreamError::Coordinator(CoordinatorError::UnknownKey { .. })
                | ReelstreamError::Delivery(DeliveryError::RangeNotSatisfiable { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, ReelstreamError>;
