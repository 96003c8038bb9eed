//! Coordinator error types.

use chrono::{DateTime, Utc};

use crate::catalog::{DownloadKey, DownloadState};
use crate::store::StoreError;
use crate::swarm::SwarmError;

/// Why a download session could not be started.
///
/// The claimed LOADING state is rolled back to NONE whenever one of these
/// is returned, so the start can be retried.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("No playable file in torrent {name}")]
    NoPlayableFile { name: String },

    #[error("No peers available")]
    NoPeers,

    #[error("Timed out after {seconds}s waiting for torrent metadata")]
    MetadataTimeout { seconds: u64 },

    #[error("Malformed magnet locator: {reason}")]
    MalformedLocator { reason: String },

    #[error("Swarm session failed: {0}")]
    Swarm(SwarmError),
}

impl From<SwarmError> for DownloadError {
    fn from(error: SwarmError) -> Self {
        match error {
            SwarmError::NoPeers { .. } => DownloadError::NoPeers,
            SwarmError::MetadataTimeout { seconds, .. } => {
                DownloadError::MetadataTimeout { seconds }
            }
            SwarmError::MalformedLocator { reason } => DownloadError::MalformedLocator { reason },
            other => DownloadError::Swarm(other),
        }
    }
}

/// Errors returned by [`super::DownloadCoordinator`].
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Unknown download key: {key}")]
    UnknownKey { key: DownloadKey },

    #[error("Download failed: {0}")]
    Download(#[from] DownloadError),

    /// LOADING for too long with no live session in this process
    #[error("Download of {key} has been LOADING since {locked_at} with no live session")]
    StaleLock {
        key: DownloadKey,
        locked_at: DateTime<Utc>,
    },

    #[error("Download of {key} is {actual}")]
    StateConflict {
        key: DownloadKey,
        actual: DownloadState,
    },

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for CoordinatorError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::UnknownKey { key } => CoordinatorError::UnknownKey { key },
            StoreError::Conflict { key, actual, .. } => {
                CoordinatorError::StateConflict { key, actual }
            }
            other => CoordinatorError::Store(other),
        }
    }
}
