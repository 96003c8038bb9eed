//! Byte-range access to a media file, wherever its bytes live.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::swarm::SwarmError;

/// Where a provider reads its bytes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Finished (or partially written) file in the media directory
    Disk,
    /// Live swarm session buffer
    Swarm,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Disk => f.write_str("disk"),
            SourceKind::Swarm => f.write_str("swarm"),
        }
    }
}

/// Provides a file-like async interface over one media file.
///
/// The declared size is the final size of the file, even while the swarm is
/// still filling it in. Swarm-backed implementations block in `read_at` until
/// the requested bytes have arrived.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Reads up to `length` bytes starting at `offset`.
    ///
    /// Returns fewer bytes only at end of file.
    ///
    /// # Errors
    ///
    /// - `ProviderError::OutOfBounds` - `offset` is past the end of the file
    /// - `ProviderError::Swarm` - The live session ended or failed
    /// - `ProviderError::Io` - Underlying file read failed
    async fn read_at(&self, offset: u64, length: usize) -> Result<Bytes, ProviderError>;

    /// Declared total size in bytes.
    fn size(&self) -> u64;

    /// File name, used for content-type and transcoding decisions.
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind;

    /// Lower-cased extension without the dot.
    fn extension(&self) -> Option<String> {
        std::path::Path::new(self.name())
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
    }
}

/// Errors that can occur when reading from a content provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("offset {offset} is past the end of a {size} byte file")]
    OutOfBounds { offset: u64, size: u64 },

    #[error("swarm read failed: {0}")]
    Swarm(#[from] SwarmError),

    #[error("file read failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ProviderError> for std::io::Error {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::Io(e) => e,
            ProviderError::Swarm(SwarmError::Io(e)) => e,
            ProviderError::Swarm(SwarmError::SessionEnded) => std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "swarm session ended before the requested bytes arrived",
            ),
            other => std::io::Error::other(other.to_string()),
        }
    }
}
