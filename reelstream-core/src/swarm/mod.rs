//! Seam between the coordinator and a peer-to-peer download engine.
//!
//! An engine opens a [`SwarmSession`] for a magnet locator. The session
//! delivers [`SwarmEvent`]s in arrival order and exposes the downloaded bytes
//! through [`SwarmStorage`].

pub mod layout;
pub mod local;
pub mod magnet;

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub use layout::{FileSpan, TorrentLayout};
pub use local::{ArrivalOrder, LocalSwarmEngine};
pub use magnet::MagnetLocator;

/// 20-byte SHA-1 hash identifying a torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Parses the 40-character hex form, case-insensitively.
    ///
    /// # Errors
    ///
    /// - `SwarmError::MalformedLocator` - Wrong length or non-hex characters
    pub fn from_hex(hex_str: &str) -> Result<Self, SwarmError> {
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(hex_str.trim(), &mut bytes).map_err(|e| {
            SwarmError::MalformedLocator {
                reason: format!("invalid info hash {hex_str:?}: {e}"),
            }
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Zero-based index of a piece within a torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PieceIndex(pub u32);

impl fmt::Display for PieceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One file inside a torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwarmFile {
    /// Where the file is written, relative to the media directory
    pub path: PathBuf,
    pub length: u64,
    /// Byte offset of the file within the torrent's concatenated data
    pub offset: u64,
}

impl SwarmFile {
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Lower-cased extension without the dot.
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.path)
    }

    /// The relative path in the `/`-separated form stored in catalog documents.
    pub fn storage_path(&self) -> String {
        self.path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Lower-cased extension of a path, without the dot.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}

/// Torrent metadata resolved from the swarm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwarmMetadata {
    pub name: String,
    pub piece_length: u64,
    pub total_length: u64,
    pub piece_count: u32,
    pub files: Vec<SwarmFile>,
}

impl SwarmMetadata {
    pub fn layout(&self) -> TorrentLayout {
        TorrentLayout::new(self.piece_length, self.total_length)
    }
}

/// Notifications emitted by a running swarm session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwarmEvent {
    MetadataReady(SwarmMetadata),
    /// A piece was downloaded, verified and written to storage
    PieceArrived(PieceIndex),
    /// No further pieces are pending
    Drained,
}

/// Errors raised by swarm engines and sessions.
#[derive(Debug, thiserror::Error)]
pub enum SwarmError {
    #[error("Malformed magnet locator: {reason}")]
    MalformedLocator { reason: String },

    #[error("No peers available for {info_hash}")]
    NoPeers { info_hash: InfoHash },

    #[error("Timed out after {seconds}s waiting for metadata of {info_hash}")]
    MetadataTimeout { info_hash: InfoHash, seconds: u64 },

    #[error("Session for {info_hash} ended before metadata was resolved")]
    MetadataUnavailable { info_hash: InfoHash },

    #[error("Piece {index} failed verification")]
    PieceVerification { index: PieceIndex },

    #[error("Swarm session ended before the requested data arrived")]
    SessionEnded,

    #[error("Swarm storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read access to the bytes a session has written.
#[async_trait]
pub trait SwarmStorage: Send + Sync {
    fn has_piece(&self, index: PieceIndex) -> bool;

    /// Reads up to `len` bytes of `file` starting at `offset` within the file.
    ///
    /// Callers must ensure the covering pieces have arrived.
    async fn read(&self, file: &SwarmFile, offset: u64, len: usize) -> Result<Bytes, SwarmError>;
}

/// Download engine able to join a swarm for a magnet locator.
#[async_trait]
pub trait SwarmEngine: Send + Sync {
    /// Starts downloading the torrent addressed by `locator`.
    ///
    /// # Errors
    ///
    /// - `SwarmError::NoPeers` - Nobody serves this torrent
    /// - `SwarmError::MalformedLocator` - The engine cannot use the locator
    async fn open(&self, locator: &MagnetLocator) -> Result<SwarmSession, SwarmError>;
}

/// One live download.
pub struct SwarmSession {
    info_hash: InfoHash,
    events: SessionEvents,
    storage: Arc<dyn SwarmStorage>,
}

impl SwarmSession {
    pub fn new(
        info_hash: InfoHash,
        events: mpsc::Receiver<SwarmEvent>,
        storage: Arc<dyn SwarmStorage>,
    ) -> Self {
        Self {
            info_hash,
            events: SessionEvents {
                backlog: VecDeque::new(),
                rx: events,
            },
            storage,
        }
    }

    pub fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    /// Waits for the metadata event.
    ///
    /// Piece events seen before the metadata are kept and replayed by
    /// [`SessionEvents::next`].
    ///
    /// # Errors
    ///
    /// - `SwarmError::MetadataTimeout` - Nothing resolved within `timeout`
    /// - `SwarmError::MetadataUnavailable` - The session drained or closed first
    pub async fn wait_for_metadata(
        &mut self,
        timeout: Duration,
    ) -> Result<SwarmMetadata, SwarmError> {
        let info_hash = self.info_hash;
        let backlog = &mut self.events.backlog;
        let rx = &mut self.events.rx;

        let wait = async {
            loop {
                match rx.recv().await {
                    Some(SwarmEvent::MetadataReady(metadata)) => return Ok(metadata),
                    Some(SwarmEvent::Drained) | None => {
                        return Err(SwarmError::MetadataUnavailable { info_hash });
                    }
                    Some(event) => {
                        debug!(%info_hash, ?event, "Buffering event received before metadata");
                        backlog.push_back(event);
                    }
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%info_hash, ?timeout, "Metadata did not resolve in time");
                Err(SwarmError::MetadataTimeout {
                    info_hash,
                    seconds: timeout.as_secs(),
                })
            }
        }
    }

    /// Splits the session into its storage handle and event stream.
    pub fn into_parts(self) -> (Arc<dyn SwarmStorage>, SessionEvents) {
        (self.storage, self.events)
    }
}

impl fmt::Debug for SwarmSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwarmSession")
            .field("info_hash", &self.info_hash)
            .field("buffered_events", &self.events.backlog.len())
            .finish()
    }
}

/// Event stream of a session, replaying events buffered before metadata.
pub struct SessionEvents {
    backlog: VecDeque<SwarmEvent>,
    rx: mpsc::Receiver<SwarmEvent>,
}

impl SessionEvents {
    /// Next event, or `None` once the session has shut down.
    pub async fn next(&mut self) -> Option<SwarmEvent> {
        match self.backlog.pop_front() {
            Some(event) => Some(event),
            None => self.rx.recv().await,
        }
    }
}
