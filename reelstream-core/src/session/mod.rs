//! Live swarm-backed files and the process-local registry that owns them.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

use crate::catalog::DownloadKey;
use crate::swarm::{FileSpan, PieceIndex, SwarmError, SwarmFile, SwarmStorage, TorrentLayout};
use crate::tracker::TrackerProgress;

/// The selected media file of one live swarm session.
///
/// Reads block until the covering pieces have arrived.
pub struct ContentFile {
    session_id: Uuid,
    key: DownloadKey,
    file: SwarmFile,
    layout: TorrentLayout,
    storage: Arc<dyn SwarmStorage>,
    progress: watch::Receiver<TrackerProgress>,
}

impl ContentFile {
    pub fn new(
        session_id: Uuid,
        key: DownloadKey,
        file: SwarmFile,
        layout: TorrentLayout,
        storage: Arc<dyn SwarmStorage>,
        progress: watch::Receiver<TrackerProgress>,
    ) -> Self {
        Self {
            session_id,
            key,
            file,
            layout,
            storage,
            progress,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn key(&self) -> &DownloadKey {
        &self.key
    }

    pub fn name(&self) -> String {
        self.file.name()
    }

    pub fn length(&self) -> u64 {
        self.file.length
    }

    pub fn extension(&self) -> Option<String> {
        self.file.extension()
    }

    /// Media-relative path the file is being written to.
    pub fn storage_path(&self) -> String {
        self.file.storage_path()
    }

    pub fn span(&self) -> FileSpan {
        self.layout.file_span(&self.file)
    }

    pub fn progress(&self) -> TrackerProgress {
        *self.progress.borrow()
    }

    /// Reads up to `len` bytes at `offset` within the file.
    ///
    /// Waits for missing pieces instead of failing.
    ///
    /// # Errors
    ///
    /// - `SwarmError::SessionEnded` - The session stopped before the pieces arrived
    /// - `SwarmError::Io` - Storage read failed
    pub async fn read_at(&self, offset: u64, len: usize) -> Result<Bytes, SwarmError> {
        let len = (len as u64).min(self.file.length.saturating_sub(offset));
        if len == 0 {
            return Ok(Bytes::new());
        }

        let pieces = self.layout.pieces_for_range(self.file.offset + offset, len);
        let mut progress = self.progress.clone();

        loop {
            // Mark the current version seen before checking storage, so an
            // arrival after the check always wakes the wait below.
            let drained = progress.borrow_and_update().drained;

            let missing = pieces
                .clone()
                .find(|index| !self.storage.has_piece(PieceIndex(*index)));
            let Some(missing) = missing else {
                break;
            };

            if drained {
                return Err(SwarmError::SessionEnded);
            }
            debug!(key = %self.key, piece = missing, offset, "Waiting for piece");
            progress
                .changed()
                .await
                .map_err(|_| SwarmError::SessionEnded)?;
        }

        self.storage.read(&self.file, offset, len as usize).await
    }
}

impl std::fmt::Debug for ContentFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentFile")
            .field("session_id", &self.session_id)
            .field("key", &self.key)
            .field("file", &self.file)
            .finish()
    }
}

/// Process-local map of live sessions, one per download key.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<DownloadKey, Arc<ContentFile>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a live file, replacing any previous entry for its key.
    pub fn register(&self, file: Arc<ContentFile>) {
        let key = file.key().clone();
        info!(%key, session_id = %file.session_id(), "Registered live session");
        if let Some(previous) = self.sessions.write().insert(key, file) {
            debug!(session_id = %previous.session_id(), "Replaced superseded session");
        }
    }

    pub fn get(&self, key: &DownloadKey) -> Option<Arc<ContentFile>> {
        self.sessions.read().get(key).cloned()
    }

    pub fn contains(&self, key: &DownloadKey) -> bool {
        self.sessions.read().contains_key(key)
    }

    /// Removes the entry for `key` if it still belongs to `session_id`.
    pub fn remove(&self, key: &DownloadKey, session_id: Uuid) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get(key) {
            Some(file) if file.session_id() == session_id => {
                sessions.remove(key);
                info!(%key, %session_id, "Removed live session");
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Drops every entry. Downloads already running keep going.
    pub fn clear(&self) {
        let mut sessions = self.sessions.write();
        if !sessions.is_empty() {
            info!(count = sessions.len(), "Clearing session registry");
        }
        sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::path::PathBuf;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;

    struct PatternStorage {
        present: RwLock<BTreeSet<u32>>,
    }

    #[async_trait]
    impl SwarmStorage for PatternStorage {
        fn has_piece(&self, index: PieceIndex) -> bool {
            self.present.read().contains(&index.0)
        }

        async fn read(&self, _: &SwarmFile, offset: u64, len: usize) -> Result<Bytes, SwarmError> {
            Ok((offset..offset + len as u64).map(|b| b as u8).collect())
        }
    }

    fn content(
        storage: Arc<PatternStorage>,
    ) -> (ContentFile, watch::Sender<TrackerProgress>) {
        let (tx, rx) = watch::channel(TrackerProgress::default());
        let file = SwarmFile {
            path: PathBuf::from("t/movie.mp4"),
            length: 40,
            offset: 0,
        };
        let content = ContentFile::new(
            Uuid::new_v4(),
            DownloadKey::new("tt1", "720p"),
            file,
            TorrentLayout::new(10, 40),
            storage,
            rx,
        );
        (content, tx)
    }

    #[tokio::test]
    async fn test_read_waits_for_missing_piece() {
        let storage = Arc::new(PatternStorage {
            present: RwLock::new(BTreeSet::from([0])),
        });
        let (content, progress) = content(storage.clone());

        let head = content.read_at(0, 5).await.unwrap();
        assert_eq!(&head[..], &[0, 1, 2, 3, 4]);

        let content = Arc::new(content);
        let reader = {
            let content = content.clone();
            tokio::spawn(async move { content.read_at(25, 100).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reader.is_finished());

        storage.present.write().extend([1, 2, 3]);
        progress.send_modify(|p| p.arrived = 4);

        let tail = reader.await.unwrap().unwrap();
        assert_eq!(tail.len(), 15);
        assert_eq!(tail[0], 25);
    }

    #[tokio::test]
    async fn test_read_fails_when_session_ends() {
        let storage = Arc::new(PatternStorage {
            present: RwLock::new(BTreeSet::new()),
        });
        let (content, progress) = content(storage);
        drop(progress);
        assert!(matches!(
            content.read_at(0, 1).await,
            Err(SwarmError::SessionEnded)
        ));
    }

    #[test]
    fn test_registry_remove_requires_matching_session() {
        let storage = Arc::new(PatternStorage {
            present: RwLock::new(BTreeSet::new()),
        });
        let (content, _progress) = content(storage);
        let key = content.key().clone();
        let session_id = content.session_id();

        let registry = SessionRegistry::new();
        registry.register(Arc::new(content));
        assert!(registry.contains(&key));

        assert!(!registry.remove(&key, Uuid::new_v4()));
        assert!(registry.remove(&key, session_id));
        assert!(registry.is_empty());
    }
}
