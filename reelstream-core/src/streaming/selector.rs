//! Picks the byte source for a download key.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use super::disk::DiskFileProvider;
use super::provider::ContentProvider;
use super::swarm_file::SwarmFileProvider;
use crate::catalog::{DownloadKey, DownloadState};
use crate::session::SessionRegistry;
use crate::store::{DocumentStore, StoreError};

#[derive(Debug, Error)]
pub enum SelectError {
    #[error("Unknown download key: {key}")]
    UnknownKey { key: DownloadKey },

    /// Nothing to read yet; the download has to be started first
    #[error("{key} is not available for streaming (state {state}); start the download first")]
    Unavailable {
        key: DownloadKey,
        state: DownloadState,
    },

    #[error("Refusing to serve {path}: outside the media directory")]
    UnsafePath { path: String },

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Cannot open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<StoreError> for SelectError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::UnknownKey { key } => SelectError::UnknownKey { key },
            other => SelectError::Store(other),
        }
    }
}

/// Chooses between a finished file on disk and a live swarm session.
#[derive(Clone)]
pub struct ContentSourceSelector {
    store: Arc<dyn DocumentStore>,
    registry: Arc<SessionRegistry>,
    media_dir: PathBuf,
}

impl ContentSourceSelector {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        registry: Arc<SessionRegistry>,
        media_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            registry,
            media_dir: media_dir.into(),
        }
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    /// Resolves the provider to read `key` from.
    ///
    /// Order: LOADED file on disk, then the live session of this process,
    /// then a FIRST_CHUNKS_LOADED file left behind by an earlier process.
    /// A LOADED key never touches the session registry.
    ///
    /// # Errors
    ///
    /// - `SelectError::UnknownKey` - No such movie or resolution
    /// - `SelectError::Unavailable` - No source exists yet
    /// - `SelectError::UnsafePath` - The persisted path escapes the media directory
    /// - `SelectError::Io` - The persisted file cannot be opened
    pub async fn resolve(&self, key: &DownloadKey) -> Result<Arc<dyn ContentProvider>, SelectError> {
        let record = self.store.variant(key).await?;
        let state = record.variant.status;
        let fs_path = record.variant.fs_path.as_deref();

        if state == DownloadState::Loaded
            && let Some(path) = fs_path
        {
            debug!(%key, path, "Serving finished file");
            return self.open_disk(path).await;
        }

        if let Some(file) = self.registry.get(key) {
            debug!(%key, session = %file.session_id(), "Serving live session");
            return Ok(Arc::new(SwarmFileProvider::new(file)));
        }

        if state == DownloadState::FirstChunksLoaded
            && let Some(path) = fs_path
        {
            debug!(%key, path, "Serving partial file without a live session");
            return self.open_disk(path).await;
        }

        Err(SelectError::Unavailable {
            key: key.clone(),
            state,
        })
    }

    async fn open_disk(&self, relative: &str) -> Result<Arc<dyn ContentProvider>, SelectError> {
        let path = self.media_path(relative)?;
        let provider = DiskFileProvider::open(&path)
            .await
            .map_err(|source| SelectError::Io { path, source })?;
        Ok(Arc::new(provider))
    }

    /// Joins a persisted relative path onto the media directory.
    fn media_path(&self, relative: &str) -> Result<PathBuf, SelectError> {
        let candidate = Path::new(relative);
        let safe = !relative.is_empty()
            && candidate
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe {
            return Err(SelectError::UnsafePath {
                path: relative.to_string(),
            });
        }
        Ok(self.media_dir.join(candidate))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::streaming::SourceKind;
    use crate::testing::{fixture_movie, loaded_content_file};
    use crate::MemoryStore;

    fn selector(dir: &TempDir, store: MemoryStore) -> (ContentSourceSelector, Arc<SessionRegistry>) {
        let registry = Arc::new(SessionRegistry::new());
        let selector = ContentSourceSelector::new(Arc::new(store), registry.clone(), dir.path());
        (selector, registry)
    }

    fn store_with(status: DownloadState, fs_path: Option<&str>) -> MemoryStore {
        let mut movie = fixture_movie("tt0000001", &[("720p", "aa")]);
        let variant = movie.variant_mut("720p").unwrap();
        variant.status = status;
        variant.fs_path = fs_path.map(str::to_string);
        MemoryStore::with_movies([movie])
    }

    #[tokio::test]
    async fn test_loaded_reads_from_disk_without_session() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("Movie")).unwrap();
        std::fs::write(dir.path().join("Movie/movie.mp4"), b"finished").unwrap();

        let (selector, registry) =
            selector(&dir, store_with(DownloadState::Loaded, Some("Movie/movie.mp4")));
        let key = DownloadKey::new("tt0000001", "720p");
        let provider = selector.resolve(&key).await.unwrap();

        assert_eq!(provider.kind(), SourceKind::Disk);
        assert_eq!(provider.size(), 8);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_live_session_wins_over_partial_file() {
        let dir = TempDir::new().unwrap();
        let (selector, registry) = selector(
            &dir,
            store_with(DownloadState::FirstChunksLoaded, Some("Movie/movie.mp4")),
        );
        let key = DownloadKey::new("tt0000001", "720p");
        registry.register(loaded_content_file(&key, "Movie/movie.mp4", b"live bytes"));

        let provider = selector.resolve(&key).await.unwrap();
        assert_eq!(provider.kind(), SourceKind::Swarm);
        assert_eq!(&provider.read_at(0, 4).await.unwrap()[..], b"live");
    }

    #[tokio::test]
    async fn test_partial_file_without_session() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("Movie")).unwrap();
        std::fs::write(dir.path().join("Movie/movie.mp4"), b"partial").unwrap();

        let (selector, _) = selector(
            &dir,
            store_with(DownloadState::FirstChunksLoaded, Some("Movie/movie.mp4")),
        );
        let provider = selector
            .resolve(&DownloadKey::new("tt0000001", "720p"))
            .await
            .unwrap();
        assert_eq!(provider.kind(), SourceKind::Disk);
    }

    #[tokio::test]
    async fn test_unavailable_and_unknown() {
        let dir = TempDir::new().unwrap();
        let (selector, _) = selector(&dir, store_with(DownloadState::Loading, None));

        let result = selector.resolve(&DownloadKey::new("tt0000001", "720p")).await;
        assert!(matches!(
            result,
            Err(SelectError::Unavailable {
                state: DownloadState::Loading,
                ..
            })
        ));

        let result = selector.resolve(&DownloadKey::new("tt0000001", "4k")).await;
        assert!(matches!(result, Err(SelectError::UnknownKey { .. })));
    }

    #[tokio::test]
    async fn test_escaping_paths_are_rejected() {
        let dir = TempDir::new().unwrap();
        for path in ["../outside.mp4", "/etc/passwd", "Movie/../../x.mp4"] {
            let (selector, _) = selector(&dir, store_with(DownloadState::Loaded, Some(path)));
            let result = selector.resolve(&DownloadKey::new("tt0000001", "720p")).await;
            assert!(
                matches!(result, Err(SelectError::UnsafePath { .. })),
                "{path}"
            );
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let (selector, _) = selector(&dir, store_with(DownloadState::Loaded, Some("gone.mp4")));
        let result = selector.resolve(&DownloadKey::new("tt0000001", "720p")).await;
        assert!(matches!(result, Err(SelectError::Io { .. })));
    }
}
