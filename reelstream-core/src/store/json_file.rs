//! Document store persisted to a single JSON file.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fs2::FileExt;
use tracing::{debug, info, warn};

use super::{DocumentStore, MemoryStore, StoreError};
use crate::catalog::{DownloadKey, DownloadState, Movie, VariantRecord};

/// Document store backed by a JSON array of movies on disk.
///
/// The file is the only copy of the documents. Every operation takes an OS
/// lock on a sibling `.lock` file, re-reads the documents, applies the change
/// and writes them back before unlocking, so any number of processes sharing
/// the path see one serial history and the NONE -> LOADING claim has a single
/// winner. Writes go to a temp file that is renamed over the original, so a
/// crash never leaves a torn file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Shared,
    Exclusive,
}

impl JsonFileStore {
    /// Opens the store at `path`, starting empty if the file does not exist.
    ///
    /// # Errors
    ///
    /// - `StoreError::Io` - The file exists but cannot be read, or the lock file cannot be created
    /// - `StoreError::Serialization` - The file is not a JSON array of movies
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }

        let store = Self {
            lock_path: path.with_extension("json.lock"),
            path,
        };
        let movies = store
            .transact(Access::Shared, |documents| Ok(documents.count_sync()))
            .await?;

        info!(path = %store.path.display(), movies, "Opened JSON store");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `op` against a fresh read of the file while holding the lock.
    ///
    /// Exclusive operations write the documents back when `op` succeeds and
    /// leave the file untouched when it fails.
    async fn transact<T, F>(&self, access: Access, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&MemoryStore) -> Result<T, StoreError> + Send + 'static,
    {
        let path = self.path.clone();
        let lock_path = self.lock_path.clone();
        tokio::task::spawn_blocking(move || locked(&path, &lock_path, access, op))
            .await
            .map_err(|e| io_error(&self.path, std::io::Error::other(e)))?
    }
}

fn locked<T>(
    path: &Path,
    lock_path: &Path,
    access: Access,
    op: impl FnOnce(&MemoryStore) -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    let lock = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
        .map_err(|e| io_error(lock_path, e))?;

    match access {
        Access::Shared => FileExt::lock_shared(&lock),
        Access::Exclusive => FileExt::lock_exclusive(&lock),
    }
    .map_err(|e| io_error(lock_path, e))?;

    let result = apply(path, access, op);

    if let Err(e) = FileExt::unlock(&lock) {
        warn!(path = %lock_path.display(), error = %e, "Failed to unlock store");
    }
    result
}

fn apply<T>(
    path: &Path,
    access: Access,
    op: impl FnOnce(&MemoryStore) -> Result<T, StoreError>,
) -> Result<T, StoreError> {
    let documents = MemoryStore::with_movies(read_movies(path)?);
    let output = op(&documents)?;
    if access == Access::Exclusive {
        write_movies(path, &documents.snapshot())?;
    }
    Ok(output)
}

fn read_movies(path: &Path) -> Result<Vec<Movie>, StoreError> {
    match std::fs::read(path) {
        Ok(raw) => Ok(serde_json::from_slice(&raw)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Store file not found, reading as empty");
            Ok(Vec::new())
        }
        Err(source) => Err(io_error(path, source)),
    }
}

fn write_movies(path: &Path, movies: &[Movie]) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(movies)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_error(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_error(path, e))?;

    debug!(path = %path.display(), bytes = json.len(), "Persisted store");
    Ok(())
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn find_movie(&self, imdb_id: &str) -> Result<Option<Movie>, StoreError> {
        let imdb_id = imdb_id.to_string();
        self.transact(Access::Shared, move |documents| {
            Ok(documents.find_sync(&imdb_id))
        })
        .await
    }

    async fn list_movies(&self, offset: usize, limit: usize) -> Result<Vec<Movie>, StoreError> {
        self.transact(Access::Shared, move |documents| {
            Ok(documents.list_sync(offset, limit))
        })
        .await
    }

    async fn count_movies(&self) -> Result<usize, StoreError> {
        self.transact(Access::Shared, |documents| Ok(documents.count_sync()))
            .await
    }

    async fn upsert_movie(&self, movie: Movie) -> Result<(), StoreError> {
        self.transact(Access::Exclusive, move |documents| {
            documents.upsert_sync(movie);
            Ok(())
        })
        .await
    }

    async fn variant(&self, key: &DownloadKey) -> Result<VariantRecord, StoreError> {
        let key = key.clone();
        self.transact(Access::Shared, move |documents| documents.variant_sync(&key))
            .await
    }

    async fn compare_and_set_state(
        &self,
        key: &DownloadKey,
        expected: DownloadState,
        next: DownloadState,
    ) -> Result<VariantRecord, StoreError> {
        let key = key.clone();
        self.transact(Access::Exclusive, move |documents| {
            documents.compare_and_set_sync(&key, expected, next)
        })
        .await
    }

    async fn mark_first_chunks_loaded(
        &self,
        key: &DownloadKey,
        path: &str,
    ) -> Result<DownloadState, StoreError> {
        let (key, path) = (key.clone(), path.to_string());
        self.transact(Access::Exclusive, move |documents| {
            documents.mark_first_chunks_loaded_sync(&key, &path)
        })
        .await
    }

    async fn mark_loaded(&self, key: &DownloadKey, path: &str) -> Result<(), StoreError> {
        let (key, path) = (key.clone(), path.to_string());
        self.transact(Access::Exclusive, move |documents| {
            documents.mark_loaded_sync(&key, &path)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::catalog::TorrentVariant;

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.json");
        let key = DownloadKey::new("tt0000001", "1080p");

        {
            let store = JsonFileStore::open(&path).await.unwrap();
            store
                .upsert_movie(
                    Movie::new("tt0000001", "First")
                        .with_variant(TorrentVariant::new("1080p", "ab".repeat(20))),
                )
                .await
                .unwrap();
            store
                .compare_and_set_state(&key, DownloadState::None, DownloadState::Loading)
                .await
                .unwrap();
            store
                .mark_first_chunks_loaded(&key, "first/first.mkv")
                .await
                .unwrap();
        }

        let reopened = JsonFileStore::open(&path).await.unwrap();
        let record = reopened.variant(&key).await.unwrap();
        assert_eq!(record.variant.status, DownloadState::FirstChunksLoaded);
        assert_eq!(record.variant.fs_path.as_deref(), Some("first/first.mkv"));
        assert!(!path.with_extension("json.tmp").exists());

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"FIRST_CHUNKS_LOADED\""));
    }

    fn seeded_path(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("db.json");
        let movies = vec![
            Movie::new("tt0000001", "First")
                .with_variant(TorrentVariant::new("1080p", "ab".repeat(20))),
        ];
        std::fs::write(&path, serde_json::to_vec(&movies).unwrap()).unwrap();
        path
    }

    #[tokio::test]
    async fn test_stores_sharing_a_file_have_one_claim_winner() {
        let dir = TempDir::new().unwrap();
        let path = seeded_path(&dir);
        let key = DownloadKey::new("tt0000001", "1080p");

        let a = JsonFileStore::open(&path).await.unwrap();
        let b = JsonFileStore::open(&path).await.unwrap();

        a.compare_and_set_state(&key, DownloadState::None, DownloadState::Loading)
            .await
            .unwrap();
        let lost = b
            .compare_and_set_state(&key, DownloadState::None, DownloadState::Loading)
            .await;
        assert!(matches!(
            lost,
            Err(StoreError::Conflict {
                actual: DownloadState::Loading,
                ..
            })
        ));
        assert_eq!(
            b.variant(&key).await.unwrap().variant.status,
            DownloadState::Loading
        );
    }

    #[tokio::test]
    async fn test_concurrent_claims_across_handles_have_one_winner() {
        let dir = TempDir::new().unwrap();
        let path = seeded_path(&dir);
        let key = DownloadKey::new("tt0000001", "1080p");

        let mut stores = Vec::new();
        for _ in 0..4 {
            stores.push(JsonFileStore::open(&path).await.unwrap());
        }
        let claims = futures::future::join_all(stores.iter().map(|store| {
            store.compare_and_set_state(&key, DownloadState::None, DownloadState::Loading)
        }))
        .await;

        assert_eq!(claims.iter().filter(|c| c.is_ok()).count(), 1, "{claims:?}");
    }

    #[tokio::test]
    async fn test_release_by_another_handle_is_not_undone() {
        let dir = TempDir::new().unwrap();
        let path = seeded_path(&dir);
        let key = DownloadKey::new("tt0000001", "1080p");

        let server = JsonFileStore::open(&path).await.unwrap();
        let operator = JsonFileStore::open(&path).await.unwrap();

        server
            .compare_and_set_state(&key, DownloadState::None, DownloadState::Loading)
            .await
            .unwrap();
        operator
            .compare_and_set_state(&key, DownloadState::Loading, DownloadState::None)
            .await
            .unwrap();
        assert_eq!(
            server.variant(&key).await.unwrap().variant.status,
            DownloadState::None
        );

        // An unrelated write from the first handle must not resurrect the claim
        server
            .upsert_movie(Movie::new("tt0000002", "Second"))
            .await
            .unwrap();

        let record = operator.variant(&key).await.unwrap();
        assert_eq!(record.variant.status, DownloadState::None);
        assert_eq!(record.variant.locked_at, None);
        assert_eq!(operator.count_movies().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_failed_update_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let path = seeded_path(&dir);
        let before = std::fs::read(&path).unwrap();
        let store = JsonFileStore::open(&path).await.unwrap();

        let result = store
            .compare_and_set_state(
                &DownloadKey::new("tt0000001", "1080p"),
                DownloadState::Loading,
                DownloadState::None,
            )
            .await;

        assert!(matches!(result, Err(StoreError::Conflict { .. })));
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[tokio::test]
    async fn test_missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::open(dir.path().join("nested/db.json"))
            .await
            .unwrap();
        assert_eq!(store.count_movies().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            JsonFileStore::open(&path).await,
            Err(StoreError::Serialization(_))
        ));
    }
}
