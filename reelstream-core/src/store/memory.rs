//! In-memory document store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;

use super::{DocumentStore, StoreError};
use crate::catalog::{DownloadKey, DownloadState, Movie, TorrentVariant, VariantRecord};

/// Document store keeping every movie in a mutex-guarded map.
///
/// All variant transitions happen while the mutex is held, which makes
/// compare-and-set atomic across tasks.
#[derive(Debug, Default)]
pub struct MemoryStore {
    movies: Mutex<BTreeMap<String, Movie>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_movies(movies: impl IntoIterator<Item = Movie>) -> Self {
        let map = movies
            .into_iter()
            .map(|movie| (movie.imdb_id.clone(), movie))
            .collect();
        Self {
            movies: Mutex::new(map),
        }
    }

    /// Copy of every document, ordered by IMDb id.
    pub fn snapshot(&self) -> Vec<Movie> {
        self.movies.lock().values().cloned().collect()
    }

    pub(crate) fn find_sync(&self, imdb_id: &str) -> Option<Movie> {
        self.movies.lock().get(imdb_id).cloned()
    }

    pub(crate) fn list_sync(&self, offset: usize, limit: usize) -> Vec<Movie> {
        self.movies
            .lock()
            .values()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    pub(crate) fn count_sync(&self) -> usize {
        self.movies.lock().len()
    }

    pub(crate) fn upsert_sync(&self, movie: Movie) {
        self.movies.lock().insert(movie.imdb_id.clone(), movie);
    }

    pub(crate) fn variant_sync(&self, key: &DownloadKey) -> Result<VariantRecord, StoreError> {
        self.update_variant(key, |_| Ok(()))
            .map(|(record, ())| record)
    }

    pub(crate) fn compare_and_set_sync(
        &self,
        key: &DownloadKey,
        expected: DownloadState,
        next: DownloadState,
    ) -> Result<VariantRecord, StoreError> {
        self.update_variant(key, |variant| {
            if variant.status != expected {
                return Err(StoreError::Conflict {
                    key: key.clone(),
                    expected,
                    actual: variant.status,
                });
            }
            if next != expected && !expected.can_transition_to(next) {
                return Err(StoreError::Regression {
                    key: key.clone(),
                    from: expected,
                    to: next,
                });
            }

            variant.status = next;
            if next == DownloadState::Loading {
                variant.locked_at = Some(Utc::now());
            } else if expected == DownloadState::Loading {
                variant.locked_at = None;
            }
            Ok(())
        })
        .map(|(record, ())| record)
    }

    pub(crate) fn mark_first_chunks_loaded_sync(
        &self,
        key: &DownloadKey,
        path: &str,
    ) -> Result<DownloadState, StoreError> {
        self.update_variant(key, |variant| {
            if variant.status == DownloadState::Loaded {
                debug!(%key, "Ignoring first-chunks update for a loaded variant");
                return Ok(DownloadState::Loaded);
            }
            variant.status = DownloadState::FirstChunksLoaded;
            variant.fs_path = Some(path.to_string());
            variant.locked_at = None;
            Ok(variant.status)
        })
        .map(|(_, state)| state)
    }

    pub(crate) fn mark_loaded_sync(&self, key: &DownloadKey, path: &str) -> Result<(), StoreError> {
        self.update_variant(key, |variant| {
            variant.status = DownloadState::Loaded;
            variant.fs_path = Some(path.to_string());
            variant.locked_at = None;
            Ok(())
        })
        .map(|_| ())
    }

    /// Applies `change` to the addressed variant under the lock.
    ///
    /// The variant is left untouched when `change` fails.
    fn update_variant<T>(
        &self,
        key: &DownloadKey,
        change: impl FnOnce(&mut TorrentVariant) -> Result<T, StoreError>,
    ) -> Result<(VariantRecord, T), StoreError> {
        let mut movies = self.movies.lock();
        let unknown = || StoreError::UnknownKey { key: key.clone() };

        let movie = movies.get_mut(&key.imdb_id).ok_or_else(unknown)?;
        let title = movie.title.clone();
        let variant = movie.variant_mut(&key.resolution).ok_or_else(unknown)?;

        let mut working = variant.clone();
        let output = change(&mut working)?;
        *variant = working;

        Ok((
            VariantRecord {
                key: key.clone(),
                title,
                variant: variant.clone(),
            },
            output,
        ))
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find_movie(&self, imdb_id: &str) -> Result<Option<Movie>, StoreError> {
        Ok(self.find_sync(imdb_id))
    }

    async fn list_movies(&self, offset: usize, limit: usize) -> Result<Vec<Movie>, StoreError> {
        Ok(self.list_sync(offset, limit))
    }

    async fn count_movies(&self) -> Result<usize, StoreError> {
        Ok(self.count_sync())
    }

    async fn upsert_movie(&self, movie: Movie) -> Result<(), StoreError> {
        self.upsert_sync(movie);
        Ok(())
    }

    async fn variant(&self, key: &DownloadKey) -> Result<VariantRecord, StoreError> {
        self.variant_sync(key)
    }

    async fn compare_and_set_state(
        &self,
        key: &DownloadKey,
        expected: DownloadState,
        next: DownloadState,
    ) -> Result<VariantRecord, StoreError> {
        self.compare_and_set_sync(key, expected, next)
    }

    async fn mark_first_chunks_loaded(
        &self,
        key: &DownloadKey,
        path: &str,
    ) -> Result<DownloadState, StoreError> {
        self.mark_first_chunks_loaded_sync(key, path)
    }

    async fn mark_loaded(&self, key: &DownloadKey, path: &str) -> Result<(), StoreError> {
        self.mark_loaded_sync(key, path)
    }
}
