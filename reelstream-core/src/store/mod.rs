//! Persisted catalog documents and per-variant download state.
//!
//! The store's compare-and-set is the only lock guarding a variant's
//! NONE -> LOADING claim, so every implementation must apply it atomically.

pub mod json_file;
pub mod memory;

use async_trait::async_trait;

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

use crate::catalog::{DownloadKey, DownloadState, Movie, VariantRecord};

/// Errors raised by document store implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No movie or no variant at that resolution
    #[error("Unknown download key: {key}")]
    UnknownKey { key: DownloadKey },

    /// Compare-and-set lost: the stored state was not the expected one
    #[error("State conflict on {key}: expected {expected}, found {actual}")]
    Conflict {
        key: DownloadKey,
        expected: DownloadState,
        actual: DownloadState,
    },

    /// Requested transition would move the state backwards
    #[error("Refusing to move {key} from {from} to {to}")]
    Regression {
        key: DownloadKey,
        from: DownloadState,
        to: DownloadState,
    },

    #[error("Store I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Document store for catalog entries and their download state.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_movie(&self, imdb_id: &str) -> Result<Option<Movie>, StoreError>;

    /// Movies ordered by IMDb id.
    async fn list_movies(&self, offset: usize, limit: usize) -> Result<Vec<Movie>, StoreError>;

    async fn count_movies(&self) -> Result<usize, StoreError>;

    /// Inserts or replaces a whole document.
    async fn upsert_movie(&self, movie: Movie) -> Result<(), StoreError>;

    /// Reads the variant addressed by `key`.
    ///
    /// # Errors
    ///
    /// - `StoreError::UnknownKey` - No such movie or resolution
    async fn variant(&self, key: &DownloadKey) -> Result<VariantRecord, StoreError>;

    /// Atomically moves `key` from `expected` to `next`.
    ///
    /// Claiming LOADING stamps `locked_at`; leaving LOADING clears it.
    ///
    /// # Errors
    ///
    /// - `StoreError::UnknownKey` - No such movie or resolution
    /// - `StoreError::Conflict` - The stored state is not `expected`
    /// - `StoreError::Regression` - `next` is behind `expected` (other than the LOADING rollback)
    async fn compare_and_set_state(
        &self,
        key: &DownloadKey,
        expected: DownloadState,
        next: DownloadState,
    ) -> Result<VariantRecord, StoreError>;

    /// Records that the opening pieces are playable from `path`.
    ///
    /// A variant already LOADED is left untouched. Returns the resulting state.
    async fn mark_first_chunks_loaded(
        &self,
        key: &DownloadKey,
        path: &str,
    ) -> Result<DownloadState, StoreError>;

    /// Records that the whole file is available at `path`.
    async fn mark_loaded(&self, key: &DownloadKey, path: &str) -> Result<(), StoreError>;
}
