//! Catalog import from YTS-style JSON dumps.
//!
//! Accepts either a bare array of movies or the `{"data": {"movies": [...]}}`
//! envelope returned by the `list_movies` endpoint.

use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{Movie, MovieOrigin, TorrentVariant};
use crate::store::{DocumentStore, StoreError};

/// Errors raised while importing a catalog dump.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Failed to read catalog dump {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid catalog dump: {reason}")]
    Parse { reason: String },

    #[error("Store rejected catalog entry: {0}")]
    Store(#[from] StoreError),
}

/// Counts reported after an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    /// Variants whose download state was carried over from the stored copy
    pub preserved_variants: usize,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum YtsDump {
    Envelope { data: YtsData },
    List(Vec<YtsMovie>),
}

#[derive(Debug, Deserialize)]
struct YtsData {
    #[serde(default)]
    movies: Vec<YtsMovie>,
}

#[derive(Debug, Deserialize)]
struct YtsMovie {
    #[serde(default)]
    imdb_code: String,
    title: String,
    #[serde(default)]
    year: Option<u16>,
    #[serde(default)]
    rating: Option<f32>,
    #[serde(default)]
    runtime: Option<u32>,
    #[serde(default)]
    genres: Vec<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description_full: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    medium_cover_image: Option<String>,
    #[serde(default)]
    torrents: Vec<YtsTorrent>,
}

#[derive(Debug, Deserialize)]
struct YtsTorrent {
    hash: String,
    quality: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    seeds: u32,
    #[serde(default)]
    peers: u32,
    #[serde(default)]
    size_bytes: u64,
}

impl From<YtsMovie> for Movie {
    fn from(raw: YtsMovie) -> Self {
        let description = raw
            .description_full
            .filter(|d| !d.is_empty())
            .or(raw.summary)
            .unwrap_or_default();

        Movie {
            imdb_id: raw.imdb_code,
            origin: MovieOrigin::Yts,
            title: raw.title,
            description,
            language: raw.language,
            year: raw.year,
            genres: raw.genres,
            crew: Vec::new(),
            cast: Vec::new(),
            image: raw.medium_cover_image,
            rating: raw.rating.map(|r| r.clamp(0.0, 10.0)),
            runtime: raw.runtime.filter(|r| *r > 0),
            torrents: raw
                .torrents
                .into_iter()
                .map(|t| TorrentVariant {
                    url: t.url,
                    seeds: t.seeds,
                    peers: t.peers,
                    size_bytes: t.size_bytes,
                    ..TorrentVariant::new(t.quality, t.hash.to_ascii_lowercase())
                })
                .collect(),
        }
    }
}

/// Parses a YTS-style dump into catalog documents.
///
/// Entries without an IMDb id are dropped.
///
/// # Errors
///
/// - `ImportError::Parse` - The input is not a recognised dump shape
pub fn parse_yts_dump(json: &str) -> Result<Vec<Movie>, ImportError> {
    let dump: YtsDump = serde_json::from_str(json).map_err(|e| ImportError::Parse {
        reason: e.to_string(),
    })?;

    let raw = match dump {
        YtsDump::Envelope { data } => data.movies,
        YtsDump::List(movies) => movies,
    };

    let total = raw.len();
    let movies: Vec<Movie> = raw
        .into_iter()
        .filter(|m| !m.imdb_code.is_empty())
        .map(Movie::from)
        .collect();

    if movies.len() < total {
        warn!(
            dropped = total - movies.len(),
            "Dropped catalog entries without an IMDb id"
        );
    }

    Ok(movies)
}

/// Reads and parses a dump file.
///
/// # Errors
///
/// - `ImportError::Read` - The file cannot be read
/// - `ImportError::Parse` - The file is not a recognised dump shape
pub async fn load_yts_dump(path: &Path) -> Result<Vec<Movie>, ImportError> {
    let json = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ImportError::Read {
            path: path.display().to_string(),
            source,
        })?;
    parse_yts_dump(&json)
}

/// Upserts movies into the store, keeping download state of unchanged variants.
///
/// # Errors
///
/// - `ImportError::Store` - A read or write against the store failed
pub async fn import_movies(
    store: &dyn DocumentStore,
    movies: Vec<Movie>,
) -> Result<ImportSummary, ImportError> {
    let mut summary = ImportSummary::default();

    for mut movie in movies {
        if movie.torrents.is_empty() {
            debug!(imdb_id = %movie.imdb_id, "Skipping movie without torrents");
            summary.skipped += 1;
            continue;
        }

        match store.find_movie(&movie.imdb_id).await? {
            Some(existing) => {
                for variant in &mut movie.torrents {
                    if let Some(previous) = existing.variant(&variant.resolution)
                        && variant.inherit_state(previous)
                    {
                        summary.preserved_variants += 1;
                    }
                }
                summary.updated += 1;
            }
            None => summary.inserted += 1,
        }

        store.upsert_movie(movie).await?;
    }

    info!(
        inserted = summary.inserted,
        updated = summary.updated,
        skipped = summary.skipped,
        preserved = summary.preserved_variants,
        "Catalog import finished"
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DownloadKey, DownloadState};
    use crate::store::MemoryStore;

    const ENVELOPE: &str = r#"{
        "status": "ok",
        "data": {
            "movie_count": 2,
            "movies": [
                {
                    "imdb_code": "tt0133093",
                    "title": "The Matrix",
                    "year": 1999,
                    "rating": 8.7,
                    "runtime": 136,
                    "genres": ["Action", "Sci-Fi"],
                    "summary": "short",
                    "description_full": "A hacker learns the truth.",
                    "language": "en",
                    "medium_cover_image": "https://img.example/matrix.jpg",
                    "torrents": [
                        {"hash": "ABCDEF0123456789ABCDEF0123456789ABCDEF01", "quality": "720p", "seeds": 10, "peers": 2, "size_bytes": 1000},
                        {"hash": "0123456789ABCDEF0123456789ABCDEF01234567", "quality": "1080p"}
                    ]
                },
                {"imdb_code": "", "title": "No id", "torrents": []}
            ]
        }
    }"#;

    #[test]
    fn test_parse_envelope() {
        let movies = parse_yts_dump(ENVELOPE).unwrap();
        assert_eq!(movies.len(), 1);

        let matrix = &movies[0];
        assert_eq!(matrix.imdb_id, "tt0133093");
        assert_eq!(matrix.description, "A hacker learns the truth.");
        assert_eq!(matrix.origin, MovieOrigin::Yts);
        assert_eq!(matrix.torrents.len(), 2);
        assert_eq!(
            matrix.variant("720p").unwrap().hash,
            "abcdef0123456789abcdef0123456789abcdef01"
        );
        assert_eq!(matrix.variant("1080p").unwrap().status, DownloadState::None);
    }

    #[test]
    fn test_parse_bare_list_clamps_rating() {
        let json = r#"[{"imdb_code": "tt1", "title": "Loud", "rating": 42.0, "summary": "s",
                        "torrents": [{"hash": "aa", "quality": "720p"}]}]"#;
        let movies = parse_yts_dump(json).unwrap();
        assert_eq!(movies[0].rating, Some(10.0));
        assert_eq!(movies[0].description, "s");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_yts_dump("{\"nope\": true}"),
            Err(ImportError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn test_reimport_preserves_download_state() {
        let store = MemoryStore::new();
        let movies = parse_yts_dump(ENVELOPE).unwrap();
        let first = import_movies(&store, movies.clone()).await.unwrap();
        assert_eq!(first.inserted, 1);

        let key = DownloadKey::new("tt0133093", "720p");
        store
            .compare_and_set_state(&key, DownloadState::None, DownloadState::Loading)
            .await
            .unwrap();
        store.mark_loaded(&key, "matrix/matrix.mp4").await.unwrap();

        let second = import_movies(&store, movies).await.unwrap();
        assert_eq!(second.updated, 1);
        assert_eq!(second.preserved_variants, 2);

        let record = store.variant(&key).await.unwrap();
        assert_eq!(record.variant.status, DownloadState::Loaded);
        assert_eq!(record.variant.fs_path.as_deref(), Some("matrix/matrix.mp4"));
    }
}
