//! Catalog documents and download lifecycle state.
//!
//! A [`Movie`] carries one [`TorrentVariant`] per quality. Each variant owns
//! the persisted [`DownloadState`] for its [`DownloadKey`].

pub mod import;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies one downloadable variant: a catalog item at a given quality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DownloadKey {
    pub imdb_id: String,
    pub resolution: String,
}

impl DownloadKey {
    pub fn new(imdb_id: impl Into<String>, resolution: impl Into<String>) -> Self {
        Self {
            imdb_id: imdb_id.into(),
            resolution: resolution.into(),
        }
    }
}

impl fmt::Display for DownloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.imdb_id, self.resolution)
    }
}

/// Persisted lifecycle of one variant's download.
///
/// Ordering follows the lifecycle, so `a < b` means `b` is further along.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DownloadState {
    #[default]
    None,
    Loading,
    FirstChunksLoaded,
    Loaded,
}

impl DownloadState {
    /// Wire token for this state.
    pub fn as_token(self) -> &'static str {
        match self {
            DownloadState::None => "NONE",
            DownloadState::Loading => "LOADING",
            DownloadState::FirstChunksLoaded => "FIRST_CHUNKS_LOADED",
            DownloadState::Loaded => "LOADED",
        }
    }

    /// Whether persisting `next` over `self` is a legal transition.
    ///
    /// Only forward moves are legal, plus the LOADING -> NONE rollback used
    /// when a session fails to start or an operator releases a stale claim.
    pub fn can_transition_to(self, next: DownloadState) -> bool {
        next > self || (self == DownloadState::Loading && next == DownloadState::None)
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

impl FromStr for DownloadState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(DownloadState::None),
            "LOADING" => Ok(DownloadState::Loading),
            "FIRST_CHUNKS_LOADED" => Ok(DownloadState::FirstChunksLoaded),
            "LOADED" => Ok(DownloadState::Loaded),
            _ => Err(format!("Invalid download state: {s}")),
        }
    }
}

/// Where a catalog entry was aggregated from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovieOrigin {
    #[default]
    Yts,
    PopcornTime,
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrewMember {
    pub name: String,
    pub job: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastMember {
    pub character: String,
    pub name: String,
    #[serde(default)]
    pub profile: Option<String>,
}

/// One quality variant of a movie and its download bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentVariant {
    pub resolution: String,
    /// 40-character hex info hash
    pub hash: String,
    /// Magnet URI or other locator supplied by the catalog source
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub seeds: u32,
    #[serde(default)]
    pub peers: u32,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub status: DownloadState,
    /// Path of the selected file, relative to the media directory
    #[serde(default)]
    pub fs_path: Option<String>,
    /// When the current LOADING claim was taken
    #[serde(default)]
    pub locked_at: Option<DateTime<Utc>>,
}

impl TorrentVariant {
    pub fn new(resolution: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            resolution: resolution.into(),
            hash: hash.into(),
            url: None,
            seeds: 0,
            peers: 0,
            size_bytes: 0,
            status: DownloadState::None,
            fs_path: None,
            locked_at: None,
        }
    }

    /// Copies download bookkeeping from a previous revision of the same torrent.
    ///
    /// Returns false (and copies nothing) when the hashes differ.
    pub fn inherit_state(&mut self, previous: &TorrentVariant) -> bool {
        if !self.hash.eq_ignore_ascii_case(&previous.hash) {
            return false;
        }
        self.status = previous.status;
        self.fs_path = previous.fs_path.clone();
        self.locked_at = previous.locked_at;
        true
    }
}

/// A catalog document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    pub imdb_id: String,
    #[serde(default)]
    pub origin: MovieOrigin,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub year: Option<u16>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub crew: Vec<CrewMember>,
    #[serde(default)]
    pub cast: Vec<CastMember>,
    #[serde(default)]
    pub image: Option<String>,
    /// 0 to 10
    #[serde(default)]
    pub rating: Option<f32>,
    /// Minutes
    #[serde(default)]
    pub runtime: Option<u32>,
    #[serde(default)]
    pub torrents: Vec<TorrentVariant>,
}

impl Movie {
    pub fn new(imdb_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            imdb_id: imdb_id.into(),
            origin: MovieOrigin::default(),
            title: title.into(),
            description: String::new(),
            language: None,
            year: None,
            genres: Vec::new(),
            crew: Vec::new(),
            cast: Vec::new(),
            image: None,
            rating: None,
            runtime: None,
            torrents: Vec::new(),
        }
    }

    pub fn with_variant(mut self, variant: TorrentVariant) -> Self {
        self.torrents.push(variant);
        self
    }

    pub fn variant(&self, resolution: &str) -> Option<&TorrentVariant> {
        self.torrents.iter().find(|t| t.resolution == resolution)
    }

    pub fn variant_mut(&mut self, resolution: &str) -> Option<&mut TorrentVariant> {
        self.torrents.iter_mut().find(|t| t.resolution == resolution)
    }

    pub fn key(&self, resolution: &str) -> DownloadKey {
        DownloadKey::new(self.imdb_id.clone(), resolution)
    }

    pub fn summary(&self) -> MovieSummary {
        MovieSummary {
            imdb_id: self.imdb_id.clone(),
            title: self.title.clone(),
            year: self.year,
            rating: self.rating,
            image: self.image.clone(),
            genres: self.genres.clone(),
            resolutions: self.torrents.iter().map(|t| t.resolution.clone()).collect(),
        }
    }
}

/// Listing projection of a [`Movie`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieSummary {
    pub imdb_id: String,
    pub title: String,
    pub year: Option<u16>,
    pub rating: Option<f32>,
    pub image: Option<String>,
    pub genres: Vec<String>,
    pub resolutions: Vec<String>,
}

/// A variant together with the context needed to download it.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantRecord {
    pub key: DownloadKey,
    pub title: String,
    pub variant: TorrentVariant,
}
