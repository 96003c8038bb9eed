//! Centralized configuration for Reelstream.
//!
//! All tunable parameters and settings are defined here to avoid
//! hard-coded values scattered throughout the codebase.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Bootstrap trackers appended to every magnet locator built from a bare hash.
pub const DEFAULT_TRACKERS: &[&str] = &[
    "udp://open.demonii.com:1337/announce",
    "udp://tracker.openbittorrent.com:80",
    "udp://tracker.coppersurfer.tk:6969",
    "udp://glotorrents.pw:6969/announce",
    "udp://tracker.opentrackr.org:1337/announce",
    "udp://torrent.gresille.org:80/announce",
    "udp://p4p.arenabg.com:1337",
    "udp://tracker.leechers-paradise.org:6969",
];

/// Central configuration for all Reelstream components.
///
/// Groups related configuration settings into logical sections.
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct ReelstreamConfig {
    pub media: MediaConfig,
    pub swarm: SwarmConfig,
    pub store: StoreConfig,
    pub server: ServerConfig,
}

/// Media directory and delivery configuration.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Root directory downloaded files are written under
    pub media_dir: PathBuf,
    /// Extensions streamed without transcoding
    pub passthrough_extensions: Vec<String>,
    /// Extensions eligible for selection inside a torrent
    pub selectable_extensions: Vec<String>,
    /// Size of each read issued against a content provider
    pub chunk_size: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            media_dir: PathBuf::from("movies"),
            passthrough_extensions: vec!["mp4".to_string(), "webm".to_string()],
            selectable_extensions: ["mp4", "mkv", "webm", "avi"]
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            chunk_size: 256 * 1024, // 256 KiB
        }
    }
}

/// Swarm session and piece-tracking configuration.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Directory the development swarm serves torrents from, one `<hash>/` per torrent
    pub seed_dir: PathBuf,
    /// Bootstrap peer-discovery endpoints
    pub trackers: Vec<String>,
    /// Contiguous completion (percent of pieces) that makes a file playable
    pub playable_threshold_percent: f64,
    /// How long to wait for torrent metadata before giving up
    pub metadata_timeout: Duration,
    /// Piece length used by the development swarm
    pub piece_length: u64,
    /// Simulated delay between piece arrivals in the development swarm
    pub piece_delay: Duration,
    /// Seed for shuffled piece arrival order (None = sequential)
    pub shuffle_seed: Option<u64>,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            seed_dir: PathBuf::from("seeds"),
            trackers: DEFAULT_TRACKERS.iter().map(|t| t.to_string()).collect(),
            playable_threshold_percent: 10.0,
            metadata_timeout: Duration::from_secs(60),
            piece_length: 256 * 1024, // 256 KiB
            piece_delay: Duration::from_millis(20),
            shuffle_seed: None,
        }
    }
}

/// Document store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// JSON file backing the store (None = in-memory only)
    pub path: Option<PathBuf>,
    /// Age after which a LOADING claim with no live session is reported as stale
    pub stale_lock_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from("db.json")),
            stale_lock_timeout: Duration::from_secs(30 * 60), // 30 minutes
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the API server binds to
    pub bind: SocketAddr,
    /// Base URL of the subtitle metadata service (None = no subtitles)
    pub subtitles_url: Option<String>,
    /// Page size used by the catalog listing when none is requested
    pub default_page_size: usize,
    /// Largest page size the catalog listing accepts
    pub max_page_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            subtitles_url: None,
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

impl ReelstreamConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparsable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("REELSTREAM_MEDIA_DIR") {
            config.media.media_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("REELSTREAM_SEED_DIR") {
            config.swarm.seed_dir = PathBuf::from(dir);
        }

        if let Ok(threshold) = std::env::var("REELSTREAM_PLAYABLE_THRESHOLD")
            && let Ok(percent) = threshold.parse::<f64>()
            && (0.0..=100.0).contains(&percent)
        {
            config.swarm.playable_threshold_percent = percent;
        }

        if let Ok(extensions) = std::env::var("REELSTREAM_PASSTHROUGH_EXTENSIONS") {
            config.media.passthrough_extensions = parse_extension_list(&extensions);
        }

        if let Ok(path) = std::env::var("REELSTREAM_STORE_PATH") {
            config.store.path = if path.is_empty() {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }

        if let Ok(secs) = std::env::var("REELSTREAM_STALE_LOCK_SECS")
            && let Ok(seconds) = secs.parse::<u64>()
        {
            config.store.stale_lock_timeout = Duration::from_secs(seconds);
        }

        if let Ok(seed) = std::env::var("REELSTREAM_SHUFFLE_SEED")
            && let Ok(seed_value) = seed.parse::<u64>()
        {
            config.swarm.shuffle_seed = Some(seed_value);
        }

        if let Ok(bind) = std::env::var("REELSTREAM_BIND")
            && let Ok(addr) = bind.parse::<SocketAddr>()
        {
            config.server.bind = addr;
        }

        if let Ok(url) = std::env::var("REELSTREAM_SUBTITLES_URL") {
            config.server.subtitles_url = Some(url);
        }

        config
    }

    /// Creates a configuration optimized for testing.
    ///
    /// In-memory store, no simulated piece delay and a short metadata timeout.
    pub fn for_testing() -> Self {
        Self {
            swarm: SwarmConfig {
                metadata_timeout: Duration::from_millis(500),
                piece_length: 16 * 1024,
                piece_delay: Duration::ZERO,
                shuffle_seed: Some(42),
                ..Default::default()
            },
            store: StoreConfig {
                path: None,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Whether files with this extension are streamed without transcoding.
    pub fn is_passthrough(&self, extension: &str) -> bool {
        contains_extension(&self.media.passthrough_extensions, extension)
    }
}

/// Splits a comma-separated extension list, normalizing case and dots.
pub fn parse_extension_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

/// Case-insensitive membership test for extension allowlists.
pub fn contains_extension(list: &[String], extension: &str) -> bool {
    let extension = extension.trim_start_matches('.');
    list.iter().any(|ext| ext.eq_ignore_ascii_case(extension))
}
