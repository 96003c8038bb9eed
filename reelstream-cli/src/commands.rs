//! CLI command implementations

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Subcommand;
use reelstream_core::catalog::import::{import_movies, load_yts_dump};
use reelstream_core::{DownloadKey, ReelstreamConfig, ReelstreamError};
use reelstream_web::{AppState, build_state, run_server};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start the streaming API server
    Serve {
        /// Address to bind to
        #[arg(long)]
        bind: Option<SocketAddr>,
        /// Directory downloaded media is written under
        #[arg(long)]
        media_dir: Option<PathBuf>,
        /// Directory the development swarm seeds torrents from
        #[arg(long)]
        seed_dir: Option<PathBuf>,
        /// Base URL of the subtitle metadata service
        #[arg(long)]
        subtitles_url: Option<String>,
    },
    /// Import a YTS-style JSON catalog dump into the store
    Import {
        /// Path to the dump file
        file: PathBuf,
    },
    /// List catalog entries and their download states
    List {
        #[arg(long, default_value = "0")]
        offset: usize,
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Show the download state of one variant
    Status {
        /// IMDb id of the movie
        id: String,
        /// Resolution of the variant, e.g. 1080p
        resolution: String,
    },
    /// Release a stale LOADING claim so the download can be retried
    Release {
        /// IMDb id of the movie
        id: String,
        /// Resolution of the variant, e.g. 1080p
        resolution: String,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns the error of the command that failed
pub async fn handle_command(command: Commands, store: Option<PathBuf>) -> anyhow::Result<()> {
    let mut config = ReelstreamConfig::from_env();
    if let Some(path) = store {
        config.store.path = Some(path);
    }

    match command {
        Commands::Serve {
            bind,
            media_dir,
            seed_dir,
            subtitles_url,
        } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(dir) = media_dir {
                config.media.media_dir = dir;
            }
            if let Some(dir) = seed_dir {
                config.swarm.seed_dir = dir;
            }
            if subtitles_url.is_some() {
                config.server.subtitles_url = subtitles_url;
            }
            serve(config).await
        }
        Commands::Import { file } => import_catalog(&config, file).await,
        Commands::List { offset, limit } => list_movies(&config, offset, limit).await,
        Commands::Status { id, resolution } => {
            show_status(&config, DownloadKey::new(id, resolution)).await
        }
        Commands::Release { id, resolution } => {
            release_claim(&config, DownloadKey::new(id, resolution)).await
        }
    }
}

/// Run the API server until Ctrl-C
///
/// # Errors
/// - `ReelstreamError::Store` - The store file could not be loaded
/// - `ReelstreamError::Io` - The listener could not bind
pub async fn serve(config: ReelstreamConfig) -> anyhow::Result<()> {
    if config.store.path.is_none() {
        tracing::warn!("No store path configured, catalog will not survive a restart");
    }
    run_server(config).await.map_err(report)
}

/// Import a catalog dump
///
/// # Errors
/// - `ImportError::Read` - The dump file could not be read
/// - `ImportError::Parse` - The dump is not a recognised shape
/// - `ImportError::Store` - The store rejected a document
pub async fn import_catalog(config: &ReelstreamConfig, file: PathBuf) -> anyhow::Result<()> {
    let state = persistent_state(config).await?;

    println!("Importing catalog from {}", file.display());
    let movies = load_yts_dump(&file)
        .await
        .map_err(|e| report(e.into()))?;
    let found = movies.len();
    let summary = import_movies(state.store.as_ref(), movies)
        .await
        .map_err(|e| report(e.into()))?;

    println!("Read {found} movies");
    println!("  Inserted: {}", summary.inserted);
    println!("  Updated:  {}", summary.updated);
    println!("  Skipped:  {} (no torrents)", summary.skipped);
    println!(
        "  Download state kept for {} variants",
        summary.preserved_variants
    );

    Ok(())
}

/// List catalog entries
///
/// # Errors
/// - `ReelstreamError::Store` - The store could not be read
pub async fn list_movies(
    config: &ReelstreamConfig,
    offset: usize,
    limit: usize,
) -> anyhow::Result<()> {
    let state = persistent_state(config).await?;
    let total = state
        .store
        .count_movies()
        .await
        .map_err(|e| report(e.into()))?;
    let movies = state
        .store
        .list_movies(offset, limit)
        .await
        .map_err(|e| report(e.into()))?;

    println!("Catalog ({total} movies)");
    println!("{:-<60}", "");

    if movies.is_empty() {
        println!("No movies in this range.");
        println!("Use 'reelstream import <file>' to load a catalog dump.");
        return Ok(());
    }

    for movie in movies {
        let year = movie.year.map(|y| y.to_string()).unwrap_or_default();
        println!("{}  {} ({year})", movie.imdb_id, movie.title);
        for variant in &movie.torrents {
            println!(
                "    {:<6} {:<20} {}",
                variant.resolution,
                variant.status,
                variant.fs_path.as_deref().unwrap_or("-")
            );
        }
    }

    Ok(())
}

/// Show the persisted state of one variant
///
/// # Errors
/// - `CoordinatorError::UnknownKey` - No such movie or resolution
pub async fn show_status(config: &ReelstreamConfig, key: DownloadKey) -> anyhow::Result<()> {
    let state = persistent_state(config).await?;
    let status = state
        .coordinator
        .status(&key)
        .await
        .map_err(|e| report(e.into()))?;

    println!("Variant {key}");
    println!("  State: {}", status.state);
    if let Some(path) = &status.fs_path {
        println!("  Path: {path}");
    }
    if let Some(locked_at) = status.locked_at {
        println!("  Claimed at: {locked_at}");
    }
    if status.stale {
        println!("  Claim looks stale, run 'reelstream release {} {}' to retry", key.imdb_id, key.resolution);
    }

    Ok(())
}

/// Release a LOADING claim left behind by a previous process
///
/// # Errors
/// - `CoordinatorError::UnknownKey` - No such movie or resolution
/// - `CoordinatorError::StateConflict` - The variant is not LOADING
pub async fn release_claim(config: &ReelstreamConfig, key: DownloadKey) -> anyhow::Result<()> {
    let state = persistent_state(config).await?;
    state
        .coordinator
        .release(&key)
        .await
        .map_err(|e| report(e.into()))?;

    println!("Released claim on {key}");
    println!("  The next download request will start a fresh session.");

    Ok(())
}

/// State over the configured store file. Operator commands refuse to run
/// against a throwaway in-memory store.
async fn persistent_state(config: &ReelstreamConfig) -> anyhow::Result<AppState> {
    let Some(path) = &config.store.path else {
        bail!("No store path configured, pass --store or set REELSTREAM_STORE_PATH");
    };
    build_state(config)
        .await
        .map_err(report)
        .with_context(|| format!("failed to open store {}", path.display()))
}

fn report(error: ReelstreamError) -> anyhow::Error {
    tracing::debug!(error = %error, "Command failed");
    if error.is_user_error() {
        anyhow::anyhow!(error.user_message())
    } else {
        anyhow::Error::new(error)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use reelstream_core::{DocumentStore, DownloadState, JsonFileStore, Movie, TorrentVariant};
    use tempfile::TempDir;

    use super::*;

    const IMDB_ID: &str = "tt0133093";

    fn config_for(dir: &TempDir) -> ReelstreamConfig {
        let mut config = ReelstreamConfig::for_testing();
        config.store.path = Some(dir.path().join("db.json"));
        config.media.media_dir = dir.path().join("media");
        config.swarm.seed_dir = dir.path().join("seeds");
        config
    }

    fn key() -> DownloadKey {
        DownloadKey::new(IMDB_ID, "1080p")
    }

    async fn seed_variant(config: &ReelstreamConfig, variant: TorrentVariant) -> JsonFileStore {
        let store = JsonFileStore::open(config.store.path.clone().unwrap())
            .await
            .unwrap();
        store
            .upsert_movie(Movie::new(IMDB_ID, "The Matrix").with_variant(variant))
            .await
            .unwrap();
        store
    }

    fn claimed_variant(hours_ago: i64) -> TorrentVariant {
        let mut variant = TorrentVariant::new("1080p", "ab".repeat(20));
        variant.status = DownloadState::Loading;
        variant.locked_at = Some(Utc::now() - chrono::Duration::hours(hours_ago));
        variant
    }

    #[tokio::test]
    async fn test_release_claim_clears_stale_loading() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        let store = seed_variant(&config, claimed_variant(2)).await;

        let result = release_claim(&config, key()).await;
        assert!(result.is_ok(), "{result:?}");

        let record = store.variant(&key()).await.unwrap();
        assert_eq!(record.variant.status, DownloadState::None);
        assert_eq!(record.variant.locked_at, None);

        let raw = std::fs::read_to_string(config.store.path.as_ref().unwrap()).unwrap();
        assert!(raw.contains("\"NONE\""));
        assert!(!raw.contains("\"LOADING\""));
    }

    #[tokio::test]
    async fn test_release_claim_refuses_idle_variant() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        let store =
            seed_variant(&config, TorrentVariant::new("1080p", "ab".repeat(20))).await;

        let result = release_claim(&config, key()).await;
        assert!(result.is_err());
        assert_eq!(
            store.variant(&key()).await.unwrap().variant.status,
            DownloadState::None
        );
    }

    #[tokio::test]
    async fn test_release_claim_refuses_fresh_claim() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        let store = seed_variant(&config, claimed_variant(0)).await;

        let result = release_claim(&config, key()).await;
        assert!(result.is_err());
        assert_eq!(
            store.variant(&key()).await.unwrap().variant.status,
            DownloadState::Loading
        );
    }

    #[tokio::test]
    async fn test_release_claim_unknown_key() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        seed_variant(&config, claimed_variant(2)).await;

        let result = release_claim(&config, DownloadKey::new(IMDB_ID, "2160p")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_operator_commands_require_store_path() {
        let mut config = ReelstreamConfig::for_testing();
        config.store.path = None;

        let result = persistent_state(&config).await;
        let message = result.err().unwrap().to_string();
        assert!(message.contains("No store path configured"), "{message}");

        assert!(release_claim(&config, key()).await.is_err());
        assert!(show_status(&config, key()).await.is_err());
        assert!(list_movies(&config, 0, 20).await.is_err());
    }

    #[tokio::test]
    async fn test_show_status_reads_shared_store() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        seed_variant(&config, claimed_variant(2)).await;

        assert!(show_status(&config, key()).await.is_ok());
        assert!(
            show_status(&config, DownloadKey::new("tt0000000", "1080p"))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_import_catalog_round_trip() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        let dump = dir.path().join("movies.json");
        std::fs::write(
            &dump,
            format!(
                r#"[{{"imdb_code": "{IMDB_ID}", "title": "The Matrix", "year": 1999,
                      "torrents": [{{"hash": "{}", "quality": "1080p"}}]}},
                    {{"imdb_code": "tt0000002", "title": "No torrents", "torrents": []}}]"#,
                "AB".repeat(20)
            ),
        )
        .unwrap();

        import_catalog(&config, dump.clone()).await.unwrap();

        let store = JsonFileStore::open(config.store.path.clone().unwrap())
            .await
            .unwrap();
        assert_eq!(store.count_movies().await.unwrap(), 1);
        let record = store.variant(&key()).await.unwrap();
        assert_eq!(record.title, "The Matrix");
        assert_eq!(record.variant.hash, "ab".repeat(20));
        assert_eq!(record.variant.status, DownloadState::None);

        // Re-importing keeps the download state of unchanged variants
        store
            .compare_and_set_state(&key(), DownloadState::None, DownloadState::Loading)
            .await
            .unwrap();
        import_catalog(&config, dump).await.unwrap();
        assert_eq!(
            store.variant(&key()).await.unwrap().variant.status,
            DownloadState::Loading
        );
        assert!(list_movies(&config, 0, 20).await.is_ok());
    }

    #[tokio::test]
    async fn test_import_catalog_missing_dump() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);

        let result = import_catalog(&config, dir.path().join("absent.json")).await;
        assert!(result.is_err());
    }
}
