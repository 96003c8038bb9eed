//! Development swarm backed by a local seed directory.
//!
//! The torrent with info hash `H` is whatever lives under `seed_dir/H/`.
//! Opening it hashes the seed into pieces, then "downloads" those pieces into
//! the media directory in a configurable order, verifying each one before it
//! is announced. This gives the coordinator and tracker a real, non-sequential
//! arrival stream without any network.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, trace};

use super::layout::file_segments;
use super::{
    InfoHash, MagnetLocator, PieceIndex, SwarmEngine, SwarmError, SwarmEvent, SwarmFile,
    SwarmMetadata, SwarmSession, SwarmStorage, TorrentLayout,
};
use crate::config::ReelstreamConfig;

/// Order in which the development swarm delivers pieces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrivalOrder {
    Sequential,
    /// Deterministic shuffle driven by `seed`
    Shuffled { seed: u64 },
}

impl ArrivalOrder {
    pub fn schedule(self, piece_count: u32) -> Vec<u32> {
        let mut order: Vec<u32> = (0..piece_count).collect();
        if let ArrivalOrder::Shuffled { seed } = self {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            order.shuffle(&mut rng);
        }
        order
    }
}

/// Swarm engine serving torrents from `seed_dir/<info hash>/`.
#[derive(Debug, Clone)]
pub struct LocalSwarmEngine {
    seed_dir: PathBuf,
    media_dir: PathBuf,
    piece_length: u64,
    piece_delay: Duration,
    order: ArrivalOrder,
}

impl LocalSwarmEngine {
    pub fn new(seed_dir: impl Into<PathBuf>, media_dir: impl Into<PathBuf>) -> Self {
        Self {
            seed_dir: seed_dir.into(),
            media_dir: media_dir.into(),
            piece_length: 256 * 1024,
            piece_delay: Duration::ZERO,
            order: ArrivalOrder::Sequential,
        }
    }

    pub fn from_config(config: &ReelstreamConfig) -> Self {
        let order = match config.swarm.shuffle_seed {
            Some(seed) => ArrivalOrder::Shuffled { seed },
            None => ArrivalOrder::Sequential,
        };
        Self::new(&config.swarm.seed_dir, &config.media.media_dir)
            .with_piece_length(config.swarm.piece_length)
            .with_piece_delay(config.swarm.piece_delay)
            .with_order(order)
    }

    pub fn with_piece_length(mut self, piece_length: u64) -> Self {
        self.piece_length = piece_length.max(1);
        self
    }

    pub fn with_piece_delay(mut self, delay: Duration) -> Self {
        self.piece_delay = delay;
        self
    }

    pub fn with_order(mut self, order: ArrivalOrder) -> Self {
        self.order = order;
        self
    }
}

#[async_trait]
impl SwarmEngine for LocalSwarmEngine {
    #[instrument(skip(self, locator), fields(info_hash = %locator.info_hash))]
    async fn open(&self, locator: &MagnetLocator) -> Result<SwarmSession, SwarmError> {
        let info_hash = locator.info_hash;
        let root = self.seed_dir.join(info_hash.to_string());

        let is_dir = tokio::fs::metadata(&root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            debug!(seed = %root.display(), "No seed directory for torrent");
            return Err(SwarmError::NoPeers { info_hash });
        }

        let seeded = collect_seed_files(&root).await?;
        if seeded.is_empty() {
            return Err(SwarmError::NoPeers { info_hash });
        }

        let name = info_hash.to_string();
        let mut files = Vec::with_capacity(seeded.len());
        let mut sources = Vec::with_capacity(seeded.len());
        let mut offset = 0u64;
        for (relative, length) in seeded {
            files.push(SwarmFile {
                path: Path::new(&name).join(&relative),
                length,
                offset,
            });
            sources.push(root.join(&relative));
            offset += length;
        }

        let layout = TorrentLayout::new(self.piece_length, offset);
        let piece_hashes = hash_pieces(&sources, &files, &layout).await?;
        prepare_media_files(&self.media_dir, &files).await?;

        let metadata = SwarmMetadata {
            name,
            piece_length: layout.piece_length,
            total_length: layout.total_length,
            piece_count: layout.piece_count,
            files,
        };

        info!(
            files = metadata.files.len(),
            pieces = metadata.piece_count,
            bytes = metadata.total_length,
            "Opened local swarm session"
        );

        let storage = Arc::new(LocalSwarmStorage::new(
            self.media_dir.clone(),
            layout.piece_count,
        ));
        let (tx, rx) = mpsc::channel(64);

        let feed = PieceFeed {
            info_hash,
            sources,
            media_dir: self.media_dir.clone(),
            layout,
            piece_hashes,
            schedule: self.order.schedule(layout.piece_count),
            delay: self.piece_delay,
            storage: storage.clone(),
        };
        tokio::spawn(feed.run(metadata, tx));

        Ok(SwarmSession::new(info_hash, rx, storage))
    }
}

/// Pieces written so far, readable from the media directory.
#[derive(Debug)]
pub struct LocalSwarmStorage {
    media_dir: PathBuf,
    present: RwLock<Vec<bool>>,
}

impl LocalSwarmStorage {
    fn new(media_dir: PathBuf, piece_count: u32) -> Self {
        Self {
            media_dir,
            present: RwLock::new(vec![false; piece_count as usize]),
        }
    }

    fn mark(&self, index: PieceIndex) {
        if let Some(slot) = self.present.write().get_mut(index.0 as usize) {
            *slot = true;
        }
    }
}

#[async_trait]
impl SwarmStorage for LocalSwarmStorage {
    fn has_piece(&self, index: PieceIndex) -> bool {
        self.present
            .read()
            .get(index.0 as usize)
            .copied()
            .unwrap_or(false)
    }

    async fn read(&self, file: &SwarmFile, offset: u64, len: usize) -> Result<Bytes, SwarmError> {
        let available = file.length.saturating_sub(offset);
        let len = (len as u64).min(available) as usize;
        let mut buf = vec![0u8; len];
        if len > 0 {
            read_exact_at(&self.media_dir.join(&file.path), offset, &mut buf).await?;
        }
        Ok(Bytes::from(buf))
    }
}

struct PieceFeed {
    info_hash: InfoHash,
    sources: Vec<PathBuf>,
    media_dir: PathBuf,
    layout: TorrentLayout,
    piece_hashes: Vec<[u8; 20]>,
    schedule: Vec<u32>,
    delay: Duration,
    storage: Arc<LocalSwarmStorage>,
}

impl PieceFeed {
    /// Delivers every scheduled piece, then reports the session drained.
    ///
    /// A dropped receiver does not stop the transfer. A piece that fails
    /// verification ends the session without `Drained`.
    async fn run(self, metadata: SwarmMetadata, tx: mpsc::Sender<SwarmEvent>) {
        let files = metadata.files.clone();
        notify(&tx, SwarmEvent::MetadataReady(metadata)).await;

        for &index in &self.schedule {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let index = PieceIndex(index);
            if let Err(e) = self.transfer(&files, index).await {
                error!(
                    info_hash = %self.info_hash,
                    piece = %index,
                    error = %e,
                    "Piece transfer failed"
                );
                return;
            }
            self.storage.mark(index);
            trace!(info_hash = %self.info_hash, piece = %index, "Piece arrived");
            notify(&tx, SwarmEvent::PieceArrived(index)).await;
        }

        info!(info_hash = %self.info_hash, pieces = self.schedule.len(), "Local swarm drained");
        notify(&tx, SwarmEvent::Drained).await;
    }

    async fn transfer(&self, files: &[SwarmFile], index: PieceIndex) -> Result<(), SwarmError> {
        let span = self.layout.piece_span(index);
        let data = read_span(&self.sources, files, span.start, span.end - span.start).await?;

        if sha1_digest(&data) != self.piece_hashes[index.0 as usize] {
            return Err(SwarmError::PieceVerification { index });
        }

        for segment in file_segments(files, span.start, data.len() as u64) {
            let path = self.media_dir.join(&files[segment.file_index].path);
            let mut file = tokio::fs::OpenOptions::new().write(true).open(&path).await?;
            file.seek(SeekFrom::Start(segment.file_offset)).await?;
            let from = segment.range_offset as usize;
            file.write_all(&data[from..from + segment.len as usize]).await?;
            file.flush().await?;
        }
        Ok(())
    }
}

async fn notify(tx: &mpsc::Sender<SwarmEvent>, event: SwarmEvent) {
    if tx.send(event).await.is_err() {
        trace!("Swarm event dropped, no session listener");
    }
}

/// Regular, non-hidden files under `root`, as (relative path, length), sorted by path.
async fn collect_seed_files(root: &Path) -> Result<Vec<(PathBuf, u64)>, SwarmError> {
    let mut files = Vec::new();
    let mut dirs_to_process = vec![root.to_path_buf()];

    while let Some(current_dir) = dirs_to_process.pop() {
        let mut entries = tokio::fs::read_dir(&current_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let metadata = entry.metadata().await?;

            if metadata.is_dir() {
                dirs_to_process.push(path);
            } else if metadata.is_file()
                && let Some(name) = path.file_name().and_then(|n| n.to_str())
                && !name.starts_with('.')
                && let Ok(relative) = path.strip_prefix(root)
            {
                files.push((relative.to_path_buf(), metadata.len()));
            }
        }
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

async fn hash_pieces(
    sources: &[PathBuf],
    files: &[SwarmFile],
    layout: &TorrentLayout,
) -> Result<Vec<[u8; 20]>, SwarmError> {
    let mut hashes = Vec::with_capacity(layout.piece_count as usize);
    for index in 0..layout.piece_count {
        let span = layout.piece_span(PieceIndex(index));
        let data = read_span(sources, files, span.start, span.end - span.start).await?;
        hashes.push(sha1_digest(&data));
    }
    Ok(hashes)
}

fn sha1_digest(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let hash = hasher.finalize();
    let mut arr = [0u8; 20];
    arr.copy_from_slice(&hash[..20]);
    arr
}

/// Creates every destination file at its final length.
async fn prepare_media_files(media_dir: &Path, files: &[SwarmFile]) -> Result<(), SwarmError> {
    for file in files {
        let path = media_dir.join(&file.path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let handle = tokio::fs::File::create(&path).await?;
        handle.set_len(file.length).await?;
    }
    Ok(())
}

/// Reads torrent bytes `start..start + len` from the seed files.
async fn read_span(
    sources: &[PathBuf],
    files: &[SwarmFile],
    start: u64,
    len: u64,
) -> Result<Vec<u8>, SwarmError> {
    let mut buf = vec![0u8; len as usize];
    for segment in file_segments(files, start, len) {
        let from = segment.range_offset as usize;
        read_exact_at(
            &sources[segment.file_index],
            segment.file_offset,
            &mut buf[from..from + segment.len as usize],
        )
        .await?;
    }
    Ok(buf)
}

async fn read_exact_at(path: &Path, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    file.read_exact(buf).await?;
    Ok(())
}
