//! Test doubles and fixtures shared by unit and integration tests.
//!
//! Only compiled for tests or with the `test-utils` feature.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use parking_lot::{Mutex, RwLock};
use sha1::{Digest, Sha1};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::catalog::{DownloadKey, Movie, TorrentVariant};
use crate::session::ContentFile;
use crate::streaming::{
    ByteStream, ContentProvider, OutputFormat, ProviderError, SourceKind, TranscodeError,
    Transcoder,
};
use crate::swarm::{
    InfoHash, MagnetLocator, PieceIndex, SwarmEngine, SwarmError, SwarmEvent, SwarmFile,
    SwarmMetadata, SwarmSession, SwarmStorage, TorrentLayout,
};
use crate::tracker::TrackerProgress;

/// Deterministic, non-repeating-per-piece payload of `len` bytes.
pub fn pattern_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// 40-character hex hash with every byte set to `seed`.
pub fn fixture_hash(seed: u8) -> String {
    hex::encode([seed; 20])
}

/// A movie with one variant per `(resolution, hash)` pair.
pub fn fixture_movie(imdb_id: &str, variants: &[(&str, &str)]) -> Movie {
    variants.iter().fold(
        Movie::new(imdb_id, format!("Movie {imdb_id}")),
        |movie, (resolution, hash)| movie.with_variant(TorrentVariant::new(*resolution, *hash)),
    )
}

/// A live file whose bytes are all present, for code that only needs a
/// registered session.
pub fn loaded_content_file(key: &DownloadKey, path: &str, data: &[u8]) -> Arc<ContentFile> {
    let torrent = ScriptedTorrent::new("loaded", 4).with_file(path, data.to_vec());
    let storage = Arc::new(MemorySwarmStorage::new(&torrent));
    storage.release_all();

    let metadata = torrent.metadata();
    let (_, progress) = watch::channel(TrackerProgress {
        arrived: metadata.piece_count,
        boundary: metadata.piece_count.saturating_sub(1),
        total: metadata.piece_count,
        drained: true,
    });

    Arc::new(ContentFile::new(
        Uuid::new_v4(),
        key.clone(),
        metadata.files[0].clone(),
        metadata.layout(),
        storage,
        progress,
    ))
}

/// In-memory content provider.
#[derive(Debug, Clone)]
pub struct MemoryContentProvider {
    name: String,
    data: Bytes,
}

impl MemoryContentProvider {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

#[async_trait]
impl ContentProvider for MemoryContentProvider {
    async fn read_at(&self, offset: u64, length: usize) -> Result<Bytes, ProviderError> {
        let size = self.data.len() as u64;
        if offset > size {
            return Err(ProviderError::OutOfBounds { offset, size });
        }
        let start = offset as usize;
        let end = (start + length).min(self.data.len());
        Ok(self.data.slice(start..end))
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Disk
    }
}

/// Transcoder that prefixes its input with [`StubTranscoder::MARKER`].
#[derive(Debug, Default)]
pub struct StubTranscoder {
    calls: AtomicUsize,
}

impl StubTranscoder {
    pub const MARKER: &'static [u8] = b"webm:";

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transcoder for StubTranscoder {
    fn transcode(
        &self,
        input: ByteStream,
        _format: OutputFormat,
    ) -> Result<ByteStream, TranscodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let marker = stream::once(async { Ok(Bytes::from_static(Self::MARKER)) });
        Ok(marker.chain(input).boxed())
    }
}

/// Torrent contents served by [`ScriptedSwarmEngine`].
#[derive(Debug, Clone)]
pub struct ScriptedTorrent {
    pub info_hash: InfoHash,
    pub name: String,
    pub piece_length: u64,
    files: Vec<(PathBuf, Bytes)>,
}

impl ScriptedTorrent {
    /// Empty torrent; the info hash is derived from `name`.
    pub fn new(name: impl Into<String>, piece_length: u64) -> Self {
        let name = name.into();
        let digest = Sha1::digest(name.as_bytes());
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&digest);

        Self {
            info_hash: InfoHash::new(hash),
            name,
            piece_length: piece_length.max(1),
            files: Vec::new(),
        }
    }

    /// Appends a file at media-relative `path`.
    pub fn with_file(mut self, path: impl Into<PathBuf>, data: impl Into<Bytes>) -> Self {
        self.files.push((path.into(), data.into()));
        self
    }

    pub fn hash_hex(&self) -> String {
        self.info_hash.to_string()
    }

    pub fn metadata(&self) -> SwarmMetadata {
        let mut offset = 0;
        let files: Vec<SwarmFile> = self
            .files
            .iter()
            .map(|(path, data)| {
                let file = SwarmFile {
                    path: path.clone(),
                    length: data.len() as u64,
                    offset,
                };
                offset += data.len() as u64;
                file
            })
            .collect();
        let layout = TorrentLayout::new(self.piece_length, offset);

        SwarmMetadata {
            name: self.name.clone(),
            piece_length: layout.piece_length,
            total_length: layout.total_length,
            piece_count: layout.piece_count,
            files,
        }
    }

    fn concatenated(&self) -> Bytes {
        let mut all = Vec::new();
        for (_, data) in &self.files {
            all.extend_from_slice(data);
        }
        Bytes::from(all)
    }
}

/// Swarm storage over a torrent's bytes held in memory, with pieces
/// becoming visible only when released.
#[derive(Debug)]
pub struct MemorySwarmStorage {
    data: Bytes,
    layout: TorrentLayout,
    present: RwLock<Vec<bool>>,
}

impl MemorySwarmStorage {
    pub fn new(torrent: &ScriptedTorrent) -> Self {
        let layout = torrent.metadata().layout();
        Self {
            data: torrent.concatenated(),
            layout,
            present: RwLock::new(vec![false; layout.piece_count as usize]),
        }
    }

    pub fn release(&self, index: u32) {
        if let Some(slot) = self.present.write().get_mut(index as usize) {
            *slot = true;
        }
    }

    pub fn release_all(&self) {
        self.present.write().iter_mut().for_each(|slot| *slot = true);
    }

    pub fn piece_count(&self) -> u32 {
        self.layout.piece_count
    }
}

#[async_trait]
impl SwarmStorage for MemorySwarmStorage {
    fn has_piece(&self, index: PieceIndex) -> bool {
        self.present
            .read()
            .get(index.0 as usize)
            .copied()
            .unwrap_or(false)
    }

    async fn read(&self, file: &SwarmFile, offset: u64, len: usize) -> Result<Bytes, SwarmError> {
        let offset = offset.min(file.length);
        let len = (len as u64).min(file.length - offset);
        let start = (file.offset + offset) as usize;
        Ok(self.data.slice(start..start + len as usize))
    }
}

/// Test handle driving one open session of a [`ScriptedSwarmEngine`].
#[derive(Clone)]
pub struct ScriptedControl {
    tx: Arc<Mutex<Option<mpsc::Sender<SwarmEvent>>>>,
    storage: Arc<MemorySwarmStorage>,
}

impl ScriptedControl {
    fn sender(&self) -> Option<mpsc::Sender<SwarmEvent>> {
        self.tx.lock().clone()
    }

    /// Makes piece `index` readable and announces it.
    pub async fn release(&self, index: u32) {
        self.storage.release(index);
        if let Some(tx) = self.sender() {
            let _ = tx.send(SwarmEvent::PieceArrived(PieceIndex(index))).await;
        }
    }

    /// Releases the pieces in the given order.
    pub async fn release_in(&self, order: &[u32]) {
        for &index in order {
            self.release(index).await;
        }
    }

    /// Releases every piece in ascending order.
    pub async fn release_all(&self) {
        for index in 0..self.storage.piece_count() {
            self.release(index).await;
        }
    }

    pub async fn drain(&self) {
        if let Some(tx) = self.sender() {
            let _ = tx.send(SwarmEvent::Drained).await;
        }
    }

    /// Releases everything and drains.
    pub async fn finish(&self) {
        self.release_all().await;
        self.drain().await;
    }

    /// Ends the session without draining.
    pub fn close(&self) {
        self.tx.lock().take();
    }
}

/// Swarm engine whose sessions are driven step by step from the test.
///
/// Unknown info hashes fail with `NoPeers`. Metadata is announced as soon as
/// a session opens unless [`ScriptedSwarmEngine::withhold_metadata`] is set.
#[derive(Default)]
pub struct ScriptedSwarmEngine {
    torrents: Mutex<HashMap<InfoHash, ScriptedTorrent>>,
    controls: Mutex<HashMap<InfoHash, ScriptedControl>>,
    opens: AtomicUsize,
    withhold_metadata: bool,
}

impl ScriptedSwarmEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_torrent(self, torrent: ScriptedTorrent) -> Self {
        self.add_torrent(torrent);
        self
    }

    pub fn withhold_metadata(mut self) -> Self {
        self.withhold_metadata = true;
        self
    }

    pub fn add_torrent(&self, torrent: ScriptedTorrent) {
        self.torrents.lock().insert(torrent.info_hash, torrent);
    }

    /// Number of sessions opened so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Handle to the most recent session for `info_hash`.
    pub fn control(&self, info_hash: &InfoHash) -> Option<ScriptedControl> {
        self.controls.lock().get(info_hash).cloned()
    }
}

#[async_trait]
impl SwarmEngine for ScriptedSwarmEngine {
    async fn open(&self, locator: &MagnetLocator) -> Result<SwarmSession, SwarmError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let info_hash = locator.info_hash;
        let torrent = self
            .torrents
            .lock()
            .get(&info_hash)
            .cloned()
            .ok_or(SwarmError::NoPeers { info_hash })?;

        let (tx, rx) = mpsc::channel(1024);
        let storage = Arc::new(MemorySwarmStorage::new(&torrent));
        if !self.withhold_metadata {
            let _ = tx.try_send(SwarmEvent::MetadataReady(torrent.metadata()));
        }

        self.controls.lock().insert(
            info_hash,
            ScriptedControl {
                tx: Arc::new(Mutex::new(Some(tx))),
                storage: storage.clone(),
            },
        );

        Ok(SwarmSession::new(info_hash, rx, storage))
    }
}
