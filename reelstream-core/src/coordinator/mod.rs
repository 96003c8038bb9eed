//! Per-variant download lifecycle.
//!
//! The coordinator claims a variant with a NONE -> LOADING compare-and-set,
//! opens a swarm session, registers the selected file for live reads and
//! follows the tracker's signals to persist FIRST_CHUNKS_LOADED and LOADED.

mod error;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};
use uuid::Uuid;

pub use error::{CoordinatorError, DownloadError};

use crate::catalog::{DownloadKey, DownloadState, VariantRecord};
use crate::config::{ReelstreamConfig, contains_extension};
use crate::session::{ContentFile, SessionRegistry};
use crate::store::{DocumentStore, StoreError};
use crate::swarm::{MagnetLocator, SwarmEngine, SwarmFile};
use crate::tracker::{TrackerProgress, TrackerSignals, spawn_tracker};

/// Tunables the coordinator reads from configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub threshold_percent: f64,
    pub selectable_extensions: Vec<String>,
    pub trackers: Vec<String>,
    pub metadata_timeout: Duration,
    pub stale_lock_timeout: Duration,
}

impl From<&ReelstreamConfig> for CoordinatorSettings {
    fn from(config: &ReelstreamConfig) -> Self {
        Self {
            threshold_percent: config.swarm.playable_threshold_percent,
            selectable_extensions: config.media.selectable_extensions.clone(),
            trackers: config.swarm.trackers.clone(),
            metadata_timeout: config.swarm.metadata_timeout,
            stale_lock_timeout: config.store.stale_lock_timeout,
        }
    }
}

/// Result of [`DownloadCoordinator::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// This call claimed the variant and opened a session
    Started { session_id: Uuid },
    /// Another call already owns the download
    InProgress(DownloadState),
    /// Fully downloaded, serve from disk
    Completed { path: String },
}

impl StartOutcome {
    pub fn state(&self) -> DownloadState {
        match self {
            StartOutcome::Started { .. } => DownloadState::Loading,
            StartOutcome::InProgress(state) => *state,
            StartOutcome::Completed { .. } => DownloadState::Loaded,
        }
    }
}

/// Persisted and live view of one variant.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadStatus {
    pub key: DownloadKey,
    pub state: DownloadState,
    pub fs_path: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    /// LOADING past the stale timeout with no live session here
    pub stale: bool,
    pub progress: Option<TrackerProgress>,
}

/// Owns the lifecycle of every download in this process.
#[derive(Clone)]
pub struct DownloadCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn DocumentStore>,
    engine: Arc<dyn SwarmEngine>,
    registry: Arc<SessionRegistry>,
    settings: CoordinatorSettings,
}

impl DownloadCoordinator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        engine: Arc<dyn SwarmEngine>,
        registry: Arc<SessionRegistry>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                engine,
                registry,
                settings,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.inner.registry
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.inner.store
    }

    /// Ensures a download exists or is finished for `key`.
    ///
    /// # Errors
    ///
    /// - `CoordinatorError::UnknownKey` - No such movie or resolution
    /// - `CoordinatorError::StaleLock` - Stuck in LOADING with no live session here
    /// - `CoordinatorError::Download` - The session could not start; the claim was released
    /// - `CoordinatorError::StateConflict` - Lost the claim race and the winner already rolled back
    #[instrument(skip(self, key), fields(key = %key))]
    pub async fn start(&self, key: &DownloadKey) -> Result<StartOutcome, CoordinatorError> {
        let record = self.inner.store.variant(key).await?;
        if let Some(outcome) = self.classify(&record)? {
            debug!(state = %record.variant.status, "Download already underway");
            return Ok(outcome);
        }

        match self
            .inner
            .store
            .compare_and_set_state(key, DownloadState::None, DownloadState::Loading)
            .await
        {
            Ok(claimed) => self.launch(claimed).await,
            Err(StoreError::Conflict { actual, .. }) => {
                debug!(%actual, "Lost the claim race");
                let current = self.inner.store.variant(key).await?;
                match self.classify(&current)? {
                    Some(outcome) => Ok(outcome),
                    None => Err(CoordinatorError::StateConflict {
                        key: key.clone(),
                        actual: current.variant.status,
                    }),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Current persisted state plus live progress, if any.
    ///
    /// # Errors
    ///
    /// - `CoordinatorError::UnknownKey` - No such movie or resolution
    pub async fn status(&self, key: &DownloadKey) -> Result<DownloadStatus, CoordinatorError> {
        let record = self.inner.store.variant(key).await?;
        Ok(DownloadStatus {
            stale: self.stale_since(&record).is_some(),
            progress: self.inner.registry.get(key).map(|file| file.progress()),
            key: record.key,
            state: record.variant.status,
            fs_path: record.variant.fs_path,
            locked_at: record.variant.locked_at,
        })
    }

    /// Releases a stale LOADING claim.
    ///
    /// The store may be shared with other processes whose sessions this
    /// registry cannot see, so a claim younger than the stale timeout is
    /// treated as owned. Claims without a timestamp can always be released.
    ///
    /// # Errors
    ///
    /// - `CoordinatorError::UnknownKey` - No such movie or resolution
    /// - `CoordinatorError::StateConflict` - Not LOADING, a live session owns the claim, or the claim is not stale yet
    #[instrument(skip(self, key), fields(key = %key))]
    pub async fn release(&self, key: &DownloadKey) -> Result<(), CoordinatorError> {
        let record = self.inner.store.variant(key).await?;
        let releasable = record.variant.status == DownloadState::Loading
            && !self.inner.registry.contains(key)
            && (record.variant.locked_at.is_none() || self.stale_since(&record).is_some());
        if !releasable {
            return Err(CoordinatorError::StateConflict {
                key: key.clone(),
                actual: record.variant.status,
            });
        }

        self.inner
            .store
            .compare_and_set_state(key, DownloadState::Loading, DownloadState::None)
            .await?;
        info!("Released download claim");
        Ok(())
    }

    /// Forgets every live session. Downloads already running are not stopped.
    pub fn shutdown(&self) {
        self.inner.registry.clear();
        info!("Download coordinator shut down");
    }

    /// Outcome for a variant that needs no new session, or `None` if it must be claimed.
    fn classify(&self, record: &VariantRecord) -> Result<Option<StartOutcome>, CoordinatorError> {
        let variant = &record.variant;
        match variant.status {
            DownloadState::None => Ok(None),
            DownloadState::Loaded => match &variant.fs_path {
                Some(path) => Ok(Some(StartOutcome::Completed { path: path.clone() })),
                None => {
                    warn!(key = %record.key, "Loaded variant has no recorded path");
                    Ok(Some(StartOutcome::InProgress(DownloadState::Loaded)))
                }
            },
            DownloadState::Loading => match self.stale_since(record) {
                Some(locked_at) => Err(CoordinatorError::StaleLock {
                    key: record.key.clone(),
                    locked_at,
                }),
                None => Ok(Some(StartOutcome::InProgress(DownloadState::Loading))),
            },
            DownloadState::FirstChunksLoaded => Ok(Some(StartOutcome::InProgress(
                DownloadState::FirstChunksLoaded,
            ))),
        }
    }

    /// When the LOADING claim was taken, if it is stale.
    ///
    /// Claims without a timestamp are never considered stale.
    fn stale_since(&self, record: &VariantRecord) -> Option<DateTime<Utc>> {
        if record.variant.status != DownloadState::Loading
            || self.inner.registry.contains(&record.key)
        {
            return None;
        }
        let locked_at = record.variant.locked_at?;
        let age = Utc::now().signed_duration_since(locked_at).to_std().ok()?;
        (age >= self.inner.settings.stale_lock_timeout).then_some(locked_at)
    }

    async fn launch(&self, record: VariantRecord) -> Result<StartOutcome, CoordinatorError> {
        match self.open_session(&record).await {
            Ok(session_id) => Ok(StartOutcome::Started { session_id }),
            Err(download_error) => {
                warn!(error = %download_error, "Session startup failed, releasing claim");
                if let Err(e) = self
                    .inner
                    .store
                    .compare_and_set_state(&record.key, DownloadState::Loading, DownloadState::None)
                    .await
                {
                    error!(error = %e, "Failed to roll back claim");
                }
                Err(download_error.into())
            }
        }
    }

    async fn open_session(&self, record: &VariantRecord) -> Result<Uuid, DownloadError> {
        let settings = &self.inner.settings;
        let locator =
            MagnetLocator::for_variant(&record.variant, &record.title, &settings.trackers)?;
        debug!(%locator, "Opening swarm session");

        let mut session = self.inner.engine.open(&locator).await?;
        let metadata = session.wait_for_metadata(settings.metadata_timeout).await?;

        let file = select_playable_file(&metadata.files, &settings.selectable_extensions)
            .cloned()
            .ok_or_else(|| DownloadError::NoPlayableFile {
                name: metadata.name.clone(),
            })?;

        let session_id = Uuid::new_v4();
        let span = info_span!("session", %session_id, key = %record.key);
        let layout = metadata.layout();
        let path = file.storage_path();
        let (storage, events) = session.into_parts();

        let (signals, progress, _tracker) = span.in_scope(|| {
            spawn_tracker(
                events,
                layout.file_span(&file),
                settings.threshold_percent,
            )
        });

        span.in_scope(|| {
            info!(
                file = %path,
                bytes = file.length,
                pieces = layout.file_span(&file).count,
                "Selected file for playback"
            )
        });

        self.inner.registry.register(Arc::new(ContentFile::new(
            session_id,
            record.key.clone(),
            file,
            layout,
            storage,
            progress,
        )));

        tokio::spawn(
            follow_session(
                self.inner.clone(),
                record.key.clone(),
                session_id,
                path,
                signals,
            )
            .instrument(span),
        );

        Ok(session_id)
    }
}

/// Largest file whose extension is selectable.
pub fn select_playable_file<'a>(
    files: &'a [SwarmFile],
    selectable_extensions: &[String],
) -> Option<&'a SwarmFile> {
    files
        .iter()
        .filter(|file| file.length > 0)
        .filter(|file| {
            file.extension()
                .is_some_and(|ext| contains_extension(selectable_extensions, &ext))
        })
        .max_by_key(|file| file.length)
}

/// Persists the tracker's signals for one session.
///
/// A session that ends before its playable signal gives its LOADING claim
/// back. One that ends after it leaves the variant FIRST_CHUNKS_LOADED over a
/// partial file, which only an operator can clear.
async fn follow_session(
    inner: Arc<Inner>,
    key: DownloadKey,
    session_id: Uuid,
    path: String,
    signals: TrackerSignals,
) {
    let TrackerSignals { playable, complete } = signals;

    let reached_playable = match playable.await {
        Ok(report) => {
            match inner.store.mark_first_chunks_loaded(&key, &path).await {
                Ok(state) => info!(
                    %state,
                    boundary = report.boundary,
                    total = report.total,
                    "Persisted playable state"
                ),
                Err(e) => error!(error = %e, "Failed to persist playable state"),
            }
            true
        }
        Err(_) => false,
    };

    match complete.await {
        Ok(()) => {
            match inner.store.mark_loaded(&key, &path).await {
                Ok(()) => info!(path = %path, "Download complete"),
                Err(e) => error!(error = %e, "Failed to persist completed state"),
            }
            inner.registry.remove(&key, session_id);
        }
        Err(_) if reached_playable => {
            inner.registry.remove(&key, session_id);
            warn!(
                %key,
                path = %path,
                "Session ended before completing, variant stays FIRST_CHUNKS_LOADED with a partial file"
            );
        }
        Err(_) => {
            inner.registry.remove(&key, session_id);
            warn!(%key, "Session ended before becoming playable, releasing claim");
            if let Err(e) = inner
                .store
                .compare_and_set_state(&key, DownloadState::Loading, DownloadState::None)
                .await
            {
                error!(error = %e, "Failed to release claim of ended session");
            }
        }
    }
}
