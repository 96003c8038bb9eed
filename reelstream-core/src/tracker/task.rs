//! Background task driving a [`ContinuityTracker`] from session events.

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, trace, warn};

use super::{ContinuityTracker, TrackerSignal};
use crate::swarm::{FileSpan, SessionEvents, SwarmEvent};

/// Single-use readiness and completion signals of one session.
#[derive(Debug)]
pub struct TrackerSignals {
    pub playable: oneshot::Receiver<PlayableReport>,
    /// Dropped without a value when the session stops before draining
    pub complete: oneshot::Receiver<()>,
}

/// Boundary at the moment the file became playable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayableReport {
    pub boundary: u32,
    pub total: u32,
}

/// Snapshot of a session's progress, in file-relative pieces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerProgress {
    pub arrived: u32,
    pub boundary: u32,
    pub total: u32,
    pub drained: bool,
}

/// Spawns the tracker for the file covering `span`.
///
/// Pieces outside `span` belong to other files of the torrent and are
/// skipped. The progress channel closes when the task ends.
pub fn spawn_tracker(
    mut events: SessionEvents,
    span: FileSpan,
    threshold_percent: f64,
) -> (TrackerSignals, watch::Receiver<TrackerProgress>, JoinHandle<()>) {
    let (playable_tx, playable_rx) = oneshot::channel();
    let (complete_tx, complete_rx) = oneshot::channel();
    let (progress_tx, progress_rx) = watch::channel(TrackerProgress {
        total: span.count,
        ..Default::default()
    });

    let task = async move {
        let mut tracker = ContinuityTracker::new(threshold_percent);
        let mut playable_tx = Some(playable_tx);
        let mut complete_tx = Some(complete_tx);

        let mut signals = vec![tracker.set_total(span.count)];

        loop {
            for signal in signals.drain(..).flatten() {
                match signal {
                    TrackerSignal::Playable { boundary, total } => {
                        info!(boundary, total, "File is playable");
                        if let Some(tx) = playable_tx.take() {
                            let _ = tx.send(PlayableReport { boundary, total });
                        }
                    }
                    TrackerSignal::Complete => {
                        info!(arrived = tracker.arrived(), "Session drained");
                        if let Some(tx) = complete_tx.take() {
                            let _ = tx.send(());
                        }
                    }
                }
            }

            progress_tx.send_replace(TrackerProgress {
                arrived: tracker.arrived(),
                boundary: tracker.boundary(),
                total: span.count,
                drained: tracker.is_drained(),
            });

            if tracker.is_drained() {
                break;
            }

            match events.next().await {
                Some(SwarmEvent::PieceArrived(index)) => match span.to_relative(index) {
                    Some(relative) => {
                        trace!(piece = %index, relative, "Tracking arrival");
                        signals.push(tracker.record(relative));
                    }
                    None => trace!(piece = %index, "Arrival outside the selected file"),
                },
                Some(SwarmEvent::Drained) => signals.push(tracker.drain()),
                Some(SwarmEvent::MetadataReady(_)) => {
                    debug!("Ignoring repeated metadata event");
                }
                None => {
                    warn!(
                        arrived = tracker.arrived(),
                        total = span.count,
                        "Session closed before draining"
                    );
                    break;
                }
            }
        }
    };
    let handle = tokio::spawn(task.in_current_span());

    (
        TrackerSignals {
            playable: playable_rx,
            complete: complete_rx,
        },
        progress_rx,
        handle,
    )
}
