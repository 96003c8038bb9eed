//! Piece-continuity tracking for one swarm session.
//!
//! The tracker answers a single question: how far from the start of the file
//! is every piece present? Pieces arrive in any order; the contiguous
//! boundary only moves once the gap in front of it closes.

pub mod task;

use std::collections::BTreeSet;

use tracing::{debug, warn};

pub use task::{TrackerProgress, TrackerSignals, spawn_tracker};

/// Signal raised by [`ContinuityTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerSignal {
    /// Enough of the file's head is present to start playback
    Playable { boundary: u32, total: u32 },
    /// No further pieces are pending
    Complete,
}

/// Contiguous-from-zero completion state of a file's pieces.
///
/// The boundary is the largest `K` with every index in `0..=K` present, or
/// `0` when index 0 is absent. It is maintained with a cursor pointing at the
/// first missing index, which only ever moves forward.
#[derive(Debug, Clone)]
pub struct ContinuityTracker {
    arrived: BTreeSet<u32>,
    total: Option<u32>,
    next_missing: u32,
    threshold_percent: f64,
    playable_fired: bool,
    complete_fired: bool,
}

impl ContinuityTracker {
    pub fn new(threshold_percent: f64) -> Self {
        Self {
            arrived: BTreeSet::new(),
            total: None,
            next_missing: 0,
            threshold_percent: threshold_percent.clamp(0.0, 100.0),
            playable_fired: false,
            complete_fired: false,
        }
    }

    /// Learns the piece count, dropping any earlier arrival outside it.
    pub fn set_total(&mut self, total: u32) -> Option<TrackerSignal> {
        if self.total.is_some() {
            debug!(total, "Ignoring repeated piece count");
            return None;
        }

        let clipped = self.arrived.split_off(&total);
        if !clipped.is_empty() {
            warn!(
                total,
                clipped = clipped.len(),
                "Dropped arrivals beyond the piece count"
            );
        }
        self.total = Some(total);
        self.next_missing = self.next_missing.min(total);
        self.evaluate()
    }

    /// Records a piece arrival.
    ///
    /// Duplicates are ignored, as are indices past a known piece count.
    pub fn record(&mut self, index: u32) -> Option<TrackerSignal> {
        if let Some(total) = self.total
            && index >= total
        {
            warn!(index, total, "Ignoring arrival beyond the piece count");
            return None;
        }
        if !self.arrived.insert(index) {
            return None;
        }

        while self.arrived.contains(&self.next_missing) {
            self.next_missing += 1;
        }
        self.evaluate()
    }

    /// Marks the session as having no further pieces pending.
    pub fn drain(&mut self) -> Option<TrackerSignal> {
        if self.complete_fired {
            return None;
        }
        self.complete_fired = true;
        Some(TrackerSignal::Complete)
    }

    pub fn boundary(&self) -> u32 {
        self.next_missing.saturating_sub(1)
    }

    pub fn arrived(&self) -> u32 {
        self.arrived.len() as u32
    }

    pub fn total(&self) -> Option<u32> {
        self.total
    }

    pub fn is_playable(&self) -> bool {
        self.playable_fired
    }

    pub fn is_drained(&self) -> bool {
        self.complete_fired
    }

    fn evaluate(&mut self) -> Option<TrackerSignal> {
        let total = self.total?;
        if self.playable_fired || total == 0 || self.next_missing == 0 {
            return None;
        }

        let boundary = self.boundary();
        let percent = f64::from(boundary) / f64::from(total) * 100.0;
        let fully_contiguous = self.next_missing >= total;

        if percent >= self.threshold_percent || fully_contiguous {
            self.playable_fired = true;
            return Some(TrackerSignal::Playable { boundary, total });
        }
        None
    }
}
