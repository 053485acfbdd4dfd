//! Lightweight atomic counters for observing contention and pool behavior.
//!
//! Counters are plain `AtomicU64`s incremented with `Relaxed` ordering —
//! they are diagnostics, not synchronization, so a torn snapshot is fine.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters owned by a single queue/adapter/group instance.
#[derive(Debug, Default)]
pub struct Metrics {
    pub(crate) segments_created: AtomicU64,
    pub(crate) segments_pooled: AtomicU64,
    pub(crate) segments_reused: AtomicU64,
    pub(crate) producer_wins: AtomicU64,
    pub(crate) consumer_wins: AtomicU64,
    pub(crate) group_resolutions: AtomicU64,
    pub(crate) batch_rotations: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_segment_created(&self) {
        self.segments_created.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_segment_pooled(&self) {
        self.segments_pooled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_segment_reused(&self) {
        self.segments_reused.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_producer_win(&self) {
        self.producer_wins.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_consumer_win(&self) {
        self.consumer_wins.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_group_resolution(&self) {
        self.group_resolutions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_batch_rotation(&self) {
        self.batch_rotations.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a consistent-enough point-in-time snapshot for reporting.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            segments_created: self.segments_created.load(Ordering::Relaxed),
            segments_pooled: self.segments_pooled.load(Ordering::Relaxed),
            segments_reused: self.segments_reused.load(Ordering::Relaxed),
            producer_wins: self.producer_wins.load(Ordering::Relaxed),
            consumer_wins: self.consumer_wins.load(Ordering::Relaxed),
            group_resolutions: self.group_resolutions.load(Ordering::Relaxed),
            batch_rotations: self.batch_rotations.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`Metrics`] suitable for logging or assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub segments_created: u64,
    pub segments_pooled: u64,
    pub segments_reused: u64,
    pub producer_wins: u64,
    pub consumer_wins: u64,
    pub group_resolutions: u64,
    pub batch_rotations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_accumulate() {
        let m = Metrics::new();
        m.record_segment_created();
        m.record_segment_created();
        m.record_producer_win();
        let snap = m.snapshot();
        assert_eq!(snap.segments_created, 2);
        assert_eq!(snap.producer_wins, 1);
        assert_eq!(snap.consumer_wins, 0);
    }
}
