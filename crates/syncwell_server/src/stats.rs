//! Record handler statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters of the record handler.
///
/// All counters are atomic and can be read while records are being written.
#[derive(Debug, Default)]
pub struct HandlerStats {
    /// Transitions created.
    transitions_started: AtomicU64,
    /// Transitions that drained their queue.
    transitions_completed: AtomicU64,
    /// Transitions ended by a tier failure or a missing record.
    transitions_failed: AtomicU64,
    /// Transitions destroyed by a delete, a remote change or shutdown.
    transitions_superseded: AtomicU64,
    /// Writes that bypassed transitions.
    hot_path_writes: AtomicU64,
}

impl HandlerStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_transition_start(&self) {
        self.transitions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transition_complete(&self) {
        self.transitions_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transition_failure(&self) {
        self.transitions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_transition_superseded(&self) {
        self.transitions_superseded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_hot_path_write(&self) {
        self.hot_path_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of transitions created.
    pub fn transitions_started(&self) -> u64 {
        self.transitions_started.load(Ordering::Relaxed)
    }

    /// Returns the number of transitions that drained their queue.
    pub fn transitions_completed(&self) -> u64 {
        self.transitions_completed.load(Ordering::Relaxed)
    }

    /// Returns the number of failed transitions.
    pub fn transitions_failed(&self) -> u64 {
        self.transitions_failed.load(Ordering::Relaxed)
    }

    /// Returns the number of destroyed transitions.
    pub fn transitions_superseded(&self) -> u64 {
        self.transitions_superseded.load(Ordering::Relaxed)
    }

    /// Returns the number of hot path writes.
    pub fn hot_path_writes(&self) -> u64 {
        self.hot_path_writes.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            transitions_started: self.transitions_started(),
            transitions_completed: self.transitions_completed(),
            transitions_failed: self.transitions_failed(),
            transitions_superseded: self.transitions_superseded(),
            hot_path_writes: self.hot_path_writes(),
        }
    }
}

/// A point-in-time copy of [`HandlerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Transitions created.
    pub transitions_started: u64,
    /// Transitions that drained their queue.
    pub transitions_completed: u64,
    /// Transitions ended by a failure.
    pub transitions_failed: u64,
    /// Transitions destroyed from outside.
    pub transitions_superseded: u64,
    /// Writes that bypassed transitions.
    pub hot_path_writes: u64,
}

impl StatsSnapshot {
    /// Transitions that have not ended yet.
    pub fn transitions_active(&self) -> u64 {
        self.transitions_started.saturating_sub(
            self.transitions_completed + self.transitions_failed + self.transitions_superseded,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_and_snapshot() {
        let stats = HandlerStats::new();
        stats.record_transition_start();
        stats.record_transition_start();
        stats.record_transition_complete();
        stats.record_hot_path_write();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.transitions_started, 2);
        assert_eq!(snapshot.transitions_completed, 1);
        assert_eq!(snapshot.hot_path_writes, 1);
        assert_eq!(snapshot.transitions_active(), 1);
    }
}
