//! Process-local counters incremented by the scheduler and lifecycle
//! controller. There is no exporter here; front-ends read snapshots.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Counters {
    pub tasks_enqueued: AtomicU64,
    pub tasks_completed: AtomicU64,
    pub tasks_failed: AtomicU64,
    pub tasks_retried: AtomicU64,
    pub tasks_cancelled: AtomicU64,
    pub agents_started: AtomicU64,
    pub agents_stopped: AtomicU64,
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub tasks_enqueued: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_retried: u64,
    pub tasks_cancelled: u64,
    pub agents_started: u64,
    pub agents_stopped: u64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            tasks_enqueued: self.tasks_enqueued.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_retried: self.tasks_retried.load(Ordering::Relaxed),
            tasks_cancelled: self.tasks_cancelled.load(Ordering::Relaxed),
            agents_started: self.agents_started.load(Ordering::Relaxed),
            agents_stopped: self.agents_stopped.load(Ordering::Relaxed),
        }
    }
}

/// Bump a counter by one.
pub fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_increments() {
        let counters = Counters::new();
        incr(&counters.tasks_enqueued);
        incr(&counters.tasks_enqueued);
        incr(&counters.tasks_failed);

        let snap = counters.snapshot();
        assert_eq!(snap.tasks_enqueued, 2);
        assert_eq!(snap.tasks_failed, 1);
        assert_eq!(snap.tasks_completed, 0);
    }
}
