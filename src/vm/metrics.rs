use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters shared by every component of one linker.
#[derive(Debug, Default)]
pub struct LinkerMetrics {
    /// Types that went through the define pipeline
    pub classes_defined: AtomicU64,
    /// Defines discarded because another thread inserted the descriptor first
    pub define_races_lost: AtomicU64,
    /// Types that reached `Resolved`
    pub classes_linked: AtomicU64,
    /// Successful static initializations
    pub classes_initialized: AtomicU64,
    /// Initializations that left the type erroneous
    pub initialization_failures: AtomicU64,
    /// Times a thread blocked on another thread's initialization
    pub initialization_waits: AtomicU64,
    /// Batches published to `VisiblyInitialized`
    pub visibility_batches: AtomicU64,
    /// Publications done with a checkpoint
    pub checkpoint_publications: AtomicU64,
    /// Publications done with a process-wide memory barrier
    pub membarrier_publications: AtomicU64,
    /// Bytes handed out by loader arenas
    pub arena_bytes: AtomicU64,
    /// Number of times a thread had to block waiting for a type's monitor
    pub lock_contention_count: AtomicU64,
    /// Total time spent waiting for monitors (in microseconds)
    pub lock_contention_total_us: AtomicU64,
}

/// Plain copy of [`LinkerMetrics`] for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub classes_defined: u64,
    pub define_races_lost: u64,
    pub classes_linked: u64,
    pub classes_initialized: u64,
    pub initialization_failures: u64,
    pub initialization_waits: u64,
    pub visibility_batches: u64,
    pub checkpoint_publications: u64,
    pub membarrier_publications: u64,
    pub arena_bytes: u64,
    pub lock_contentions: u64,
}

impl LinkerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_lock_contention(&self, duration: Duration) {
        self.lock_contention_count.fetch_add(1, Ordering::Relaxed);
        self.lock_contention_total_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            classes_defined: load(&self.classes_defined),
            define_races_lost: load(&self.define_races_lost),
            classes_linked: load(&self.classes_linked),
            classes_initialized: load(&self.classes_initialized),
            initialization_failures: load(&self.initialization_failures),
            initialization_waits: load(&self.initialization_waits),
            visibility_batches: load(&self.visibility_batches),
            checkpoint_publications: load(&self.checkpoint_publications),
            membarrier_publications: load(&self.membarrier_publications),
            arena_bytes: load(&self.arena_bytes),
            lock_contentions: load(&self.lock_contention_count),
        }
    }
}
