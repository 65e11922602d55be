//! Atomic counters for arrows and workers, in the style of the teacher's
//! `ExecutorMetrics` (plain `AtomicUsize`/`AtomicU64` fields, relaxed-ish
//! orderings, no locking on the hot path).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Outcome of a single arrow `execute()` call, matching the three-way
/// status the scheduler branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrowStatus {
    /// Produced or consumed at least one chunk; schedule this arrow again
    /// immediately.
    KeepGoing,
    /// Made no progress (backpressure or empty input); move on to the
    /// next arrow in the round-robin.
    ComeBackLater,
    /// This arrow will never produce more work.
    Finished,
}

#[derive(Default)]
pub struct ArrowMetrics {
    pub chunks_processed: AtomicU64,
    pub events_processed: AtomicU64,
    pub total_useful_ns: AtomicU64,
    pub total_overhead_ns: AtomicU64,
    pub come_back_later_count: AtomicU64,
}

impl ArrowMetrics {
    pub fn record(&self, events: u64, useful: Duration, overhead: Duration) {
        self.chunks_processed.fetch_add(1, Ordering::Relaxed);
        self.events_processed.fetch_add(events, Ordering::Relaxed);
        self.total_useful_ns.fetch_add(useful.as_nanos() as u64, Ordering::Relaxed);
        self.total_overhead_ns.fetch_add(overhead.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_come_back_later(&self) {
        self.come_back_later_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn throughput_hz(&self, wall_clock: Duration) -> f64 {
        let events = self.events_processed.load(Ordering::Relaxed) as f64;
        let secs = wall_clock.as_secs_f64();
        if secs <= 0.0 { 0.0 } else { events / secs }
    }
}

/// Per-worker bookkeeping the controller's watchdog reads to detect a
/// stuck thread: a heartbeat timestamp plus assignment counters.
pub struct WorkerMetrics {
    pub assignments: AtomicUsize,
    last_heartbeat: Mutex<Instant>,
    started_at: Instant,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        let now = Instant::now();
        WorkerMetrics { assignments: AtomicUsize::new(0), last_heartbeat: Mutex::new(now), started_at: now }
    }

    pub fn heartbeat(&self) {
        *self.last_heartbeat.lock() = Instant::now();
    }

    pub fn heartbeat_age(&self) -> Duration {
        self.last_heartbeat.lock().elapsed()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for WorkerMetrics {
    fn default() -> Self {
        Self::new()
    }
}
