//! OS-thread workers that repeatedly pull an arrow assignment from the
//! [`Scheduler`] and execute it (§4.G).
//!
//! One worker = one `std::thread`. There is no cooperative scheduling
//! inside a worker; the arrow `execute()` call is the scheduling quantum,
//! tuned via each arrow's `chunksize`.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::arrow::ArrowStatus;
use crate::metrics::WorkerMetrics;
use crate::scheduler::Scheduler;

const RUNNING: u8 = 0;
const STOPPING: u8 = 1;
const STOPPED: u8 = 2;

/// Base sleep when the scheduler has nothing runnable for a worker,
/// matching the "sleep(backoff)" step in the spec's worker pseudocode.
/// A small random jitter is added on top of it (see `backoff_duration`)
/// so that many idle workers polling the same scheduler don't wake up in
/// lockstep.
const BACKOFF_BASE: Duration = Duration::from_millis(1);
const BACKOFF_JITTER_MICROS: u64 = 500;

fn backoff_duration() -> Duration {
    BACKOFF_BASE + Duration::from_micros(fastrand::u64(0..=BACKOFF_JITTER_MICROS))
}

/// Identity and placement of one worker thread: which scheduler it polls,
/// which locality domain its mailbox/pool operations prefer, and whether
/// it should be pinned to a CPU.
pub struct Worker {
    pub id: u32,
    pub cpu_id: Option<usize>,
    pub location_id: usize,
    pub pin_to_cpu: bool,
    scheduler: Arc<Scheduler>,
    metrics: Arc<WorkerMetrics>,
    state: AtomicU8,
    timed_out: AtomicBool,
}

impl Worker {
    pub fn new(id: u32, cpu_id: Option<usize>, location_id: usize, pin_to_cpu: bool, scheduler: Arc<Scheduler>) -> Arc<Self> {
        Arc::new(Worker {
            id,
            cpu_id,
            location_id,
            pin_to_cpu,
            scheduler,
            metrics: Arc::new(WorkerMetrics::new()),
            state: AtomicU8::new(RUNNING),
            timed_out: AtomicBool::new(false),
        })
    }

    pub fn metrics(&self) -> &WorkerMetrics {
        &self.metrics
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out.load(Ordering::Acquire)
    }

    /// Flips the worker into the timed-out state. Purely diagnostic: a
    /// wedged user callback cannot be preempted (§5), so this does not
    /// stop the thread — it only makes `is_timed_out()` observable to the
    /// controller, which may choose to abort the process.
    pub fn declare_timeout(&self) {
        self.timed_out.store(true, Ordering::Release);
        tracing::error!(worker_id = self.id, "worker declared timed out");
    }

    /// Requests a cooperative, arrow-boundary stop: the worker finishes
    /// whichever `execute()` is in flight, then exits its loop.
    pub fn request_stop(&self) {
        let _ = self.state.compare_exchange(RUNNING, STOPPING, Ordering::AcqRel, Ordering::Acquire);
    }

    pub fn is_stopped(&self) -> bool {
        self.state.load(Ordering::Acquire) == STOPPED
    }

    /// Resets a previously-stopped worker so `run()` can be invoked again
    /// on a fresh thread (scale-up reusing a retained id).
    pub fn reset_for_restart(&self) {
        self.state.store(RUNNING, Ordering::Release);
        self.timed_out.store(false, Ordering::Release);
    }

    /// The run-loop. Blocks the calling thread until stopped.
    pub fn run(self: Arc<Self>) {
        let mut prev: Option<(usize, ArrowStatus)> = None;
        loop {
            match self.scheduler.next_assignment(prev.take()) {
                Some((idx, arrow)) => {
                    let result = arrow.execute(self.location_id);
                    self.metrics.heartbeat();
                    self.metrics.assignments.fetch_add(1, Ordering::Relaxed);
                    match result {
                        Ok(status) => prev = Some((idx, status)),
                        Err(err) => {
                            tracing::error!(worker_id = self.id, arrow = arrow.name(), error = %err, "arrow execution failed");
                            prev = Some((idx, ArrowStatus::ComeBackLater));
                        }
                    }
                }
                None => {
                    self.metrics.heartbeat();
                    if self.state.load(Ordering::Acquire) == STOPPING {
                        break;
                    }
                    std::thread::sleep(backoff_duration());
                    continue;
                }
            }
            if self.state.load(Ordering::Acquire) == STOPPING {
                break;
            }
        }
        self.state.store(STOPPED, Ordering::Release);
        tracing::info!(worker_id = self.id, "worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrow::{Arrow, ArrowKind};
    use crate::error::JanaResult;
    use crate::metrics::ArrowMetrics;
    use std::sync::atomic::AtomicUsize;

    struct OneShotArrow {
        ran: AtomicBool,
        finished: AtomicBool,
        metrics: ArrowMetrics,
        thread_count: AtomicUsize,
    }

    impl Arrow for OneShotArrow {
        fn name(&self) -> &str {
            "one-shot"
        }
        fn kind(&self) -> ArrowKind {
            ArrowKind::Source
        }
        fn is_parallel(&self) -> bool {
            false
        }
        fn thread_count(&self) -> usize {
            self.thread_count.load(Ordering::Acquire)
        }
        fn inc_thread_count(&self) {
            self.thread_count.fetch_add(1, Ordering::AcqRel);
        }
        fn dec_thread_count(&self) {
            self.thread_count.fetch_sub(1, Ordering::AcqRel);
        }
        fn is_upstream_finished(&self) -> bool {
            self.finished.load(Ordering::Acquire)
        }
        fn is_finished(&self) -> bool {
            self.finished.load(Ordering::Acquire)
        }
        fn mark_finished(&self) {
            self.finished.store(true, Ordering::Release);
        }
        fn metrics(&self) -> &ArrowMetrics {
            &self.metrics
        }
        fn execute(&self, _loc: usize) -> JanaResult<ArrowStatus> {
            self.ran.store(true, Ordering::Release);
            Ok(ArrowStatus::Finished)
        }
        fn propagate_finished(&self) {}
    }

    #[test]
    fn worker_stops_after_requested_and_exits_loop() {
        let arrow: Arc<dyn Arrow> = Arc::new(OneShotArrow {
            ran: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            metrics: ArrowMetrics::default(),
            thread_count: AtomicUsize::new(0),
        });
        let scheduler = Arc::new(Scheduler::new(vec![arrow]));
        let worker = Worker::new(0, None, 0, false, scheduler);
        worker.request_stop();
        worker.clone().run();
        assert!(worker.is_stopped());
    }

    #[test]
    fn declare_timeout_is_observable_without_stopping_thread() {
        let scheduler = Arc::new(Scheduler::new(vec![]));
        let worker = Worker::new(1, None, 0, false, scheduler);
        assert!(!worker.is_timed_out());
        worker.declare_timeout();
        assert!(worker.is_timed_out());
        assert!(!worker.is_stopped(), "timeout is diagnostic, not a forced stop");
    }
}
