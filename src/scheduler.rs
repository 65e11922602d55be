//! Round-robin arrow assignment (§4.F).
//!
//! Single mutex-guarded cursor over the arrow list, the same shape as the
//! teacher's tick-bounded scheduler: a small piece of locked state that's
//! held only long enough to pick the next unit of work, never across the
//! work itself.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::arrow::{Arrow, ArrowStatus};

struct SchedulerState {
    arrows: Vec<Arc<dyn Arrow>>,
    next_idx: usize,
}

/// Assigns a runnable arrow to a requesting worker, honoring each arrow's
/// parallelism constraint and propagating finished state once an arrow's
/// upstreams are exhausted and its last worker has left it.
pub struct Scheduler {
    state: Mutex<SchedulerState>,
}

impl Scheduler {
    pub fn new(arrows: Vec<Arc<dyn Arrow>>) -> Self {
        Scheduler { state: Mutex::new(SchedulerState { arrows, next_idx: 0 }) }
    }

    pub fn arrow_count(&self) -> usize {
        self.state.lock().arrows.len()
    }

    /// `prev`, when present, is `(arrow_index, status)` from the caller's
    /// last `execute()`. Returns `(index, arrow)` of the next assignment,
    /// or `None` if no arrow is currently runnable (the caller should back
    /// off briefly and retry).
    pub fn next_assignment(&self, prev: Option<(usize, ArrowStatus)>) -> Option<(usize, Arc<dyn Arrow>)> {
        let mut state = self.state.lock();

        if let Some((idx, status)) = prev {
            let arrow = state.arrows[idx].clone();
            arrow.dec_thread_count();
            if status == ArrowStatus::Finished {
                arrow.mark_finished();
            }
            if !arrow.is_finished() && arrow.is_upstream_finished() && arrow.thread_count() == 0 {
                arrow.mark_finished();
            }
            if arrow.is_finished() {
                arrow.propagate_finished();
                tracing::debug!(arrow = arrow.name(), "arrow finished, propagating downstream");
            }
        }

        let n = state.arrows.len();
        if n == 0 {
            return None;
        }
        for step in 0..n {
            let idx = (state.next_idx + step) % n;
            let candidate = &state.arrows[idx];
            if candidate.is_finished() || candidate.is_upstream_finished() {
                continue;
            }
            if candidate.is_parallel() || candidate.thread_count() == 0 {
                candidate.inc_thread_count();
                let arrow = candidate.clone();
                state.next_idx = (idx + 1) % n;
                tracing::debug!(arrow = arrow.name(), "scheduler assigned arrow");
                return Some((idx, arrow));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrow::{Arrow, ArrowKind};
    use crate::error::JanaResult;
    use crate::metrics::ArrowMetrics;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeArrow {
        name: String,
        kind: ArrowKind,
        is_parallel: bool,
        thread_count: AtomicUsize,
        upstream_finished: AtomicBool,
        finished: AtomicBool,
        metrics: ArrowMetrics,
    }

    impl FakeArrow {
        fn new(name: &str, kind: ArrowKind, is_parallel: bool) -> Arc<Self> {
            Arc::new(FakeArrow {
                name: name.to_string(),
                kind,
                is_parallel,
                thread_count: AtomicUsize::new(0),
                upstream_finished: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                metrics: ArrowMetrics::default(),
            })
        }
    }

    impl Arrow for FakeArrow {
        fn name(&self) -> &str {
            &self.name
        }
        fn kind(&self) -> ArrowKind {
            self.kind
        }
        fn is_parallel(&self) -> bool {
            self.is_parallel
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
            self.upstream_finished.load(Ordering::Acquire)
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
            Ok(ArrowStatus::KeepGoing)
        }
        fn propagate_finished(&self) {}
    }

    #[test]
    fn sequential_arrow_never_double_assigned() {
        let sequential = FakeArrow::new("seq", ArrowKind::Sink, false);
        let scheduler = Scheduler::new(vec![sequential.clone()]);

        let first = scheduler.next_assignment(None);
        assert!(first.is_some(), "first worker should get the arrow");

        let second = scheduler.next_assignment(None);
        assert!(second.is_none(), "thread_count == 1 on a non-parallel arrow must block a second assignment");
    }

    #[test]
    fn finished_arrow_is_never_reassigned() {
        let source = FakeArrow::new("src", ArrowKind::Source, false);
        let sink = FakeArrow::new("sink", ArrowKind::Sink, false);
        let scheduler = Scheduler::new(vec![source.clone(), sink.clone()]);

        let (idx, arrow) = scheduler.next_assignment(None).unwrap();
        assert_eq!(arrow.name(), "src");
        scheduler.next_assignment(Some((idx, ArrowStatus::Finished)));
        assert!(source.is_finished());

        for _ in 0..4 {
            let assignment = scheduler.next_assignment(None);
            if let Some((_, arrow)) = &assignment {
                assert_ne!(arrow.name(), "src", "a finished arrow must never be reassigned");
            }
        }
    }

    #[test]
    fn parallel_arrow_allows_concurrent_assignment() {
        let parallel = FakeArrow::new("map", ArrowKind::Stage, true);
        let scheduler = Scheduler::new(vec![parallel.clone()]);
        let a = scheduler.next_assignment(None);
        let b = scheduler.next_assignment(None);
        assert!(a.is_some() && b.is_some(), "parallel arrow should accept more than one concurrent worker");
        assert_eq!(parallel.thread_count(), 2);
    }
}
