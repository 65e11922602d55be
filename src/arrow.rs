//! Arrows: the schedulable units of work that make up a [`crate::topology::Topology`].
//!
//! Three kinds share one trait object (`Arrow`) so the scheduler and
//! worker run-loop never need to know which: a Source pulls events out of
//! an [`crate::contracts::EventSource`] into its outbox; a Stage pops a
//! chunk, runs a user transform over it in place, and pushes it on; a
//! Sink pops a chunk and drives every registered processor's
//! init/brun/process/erun/finish lifecycle before releasing events back
//! to the pool.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::contracts::{EventProcessor, EventSource, NextOutcome};
use crate::error::{JanaError, JanaResult};
use crate::event::{Event, EventPool};
use crate::factory_set::FactorySet;
use crate::mailbox::Mailbox;
use crate::metrics::ArrowMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrowKind {
    Source,
    Stage,
    Sink,
}

/// Execution outcome of one `execute()` call, reused as the scheduling
/// signal the worker loop and scheduler both branch on.
pub use crate::metrics::ArrowStatus;

/// Bookkeeping shared by every arrow kind: identity, parallelism,
/// chunking, live-worker count, and the one-way finished latch.
struct ArrowBase {
    name: String,
    kind: ArrowKind,
    is_parallel: bool,
    chunksize: usize,
    thread_count: AtomicUsize,
    finished: AtomicBool,
    metrics: ArrowMetrics,
}

impl ArrowBase {
    fn new(name: impl Into<String>, kind: ArrowKind, is_parallel: bool, chunksize: usize) -> Self {
        ArrowBase {
            name: name.into(),
            kind,
            is_parallel,
            chunksize,
            thread_count: AtomicUsize::new(0),
            finished: AtomicBool::new(false),
            metrics: ArrowMetrics::default(),
        }
    }
}

/// A unit of schedulable work. Trait-object seam the scheduler and worker
/// operate through; concrete kinds are [`SourceArrow`], [`StageArrow`],
/// [`SinkArrow`].
pub trait Arrow: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> ArrowKind;
    fn is_parallel(&self) -> bool;
    fn thread_count(&self) -> usize;
    fn inc_thread_count(&self);
    fn dec_thread_count(&self);
    fn is_upstream_finished(&self) -> bool;
    fn is_finished(&self) -> bool;
    fn mark_finished(&self);
    fn metrics(&self) -> &ArrowMetrics;

    fn initialize(&self) -> JanaResult<()> {
        Ok(())
    }
    fn finalize(&self) -> JanaResult<()> {
        Ok(())
    }

    /// Does one unit of work (up to `chunksize` events) for locality
    /// domain `loc`. Never blocks; returns `ComeBackLater` instead.
    fn execute(&self, loc: usize) -> JanaResult<ArrowStatus>;

    /// Marks every immediate downstream mailbox's upstream as finished.
    /// Called by the scheduler exactly once, when this arrow's own
    /// `is_upstream_finished() && thread_count() == 0` first becomes true.
    fn propagate_finished(&self);
}

macro_rules! impl_arrow_base {
    ($ty:ty) => {
        fn name(&self) -> &str {
            &self.base.name
        }
        fn kind(&self) -> ArrowKind {
            self.base.kind
        }
        fn is_parallel(&self) -> bool {
            self.base.is_parallel
        }
        fn thread_count(&self) -> usize {
            self.base.thread_count.load(Ordering::Acquire)
        }
        fn inc_thread_count(&self) {
            self.base.thread_count.fetch_add(1, Ordering::AcqRel);
        }
        fn dec_thread_count(&self) {
            self.base.thread_count.fetch_sub(1, Ordering::AcqRel);
        }
        fn is_finished(&self) -> bool {
            self.base.finished.load(Ordering::Acquire)
        }
        fn mark_finished(&self) {
            self.base.finished.store(true, Ordering::Release);
        }
        fn metrics(&self) -> &ArrowMetrics {
            &self.base.metrics
        }
    };
}

/// Pulls events out of an [`EventSource`] and into its outbox in blocks
/// of exactly `chunksize` (§4.E). Never emits a partial chunk due to
/// backpressure: if the full reservation isn't available, it rolls the
/// reservation back and reports `ComeBackLater` (Open Question (a)).
pub struct SourceArrow {
    base: ArrowBase,
    source: Arc<dyn EventSource>,
    pool: Arc<EventPool>,
    outbox: Arc<Mailbox<Arc<Event>>>,
    loc_count: usize,
}

impl SourceArrow {
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn EventSource>,
        pool: Arc<EventPool>,
        outbox: Arc<Mailbox<Arc<Event>>>,
        chunksize: usize,
        loc_count: usize,
    ) -> Self {
        SourceArrow {
            base: ArrowBase::new(name, ArrowKind::Source, false, chunksize),
            source,
            pool,
            outbox,
            loc_count: loc_count.max(1),
        }
    }

    fn bind_and_pull(&self, loc: usize) -> JanaResult<Option<Arc<Event>>> {
        let event = match self.pool.acquire_at(loc) {
            Some(e) => e,
            None => return Ok(None),
        };
        if let Some(generator) = self.source.factory_generator() {
            let mut generated = FactorySet::new();
            generator.generate(&mut generated);
            event.merge_factories(generated);
        }
        match self.source.next(&event)? {
            NextOutcome::Success => Ok(Some(event)),
            NextOutcome::TryAgain => {
                self.pool.release(event, loc);
                Ok(None)
            }
            NextOutcome::Finished => {
                self.pool.release(event, loc);
                self.outbox.mark_upstream_finished();
                Ok(None)
            }
        }
    }
}

impl Arrow for SourceArrow {
    impl_arrow_base!(SourceArrow);

    fn is_upstream_finished(&self) -> bool {
        // A source has no upstream arrow; its "upstream" is the external
        // input, whose exhaustion is recorded on its own outbox.
        self.outbox.is_upstream_finished()
    }

    fn initialize(&self) -> JanaResult<()> {
        self.source.open()
    }

    fn execute(&self, loc: usize) -> JanaResult<ArrowStatus> {
        if self.is_upstream_finished() {
            return Ok(ArrowStatus::Finished);
        }
        let chunksize = self.base.chunksize;
        let reservation = self.outbox.reserve(chunksize, loc % self.loc_count);
        if reservation.amount() < chunksize {
            self.metrics().record_come_back_later();
            return Ok(ArrowStatus::ComeBackLater);
        }
        let mut chunk = Vec::with_capacity(chunksize);
        let mut source_finished_mid_chunk = false;
        for _ in 0..chunksize {
            match self.bind_and_pull(loc % self.loc_count)? {
                Some(event) => chunk.push(event),
                None => {
                    source_finished_mid_chunk = self.is_upstream_finished();
                    break;
                }
            }
        }
        let produced = chunk.len() as u64;
        let status = reservation.commit(chunk);
        self.metrics().record(produced, std::time::Duration::ZERO, std::time::Duration::ZERO);
        if source_finished_mid_chunk {
            Ok(ArrowStatus::Finished)
        } else {
            Ok(status)
        }
    }

    fn propagate_finished(&self) {
        self.outbox.mark_upstream_finished();
    }
}

type Transform = dyn Fn(&Event) -> JanaResult<()> + Send + Sync;

/// A parallel (or sequential) map stage: pops a chunk, applies `transform`
/// to each event, pushes the chunk on. The arrow itself carries
/// `is_parallel`; the scheduler enforces `thread_count <= 1` when false.
pub struct StageArrow {
    base: ArrowBase,
    inbox: Arc<Mailbox<Arc<Event>>>,
    outbox: Arc<Mailbox<Arc<Event>>>,
    transform: Arc<Transform>,
}

impl StageArrow {
    pub fn new(
        name: impl Into<String>,
        inbox: Arc<Mailbox<Arc<Event>>>,
        outbox: Arc<Mailbox<Arc<Event>>>,
        transform: Arc<Transform>,
        chunksize: usize,
        is_parallel: bool,
    ) -> Self {
        StageArrow { base: ArrowBase::new(name, ArrowKind::Stage, is_parallel, chunksize), inbox, outbox, transform }
    }
}

impl Arrow for StageArrow {
    impl_arrow_base!(StageArrow);

    fn is_upstream_finished(&self) -> bool {
        self.inbox.is_drained()
    }

    fn execute(&self, loc: usize) -> JanaResult<ArrowStatus> {
        if self.inbox.is_drained() {
            return Ok(ArrowStatus::Finished);
        }
        let reservation = self.outbox.reserve(self.base.chunksize, loc);
        if reservation.amount() == 0 {
            self.metrics().record_come_back_later();
            return Ok(ArrowStatus::ComeBackLater);
        }
        let popped = self.inbox.pop(reservation.amount(), loc);
        if popped.is_empty() {
            drop(reservation);
            self.metrics().record_come_back_later();
            return if self.inbox.is_drained() { Ok(ArrowStatus::Finished) } else { Ok(ArrowStatus::ComeBackLater) };
        }
        for event in &popped {
            (self.transform)(event)?;
        }
        let produced = popped.len() as u64;
        let status = reservation.commit(popped);
        self.metrics().record(produced, std::time::Duration::ZERO, std::time::Duration::ZERO);
        Ok(status)
    }

    fn propagate_finished(&self) {
        self.outbox.mark_upstream_finished();
    }
}

/// Per-processor run-boundary state (§4.E): which run `brun` was last
/// called for, and whether a matching `erun` is still owed.
struct ProcessorRunState {
    run_number: AtomicI32,
    brun_called: AtomicBool,
}

impl ProcessorRunState {
    fn new() -> Self {
        ProcessorRunState { run_number: AtomicI32::new(-1), brun_called: AtomicBool::new(false) }
    }
}

struct ProcessorSlot {
    processor: Arc<dyn EventProcessor>,
    state: Mutex<ProcessorRunState>,
}

/// A terminal Sink arrow: pops a chunk, crosses run boundaries and calls
/// `process` for every registered processor, then releases events back to
/// the pool (§4.E). Processors are grouped into a parallel Sink arrow or
/// a sequential one by the caller, matching their `is_thread_safe()`.
pub struct SinkArrow {
    base: ArrowBase,
    inbox: Arc<Mailbox<Arc<Event>>>,
    pool: Arc<EventPool>,
    processors: Vec<ProcessorSlot>,
}

impl SinkArrow {
    pub fn new(
        name: impl Into<String>,
        inbox: Arc<Mailbox<Arc<Event>>>,
        pool: Arc<EventPool>,
        processors: Vec<Arc<dyn EventProcessor>>,
        chunksize: usize,
        is_parallel: bool,
    ) -> Self {
        let processors =
            processors.into_iter().map(|processor| ProcessorSlot { processor, state: Mutex::new(ProcessorRunState::new()) }).collect();
        SinkArrow { base: ArrowBase::new(name, ArrowKind::Sink, is_parallel, chunksize), inbox, pool, processors }
    }

    fn cross_run_boundary(&self, slot: &ProcessorSlot, event: &Event) -> JanaResult<()> {
        let run_number = event.run_number();
        let wrap = |e: JanaError| -> JanaError {
            match e {
                JanaError::PerEventFailure { .. } => e,
                other => JanaError::per_event(
                    "sink",
                    slot.processor.name().to_string(),
                    event.call_graph_snapshot(),
                    anyhow::anyhow!(other.to_string()),
                ),
            }
        };
        {
            let mut state = slot.state.lock();
            if state.brun_called.load(Ordering::Acquire) && state.run_number.load(Ordering::Acquire) != run_number {
                slot.processor.erun().map_err(wrap)?;
                state.brun_called.store(false, Ordering::Release);
            }
            if !state.brun_called.load(Ordering::Acquire) {
                slot.processor.brun(event).map_err(wrap)?;
                state.brun_called.store(true, Ordering::Release);
                state.run_number.store(run_number, Ordering::Release);
            }
        }
        Ok(())
    }
}

impl Arrow for SinkArrow {
    impl_arrow_base!(SinkArrow);

    fn is_upstream_finished(&self) -> bool {
        self.inbox.is_drained()
    }

    fn initialize(&self) -> JanaResult<()> {
        for slot in &self.processors {
            slot.processor.init().map_err(|e| {
                JanaError::component_init("sink", slot.processor.name().to_string(), e)
            })?;
        }
        Ok(())
    }

    fn finalize(&self) -> JanaResult<()> {
        for slot in &self.processors {
            let owed_erun = slot.state.lock().brun_called.load(Ordering::Acquire);
            if owed_erun {
                slot.processor.erun().map_err(|e| {
                    JanaError::component_init("sink", slot.processor.name().to_string(), e)
                })?;
                slot.state.lock().brun_called.store(false, Ordering::Release);
            }
            slot.processor.finish().map_err(|e| {
                JanaError::component_init("sink", slot.processor.name().to_string(), e)
            })?;
        }
        Ok(())
    }

    fn execute(&self, loc: usize) -> JanaResult<ArrowStatus> {
        if self.inbox.is_drained() {
            return Ok(ArrowStatus::Finished);
        }
        let popped = self.inbox.pop(self.base.chunksize, loc);
        if popped.is_empty() {
            self.metrics().record_come_back_later();
            return if self.inbox.is_drained() { Ok(ArrowStatus::Finished) } else { Ok(ArrowStatus::ComeBackLater) };
        }
        for event in &popped {
            for slot in &self.processors {
                self.cross_run_boundary(slot, event)?;
                slot.processor.process(event).map_err(|e| {
                    JanaError::per_event(
                        "sink",
                        slot.processor.name().to_string(),
                        event.call_graph_snapshot(),
                        e,
                    )
                })?;
            }
        }
        let produced = popped.len() as u64;
        for event in popped {
            self.pool.release(event, loc);
        }
        self.metrics().record(produced, std::time::Duration::ZERO, std::time::Duration::ZERO);
        Ok(ArrowStatus::KeepGoing)
    }

    fn propagate_finished(&self) {
        // Terminal: no downstream to notify.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::SourceStatus;
    use std::sync::atomic::AtomicU64;

    struct CountingSource {
        remaining: AtomicU64,
        run_number: i32,
    }

    impl EventSource for CountingSource {
        fn name(&self) -> &str {
            "counting"
        }
        fn open(&self) -> JanaResult<()> {
            Ok(())
        }
        fn next(&self, event: &Event) -> JanaResult<NextOutcome> {
            let remaining = self.remaining.load(Ordering::Acquire);
            if remaining == 0 {
                return Ok(NextOutcome::Finished);
            }
            self.remaining.fetch_sub(1, Ordering::AcqRel);
            event.bind(remaining, self.run_number, "counting");
            Ok(NextOutcome::Success)
        }
        fn status(&self) -> SourceStatus {
            if self.remaining.load(Ordering::Acquire) == 0 {
                SourceStatus::Finished
            } else {
                SourceStatus::Opened
            }
        }
    }

    #[test]
    fn source_arrow_emits_full_chunks_and_then_finishes() {
        let pool = Arc::new(EventPool::new(8, 1));
        let outbox = Arc::new(Mailbox::new(8, 1));
        let source = Arc::new(CountingSource { remaining: AtomicU64::new(5), run_number: 9 });
        let arrow = SourceArrow::new("src", source, pool, outbox.clone(), 4, 1);
        arrow.initialize().unwrap();

        let status = arrow.execute(0).unwrap();
        assert_eq!(status, ArrowStatus::KeepGoing);
        assert_eq!(outbox.len(), 4);

        let popped = outbox.pop(4, 0);
        assert_eq!(popped.len(), 4);

        let status2 = arrow.execute(0).unwrap();
        assert_eq!(status2, ArrowStatus::Finished, "only 1 event remained, short of a full 4-chunk");
        assert!(outbox.is_upstream_finished());
    }

    #[test]
    fn sink_arrow_sequences_brun_process_erun_across_run_change() {
        use std::sync::Mutex as StdMutex;

        struct RecordingProcessor {
            log: StdMutex<Vec<String>>,
        }
        impl EventProcessor for RecordingProcessor {
            fn name(&self) -> &str {
                "recorder"
            }
            fn brun(&self, event: &Event) -> JanaResult<()> {
                self.log.lock().unwrap().push(format!("brun({})", event.run_number()));
                Ok(())
            }
            fn erun(&self) -> JanaResult<()> {
                self.log.lock().unwrap().push("erun".to_string());
                Ok(())
            }
            fn process(&self, event: &Event) -> JanaResult<()> {
                self.log.lock().unwrap().push(format!("process({})", event.event_number()));
                Ok(())
            }
        }

        let pool = Arc::new(EventPool::new(4, 1));
        let inbox = Arc::new(Mailbox::new(4, 1));
        let processor = Arc::new(RecordingProcessor { log: StdMutex::new(Vec::new()) });
        let sink = SinkArrow::new("sink", inbox.clone(), pool.clone(), vec![processor.clone()], 4, false);
        sink.initialize().unwrap();

        let e1 = pool.acquire().unwrap();
        e1.bind(1, 1, "src");
        let e2 = pool.acquire().unwrap();
        e2.bind(2, 2, "src");
        inbox.reserve(2, 0).commit(vec![e1, e2]);

        sink.execute(0).unwrap();
        sink.finalize().unwrap();

        let log = processor.log.lock().unwrap().clone();
        assert_eq!(log, vec!["brun(1)", "process(1)", "erun", "brun(2)", "process(2)", "erun"]);
    }
}
