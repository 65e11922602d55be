//! Minimal in-memory source/processor/factory-generator used by the
//! example binary and the integration tests to exercise the engine.
//!
//! These are illustrative, not part of the core contract (§1 Non-goals:
//! concrete sources/processors/factories are out of scope for the
//! engine). Real deployments supply their own through [`crate::contracts`].

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::contracts::{EventProcessor, EventSource, NextOutcome, SourceStatus};
use crate::error::JanaResult;
use crate::event::Event;

/// One contiguous block of events sharing a run number, used to build a
/// source that changes run mid-stream (§8 scenario 2).
#[derive(Debug, Clone, Copy)]
pub struct RunSegment {
    pub event_count: u64,
    pub run_number: i32,
}

/// Emits events drawn from a fixed list of [`RunSegment`]s, optionally
/// pacing each `next()` call to simulate a slow upstream.
pub struct InMemorySource {
    name: String,
    segments: Vec<RunSegment>,
    cursor: AtomicUsize,
    emitted_in_segment: AtomicU64,
    total_emitted: AtomicU64,
    delay: Option<Duration>,
}

impl InMemorySource {
    pub fn new(name: impl Into<String>, segments: Vec<RunSegment>) -> Self {
        InMemorySource {
            name: name.into(),
            segments,
            cursor: AtomicUsize::new(0),
            emitted_in_segment: AtomicU64::new(0),
            total_emitted: AtomicU64::new(0),
            delay: None,
        }
    }

    pub fn single_run(name: impl Into<String>, event_count: u64, run_number: i32) -> Self {
        Self::new(name, vec![RunSegment { event_count, run_number }])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn total_emitted(&self) -> u64 {
        self.total_emitted.load(Ordering::Acquire)
    }
}

impl EventSource for InMemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> JanaResult<()> {
        Ok(())
    }

    fn next(&self, event: &Event) -> JanaResult<NextOutcome> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        loop {
            let idx = self.cursor.load(Ordering::Acquire);
            if idx >= self.segments.len() {
                return Ok(NextOutcome::Finished);
            }
            let segment = self.segments[idx];
            let emitted = self.emitted_in_segment.load(Ordering::Acquire);
            if emitted >= segment.event_count {
                self.cursor.fetch_add(1, Ordering::AcqRel);
                self.emitted_in_segment.store(0, Ordering::Release);
                continue;
            }
            self.emitted_in_segment.fetch_add(1, Ordering::AcqRel);
            let event_number = self.total_emitted.fetch_add(1, Ordering::AcqRel) + 1;
            event.bind(event_number, segment.run_number, &self.name);
            return Ok(NextOutcome::Success);
        }
    }

    fn status(&self) -> SourceStatus {
        if self.cursor.load(Ordering::Acquire) >= self.segments.len() {
            SourceStatus::Finished
        } else {
            SourceStatus::Opened
        }
    }
}

/// An unbounded source that never finishes on its own, for backpressure
/// scenarios (§8 scenario 4) — the caller stops the controller instead of
/// waiting for end-of-stream.
pub struct InfiniteSource {
    name: String,
    run_number: i32,
    counter: AtomicU64,
}

impl InfiniteSource {
    pub fn new(name: impl Into<String>, run_number: i32) -> Self {
        InfiniteSource { name: name.into(), run_number, counter: AtomicU64::new(0) }
    }
}

impl EventSource for InfiniteSource {
    fn name(&self) -> &str {
        &self.name
    }
    fn open(&self) -> JanaResult<()> {
        Ok(())
    }
    fn next(&self, event: &Event) -> JanaResult<NextOutcome> {
        let event_number = self.counter.fetch_add(1, Ordering::AcqRel) + 1;
        event.bind(event_number, self.run_number, &self.name);
        Ok(NextOutcome::Success)
    }
    fn status(&self) -> SourceStatus {
        SourceStatus::Opened
    }
}

/// Counts `process()` calls and records the `brun`/`erun`/`process`
/// sequence it observed, for the run-boundary assertions in §8.
pub struct RecordingProcessor {
    name: String,
    thread_safe: bool,
    process_count: AtomicU64,
    delay: Option<Duration>,
    concurrent_guard: AtomicUsize,
    max_concurrency_seen: AtomicUsize,
    events: Mutex<Vec<String>>,
}

impl RecordingProcessor {
    pub fn new(name: impl Into<String>, thread_safe: bool) -> Self {
        RecordingProcessor {
            name: name.into(),
            thread_safe,
            process_count: AtomicU64::new(0),
            delay: None,
            concurrent_guard: AtomicUsize::new(0),
            max_concurrency_seen: AtomicUsize::new(0),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn process_count(&self) -> u64 {
        self.process_count.load(Ordering::Acquire)
    }

    pub fn max_concurrency_seen(&self) -> usize {
        self.max_concurrency_seen.load(Ordering::Acquire)
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl EventProcessor for RecordingProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_thread_safe(&self) -> bool {
        self.thread_safe
    }

    fn brun(&self, event: &Event) -> JanaResult<()> {
        self.events.lock().unwrap().push(format!("brun({})", event.run_number()));
        Ok(())
    }

    fn erun(&self) -> JanaResult<()> {
        self.events.lock().unwrap().push("erun".to_string());
        Ok(())
    }

    fn process(&self, event: &Event) -> JanaResult<()> {
        let concurrent = self.concurrent_guard.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_concurrency_seen.fetch_max(concurrent, Ordering::AcqRel);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.process_count.fetch_add(1, Ordering::AcqRel);
        self.events.lock().unwrap().push(format!("process({})", event.event_number()));
        self.concurrent_guard.fetch_sub(1, Ordering::AcqRel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_source_emits_segments_in_order_then_finishes() {
        use crate::event::EventPool;
        let source = InMemorySource::new(
            "demo",
            vec![RunSegment { event_count: 2, run_number: 1 }, RunSegment { event_count: 1, run_number: 2 }],
        );
        let pool = EventPool::new(1, 1);
        let event = pool.acquire().unwrap();

        assert_eq!(source.next(&event).unwrap(), NextOutcome::Success);
        assert_eq!(event.run_number(), 1);
        assert_eq!(source.next(&event).unwrap(), NextOutcome::Success);
        assert_eq!(event.run_number(), 1);
        assert_eq!(source.next(&event).unwrap(), NextOutcome::Success);
        assert_eq!(event.run_number(), 2);
        assert_eq!(source.next(&event).unwrap(), NextOutcome::Finished);
        assert_eq!(source.status(), SourceStatus::Finished);
    }
}
