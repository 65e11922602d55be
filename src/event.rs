//! Per-record container that flows through the topology, plus the bounded,
//! locality-partitioned pool it is recycled from.
//!
//! An `Event` is handed to exactly one arrow at a time; nothing in this
//! module synchronizes concurrent access to a single instance's
//! `FactorySet` because the topology guarantees there is never any to
//! synchronize (§5 of the design doc). The pool is what's actually shared
//! and locked.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};

use crate::config::Config;
use crate::error::JanaResult;
use crate::factory_set::FactorySet;

/// One reusable slot. Lives inside an [`EventPool`]'s sub-pool between
/// uses; checked out to exactly one arrow chain at a time in between.
///
/// `factory_set` is behind a [`ReentrantMutex`] rather than a plain one:
/// a factory's `Process` routinely calls `event.get::<Other>()` to pull a
/// dependency, which must re-enter this same lock on the same thread
/// without deadlocking. The data-model invariant that an `Event` is
/// touched by at most one worker at a time makes that reentrant access
/// the only access that ever happens.
pub struct Event {
    event_number: AtomicU64,
    run_number: AtomicI32,
    sequential: bool,
    factory_set: ReentrantMutex<RefCell<FactorySet>>,
    call_graph: Mutex<Vec<String>>,
    record_call_stack: bool,
    source_name: Mutex<String>,
}

impl Event {
    fn new(record_call_stack: bool) -> Self {
        Event {
            event_number: AtomicU64::new(0),
            run_number: AtomicI32::new(-1),
            sequential: false,
            factory_set: ReentrantMutex::new(RefCell::new(FactorySet::new())),
            call_graph: Mutex::new(Vec::new()),
            record_call_stack,
            source_name: Mutex::new(String::new()),
        }
    }

    pub fn event_number(&self) -> u64 {
        self.event_number.load(Ordering::Acquire)
    }

    pub fn run_number(&self) -> i32 {
        self.run_number.load(Ordering::Acquire)
    }

    pub fn is_sequential(&self) -> bool {
        self.sequential
    }

    pub fn source_name(&self) -> String {
        self.source_name.lock().clone()
    }

    /// Bound once by the Source arrow's `get_event`; `run_number` is
    /// immutable afterward per the data-model invariant.
    pub fn bind(&self, event_number: u64, run_number: i32, source_name: &str) {
        self.event_number.store(event_number, Ordering::Release);
        self.run_number.store(run_number, Ordering::Release);
        *self.source_name.lock() = source_name.to_string();
    }

    /// Overlays `generated` onto this event's `FactorySet`, keeping
    /// whichever factory for a given key was already present
    /// (first-writer-wins, mirrored from `FactorySet::merge`).
    pub fn merge_factories(&self, generated: FactorySet) {
        self.factory_set.lock().borrow_mut().merge(generated);
    }

    /// Lazily produces (or returns the memoized) results for `(T, tag)`,
    /// driving the factory's `Init`/run-boundary/`Process` state machine.
    ///
    /// Reentrant: if the factory this resolves to calls back into
    /// `event.get::<Other>()` from within its own `Process`, that call
    /// re-enters this same lock on this same thread and proceeds — it
    /// does not deadlock.
    pub fn get<T: 'static + Clone + Send>(&self, tag: &str, type_name: &str, config: &Config) -> JanaResult<Vec<T>> {
        if self.record_call_stack {
            self.call_graph.lock().push(format!("{type_name}:{tag}"));
        }
        let run_number = self.run_number();
        let guard = self.factory_set.lock();
        let factory_set = guard.borrow();
        factory_set.get::<T>(self, run_number, tag, type_name, config)
    }

    /// Snapshot of the factories invoked on this event so far, used to
    /// enrich `PerEventFailure` with the chain that led into a crash.
    pub fn call_graph_snapshot(&self) -> Vec<String> {
        self.call_graph.lock().clone()
    }

    /// Invoked when the event is returned to the pool: clears every
    /// factory's per-event results (honoring `PERSISTENT`) and the call
    /// graph, but keeps the `FactorySet` itself (and any `PERSISTENT`
    /// factories inside it) so the next occupant reuses it.
    fn reset(&self) {
        self.factory_set.lock().borrow_mut().clear_all();
        self.call_graph.lock().clear();
        self.event_number.store(0, Ordering::Release);
        self.run_number.store(-1, Ordering::Release);
        self.source_name.lock().clear();
    }
}

/// One per-locality-domain sub-pool. A plain `Vec` under a lock is enough:
/// pool operations are not on the hot per-event path the way mailbox
/// push/pop are, and the expected contention is low (one source per
/// locality domain typically).
struct SubPool {
    free: Mutex<VecDeque<Arc<Event>>>,
}

/// Fixed-capacity set of [`Event`]s, partitioned by locality domain so a
/// worker pinned to one NUMA node or core group preferentially recycles
/// events it already touched. This is the engine's primary memory bound:
/// total in-flight events can never exceed `capacity`.
pub struct EventPool {
    domains: Vec<SubPool>,
    capacity: usize,
    in_flight: Arc<AtomicU64>,
}

impl EventPool {
    /// Builds a pool of `capacity` events split evenly across
    /// `location_count` sub-pools (at least 1).
    pub fn new(capacity: usize, location_count: usize) -> Self {
        Self::with_call_stack_recording(capacity, location_count, false)
    }

    pub fn with_call_stack_recording(capacity: usize, location_count: usize, record_call_stack: bool) -> Self {
        let location_count = location_count.max(1);
        let mut domains = Vec::with_capacity(location_count);
        for loc in 0..location_count {
            let share = capacity / location_count + usize::from(loc < capacity % location_count);
            let mut free = VecDeque::with_capacity(share);
            for _ in 0..share {
                free.push_back(Arc::new(Event::new(record_call_stack)));
            }
            domains.push(SubPool { free: Mutex::new(free) });
        }
        EventPool { domains, capacity, in_flight: Arc::new(AtomicU64::new(0)) }
    }

    pub fn from_config(config: &Config, location_count: usize) -> Self {
        Self::with_call_stack_recording(config.event_pool_size, location_count, config.record_call_stack)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Removes an event from the local sub-pool if one is free; falls
    /// back to stealing from another locality domain. Returns `None` if
    /// every sub-pool is empty — the caller (a Source arrow) must back
    /// off and retry, not block.
    pub fn acquire(&self) -> Option<Arc<Event>> {
        self.acquire_at(0)
    }

    pub fn acquire_at(&self, loc: usize) -> Option<Arc<Event>> {
        let loc = loc % self.domains.len();
        if let Some(ev) = self.domains[loc].free.lock().pop_front() {
            self.in_flight.fetch_add(1, Ordering::AcqRel);
            return Some(ev);
        }
        for i in 1..self.domains.len() {
            let other = (loc + i) % self.domains.len();
            if let Some(ev) = self.domains[other].free.lock().pop_front() {
                self.in_flight.fetch_add(1, Ordering::AcqRel);
                return Some(ev);
            }
        }
        None
    }

    /// Resets `event` and returns it to `loc`'s sub-pool. Called when the
    /// last reference to the event drops (in this engine: when every
    /// arrow downstream has finished consuming it).
    pub fn release(&self, event: Arc<Event>, loc: usize) {
        event.reset();
        let loc = loc % self.domains.len();
        self.domains[loc].free.lock().push_back(event);
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    /// Total free across every sub-pool; `free() + in_flight() ==
    /// capacity()` is the conservation invariant checked in tests.
    pub fn free_count(&self) -> usize {
        self.domains.iter().map(|d| d.free.lock().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_conserves_capacity() {
        let pool = EventPool::new(4, 1);
        assert_eq!(pool.free_count(), 4);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(pool.free_count() + pool.in_flight() as usize, 4);
        pool.release(a, 0);
        pool.release(b, 0);
        assert_eq!(pool.free_count(), 4);
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn exhausted_pool_returns_none() {
        let pool = EventPool::new(1, 1);
        let a = pool.acquire().unwrap();
        assert!(pool.acquire().is_none(), "source must back off rather than block");
        pool.release(a, 0);
        assert!(pool.acquire().is_some());
    }

    #[test]
    fn steals_across_locations_when_local_empty() {
        let pool = EventPool::new(2, 2);
        let a = pool.acquire_at(0).unwrap();
        let b = pool.acquire_at(0).unwrap();
        assert!(pool.acquire_at(0).is_none(), "location 0 and remote location 1 are both exhausted");
        pool.release(a, 0);
        pool.release(b, 1);
    }

    #[test]
    fn reset_clears_bindings_but_keeps_slot_reusable() {
        let pool = EventPool::new(1, 1);
        let ev = pool.acquire().unwrap();
        ev.bind(7, 42, "demo-source");
        assert_eq!(ev.event_number(), 7);
        assert_eq!(ev.run_number(), 42);
        pool.release(ev.clone(), 0);
        assert_eq!(ev.event_number(), 0, "release resets the slot for its next occupant");
        assert_eq!(ev.run_number(), -1);
    }
}
