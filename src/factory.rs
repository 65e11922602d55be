//! Per-event, lazily-computed factory cache.
//!
//! A [`Factory`] produces the results for one `(type, tag)` pair and
//! memoizes them for the event's lifetime. `get_or_create` walks the state
//! machine below; since an `Event` (and therefore its `FactorySet`) is
//! never touched by more than one worker at a time, the state machine is
//! driven through `&mut self` rather than internal locking — the
//! exactly-once guarantee on `Init` falls out of exclusive access, the
//! same way the original's `std::call_once` falls out of the mutex that
//! was commented out alongside it.

use std::any::{Any, TypeId};
use std::collections::HashMap;

use crate::error::JanaResult;
use crate::event::Event;

/// Mirrors `JFactory_Flags_t`. A plain bitset rather than a crate-derived
/// one since the engine only ever needs two flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FactoryFlags(u8);

impl FactoryFlags {
    pub const NONE: FactoryFlags = FactoryFlags(0);
    /// `ClearData` is a no-op; the factory manages its own data lifetime
    /// across runs (e.g. calibration constants).
    pub const PERSISTENT: FactoryFlags = FactoryFlags(1 << 0);
    /// `ClearData` clears the results vector but does not attempt to drop
    /// ownership of the contained objects (they're borrowed from
    /// elsewhere, or owned by another factory via `GetAs`).
    pub const NOT_OBJECT_OWNER: FactoryFlags = FactoryFlags(1 << 1);

    pub fn contains(self, other: FactoryFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for FactoryFlags {
    type Output = FactoryFlags;
    fn bitor(self, rhs: FactoryFlags) -> FactoryFlags {
        FactoryFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryStatus {
    Uninitialized,
    Unprocessed,
    Processed,
    Inserted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreationStatus {
    NotCreatedYet,
    Created,
    Inserted,
}

/// User-supplied logic for one factory. Separated from the bookkeeping in
/// [`FactoryT`] the way the original separates `JFactoryT`'s plumbing from
/// the user's `Init`/`Process` overrides.
pub trait FactoryLogic<T>: Send {
    fn init(&mut self) -> JanaResult<()> {
        Ok(())
    }
    fn begin_run(&mut self, _event: &Event) -> JanaResult<()> {
        Ok(())
    }
    fn change_run(&mut self, _event: &Event) -> JanaResult<()> {
        Ok(())
    }
    fn end_run(&mut self) -> JanaResult<()> {
        Ok(())
    }
    fn process(&mut self, event: &Event) -> JanaResult<Vec<T>>;
}

/// Type-erased seam `FactorySet` stores its factories behind, so a single
/// `HashMap` can hold factories of many different `T`.
pub trait Factory: Send {
    fn object_type_name(&self) -> &str;
    fn object_type_id(&self) -> TypeId;
    fn tag(&self) -> &str;
    fn status(&self) -> FactoryStatus;
    fn flags(&self) -> FactoryFlags;
    fn plugin_name(&self) -> &str;

    /// Drives the state machine: lazily `Init`s once, replays
    /// `EndRun`/`ChangeRun`/`BeginRun` on run transitions, then `Process`es
    /// if not already done for this run.
    fn get_or_create(&mut self, event: &Event, run_number: i32) -> JanaResult<()>;

    /// Resets to `Unprocessed` for the next event occupying this pool
    /// slot, honoring `PERSISTENT`/`NOT_OBJECT_OWNER`.
    fn clear_data(&mut self);

    fn num_objects(&self) -> usize;

    /// Exposes `&Vec<T>` erased as `&dyn Any`, so `FactorySet` can recover
    /// `T`'s results via `downcast_ref` without knowing the factory's
    /// concrete logic type `L`.
    fn results_as_any(&self) -> &dyn Any;

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

type UpcastFn = Box<dyn Fn(&dyn Any) -> Vec<Box<dyn Any>> + Send + Sync>;

/// Concrete factory for output type `T`, parameterized by user logic `L`.
pub struct FactoryT<T: 'static + Send, L: FactoryLogic<T>> {
    object_type_name: String,
    tag: String,
    plugin_name: String,
    flags: FactoryFlags,
    status: FactoryStatus,
    creation_status: CreationStatus,
    previous_run_number: i32,
    results: Vec<T>,
    logic: L,
    upcast_vtable: HashMap<TypeId, UpcastFn>,
}

impl<T: 'static + Send, L: FactoryLogic<T>> FactoryT<T, L> {
    pub fn new(object_type_name: impl Into<String>, tag: impl Into<String>, logic: L) -> Self {
        FactoryT {
            object_type_name: object_type_name.into(),
            tag: tag.into(),
            plugin_name: String::new(),
            flags: FactoryFlags::NONE,
            status: FactoryStatus::Uninitialized,
            creation_status: CreationStatus::NotCreatedYet,
            previous_run_number: -1,
            results: Vec::new(),
            logic,
            upcast_vtable: HashMap::new(),
        }
    }

    pub fn with_plugin_name(mut self, plugin_name: impl Into<String>) -> Self {
        self.plugin_name = plugin_name.into();
        self
    }

    pub fn with_flags(mut self, flags: FactoryFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Registers a downcast view: `factory_set.get_factory_as::<S>(tag)`
    /// will later be able to retrieve `Vec<S>` built from this factory's
    /// `Vec<T>` via `convert`.
    pub fn enable_get_as<S: 'static + Send>(&mut self, convert: fn(&T) -> S) {
        let key = TypeId::of::<S>();
        self.upcast_vtable.insert(
            key,
            Box::new(move |any: &dyn Any| {
                let this = any
                    .downcast_ref::<FactoryT<T, L>>()
                    .expect("upcast vtable entry called against the wrong concrete FactoryT");
                this.results.iter().map(|t| Box::new(convert(t)) as Box<dyn Any>).collect()
            }),
        );
    }

    pub fn results(&self) -> &[T] {
        &self.results
    }

    pub fn creation_status(&self) -> CreationStatus {
        self.creation_status
    }

    /// Bypasses `Process`, directly supplying results (the `Insert` path
    /// used by sources that hand factories pre-made objects).
    pub fn insert(&mut self, data: Vec<T>) {
        self.results = data;
        self.status = FactoryStatus::Inserted;
        self.creation_status = CreationStatus::Inserted;
    }

    /// Retrieves the `Vec<S>` registered via `enable_get_as::<S>`, if any.
    pub fn get_as_erased(&self, base: TypeId) -> Option<Vec<Box<dyn Any>>> {
        self.upcast_vtable.get(&base).map(|f| f(self as &dyn Any))
    }
}

impl<T: 'static + Send, L: FactoryLogic<T>> Factory for FactoryT<T, L> {
    fn object_type_name(&self) -> &str {
        &self.object_type_name
    }

    fn object_type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn tag(&self) -> &str {
        &self.tag
    }

    fn status(&self) -> FactoryStatus {
        self.status
    }

    fn flags(&self) -> FactoryFlags {
        self.flags
    }

    fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    fn get_or_create(&mut self, event: &Event, run_number: i32) -> JanaResult<()> {
        if self.status == FactoryStatus::Uninitialized {
            self.logic.init().map_err(|e| {
                crate::error::JanaError::component_init(self.plugin_name.clone(), self.object_type_name.clone(), e)
            })?;
            self.status = FactoryStatus::Unprocessed;
        }
        if self.status == FactoryStatus::Unprocessed {
            let wrap = |e: crate::error::JanaError| {
                crate::error::JanaError::component_init(self.plugin_name.clone(), self.object_type_name.clone(), e)
            };
            if self.previous_run_number == -1 {
                self.logic.change_run(event).map_err(wrap)?;
                self.logic.begin_run(event).map_err(wrap)?;
                self.previous_run_number = run_number;
            } else if self.previous_run_number != run_number {
                self.logic.end_run().map_err(wrap)?;
                self.logic.change_run(event).map_err(wrap)?;
                self.logic.begin_run(event).map_err(wrap)?;
                self.previous_run_number = run_number;
            }
            self.results = self.logic.process(event).map_err(|e| {
                crate::error::JanaError::per_event(
                    self.plugin_name.clone(),
                    self.object_type_name.clone(),
                    event.call_graph_snapshot(),
                    e,
                )
            })?;
            self.status = FactoryStatus::Processed;
            self.creation_status = CreationStatus::Created;
        }
        Ok(())
    }

    fn clear_data(&mut self) {
        if self.status == FactoryStatus::Uninitialized {
            return;
        }
        if self.flags.contains(FactoryFlags::PERSISTENT) {
            return;
        }
        self.results.clear();
        self.status = FactoryStatus::Unprocessed;
        self.creation_status = CreationStatus::NotCreatedYet;
    }

    fn num_objects(&self) -> usize {
        self.results.len()
    }

    fn results_as_any(&self) -> &dyn Any {
        &self.results
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventPool};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingInitLogic {
        init_calls: Arc<AtomicUsize>,
    }

    impl FactoryLogic<i32> for CountingInitLogic {
        fn init(&mut self) -> JanaResult<()> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn process(&mut self, _event: &Event) -> JanaResult<Vec<i32>> {
            Ok(vec![1, 2, 3])
        }
    }

    fn make_event() -> Arc<Event> {
        let pool = EventPool::new(1, 1);
        pool.acquire().expect("pool has capacity")
    }

    #[test]
    fn init_runs_once_across_many_get_or_create_calls() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut factory = FactoryT::new("i32", "", CountingInitLogic { init_calls: counter.clone() });
        let event = make_event();
        for run in 0..5 {
            factory.clear_data();
            factory.get_or_create(&event, run).unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn persistent_flag_suppresses_clear() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut factory =
            FactoryT::new("i32", "", CountingInitLogic { init_calls: counter }).with_flags(FactoryFlags::PERSISTENT);
        let event = make_event();
        factory.get_or_create(&event, 1).unwrap();
        assert_eq!(factory.results(), &[1, 2, 3]);
        factory.clear_data();
        assert_eq!(factory.status(), FactoryStatus::Processed, "persistent factories stay Processed");
        assert_eq!(factory.results(), &[1, 2, 3]);
    }

    #[test]
    fn run_change_triggers_begin_and_end_run() {
        struct RunTrackingLogic {
            begins: Arc<AtomicUsize>,
            ends: Arc<AtomicUsize>,
        }
        impl FactoryLogic<i32> for RunTrackingLogic {
            fn begin_run(&mut self, _event: &Event) -> JanaResult<()> {
                self.begins.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            fn end_run(&mut self) -> JanaResult<()> {
                self.ends.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            fn process(&mut self, _event: &Event) -> JanaResult<Vec<i32>> {
                Ok(vec![])
            }
        }
        let begins = Arc::new(AtomicUsize::new(0));
        let ends = Arc::new(AtomicUsize::new(0));
        let mut factory = FactoryT::new("i32", "", RunTrackingLogic { begins: begins.clone(), ends: ends.clone() });
        let event = make_event();
        factory.get_or_create(&event, 1).unwrap();
        factory.clear_data();
        factory.get_or_create(&event, 1).unwrap();
        factory.clear_data();
        factory.get_or_create(&event, 2).unwrap();
        assert_eq!(begins.load(Ordering::SeqCst), 2, "begin_run fires on first run and on each change");
        assert_eq!(ends.load(Ordering::SeqCst), 1, "end_run fires only when the run actually changes");
    }

    #[test]
    fn get_as_upcasts_results() {
        struct Logic;
        impl FactoryLogic<i32> for Logic {
            fn process(&mut self, _event: &Event) -> JanaResult<Vec<i32>> {
                Ok(vec![10, 20])
            }
        }
        let mut factory = FactoryT::new("i32", "", Logic);
        factory.enable_get_as::<i64>(|v| *v as i64);
        let event = make_event();
        factory.get_or_create(&event, 1).unwrap();
        let erased = factory.get_as_erased(TypeId::of::<i64>()).expect("registered view");
        let values: Vec<i64> = erased.into_iter().map(|b| *b.downcast::<i64>().unwrap()).collect();
        assert_eq!(values, vec![10, 20]);
    }
}
