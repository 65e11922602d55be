//! Owns every [`Factory`] attached to one `Event`, addressed by a
//! `(TypeId, tag)` primary key with a `(type_name, tag)` fallback for
//! callers that only have a name string (scripting bindings, the
//! `DEFTAG:<ClassName>` config surface).
//!
//! Each factory slot is its own `RefCell`, not one big lock over the
//! whole map: `get()` only ever needs an immutable borrow of the map to
//! find a slot, then a `borrow_mut()` of that one slot to drive it. That
//! keeps a factory whose `Process` calls back into `event.get::<Other>()`
//! for a different key from tripping over its own lookup.

use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashMap;

use crate::config::Config;
use crate::error::{JanaError, JanaResult};
use crate::event::Event;
use crate::factory::{Factory, FactoryLogic, FactoryT};
use crate::types::{FactoryKey, NamedFactoryKey};

#[derive(Default)]
pub struct FactorySet {
    by_type: HashMap<FactoryKey, RefCell<Box<dyn Factory>>>,
    by_name: HashMap<NamedFactoryKey, FactoryKey>,
}

impl FactorySet {
    pub fn new() -> Self {
        FactorySet::default()
    }

    /// Returns `false` (and leaves `self` unchanged) if the slot is
    /// already occupied, matching `JFactorySet::Add`'s boolean return.
    pub fn add<T: 'static + Send, L: FactoryLogic<T> + 'static>(&mut self, factory: FactoryT<T, L>) -> bool {
        let key = FactoryKey::new(TypeId::of::<T>(), factory.tag().to_string());
        if self.by_type.contains_key(&key) {
            return false;
        }
        let name_key = NamedFactoryKey::new(factory.object_type_name().to_string(), factory.tag().to_string());
        self.by_name.insert(name_key, key.clone());
        self.by_type.insert(key, RefCell::new(Box::new(factory)));
        true
    }

    /// Drains `other` into `self`, keeping `self`'s factory whenever both
    /// sides define the same `(type, tag)` key. Adapts the original's
    /// pointer-aliasing `Merge` to Rust ownership: factories genuinely
    /// move across, they aren't referenced from two places at once.
    pub fn merge(&mut self, other: FactorySet) {
        for (name_key, type_key) in other.by_name {
            if !self.by_name.contains_key(&name_key) {
                self.by_name.insert(name_key, type_key);
            }
        }
        for (key, factory) in other.by_type {
            self.by_type.entry(key).or_insert(factory);
        }
    }

    fn resolve_key<T: 'static>(&self, tag: &str, type_name: &str, config: &Config) -> Option<FactoryKey> {
        let key = FactoryKey::new(TypeId::of::<T>(), tag.to_string());
        if self.by_type.contains_key(&key) {
            return Some(key);
        }
        let name_key = NamedFactoryKey::new(type_name.to_string(), tag.to_string());
        if let Some(k) = self.by_name.get(&name_key) {
            return Some(k.clone());
        }
        if tag.is_empty() {
            if let Some(override_tag) = config.default_tag_for(type_name) {
                let override_key = FactoryKey::new(TypeId::of::<T>(), override_tag.to_string());
                if self.by_type.contains_key(&override_key) {
                    return Some(override_key);
                }
            }
        }
        None
    }

    /// The typed accessor `Event::get` delegates to: resolves the factory
    /// for `(T, tag)` (falling back to the by-name map, then a
    /// `DEFTAG:<ClassName>` override), drives its `get_or_create`, and
    /// returns a clone of its memoized results.
    ///
    /// Only ever needs `&self` — mutation is confined to `add`/`merge`,
    /// which never run concurrently with `get` — so a factory whose
    /// `Process` calls back into `event.get()` for another key re-enters
    /// this method freely.
    pub fn get<T: 'static + Clone + Send>(
        &self,
        event: &Event,
        run_number: i32,
        tag: &str,
        type_name: &str,
        config: &Config,
    ) -> JanaResult<Vec<T>> {
        let key = self
            .resolve_key::<T>(tag, type_name, config)
            .ok_or_else(|| JanaError::FactoryNotFound { type_name: type_name.to_string(), tag: tag.to_string() })?;
        let cell = &self.by_type[&key];
        let mut factory = cell.borrow_mut();
        factory.get_or_create(event, run_number)?;
        let results = factory
            .results_as_any()
            .downcast_ref::<Vec<T>>()
            .expect("factory stored under T's TypeId key must hold Vec<T>");
        Ok(results.clone())
    }

    pub fn for_each_factory_mut(&mut self, mut f: impl FnMut(&mut dyn Factory)) {
        for cell in self.by_type.values_mut() {
            f(cell.get_mut().as_mut());
        }
    }

    pub fn clear_all(&mut self) {
        self.for_each_factory_mut(|factory| factory.clear_data());
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventPool;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Logic {
        calls: Arc<AtomicUsize>,
    }
    impl FactoryLogic<i32> for Logic {
        fn process(&mut self, _event: &Event) -> JanaResult<Vec<i32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![42])
        }
    }

    #[test]
    fn first_writer_wins_on_merge() {
        let calls_a = Arc::new(AtomicUsize::new(0));
        let calls_b = Arc::new(AtomicUsize::new(0));
        let mut base = FactorySet::new();
        base.add(FactoryT::new("i32", "", Logic { calls: calls_a.clone() }));
        let mut overlay = FactorySet::new();
        overlay.add(FactoryT::new("i32", "", Logic { calls: calls_b.clone() }));

        base.merge(overlay);
        assert_eq!(base.len(), 1, "merge must not duplicate the already-occupied key");

        let pool = EventPool::new(1, 1);
        let event = pool.acquire().unwrap();
        let config = Config::default();
        let result: Vec<i32> = base.get(&event, 1, "", "i32", &config).unwrap();
        assert_eq!(result, vec![42]);
        assert_eq!(calls_a.load(Ordering::SeqCst), 1, "base's factory must be the one that survived the merge");
        assert_eq!(calls_b.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_factory_reports_factory_not_found() {
        let set = FactorySet::new();
        let pool = EventPool::new(1, 1);
        let event = pool.acquire().unwrap();
        let config = Config::default();
        let result = set.get::<i32>(&event, 1, "", "i32", &config);
        assert!(matches!(result, Err(JanaError::FactoryNotFound { .. })));
    }

    #[test]
    fn default_tag_override_redirects_empty_tag_lookup() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut set = FactorySet::new();
        set.add(FactoryT::new("i32", "calib", Logic { calls: calls.clone() }));
        let mut config = Config::default();
        config.default_tags.insert("i32".to_string(), "calib".to_string());

        let pool = EventPool::new(1, 1);
        let event = pool.acquire().unwrap();
        let result: Vec<i32> = set.get(&event, 1, "", "i32", &config).unwrap();
        assert_eq!(result, vec![42]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
