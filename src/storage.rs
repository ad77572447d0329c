//! Per-container object storage
//!
//! Each container keeps one slot per object name it has been asked to build.
//! A slot is a `OnceCell`, so concurrent first retrievals share one build.
//! Failed builds are discarded so the next retrieval tries again.

use crate::Result;
use crate::definition::Instance;
use ahash::RandomState;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Lock a mutex, ignoring poisoning.
///
/// No user code runs while container locks are held, so a poisoned lock
/// still guards consistent data.
#[inline]
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One build attempt for a named object, shared by concurrent callers.
pub(crate) struct Slot {
    cell: OnceCell<Result<Instance>>,
    closed: AtomicBool,
}

impl Slot {
    fn new() -> Self {
        Self {
            cell: OnceCell::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// The built object, if the build already succeeded.
    #[inline]
    pub fn built(&self) -> Option<Instance> {
        match self.cell.get() {
            Some(Ok(obj)) => Some(Arc::clone(obj)),
            _ => None,
        }
    }

    /// Run `build` unless another caller already did; blocks while a
    /// concurrent build is in flight.
    #[inline]
    pub fn get_or_build<F>(&self, build: F) -> Result<Instance>
    where
        F: FnOnce() -> Result<Instance>,
    {
        self.cell.get_or_init(build).clone()
    }

    /// Claim the right to run the close hook. Returns the object the first
    /// time only, and only once it has been built.
    #[inline]
    pub fn claim_close(&self) -> Option<Instance> {
        let obj = self.built()?;
        if self.closed.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(obj)
    }
}

/// Thread-safe storage for the objects owned by one container
///
/// Uses `DashMap` with `ahash`; map guards are never held while a build runs.
pub(crate) struct ObjectStorage {
    slots: DashMap<String, Arc<Slot>, RandomState>,
    /// Unshared objects with a close hook, kept until teardown
    unshared: Mutex<Vec<(String, Instance)>>,
}

impl ObjectStorage {
    /// Create new empty storage.
    ///
    /// 8 shards: containers are created per request and hold few objects,
    /// so creation cost matters more than write concurrency.
    #[inline]
    pub fn new() -> Self {
        Self {
            slots: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
            unshared: Mutex::new(Vec::new()),
        }
    }

    /// Slot for `name`, created empty if missing.
    #[inline]
    pub fn slot(&self, name: &str) -> Arc<Slot> {
        if let Some(slot) = self.slots.get(name) {
            return Arc::clone(slot.value());
        }
        let entry = self
            .slots
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Slot::new()));
        Arc::clone(entry.value())
    }

    /// Forget a failed build attempt, unless a newer attempt replaced it.
    #[inline]
    pub fn discard(&self, name: &str, slot: &Arc<Slot>) {
        self.slots.remove_if(name, |_, current| Arc::ptr_eq(current, slot));
    }

    /// The cached object for `name`, if built.
    #[inline]
    pub fn get(&self, name: &str) -> Option<Instance> {
        self.slots.get(name).and_then(|slot| slot.built())
    }

    /// Whether `name` has been built and cached.
    #[inline]
    pub fn is_built(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of cached objects.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.built().is_some()).count()
    }

    /// Keep an unshared object until teardown so its close hook runs.
    pub fn track_unshared(&self, name: &str, obj: Instance) {
        lock(&self.unshared).push((name.to_string(), obj));
    }

    /// Remove every object and return those whose close hook still has to run.
    pub fn drain_for_close(&self) -> Vec<(String, Instance)> {
        let names: Vec<String> = self.slots.iter().map(|entry| entry.key().clone()).collect();

        let mut objects = Vec::with_capacity(names.len());
        for name in names {
            if let Some((name, slot)) = self.slots.remove(&name) {
                if let Some(obj) = slot.claim_close() {
                    objects.push((name, obj));
                }
            }
        }

        objects.append(&mut lock(&self.unshared));
        objects
    }
}

impl std::fmt::Debug for ObjectStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStorage")
            .field("count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DiError;
    use std::sync::atomic::AtomicU32;
    use std::thread;

    fn instance(value: u32) -> Instance {
        Arc::new(value)
    }

    #[test]
    fn test_slot_builds_once() {
        let storage = ObjectStorage::new();
        let calls = AtomicU32::new(0);

        let build = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(instance(1))
        };

        let a = storage.slot("svc").get_or_build(build).unwrap();
        let b = storage.slot("svc").get_or_build(build).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(storage.is_built("svc"));
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn test_discarded_failure_is_retried() {
        let storage = ObjectStorage::new();

        let slot = storage.slot("svc");
        let err = slot
            .get_or_build(|| Err(DiError::creation_failed("svc", "boom")))
            .unwrap_err();
        assert!(matches!(err, DiError::CreationFailed { .. }));
        storage.discard("svc", &slot);

        assert!(!storage.is_built("svc"));
        let obj = storage.slot("svc").get_or_build(|| Ok(instance(2))).unwrap();
        assert_eq!(*obj.downcast_ref::<u32>().unwrap(), 2);
    }

    #[test]
    fn test_discard_keeps_newer_slot() {
        let storage = ObjectStorage::new();
        let old = storage.slot("svc");
        storage.discard("svc", &old);

        let newer = storage.slot("svc");
        newer.get_or_build(|| Ok(instance(3))).unwrap();
        storage.discard("svc", &old);

        assert!(storage.is_built("svc"));
    }

    #[test]
    fn test_claim_close_once() {
        let storage = ObjectStorage::new();
        let slot = storage.slot("svc");
        assert!(slot.claim_close().is_none(), "unbuilt slots have nothing to close");

        slot.get_or_build(|| Ok(instance(4))).unwrap();
        assert!(slot.claim_close().is_some());
        assert!(slot.claim_close().is_none());
    }

    #[test]
    fn test_drain_for_close() {
        let storage = ObjectStorage::new();
        storage.slot("a").get_or_build(|| Ok(instance(1))).unwrap();
        storage.slot("b").get_or_build(|| Ok(instance(2))).unwrap();
        let _unbuilt = storage.slot("c");
        storage.track_unshared("d", instance(3));

        let mut names: Vec<String> = storage
            .drain_for_close()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        names.sort();

        assert_eq!(names, ["a", "b", "d"]);
        assert_eq!(storage.len(), 0);
        assert!(storage.drain_for_close().is_empty());
    }

    #[test]
    fn test_concurrent_slot_access() {
        let storage = Arc::new(ObjectStorage::new());
        let calls = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let storage = Arc::clone(&storage);
                let calls = Arc::clone(&calls);
                thread::spawn(move || {
                    storage
                        .slot("shared")
                        .get_or_build(|| {
                            calls.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(std::time::Duration::from_millis(10));
                            Ok(instance(5))
                        })
                        .unwrap()
                })
            })
            .collect();

        let results: Vec<Instance> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
