//! Read-only instance storage shared by every work unit.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;

use hr_types::{ExecutionError, HrResult, Problem};
use tracing::debug;

/// Instances keyed by id, each loaded once and handed out as `Arc`.
pub struct InstanceStore<P: Problem> {
    instances: DashMap<String, Arc<P::Instance>>,
}

impl<P: Problem> Default for InstanceStore<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Problem> InstanceStore<P> {
    pub fn new() -> Self {
        Self {
            instances: DashMap::new(),
        }
    }

    /// Store `instance` under `id`, replacing any previous one.
    pub fn insert(&self, id: impl Into<String>, instance: P::Instance) -> Arc<P::Instance> {
        let instance = Arc::new(instance);
        self.instances.insert(id.into(), Arc::clone(&instance));
        instance
    }

    pub fn get(&self, id: &str) -> HrResult<Arc<P::Instance>> {
        self.instances
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                ExecutionError::InstanceNotFound {
                    instance: id.to_string(),
                }
                .into()
            })
    }

    /// Return the stored instance, calling `loader` only if `id` is absent.
    ///
    /// The shard holding `id` stays locked while loading, so concurrent
    /// callers never load the same instance twice.
    pub fn get_or_load<F>(&self, id: &str, loader: F) -> HrResult<Arc<P::Instance>>
    where
        F: FnOnce(&str) -> HrResult<P::Instance>,
    {
        match self.instances.entry(id.to_string()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                debug!("Loading instance {}", id);
                let instance = Arc::new(loader(id)?);
                entry.insert(Arc::clone(&instance));
                Ok(instance)
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.instances.contains_key(id)
    }

    /// Stored ids in lexicographic order.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.instances.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hr_grammar::testing::Toy;
    use hr_types::{validation_error, HrError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn get_returns_shared_instance() {
        let store = InstanceStore::<Toy>::new();
        let inserted = store.insert("i0", vec![1, 2, 3]);
        let fetched = store.get("i0").unwrap();
        assert!(Arc::ptr_eq(&inserted, &fetched));
        assert_eq!(*fetched, vec![1, 2, 3]);
    }

    #[test]
    fn missing_instance_is_an_error() {
        let store = InstanceStore::<Toy>::new();
        let err = store.get("nope").unwrap_err();
        assert!(matches!(
            err,
            HrError::Execution(ExecutionError::InstanceNotFound { .. })
        ));
    }

    #[test]
    fn loader_runs_once() {
        let store = InstanceStore::<Toy>::new();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let instance = store
                .get_or_load("i1", |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![7])
                })
                .unwrap();
            assert_eq!(*instance, vec![7]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn failed_load_stores_nothing() {
        let store = InstanceStore::<Toy>::new();
        let result = store.get_or_load("bad", |id| Err(validation_error!("cannot read {}", id)));
        assert!(result.is_err());
        assert!(!store.contains("bad"));
        assert!(store.is_empty());
    }

    #[test]
    fn ids_are_sorted() {
        let store = InstanceStore::<Toy>::new();
        store.insert("b", vec![]);
        store.insert("a", vec![]);
        assert_eq!(store.ids(), vec!["a".to_string(), "b".to_string()]);
    }
}
