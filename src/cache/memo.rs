use std::{
    collections::{BTreeSet, HashMap},
    hash::Hash,
    sync::{Arc, Mutex, OnceLock, PoisonError},
};

use crate::{
    compose::layer_stack::LayerStackId, compose::prim_index::PrimIndex, foundation::path::Path,
};

type Slot<T> = Arc<OnceLock<Arc<T>>>;

/// Compute-once-per-key memo table.
///
/// The table lock is only held to find or create a key's slot; computation runs outside it,
/// so misses on different keys proceed in parallel while concurrent misses on one key wait
/// for a single computation.
pub struct Memo<K, T> {
    slots: Mutex<HashMap<K, Slot<T>>>,
}

impl<K, T> Default for Memo<K, T> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, T> std::fmt::Debug for Memo<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Memo").field("entries", &slots.len()).finish()
    }
}

impl<K, T> Memo<K, T>
where
    K: Eq + Hash + Clone,
{
    /// Cached value for `key`, computing it with `compute` on a miss.
    pub fn get_or_compute(&self, key: &K, compute: impl FnOnce() -> T) -> Arc<T> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        Arc::clone(slot.get_or_init(|| Arc::new(compute())))
    }

    /// Cached value for `key`, if computed.
    pub fn get(&self, key: &K) -> Option<Arc<T>> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(key)?.get().cloned()
    }

    /// Replace the cached value for `key`.
    pub fn insert(&self, key: K, value: Arc<T>) {
        let slot = OnceLock::new();
        let _ = slot.set(value);
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, Arc::new(slot));
    }

    /// Every computed entry.
    pub fn entries(&self) -> Vec<(K, Arc<T>)> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .iter()
            .filter_map(|(k, slot)| slot.get().map(|v| (k.clone(), Arc::clone(v))))
            .collect()
    }

    /// Drop entries for which `keep` returns false; returns how many were dropped.
    /// Slots still being computed are passed `None`.
    pub fn retain(&self, mut keep: impl FnMut(&K, Option<&Arc<T>>) -> bool) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let before = slots.len();
        slots.retain(|k, slot| keep(k, slot.get()));
        before - slots.len()
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of slots, computed or not.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cache key of a prim index.
pub type PrimIndexKey = (LayerStackId, Path);

/// Memo of prim indexes keyed by (layer stack, prim path), with namespace-aware invalidation.
#[derive(Debug, Default)]
pub struct PrimIndexCache {
    memo: Memo<PrimIndexKey, PrimIndex>,
}

impl PrimIndexCache {
    /// Cached index, computing it on a miss.
    pub fn get(
        &self,
        stack: &LayerStackId,
        path: &Path,
        compute: impl FnOnce() -> PrimIndex,
    ) -> Arc<PrimIndex> {
        let key = (stack.clone(), path.clone());
        self.memo.get_or_compute(&key, || {
            tracing::debug!(stack = %stack, path = %path, "prim index cache miss");
            compute()
        })
    }

    /// Cached index, without computing.
    pub fn peek(&self, stack: &LayerStackId, path: &Path) -> Option<Arc<PrimIndex>> {
        self.memo.get(&(stack.clone(), path.clone()))
    }

    /// Every cached index.
    pub fn entries(&self) -> Vec<(PrimIndexKey, Arc<PrimIndex>)> {
        self.memo.entries()
    }

    /// Drop every index at or below one of `paths`, and every index whose composed path or
    /// whose nodes in its own stack lie at or below one of them.
    pub fn invalidate(&self, paths: &BTreeSet<Path>) -> usize {
        if paths.is_empty() {
            return 0;
        }
        let touches = |p: &Path| paths.iter().any(|root| p.has_prefix(root));
        let dropped = self.memo.retain(|(stack, path), index| {
            if touches(path) {
                return false;
            }
            let Some(index) = index else {
                return false;
            };
            !(touches(index.composed_path())
                || index
                    .nodes()
                    .any(|n| n.stack == *stack && touches(&n.path.strip_variants())))
        });
        tracing::debug!(dropped, "invalidated prim indexes");
        dropped
    }

    /// Drop every index with a node drawing from `stack`.
    pub fn invalidate_layer_stack(&self, stack: &LayerStackId) -> usize {
        self.memo.retain(|(key_stack, _), index| {
            key_stack != stack && index.is_some_and(|i| !i.has_node_in_stack(stack))
        })
    }

    /// Drop every index that recorded a composition error; such indexes may depend on specs
    /// that did not exist when they were built.
    pub fn invalidate_with_errors(&self) -> usize {
        self.memo
            .retain(|_, index| index.is_some_and(|i| i.errors().is_empty()))
    }

    /// Drop everything.
    pub fn invalidate_all(&self) {
        self.memo.clear();
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.memo.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.memo.is_empty()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/cache/memo.rs"]
mod tests;
