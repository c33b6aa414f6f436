use std::borrow::Borrow;
use std::hash::Hash;
use ahash::AHashSet;

/// Set of keys whose value changed since it was last persisted.
///
/// Kept beside the recency store rather than inside its values so marking a
/// key never requires touching the stored filter.
pub struct DirtyTracker<K> {
    keys: AHashSet<K>,
}

impl<K: Hash + Eq> DirtyTracker<K> {
    pub fn new() -> Self {
        DirtyTracker {
            keys: AHashSet::new(),
        }
    }

    /// Marks `key` dirty.  Marking an already-dirty key is a no-op.
    pub fn mark_dirty<Q>(&mut self, key: &Q)
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ToOwned<Owned = K> + ?Sized,
    {
        if !self.keys.contains(key) {
            self.keys.insert(key.to_owned());
        }
    }

    pub fn is_dirty<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.keys.contains(key)
    }

    /// Clears the marker for `key`.  Returns whether it was set.
    pub fn clear<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.keys.remove(key)
    }

    /// Returns every dirty key and leaves the tracker empty.
    pub fn drain_all(&mut self) -> Vec<K> {
        self.keys.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<K: Hash + Eq> Default for DirtyTracker<K> {
    fn default() -> Self {
        Self::new()
    }
}
