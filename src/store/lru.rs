use std::borrow::Borrow;
use std::hash::Hash;
use ahash::AHashMap;

/// Sentinel indices in the `nodes` arena.
const HEAD: usize = 0; // most-recently-used end
const TAIL: usize = 1; // least-recently-used end
const NULL: usize = usize::MAX;

struct LruNode<K, V> {
    /// `None` only for the HEAD and TAIL sentinels and for freed slots.
    key: Option<K>,
    value: Option<V>,
    /// Index toward HEAD (more recently used).
    prev: usize,
    /// Index toward TAIL (less recently used).
    next: usize,
}

impl<K, V> LruNode<K, V> {
    fn sentinel(prev: usize, next: usize) -> Self {
        LruNode {
            key: None,
            value: None,
            prev,
            next,
        }
    }
}

/// Capacity-bounded key/value store ordered by recency of access.
///
/// Nodes live in a `Vec` arena and are linked by index, so every operation
/// except [`keys`](LruStore::keys) is O(1).  The store does no locking of its
/// own; callers serialize access.
pub struct LruStore<K, V> {
    /// Index 0 = HEAD sentinel, 1 = TAIL sentinel, 2+ = real entries.
    nodes: Vec<LruNode<K, V>>,
    /// Maps a key to its index in `nodes`.
    map: AHashMap<K, usize>,
    /// Indices of freed (reusable) slots.
    free_list: Vec<usize>,
    capacity: usize,
}

impl<K: Hash + Eq + Clone, V> LruStore<K, V> {
    /// Creates an empty store holding at most `capacity` entries.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be greater than 0");
        let mut nodes = Vec::with_capacity(capacity.min(1024) + 2);
        nodes.push(LruNode::sentinel(NULL, TAIL));
        nodes.push(LruNode::sentinel(HEAD, NULL));

        LruStore {
            nodes,
            map: AHashMap::new(),
            free_list: Vec::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Links `idx` immediately after the HEAD sentinel (marks it most-recently-used).
    fn link_after_head(&mut self, idx: usize) {
        let old_first = self.nodes[HEAD].next;
        self.nodes[idx].prev = HEAD;
        self.nodes[idx].next = old_first;
        self.nodes[HEAD].next = idx;
        self.nodes[old_first].prev = idx;
    }

    /// Detaches `idx` from its current position in the list.
    fn unlink(&mut self, idx: usize) {
        let prev = self.nodes[idx].prev;
        let next = self.nodes[idx].next;
        self.nodes[prev].next = next;
        self.nodes[next].prev = prev;
        self.nodes[idx].prev = NULL;
        self.nodes[idx].next = NULL;
    }

    fn promote(&mut self, idx: usize) {
        if self.nodes[HEAD].next != idx {
            self.unlink(idx);
            self.link_after_head(idx);
        }
    }

    /// Allocates a new node (reusing from the free list when available).
    fn alloc_node(&mut self, key: K, value: V) -> usize {
        if let Some(idx) = self.free_list.pop() {
            let node = &mut self.nodes[idx];
            node.key = Some(key);
            node.value = Some(value);
            node.prev = NULL;
            node.next = NULL;
            idx
        } else {
            let idx = self.nodes.len();
            self.nodes.push(LruNode {
                key: Some(key),
                value: Some(value),
                prev: NULL,
                next: NULL,
            });
            idx
        }
    }

    /// Removes and returns the least-recently-used entry.
    fn evict_lru(&mut self) -> Option<(K, V)> {
        let lru_idx = self.nodes[TAIL].prev;
        if lru_idx == HEAD {
            return None; // list is empty
        }
        self.unlink(lru_idx);
        let key = self.nodes[lru_idx].key.take()?;
        let value = self.nodes[lru_idx].value.take()?;
        self.map.remove(&key);
        self.free_list.push(lru_idx);
        Some((key, value))
    }

    /// Returns `true` if `key` is resident.  Does not touch recency.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.contains_key(key)
    }

    /// Returns the value for `key` without touching recency.
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let &idx = self.map.get(key)?;
        self.nodes[idx].value.as_ref()
    }

    /// Returns the value for `key` and marks it most-recently-used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let &idx = self.map.get(key)?;
        self.promote(idx);
        self.nodes[idx].value.as_ref()
    }

    /// Mutable variant of [`get`](Self::get).
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let &idx = self.map.get(key)?;
        self.promote(idx);
        self.nodes[idx].value.as_mut()
    }

    /// Inserts or replaces `key` and marks it most-recently-used.
    ///
    /// If the insertion grows the store past capacity, the least-recently-used
    /// entry is removed and handed to `on_evict` before this call returns.
    /// Returns the replaced value, if any.
    pub fn put<F>(&mut self, key: K, value: V, on_evict: F) -> Option<V>
    where
        F: FnOnce(K, V),
    {
        if let Some(&idx) = self.map.get(&key) {
            self.promote(idx);
            return self.nodes[idx].value.replace(value);
        }

        let idx = self.alloc_node(key.clone(), value);
        self.map.insert(key, idx);
        self.link_after_head(idx);

        if self.map.len() > self.capacity {
            if let Some((evicted_key, evicted_value)) = self.evict_lru() {
                on_evict(evicted_key, evicted_value);
            }
        }
        None
    }

    /// Snapshot of resident keys, most-recently-used first.
    pub fn keys(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.map.len());
        let mut idx = self.nodes[HEAD].next;
        while idx != TAIL {
            if let Some(key) = &self.nodes[idx].key {
                keys.push(key.clone());
            }
            idx = self.nodes[idx].next;
        }
        keys
    }

    /// Removes every entry without reporting any of them as evicted.
    pub fn purge(&mut self) {
        self.nodes.truncate(2);
        self.nodes[HEAD].next = TAIL;
        self.nodes[TAIL].prev = HEAD;
        self.map.clear();
        self.free_list.clear();
    }
}
