use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::builder::BloomCacheBuilder;
use crate::error::{CacheError, Result};
use crate::filter::{BloomFilter, FilterParams};
use crate::metrics::stats::{Metrics, StatsCounter};
use crate::persist::pool::{PersistJob, PersistPool};
use crate::persist::{Loader, PersistCause, Persister};
use crate::store::{DirtyTracker, LruStore};
use crate::ticker::{self, StopHandle};

// ---------------------------------------------------------------------------
// Cache interior
// ---------------------------------------------------------------------------

/// Entries removed by capacity pressure while the lock was held.  They are
/// handed to the persistence pool only after the lock is released.
type Evicted = Vec<(String, BloomFilter)>;

/// Everything guarded by the single cache lock.
struct State {
    store: LruStore<String, BloomFilter>,
    dirty: DirtyTracker<String>,
    closed: bool,
}

impl State {
    /// Inserts `filter` for `key`; a capacity eviction clears the victim's
    /// dirty marker and moves the victim into `evicted`.
    fn insert(&mut self, key: String, filter: BloomFilter, evicted: &mut Evicted) {
        let dirty = &mut self.dirty;
        self.store.put(key, filter, |victim, victim_filter| {
            dirty.clear(victim.as_str());
            evicted.push((victim, victim_filter));
        });
    }
}

/// Shared interior of a [`BloomCache`].
pub(crate) struct Inner {
    state: Mutex<State>,
    params: FilterParams,
    capacity: usize,
    loader: Option<Arc<dyn Loader>>,
    /// `None` when no persister was configured.
    pool: Option<PersistPool>,
    /// Periodic flush schedule.  Dropping the handle stops it.
    ticker: Mutex<Option<StopHandle>>,
    metrics: StatsCounter,
}

// ---------------------------------------------------------------------------
// Cache handle
// ---------------------------------------------------------------------------

/// A bounded LRU cache mapping string keys to Bloom filters.
///
/// Filters are populated lazily from the configured [`Loader`] and written
/// back through the configured [`Persister`] when evicted, when flushed and
/// on [`close`](Self::close).  Cloning the handle is cheap; all clones share
/// one cache.
///
/// Every operation takes one short critical section.  Loader calls and
/// write-backs run without the lock held, so a slow backend never stalls
/// traffic for other keys.
///
/// # Example
/// ```
/// use bloomlru::BloomCacheBuilder;
///
/// let cache = BloomCacheBuilder::new(2).filter_params(4096, 3).build().unwrap();
/// assert!(cache.test_and_put("feed:7", b"post-1").unwrap());
/// assert!(!cache.test_and_put("feed:7", b"post-1").unwrap());
/// assert!(cache.test("feed:7", b"post-1").unwrap());
/// ```
pub struct BloomCache {
    inner: Arc<Inner>,
}

impl Clone for BloomCache {
    fn clone(&self) -> Self {
        BloomCache {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for BloomCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomCache").finish_non_exhaustive()
    }
}

impl BloomCache {
    pub(crate) fn new(
        capacity: usize,
        params: FilterParams,
        loader: Option<Arc<dyn Loader>>,
        persister: Option<Arc<dyn Persister>>,
        flush_interval: Option<Duration>,
        persist_workers: usize,
        persist_queue_depth: usize,
    ) -> Result<Self> {
        let pool = persister
            .map(|p| PersistPool::new(p, persist_workers, persist_queue_depth))
            .transpose()?;
        let periodic = flush_interval.filter(|_| pool.is_some());

        let cache = BloomCache {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    store: LruStore::new(capacity),
                    dirty: DirtyTracker::new(),
                    closed: false,
                }),
                params,
                capacity,
                loader,
                pool,
                ticker: Mutex::new(None),
                metrics: StatsCounter::new(),
            }),
        };

        if let Some(interval) = periodic {
            // The schedule holds a weak reference so it never keeps the cache alive.
            let weak = Arc::downgrade(&cache.inner);
            let handle = ticker::start(interval, move |_now| periodic_flush(&weak))?;
            *cache.inner.ticker.lock() = Some(handle);
        }
        Ok(cache)
    }

    /// Returns a [`BloomCacheBuilder`] for constructing a new cache.
    pub fn builder(capacity: usize) -> BloomCacheBuilder {
        BloomCacheBuilder::new(capacity)
    }

    // -----------------------------------------------------------------------
    // Locking and lazy load
    // -----------------------------------------------------------------------

    fn lock_open(&self) -> Result<MutexGuard<'_, State>> {
        let state = self.inner.state.lock();
        if state.closed {
            return Err(CacheError::Closed);
        }
        Ok(state)
    }

    /// Locks the cache with `key` resident if it or its persisted state
    /// exists.
    ///
    /// On a miss the lock is released around the loader call and reacquired
    /// to commit the result.  If another caller made the key resident in the
    /// meantime, that entry wins and the loaded state is discarded.
    fn resolve(&self, key: &str, evicted: &mut Evicted) -> Result<MutexGuard<'_, State>> {
        {
            let state = self.lock_open()?;
            if state.store.contains(key) {
                self.inner.metrics.record_hit();
                return Ok(state);
            }
        }

        self.inner.metrics.record_miss();
        let loaded = self.load(key)?;

        let mut state = self.lock_open()?;
        if let Some(filter) = loaded {
            if state.store.contains(key) {
                debug!(key, "key became resident during load; discarding loaded state");
            } else {
                state.insert(key.to_owned(), filter, evicted);
            }
        }
        Ok(state)
    }

    /// Consults the loader.  Runs without the cache lock.
    fn load(&self, key: &str) -> Result<Option<BloomFilter>> {
        let Some(loader) = &self.inner.loader else {
            return Ok(None);
        };
        let Some(bytes) = loader.load(key).filter(|b| !b.is_empty()) else {
            debug!(key, "cache miss; no persisted state");
            return Ok(None);
        };

        match BloomFilter::from_bytes(&bytes, self.inner.params) {
            Ok(filter) => {
                debug!(key, bytes = bytes.len(), "cache miss; loaded persisted state");
                self.inner.metrics.record_load();
                Ok(Some(filter))
            }
            Err(source) => {
                warn!(key, error = %source, "persisted filter state is corrupt");
                Err(CacheError::CorruptState {
                    key: key.to_owned(),
                    source,
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Write-back dispatch
    // -----------------------------------------------------------------------

    /// Hands capacity-evicted entries to the persistence pool.  Must be called
    /// without the lock held.
    fn dispatch_evictions(&self, evicted: Evicted) {
        if evicted.is_empty() {
            return;
        }
        self.inner.metrics.record_eviction(evicted.len() as u64);
        let Some(pool) = &self.inner.pool else { return };
        for (key, filter) in evicted {
            debug!(key = %key, "dispatching write-back for evicted key");
            self.inner.metrics.record_persist(1);
            pool.submit(PersistJob {
                key,
                filter,
                cause: PersistCause::Evicted,
            });
        }
    }

    /// Drains the dirty set and snapshots each still-resident filter.  Keys
    /// evicted since they were dirtied were already written back on eviction.
    fn collect_dirty(&self, state: &mut State) -> Vec<(String, BloomFilter)> {
        let keys = state.dirty.drain_all();
        if self.inner.pool.is_none() {
            return Vec::new();
        }
        keys.into_iter()
            .filter_map(|key| {
                let filter = state.store.peek(key.as_str())?.clone();
                Some((key, filter))
            })
            .collect()
    }

    /// Must be called without the lock held.
    fn dispatch_flush(&self, snapshot: Vec<(String, BloomFilter)>) {
        self.inner.metrics.record_flush();
        debug!(keys = snapshot.len(), "flush pass");
        let Some(pool) = &self.inner.pool else { return };
        self.inner.metrics.record_persist(snapshot.len() as u64);
        for (key, filter) in snapshot {
            pool.submit(PersistJob {
                key,
                filter,
                cause: PersistCause::Flushed,
            });
        }
    }

    // -----------------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------------

    /// Returns `true` if `item` may have been added under `key`.
    ///
    /// A key with neither a resident filter nor persisted state reports
    /// `false`.  Never changes filter contents or dirty status.
    pub fn test(&self, key: &str, item: &[u8]) -> Result<bool> {
        let mut evicted = Evicted::new();
        let present = {
            let mut state = self.resolve(key, &mut evicted)?;
            state.store.get(key).is_some_and(|filter| filter.test(item))
        };
        self.dispatch_evictions(evicted);
        Ok(present)
    }

    /// Adds `item` to the filter for `key`, creating the filter if the key
    /// has no state yet, and marks the key dirty.
    pub fn put(&self, key: &str, item: &[u8]) -> Result<()> {
        let mut evicted = Evicted::new();
        {
            let mut guard = self.resolve(key, &mut evicted)?;
            let state = &mut *guard;
            match state.store.get_mut(key) {
                Some(filter) => filter.add(item),
                None => {
                    let mut filter = BloomFilter::new(self.inner.params)
                        .map_err(CacheError::InvalidFilterParams)?;
                    filter.add(item);
                    state.insert(key.to_owned(), filter, &mut evicted);
                }
            }
            state.dirty.mark_dirty(key);
        }
        self.dispatch_evictions(evicted);
        Ok(())
    }

    /// Adds `item` under `key` unless the filter already reports it.
    ///
    /// Returns `true` if the item was added and `false` if it was (probably)
    /// present, in which case nothing changes.  The test and the add happen
    /// in one critical section.
    pub fn test_and_put(&self, key: &str, item: &[u8]) -> Result<bool> {
        let mut evicted = Evicted::new();
        let added = {
            let mut guard = self.resolve(key, &mut evicted)?;
            let state = &mut *guard;
            let added = match state.store.get_mut(key) {
                Some(filter) => !filter.test_and_add(item),
                None => {
                    let mut filter = BloomFilter::new(self.inner.params)
                        .map_err(CacheError::InvalidFilterParams)?;
                    filter.add(item);
                    state.insert(key.to_owned(), filter, &mut evicted);
                    true
                }
            };
            if added {
                state.dirty.mark_dirty(key);
            }
            added
        };
        self.dispatch_evictions(evicted);
        Ok(added)
    }

    /// Writes back every key dirtied since the previous flush that is still
    /// resident.  Write-backs are dispatched, not awaited.
    pub fn flush(&self) -> Result<()> {
        let snapshot = {
            let mut state = self.lock_open()?;
            self.collect_dirty(&mut state)
        };
        self.dispatch_flush(snapshot);
        Ok(())
    }

    /// Flushes once, drops every resident entry without further write-back
    /// and rejects all later operations with [`CacheError::Closed`].
    ///
    /// Write-backs already dispatched are left to finish on their own.
    pub fn close(&self) -> Result<()> {
        let snapshot = {
            let mut state = self.lock_open()?;
            let snapshot = self.collect_dirty(&mut state);
            state.store.purge();
            state.closed = true;
            snapshot
        };
        if let Some(ticker) = self.inner.ticker.lock().take() {
            ticker.stop();
        }
        self.dispatch_flush(snapshot);
        debug!("cache closed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn stats(&self) -> Metrics {
        self.inner.metrics.snapshot()
    }

    /// Number of resident keys.
    pub fn len(&self) -> usize {
        self.inner.state.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().store.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn params(&self) -> FilterParams {
        self.inner.params
    }

    /// Returns `true` if `key` is resident.  Does not consult the loader or
    /// change recency.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.state.lock().store.contains(key)
    }

    /// Returns `true` if `key` has changes not yet dispatched for write-back.
    pub fn is_dirty(&self, key: &str) -> bool {
        self.inner.state.lock().dirty.is_dirty(key)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }
}

/// One tick of the background flush.  Returns `false` to end the schedule.
fn periodic_flush(weak: &Weak<Inner>) -> bool {
    let Some(inner) = weak.upgrade() else {
        return false;
    };
    match (BloomCache { inner }).flush() {
        Ok(()) => true,
        Err(CacheError::Closed) => false,
        Err(err) => {
            warn!(error = %err, "periodic flush failed");
            true
        }
    }
}
