use std::sync::Arc;
use std::time::Duration;

use crate::cache::BloomCache;
use crate::config::{CacheConfig, DEFAULT_PERSIST_QUEUE_DEPTH, DEFAULT_PERSIST_WORKERS};
use crate::error::{CacheError, Result};
use crate::filter::FilterParams;
use crate::persist::{FnLoader, FnPersister, Loader, PersistError, Persister};

/// Builder for configuring and constructing a [`BloomCache`].
///
/// Nothing is validated until [`build`](Self::build), which reports every
/// misconfiguration as an error instead of panicking.
///
/// # Example
/// ```
/// use bloomlru::BloomCacheBuilder;
/// use std::time::Duration;
///
/// let cache = BloomCacheBuilder::new(10_000)
///     .filter_params(1 << 16, 5)
///     .flush_interval(Duration::from_secs(30))
///     .persister(|_key: &str, _state: &[u8]| Ok(()))
///     .build()
///     .unwrap();
/// assert!(!cache.test("k", b"v").unwrap());
/// ```
pub struct BloomCacheBuilder {
    capacity: usize,
    params: FilterParams,
    loader: Option<Arc<dyn Loader>>,
    persister: Option<Arc<dyn Persister>>,
    flush_interval: Option<Duration>,
    persist_workers: usize,
    persist_queue_depth: usize,
}

impl BloomCacheBuilder {
    pub fn new(capacity: usize) -> Self {
        BloomCacheBuilder {
            capacity,
            params: FilterParams::default(),
            loader: None,
            persister: None,
            flush_interval: None,
            persist_workers: DEFAULT_PERSIST_WORKERS,
            persist_queue_depth: DEFAULT_PERSIST_QUEUE_DEPTH,
        }
    }

    /// Starts from deserialized settings.
    pub fn from_config(config: &CacheConfig) -> Self {
        BloomCacheBuilder {
            capacity: config.capacity,
            params: config.filter,
            loader: None,
            persister: None,
            flush_interval: config.flush_interval,
            persist_workers: config.persist_workers,
            persist_queue_depth: config.persist_queue_depth,
        }
    }

    /// Bit-array size `bits` (m) and hash count `hashes` (k) of every filter.
    pub fn filter_params(mut self, bits: u64, hashes: u32) -> Self {
        self.params = FilterParams { bits, hashes };
        self
    }

    /// Register a loader closure, called on the first reference to a key
    /// that is not resident.
    pub fn loader<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        self.loader = Some(Arc::new(FnLoader(f)));
        self
    }

    /// Register a loader via the [`Loader`] trait.
    pub fn loader_impl<L: Loader>(mut self, l: L) -> Self {
        self.loader = Some(Arc::new(l));
        self
    }

    /// Register a persister closure, called off the caller's critical path
    /// on eviction and on every flush.
    pub fn persister<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &[u8]) -> std::result::Result<(), PersistError> + Send + Sync + 'static,
    {
        self.persister = Some(Arc::new(FnPersister(f)));
        self
    }

    /// Register a persister via the [`Persister`] trait.
    pub fn persister_impl<P: Persister>(mut self, p: P) -> Self {
        self.persister = Some(Arc::new(p));
        self
    }

    /// Flush dirty keys every `interval`.  Zero disables the periodic flush.
    /// Has no effect without a persister.
    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = Some(interval);
        self
    }

    /// Number of write-back worker threads (default: 4).
    pub fn persist_workers(mut self, n: usize) -> Self {
        self.persist_workers = n;
        self
    }

    /// Jobs that may queue for the workers before callers write back inline
    /// (default: 1024).
    pub fn persist_queue_depth(mut self, n: usize) -> Self {
        self.persist_queue_depth = n;
        self
    }

    pub fn build(self) -> Result<BloomCache> {
        if self.capacity == 0 {
            return Err(CacheError::InvalidCapacity);
        }
        self.params
            .validate()
            .map_err(CacheError::InvalidFilterParams)?;
        if self.persist_workers == 0 {
            return Err(CacheError::InvalidConfig(
                "persist_workers must be greater than 0".into(),
            ));
        }
        if self.persist_queue_depth == 0 {
            return Err(CacheError::InvalidConfig(
                "persist_queue_depth must be greater than 0".into(),
            ));
        }

        let flush_interval = self.flush_interval.filter(|d| !d.is_zero());
        BloomCache::new(
            self.capacity,
            self.params,
            self.loader,
            self.persister,
            flush_interval,
            self.persist_workers,
            self.persist_queue_depth,
        )
    }
}
