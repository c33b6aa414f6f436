//! Collaborators that connect the cache to durable storage.
//!
//! A [`Loader`] supplies previously persisted filter state the first time a
//! key is referenced; a [`Persister`] receives filter state when a key is
//! evicted or flushed.  Both are invoked outside the cache lock, so they may
//! block, but neither may call back into the cache that owns them while the
//! cache is waiting on them.
//!
//! # Example
//! ```
//! use bloomlru::BloomCacheBuilder;
//! use std::collections::HashMap;
//! use std::sync::{Arc, Mutex};
//!
//! let backing: Arc<Mutex<HashMap<String, Vec<u8>>>> = Arc::default();
//! let (reader, writer) = (Arc::clone(&backing), Arc::clone(&backing));
//!
//! let cache = BloomCacheBuilder::new(100)
//!     .filter_params(8192, 4)
//!     .loader(move |key: &str| reader.lock().unwrap().get(key).cloned())
//!     .persister(move |key: &str, state: &[u8]| {
//!         writer.lock().unwrap().insert(key.to_string(), state.to_vec());
//!         Ok(())
//!     })
//!     .build()
//!     .unwrap();
//!
//! cache.put("user:1", b"event-42").unwrap();
//! cache.close().unwrap();
//! ```

pub(crate) mod pool;

use std::error::Error;

/// Error type a [`Persister`] may report.  It is logged, never propagated.
pub type PersistError = Box<dyn Error + Send + Sync>;

/// Why a key's state is being written back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersistCause {
    /// The key was the least-recently-used entry when capacity was exceeded.
    Evicted,
    /// The key was dirty during a flush pass (periodic, explicit or on close).
    Flushed,
}

/// Source of previously persisted filter state.
///
/// Returning `None` (or an empty buffer) means the key has no prior state.
/// The call may block; it runs on the calling thread without the cache lock.
pub trait Loader: Send + Sync + 'static {
    fn load(&self, key: &str) -> Option<Vec<u8>>;
}

/// Best-effort sink for filter state.
///
/// Runs on a persistence worker thread, or on the caller's thread when the
/// worker queue is saturated.  Failures are logged and dropped; any retry
/// policy belongs to the implementation.
pub trait Persister: Send + Sync + 'static {
    fn persist(&self, key: &str, state: &[u8]) -> Result<(), PersistError>;
}

/// A [`Loader`] backed by a closure.
///
/// Created via [`BloomCacheBuilder::loader`](crate::BloomCacheBuilder::loader).
pub struct FnLoader<F>(pub F);

impl<F> Loader for FnLoader<F>
where
    F: Fn(&str) -> Option<Vec<u8>> + Send + Sync + 'static,
{
    fn load(&self, key: &str) -> Option<Vec<u8>> {
        (self.0)(key)
    }
}

/// A [`Persister`] backed by a closure.
///
/// Created via [`BloomCacheBuilder::persister`](crate::BloomCacheBuilder::persister).
pub struct FnPersister<F>(pub F);

impl<F> Persister for FnPersister<F>
where
    F: Fn(&str, &[u8]) -> Result<(), PersistError> + Send + Sync + 'static,
{
    fn persist(&self, key: &str, state: &[u8]) -> Result<(), PersistError> {
        (self.0)(key, state)
    }
}
