//! Plain-data cache settings that can be read from a configuration file.
//!
//! # Example
//! ```
//! use bloomlru::{BloomCacheBuilder, CacheConfig};
//!
//! let config = CacheConfig {
//!     capacity: 1_000,
//!     ..CacheConfig::default()
//! };
//! let cache = BloomCacheBuilder::from_config(&config).build().unwrap();
//! assert_eq!(cache.capacity(), 1_000);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::filter::FilterParams;

pub(crate) const DEFAULT_CAPACITY: usize = 1024;
pub(crate) const DEFAULT_PERSIST_WORKERS: usize = 4;
pub(crate) const DEFAULT_PERSIST_QUEUE_DEPTH: usize = 1024;

/// Serializable construction options.  Loader and persister are code, not
/// data, and are attached on the builder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of resident keys.
    pub capacity: usize,
    /// Shape of every per-key filter.
    pub filter: FilterParams,
    /// Period of the background flush.  `None` or zero disables it.
    pub flush_interval: Option<Duration>,
    /// Threads draining the write-back queue.
    pub persist_workers: usize,
    /// Write-back jobs that may wait before callers write back inline.
    pub persist_queue_depth: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            capacity: DEFAULT_CAPACITY,
            filter: FilterParams::default(),
            flush_interval: None,
            persist_workers: DEFAULT_PERSIST_WORKERS,
            persist_queue_depth: DEFAULT_PERSIST_QUEUE_DEPTH,
        }
    }
}
