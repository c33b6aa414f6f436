//! A bounded, thread-safe LRU cache that keeps one Bloom filter per key.
//!
//! Each key answers "has this item been seen under this key?" with the usual
//! Bloom filter guarantee: no false negatives, a bounded rate of false
//! positives.  Filters are loaded lazily through a [`persist::Loader`] and
//! written back asynchronously through a [`persist::Persister`] on eviction,
//! on a periodic flush and on [`BloomCache::close`].

mod builder;
mod cache;
mod config;
mod error;
mod metrics;
pub mod filter;
pub mod persist;
pub mod store;
pub mod ticker;

pub use builder::BloomCacheBuilder;
pub use cache::BloomCache;
pub use config::CacheConfig;
pub use error::{CacheError, FilterError, Result};
pub use filter::{BloomFilter, FilterParams};
pub use metrics::stats::Metrics;
