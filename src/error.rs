//! Error types for the filter layer and the cache.

use thiserror::Error;

/// Errors raised by the Bloom filter primitive.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("bit-array size must be greater than zero")]
    ZeroBits,

    #[error("hash-function count must be greater than zero")]
    ZeroHashes,

    #[error("bit-array size {bits} exceeds the maximum of {max}")]
    TooManyBits { bits: u64, max: u64 },

    #[error("filter state could not be decoded: {0}")]
    Decode(#[source] bincode::Error),

    #[error("filter state could not be encoded: {0}")]
    Encode(#[source] bincode::Error),

    #[error("filter parameters mismatch: expected m={expected_bits} k={expected_hashes}, found m={found_bits} k={found_hashes}")]
    ParamMismatch {
        expected_bits: u64,
        expected_hashes: u32,
        found_bits: u64,
        found_hashes: u32,
    },

    #[error("bit array holds {found} bytes, expected {expected}")]
    Truncated { expected: usize, found: usize },
}

/// Errors returned by [`BloomCache`](crate::BloomCache) and its builder.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("capacity must be greater than zero")]
    InvalidCapacity,

    #[error("invalid filter parameters: {0}")]
    InvalidFilterParams(#[source] FilterError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Persisted state for `key` could not be restored.
    #[error("corrupt filter state for key {key:?}: {source}")]
    CorruptState {
        key: String,
        #[source]
        source: FilterError,
    },

    /// The cache has been closed; no further operations are accepted.
    #[error("cache is closed")]
    Closed,

    #[error("failed to spawn background thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CacheError>;
