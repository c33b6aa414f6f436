//! In-memory containers guarded by the cache lock: the bounded recency store
//! and the dirty-key tracker.

pub mod dirty;
pub mod lru;

pub use dirty::DirtyTracker;
pub use lru::LruStore;
