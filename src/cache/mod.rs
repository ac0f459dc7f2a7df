//! Cache Module
//!
//! Time-bounded key/value stores and the read-through cache built on them.

mod entry;
mod file_store;
mod read_through;
mod stats;
mod store;


use std::time::Duration;

// Re-export public types
pub use entry::{expiry_after, CacheEntry};
pub use file_store::FileStore;
pub use read_through::{Expiry, ReadThroughCache};
pub use stats::CacheStats;
pub use store::{MemoryStore, TimedCacheStore};

// == Public Constants ==
/// TTL applied when a write does not choose one
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 7); // 7 days
