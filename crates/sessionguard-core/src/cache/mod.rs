//! In-memory, TTL-bounded cache of the last loaded session record and the
//! last verification outcome.
//!
//! Entries expire lazily: staleness is checked at read time and there is no
//! background sweep. Both entries share one lock so a reader never sees a
//! half-written entry.

pub mod session_cache;

pub use session_cache::{CacheEntry, CacheStats, SessionCache, DEFAULT_CACHE_TTL};
