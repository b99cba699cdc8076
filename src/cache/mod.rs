//! Versioned response cache with offline support.
//!
//! This module provides the storage side of the proxy:
//! - Responses are grouped into named generations, one per proxy version
//! - Entries are keyed by request method + URL
//! - Cache-first lookups fall back to the network and, when the network is
//!   unavailable, to whatever was stored before

mod key;
mod layer;
mod storage;
mod traits;

pub use key::RequestKey;
pub use layer::CacheLayer;
pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
pub use traits::{CachedEntry, FetchOutcome, ResponseSource};
