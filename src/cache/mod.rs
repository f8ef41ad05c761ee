//! Query-keyed caching layer between widgets and the finance provider.
//!
//! This module owns the invariants the rest of the crate relies on:
//! - one cache entry per composite resource key, one in-flight fetch per key
//! - fresh entries answer without I/O; stale entries answer while refetching
//! - failures keep the last good payload next to the error
//! - invalidation makes the next read fetch, without fetching itself

mod coordinator;
mod invalidate;
mod key;
mod store;

pub use coordinator::{FetchCoordinator, FetchResponse, FetchSource, RetryPolicy};
pub use invalidate::InvalidationRouter;
pub use key::{ResourceKey, ResourceKind};
pub use store::{CacheEntry, CacheEvent, CacheStats, CacheStore, Claim, KeySelector, Subscription};
