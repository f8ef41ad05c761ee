//! Targeted invalidation entry points.
//!
//! Mutating actions (manual refresh, widget added, credential retested) go
//! through here rather than poking the store directly. Invalidation marks
//! entries stale; the next [`ensure_fresh`](super::FetchCoordinator::ensure_fresh)
//! for an affected key fetches regardless of how recently it last did.

use tracing::debug;

use super::key::{ResourceKey, ResourceKind};
use super::store::{CacheStore, KeySelector};

#[derive(Clone)]
pub struct InvalidationRouter {
  store: CacheStore,
}

impl InvalidationRouter {
  pub fn new(store: CacheStore) -> Self {
    Self { store }
  }

  /// Invalidate exactly one resource.
  pub fn invalidate_key(&self, kind: ResourceKind, subject: &str, credential_id: &str) {
    let key = ResourceKey::new(kind, subject, credential_id, None);
    self.store.invalidate(KeySelector::Key(key));
  }

  /// Invalidate everything fetched with one credential — what the
  /// auto-refresh timer fires on every tick.
  pub fn invalidate_by_credential(&self, credential_id: &str) {
    debug!(credential_id, "invalidating credential-scoped entries");
    self
      .store
      .invalidate(KeySelector::Credential(credential_id.to_string()));
  }

  /// Invalidate every resource about one symbol, across credentials.
  pub fn invalidate_by_symbol(&self, symbol: &str) {
    self
      .store
      .invalidate(KeySelector::Subject(symbol.to_string()));
  }

  /// Invalidate every resource of one kind.
  pub fn invalidate_by_kind(&self, kind: ResourceKind) {
    self.store.invalidate(KeySelector::Kind(kind));
  }

  /// Drop the whole cache.
  pub fn invalidate_all(&self) {
    self.store.invalidate(KeySelector::All);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::store::CacheEntry;
  use crate::finance::types::ChartInterval;
  use tokio::time::Instant;

  fn seeded_store() -> (CacheStore, [ResourceKey; 3]) {
    let store = CacheStore::new();
    let keys = [
      ResourceKey::quote("AAPL", "k1"),
      ResourceKey::history("AAPL", "k1", ChartInterval::Daily),
      ResourceKey::quote("MSFT", "k2"),
    ];
    for key in &keys {
      store.set(
        key,
        CacheEntry {
          data: Some(serde_json::json!(1)),
          fetched_at: Instant::now(),
          is_loading: false,
          stale: false,
          error: None,
          generation: 0,
        },
      );
    }
    (store, keys)
  }

  #[tokio::test]
  async fn test_invalidate_by_credential_spans_kinds() {
    let (store, [quote, history, other]) = seeded_store();
    let router = InvalidationRouter::new(store.clone());

    router.invalidate_by_credential("k1");

    assert!(store.get(&quote).unwrap().stale);
    assert!(store.get(&history).unwrap().stale);
    assert!(!store.get(&other).unwrap().stale);
  }

  #[tokio::test]
  async fn test_invalidate_by_symbol_spans_credentials() {
    let (store, [quote, history, other]) = seeded_store();
    let router = InvalidationRouter::new(store.clone());

    router.invalidate_by_symbol("aapl");

    assert!(store.get(&quote).unwrap().stale);
    assert!(store.get(&history).unwrap().stale);
    assert!(!store.get(&other).unwrap().stale);
  }

  #[tokio::test]
  async fn test_invalidate_exact_key_leaves_siblings() {
    let (store, [quote, history, _]) = seeded_store();
    let router = InvalidationRouter::new(store.clone());

    router.invalidate_key(ResourceKind::Quote, "AAPL", "k1");

    assert!(store.get(&quote).unwrap().stale);
    assert!(!store.get(&history).unwrap().stale);
  }

  #[tokio::test]
  async fn test_invalidate_by_kind_spans_everything_of_that_kind() {
    let (store, [quote, history, other]) = seeded_store();
    let router = InvalidationRouter::new(store.clone());

    router.invalidate_by_kind(ResourceKind::Quote);

    assert!(store.get(&quote).unwrap().stale);
    assert!(store.get(&other).unwrap().stale);
    assert!(!store.get(&history).unwrap().stale);
  }

  #[tokio::test]
  async fn test_invalidate_all_empties_the_store() {
    let (store, keys) = seeded_store();
    let router = InvalidationRouter::new(store.clone());

    router.invalidate_all();

    for key in &keys {
      assert!(store.get(key).is_none());
    }
  }
}
