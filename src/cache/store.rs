//! In-memory cache store with subscriptions and targeted invalidation.
//!
//! One process-wide map from [`ResourceKey`] to [`CacheEntry`]. All mutation
//! and subscriber notification happen under a single mutex and never
//! suspend, so readers never observe a half-updated entry. Notification is
//! an unbounded-channel send; subscribers consume events at their own pace.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use super::key::{ResourceKey, ResourceKind};
use crate::error::EntryError;

/// Entries untouched for this long are discarded outright, as opposed to
/// going stale (stale data still renders; expired data is gone).
pub const DEFAULT_HARD_EXPIRY: Duration = Duration::from_secs(30 * 60);

/// One cached fetch result, successful or not.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  /// Last successfully fetched payload. Survives later failed refetches.
  pub data: Option<Value>,
  /// Instant of the last fetch attempt, successful or failed.
  pub fetched_at: Instant,
  /// A fetch for this key is currently in flight.
  pub is_loading: bool,
  /// Force the next freshness check to fail regardless of elapsed time.
  pub stale: bool,
  /// Last failure, cleared on the next success.
  pub error: Option<EntryError>,
  /// Bumped by invalidation; lets a completing fetch detect that it raced
  /// an invalidation and must land already-stale.
  pub(crate) generation: u64,
}

impl CacheEntry {
  /// Deserialize the cached payload, if any.
  pub fn decode<T: DeserializeOwned>(&self) -> Option<T> {
    self
      .data
      .as_ref()
      .and_then(|value| serde_json::from_value(value.clone()).ok())
  }

  fn is_fresh(&self, stale_time: Duration) -> bool {
    !self.stale && self.data.is_some() && self.fetched_at.elapsed() < stale_time
  }
}

/// What a subscriber hears about its key.
#[derive(Debug, Clone)]
pub enum CacheEvent {
  /// The entry was written (fetch started, completed, or marked stale).
  Updated(CacheEntry),
  /// The whole store was cleared; the entry is gone.
  Cleared,
}

/// Which entries an invalidation targets.
#[derive(Debug, Clone)]
pub enum KeySelector {
  /// Exactly one resource.
  Key(ResourceKey),
  /// Every resource fetched with this credential.
  Credential(String),
  /// Every resource about this symbol, across credentials.
  Subject(String),
  /// Every resource of one kind, across credentials and symbols.
  Kind(ResourceKind),
  /// Everything.
  All,
}

impl KeySelector {
  fn matches(&self, key: &ResourceKey) -> bool {
    match self {
      Self::Key(k) => k == key,
      Self::Credential(id) => key.credential_id == *id,
      Self::Subject(symbol) => key.subject.eq_ignore_ascii_case(symbol.trim()),
      Self::Kind(kind) => key.kind == *kind,
      Self::All => true,
    }
  }
}

/// Outcome of an atomic freshness-check-and-claim.
pub enum Claim {
  /// The cached entry satisfies the request; no fetch needed.
  Fresh(CacheEntry),
  /// Someone else is already fetching this key; observe them instead.
  InFlight(Subscription),
  /// The caller now owns the one in-flight fetch for this key.
  Claimed {
    generation: u64,
    prior: Option<CacheEntry>,
  },
}

type Subscribers = HashMap<u64, mpsc::UnboundedSender<CacheEvent>>;

struct Inner {
  entries: HashMap<ResourceKey, CacheEntry>,
  subscribers: HashMap<ResourceKey, Subscribers>,
  next_subscriber_id: u64,
  next_generation: u64,
}

struct Shared {
  inner: Mutex<Inner>,
  hard_expiry: Duration,
}

/// Process-local cache shared by every widget.
///
/// Cheap to clone; clones share one underlying map. Construct one per
/// application (or per test) and hand clones to the coordinator, router and
/// scheduler.
#[derive(Clone)]
pub struct CacheStore {
  shared: Arc<Shared>,
}

impl CacheStore {
  pub fn new() -> Self {
    Self::with_hard_expiry(DEFAULT_HARD_EXPIRY)
  }

  pub fn with_hard_expiry(hard_expiry: Duration) -> Self {
    Self {
      shared: Arc::new(Shared {
        inner: Mutex::new(Inner {
          entries: HashMap::new(),
          subscribers: HashMap::new(),
          next_subscriber_id: 0,
          next_generation: 0,
        }),
        hard_expiry,
      }),
    }
  }

  /// Current entry for `key`, pruning it first if hard-expired.
  pub fn get(&self, key: &ResourceKey) -> Option<CacheEntry> {
    let mut inner = self.lock();
    self.prune_expired(&mut inner, key);
    inner.entries.get(key).cloned()
  }

  /// Replace the entry for `key` and notify its subscribers.
  pub fn set(&self, key: &ResourceKey, entry: CacheEntry) {
    let mut inner = self.lock();
    inner.entries.insert(key.clone(), entry.clone());
    notify(&mut inner, key, CacheEvent::Updated(entry));
  }

  /// Observe every write to `key`. Dropping the subscription (or calling
  /// [`Subscription::unsubscribe`]) stops delivery; the subscription stays
  /// valid even if it outlives the store.
  pub fn subscribe(&self, key: &ResourceKey) -> Subscription {
    let mut inner = self.lock();
    subscribe_locked(&self.shared, &mut inner, key)
  }

  /// Atomically check freshness and, on a miss, claim the right to fetch.
  ///
  /// At most one caller per key ever receives [`Claim::Claimed`] while a
  /// fetch is outstanding; concurrent callers get a subscription onto the
  /// same in-flight result. `force` skips the freshness check but still
  /// de-duplicates.
  pub fn try_claim(&self, key: &ResourceKey, stale_time: Duration, force: bool) -> Claim {
    let mut inner = self.lock();
    self.prune_expired(&mut inner, key);

    let status = inner
      .entries
      .get(key)
      .map(|e| (e.is_loading, !force && e.is_fresh(stale_time)));
    match status {
      Some((true, _)) => {
        return Claim::InFlight(subscribe_locked(&self.shared, &mut inner, key));
      }
      Some((false, true)) => {
        let entry = inner.entries.get(key).cloned().expect("entry checked above");
        return Claim::Fresh(entry);
      }
      _ => {}
    }

    let prior = inner.entries.get(key).cloned();
    let generation = match &prior {
      Some(entry) => entry.generation,
      None => {
        inner.next_generation += 1;
        inner.next_generation
      }
    };
    let marker = CacheEntry {
      data: prior.as_ref().and_then(|e| e.data.clone()),
      fetched_at: prior
        .as_ref()
        .map(|e| e.fetched_at)
        .unwrap_or_else(Instant::now),
      is_loading: true,
      stale: prior.as_ref().map(|e| e.stale).unwrap_or(false),
      error: prior.as_ref().and_then(|e| e.error.clone()),
      generation,
    };
    inner.entries.insert(key.clone(), marker.clone());
    notify(&mut inner, key, CacheEvent::Updated(marker));
    Claim::Claimed { generation, prior }
  }

  /// Land the result of a claimed fetch.
  ///
  /// Writes win by completion time. If the key was invalidated while the
  /// fetch was out, the landed entry is stale from the start — the data
  /// still shows, the next read refetches, and nothing is re-triggered
  /// here. Failed fetches keep the prior payload next to the error.
  pub fn complete_fetch(
    &self,
    key: &ResourceKey,
    claimed_generation: u64,
    result: Result<Value, EntryError>,
  ) -> CacheEntry {
    let mut inner = self.lock();
    let (raced, prior_data, existing_generation) = {
      let current = inner.entries.get(key);
      (
        current
          .map(|e| e.generation != claimed_generation)
          .unwrap_or(true),
        current.and_then(|e| e.data.clone()),
        current.map(|e| e.generation),
      )
    };
    let generation = match existing_generation {
      Some(generation) => generation,
      None => {
        inner.next_generation += 1;
        inner.next_generation
      }
    };

    let entry = match result {
      Ok(value) => CacheEntry {
        data: Some(value),
        fetched_at: Instant::now(),
        is_loading: false,
        stale: raced,
        error: None,
        generation,
      },
      Err(error) => CacheEntry {
        data: prior_data,
        fetched_at: Instant::now(),
        is_loading: false,
        stale: raced,
        error: Some(error),
        generation,
      },
    };
    inner.entries.insert(key.clone(), entry.clone());
    notify(&mut inner, key, CacheEvent::Updated(entry.clone()));
    entry
  }

  /// Mark matching entries stale (or clear everything for
  /// [`KeySelector::All`]) and notify their subscribers.
  ///
  /// In-flight markers are left in place; the fetch that owns them will
  /// still land its result.
  pub fn invalidate(&self, selector: KeySelector) {
    let mut inner = self.lock();

    if let KeySelector::All = selector {
      let count = inner.entries.len();
      inner.entries.clear();
      let keys: Vec<ResourceKey> = inner.subscribers.keys().cloned().collect();
      for key in keys {
        notify(&mut inner, &key, CacheEvent::Cleared);
      }
      debug!(count, "cache cleared");
      return;
    }

    let matching: Vec<ResourceKey> = inner
      .entries
      .keys()
      .filter(|key| selector.matches(key))
      .cloned()
      .collect();
    for key in &matching {
      inner.next_generation += 1;
      let generation = inner.next_generation;
      let entry = inner.entries.get_mut(key).expect("key collected above");
      entry.stale = true;
      entry.generation = generation;
      let snapshot = entry.clone();
      notify(&mut inner, key, CacheEvent::Updated(snapshot));
    }
    debug!(count = matching.len(), ?selector, "cache entries invalidated");
  }

  /// Entry and subscriber counts, for diagnostics.
  pub fn stats(&self) -> CacheStats {
    let inner = self.lock();
    CacheStats {
      entries: inner.entries.len(),
      subscribed_keys: inner.subscribers.len(),
    }
  }

  fn prune_expired(&self, inner: &mut Inner, key: &ResourceKey) {
    let expired = inner
      .entries
      .get(key)
      .map(|e| !e.is_loading && e.fetched_at.elapsed() >= self.shared.hard_expiry)
      .unwrap_or(false);
    if expired {
      inner.entries.remove(key);
      debug!(%key, "hard-expired cache entry dropped");
    }
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
    self
      .shared
      .inner
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

impl Default for CacheStore {
  fn default() -> Self {
    Self::new()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
  pub entries: usize,
  pub subscribed_keys: usize,
}

fn subscribe_locked(shared: &Arc<Shared>, inner: &mut Inner, key: &ResourceKey) -> Subscription {
  let (tx, rx) = mpsc::unbounded_channel();
  inner.next_subscriber_id += 1;
  let id = inner.next_subscriber_id;
  inner
    .subscribers
    .entry(key.clone())
    .or_default()
    .insert(id, tx);
  Subscription {
    shared: Arc::downgrade(shared),
    key: key.clone(),
    id,
    rx,
    active: true,
  }
}

fn notify(inner: &mut Inner, key: &ResourceKey, event: CacheEvent) {
  let Some(subs) = inner.subscribers.get(key) else {
    return;
  };
  let dead: Vec<u64> = subs
    .iter()
    .filter(|(_, tx)| tx.send(event.clone()).is_err())
    .map(|(id, _)| *id)
    .collect();
  if !dead.is_empty() {
    let subs = inner.subscribers.get_mut(key).expect("checked above");
    for id in dead {
      subs.remove(&id);
    }
    if subs.is_empty() {
      inner.subscribers.remove(key);
    }
  }
}

/// Live subscription to one cache key.
pub struct Subscription {
  shared: Weak<Shared>,
  key: ResourceKey,
  id: u64,
  rx: mpsc::UnboundedReceiver<CacheEvent>,
  active: bool,
}

impl Subscription {
  /// Next event for this key. `None` once unsubscribed and drained.
  pub async fn recv(&mut self) -> Option<CacheEvent> {
    self.rx.recv().await
  }

  /// Stop receiving events. Safe to call repeatedly, and a no-op once the
  /// store itself is gone.
  pub fn unsubscribe(&mut self) {
    if !self.active {
      return;
    }
    self.active = false;
    let Some(shared) = self.shared.upgrade() else {
      return;
    };
    let mut inner = shared
      .inner
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(subs) = inner.subscribers.get_mut(&self.key) {
      subs.remove(&self.id);
      if subs.is_empty() {
        inner.subscribers.remove(&self.key);
      }
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.unsubscribe();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ErrorKind;

  fn entry(value: Value) -> CacheEntry {
    CacheEntry {
      data: Some(value),
      fetched_at: Instant::now(),
      is_loading: false,
      stale: false,
      error: None,
      generation: 0,
    }
  }

  #[tokio::test]
  async fn test_set_notifies_subscribers() {
    let store = CacheStore::new();
    let key = ResourceKey::quote("AAPL", "k1");
    let mut sub = store.subscribe(&key);

    store.set(&key, entry(serde_json::json!({"c": 100.0})));

    match sub.recv().await {
      Some(CacheEvent::Updated(e)) => {
        assert_eq!(e.data, Some(serde_json::json!({"c": 100.0})));
      }
      other => panic!("expected update, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn test_unsubscribe_is_idempotent_and_cleans_up() {
    let store = CacheStore::new();
    let key = ResourceKey::quote("AAPL", "k1");
    let mut sub = store.subscribe(&key);
    assert_eq!(store.stats().subscribed_keys, 1);

    sub.unsubscribe();
    sub.unsubscribe();
    assert_eq!(store.stats().subscribed_keys, 0);

    // Events published after unsubscribe never arrive.
    store.set(&key, entry(serde_json::json!(1)));
    assert!(sub.rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_unsubscribe_after_store_dropped_is_safe() {
    let store = CacheStore::new();
    let key = ResourceKey::quote("AAPL", "k1");
    let mut sub = store.subscribe(&key);
    drop(store);
    sub.unsubscribe();
  }

  #[tokio::test]
  async fn test_invalidate_by_credential_marks_only_that_credential() {
    let store = CacheStore::new();
    let mine = ResourceKey::quote("AAPL", "k1");
    let theirs = ResourceKey::quote("AAPL", "k2");
    store.set(&mine, entry(serde_json::json!(1)));
    store.set(&theirs, entry(serde_json::json!(2)));

    store.invalidate(KeySelector::Credential("k1".into()));

    assert!(store.get(&mine).unwrap().stale);
    assert!(!store.get(&theirs).unwrap().stale);
  }

  #[tokio::test]
  async fn test_invalidate_all_clears_and_notifies() {
    let store = CacheStore::new();
    let key = ResourceKey::quote("AAPL", "k1");
    store.set(&key, entry(serde_json::json!(1)));
    let mut sub = store.subscribe(&key);

    store.invalidate(KeySelector::All);

    assert!(store.get(&key).is_none());
    assert!(matches!(sub.recv().await, Some(CacheEvent::Cleared)));
  }

  #[tokio::test(start_paused = true)]
  async fn test_hard_expired_entries_are_dropped_on_access() {
    let store = CacheStore::with_hard_expiry(Duration::from_secs(60));
    let key = ResourceKey::quote("AAPL", "k1");
    store.set(&key, entry(serde_json::json!(1)));

    tokio::time::advance(Duration::from_secs(59)).await;
    assert!(store.get(&key).is_some());

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(store.get(&key).is_none());
  }

  #[tokio::test]
  async fn test_second_claim_attaches_to_in_flight_fetch() {
    let store = CacheStore::new();
    let key = ResourceKey::quote("AAPL", "k1");

    let Claim::Claimed { generation, prior } =
      store.try_claim(&key, Duration::from_secs(30), false)
    else {
      panic!("first claim should win");
    };
    assert!(prior.is_none());

    assert!(matches!(
      store.try_claim(&key, Duration::from_secs(30), false),
      Claim::InFlight(_)
    ));

    store.complete_fetch(&key, generation, Ok(serde_json::json!(1)));
    assert!(matches!(
      store.try_claim(&key, Duration::from_secs(30), false),
      Claim::Fresh(_)
    ));
  }

  #[tokio::test]
  async fn test_completion_after_invalidation_lands_stale() {
    let store = CacheStore::new();
    let key = ResourceKey::quote("AAPL", "k1");
    store.set(&key, entry(serde_json::json!(1)));

    let Claim::Claimed { generation, .. } = store.try_claim(&key, Duration::ZERO, false) else {
      panic!("claim should win");
    };
    store.invalidate(KeySelector::Credential("k1".into()));
    let landed = store.complete_fetch(&key, generation, Ok(serde_json::json!(2)));

    // The write landed, but stays eligible for the next refetch.
    assert_eq!(landed.data, Some(serde_json::json!(2)));
    assert!(landed.stale);
  }

  #[tokio::test]
  async fn test_failed_fetch_preserves_prior_data() {
    let store = CacheStore::new();
    let key = ResourceKey::quote("AAPL", "k1");
    store.set(&key, entry(serde_json::json!({"c": 100.0})));

    let Claim::Claimed { generation, .. } = store.try_claim(&key, Duration::ZERO, false) else {
      panic!("claim should win");
    };
    let landed = store.complete_fetch(
      &key,
      generation,
      Err(EntryError {
        kind: ErrorKind::Provider,
        message: "rate limited".into(),
      }),
    );

    assert_eq!(landed.data, Some(serde_json::json!({"c": 100.0})));
    assert_eq!(landed.error.as_ref().unwrap().message, "rate limited");
    assert!(!landed.is_loading);
  }
}
