//! Credential-scoped auto-refresh timers.
//!
//! Widgets ask for their data to be refreshed every N seconds. Rather than
//! one timer per widget, registrations sharing an `(interval, credential)`
//! pair share a single reference-counted timer; each tick invalidates that
//! credential's cache entries, which makes active consumers refetch on
//! their next read. The last unregistration tears the timer down — a timer
//! outliving its registrants would keep invalidating a cache nobody reads.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::debug;

use crate::cache::InvalidationRouter;

/// Callback run after each tick's invalidation.
pub type OnTick = Arc<dyn Fn() + Send + Sync>;

type TimerKey = (u64, String);
type Registrants = Arc<Mutex<HashMap<u64, Option<OnTick>>>>;

struct Timer {
  registrants: Registrants,
  task: JoinHandle<()>,
}

struct TimersInner {
  timers: HashMap<TimerKey, Timer>,
  next_registration_id: u64,
}

struct SchedulerShared {
  router: InvalidationRouter,
  inner: Mutex<TimersInner>,
}

/// Repeating invalidation timers, one per distinct `(interval, credential)`.
#[derive(Clone)]
pub struct RefreshScheduler {
  shared: Arc<SchedulerShared>,
}

impl RefreshScheduler {
  pub fn new(router: InvalidationRouter) -> Self {
    Self {
      shared: Arc::new(SchedulerShared {
        router,
        inner: Mutex::new(TimersInner {
          timers: HashMap::new(),
          next_registration_id: 0,
        }),
      }),
    }
  }

  /// Register interest in refreshing `credential_id` every `interval_secs`.
  ///
  /// A zero interval or empty credential disables refresh and returns an
  /// inert handle. The first registration for a pair starts its timer
  /// (first tick one full period later); further registrations join it.
  /// The handle unregisters on drop, or explicitly via
  /// [`RefreshHandle::unregister`].
  pub fn register(
    &self,
    interval_secs: u64,
    credential_id: &str,
    on_tick: Option<OnTick>,
  ) -> RefreshHandle {
    if interval_secs == 0 || credential_id.is_empty() {
      return RefreshHandle { inner: None };
    }

    let key: TimerKey = (interval_secs, credential_id.to_string());
    let mut inner = lock(&self.shared.inner);
    inner.next_registration_id += 1;
    let id = inner.next_registration_id;

    match inner.timers.get(&key) {
      Some(timer) => {
        lock(&timer.registrants).insert(id, on_tick);
      }
      None => {
        let registrants: Registrants = Arc::new(Mutex::new(HashMap::from([(id, on_tick)])));
        // Anchor the first tick to registration time, one full period out,
        // not to whenever the spawned task first runs.
        let period = Duration::from_secs(interval_secs);
        let task = spawn_timer(
          self.shared.router.clone(),
          Arc::clone(&registrants),
          Instant::now() + period,
          period,
          credential_id.to_string(),
        );
        debug!(interval_secs, credential_id, "refresh timer started");
        inner.timers.insert(key.clone(), Timer { registrants, task });
      }
    }

    RefreshHandle {
      inner: Some(HandleInner {
        shared: Arc::downgrade(&self.shared),
        key,
        id,
      }),
    }
  }

  /// Number of live timers (not registrations).
  pub fn active_timers(&self) -> usize {
    lock(&self.shared.inner).timers.len()
  }
}

fn spawn_timer(
  router: InvalidationRouter,
  registrants: Registrants,
  start: Instant,
  period: Duration,
  credential_id: String,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = interval_at(start, period);
    loop {
      ticker.tick().await;
      router.invalidate_by_credential(&credential_id);
      let callbacks: Vec<OnTick> = lock(&registrants)
        .values()
        .filter_map(|cb| cb.clone())
        .collect();
      for callback in callbacks {
        callback();
      }
      debug!(?period, %credential_id, "refresh tick");
    }
  })
}

fn unregister(shared: &SchedulerShared, key: &TimerKey, id: u64) {
  let mut inner = lock(&shared.inner);
  let Some(timer) = inner.timers.get(key) else {
    return;
  };
  let remaining = {
    let mut registrants = lock(&timer.registrants);
    registrants.remove(&id);
    registrants.len()
  };
  if remaining == 0 {
    let timer = inner.timers.remove(key).expect("present above");
    timer.task.abort();
    debug!(
      interval_secs = key.0,
      credential_id = %key.1,
      "refresh timer stopped"
    );
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct HandleInner {
  shared: Weak<SchedulerShared>,
  key: TimerKey,
  id: u64,
}

/// One registration on a refresh timer.
pub struct RefreshHandle {
  inner: Option<HandleInner>,
}

impl RefreshHandle {
  /// Whether this handle holds a live registration.
  pub fn is_active(&self) -> bool {
    self.inner.is_some()
  }

  /// Withdraw this registration. Idempotent; stops the underlying timer if
  /// this was the last registration on it.
  pub fn unregister(&mut self) {
    let Some(handle) = self.inner.take() else {
      return;
    };
    if let Some(shared) = handle.shared.upgrade() {
      unregister(&shared, &handle.key, handle.id);
    }
  }
}

impl Drop for RefreshHandle {
  fn drop(&mut self) {
    self.unregister();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheEntry, CacheStore, ResourceKey};
  use std::sync::atomic::{AtomicU32, Ordering};

  fn scheduler_with_store() -> (RefreshScheduler, CacheStore) {
    let store = CacheStore::new();
    let scheduler = RefreshScheduler::new(InvalidationRouter::new(store.clone()));
    (scheduler, store)
  }

  fn seed(store: &CacheStore, key: &ResourceKey) {
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

  fn counting_callback() -> (OnTick, Arc<AtomicU32>) {
    let count = Arc::new(AtomicU32::new(0));
    let count_in = count.clone();
    let callback: OnTick = Arc::new(move || {
      count_in.fetch_add(1, Ordering::SeqCst);
    });
    (callback, count)
  }

  async fn advance(seconds: u64) {
    for _ in 0..seconds {
      tokio::time::advance(Duration::from_secs(1)).await;
      tokio::task::yield_now().await;
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_ticks_invalidate_only_the_registered_credential() {
    let (scheduler, store) = scheduler_with_store();
    let mine = ResourceKey::quote("AAPL", "k1");
    let theirs = ResourceKey::quote("AAPL", "k2");
    seed(&store, &mine);
    seed(&store, &theirs);
    let (callback, ticks) = counting_callback();

    let _handle = scheduler.register(5, "k1", Some(callback));
    advance(15).await;

    assert_eq!(ticks.load(Ordering::SeqCst), 3);
    assert!(store.get(&mine).unwrap().stale);
    assert!(!store.get(&theirs).unwrap().stale);
  }

  #[tokio::test(start_paused = true)]
  async fn test_first_tick_fires_after_one_full_period() {
    let (scheduler, _store) = scheduler_with_store();
    let (callback, ticks) = counting_callback();

    let _handle = scheduler.register(60, "k1", Some(callback));
    advance(59).await;
    assert_eq!(ticks.load(Ordering::SeqCst), 0);
    advance(1).await;
    assert_eq!(ticks.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_identical_registrations_share_one_timer() {
    let (scheduler, _store) = scheduler_with_store();
    let (cb_a, ticks_a) = counting_callback();
    let (cb_b, ticks_b) = counting_callback();

    let mut first = scheduler.register(60, "A", Some(cb_a));
    let mut second = scheduler.register(60, "A", Some(cb_b));
    assert_eq!(scheduler.active_timers(), 1);

    advance(60).await;
    assert_eq!(ticks_a.load(Ordering::SeqCst), 1);
    assert_eq!(ticks_b.load(Ordering::SeqCst), 1);

    // Dropping one registration keeps the timer alive for the other.
    first.unregister();
    assert_eq!(scheduler.active_timers(), 1);
    advance(60).await;
    assert_eq!(ticks_a.load(Ordering::SeqCst), 1);
    assert_eq!(ticks_b.load(Ordering::SeqCst), 2);

    // The last unregistration stops all ticking.
    second.unregister();
    assert_eq!(scheduler.active_timers(), 0);
    advance(180).await;
    assert_eq!(ticks_b.load(Ordering::SeqCst), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_distinct_pairs_get_distinct_timers() {
    let (scheduler, _store) = scheduler_with_store();
    let _a = scheduler.register(60, "A", None);
    let _b = scheduler.register(30, "A", None);
    let _c = scheduler.register(60, "B", None);
    assert_eq!(scheduler.active_timers(), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_zero_interval_or_empty_credential_is_disabled() {
    let (scheduler, _store) = scheduler_with_store();
    let zero = scheduler.register(0, "k1", None);
    let empty = scheduler.register(60, "", None);

    assert!(!zero.is_active());
    assert!(!empty.is_active());
    assert_eq!(scheduler.active_timers(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_unregister_is_idempotent() {
    let (scheduler, _store) = scheduler_with_store();
    let mut handle = scheduler.register(60, "k1", None);
    handle.unregister();
    handle.unregister();
    assert_eq!(scheduler.active_timers(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_dropping_the_handle_unregisters() {
    let (scheduler, _store) = scheduler_with_store();
    {
      let _handle = scheduler.register(60, "k1", None);
      assert_eq!(scheduler.active_timers(), 1);
    }
    assert_eq!(scheduler.active_timers(), 0);
  }
}
