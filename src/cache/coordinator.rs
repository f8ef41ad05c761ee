//! Fetch coordination: cache-first reads, in-flight de-duplication, retry.
//!
//! [`FetchCoordinator::ensure_fresh`] is the one operation widgets call to
//! get data. It answers from cache when the entry is fresh, attaches to an
//! in-flight fetch when one exists, and otherwise fetches with retry and
//! populates the cache — always leaving the entry consistent and always
//! notifying subscribers, on success and failure alike.

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::key::ResourceKey;
use super::store::{CacheEntry, CacheEvent, CacheStore, Claim, Subscription};
use crate::error::{EntryError, FetchError};

/// Retry/backoff policy, independent of any HTTP client.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
  /// Additional attempts after the first failure.
  pub max_retries: u32,
  /// Delay before the first retry; doubles per attempt.
  pub base_delay: Duration,
  /// Ceiling on the doubled delay.
  pub max_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retries: 2,
      base_delay: Duration::from_secs(1),
      max_delay: Duration::from_secs(10),
    }
  }
}

impl RetryPolicy {
  /// Whether to retry after failed attempt number `attempt` (zero-based).
  /// Only transport failures are retried; a provider that rejected the
  /// request will reject it again.
  pub fn should_retry(&self, attempt: u32, error: &FetchError) -> bool {
    attempt < self.max_retries && error.is_retryable()
  }

  /// Exponential backoff: `base * 2^attempt`, capped.
  pub fn backoff_delay(&self, attempt: u32) -> Duration {
    let doubled = self
      .base_delay
      .saturating_mul(2u32.saturating_pow(attempt));
    doubled.min(self.max_delay)
  }
}

/// Where the returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
  /// Fetched from the network by this call.
  Network,
  /// Served from cache within its stale time.
  CacheFresh,
  /// Served from cache past its welcome — the refetch failed, the error
  /// rode along.
  CacheStale,
  /// Observed from a fetch another caller already had in flight.
  Shared,
}

/// Data plus provenance. `error` is populated when the data is stale
/// because a refetch failed; display both, hide neither.
#[derive(Debug, Clone)]
pub struct FetchResponse<T> {
  pub data: T,
  pub source: FetchSource,
  pub fetched_at: Instant,
  pub error: Option<FetchError>,
}

/// Coordinates every fetch against one [`CacheStore`].
#[derive(Clone)]
pub struct FetchCoordinator {
  store: CacheStore,
  retry: RetryPolicy,
}

impl FetchCoordinator {
  pub fn new(store: CacheStore) -> Self {
    Self {
      store,
      retry: RetryPolicy::default(),
    }
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  pub fn store(&self) -> &CacheStore {
    &self.store
  }

  /// Return fresh data for `key`, fetching only when needed.
  ///
  /// * Fresh cached entry and `force` off: answered from cache, the
  ///   fetcher is never invoked.
  /// * A fetch already in flight for this key: no second fetch; this call
  ///   observes the pending one and returns its result.
  /// * Otherwise: fetch with retry. Success replaces the payload; failure
  ///   keeps the previous payload (if any) next to the error, so the UI
  ///   can keep rendering the last good numbers.
  ///
  /// A `stale_time` of zero refetches on every call.
  pub async fn ensure_fresh<T, F, Fut>(
    &self,
    key: &ResourceKey,
    stale_time: Duration,
    force: bool,
    fetcher: F,
  ) -> Result<FetchResponse<T>, FetchError>
  where
    T: Serialize + DeserializeOwned,
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
  {
    match self.store.try_claim(key, stale_time, force) {
      Claim::Fresh(entry) => {
        debug!(%key, "cache hit");
        respond_from_entry(entry, FetchSource::CacheFresh)
      }
      Claim::InFlight(subscription) => {
        debug!(%key, "attaching to in-flight fetch");
        let entry = await_completion(subscription).await?;
        respond_from_entry(entry, FetchSource::Shared)
      }
      Claim::Claimed { generation, .. } => match self.fetch_with_retry(key, &fetcher).await {
        Ok(value) => {
          let payload = serde_json::to_value(&value)
            .map_err(|e| FetchError::decode(format!("unserializable payload: {e}")))?;
          let entry = self.store.complete_fetch(key, generation, Ok(payload));
          Ok(FetchResponse {
            data: value,
            source: FetchSource::Network,
            fetched_at: entry.fetched_at,
            error: None,
          })
        }
        Err(error) => {
          let entry =
            self
              .store
              .complete_fetch(key, generation, Err(EntryError::from(&error)));
          match entry.decode::<T>() {
            Some(prior) => Ok(FetchResponse {
              data: prior,
              source: FetchSource::CacheStale,
              fetched_at: entry.fetched_at,
              error: Some(error),
            }),
            None => Err(error),
          }
        }
      },
    }
  }

  async fn fetch_with_retry<T, F, Fut>(&self, key: &ResourceKey, fetcher: &F) -> Result<T, FetchError>
  where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
  {
    let mut attempt = 0;
    loop {
      match fetcher().await {
        Ok(value) => return Ok(value),
        Err(error) if self.retry.should_retry(attempt, &error) => {
          let delay = self.retry.backoff_delay(attempt);
          debug!(%key, attempt, ?delay, %error, "retrying fetch");
          tokio::time::sleep(delay).await;
          attempt += 1;
        }
        Err(error) => {
          warn!(%key, %error, "fetch failed");
          return Err(error);
        }
      }
    }
  }
}

/// Wait until the fetch that owns the in-flight marker lands its result.
async fn await_completion(mut subscription: Subscription) -> Result<CacheEntry, FetchError> {
  loop {
    match subscription.recv().await {
      Some(CacheEvent::Updated(entry)) if !entry.is_loading => return Ok(entry),
      Some(_) => continue,
      None => {
        return Err(FetchError::configuration(
          "cache store dropped while awaiting a shared fetch",
        ))
      }
    }
  }
}

fn respond_from_entry<T: DeserializeOwned>(
  entry: CacheEntry,
  source: FetchSource,
) -> Result<FetchResponse<T>, FetchError> {
  let error = entry.error.as_ref().map(FetchError::from);
  match entry.decode::<T>() {
    Some(data) => Ok(FetchResponse {
      data,
      source: if error.is_some() {
        FetchSource::CacheStale
      } else {
        source
      },
      fetched_at: entry.fetched_at,
      error,
    }),
    None => Err(error.unwrap_or_else(|| {
      FetchError::decode("cached payload does not match the requested type")
    })),
  }
}
