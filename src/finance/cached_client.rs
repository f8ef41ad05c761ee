//! Cached finance client: the surface widgets actually call.
//!
//! Wraps the HTTP client with the caching coordinator and the credential
//! registry. Every method resolves its credential first and fails fast on a
//! missing or invalid one — a widget whose api key was deleted renders an
//! error state, it does not reach the network and it does not panic.

use std::sync::Arc;

use tracing::debug;

use super::client::HttpFinanceClient;
use super::fetch_all;
use super::types::{
  Candle, ChartInterval, MarketMovers, PerformanceSummary, StockQuote, SymbolInfo,
};
use crate::cache::{CacheStore, FetchCoordinator, FetchResponse, FetchSource, ResourceKey};
use crate::config::StaleTimes;
use crate::error::FetchError;
use crate::keys::{Credential, CredentialStore, Validity};

#[derive(Clone)]
pub struct CachedFinanceClient {
  inner: HttpFinanceClient,
  coordinator: FetchCoordinator,
  keys: Arc<dyn CredentialStore>,
  stale: StaleTimes,
}

impl CachedFinanceClient {
  pub fn new(
    inner: HttpFinanceClient,
    store: CacheStore,
    keys: Arc<dyn CredentialStore>,
    stale: StaleTimes,
  ) -> Self {
    Self {
      inner,
      coordinator: FetchCoordinator::new(store),
      keys,
      stale,
    }
  }

  /// Override the default retry policy (usually from
  /// [`RetrySettings::policy`](crate::config::RetrySettings::policy)).
  pub fn with_retry(mut self, retry: crate::cache::RetryPolicy) -> Self {
    self.coordinator = self.coordinator.with_retry(retry);
    self
  }

  pub fn store(&self) -> &CacheStore {
    self.coordinator.store()
  }

  /// Live quote, cache-first.
  pub async fn quote(
    &self,
    symbol: &str,
    credential_id: &str,
  ) -> Result<FetchResponse<StockQuote>, FetchError> {
    self.quote_with(symbol, credential_id, false).await
  }

  /// Live quote; `force` skips the freshness check (the manual refresh
  /// button).
  pub async fn quote_with(
    &self,
    symbol: &str,
    credential_id: &str,
    force: bool,
  ) -> Result<FetchResponse<StockQuote>, FetchError> {
    let symbol = required_symbol(symbol)?;
    let credential = self.resolve(credential_id)?;
    let key = ResourceKey::quote(&symbol, &credential.id);

    let response = self
      .coordinator
      .ensure_fresh(&key, self.stale.quote(), force, || {
        let inner = self.inner.clone();
        let symbol = symbol.clone();
        let token = credential.secret.clone();
        async move { inner.quote(&symbol, &token).await }
      })
      .await?;
    self.note_usage(&credential, &response);
    Ok(response)
  }

  /// Historical candles aggregated to `interval`, cache-first.
  pub async fn history(
    &self,
    symbol: &str,
    interval: ChartInterval,
    credential_id: &str,
  ) -> Result<FetchResponse<Vec<Candle>>, FetchError> {
    self.history_with(symbol, interval, credential_id, false).await
  }

  pub async fn history_with(
    &self,
    symbol: &str,
    interval: ChartInterval,
    credential_id: &str,
    force: bool,
  ) -> Result<FetchResponse<Vec<Candle>>, FetchError> {
    let symbol = required_symbol(symbol)?;
    let credential = self.resolve(credential_id)?;
    let key = ResourceKey::history(&symbol, &credential.id, interval);

    let response = self
      .coordinator
      .ensure_fresh(&key, self.stale.history(), force, || {
        let inner = self.inner.clone();
        let symbol = symbol.clone();
        let token = credential.secret.clone();
        async move {
          let daily = inner.history(&symbol, interval, &token).await?;
          Ok(super::types::aggregate_candles(&daily, interval))
        }
      })
      .await?;
    self.note_usage(&credential, &response);
    Ok(response)
  }

  /// The provider's symbol universe. Changes rarely, cached long.
  pub async fn symbols(
    &self,
    credential_id: &str,
  ) -> Result<FetchResponse<Vec<SymbolInfo>>, FetchError> {
    let credential = self.resolve(credential_id)?;
    let key = ResourceKey::symbols(&credential.id);

    self
      .coordinator
      .ensure_fresh(&key, self.stale.symbols(), false, || {
        let inner = self.inner.clone();
        async move { Ok(inner.symbols()) }
      })
      .await
  }

  /// Market movers, cache-first.
  pub async fn market_movers(
    &self,
    credential_id: &str,
  ) -> Result<FetchResponse<MarketMovers>, FetchError> {
    self.market_movers_with(credential_id, false).await
  }

  pub async fn market_movers_with(
    &self,
    credential_id: &str,
    force: bool,
  ) -> Result<FetchResponse<MarketMovers>, FetchError> {
    let credential = self.resolve(credential_id)?;
    let key = ResourceKey::market_movers(&credential.id);

    let response = self
      .coordinator
      .ensure_fresh(&key, self.stale.market_movers(), force, || {
        let inner = self.inner.clone();
        let token = credential.secret.clone();
        async move { inner.market_movers(&token).await }
      })
      .await?;
    self.note_usage(&credential, &response);
    Ok(response)
  }

  /// Fundamentals for one symbol, cache-first.
  pub async fn performance(
    &self,
    symbol: &str,
    credential_id: &str,
  ) -> Result<FetchResponse<PerformanceSummary>, FetchError> {
    let symbol = required_symbol(symbol)?;
    let credential = self.resolve(credential_id)?;
    let key = ResourceKey::performance(&symbol, &credential.id);

    let response = self
      .coordinator
      .ensure_fresh(&key, self.stale.performance(), false, || {
        let inner = self.inner.clone();
        let symbol = symbol.clone();
        let token = credential.secret.clone();
        async move { inner.performance(&symbol, &token).await }
      })
      .await?;
    self.note_usage(&credential, &response);
    Ok(response)
  }

  /// Quotes for a whole table of symbols. Symbols that fail are absent
  /// from the result; the table renders what it got.
  pub async fn quotes(&self, symbols: &[String], credential_id: &str) -> Vec<StockQuote> {
    fetch_all(symbols, |symbol| async move {
      self
        .quote(&symbol, credential_id)
        .await
        .map(|response| response.data)
    })
    .await
  }

  fn resolve(&self, credential_id: &str) -> Result<Credential, FetchError> {
    if credential_id.trim().is_empty() {
      return Err(FetchError::configuration("no api key selected"));
    }
    let credential = self
      .keys
      .get(credential_id)
      .map_err(|e| FetchError::configuration(format!("credential store unavailable: {e}")))?
      .ok_or_else(|| {
        FetchError::configuration(format!("api key {credential_id} no longer exists"))
      })?;
    if credential.validity == Validity::Invalid {
      return Err(FetchError::configuration(format!(
        "api key {} failed its last connectivity test",
        credential.name
      )));
    }
    Ok(credential)
  }

  fn note_usage<T>(&self, credential: &Credential, response: &FetchResponse<T>) {
    if response.source == FetchSource::Network {
      if let Err(error) = self.keys.record_usage(&credential.id) {
        debug!(%error, credential_id = %credential.id, "could not record key usage");
      }
    }
  }
}

fn required_symbol(symbol: &str) -> Result<String, FetchError> {
  let trimmed = symbol.trim();
  if trimmed.is_empty() {
    return Err(FetchError::configuration("symbol must not be empty"));
  }
  Ok(trimmed.to_uppercase())
}
