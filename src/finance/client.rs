//! HTTP client for the market-data provider.

use color_eyre::{eyre::eyre, Result};
use chrono::Utc;
use url::Url;

use super::api_types::{ChartEnvelope, SummaryEnvelope};
use super::fetch_all;
use super::types::{Candle, ChartInterval, MarketMovers, StockQuote, SymbolInfo};
use crate::config::ProviderSettings;
use crate::error::FetchError;

/// Symbols the provider serves market-movers data for.
const MOVERS_UNIVERSE: &[&str] = &[
  "RELIANCE",
  "TCS",
  "HDFCBANK",
  "INFY",
  "HINDUNILVR",
  "ICICIBANK",
  "KOTAKBANK",
  "LT",
  "ASIANPAINT",
  "MARUTI",
  "BHARTIARTL",
  "ITC",
  "SBIN",
  "AXISBANK",
  "BAJFINANCE",
  "WIPRO",
  "ULTRACEMCO",
  "NESTLEIND",
  "POWERGRID",
  "NTPC",
  "ADANIPORTS",
  "COALINDIA",
  "ONGC",
  "TECHM",
  "GRASIM",
  "HCLTECH",
  "JSWSTEEL",
  "TATASTEEL",
  "SUNPHARMA",
  "DRREDDY",
];

/// Curated symbol listing served to the symbol picker.
const SYMBOL_UNIVERSE: &[(&str, &str)] = &[
  ("RELIANCE", "Reliance Industries Limited"),
  ("TCS", "Tata Consultancy Services"),
  ("HDFCBANK", "HDFC Bank Limited"),
  ("INFY", "Infosys Limited"),
  ("HINDUNILVR", "Hindustan Unilever Limited"),
  ("ICICIBANK", "ICICI Bank Limited"),
  ("KOTAKBANK", "Kotak Mahindra Bank"),
  ("LT", "Larsen & Toubro Limited"),
  ("ASIANPAINT", "Asian Paints Limited"),
  ("MARUTI", "Maruti Suzuki India Limited"),
];

/// Thin client over the provider's chart API.
#[derive(Clone)]
pub struct HttpFinanceClient {
  http: reqwest::Client,
  base_url: String,
  symbol_suffix: String,
}

impl HttpFinanceClient {
  pub fn new(settings: &ProviderSettings) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(std::time::Duration::from_secs(settings.request_timeout_secs))
      .user_agent(concat!("finboard/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url: settings.base_url.trim_end_matches('/').to_string(),
      symbol_suffix: settings.symbol_suffix.clone(),
    })
  }

  /// Live quote for one symbol.
  pub async fn quote(&self, symbol: &str, token: &str) -> Result<StockQuote, FetchError> {
    let url = self.chart_url(symbol, &[("token", token)])?;
    let envelope: ChartEnvelope = self.get_json(url).await?;
    envelope.into_result()?.into_quote(symbol)
  }

  /// Daily candles covering the interval's lookback window.
  pub async fn history(
    &self,
    symbol: &str,
    interval: ChartInterval,
    token: &str,
  ) -> Result<Vec<Candle>, FetchError> {
    let period2 = Utc::now().timestamp();
    let period1 = period2 - interval.lookback_days() * 24 * 60 * 60;
    let url = self.chart_url(
      symbol,
      &[
        ("period1", period1.to_string().as_str()),
        ("period2", period2.to_string().as_str()),
        ("interval", "1d"),
        ("token", token),
      ],
    )?;
    let envelope: ChartEnvelope = self.get_json(url).await?;
    envelope.into_result()?.into_candles()
  }

  /// Valuation/volume fundamentals for one symbol.
  pub async fn performance(
    &self,
    symbol: &str,
    token: &str,
  ) -> Result<super::types::PerformanceSummary, FetchError> {
    let url = Url::parse_with_params(
      &format!(
        "{}/v10/finance/quoteSummary/{}{}",
        self.base_url, symbol, self.symbol_suffix
      ),
      &[
        ("modules", "summaryDetail,defaultKeyStatistics,financialData"),
        ("token", token),
      ],
    )
    .map_err(|e| FetchError::configuration(format!("bad provider url: {e}")))?;
    let envelope: SummaryEnvelope = self.get_json(url).await?;
    envelope.into_performance(symbol)
  }

  /// The provider's tradable-symbol universe. Served locally: the listing
  /// is curated, not an upstream endpoint.
  pub fn symbols(&self) -> Vec<SymbolInfo> {
    SYMBOL_UNIVERSE
      .iter()
      .map(|(symbol, description)| SymbolInfo {
        symbol: symbol.to_string(),
        description: description.to_string(),
        kind: "Common Stock".to_string(),
      })
      .collect()
  }

  /// Gainers and losers, computed from quotes across the movers universe.
  /// Symbols that fail to quote are simply absent from the ranking.
  pub async fn market_movers(&self, token: &str) -> Result<MarketMovers, FetchError> {
    let subjects: Vec<String> = MOVERS_UNIVERSE.iter().map(|s| s.to_string()).collect();
    let quotes = fetch_all(&subjects, |symbol| {
      let token = token.to_string();
      async move { self.quote(&symbol, &token).await }
    })
    .await;

    if quotes.is_empty() {
      return Err(FetchError::provider("no market data available"));
    }
    Ok(MarketMovers::from_quotes(&quotes))
  }

  fn chart_url(&self, symbol: &str, params: &[(&str, &str)]) -> Result<Url, FetchError> {
    Url::parse_with_params(
      &format!(
        "{}/v8/finance/chart/{}{}",
        self.base_url, symbol, self.symbol_suffix
      ),
      params,
    )
    .map_err(|e| FetchError::configuration(format!("bad provider url: {e}")))
  }

  async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, FetchError> {
    let response = self.http.get(url).send().await.map_err(map_transport)?;
    let status = response.status();
    if !status.is_success() {
      return Err(FetchError::provider(format!("request failed ({status})")));
    }
    response
      .json::<T>()
      .await
      .map_err(|e| FetchError::decode(e.to_string()))
  }
}

fn map_transport(error: reqwest::Error) -> FetchError {
  if error.is_timeout() || error.is_connect() {
    FetchError::network(error.to_string())
  } else if error.is_decode() {
    FetchError::decode(error.to_string())
  } else {
    FetchError::network(error.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_symbol_universe_is_nonempty_common_stock() {
    let client = HttpFinanceClient::new(&ProviderSettings::default()).unwrap();
    let symbols = client.symbols();
    assert!(!symbols.is_empty());
    assert!(symbols.iter().all(|s| s.kind == "Common Stock"));
  }

  #[test]
  fn test_chart_url_carries_suffix_and_params() {
    let client = HttpFinanceClient::new(&ProviderSettings::default()).unwrap();
    let url = client.chart_url("RELIANCE", &[("token", "t0")]).unwrap();
    assert!(url.path().ends_with("/v8/finance/chart/RELIANCE.NS"));
    assert!(url.query().unwrap().contains("token=t0"));
  }
}
