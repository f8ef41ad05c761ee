//! Wire types for the provider's chart and quote-summary endpoints, and
//! their conversions into domain types.
//!
//! The provider is generous with omissions: whole indicator arrays can be
//! missing, individual rows can be null, and meta fields appear and
//! disappear between market sessions. Conversions therefore apply the same
//! fallbacks throughout — price falls back to previous close, high/low to
//! zero, null candle rows are skipped.

use chrono::Utc;
use serde::Deserialize;

use super::types::{Candle, PerformanceSummary, StockQuote};
use crate::error::FetchError;

/// Envelope of `/v8/finance/chart/{symbol}`.
#[derive(Debug, Deserialize)]
pub struct ChartEnvelope {
  pub chart: ChartPayload,
}

#[derive(Debug, Deserialize)]
pub struct ChartPayload {
  #[serde(default)]
  pub result: Option<Vec<ChartResult>>,
  #[serde(default)]
  pub error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
pub struct ApiError {
  #[serde(default)]
  pub code: Option<String>,
  #[serde(default)]
  pub description: Option<String>,
}

impl ApiError {
  pub fn message(&self) -> String {
    match (&self.code, &self.description) {
      (Some(code), Some(description)) => format!("{code}: {description}"),
      (_, Some(description)) => description.clone(),
      (Some(code), None) => code.clone(),
      (None, None) => "provider signaled an unspecified error".to_string(),
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ChartResult {
  pub meta: ChartMeta,
  #[serde(default)]
  pub timestamp: Option<Vec<i64>>,
  #[serde(default)]
  pub indicators: Option<Indicators>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMeta {
  #[serde(default)]
  pub regular_market_price: Option<f64>,
  #[serde(default)]
  pub previous_close: Option<f64>,
  #[serde(default)]
  pub regular_market_day_high: Option<f64>,
  #[serde(default)]
  pub regular_market_day_low: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct Indicators {
  #[serde(default)]
  pub quote: Vec<QuoteArrays>,
}

/// Parallel OHLCV arrays; a null row means the session had no trade data.
#[derive(Debug, Default, Deserialize)]
pub struct QuoteArrays {
  #[serde(default)]
  pub open: Vec<Option<f64>>,
  #[serde(default)]
  pub high: Vec<Option<f64>>,
  #[serde(default)]
  pub low: Vec<Option<f64>>,
  #[serde(default)]
  pub close: Vec<Option<f64>>,
  #[serde(default)]
  pub volume: Vec<Option<u64>>,
}

impl ChartEnvelope {
  /// Unwrap the envelope into its single result, surfacing the provider's
  /// own error field when present.
  pub fn into_result(self) -> Result<ChartResult, FetchError> {
    if let Some(error) = self.chart.error {
      return Err(FetchError::provider(error.message()));
    }
    self
      .chart
      .result
      .and_then(|mut results| {
        if results.is_empty() {
          None
        } else {
          Some(results.remove(0))
        }
      })
      .ok_or_else(|| FetchError::decode("chart response carried no result"))
  }
}

impl ChartResult {
  pub fn into_quote(self, symbol: &str) -> Result<StockQuote, FetchError> {
    let meta = &self.meta;
    let previous_close = meta
      .previous_close
      .ok_or_else(|| FetchError::decode("quote response missing previousClose"))?;
    let current = meta.regular_market_price.unwrap_or(previous_close);
    let open = self
      .indicators
      .as_ref()
      .and_then(|ind| ind.quote.first())
      .and_then(|arrays| arrays.open.iter().rev().flatten().next().copied())
      .unwrap_or(previous_close);

    Ok(StockQuote {
      symbol: symbol.to_string(),
      current,
      high: meta.regular_market_day_high.unwrap_or(0.0),
      low: meta.regular_market_day_low.unwrap_or(0.0),
      open,
      previous_close,
      timestamp: Utc::now().timestamp(),
    })
  }

  pub fn into_candles(self) -> Result<Vec<Candle>, FetchError> {
    let timestamps = self
      .timestamp
      .ok_or_else(|| FetchError::provider("no historical data available for this symbol"))?;
    let arrays = self
      .indicators
      .and_then(|ind| ind.quote.into_iter().next())
      .ok_or_else(|| FetchError::decode("history response missing price arrays"))?;

    let mut candles = Vec::with_capacity(timestamps.len());
    for (i, timestamp) in timestamps.iter().enumerate() {
      let Some(close) = arrays.close.get(i).copied().flatten() else {
        continue;
      };
      candles.push(Candle {
        timestamp: *timestamp,
        open: arrays.open.get(i).copied().flatten().unwrap_or(close),
        high: arrays.high.get(i).copied().flatten().unwrap_or(close),
        low: arrays.low.get(i).copied().flatten().unwrap_or(close),
        close,
        volume: arrays.volume.get(i).copied().flatten().unwrap_or(0),
      });
    }

    if candles.is_empty() {
      return Err(FetchError::provider(
        "no historical data available for this symbol",
      ));
    }
    candles.sort_by_key(|c| c.timestamp);
    Ok(candles)
  }
}

/// Envelope of `/v10/finance/quoteSummary/{symbol}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryEnvelope {
  pub quote_summary: SummaryPayload,
}

#[derive(Debug, Deserialize)]
pub struct SummaryPayload {
  #[serde(default)]
  pub result: Option<Vec<SummaryResult>>,
  #[serde(default)]
  pub error: Option<ApiError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryResult {
  #[serde(default)]
  pub summary_detail: SummaryDetail,
  #[serde(default)]
  pub default_key_statistics: KeyStatistics,
  #[serde(default)]
  pub financial_data: FinancialData,
}

/// Numeric field wrapper: `{ "raw": 1.23, "fmt": "1.23" }`.
#[derive(Debug, Default, Deserialize)]
pub struct RawValue {
  #[serde(default)]
  pub raw: Option<f64>,
}

impl RawValue {
  fn value(&self) -> Option<f64> {
    self.raw
  }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryDetail {
  #[serde(default, rename = "trailingPE")]
  pub trailing_pe: RawValue,
  #[serde(default)]
  pub fifty_two_week_high: RawValue,
  #[serde(default)]
  pub fifty_two_week_low: RawValue,
  #[serde(default)]
  pub volume: RawValue,
  #[serde(default)]
  pub average_volume: RawValue,
  #[serde(default)]
  pub dividend_yield: RawValue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyStatistics {
  #[serde(default)]
  pub market_cap: RawValue,
  #[serde(default)]
  pub peg_ratio: RawValue,
  #[serde(default)]
  pub book_value: RawValue,
  #[serde(default)]
  pub trailing_eps: RawValue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialData {
  #[serde(default)]
  pub revenue_per_share: RawValue,
  #[serde(default)]
  pub return_on_equity: RawValue,
  #[serde(default)]
  pub current_ratio: RawValue,
  #[serde(default)]
  pub debt_to_equity: RawValue,
}

impl SummaryEnvelope {
  pub fn into_performance(self, symbol: &str) -> Result<PerformanceSummary, FetchError> {
    if let Some(error) = self.quote_summary.error {
      return Err(FetchError::provider(error.message()));
    }
    // A symbol without fundamentals still renders a card; every field is
    // optional.
    let result = self
      .quote_summary
      .result
      .and_then(|mut results| {
        if results.is_empty() {
          None
        } else {
          Some(results.remove(0))
        }
      })
      .unwrap_or_default();

    let detail = &result.summary_detail;
    let stats = &result.default_key_statistics;
    let financial = &result.financial_data;
    Ok(PerformanceSummary {
      symbol: symbol.to_string(),
      market_cap: stats.market_cap.value(),
      pe_ratio: detail.trailing_pe.value(),
      peg_ratio: stats.peg_ratio.value(),
      book_value: stats.book_value.value(),
      fifty_two_week_high: detail.fifty_two_week_high.value(),
      fifty_two_week_low: detail.fifty_two_week_low.value(),
      volume: detail.volume.value().map(|v| v as u64),
      average_volume: detail.average_volume.value().map(|v| v as u64),
      dividend_yield: detail.dividend_yield.value(),
      earnings_per_share: stats.trailing_eps.value(),
      revenue_per_share: financial.revenue_per_share.value(),
      return_on_equity: financial.return_on_equity.value(),
      current_ratio: financial.current_ratio.value(),
      debt_to_equity: financial.debt_to_equity.value(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn chart_json(with_error: bool) -> serde_json::Value {
    if with_error {
      return serde_json::json!({
        "chart": {
          "result": null,
          "error": { "code": "Not Found", "description": "No data found, symbol may be delisted" }
        }
      });
    }
    serde_json::json!({
      "chart": {
        "result": [{
          "meta": {
            "regularMarketPrice": 182.5,
            "previousClose": 180.0,
            "regularMarketDayHigh": 183.1,
            "regularMarketDayLow": 179.2
          },
          "timestamp": [1700000000, 1700086400, 1700172800],
          "indicators": {
            "quote": [{
              "open":   [180.1, null, 181.0],
              "high":   [181.0, null, 183.1],
              "low":    [179.2, null, 180.4],
              "close":  [180.6, null, 182.5],
              "volume": [1000, null, 2000]
            }]
          }
        }],
        "error": null
      }
    })
  }

  #[test]
  fn test_quote_parses_with_meta_fallbacks() {
    let envelope: ChartEnvelope = serde_json::from_value(chart_json(false)).unwrap();
    let quote = envelope.into_result().unwrap().into_quote("AAPL").unwrap();

    assert_eq!(quote.symbol, "AAPL");
    assert_eq!(quote.current, 182.5);
    assert_eq!(quote.previous_close, 180.0);
    // Open comes from the last non-null open row.
    assert_eq!(quote.open, 181.0);
  }

  #[test]
  fn test_provider_error_field_becomes_provider_error() {
    let envelope: ChartEnvelope = serde_json::from_value(chart_json(true)).unwrap();
    let err = envelope.into_result().unwrap_err();
    assert!(matches!(err, FetchError::Provider { .. }));
    assert!(err.message().contains("delisted"));
  }

  #[test]
  fn test_candles_skip_null_rows_and_sort() {
    let envelope: ChartEnvelope = serde_json::from_value(chart_json(false)).unwrap();
    let candles = envelope.into_result().unwrap().into_candles().unwrap();

    assert_eq!(candles.len(), 2);
    assert_eq!(candles[0].close, 180.6);
    assert_eq!(candles[1].close, 182.5);
    assert_eq!(candles[1].volume, 2000);
  }

  #[test]
  fn test_history_without_timestamps_is_a_provider_error() {
    let envelope: ChartEnvelope = serde_json::from_value(serde_json::json!({
      "chart": { "result": [{ "meta": { "previousClose": 1.0 } }], "error": null }
    }))
    .unwrap();
    let err = envelope.into_result().unwrap().into_candles().unwrap_err();
    assert!(matches!(err, FetchError::Provider { .. }));
  }

  #[test]
  fn test_performance_tolerates_missing_modules() {
    let envelope: SummaryEnvelope = serde_json::from_value(serde_json::json!({
      "quoteSummary": {
        "result": [{
          "summaryDetail": { "trailingPE": { "raw": 24.5, "fmt": "24.50" } }
        }],
        "error": null
      }
    }))
    .unwrap();
    let perf = envelope.into_performance("AAPL").unwrap();

    assert_eq!(perf.pe_ratio, Some(24.5));
    assert_eq!(perf.market_cap, None);
    assert_eq!(perf.debt_to_equity, None);
  }
}
