//! Domain types for market data, independent of any provider's wire format.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Live price snapshot for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockQuote {
  pub symbol: String,
  /// Current (or most recent regular-market) price.
  pub current: f64,
  /// High of the day.
  pub high: f64,
  /// Low of the day.
  pub low: f64,
  /// Open of the day.
  pub open: f64,
  /// Previous session's close.
  pub previous_close: f64,
  /// Unix seconds of the observation.
  pub timestamp: i64,
}

/// Price change derived from a quote.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceChange {
  pub amount: f64,
  pub percentage: f64,
  pub is_positive: bool,
}

impl StockQuote {
  pub fn change(&self) -> PriceChange {
    let amount = self.current - self.previous_close;
    let percentage = if self.previous_close != 0.0 {
      (amount / self.previous_close) * 100.0
    } else {
      0.0
    };
    PriceChange {
      amount,
      percentage,
      is_positive: amount >= 0.0,
    }
  }
}

/// One tradable symbol in the provider's universe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInfo {
  pub symbol: String,
  pub description: String,
  pub kind: String,
}

/// Chart aggregation interval, with the lookback window each one implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartInterval {
  Daily,
  Weekly,
  Monthly,
}

impl ChartInterval {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Daily => "daily",
      Self::Weekly => "weekly",
      Self::Monthly => "monthly",
    }
  }

  /// Days of daily candles to request: about a month for daily charts, a
  /// year for weekly, two years for monthly.
  pub fn lookback_days(&self) -> i64 {
    match self {
      Self::Daily => 30,
      Self::Weekly => 365,
      Self::Monthly => 365 * 2,
    }
  }
}

/// One OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
  /// Unix seconds of the bar's start.
  pub timestamp: i64,
  pub open: f64,
  pub high: f64,
  pub low: f64,
  pub close: f64,
  pub volume: u64,
}

impl Candle {
  pub fn date(&self) -> Option<NaiveDate> {
    DateTime::<Utc>::from_timestamp(self.timestamp, 0).map(|dt| dt.date_naive())
  }
}

/// Daily candles regrouped into the requested interval.
///
/// Weekly bars run Monday to Sunday; monthly bars follow calendar months.
/// Open is the first bar's open, close the last bar's close, high/low the
/// extremes, volume the sum.
pub fn aggregate_candles(candles: &[Candle], interval: ChartInterval) -> Vec<Candle> {
  if interval == ChartInterval::Daily {
    return candles.to_vec();
  }

  let mut sorted = candles.to_vec();
  sorted.sort_by_key(|c| c.timestamp);

  let mut buckets: Vec<(NaiveDate, Vec<Candle>)> = Vec::new();
  for candle in sorted {
    let Some(date) = candle.date() else {
      continue;
    };
    let bucket_start = match interval {
      ChartInterval::Weekly => {
        date - ChronoDuration::days(date.weekday().num_days_from_monday() as i64)
      }
      ChartInterval::Monthly => date.with_day(1).unwrap_or(date),
      ChartInterval::Daily => unreachable!("handled above"),
    };
    match buckets.last_mut() {
      Some((start, bars)) if *start == bucket_start => bars.push(candle),
      _ => buckets.push((bucket_start, vec![candle])),
    }
  }

  buckets
    .into_iter()
    .map(|(_, bars)| Candle {
      timestamp: bars[0].timestamp,
      open: bars[0].open,
      close: bars[bars.len() - 1].close,
      high: bars.iter().map(|b| b.high).fold(f64::MIN, f64::max),
      low: bars.iter().map(|b| b.low).fold(f64::MAX, f64::min),
      volume: bars.iter().map(|b| b.volume).sum(),
    })
    .collect()
}

/// One row in a gainers/losers table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoverEntry {
  pub symbol: String,
  pub price: f64,
  pub change_amount: f64,
  pub change_percent: f64,
}

impl From<&StockQuote> for MoverEntry {
  fn from(quote: &StockQuote) -> Self {
    let change = quote.change();
    Self {
      symbol: quote.symbol.clone(),
      price: quote.current,
      change_amount: change.amount,
      change_percent: change.percentage,
    }
  }
}

/// Market movers: the sharpest risers and fallers of the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketMovers {
  pub gainers: Vec<MoverEntry>,
  pub losers: Vec<MoverEntry>,
  pub all: Vec<MoverEntry>,
}

impl MarketMovers {
  const TOP_EACH: usize = 5;
  const ALL_LIMIT: usize = 20;

  /// Rank quotes by absolute percentage move and split into the top five
  /// gainers, top five losers, and the twenty biggest movers overall.
  pub fn from_quotes(quotes: &[StockQuote]) -> Self {
    let mut movers: Vec<MoverEntry> = quotes.iter().map(MoverEntry::from).collect();
    movers.sort_by(|a, b| {
      b.change_percent
        .abs()
        .partial_cmp(&a.change_percent.abs())
        .unwrap_or(std::cmp::Ordering::Equal)
    });

    let gainers = movers
      .iter()
      .filter(|m| m.change_percent > 0.0)
      .take(Self::TOP_EACH)
      .cloned()
      .collect();
    let losers = movers
      .iter()
      .filter(|m| m.change_percent < 0.0)
      .take(Self::TOP_EACH)
      .cloned()
      .collect();
    movers.truncate(Self::ALL_LIMIT);

    Self {
      gainers,
      losers,
      all: movers,
    }
  }
}

/// Valuation and volume fundamentals for one symbol. Providers omit fields
/// freely; absent values stay `None` rather than faking zeros.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
  pub symbol: String,
  pub market_cap: Option<f64>,
  pub pe_ratio: Option<f64>,
  pub peg_ratio: Option<f64>,
  pub book_value: Option<f64>,
  pub fifty_two_week_high: Option<f64>,
  pub fifty_two_week_low: Option<f64>,
  pub volume: Option<u64>,
  pub average_volume: Option<u64>,
  pub dividend_yield: Option<f64>,
  pub earnings_per_share: Option<f64>,
  pub revenue_per_share: Option<f64>,
  pub return_on_equity: Option<f64>,
  pub current_ratio: Option<f64>,
  pub debt_to_equity: Option<f64>,
}
