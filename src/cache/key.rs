//! Cache identity for fetchable resources.
//!
//! Every remote resource is identified by the combination of what it is,
//! which subject it concerns, and which credential pays for it. Keys are
//! structured values rather than concatenated strings, so identity can never
//! collide on separator characters and invalidation can match on individual
//! components.

use std::fmt;

use crate::finance::types::ChartInterval;

/// The kinds of resources the dashboard fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
  /// Live price quote for one symbol.
  Quote,
  /// Historical OHLCV candles for one symbol.
  History,
  /// The provider's symbol universe (market-wide, no subject).
  Symbols,
  /// Top gainers/losers across the market (no subject).
  MarketMovers,
  /// Valuation and volume fundamentals for one symbol.
  Performance,
}

impl ResourceKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Quote => "quote",
      Self::History => "history",
      Self::Symbols => "symbols",
      Self::MarketMovers => "market-movers",
      Self::Performance => "performance",
    }
  }
}

/// Composite cache key: `(kind, credential, subject, params)`.
///
/// Two keys compare equal exactly when all four components match, so two
/// widgets configured identically share one cached resource and any
/// difference (another symbol, another api key, another interval) yields a
/// distinct one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
  pub kind: ResourceKind,
  pub credential_id: String,
  /// Symbol for per-symbol kinds, empty for market-wide data.
  pub subject: String,
  /// Discriminating parameter, e.g. the history interval.
  pub params: Option<String>,
}

impl ResourceKey {
  pub fn new(
    kind: ResourceKind,
    subject: &str,
    credential_id: &str,
    params: Option<String>,
  ) -> Self {
    Self {
      kind,
      credential_id: credential_id.to_string(),
      subject: normalize_symbol(subject),
      params,
    }
  }

  pub fn quote(symbol: &str, credential_id: &str) -> Self {
    Self::new(ResourceKind::Quote, symbol, credential_id, None)
  }

  pub fn history(symbol: &str, credential_id: &str, interval: ChartInterval) -> Self {
    Self::new(
      ResourceKind::History,
      symbol,
      credential_id,
      Some(interval.as_str().to_string()),
    )
  }

  pub fn symbols(credential_id: &str) -> Self {
    Self::new(ResourceKind::Symbols, "", credential_id, None)
  }

  pub fn market_movers(credential_id: &str) -> Self {
    Self::new(ResourceKind::MarketMovers, "", credential_id, None)
  }

  pub fn performance(symbol: &str, credential_id: &str) -> Self {
    Self::new(ResourceKind::Performance, symbol, credential_id, None)
  }
}

/// Symbols arrive from user input in mixed case and with stray whitespace;
/// the cached resource is the same either way.
fn normalize_symbol(symbol: &str) -> String {
  symbol.trim().to_uppercase()
}

impl fmt::Display for ResourceKey {
  /// Readable rendering for logs. Component separators are escaped out of
  /// the parts so the rendered form stays unambiguous too.
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{}:{}:{}",
      self.kind.as_str(),
      escape(&self.credential_id),
      escape(&self.subject)
    )?;
    if let Some(params) = &self.params {
      write!(f, ":{}", escape(params))?;
    }
    Ok(())
  }
}

fn escape(component: &str) -> String {
  component.replace('%', "%25").replace(':', "%3A")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_identical_inputs_build_identical_keys() {
    let a = ResourceKey::quote("AAPL", "k1");
    let b = ResourceKey::quote("AAPL", "k1");
    assert_eq!(a, b);
    assert_eq!(a.to_string(), b.to_string());
  }

  #[test]
  fn test_any_differing_component_builds_a_distinct_key() {
    let base = ResourceKey::quote("AAPL", "k1");
    let keys = [
      ResourceKey::quote("MSFT", "k1"),
      ResourceKey::quote("AAPL", "k2"),
      ResourceKey::performance("AAPL", "k1"),
      ResourceKey::history("AAPL", "k1", ChartInterval::Daily),
    ];
    for other in &keys {
      assert_ne!(&base, other);
      assert_ne!(base.to_string(), other.to_string());
    }
  }

  #[test]
  fn test_interval_discriminates_history_keys() {
    let daily = ResourceKey::history("AAPL", "k1", ChartInterval::Daily);
    let weekly = ResourceKey::history("AAPL", "k1", ChartInterval::Weekly);
    assert_ne!(daily, weekly);
  }

  #[test]
  fn test_symbol_case_and_whitespace_do_not_split_the_cache() {
    assert_eq!(
      ResourceKey::quote(" aapl ", "k1"),
      ResourceKey::quote("AAPL", "k1")
    );
  }

  #[test]
  fn test_separators_inside_components_stay_unambiguous() {
    let tricky = ResourceKey::new(ResourceKind::Quote, "A:B", "k:1", None);
    let other = ResourceKey::new(ResourceKind::Quote, "B", "k:1:A", None);
    assert_ne!(tricky, other);
    assert_ne!(tricky.to_string(), other.to_string());
  }
}
