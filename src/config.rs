use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::RetryPolicy;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub provider: ProviderSettings,
  pub stale_times: StaleTimes,
  pub cache: CacheSettings,
  pub retry: RetrySettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
  pub base_url: String,
  /// Exchange suffix appended to every symbol (e.g. ".NS").
  pub symbol_suffix: String,
  pub request_timeout_secs: u64,
}

impl Default for ProviderSettings {
  fn default() -> Self {
    Self {
      base_url: "https://query1.finance.yahoo.com".to_string(),
      symbol_suffix: ".NS".to_string(),
      request_timeout_secs: 10,
    }
  }
}

/// How long each kind of data stays fresh. Quotes move constantly and go
/// stale in seconds; the symbol universe barely changes and is cached for
/// half an hour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StaleTimes {
  pub quote_secs: u64,
  pub history_secs: u64,
  pub symbols_secs: u64,
  pub market_movers_secs: u64,
  pub performance_secs: u64,
}

impl Default for StaleTimes {
  fn default() -> Self {
    Self {
      quote_secs: 30,
      history_secs: 30,
      symbols_secs: 30 * 60,
      market_movers_secs: 60,
      performance_secs: 10 * 60,
    }
  }
}

impl StaleTimes {
  pub fn quote(&self) -> Duration {
    Duration::from_secs(self.quote_secs)
  }

  pub fn history(&self) -> Duration {
    Duration::from_secs(self.history_secs)
  }

  pub fn symbols(&self) -> Duration {
    Duration::from_secs(self.symbols_secs)
  }

  pub fn market_movers(&self) -> Duration {
    Duration::from_secs(self.market_movers_secs)
  }

  pub fn performance(&self) -> Duration {
    Duration::from_secs(self.performance_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
  /// Entries unused for this long are dropped entirely.
  pub hard_expiry_secs: u64,
}

impl Default for CacheSettings {
  fn default() -> Self {
    Self {
      hard_expiry_secs: 30 * 60,
    }
  }
}

impl CacheSettings {
  pub fn hard_expiry(&self) -> Duration {
    Duration::from_secs(self.hard_expiry_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
  pub max_retries: u32,
  pub base_delay_ms: u64,
  pub max_delay_ms: u64,
}

impl Default for RetrySettings {
  fn default() -> Self {
    Self {
      max_retries: 2,
      base_delay_ms: 1_000,
      max_delay_ms: 10_000,
    }
  }
}

impl RetrySettings {
  pub fn policy(&self) -> RetryPolicy {
    RetryPolicy {
      max_retries: self.max_retries,
      base_delay: Duration::from_millis(self.base_delay_ms),
      max_delay: Duration::from_millis(self.max_delay_ms),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./finboard.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/finboard/config.yaml
  ///
  /// Every field has a default, so a missing file just means defaults.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("finboard.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("finboard").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_match_the_dashboard_constants() {
    let config = Config::default();
    assert_eq!(config.stale_times.quote(), Duration::from_secs(30));
    assert_eq!(config.stale_times.symbols(), Duration::from_secs(1800));
    assert_eq!(config.cache.hard_expiry(), Duration::from_secs(1800));
    assert_eq!(config.retry.max_retries, 2);
  }

  #[test]
  fn test_partial_yaml_keeps_defaults_for_the_rest() {
    let config: Config =
      serde_yaml::from_str("stale_times:\n  quote_secs: 5\nprovider:\n  symbol_suffix: \"\"\n")
        .unwrap();

    assert_eq!(config.stale_times.quote(), Duration::from_secs(5));
    assert_eq!(config.stale_times.market_movers(), Duration::from_secs(60));
    assert_eq!(config.provider.symbol_suffix, "");
    assert_eq!(config.provider.request_timeout_secs, 10);
  }

  #[test]
  fn test_retry_settings_map_onto_a_policy() {
    let policy = RetrySettings::default().policy();
    assert_eq!(policy.max_retries, 2);
    assert_eq!(policy.base_delay, Duration::from_millis(1_000));
    assert_eq!(policy.max_delay, Duration::from_millis(10_000));
  }
}
