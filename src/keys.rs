//! Api-key registry: storage, format validation, connectivity testing.
//!
//! Widgets reference credentials by id; deleting a credential orphans those
//! widgets, and the cached client turns the dangling reference into a
//! configuration error instead of a crash. Secrets never appear in logs —
//! use [`Credential::fingerprint`] when a key has to be named.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::FetchError;
use crate::finance::HttpFinanceClient;

/// Supported market-data providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
  NseIndia,
  Finnhub,
  AlphaVantage,
  TwelveData,
}

impl Provider {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::NseIndia => "nseindia",
      Self::Finnhub => "finnhub",
      Self::AlphaVantage => "alphavantage",
      Self::TwelveData => "twelvedata",
    }
  }
}

impl FromStr for Provider {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "nseindia" => Ok(Self::NseIndia),
      "finnhub" => Ok(Self::Finnhub),
      "alphavantage" => Ok(Self::AlphaVantage),
      "twelvedata" => Ok(Self::TwelveData),
      other => Err(eyre!("Unknown provider: {}", other)),
    }
  }
}

/// Whether a key has passed its connectivity test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
  Untested,
  Valid,
  Invalid,
}

impl Validity {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Untested => "untested",
      Self::Valid => "valid",
      Self::Invalid => "invalid",
    }
  }
}

impl FromStr for Validity {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "untested" => Ok(Self::Untested),
      "valid" => Ok(Self::Valid),
      "invalid" => Ok(Self::Invalid),
      other => Err(eyre!("Unknown validity: {}", other)),
    }
  }
}

/// One stored api key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
  pub id: String,
  pub name: String,
  pub secret: String,
  pub provider: Provider,
  pub validity: Validity,
  pub created_at: DateTime<Utc>,
  pub last_used: Option<DateTime<Utc>>,
  pub last_tested: Option<DateTime<Utc>>,
}

impl Credential {
  /// Loggable identity of the secret: a short hash, never the secret.
  pub fn fingerprint(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.secret.as_bytes());
    hex::encode(hasher.finalize())[..8].to_string()
  }
}

/// Check a key against the provider's known format before storing it.
pub fn validate_key_format(provider: Provider, secret: &str) -> std::result::Result<(), String> {
  let trimmed = secret.trim();
  if trimmed.is_empty() {
    return Err("api key cannot be empty".to_string());
  }

  let alphanumeric = trimmed.chars().all(|c| c.is_ascii_alphanumeric());
  let (range, label) = match provider {
    // NSE data goes through a proxy that accepts any opaque token.
    Provider::NseIndia => return Ok(()),
    Provider::AlphaVantage => (10..=20, "Alpha Vantage keys are 10-20 alphanumeric characters"),
    Provider::TwelveData => (20..=40, "Twelve Data keys are 20-40 alphanumeric characters"),
    Provider::Finnhub => (15..=25, "Finnhub keys are 15-25 alphanumeric characters"),
  };
  if !alphanumeric || !range.contains(&trimmed.len()) {
    return Err(label.to_string());
  }
  Ok(())
}

/// Storage backend for credentials.
pub trait CredentialStore: Send + Sync {
  fn list(&self) -> Result<Vec<Credential>>;
  fn get(&self, id: &str) -> Result<Option<Credential>>;
  /// Validates the key format, then stores a new untested credential.
  fn insert(&self, name: &str, secret: &str, provider: Provider) -> Result<Credential>;
  /// Returns whether anything was deleted.
  fn delete(&self, id: &str) -> Result<bool>;
  fn record_usage(&self, id: &str) -> Result<()>;
  fn record_test(&self, id: &str, validity: Validity) -> Result<()>;
}

fn new_credential(name: &str, secret: &str, provider: Provider) -> Result<Credential> {
  validate_key_format(provider, secret).map_err(|message| eyre!(message))?;

  let created_at = Utc::now();
  let mut hasher = Sha256::new();
  hasher.update(name.as_bytes());
  hasher.update(secret.as_bytes());
  hasher.update(created_at.timestamp_micros().to_le_bytes());
  let id = hex::encode(hasher.finalize())[..12].to_string();

  Ok(Credential {
    id,
    name: name.to_string(),
    secret: secret.trim().to_string(),
    provider,
    validity: Validity::Untested,
    created_at,
    last_used: None,
    last_tested: None,
  })
}

/// Schema for the key registry.
const KEYS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS api_keys (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    secret TEXT NOT NULL,
    provider TEXT NOT NULL,
    validity TEXT NOT NULL DEFAULT 'untested',
    created_at TEXT NOT NULL,
    last_used TEXT,
    last_tested TEXT
);
"#;

/// SQLite-backed credential store.
pub struct SqliteKeyStore {
  conn: Mutex<Connection>,
}

impl SqliteKeyStore {
  /// Open or create the registry at the default location.
  pub fn open() -> Result<Self> {
    let path = Self::default_path()?;

    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create data directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open key registry at {}: {}", path.display(), e))?;
    Self::from_connection(conn)
  }

  /// In-memory registry, used by tests.
  pub fn in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory registry: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(KEYS_SCHEMA)
      .map_err(|e| eyre!("Failed to run key registry migrations: {}", e))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("finboard").join("keys.db"))
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Raw columns of one api_keys row, in SELECT_COLUMNS order.
type KeyRow = (
  String,
  String,
  String,
  String,
  String,
  String,
  Option<String>,
  Option<String>,
);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<KeyRow> {
  Ok((
    row.get(0)?,
    row.get(1)?,
    row.get(2)?,
    row.get(3)?,
    row.get(4)?,
    row.get(5)?,
    row.get(6)?,
    row.get(7)?,
  ))
}

fn credential_from_row(row: KeyRow) -> Result<Credential> {
  let (id, name, secret, provider, validity, created_at, last_used, last_tested) = row;
  Ok(Credential {
    id,
    name,
    secret,
    provider: provider.parse()?,
    validity: validity.parse()?,
    created_at: parse_timestamp(&created_at)?,
    last_used: last_used.as_deref().map(parse_timestamp).transpose()?,
    last_tested: last_tested.as_deref().map(parse_timestamp).transpose()?,
  })
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse timestamp '{}': {}", s, e))
}

const SELECT_COLUMNS: &str =
  "id, name, secret, provider, validity, created_at, last_used, last_tested";

impl CredentialStore for SqliteKeyStore {
  fn list(&self) -> Result<Vec<Credential>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM api_keys ORDER BY created_at"
      ))
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<KeyRow> = stmt
      .query_map([], read_row)
      .map_err(|e| eyre!("Failed to query keys: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read key row: {}", e))?;

    rows.into_iter().map(credential_from_row).collect()
  }

  fn get(&self, id: &str) -> Result<Option<Credential>> {
    Ok(self.list()?.into_iter().find(|c| c.id == id))
  }

  fn insert(&self, name: &str, secret: &str, provider: Provider) -> Result<Credential> {
    let credential = new_credential(name, secret, provider)?;
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT INTO api_keys (id, name, secret, provider, validity, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
          credential.id,
          credential.name,
          credential.secret,
          credential.provider.as_str(),
          credential.validity.as_str(),
          credential.created_at.to_rfc3339(),
        ],
      )
      .map_err(|e| eyre!("Failed to store api key: {}", e))?;
    info!(id = %credential.id, fingerprint = %credential.fingerprint(), "api key stored");
    Ok(credential)
  }

  fn delete(&self, id: &str) -> Result<bool> {
    let conn = self.lock()?;
    let deleted = conn
      .execute("DELETE FROM api_keys WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete api key: {}", e))?;
    Ok(deleted > 0)
  }

  fn record_usage(&self, id: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "UPDATE api_keys SET last_used = ? WHERE id = ?",
        params![Utc::now().to_rfc3339(), id],
      )
      .map_err(|e| eyre!("Failed to record key usage: {}", e))?;
    Ok(())
  }

  fn record_test(&self, id: &str, validity: Validity) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "UPDATE api_keys SET validity = ?, last_tested = ? WHERE id = ?",
        params![validity.as_str(), Utc::now().to_rfc3339(), id],
      )
      .map_err(|e| eyre!("Failed to record key test: {}", e))?;
    Ok(())
  }
}

/// In-memory credential store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryKeyStore {
  keys: Mutex<HashMap<String, Credential>>,
}

impl MemoryKeyStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Credential>>> {
    self.keys.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CredentialStore for MemoryKeyStore {
  fn list(&self) -> Result<Vec<Credential>> {
    let mut all: Vec<Credential> = self.lock()?.values().cloned().collect();
    all.sort_by_key(|c| c.created_at);
    Ok(all)
  }

  fn get(&self, id: &str) -> Result<Option<Credential>> {
    Ok(self.lock()?.get(id).cloned())
  }

  fn insert(&self, name: &str, secret: &str, provider: Provider) -> Result<Credential> {
    let credential = new_credential(name, secret, provider)?;
    self
      .lock()?
      .insert(credential.id.clone(), credential.clone());
    Ok(credential)
  }

  fn delete(&self, id: &str) -> Result<bool> {
    Ok(self.lock()?.remove(id).is_some())
  }

  fn record_usage(&self, id: &str) -> Result<()> {
    if let Some(credential) = self.lock()?.get_mut(id) {
      credential.last_used = Some(Utc::now());
    }
    Ok(())
  }

  fn record_test(&self, id: &str, validity: Validity) -> Result<()> {
    if let Some(credential) = self.lock()?.get_mut(id) {
      credential.validity = validity;
      credential.last_tested = Some(Utc::now());
    }
    Ok(())
  }
}

/// Symbol used to probe whether a key actually works.
const PROBE_SYMBOL: &str = "RELIANCE";

/// Run a connectivity test for a stored key and record the verdict.
///
/// A provider rejection marks the key invalid; a clean quote marks it
/// valid. A transport failure proves nothing about the key, so the stored
/// validity is left untouched and the error is returned.
pub async fn test_credential(
  client: &HttpFinanceClient,
  store: &dyn CredentialStore,
  id: &str,
) -> std::result::Result<Validity, FetchError> {
  let credential = store
    .get(id)
    .map_err(|e| FetchError::configuration(format!("credential store unavailable: {e}")))?
    .ok_or_else(|| FetchError::configuration(format!("api key {id} no longer exists")))?;

  match client.quote(PROBE_SYMBOL, &credential.secret).await {
    Ok(_) => {
      let _ = store.record_test(id, Validity::Valid);
      Ok(Validity::Valid)
    }
    Err(FetchError::Provider { .. }) | Err(FetchError::Decode { .. }) => {
      let _ = store.record_test(id, Validity::Invalid);
      Ok(Validity::Invalid)
    }
    Err(error) => Err(error),
  }
}
