//! Data layer for a widget-based finance dashboard.
//!
//! Widgets (tables, cards, charts) are configured with a symbol, an api key
//! and a refresh interval; this crate does everything between that
//! configuration and the numbers on screen:
//!
//! - [`cache`] — query-keyed cache with one in-flight fetch per key,
//!   staleness, subscriptions and targeted invalidation
//! - [`finance`] — the provider HTTP client and the cached facade widgets
//!   call
//! - [`refresh`] — reference-counted per-credential auto-refresh timers
//! - [`keys`] — api-key registry with format validation and connectivity
//!   testing
//!
//! Rendering is someone else's job: consumers read data out of
//! [`FetchResponse`]s and cache subscriptions and draw it however they like.
//!
//! ```no_run
//! use std::sync::Arc;
//! use finboard::{
//!   CachedFinanceClient, CacheStore, Config, HttpFinanceClient, InvalidationRouter,
//!   RefreshScheduler, SqliteKeyStore,
//! };
//!
//! # async fn wire() -> color_eyre::Result<()> {
//! let config = Config::load(None)?;
//! let store = CacheStore::with_hard_expiry(config.cache.hard_expiry());
//! let keys = Arc::new(SqliteKeyStore::open()?);
//! let client = CachedFinanceClient::new(
//!   HttpFinanceClient::new(&config.provider)?,
//!   store.clone(),
//!   keys.clone(),
//!   config.stale_times.clone(),
//! );
//! let scheduler = RefreshScheduler::new(InvalidationRouter::new(store));
//!
//! // A quote widget mounts: fetch its data and keep it refreshed.
//! let quote = client.quote("RELIANCE", "key-id").await?;
//! println!("{} {}", quote.data.symbol, quote.data.current);
//! let _refresh = scheduler.register(60, "key-id", None);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod finance;
pub mod keys;
pub mod refresh;

pub use cache::{
  CacheEntry, CacheEvent, CacheStore, FetchCoordinator, FetchResponse, FetchSource,
  InvalidationRouter, KeySelector, ResourceKey, ResourceKind, RetryPolicy, Subscription,
};
pub use config::Config;
pub use error::{ErrorKind, FetchError};
pub use finance::{CachedFinanceClient, HttpFinanceClient};
pub use keys::{
  Credential, CredentialStore, MemoryKeyStore, Provider, SqliteKeyStore, Validity,
};
pub use refresh::{OnTick, RefreshHandle, RefreshScheduler};
