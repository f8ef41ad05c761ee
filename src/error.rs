//! Error types for the data-fetching layer.

use thiserror::Error;

/// Failure classes for remote data fetches.
///
/// The coordinator's retry policy branches on the class: only transport
/// failures are worth retrying, everything else fails the same way twice.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
  /// Transient transport failure (timeout, connection reset).
  #[error("network error: {message}")]
  Network { message: String },

  /// The provider responded but signaled an application-level failure
  /// (invalid credential, unknown symbol, rate limit).
  #[error("provider error: {message}")]
  Provider { message: String },

  /// The provider responded with a payload we could not make sense of.
  #[error("malformed response: {message}")]
  Decode { message: String },

  /// The caller asked for something unfetchable (missing credential,
  /// empty symbol). No network attempt is made for these.
  #[error("configuration error: {message}")]
  Configuration { message: String },
}

impl FetchError {
  pub fn network(message: impl Into<String>) -> Self {
    Self::Network {
      message: message.into(),
    }
  }

  pub fn provider(message: impl Into<String>) -> Self {
    Self::Provider {
      message: message.into(),
    }
  }

  pub fn decode(message: impl Into<String>) -> Self {
    Self::Decode {
      message: message.into(),
    }
  }

  pub fn configuration(message: impl Into<String>) -> Self {
    Self::Configuration {
      message: message.into(),
    }
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Network { .. } => ErrorKind::Network,
      Self::Provider { .. } => ErrorKind::Provider,
      Self::Decode { .. } => ErrorKind::Decode,
      Self::Configuration { .. } => ErrorKind::Configuration,
    }
  }

  pub fn message(&self) -> &str {
    match self {
      Self::Network { message }
      | Self::Provider { message }
      | Self::Decode { message }
      | Self::Configuration { message } => message,
    }
  }

  /// Whether another attempt could plausibly succeed.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Self::Network { .. })
  }
}

/// Discriminant-only view of [`FetchError`], small enough to store inside
/// cache entries so a de-duplicated waiter can reconstruct a typed error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  Network,
  Provider,
  Decode,
  Configuration,
}

/// Last failure recorded on a cache entry. Cleared on the next success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryError {
  pub kind: ErrorKind,
  pub message: String,
}

impl From<&FetchError> for EntryError {
  fn from(err: &FetchError) -> Self {
    Self {
      kind: err.kind(),
      message: err.message().to_string(),
    }
  }
}

impl From<&EntryError> for FetchError {
  fn from(err: &EntryError) -> Self {
    let message = err.message.clone();
    match err.kind {
      ErrorKind::Network => FetchError::Network { message },
      ErrorKind::Provider => FetchError::Provider { message },
      ErrorKind::Decode => FetchError::Decode { message },
      ErrorKind::Configuration => FetchError::Configuration { message },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_only_network_errors_retry() {
    assert!(FetchError::network("timed out").is_retryable());
    assert!(!FetchError::provider("invalid api key").is_retryable());
    assert!(!FetchError::decode("missing field c").is_retryable());
    assert!(!FetchError::configuration("no credential").is_retryable());
  }

  #[test]
  fn test_entry_error_round_trip() {
    let err = FetchError::provider("rate limited");
    let stored = EntryError::from(&err);
    let back = FetchError::from(&stored);
    assert_eq!(back.kind(), ErrorKind::Provider);
    assert_eq!(back.message(), "rate limited");
  }
}
