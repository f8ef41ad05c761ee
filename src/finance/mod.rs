//! Finance provider boundary: domain types, the HTTP client, and the
//! cached facade widgets talk to.

pub mod api_types;
mod cached_client;
mod client;
pub mod types;

pub use cached_client::CachedFinanceClient;
pub use client::HttpFinanceClient;

use std::future::Future;

use futures::future::join_all;
use tracing::debug;

use crate::error::FetchError;

/// Fetch every subject concurrently, keeping only the successes.
///
/// One illiquid symbol with no data must not sink a whole table, so
/// individual failures are logged and dropped rather than propagated.
/// Result order is not guaranteed to match input order.
pub async fn fetch_all<T, F, Fut>(subjects: &[String], fetch_one: F) -> Vec<T>
where
  F: Fn(String) -> Fut,
  Fut: Future<Output = Result<T, FetchError>>,
{
  let results = join_all(subjects.iter().map(|subject| {
    let future = fetch_one(subject.clone());
    async move { (subject, future.await) }
  }))
  .await;

  results
    .into_iter()
    .filter_map(|(subject, result)| match result {
      Ok(value) => Some(value),
      Err(error) => {
        debug!(%subject, %error, "dropping failed fetch from batch");
        None
      }
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_batch_keeps_successes_and_drops_failures() {
    let subjects = vec!["AAPL".to_string(), "BADSYM".to_string(), "MSFT".to_string()];

    let results = fetch_all(&subjects, |symbol| async move {
      if symbol == "BADSYM" {
        Err(FetchError::provider("no data"))
      } else {
        Ok(symbol)
      }
    })
    .await;

    assert_eq!(results.len(), 2);
    assert!(results.contains(&"AAPL".to_string()));
    assert!(results.contains(&"MSFT".to_string()));
  }

  #[tokio::test]
  async fn test_batch_of_all_failures_is_empty_not_an_error() {
    let subjects = vec!["A".to_string(), "B".to_string()];
    let results: Vec<String> = fetch_all(&subjects, |_| async {
      Err(FetchError::network("down"))
    })
    .await;
    assert!(results.is_empty());
  }
}
