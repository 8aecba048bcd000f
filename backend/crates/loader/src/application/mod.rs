//! Application Layer - Use Cases
//!
//! This layer orchestrates domain logic and infrastructure.
//! Contains use case implementations.

pub mod admit_device;
pub mod config;
pub mod fingerprint;
pub mod handshake;
pub mod login;
pub mod replay_guard;
pub mod risk_scoring;
pub mod session;
pub mod session_token;
pub mod sweeper;

use crate::error::{LoaderError, LoaderResult};
use std::future::Future;
use std::time::Duration;

/// Run a store or authority call under `limit`
///
/// Expiry surfaces as `TransientUnavailable`, never as success.
pub async fn bounded<T, F>(limit: Duration, operation: &'static str, fut: F) -> LoaderResult<T>
where
    F: Future<Output = LoaderResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation, timeout_ms = limit.as_millis() as u64, "Call timed out");
            Err(LoaderError::TransientUnavailable(format!(
                "{operation} timed out"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_passes_result_through() {
        let ok = bounded(Duration::from_secs(1), "noop", async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_times_out_as_transient() {
        let result: LoaderResult<()> = bounded(Duration::from_millis(10), "slow", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(LoaderError::TransientUnavailable(_))));
    }
}
