use std::future::Future;
use std::time::Duration;

use crate::config::RetrySettings;
use crate::error::{RagError, Result};

/// Run `op` under a per-attempt timeout, retrying retryable failures with
/// exponential backoff. Non-retryable errors return immediately.
pub async fn with_retry<T, F, Fut>(policy: &RetrySettings, timeout: Duration, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        let err = match tokio::time::timeout(timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => e,
            Err(_) => RagError::Timeout(timeout),
        };
        attempt += 1;
        if !err.is_retryable() || attempt >= policy.max_attempts {
            if attempt > 1 {
                tracing::warn!(what, attempt, error = %err, "giving up after retries");
            }
            return Err(err);
        }
        let backoff = policy.backoff_ms(attempt - 1);
        tracing::debug!(what, attempt, backoff_ms = backoff, error = %err, "retrying");
        tokio::time::sleep(Duration::from_millis(backoff)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetrySettings {
        RetrySettings { max_attempts: 3, initial_backoff_ms: 1, max_backoff_ms: 4 }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let out = with_retry(&fast(), Duration::from_secs(1), "op", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(RagError::Provider("flaky".into()))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(out, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn configuration_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let out: Result<()> = with_retry(&fast(), Duration::from_secs(1), "op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RagError::config("bad"))
        })
        .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_attempts_time_out() {
        let out: Result<()> = with_retry(&fast(), Duration::from_millis(10), "op", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(out, Err(RagError::Timeout(Duration::from_millis(10))));
    }

    #[test]
    fn backoff_is_capped() {
        let p = RetrySettings { max_attempts: 10, initial_backoff_ms: 100, max_backoff_ms: 1_000 };
        assert_eq!(p.backoff_ms(0), 100);
        assert_eq!(p.backoff_ms(2), 400);
        assert_eq!(p.backoff_ms(8), 1_000);
        assert_eq!(p.backoff_ms(80), 1_000);
    }
}
