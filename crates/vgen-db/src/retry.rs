//! Retry policy for transient connection failures.
//!
//! Wraps store operations in exponential backoff with jitter. Only errors
//! matching the transient whitelist in [`crate::error`] are retried;
//! everything else propagates immediately.

use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::{DbError, DbResult};
use crate::metrics::record_retry;

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Base delay for exponential backoff (in milliseconds).
    pub base_delay_ms: u64,
    /// Maximum delay cap (in milliseconds).
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_attempts: std::env::var("DB_RETRY_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            base_delay_ms: std::env::var("DB_RETRY_BASE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(250),
            max_delay_ms: std::env::var("DB_RETRY_MAX_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5_000),
        }
    }
}

/// Execute a store operation, retrying transient connection errors.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: &str, op: F) -> DbResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = DbResult<T>>,
{
    let mut last_error: Option<DbError> = None;

    for attempt in 0..config.max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < config.max_attempts => {
                let delay = backoff_delay(config, attempt);
                warn!(
                    operation = %operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Transient database error, retrying: {}",
                    e
                );
                record_retry(operation);
                tokio::time::sleep(delay).await;
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| DbError::invalid_input("retry loop exhausted")))
}

/// Exponential backoff with +/-30% jitter: `base * 2^attempt`, capped.
fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = config.base_delay_ms.saturating_mul(2u64.pow(attempt));
    let capped = exp.min(config.max_delay_ms);
    Duration::from_millis(apply_jitter(capped))
}

fn apply_jitter(delay_ms: u64) -> u64 {
    if delay_ms == 0 {
        return 0;
    }
    let factor: f64 = rand::rng().random_range(0.7..=1.3);
    ((delay_ms as f64) * factor) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_growth_and_cap() {
        let config = RetryConfig::default();
        // attempt 0: 250ms base, attempt 4: 4s; attempt 10 would exceed the cap
        assert!(backoff_delay(&config, 0).as_millis() >= 175);
        assert!(backoff_delay(&config, 0).as_millis() <= 325);
        assert!(backoff_delay(&config, 10).as_millis() <= 6_500);
    }

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..100 {
            let jittered = apply_jitter(1_000);
            assert!((700..=1_300).contains(&jittered));
        }
        assert_eq!(apply_jitter(0), 0);
    }

    #[tokio::test]
    async fn test_non_transient_error_not_retried() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::default();

        let result: DbResult<()> = with_retry(&config, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(DbError::not_found("missing")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_retried_to_success() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::default();

        let result = with_retry(&config, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(DbError::Sqlx(sqlx::Error::PoolTimedOut))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_exhausted() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
        };

        let result: DbResult<()> = with_retry(&config, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(DbError::Sqlx(sqlx::Error::PoolTimedOut)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
