//! Retry policy for media transfers.

use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::{MediaError, MediaResult};

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
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
        }
    }
}

/// Execute a transfer stage with retry on network-level failures.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, stage: &str, op: F) -> MediaResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = MediaResult<T>>,
{
    let mut last_error: Option<MediaError> = None;

    for attempt in 0..config.max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < config.max_attempts => {
                let delay = backoff_delay(config, attempt);
                warn!(
                    stage = %stage,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Media transfer failed, retrying: {}",
                    e
                );
                tokio::time::sleep(delay).await;
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| MediaError::upload_failed("retry loop exhausted")))
}

/// Exponential backoff with +/-30% jitter.
fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = config.base_delay_ms.saturating_mul(2u64.pow(attempt));
    let capped = exp.min(config.max_delay_ms);
    let factor: f64 = rand::rng().random_range(0.7..=1.3);
    Duration::from_millis(((capped as f64) * factor) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_bounds() {
        let config = RetryConfig::default();
        let first = backoff_delay(&config, 0).as_millis();
        assert!((700..=1_300).contains(&first));
        // Far past the cap, jitter keeps it within +/-30% of 10s.
        let late = backoff_delay(&config, 8).as_millis();
        assert!((7_000..=13_000).contains(&late));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_error_retried() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::default();

        let result = with_retry(&config, "fetch", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(MediaError::fetch_failed("ECONNRESET"))
                } else {
                    Ok("bytes")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "bytes");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_error_propagates() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::default();

        let result: MediaResult<()> = with_retry(&config, "upload", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(MediaError::invalid_response("missing secure_url")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
