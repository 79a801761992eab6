//! Orchestrator configuration.

use std::time::Duration;

/// Orchestrator configuration.
///
/// The worker and concurrency caps are sized together: 20 polling workers
/// and 8 concurrent submissions stay comfortably inside the 40-connection
/// database and upstream HTTP pools.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum concurrent polling workers.
    pub max_concurrent_workers: usize,
    /// Maximum concurrent submissions within a batch chunk.
    pub max_concurrent_submissions: usize,
    /// Base interval between status polls.
    pub poll_interval: Duration,
    /// Delay before the first status poll of a job.
    pub initial_poll_delay: Duration,
    /// Polls before a job is declared timed out.
    pub max_poll_attempts: u32,
    /// Poll attempt at which the token is switched once mid-flight.
    pub token_retry_attempt: u32,
    /// Submission retries per job (total attempts = retries + 1).
    pub job_max_retries: i32,
    /// Delay before a failed submission is re-enqueued.
    pub retry_delay: Duration,
    /// Minimum gap between `updated_at` heartbeat touches.
    pub heartbeat_interval: Duration,
    /// UTC offset (hours) of the timezone whose midnight resets daily
    /// counters.
    pub daily_reset_utc_offset_hours: i32,
    /// Age at which a non-terminal job with a live heartbeat is considered
    /// abandoned by the housekeeper.
    pub stale_job_after: Duration,
    /// Startup recovery: non-terminal rows idle longer than this are
    /// re-queued or failed.
    pub recovery_idle_after: Duration,
    /// Startup recovery: rows older than this are failed instead of
    /// resumed.
    pub recovery_horizon: Duration,
    /// Terminal job retention; `None` disables history purging.
    pub job_retention: Option<Duration>,
    /// Environment-provided credential used when the pool is empty.
    pub fallback_token: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workers: 20,
            max_concurrent_submissions: 8,
            poll_interval: Duration::from_secs(15),
            initial_poll_delay: Duration::from_secs(15),
            max_poll_attempts: 240,
            token_retry_attempt: 8,
            job_max_retries: 2,
            retry_delay: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(60),
            daily_reset_utc_offset_hours: 5,
            stale_job_after: Duration::from_secs(15 * 60),
            recovery_idle_after: Duration::from_secs(2 * 60),
            recovery_horizon: Duration::from_secs(60 * 60),
            job_retention: None,
            fallback_token: None,
        }
    }
}

impl OrchestratorConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_workers: env_parse("MAX_CONCURRENT_WORKERS", 20),
            max_concurrent_submissions: env_parse("MAX_CONCURRENT_SUBMISSIONS", 8),
            poll_interval: Duration::from_secs(env_parse("POLL_INTERVAL_SECS", 15)),
            initial_poll_delay: Duration::from_secs(env_parse("INITIAL_POLL_DELAY_SECS", 15)),
            max_poll_attempts: env_parse("MAX_POLL_ATTEMPTS", 240),
            token_retry_attempt: env_parse("TOKEN_RETRY_ATTEMPT", 8),
            job_max_retries: env_parse("JOB_MAX_RETRIES", 2),
            retry_delay: Duration::from_secs(env_parse("RETRY_DELAY_SECS", 10)),
            heartbeat_interval: Duration::from_secs(env_parse("HEARTBEAT_SECS", 60)),
            daily_reset_utc_offset_hours: env_parse("DAILY_RESET_UTC_OFFSET_HOURS", 5),
            stale_job_after: Duration::from_secs(env_parse("STALE_JOB_AFTER_SECS", 15 * 60)),
            recovery_idle_after: defaults.recovery_idle_after,
            recovery_horizon: defaults.recovery_horizon,
            job_retention: std::env::var("JOB_RETENTION_DAYS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(|days| Duration::from_secs(days * 24 * 60 * 60)),
            fallback_token: std::env::var("UPSTREAM_FALLBACK_TOKEN").ok().filter(|s| !s.is_empty()),
        }
    }

    /// Worst-case polling duration, used in the timeout message.
    pub fn poll_timeout_secs(&self) -> u64 {
        self.poll_interval.as_secs() * u64::from(self.max_poll_attempts)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_concurrency_caps() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_concurrent_workers, 20);
        assert_eq!(config.max_concurrent_submissions, 8);
        assert_eq!(config.max_poll_attempts, 240);
        assert_eq!(config.poll_timeout_secs(), 3600);
    }
}
