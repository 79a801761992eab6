//! Postgres persistence store for the vgen backend.
//!
//! Production-grade store layer with:
//! - Bounded connection pool with idle recycling
//! - Row-locked transactional token dispensing
//! - Transparent retry of transient connection errors
//! - Server-side `updated_at` maintenance on every job mutation
//! - Observability (tracing, metrics)

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub mod error;
pub mod jobs;
pub mod metrics;
pub mod retry;
pub mod settings;
pub mod tokens;
pub mod users;

pub use error::{DbError, DbResult};
pub use jobs::{JobRepo, JobUpdate};
pub use retry::{with_retry, RetryConfig};
pub use settings::SettingsRepo;
pub use tokens::TokenRepo;
pub use users::UserRepo;

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Postgres connection URL.
    pub database_url: String,
    /// Maximum live connections.
    pub max_connections: u32,
    /// Recycle a connection after this long idle.
    pub idle_timeout: Duration,
    /// How long a caller waits for a free connection.
    pub acquire_timeout: Duration,
    /// Hard lifetime bound per connection. Stands in for a per-connection
    /// reuse counter, which the driver does not expose.
    pub max_lifetime: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/vgen".to_string(),
            max_connections: 40,
            idle_timeout: Duration::from_secs(60),
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: Duration::from_secs(30 * 60),
        }
    }
}

impl PoolConfig {
    /// Create config from environment variables.
    pub fn from_env() -> DbResult<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| DbError::invalid_input("DATABASE_URL not set"))?;

        Ok(Self {
            database_url,
            max_connections: std::env::var("DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(40),
            idle_timeout: Duration::from_secs(
                std::env::var("DB_IDLE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            acquire_timeout: Duration::from_secs(
                std::env::var("DB_ACQUIRE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            max_lifetime: Duration::from_secs(
                std::env::var("DB_MAX_LIFETIME_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30 * 60),
            ),
        })
    }
}

/// Create a connection pool from configuration.
pub async fn create_pool(config: &PoolConfig) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .idle_timeout(config.idle_timeout)
        .acquire_timeout(config.acquire_timeout)
        .max_lifetime(config.max_lifetime)
        .connect(&config.database_url)
        .await?;
    Ok(pool)
}

/// Shared store handle: the pool plus the retry policy applied to every
/// repository call that goes through [`Db::retrying`].
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
    retry: RetryConfig,
}

impl Db {
    pub fn new(pool: PgPool, retry: RetryConfig) -> Self {
        Self { pool, retry }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run an operation under the store retry policy, recording outcome
    /// and latency.
    pub async fn retrying<T, F, Fut>(&self, operation: &str, op: F) -> DbResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = DbResult<T>>,
    {
        let start = std::time::Instant::now();
        let result = with_retry(&self.retry, operation, op).await;
        crate::metrics::record_query(
            operation,
            result.is_ok(),
            start.elapsed().as_secs_f64() * 1000.0,
        );
        result
    }
}
