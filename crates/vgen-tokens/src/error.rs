//! Token pool error types.

use thiserror::Error;

pub type PoolResult<T> = Result<T, PoolError>;

#[derive(Debug, Error)]
pub enum PoolError {
    /// Every active token is in cooldown, or none exist at all. The caller
    /// decides whether to fall back to an environment credential.
    #[error("No API tokens available (all inactive or cooling down)")]
    NoTokensAvailable,

    #[error("Store error: {0}")]
    Db(#[from] vgen_db::DbError),
}
