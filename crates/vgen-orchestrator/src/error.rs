//! Orchestrator error types.

use thiserror::Error;

use vgen_tokens::PoolError;

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Input violates the request schema. Never retried.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Plan, quota, tool, or expiry denial with a user-facing reason.
    #[error("Not allowed: {0}")]
    Authorization(String),

    #[error("No API tokens available")]
    NoTokensAvailable,

    #[error("Store error: {0}")]
    Db(#[from] vgen_db::DbError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] vgen_upstream::UpstreamError),

    #[error("Media upload error: {0}")]
    Media(#[from] vgen_media::MediaError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<PoolError> for OrchestratorError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::NoTokensAvailable => OrchestratorError::NoTokensAvailable,
            PoolError::Db(db) => OrchestratorError::Db(db),
        }
    }
}

impl OrchestratorError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn authorization(msg: impl Into<String>) -> Self {
        Self::Authorization(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
