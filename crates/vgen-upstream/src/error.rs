//! Upstream API error types.

use thiserror::Error;

/// Result type for upstream operations.
pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Errors from the video generation API.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Request timed out")]
    Timeout,

    #[error("Upstream returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Submission accepted but no operation returned")]
    MissingOperation,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            UpstreamError::Timeout
        } else {
            UpstreamError::Network(e)
        }
    }
}

impl UpstreamError {
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Whether this failure is transient: the job should keep polling
    /// rather than fail. Covers 5xx responses and network-level trouble.
    pub fn is_transient(&self) -> bool {
        match self {
            UpstreamError::Timeout | UpstreamError::Network(_) => true,
            UpstreamError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(UpstreamError::Timeout.is_transient());
        assert!(UpstreamError::Http {
            status: 503,
            body: "unavailable".to_string()
        }
        .is_transient());
        assert!(!UpstreamError::Http {
            status: 400,
            body: "bad request".to_string()
        }
        .is_transient());
        assert!(!UpstreamError::MissingOperation.is_transient());
    }
}
