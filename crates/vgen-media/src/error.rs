//! Media uploader error types.

use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while re-hosting an artifact.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Fetch failed: {0}")]
    FetchFailed(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Message fragments that identify a dropped or refused connection.
const RETRYABLE_MESSAGES: [&str; 9] = [
    "fetch failed",
    "ECONNRESET",
    "ETIMEDOUT",
    "ECONNREFUSED",
    "EPIPE",
    "socket disconnected",
    "tls connection",
    "connection reset",
    "connection closed",
];

impl MediaError {
    pub fn fetch_failed(msg: impl Into<String>) -> Self {
        Self::FetchFailed(msg.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Whether a retry may help: network-level failures and 5xx statuses
    /// qualify; bad requests and parse errors do not.
    pub fn is_retryable(&self) -> bool {
        match self {
            MediaError::Network(e) => {
                e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
            }
            MediaError::FetchFailed(msg) | MediaError::UploadFailed(msg) => {
                let lower = msg.to_lowercase();
                lower.contains("http 5")
                    || RETRYABLE_MESSAGES
                        .iter()
                        .any(|m| lower.contains(&m.to_lowercase()))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_messages() {
        assert!(MediaError::fetch_failed("fetch failed: ECONNRESET").is_retryable());
        assert!(MediaError::upload_failed("socket disconnected mid-write").is_retryable());
        assert!(MediaError::upload_failed("TLS connection closed").is_retryable());
        assert!(MediaError::fetch_failed("HTTP 503 from origin").is_retryable());
    }

    #[test]
    fn test_non_retryable() {
        assert!(!MediaError::fetch_failed("HTTP 404 from origin").is_retryable());
        assert!(!MediaError::invalid_response("missing secure_url").is_retryable());
        assert!(!MediaError::config_error("endpoint not set").is_retryable());
    }
}
