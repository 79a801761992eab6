//! Store error types.

use thiserror::Error;

/// Result type for store operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Row not found: {0}")]
    NotFound(String),

    #[error("Duplicate value: {0}")]
    Duplicate(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Postgres SQLSTATE codes treated as transient connection failures:
/// admin shutdown family and connection-failure family.
const TRANSIENT_SQLSTATES: [&str; 5] = ["57P01", "57P02", "57P03", "08003", "08006"];

/// Error-message fragments produced by dropped or refused connections at
/// the OS / driver level.
const TRANSIENT_MESSAGES: [&str; 9] = [
    "ECONNRESET",
    "ECONNREFUSED",
    "ETIMEDOUT",
    "EPIPE",
    "connection reset",
    "connection closed",
    "socket hang up",
    "broken pipe",
    "timed out",
];

impl DbError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn duplicate(msg: impl Into<String>) -> Self {
        Self::Duplicate(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether this error matches the transient-connection whitelist and the
    /// operation may be retried safely.
    pub fn is_transient(&self) -> bool {
        let DbError::Sqlx(err) = self else {
            return false;
        };
        match err {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => true,
            sqlx::Error::Database(db) => {
                if let Some(code) = db.code() {
                    if TRANSIENT_SQLSTATES.contains(&code.as_ref()) {
                        return true;
                    }
                }
                message_is_transient(&db.message().to_lowercase())
            }
            other => message_is_transient(&other.to_string().to_lowercase()),
        }
    }
}

fn message_is_transient(message: &str) -> bool {
    TRANSIENT_MESSAGES
        .iter()
        .any(|m| message.contains(&m.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_sqlx_errors_are_not_transient() {
        assert!(!DbError::not_found("users/u1").is_transient());
        assert!(!DbError::duplicate("token").is_transient());
    }

    #[test]
    fn test_transient_message_matching() {
        assert!(message_is_transient("read failed: econnreset"));
        assert!(message_is_transient("socket hang up"));
        assert!(message_is_transient("operation timed out"));
        assert!(!message_is_transient("syntax error at or near"));
        assert!(!message_is_transient("duplicate key value"));
    }

    #[test]
    fn test_io_errors_are_transient() {
        let err = DbError::Sqlx(sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        )));
        assert!(err.is_transient());
    }

    #[test]
    fn test_pool_timeout_is_transient() {
        assert!(DbError::Sqlx(sqlx::Error::PoolTimedOut).is_transient());
    }
}
