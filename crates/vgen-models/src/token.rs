//! Upstream API credential models.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Successful dispenses one token serves before rotation advances.
pub const BATCH_SIZE: i32 = 100;

/// Unique identifier for an API token.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct TokenId(pub String);

impl TokenId {
    /// Generate a new random token ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TokenId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An upstream API credential row.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, sqlx::FromRow)]
pub struct ApiToken {
    pub id: TokenId,

    /// The raw bearer credential sent upstream.
    pub token: String,

    /// Operator-facing label ("Token 1", ...).
    pub label: String,

    /// Inactive tokens are never dispensed.
    pub is_active: bool,

    /// Dispenses served in the current batch. Always in `0..=BATCH_SIZE`;
    /// reset to 0 when rotation advances past this token.
    pub current_batch_count: i32,

    /// Lifetime dispense total. Monotonic.
    pub total_generated: i64,

    /// When the current batch began.
    pub batch_started_at: Option<DateTime<Utc>>,

    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApiToken {
    /// Whether the current batch is exhausted.
    pub fn batch_exhausted(&self) -> bool {
        self.current_batch_count >= BATCH_SIZE
    }
}

/// Rotation settings singleton.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, sqlx::FromRow)]
pub struct TokenSettings {
    /// Round-robin cursor into the active, non-cooldown token list.
    pub last_used_token_index: i32,

    /// Submission chunk size used by the bulk queue.
    pub videos_per_batch: i32,

    /// Pacing delay between submission batches.
    pub batch_delay_seconds: i32,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            last_used_token_index: 0,
            videos_per_batch: 10,
            batch_delay_seconds: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_exhaustion() {
        let mut token = ApiToken {
            id: TokenId::new(),
            token: "secret".to_string(),
            label: "Token 1".to_string(),
            is_active: true,
            current_batch_count: 0,
            total_generated: 0,
            batch_started_at: None,
            last_used_at: None,
            created_at: Utc::now(),
        };
        assert!(!token.batch_exhausted());

        token.current_batch_count = BATCH_SIZE - 1;
        assert!(!token.batch_exhausted());

        token.current_batch_count = BATCH_SIZE;
        assert!(token.batch_exhausted());
    }

    #[test]
    fn test_settings_defaults() {
        let settings = TokenSettings::default();
        assert_eq!(settings.last_used_token_index, 0);
        assert_eq!(settings.videos_per_batch, 10);
        assert_eq!(settings.batch_delay_seconds, 10);
    }
}
