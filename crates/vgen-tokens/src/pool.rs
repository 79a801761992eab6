//! Token pool implementation.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use vgen_db::{Db, TokenRepo};
use vgen_models::{ApiToken, TokenId};

use crate::error::{PoolError, PoolResult};

/// Token pool configuration.
#[derive(Debug, Clone)]
pub struct TokenPoolConfig {
    /// Successful dispenses one token serves before rotation advances.
    pub batch_size: i32,
    /// Sliding window over which errors are counted.
    pub error_window: Duration,
    /// Errors within the window that trip a cooldown.
    pub error_threshold: usize,
    /// How long a tripped token sits out.
    pub cooldown: Duration,
}

impl Default for TokenPoolConfig {
    fn default() -> Self {
        Self {
            batch_size: vgen_models::BATCH_SIZE,
            error_window: Duration::minutes(20),
            error_threshold: 10,
            cooldown: Duration::hours(2),
        }
    }
}

impl TokenPoolConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            batch_size: std::env::var("TOKEN_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(vgen_models::BATCH_SIZE),
            error_window: Duration::minutes(
                std::env::var("TOKEN_ERROR_WINDOW_MINUTES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(20),
            ),
            error_threshold: std::env::var("TOKEN_ERROR_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            cooldown: Duration::hours(
                std::env::var("TOKEN_COOLDOWN_HOURS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            ),
        }
    }
}

/// Dispenses upstream credentials under batch rotation and error cooldown.
pub struct TokenPool {
    db: Db,
    config: TokenPoolConfig,
    /// Error timestamps per token, pruned to the sliding window.
    errors: Mutex<HashMap<TokenId, Vec<DateTime<Utc>>>>,
    /// Cooldown end per tripped token.
    cooldowns: Mutex<HashMap<TokenId, DateTime<Utc>>>,
}

impl TokenPool {
    pub fn new(db: Db, config: TokenPoolConfig) -> Self {
        Self {
            db,
            config,
            errors: Mutex::new(HashMap::new()),
            cooldowns: Mutex::new(HashMap::new()),
        }
    }

    // =========================================================================
    // Error accounting
    // =========================================================================

    /// Record an upstream error against a token. Trips the cooldown when
    /// the window fills.
    pub fn record_error(&self, token_id: &TokenId) {
        self.record_error_at(token_id, Utc::now());
    }

    fn record_error_at(&self, token_id: &TokenId, now: DateTime<Utc>) {
        let count = {
            let mut errors = self.errors.lock().unwrap();
            let window = errors.entry(token_id.clone()).or_default();
            window.push(now);
            let cutoff = now - self.config.error_window;
            window.retain(|t| *t > cutoff);
            window.len()
        };

        debug!(token_id = %token_id, errors_in_window = count, "Recorded token error");

        if count >= self.config.error_threshold {
            let until = now + self.config.cooldown;
            self.cooldowns.lock().unwrap().insert(token_id.clone(), until);
            warn!(
                token_id = %token_id,
                errors_in_window = count,
                cooldown_until = %until,
                "Token error threshold reached, entering cooldown"
            );
        }
    }

    /// Whether a token is currently cooling down. A lapsed cooldown is
    /// removed and the token's error history cleared.
    pub fn is_in_cooldown(&self, token_id: &TokenId) -> bool {
        self.is_in_cooldown_at(token_id, Utc::now())
    }

    fn is_in_cooldown_at(&self, token_id: &TokenId, now: DateTime<Utc>) -> bool {
        let expired = {
            let cooldowns = self.cooldowns.lock().unwrap();
            match cooldowns.get(token_id) {
                Some(until) if now >= *until => true,
                Some(_) => return true,
                None => return false,
            }
        };
        if expired {
            self.cooldowns.lock().unwrap().remove(token_id);
            self.errors.lock().unwrap().remove(token_id);
            info!(token_id = %token_id, "Token cooldown expired, error history cleared");
        }
        false
    }

    /// Errors recorded against a token within the window.
    pub fn error_count(&self, token_id: &TokenId) -> usize {
        self.error_count_at(token_id, Utc::now())
    }

    fn error_count_at(&self, token_id: &TokenId, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.config.error_window;
        let errors = self.errors.lock().unwrap();
        errors
            .get(token_id)
            .map(|w| w.iter().filter(|t| **t > cutoff).count())
            .unwrap_or(0)
    }

    /// Ids currently excluded by cooldown.
    fn cooldown_excluded(&self, now: DateTime<Utc>) -> Vec<TokenId> {
        let ids: Vec<TokenId> = self.cooldowns.lock().unwrap().keys().cloned().collect();
        ids.into_iter()
            .filter(|id| self.is_in_cooldown_at(id, now))
            .collect()
    }

    /// Ids excluded for rotation dispensing: cooldown plus tokens one error
    /// short of the threshold, to leave headroom against concurrent
    /// dispensers pushing them over.
    fn rotation_excluded(&self, now: DateTime<Utc>) -> Vec<TokenId> {
        let mut excluded = self.cooldown_excluded(now);
        let near = self.config.error_threshold.saturating_sub(1);
        let cutoff = now - self.config.error_window;
        let errors = self.errors.lock().unwrap();
        for (id, window) in errors.iter() {
            if excluded.contains(id) {
                continue;
            }
            if window.iter().filter(|t| **t > cutoff).count() >= near {
                excluded.push(id.clone());
            }
        }
        excluded
    }

    // =========================================================================
    // Dispensing
    // =========================================================================

    /// Dispense the current batch token. One token serves a full batch
    /// before the cursor advances.
    pub async fn dispense(&self) -> PoolResult<ApiToken> {
        let excluded = self.cooldown_excluded(Utc::now());
        let token = self
            .db
            .retrying("dispense_batch", || {
                let excluded = excluded.clone();
                async move {
                    TokenRepo::dispense_batch(self.db.pool(), &excluded, self.config.batch_size)
                        .await
                }
            })
            .await?;
        token.ok_or(PoolError::NoTokensAvailable)
    }

    /// Active tokens that are not cooling down, in creation order. The
    /// basis for scene-number token selection on regenerate.
    pub async fn active_tokens(&self) -> PoolResult<Vec<ApiToken>> {
        let rows = self
            .db
            .retrying("list_active", || async move {
                TokenRepo::list_active(self.db.pool()).await
            })
            .await?;
        Ok(rows
            .into_iter()
            .filter(|t| !self.is_in_cooldown(&t.id))
            .collect())
    }

    /// Dispense the least-recently-used healthy token for status checks.
    /// Returns `None` when every active token is cooling down or near the
    /// error threshold.
    pub async fn next_rotation_token(&self) -> PoolResult<Option<ApiToken>> {
        let excluded = self.rotation_excluded(Utc::now());
        let token = self
            .db
            .retrying("dispense_rotation", || {
                let excluded = excluded.clone();
                async move { TokenRepo::dispense_rotation(self.db.pool(), &excluded).await }
            })
            .await?;
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;
    use vgen_db::RetryConfig;

    fn pool() -> TokenPool {
        // The store handle is never touched by the accounting tests.
        let pg = PgPoolOptions::new().connect_lazy("postgres://localhost/vgen_test").unwrap();
        TokenPool::new(Db::new(pg, RetryConfig::default()), TokenPoolConfig::default())
    }

    #[tokio::test]
    async fn test_cooldown_trips_on_tenth_error() {
        let p = pool();
        let id = TokenId::from_string("t1");
        let now = Utc::now();

        for i in 0..9 {
            p.record_error_at(&id, now + Duration::seconds(i));
            assert!(!p.is_in_cooldown_at(&id, now + Duration::seconds(i)));
        }
        p.record_error_at(&id, now + Duration::seconds(9));
        assert!(p.is_in_cooldown_at(&id, now + Duration::seconds(10)));
    }

    #[tokio::test]
    async fn test_window_pruning_prevents_trip() {
        let p = pool();
        let id = TokenId::from_string("t1");
        let now = Utc::now();

        // Nine errors fall out of the window before the tenth arrives.
        for i in 0..9 {
            p.record_error_at(&id, now + Duration::seconds(i));
        }
        let later = now + Duration::minutes(21);
        p.record_error_at(&id, later);
        assert!(!p.is_in_cooldown_at(&id, later));
        assert_eq!(p.error_count_at(&id, later), 1);
    }

    #[tokio::test]
    async fn test_cooldown_expiry_clears_history() {
        let p = pool();
        let id = TokenId::from_string("t1");
        let now = Utc::now();

        for i in 0..10 {
            p.record_error_at(&id, now + Duration::seconds(i));
        }
        assert!(p.is_in_cooldown_at(&id, now + Duration::minutes(10)));

        // Two hours after the trip the token is usable and its slate clean.
        let after = now + Duration::hours(2) + Duration::minutes(1);
        assert!(!p.is_in_cooldown_at(&id, after));
        assert_eq!(p.error_count_at(&id, after), 0);
    }

    #[tokio::test]
    async fn test_rotation_excludes_near_threshold() {
        let p = pool();
        let healthy = TokenId::from_string("healthy");
        let near = TokenId::from_string("near");
        let now = Utc::now();

        p.record_error_at(&healthy, now);
        for i in 0..9 {
            p.record_error_at(&near, now + Duration::seconds(i));
        }

        let excluded = p.rotation_excluded(now + Duration::seconds(10));
        assert!(excluded.contains(&near));
        assert!(!excluded.contains(&healthy));

        // Batch dispensing only excludes tokens actually in cooldown.
        let batch_excluded = p.cooldown_excluded(now + Duration::seconds(10));
        assert!(batch_excluded.is_empty());
    }

    #[tokio::test]
    async fn test_cooldown_excluded_lists_tripped_tokens() {
        let p = pool();
        let id = TokenId::from_string("t1");
        let now = Utc::now();

        for i in 0..10 {
            p.record_error_at(&id, now + Duration::seconds(i));
        }
        let excluded = p.cooldown_excluded(now + Duration::minutes(5));
        assert_eq!(excluded, vec![id.clone()]);

        // After expiry the exclusion list is empty again.
        assert!(p.cooldown_excluded(now + Duration::hours(3)).is_empty());
    }
}
