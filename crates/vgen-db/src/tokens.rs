//! Repository for the `api_tokens` table.
//!
//! Holds the transactional batch-dispense algorithm: the round-robin cursor
//! lives in `token_settings`, the per-token batch counter is incremented
//! under an exclusive row lock so parallel dispensers serialize per token
//! and never double-count.

use sqlx::{PgConnection, PgPool};
use tracing::{debug, info};

use vgen_models::{ApiToken, TokenId};

use crate::error::{DbError, DbResult};
use crate::settings::SettingsRepo;

/// Column list for `api_tokens` queries.
const COLUMNS: &str = "\
    id, token, label, is_active, current_batch_count, total_generated, \
    batch_started_at, last_used_at, created_at";

/// Provides CRUD and dispense operations for upstream API tokens.
pub struct TokenRepo;

impl TokenRepo {
    /// Insert a new token.
    pub async fn insert(pool: &PgPool, token: &str, label: &str) -> DbResult<ApiToken> {
        let query = format!(
            "INSERT INTO api_tokens (id, token, label) VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, ApiToken>(&query)
            .bind(TokenId::new())
            .bind(token)
            .bind(label)
            .fetch_one(pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    DbError::duplicate("token value already registered")
                }
                _ => DbError::Sqlx(e),
            })?;
        Ok(row)
    }

    /// Find a token by id.
    pub async fn get(pool: &PgPool, id: &TokenId) -> DbResult<Option<ApiToken>> {
        let query = format!("SELECT {COLUMNS} FROM api_tokens WHERE id = $1");
        let row = sqlx::query_as::<_, ApiToken>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    /// List active tokens in creation order.
    pub async fn list_active(pool: &PgPool) -> DbResult<Vec<ApiToken>> {
        let query = format!(
            "SELECT {COLUMNS} FROM api_tokens WHERE is_active = TRUE ORDER BY created_at ASC"
        );
        let rows = sqlx::query_as::<_, ApiToken>(&query).fetch_all(pool).await?;
        Ok(rows)
    }

    /// List all tokens in creation order (admin view).
    pub async fn list_all(pool: &PgPool) -> DbResult<Vec<ApiToken>> {
        let query = format!("SELECT {COLUMNS} FROM api_tokens ORDER BY created_at ASC");
        let rows = sqlx::query_as::<_, ApiToken>(&query).fetch_all(pool).await?;
        Ok(rows)
    }

    /// Enable or disable a token.
    pub async fn set_active(pool: &PgPool, id: &TokenId, active: bool) -> DbResult<ApiToken> {
        let query = format!(
            "UPDATE api_tokens SET is_active = $2 WHERE id = $1 RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ApiToken>(&query)
            .bind(id)
            .bind(active)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| DbError::not_found(format!("token {}", id)))
    }

    /// Delete a token.
    pub async fn delete(pool: &PgPool, id: &TokenId) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM api_tokens WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace the whole token set in one transaction.
    ///
    /// Detaches `token_used` from every job, deletes all tokens, and inserts
    /// the new set with auto-generated labels. Duplicate values in the input
    /// are rejected before anything is touched, which also makes the
    /// operation idempotent for a fixed input set.
    pub async fn replace_all(pool: &PgPool, raw_tokens: &[String]) -> DbResult<Vec<ApiToken>> {
        let mut seen = std::collections::HashSet::new();
        for raw in raw_tokens {
            if raw.trim().is_empty() {
                return Err(DbError::invalid_input("empty token value"));
            }
            if !seen.insert(raw.as_str()) {
                return Err(DbError::duplicate("duplicate token value in input"));
            }
        }

        let mut tx = pool.begin().await?;

        sqlx::query("UPDATE jobs SET token_used = NULL WHERE token_used IS NOT NULL")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM api_tokens").execute(&mut *tx).await?;

        let query = format!(
            "INSERT INTO api_tokens (id, token, label) VALUES ($1, $2, $3) \
             RETURNING {COLUMNS}"
        );
        let mut inserted = Vec::with_capacity(raw_tokens.len());
        for (i, raw) in raw_tokens.iter().enumerate() {
            let row = sqlx::query_as::<_, ApiToken>(&query)
                .bind(TokenId::new())
                .bind(raw)
                .bind(format!("Token {}", i + 1))
                .fetch_one(&mut *tx)
                .await?;
            inserted.push(row);
        }

        tx.commit().await?;
        info!(count = inserted.len(), "Replaced token set");
        Ok(inserted)
    }

    /// Dispense the current batch token, advancing rotation when the batch
    /// is exhausted. Runs entirely inside one transaction.
    ///
    /// `excluded` carries the ids currently in cooldown (the store knows
    /// nothing about cooldowns; the pool computes them). Returns `None`
    /// when no active, non-excluded token exists.
    pub async fn dispense_batch(
        pool: &PgPool,
        excluded: &[TokenId],
        batch_size: i32,
    ) -> DbResult<Option<ApiToken>> {
        let mut tx = pool.begin().await?;

        let cursor = SettingsRepo::get_or_init_tx(&mut *tx).await?.last_used_token_index;

        let available: Vec<(TokenId,)> = sqlx::query_as(
            "SELECT id FROM api_tokens \
             WHERE is_active = TRUE AND NOT (id = ANY($1)) \
             ORDER BY created_at ASC",
        )
        .bind(excluded_strings(excluded))
        .fetch_all(&mut *tx)
        .await?;

        if available.is_empty() {
            return Ok(None);
        }

        let mut index = cursor_index(cursor, available.len());
        let mut current = Self::lock_row(&mut *tx, &available[index].0).await?;

        if current.current_batch_count >= batch_size {
            // Batch exhausted: close it out and move the cursor.
            let exhausted_id = current.id.clone();
            sqlx::query(
                "UPDATE api_tokens SET current_batch_count = 0, batch_started_at = NULL \
                 WHERE id = $1",
            )
            .bind(&exhausted_id)
            .execute(&mut *tx)
            .await?;

            index = advanced_index(cursor, available.len());
            current = Self::lock_row(&mut *tx, &available[index].0).await?;
            SettingsRepo::set_last_used_index_tx(&mut *tx, index as i32).await?;

            debug!(
                from = %exhausted_id,
                to = %current.id,
                "Token batch exhausted, rotation advanced"
            );
        }

        let query = format!(
            "UPDATE api_tokens \
             SET current_batch_count = current_batch_count + 1, \
                 total_generated = total_generated + 1, \
                 batch_started_at = COALESCE(batch_started_at, NOW()), \
                 last_used_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        let dispensed = sqlx::query_as::<_, ApiToken>(&query)
            .bind(&current.id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(dispensed))
    }

    /// Dispense the least-recently-used token outside batch accounting.
    ///
    /// Used by status polling, where a fresh credential is wanted without
    /// consuming the batch cursor. `excluded` carries cooldown and
    /// near-threshold ids. Touches `last_used_at` atomically so concurrent
    /// callers spread across tokens.
    pub async fn dispense_rotation(
        pool: &PgPool,
        excluded: &[TokenId],
    ) -> DbResult<Option<ApiToken>> {
        let query = format!(
            "UPDATE api_tokens SET last_used_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM api_tokens \
                 WHERE is_active = TRUE AND NOT (id = ANY($1)) \
                 ORDER BY last_used_at ASC NULLS FIRST \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, ApiToken>(&query)
            .bind(excluded_strings(excluded))
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    /// Lock one token row exclusively and return its current state.
    async fn lock_row(tx: &mut PgConnection, id: &TokenId) -> DbResult<ApiToken> {
        let query = format!("SELECT {COLUMNS} FROM api_tokens WHERE id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, ApiToken>(&query)
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        Ok(row)
    }
}

fn excluded_strings(excluded: &[TokenId]) -> Vec<String> {
    excluded.iter().map(|id| id.0.clone()).collect()
}

/// Cursor position over the currently-available token list. The stored
/// cursor may exceed the list length after the active set shrinks; the
/// modulo wrap keeps rotation fair rather than exact.
fn cursor_index(cursor: i32, available: usize) -> usize {
    cursor.rem_euclid(available as i32) as usize
}

/// Cursor position after a batch rollover.
fn advanced_index(cursor: i32, available: usize) -> usize {
    (cursor_index(cursor, available) + 1) % available
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_wraps_when_active_set_shrinks() {
        // Cursor written against five tokens, three remain.
        assert_eq!(cursor_index(4, 3), 1);
        assert_eq!(cursor_index(0, 3), 0);
        // A stale negative cursor (never written by us) still resolves.
        assert_eq!(cursor_index(-1, 3), 2);
    }

    #[test]
    fn test_advance_wraps_to_front() {
        assert_eq!(advanced_index(0, 3), 1);
        assert_eq!(advanced_index(2, 3), 0);
        // A single token advances onto itself.
        assert_eq!(advanced_index(0, 1), 0);
    }

    #[test]
    fn test_excluded_strings_preserves_ids() {
        let ids = vec![TokenId::from_string("a"), TokenId::from_string("b")];
        assert_eq!(excluded_strings(&ids), vec!["a".to_string(), "b".to_string()]);
    }
}
