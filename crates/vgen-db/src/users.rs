//! Repository for the `users` table.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;

use vgen_models::{PlanTier, User};

use crate::error::DbResult;

/// Column list for `users` queries.
const COLUMNS: &str = "\
    id, email, role, plan_tier, plan_started_at, plan_expires_at, \
    daily_video_count, last_count_reset, created_at, updated_at";

/// Provides CRUD operations for user accounts.
pub struct UserRepo;

impl UserRepo {
    /// Find a user by id.
    pub async fn get(pool: &PgPool, user_id: &str) -> DbResult<Option<User>> {
        let query = format!("SELECT {COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&query)
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
        Ok(user)
    }

    /// Create a user account.
    pub async fn create(pool: &PgPool, id: &str, email: &str) -> DbResult<User> {
        let query = format!(
            "INSERT INTO users (id, email) VALUES ($1, $2) RETURNING {COLUMNS}"
        );
        let user = sqlx::query_as::<_, User>(&query)
            .bind(id)
            .bind(email)
            .fetch_one(pool)
            .await?;
        Ok(user)
    }

    /// Change a user's plan tier and expiry window.
    pub async fn update_plan(
        pool: &PgPool,
        user_id: &str,
        tier: PlanTier,
        started_at: Option<DateTime<Utc>>,
        expires_at: Option<DateTime<Utc>>,
    ) -> DbResult<User> {
        let query = format!(
            "UPDATE users \
             SET plan_tier = $2, plan_started_at = $3, plan_expires_at = $4, \
                 updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        let user = sqlx::query_as::<_, User>(&query)
            .bind(user_id)
            .bind(tier)
            .bind(started_at)
            .bind(expires_at)
            .fetch_one(pool)
            .await?;
        Ok(user)
    }

    /// Atomically add `count` to the user's daily counter.
    ///
    /// A plain SQL increment so concurrent submissions never lose updates.
    pub async fn increment_daily_count(pool: &PgPool, user_id: &str, count: i32) -> DbResult<i32> {
        let new_count: i32 = sqlx::query_scalar(
            "UPDATE users \
             SET daily_video_count = daily_video_count + $2, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING daily_video_count",
        )
        .bind(user_id)
        .bind(count)
        .fetch_one(pool)
        .await?;
        Ok(new_count)
    }

    /// Zero the daily counter for every user whose last reset predates
    /// `today`. Returns the number of users reset.
    pub async fn reset_expired_daily_counts(pool: &PgPool, today: NaiveDate) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE users \
             SET daily_video_count = 0, last_count_reset = $1, updated_at = NOW() \
             WHERE last_count_reset < $1",
        )
        .bind(today)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
