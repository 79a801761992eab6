//! Repository for the `token_settings` singleton row.

use sqlx::{PgConnection, PgPool};

use vgen_models::TokenSettings;

use crate::error::DbResult;

/// Column list for `token_settings` queries.
const COLUMNS: &str = "last_used_token_index, videos_per_batch, batch_delay_seconds";

/// Provides access to the rotation settings singleton.
pub struct SettingsRepo;

impl SettingsRepo {
    /// Fetch the singleton, creating it with defaults on first use.
    pub async fn get_or_init(pool: &PgPool) -> DbResult<TokenSettings> {
        sqlx::query("INSERT INTO token_settings (id) VALUES (TRUE) ON CONFLICT (id) DO NOTHING")
            .execute(pool)
            .await?;
        let query = format!("SELECT {COLUMNS} FROM token_settings WHERE id = TRUE");
        let settings = sqlx::query_as::<_, TokenSettings>(&query)
            .fetch_one(pool)
            .await?;
        Ok(settings)
    }

    /// Transaction-scoped variant used by the token dispenser.
    pub async fn get_or_init_tx(conn: &mut PgConnection) -> DbResult<TokenSettings> {
        sqlx::query("INSERT INTO token_settings (id) VALUES (TRUE) ON CONFLICT (id) DO NOTHING")
            .execute(&mut *conn)
            .await?;
        let query = format!("SELECT {COLUMNS} FROM token_settings WHERE id = TRUE");
        let settings = sqlx::query_as::<_, TokenSettings>(&query)
            .fetch_one(&mut *conn)
            .await?;
        Ok(settings)
    }

    /// Persist the rotation cursor (transaction-scoped; always written by
    /// the dispenser while it still holds the token row lock).
    pub async fn set_last_used_index_tx(conn: &mut PgConnection, index: i32) -> DbResult<()> {
        sqlx::query("UPDATE token_settings SET last_used_token_index = $1 WHERE id = TRUE")
            .bind(index)
            .execute(conn)
            .await?;
        Ok(())
    }

    /// Update submission pacing knobs (upsert, so it also works before the
    /// singleton was first read).
    pub async fn update_pacing(
        pool: &PgPool,
        videos_per_batch: i32,
        batch_delay_seconds: i32,
    ) -> DbResult<TokenSettings> {
        let query = format!(
            "INSERT INTO token_settings (id, videos_per_batch, batch_delay_seconds) \
             VALUES (TRUE, $1, $2) \
             ON CONFLICT (id) DO UPDATE SET \
                videos_per_batch = EXCLUDED.videos_per_batch, \
                batch_delay_seconds = EXCLUDED.batch_delay_seconds \
             RETURNING {COLUMNS}"
        );
        let settings = sqlx::query_as::<_, TokenSettings>(&query)
            .bind(videos_per_batch)
            .bind(batch_delay_seconds)
            .fetch_one(pool)
            .await?;
        Ok(settings)
    }
}
