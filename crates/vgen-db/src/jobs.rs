//! Repository for the `jobs` table.
//!
//! Every mutation sets `updated_at = NOW()` server-side; the polling
//! coordinator's heartbeat relies on that column to detect stalled jobs.

use chrono::Duration;
use sqlx::PgPool;

use vgen_models::{JobId, JobStatus, TokenId, VideoJob};

use crate::error::{DbError, DbResult};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, user_id, prompt, aspect_ratio, status, video_url, operation_name, \
    scene_id, token_used, retry_count, error_message, metadata, \
    reference_image_url, created_at, updated_at";

/// Default page size for job history listings.
const DEFAULT_LIMIT: i64 = 50;

/// Maximum page size for job history listings.
const MAX_LIMIT: i64 = 200;

/// Partial update for a job row. Unset fields are left untouched;
/// `updated_at` is always refreshed.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub video_url: Option<String>,
    pub operation_name: Option<String>,
    pub scene_id: Option<String>,
    pub token_used: Option<TokenId>,
    pub retry_count: Option<i32>,
    pub error_message: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl JobUpdate {
    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn video_url(mut self, url: impl Into<String>) -> Self {
        self.video_url = Some(url.into());
        self
    }

    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn scene_id(mut self, scene_id: impl Into<String>) -> Self {
        self.scene_id = Some(scene_id.into());
        self
    }

    pub fn token_used(mut self, token_id: TokenId) -> Self {
        self.token_used = Some(token_id);
        self
    }

    pub fn retry_count(mut self, count: i32) -> Self {
        self.retry_count = Some(count);
        self
    }

    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.video_url.is_none()
            && self.operation_name.is_none()
            && self.scene_id.is_none()
            && self.token_used.is_none()
            && self.retry_count.is_none()
            && self.error_message.is_none()
            && self.metadata.is_none()
    }
}

/// Provides CRUD operations for video jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a batch of jobs in one transaction, preserving order.
    pub async fn create_many(pool: &PgPool, jobs: &[VideoJob]) -> DbResult<Vec<VideoJob>> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "INSERT INTO jobs \
                 (id, user_id, prompt, aspect_ratio, status, scene_id, \
                  metadata, reference_image_url) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {COLUMNS}"
        );
        let mut inserted = Vec::with_capacity(jobs.len());
        for job in jobs {
            let row = sqlx::query_as::<_, VideoJob>(&query)
                .bind(&job.id)
                .bind(&job.user_id)
                .bind(&job.prompt)
                .bind(job.aspect_ratio)
                .bind(job.status)
                .bind(&job.scene_id)
                .bind(&job.metadata)
                .bind(&job.reference_image_url)
                .fetch_one(&mut *tx)
                .await?;
            inserted.push(row);
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Insert a single job.
    pub async fn create(pool: &PgPool, job: &VideoJob) -> DbResult<VideoJob> {
        let mut rows = Self::create_many(pool, std::slice::from_ref(job)).await?;
        rows.pop()
            .ok_or_else(|| DbError::invalid_input("insert returned no row"))
    }

    /// Find a job by id.
    pub async fn get(pool: &PgPool, id: &JobId) -> DbResult<Option<VideoJob>> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        let row = sqlx::query_as::<_, VideoJob>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    /// Find a job by id, scoped to its owner.
    pub async fn get_for_user(
        pool: &PgPool,
        id: &JobId,
        user_id: &str,
    ) -> DbResult<Option<VideoJob>> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1 AND user_id = $2");
        let row = sqlx::query_as::<_, VideoJob>(&query)
            .bind(id)
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
        Ok(row)
    }

    /// List a user's jobs, newest first.
    pub async fn list_for_user(
        pool: &PgPool,
        user_id: &str,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> DbResult<Vec<VideoJob>> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE user_id = $1 \
             ORDER BY created_at DESC \
             LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query_as::<_, VideoJob>(&query)
            .bind(user_id)
            .bind(limit)
            .bind(offset.unwrap_or(0))
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }

    /// Apply a partial update. When `user_id` is given the update is scoped
    /// to that owner. Returns the updated row.
    pub async fn update_fields(
        pool: &PgPool,
        id: &JobId,
        user_id: Option<&str>,
        update: JobUpdate,
    ) -> DbResult<VideoJob> {
        if update.is_empty() {
            return Self::touch(pool, id).await;
        }

        // Build the SET clause dynamically; $1 is the job id, $2 the
        // optional owner, value binds start at $3.
        let mut sets: Vec<String> = vec!["updated_at = NOW()".to_string()];
        let mut bind_idx: u32 = 3;
        macro_rules! set_col {
            ($field:expr, $name:literal) => {
                if $field.is_some() {
                    sets.push(format!(concat!($name, " = ${}"), bind_idx));
                    bind_idx += 1;
                }
            };
        }
        set_col!(update.status, "status");
        set_col!(update.video_url, "video_url");
        set_col!(update.operation_name, "operation_name");
        set_col!(update.scene_id, "scene_id");
        set_col!(update.token_used, "token_used");
        set_col!(update.retry_count, "retry_count");
        set_col!(update.error_message, "error_message");
        set_col!(update.metadata, "metadata");
        let _ = bind_idx;

        let owner_clause = if user_id.is_some() {
            "AND user_id = $2"
        } else {
            "AND ($2::TEXT IS NULL OR user_id = $2)"
        };
        let query = format!(
            "UPDATE jobs SET {} WHERE id = $1 {} RETURNING {COLUMNS}",
            sets.join(", "),
            owner_clause
        );

        let mut q = sqlx::query_as::<_, VideoJob>(&query).bind(id).bind(user_id);
        if let Some(v) = update.status {
            q = q.bind(v);
        }
        if let Some(v) = update.video_url {
            q = q.bind(v);
        }
        if let Some(v) = update.operation_name {
            q = q.bind(v);
        }
        if let Some(v) = update.scene_id {
            q = q.bind(v);
        }
        if let Some(v) = update.token_used {
            q = q.bind(v);
        }
        if let Some(v) = update.retry_count {
            q = q.bind(v);
        }
        if let Some(v) = update.error_message {
            q = q.bind(v);
        }
        if let Some(v) = update.metadata {
            q = q.bind(v);
        }

        q.fetch_optional(pool)
            .await?
            .ok_or_else(|| DbError::not_found(format!("job {}", id)))
    }

    /// Mark a job completed with its hosted URL. The status guard makes
    /// terminal rows immutable, so a duplicate completion event is a no-op.
    /// Retry annotations in `error_message` are left in place for the
    /// history view. Returns whether the row transitioned.
    pub async fn mark_completed(pool: &PgPool, id: &JobId, video_url: &str) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status = $2, video_url = $3, updated_at = NOW() \
             WHERE id = $1 AND status NOT IN ($4, $5)",
        )
        .bind(id)
        .bind(JobStatus::Completed)
        .bind(video_url)
        .bind(JobStatus::Completed)
        .bind(JobStatus::Failed)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Mark a job failed with a terminal message. Terminal rows are left
    /// untouched. Returns whether the row transitioned.
    pub async fn mark_failed(pool: &PgPool, id: &JobId, message: &str) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs \
             SET status = $2, error_message = $3, updated_at = NOW() \
             WHERE id = $1 AND status NOT IN ($4, $5)",
        )
        .bind(id)
        .bind(JobStatus::Failed)
        .bind(message)
        .bind(JobStatus::Completed)
        .bind(JobStatus::Failed)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Heartbeat: refresh `updated_at` without changing anything else.
    pub async fn touch(pool: &PgPool, id: &JobId) -> DbResult<VideoJob> {
        let query = format!(
            "UPDATE jobs SET updated_at = NOW() WHERE id = $1 RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, VideoJob>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| DbError::not_found(format!("job {}", id)))
    }

    /// Non-terminal jobs whose `updated_at` is older than the given age.
    /// Used by startup recovery and housekeeping.
    pub async fn find_stale_non_terminal(
        pool: &PgPool,
        older_than: Duration,
    ) -> DbResult<Vec<VideoJob>> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status IN ($1, $2) \
               AND updated_at < NOW() - make_interval(secs => $3) \
             ORDER BY created_at ASC"
        );
        let rows = sqlx::query_as::<_, VideoJob>(&query)
            .bind(JobStatus::Pending)
            .bind(JobStatus::Queued)
            .bind(older_than.num_seconds() as f64)
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }

    /// Count jobs per status (uses the status index).
    pub async fn count_by_status(pool: &PgPool) -> DbResult<Vec<(JobStatus, i64)>> {
        let rows: Vec<(JobStatus, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                .fetch_all(pool)
                .await?;
        Ok(rows)
    }

    /// Delete terminal jobs older than the retention window. Returns the
    /// number of rows removed.
    pub async fn purge_terminal_older_than(pool: &PgPool, age: Duration) -> DbResult<u64> {
        let result = sqlx::query(
            "DELETE FROM jobs \
             WHERE status IN ($1, $2) \
               AND updated_at < NOW() - make_interval(secs => $3)",
        )
        .bind(JobStatus::Completed)
        .bind(JobStatus::Failed)
        .bind(age.num_seconds() as f64)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_builder_tracks_emptiness() {
        assert!(JobUpdate::default().is_empty());
        assert!(!JobUpdate::default().status(JobStatus::Queued).is_empty());
        assert!(!JobUpdate::default().error_message("boom").is_empty());
    }

    #[test]
    fn test_update_builder_chains() {
        let update = JobUpdate::default()
            .status(JobStatus::Completed)
            .video_url("https://media.example.com/v/abc.mp4")
            .retry_count(1);
        assert_eq!(update.status, Some(JobStatus::Completed));
        assert_eq!(update.retry_count, Some(1));
        assert!(update.operation_name.is_none());
    }
}
