//! Periodic maintenance and startup recovery.
//!
//! A one-minute tick drives two tasks: resetting daily counters once per
//! calendar date at local midnight of the configured timezone, and failing
//! in-flight jobs whose heartbeat stopped. Startup recovery re-attaches
//! jobs orphaned by a restart, since the submission and polling queues are
//! memory-only.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{FixedOffset, NaiveDate, Utc};
use tokio::time::interval;
use tracing::{error, info, warn};

use vgen_db::{JobRepo, TokenRepo, UserRepo};
use vgen_models::JobStatus;

use crate::context::Context;
use crate::error::OrchestratorResult;
use crate::polling::{PollTask, PollingCoordinator};
use crate::submission::{QueuedJob, SubmissionQueue};

/// Interval between housekeeping ticks.
const TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Periodic maintenance service.
pub struct Housekeeper {
    ctx: Arc<Context>,
    submission: Arc<SubmissionQueue>,
    polling: Arc<PollingCoordinator>,
    last_reset_date: Mutex<Option<NaiveDate>>,
}

impl Housekeeper {
    pub fn new(
        ctx: Arc<Context>,
        submission: Arc<SubmissionQueue>,
        polling: Arc<PollingCoordinator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            submission,
            polling,
            last_reset_date: Mutex::new(None),
        })
    }

    /// Run the maintenance loop indefinitely. Spawn as a background task.
    pub async fn run(&self) {
        info!("Starting housekeeper (interval: {:?})", TICK_INTERVAL);
        let mut ticker = interval(TICK_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = self.tick().await {
                error!("Housekeeping error: {}", e);
            }
        }
    }

    /// One maintenance cycle (public for tests and manual invocation).
    pub async fn tick(&self) -> OrchestratorResult<()> {
        self.maybe_reset_daily_counts().await?;
        self.expire_stale_jobs().await?;
        Ok(())
    }

    /// Reset daily counters the first tick after local midnight.
    async fn maybe_reset_daily_counts(&self) -> OrchestratorResult<()> {
        let offset_secs = self.ctx.config.daily_reset_utc_offset_hours * 3600;
        let offset = FixedOffset::east_opt(offset_secs)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is valid"));
        let local_today = Utc::now().with_timezone(&offset).date_naive();

        if *self.last_reset_date.lock().unwrap() == Some(local_today) {
            return Ok(());
        }

        let reset = self
            .ctx
            .db
            .retrying("daily_reset", || async move {
                UserRepo::reset_expired_daily_counts(self.ctx.db.pool(), local_today).await
            })
            .await?;
        if reset > 0 {
            info!(users = reset, date = %local_today, "Daily counters reset");
        }

        if let Some(retention) = self.ctx.config.job_retention {
            let age = chrono::Duration::from_std(retention)
                .unwrap_or_else(|_| chrono::Duration::days(30));
            let purged = JobRepo::purge_terminal_older_than(self.ctx.db.pool(), age).await?;
            if purged > 0 {
                info!(jobs = purged, "Purged terminal job history");
            }
        }

        *self.last_reset_date.lock().unwrap() = Some(local_today);
        Ok(())
    }

    /// Fail in-flight jobs whose heartbeat stopped. Only `queued` rows are
    /// considered: a live polling worker touches its row every minute, so a
    /// stale one means the worker is gone. `pending` rows are left for the
    /// submission queue (long paced batches refresh on retry, and restarts
    /// go through recovery).
    async fn expire_stale_jobs(&self) -> OrchestratorResult<()> {
        let age = chrono::Duration::from_std(self.ctx.config.stale_job_after)
            .unwrap_or_else(|_| chrono::Duration::minutes(15));
        let stale = JobRepo::find_stale_non_terminal(self.ctx.db.pool(), age).await?;

        let mut expired = 0u32;
        for job in stale {
            if job.status != JobStatus::Queued {
                continue;
            }
            warn!(
                job_id = %job.id,
                user_id = %job.user_id,
                updated_at = %job.updated_at,
                "Expiring job with stopped heartbeat"
            );
            JobRepo::mark_failed(
                self.ctx.db.pool(),
                &job.id,
                "Processing timed out. The polling worker may have crashed.",
            )
            .await?;
            expired += 1;
        }
        if expired > 0 {
            info!(jobs = expired, "Expired stale jobs");
        }
        Ok(())
    }

    /// Re-attach non-terminal jobs after a restart. Queued rows with a
    /// fresh operation resume polling (idempotent); pending rows re-enter
    /// the submission queue; anything past the horizon is failed.
    pub async fn recover_orphaned_jobs(&self) {
        let idle = chrono::Duration::from_std(self.ctx.config.recovery_idle_after)
            .unwrap_or_else(|_| chrono::Duration::minutes(2));
        let horizon = chrono::Duration::from_std(self.ctx.config.recovery_horizon)
            .unwrap_or_else(|_| chrono::Duration::hours(1));

        let orphaned = match JobRepo::find_stale_non_terminal(self.ctx.db.pool(), idle).await {
            Ok(rows) => rows,
            Err(e) => {
                error!("Recovery scan failed: {}", e);
                return;
            }
        };
        if orphaned.is_empty() {
            return;
        }
        info!(jobs = orphaned.len(), "Recovering jobs orphaned by restart");

        let now = Utc::now();
        let mut resumed = 0u32;
        let mut requeued = 0u32;
        let mut failed = 0u32;

        for job in orphaned {
            let age = now - job.updated_at;
            let within_horizon = age < horizon;

            match (&job.status, &job.operation_name) {
                (JobStatus::Queued, Some(operation_name)) if within_horizon => {
                    let Some((token_value, token_id)) = self.polling_credential(&job).await else {
                        self.fail_orphan(&job.id, &mut failed).await;
                        continue;
                    };
                    self.polling.enqueue_status_check(PollTask {
                        job_id: job.id.clone(),
                        user_id: job.user_id.clone(),
                        prompt: job.prompt.clone(),
                        aspect_ratio: job.aspect_ratio,
                        operation_name: operation_name.clone(),
                        scene_id: job
                            .scene_id
                            .clone()
                            .unwrap_or_else(|| format!("recovered-{}", job.id)),
                        token_value,
                        token_id,
                        reference_image: None,
                    });
                    resumed += 1;
                }
                (JobStatus::Pending, _) if within_horizon => {
                    self.submission.enqueue(
                        vec![QueuedJob {
                            job_id: job.id.clone(),
                            user_id: job.user_id.clone(),
                            prompt: job.prompt.clone(),
                            aspect_ratio: job.aspect_ratio,
                            scene_number: 0,
                            reference_image: None,
                        }],
                        None,
                    );
                    requeued += 1;
                }
                _ => {
                    self.fail_orphan(&job.id, &mut failed).await;
                }
            }
        }

        info!(
            resumed = resumed,
            requeued = requeued,
            failed = failed,
            "Recovery complete"
        );
    }

    /// Credential for resuming a recovered job: its recorded token when it
    /// still exists, otherwise a rotation token, otherwise the fallback.
    async fn polling_credential(
        &self,
        job: &vgen_models::VideoJob,
    ) -> Option<(String, Option<vgen_models::TokenId>)> {
        if let Some(id) = &job.token_used {
            if let Ok(Some(token)) = TokenRepo::get(self.ctx.db.pool(), id).await {
                return Some((token.token, Some(token.id)));
            }
        }
        match self.ctx.tokens.next_rotation_token().await {
            Ok(Some(token)) => Some((token.token.clone(), Some(token.id))),
            _ => self
                .ctx
                .config
                .fallback_token
                .clone()
                .map(|fallback| (fallback, None)),
        }
    }

    async fn fail_orphan(&self, job_id: &vgen_models::JobId, counter: &mut u32) {
        if let Err(e) = JobRepo::mark_failed(
            self.ctx.db.pool(),
            job_id,
            "Job was orphaned by a restart and could not be resumed",
        )
        .await
        {
            warn!(job_id = %job_id, "Failed to mark orphan: {}", e);
        }
        *counter += 1;
    }
}
