//! Submission queue.
//!
//! In-memory FIFO of pending jobs, drained by a single driver task that
//! paces upstream submissions: one batch of `videos_per_batch` jobs at a
//! time, chunked into at most `max_concurrent_submissions` concurrent
//! submits, with a plan-specific delay between batches. Failed submissions
//! retry up to twice with a short delay.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::future::join_all;
use tracing::{info, warn};

use vgen_db::{JobRepo, JobUpdate, SettingsRepo};
use vgen_models::{AspectRatio, JobId, JobStatus, TokenId, TokenSettings};
use vgen_tokens::PoolError;

use crate::context::Context;
use crate::logging::JobLogger;
use crate::polling::{PollTask, PollingCoordinator, ReferenceImageInput};

/// Correlation id for one submission attempt. A re-submission mints a new
/// one so stale status responses can be told apart.
pub(crate) fn new_scene_id(job_id: &JobId) -> String {
    format!("bulk-{}-{}", job_id, Utc::now().timestamp_millis())
}

/// One queued submission.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job_id: JobId,
    pub user_id: String,
    pub prompt: String,
    pub aspect_ratio: AspectRatio,
    /// Position within the originating bulk request, used for operator logs
    /// and scene-number token selection on regenerate.
    pub scene_number: u32,
    pub reference_image: Option<ReferenceImageInput>,
}

/// Paced, bounded-concurrency feeder of upstream submissions.
pub struct SubmissionQueue {
    ctx: Arc<Context>,
    polling: Arc<PollingCoordinator>,
    queue: Mutex<VecDeque<QueuedJob>>,
    processing: Mutex<bool>,
    delay_override: Mutex<Option<u64>>,
}

impl SubmissionQueue {
    pub fn new(ctx: Arc<Context>, polling: Arc<PollingCoordinator>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            polling,
            queue: Mutex::new(VecDeque::new()),
            processing: Mutex::new(false),
            delay_override: Mutex::new(None),
        })
    }

    /// Append jobs and start the driver if it is idle. A plan-specific
    /// delay override replaces the stored pacing default for this
    /// activation.
    pub fn enqueue(self: &Arc<Self>, jobs: Vec<QueuedJob>, delay_seconds_override: Option<u64>) {
        if jobs.is_empty() {
            return;
        }
        {
            let mut queue = self.queue.lock().unwrap();
            queue.extend(jobs);
        }
        if let Some(delay) = delay_seconds_override {
            *self.delay_override.lock().unwrap() = Some(delay);
        }
        self.ensure_driver();
    }

    /// Number of jobs waiting to be submitted.
    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    fn ensure_driver(self: &Arc<Self>) {
        {
            let mut processing = self.processing.lock().unwrap();
            if *processing {
                return;
            }
            *processing = true;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_driver().await;
        });
    }

    /// Driver loop. Pacing settings are read once per activation.
    async fn run_driver(self: Arc<Self>) {
        let settings = match SettingsRepo::get_or_init(self.ctx.db.pool()).await {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to read token settings, using defaults: {}", e);
                TokenSettings::default()
            }
        };
        let batch_size = settings.videos_per_batch.max(1) as usize;
        let delay_seconds = self
            .delay_override
            .lock()
            .unwrap()
            .unwrap_or(settings.batch_delay_seconds.max(0) as u64);

        info!(
            batch_size = batch_size,
            delay_seconds = delay_seconds,
            "Submission driver started"
        );

        loop {
            let batch: Vec<QueuedJob> = {
                let mut queue = self.queue.lock().unwrap();
                let take = batch_size.min(queue.len());
                queue.drain(..take).collect()
            };

            if batch.is_empty() {
                // Re-check under the processing flag so an enqueue racing
                // with shutdown is not stranded.
                let mut processing = self.processing.lock().unwrap();
                if self.queue.lock().unwrap().is_empty() {
                    *processing = false;
                    *self.delay_override.lock().unwrap() = None;
                    info!("Submission queue drained, driver stopping");
                    return;
                }
                continue;
            }

            info!(batch = batch.len(), "Submitting batch");

            for chunk in batch.chunks(self.ctx.config.max_concurrent_submissions.max(1)) {
                join_all(chunk.iter().map(|job| self.submit_one(job))).await;
            }

            if !self.queue.lock().unwrap().is_empty() {
                tokio::time::sleep(std::time::Duration::from_secs(delay_seconds)).await;
            }
        }
    }

    /// Submit one job upstream and hand it to the polling coordinator.
    async fn submit_one(self: &Arc<Self>, job: &QueuedJob) {
        let logger = JobLogger::new(&job.job_id, "submission");

        // Credential: pool first, environment fallback when empty.
        let (token_value, token_id): (String, Option<TokenId>) =
            match self.ctx.tokens.dispense().await {
                Ok(token) => (token.token.clone(), Some(token.id.clone())),
                Err(PoolError::NoTokensAvailable) => match &self.ctx.config.fallback_token {
                    Some(fallback) => {
                        logger.warning("Token pool empty, using fallback credential");
                        (fallback.clone(), None)
                    }
                    None => {
                        self.handle_failure(job, "No API tokens available", None).await;
                        return;
                    }
                },
                Err(PoolError::Db(e)) => {
                    self.handle_failure(job, &format!("Token dispense failed: {}", e), None)
                        .await;
                    return;
                }
            };

        let scene_id = new_scene_id(&job.job_id);
        let submitted = match &job.reference_image {
            Some(image) => {
                self.ctx
                    .upstream
                    .submit_reference_image(
                        &token_value,
                        &job.prompt,
                        job.aspect_ratio,
                        &scene_id,
                        &image.image_id,
                        &image.mime_type,
                    )
                    .await
            }
            None => {
                self.ctx
                    .upstream
                    .submit_text(&token_value, &job.prompt, job.aspect_ratio, &scene_id)
                    .await
            }
        };

        let operation = match submitted {
            Ok(op) => op,
            Err(e) => {
                self.handle_failure(job, &format!("Upstream submit failed: {}", e), token_id.as_ref())
                    .await;
                return;
            }
        };

        let mut update = JobUpdate::default()
            .status(JobStatus::Queued)
            .operation_name(operation.operation_name.clone())
            .scene_id(operation.scene_id.clone());
        if let Some(id) = &token_id {
            update = update.token_used(id.clone());
        }

        let persisted = self
            .ctx
            .db
            .retrying("job_submit_accept", || {
                let update = update.clone();
                let job_id = job.job_id.clone();
                async move {
                    JobRepo::update_fields(self.ctx.db.pool(), &job_id, None, update).await
                }
            })
            .await;

        if let Err(e) = persisted {
            self.handle_failure(
                job,
                &format!("Failed to persist accepted submission: {}", e),
                token_id.as_ref(),
            )
            .await;
            return;
        }

        logger.progress("Submission accepted, polling started");
        self.polling.enqueue_status_check(PollTask {
            job_id: job.job_id.clone(),
            user_id: job.user_id.clone(),
            prompt: job.prompt.clone(),
            aspect_ratio: job.aspect_ratio,
            operation_name: operation.operation_name,
            scene_id: operation.scene_id,
            token_value,
            token_id,
            reference_image: job.reference_image.clone(),
        });
    }

    /// Route a failed submission: retry with delay while retries remain,
    /// otherwise fail the job terminally. The token involved takes an
    /// error either way.
    pub(crate) async fn handle_failure(
        self: &Arc<Self>,
        job: &QueuedJob,
        message: &str,
        token_id: Option<&TokenId>,
    ) {
        let logger = JobLogger::new(&job.job_id, "submission");

        if let Some(id) = token_id {
            self.ctx.tokens.record_error(id);
        }

        // The row's counter is authoritative; re-enqueued copies of the job
        // do not carry it.
        let retry_count = match JobRepo::get(self.ctx.db.pool(), &job.job_id).await {
            Ok(Some(row)) => row.retry_count,
            Ok(None) => {
                logger.failure("Job row disappeared, dropping");
                return;
            }
            Err(e) => {
                logger.warning(&format!("Could not read retry count: {}", e));
                self.ctx.config.job_max_retries
            }
        };

        let max_retries = self.ctx.config.job_max_retries;
        if retry_count < max_retries {
            let next = retry_count + 1;
            let annotated = retry_annotation(message, next, max_retries);
            let update = JobUpdate::default()
                .retry_count(next)
                .error_message(annotated.clone());
            if let Err(e) = JobRepo::update_fields(self.ctx.db.pool(), &job.job_id, None, update).await
            {
                logger.warning(&format!("Failed to record retry: {}", e));
            }
            logger.warning(&annotated);

            let this = Arc::clone(self);
            let job = job.clone();
            let delay = self.ctx.config.retry_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                this.enqueue(vec![job], None);
            });
        } else {
            logger.failure(message);
            let result = self
                .ctx
                .db
                .retrying("job_submit_fail", || {
                    let job_id = job.job_id.clone();
                    let message = message.to_string();
                    async move {
                        JobRepo::mark_failed(self.ctx.db.pool(), &job_id, &message).await
                    }
                })
                .await;
            if let Err(e) = result {
                logger.warning(&format!("Failed to persist terminal failure: {}", e));
            }
        }
    }
}

/// Error message recorded while a submission still has retries left.
fn retry_annotation(message: &str, attempt: i32, max_retries: i32) -> String {
    format!("{} (Retry {}/{})", message, attempt, max_retries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_annotation_format() {
        assert_eq!(
            retry_annotation("Upstream submit failed: HTTP 500", 2, 2),
            "Upstream submit failed: HTTP 500 (Retry 2/2)"
        );
        assert_eq!(retry_annotation("timeout", 1, 2), "timeout (Retry 1/2)");
    }

    #[test]
    fn test_scene_id_format() {
        let job_id = JobId::from_string("j-123");
        let scene = new_scene_id(&job_id);
        assert!(scene.starts_with("bulk-j-123-"));
        // Trailing component is the millisecond timestamp.
        let suffix = scene.rsplit('-').next().unwrap();
        assert!(suffix.parse::<i64>().is_ok());
    }

    #[test]
    fn test_chunking_matches_concurrency_cap() {
        // A 10-job batch with cap 8 submits as chunks of 8 and 2.
        let jobs: Vec<u32> = (0..10).collect();
        let chunks: Vec<&[u32]> = jobs.chunks(8).collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 8);
        assert_eq!(chunks[1].len(), 2);
    }
}
