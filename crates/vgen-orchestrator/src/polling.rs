//! Polling coordinator.
//!
//! Drives every accepted job to a terminal state with a bounded worker
//! pool. Each worker polls one job at a time: initial delay, then status
//! checks on a fixed interval with exponential backoff under consecutive
//! transient failures, a heartbeat touch on the job row, one mid-flight
//! token switch, and an at-most-once artifact upload deduplicated per
//! scene id through shared futures.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use rand::Rng;
use tokio::time::Instant;
use tracing::{info, warn};

use vgen_db::JobRepo;
use vgen_models::{AspectRatio, JobId, TokenId};
use vgen_upstream::{OperationEntry, SubmittedOperation};

use crate::context::Context;
use crate::logging::JobLogger;
use crate::submission::new_scene_id;

/// Upper bound on the failure backoff between polls.
const MAX_FAILURE_BACKOFF: Duration = Duration::from_secs(120);

/// Reference image attached to an image-to-video job, needed again if the
/// job is re-submitted mid flight.
#[derive(Debug, Clone)]
pub struct ReferenceImageInput {
    pub image_id: String,
    pub mime_type: String,
}

/// One job handed to the polling pool.
#[derive(Debug, Clone)]
pub struct PollTask {
    pub job_id: JobId,
    pub user_id: String,
    pub prompt: String,
    pub aspect_ratio: AspectRatio,
    pub operation_name: String,
    pub scene_id: String,
    /// Credential polled with; not necessarily a pool token (may be the
    /// environment fallback, in which case `token_id` is `None`).
    pub token_value: String,
    pub token_id: Option<TokenId>,
    pub reference_image: Option<ReferenceImageInput>,
}

/// Outcome type carried by the shared upload futures. `String` errors keep
/// the future cloneable for every waiter.
type SharedUpload = Shared<BoxFuture<'static, Result<String, String>>>;

/// Worker-pool coordinator for in-flight jobs.
pub struct PollingCoordinator {
    ctx: Arc<Context>,
    queue: Mutex<VecDeque<PollTask>>,
    active_workers: Mutex<usize>,
    uploads: Mutex<HashMap<String, SharedUpload>>,
}

impl PollingCoordinator {
    pub fn new(ctx: Arc<Context>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            queue: Mutex::new(VecDeque::new()),
            active_workers: Mutex::new(0),
            uploads: Mutex::new(HashMap::new()),
        })
    }

    /// Queue a job for polling and spin up workers to the cap.
    pub fn enqueue_status_check(self: &Arc<Self>, task: PollTask) {
        self.queue.lock().unwrap().push_back(task);
        self.spawn_workers();
    }

    /// Number of jobs waiting for a worker.
    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    fn spawn_workers(self: &Arc<Self>) {
        loop {
            let task = {
                let mut active = self.active_workers.lock().unwrap();
                if *active >= self.ctx.config.max_concurrent_workers {
                    return;
                }
                let Some(task) = self.pop_task() else { return };
                *active += 1;
                task
            };

            let this = Arc::clone(self);
            tokio::spawn(async move {
                this.run_worker(task).await;
            });
        }
    }

    fn pop_task(&self) -> Option<PollTask> {
        self.queue.lock().unwrap().pop_front()
    }

    /// Worker loop: poll the assigned job, then keep draining the queue.
    /// The trailing block mirrors a `finally`: the worker slot is always
    /// released and the pool refilled, whatever happened inside.
    async fn run_worker(self: Arc<Self>, first: PollTask) {
        let mut current = Some(first);
        while let Some(task) = current {
            let job_id = task.job_id.clone();
            let logger = JobLogger::new(&job_id, "polling");
            if let Err(e) = self.poll_to_terminal(task).await {
                // Uncaught error: the job must still reach a terminal state.
                logger.failure(&format!("Polling aborted: {}", e));
                self.fail_job(&job_id, &format!("Internal error: {}", e)).await;
            }
            current = self.pop_task();
        }

        {
            let mut active = self.active_workers.lock().unwrap();
            *active -= 1;
        }
        self.spawn_workers();
    }

    /// Poll one job until completion, failure, or attempt exhaustion.
    async fn poll_to_terminal(
        &self,
        mut task: PollTask,
    ) -> Result<(), crate::error::OrchestratorError> {
        let config = &self.ctx.config;
        let logger = JobLogger::new(&task.job_id, "polling");

        tokio::time::sleep(config.initial_poll_delay).await;

        let mut consecutive_failures: u32 = 0;
        let mut token_switched = false;
        let mut last_heartbeat = Instant::now();

        for attempt in 0..config.max_poll_attempts {
            if attempt > 0 {
                let wait = if consecutive_failures == 0 {
                    config.poll_interval
                } else {
                    failure_backoff(config.poll_interval, consecutive_failures)
                };
                tokio::time::sleep(wait).await;
            }

            if last_heartbeat.elapsed() >= config.heartbeat_interval {
                if let Err(e) = JobRepo::touch(self.ctx.db.pool(), &task.job_id).await {
                    logger.warning(&format!("Heartbeat write failed: {}", e));
                }
                last_heartbeat = Instant::now();
            }

            if attempt == config.token_retry_attempt && !token_switched {
                token_switched = true;
                self.switch_token(&mut task).await;
            }

            match self
                .ctx
                .upstream
                .check_status(&task.token_value, &task.operation_name, &task.scene_id)
                .await
            {
                Ok(entry) => {
                    if let Some(error) = &entry.error {
                        // Permanent upstream failure.
                        if let Some(id) = &task.token_id {
                            self.ctx.tokens.record_error(id);
                        }
                        let message = if error.message.is_empty() {
                            "Upstream reported an unspecified generation error".to_string()
                        } else {
                            error.message.clone()
                        };
                        logger.failure(&format!("Upstream error: {}", message));
                        self.fail_job(&task.job_id, &message).await;
                        return Ok(());
                    }

                    if let Some(url) = completed_video_url(&entry) {
                        logger.progress("Generation complete, re-hosting artifact");
                        match self.upload_deduped(&task.scene_id, &url).await {
                            Ok(hosted) => self.complete_job(&task.job_id, &hosted).await,
                            Err(message) => {
                                logger.failure(&format!("Artifact upload failed: {}", message));
                                self.fail_job(
                                    &task.job_id,
                                    &format!("Failed to store video: {}", message),
                                )
                                .await;
                            }
                        }
                        return Ok(());
                    }

                    // Still pending (or complete without a URL yet).
                    consecutive_failures = 0;
                }
                Err(e) if e.is_transient() => {
                    consecutive_failures += 1;
                    logger.warning(&format!(
                        "Transient status failure ({} in a row): {}",
                        consecutive_failures, e
                    ));
                }
                Err(e) => {
                    // A definite (non-5xx) answer resets the failure streak.
                    consecutive_failures = 0;
                    logger.warning(&format!("Status check returned: {}", e));
                }
            }
        }

        let message = format!(
            "Video generation timed out after {} seconds ({} attempts)",
            config.poll_timeout_secs(),
            config.max_poll_attempts
        );
        logger.failure(&message);
        self.fail_job(&task.job_id, &message).await;
        Ok(())
    }

    /// One-time mid-flight token switch: the current token takes an error,
    /// a fresh rotation token re-submits the prompt under a new scene id,
    /// and polling continues against the new operation. Best-effort; on any
    /// failure the old operation keeps being polled.
    async fn switch_token(&self, task: &mut PollTask) {
        let logger = JobLogger::new(&task.job_id, "polling");

        if let Some(id) = &task.token_id {
            self.ctx.tokens.record_error(id);
        }

        let replacement = match self.ctx.tokens.next_rotation_token().await {
            Ok(Some(token)) => token,
            Ok(None) => {
                logger.warning("No rotation token available, keeping current token");
                return;
            }
            Err(e) => {
                logger.warning(&format!("Rotation dispense failed: {}", e));
                return;
            }
        };

        let scene_id = new_scene_id(&task.job_id);
        let submitted = match &task.reference_image {
            Some(image) => {
                self.ctx
                    .upstream
                    .submit_reference_image(
                        &replacement.token,
                        &task.prompt,
                        task.aspect_ratio,
                        &scene_id,
                        &image.image_id,
                        &image.mime_type,
                    )
                    .await
            }
            None => {
                self.ctx
                    .upstream
                    .submit_text(&replacement.token, &task.prompt, task.aspect_ratio, &scene_id)
                    .await
            }
        };

        let SubmittedOperation { operation_name, scene_id } = match submitted {
            Ok(op) => op,
            Err(e) => {
                logger.warning(&format!("Re-submission with new token failed: {}", e));
                return;
            }
        };

        let job_id = task.job_id.clone();
        let update = vgen_db::JobUpdate::default()
            .operation_name(operation_name.clone())
            .scene_id(scene_id.clone())
            .token_used(replacement.id.clone());
        if let Err(e) = self
            .ctx
            .db
            .retrying("job_token_switch", || {
                let update = update.clone();
                let job_id = job_id.clone();
                async move {
                    JobRepo::update_fields(self.ctx.db.pool(), &job_id, None, update).await
                }
            })
            .await
        {
            logger.warning(&format!("Failed to persist token switch: {}", e));
        }

        info!(
            job_id = %task.job_id,
            new_token = %replacement.id,
            new_scene = %scene_id,
            "Switched token mid-flight"
        );

        task.operation_name = operation_name;
        task.scene_id = scene_id;
        task.token_value = replacement.token;
        task.token_id = Some(replacement.id);
    }

    /// At-most-once artifact upload per scene. The first caller installs a
    /// shared future; concurrent callers await the same one and observe the
    /// same hosted URL. A failed upload clears the slot so a later event
    /// can retry.
    pub async fn upload_deduped(&self, scene_id: &str, upstream_url: &str) -> Result<String, String> {
        let media = self.ctx.media.clone();
        let url = upstream_url.to_string();
        let (upload, _) = self.join_upload(scene_id, move || {
            async move { media.upload_video(&url).await.map_err(|e| e.to_string()) }.boxed()
        });
        self.settle_upload(scene_id, upload).await
    }

    /// First-caller-wins join on the per-scene upload map. Returns the
    /// shared future and whether this caller installed it.
    fn join_upload<F>(&self, scene_id: &str, make: F) -> (SharedUpload, bool)
    where
        F: FnOnce() -> BoxFuture<'static, Result<String, String>>,
    {
        let mut uploads = self.uploads.lock().unwrap();
        if let Some(existing) = uploads.get(scene_id) {
            (existing.clone(), false)
        } else {
            let fut = make().shared();
            uploads.insert(scene_id.to_string(), fut.clone());
            (fut, true)
        }
    }

    /// Await a shared upload; a failure evicts the map entry so a later
    /// completion event can try again.
    async fn settle_upload(&self, scene_id: &str, upload: SharedUpload) -> Result<String, String> {
        let result = upload.await;
        if result.is_err() {
            self.uploads.lock().unwrap().remove(scene_id);
        }
        result
    }

    pub(crate) async fn complete_job(&self, job_id: &JobId, hosted_url: &str) {
        let result = self
            .ctx
            .db
            .retrying("job_complete", || async move {
                JobRepo::mark_completed(self.ctx.db.pool(), job_id, hosted_url).await
            })
            .await;
        match result {
            Ok(true) => info!(job_id = %job_id, hosted_url = %hosted_url, "Job completed"),
            Ok(false) => warn!(job_id = %job_id, "Job already terminal, completion ignored"),
            Err(e) => warn!(job_id = %job_id, "Failed to persist completion: {}", e),
        }
    }

    pub(crate) async fn fail_job(&self, job_id: &JobId, message: &str) {
        let result = self
            .ctx
            .db
            .retrying("job_fail", || async move {
                JobRepo::mark_failed(self.ctx.db.pool(), job_id, message).await
            })
            .await;
        if let Err(e) = result {
            warn!(job_id = %job_id, "Failed to persist failure: {}", e);
        }
    }
}

/// Hosted-artifact URL if the entry reports a completed status.
fn completed_video_url(entry: &OperationEntry) -> Option<String> {
    if entry.is_complete() {
        entry.video_url()
    } else {
        None
    }
}

/// Backoff after `k` consecutive polling failures:
/// `min(interval * 2^(k-1) + jitter, 120 s)`.
fn failure_backoff(poll_interval: Duration, consecutive_failures: u32) -> Duration {
    let exp = poll_interval
        .as_millis()
        .saturating_mul(1u128 << (consecutive_failures - 1).min(16));
    let jitter = rand::rng().random_range(0..1_000) as u128;
    let total = (exp + jitter).min(MAX_FAILURE_BACKOFF.as_millis());
    Duration::from_millis(total as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use sqlx::postgres::PgPoolOptions;

    use vgen_db::Db;
    use vgen_media::{MediaHostConfig, MediaUploader};
    use vgen_tokens::{TokenPool, TokenPoolConfig};
    use vgen_upstream::{UpstreamClient, UpstreamConfig};

    use crate::config::OrchestratorConfig;

    /// Coordinator over inert collaborators; only the in-memory state is
    /// exercised.
    fn test_coordinator() -> Arc<PollingCoordinator> {
        let pg = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/vgen_test")
            .unwrap();
        let db = Db::new(pg, vgen_db::RetryConfig::default());
        let tokens = TokenPool::new(db.clone(), TokenPoolConfig::default());
        let upstream = UpstreamClient::new(UpstreamConfig::default()).unwrap();
        let media = MediaUploader::new(MediaHostConfig {
            video_endpoint: "http://127.0.0.1:9/upload/video".to_string(),
            image_endpoint: "http://127.0.0.1:9/upload/image".to_string(),
            upload_preset: "unsigned".to_string(),
            retry: vgen_media::RetryConfig::default(),
        })
        .unwrap();
        PollingCoordinator::new(Arc::new(Context::new(
            db,
            tokens,
            upstream,
            media,
            OrchestratorConfig::default(),
        )))
    }

    #[tokio::test]
    async fn test_upload_dedup_runs_once_per_scene() {
        let coordinator = test_coordinator();
        let calls = Arc::new(AtomicUsize::new(0));

        let make = |calls: Arc<AtomicUsize>| {
            move || {
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("https://media.example.com/v/abc.mp4".to_string())
                }
                .boxed()
            }
        };

        let (first, installed_first) = coordinator.join_upload("scene-1", make(calls.clone()));
        let (second, installed_second) = coordinator.join_upload("scene-1", make(calls.clone()));
        assert!(installed_first);
        assert!(!installed_second);

        let (r1, r2) = futures::join!(
            coordinator.settle_upload("scene-1", first),
            coordinator.settle_upload("scene-1", second)
        );
        assert_eq!(r1.unwrap(), "https://media.example.com/v/abc.mp4");
        assert_eq!(r2.unwrap(), "https://media.example.com/v/abc.mp4");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_upload_clears_entry_for_retry() {
        let coordinator = test_coordinator();

        let (failing, _) = coordinator
            .join_upload("scene-2", || async { Err("ECONNRESET".to_string()) }.boxed());
        assert!(coordinator.settle_upload("scene-2", failing).await.is_err());

        // The slot is free again, so a later completion event retries.
        let (_, installed) = coordinator
            .join_upload("scene-2", || async { Ok("https://x".to_string()) }.boxed());
        assert!(installed);
    }

    #[tokio::test]
    async fn test_distinct_scenes_upload_independently() {
        let coordinator = test_coordinator();
        let (_, a) = coordinator.join_upload("scene-a", || async { Ok("a".to_string()) }.boxed());
        let (_, b) = coordinator.join_upload("scene-b", || async { Ok("b".to_string()) }.boxed());
        assert!(a);
        assert!(b);
    }

    #[test]
    fn test_failure_backoff_doubles_and_caps() {
        let interval = Duration::from_secs(15);
        // k=1: ~15s, k=2: ~30s, k=3: ~60s, k=4+: capped at 120s
        let b1 = failure_backoff(interval, 1);
        assert!((15_000..16_000).contains(&(b1.as_millis() as u64)));
        let b2 = failure_backoff(interval, 2);
        assert!((30_000..31_000).contains(&(b2.as_millis() as u64)));
        let b4 = failure_backoff(interval, 4);
        assert_eq!(b4, MAX_FAILURE_BACKOFF);
        let b10 = failure_backoff(interval, 10);
        assert_eq!(b10, MAX_FAILURE_BACKOFF);
    }

    #[test]
    fn test_completed_video_url_requires_terminal_status() {
        let pending: OperationEntry = serde_json::from_value(json!({
            "status": "MEDIA_GENERATION_STATUS_PENDING",
            "videoUrl": "https://cdn.example.com/v.mp4"
        }))
        .unwrap();
        assert!(completed_video_url(&pending).is_none());

        let done: OperationEntry = serde_json::from_value(json!({
            "status": "MEDIA_GENERATION_STATUS_COMPLETE",
            "videoUrl": "https://cdn.example.com/v.mp4?a=1&amp;b=2"
        }))
        .unwrap();
        assert_eq!(
            completed_video_url(&done).unwrap(),
            "https://cdn.example.com/v.mp4?a=1&b=2"
        );
    }
}
