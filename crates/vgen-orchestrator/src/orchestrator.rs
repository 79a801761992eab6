//! External facade of the core.
//!
//! The transport layer (HTTP routing, session auth) is an external
//! collaborator; these methods are the operations it calls into. Every
//! operation validates input, consults the plan enforcer, and leaves the
//! job row as the single durable source of truth.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use base64::Engine;

use vgen_db::{JobRepo, JobUpdate, SettingsRepo, TokenRepo, UserRepo};
use vgen_models::{
    access, AspectRatio, JobId, JobStatus, TokenId, Tool, User, VideoJob,
};
use vgen_tokens::PoolError;

use crate::context::Context;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::housekeeper::Housekeeper;
use crate::polling::{PollTask, PollingCoordinator, ReferenceImageInput};
use crate::submission::{new_scene_id, QueuedJob, SubmissionQueue};

/// Prompt length bounds accepted by every submission path.
const PROMPT_MIN_LEN: usize = 10;
const PROMPT_MAX_LEN: usize = 2_000;

/// Hard cap on prompts per bulk request, independent of plan.
const MAX_BULK_PROMPTS: usize = 100;

/// Result of a synchronous submission.
#[derive(Debug, Clone)]
pub struct SingleSubmission {
    pub job_id: JobId,
    pub operation_name: String,
    pub scene_id: String,
    pub token_id: Option<TokenId>,
}

/// Result of a single-shot status check.
#[derive(Debug, Clone)]
pub struct StatusCheck {
    pub status: JobStatus,
    pub video_url: Option<String>,
    pub error_message: Option<String>,
}

/// The assembled core: collaborators plus the two queues and the
/// housekeeper, wired once at startup.
pub struct Orchestrator {
    ctx: Arc<Context>,
    submission: Arc<SubmissionQueue>,
    polling: Arc<PollingCoordinator>,
    housekeeper: Arc<Housekeeper>,
}

impl Orchestrator {
    pub fn new(ctx: Context) -> Self {
        let ctx = Arc::new(ctx);
        let polling = PollingCoordinator::new(Arc::clone(&ctx));
        let submission = SubmissionQueue::new(Arc::clone(&ctx), Arc::clone(&polling));
        let housekeeper = Housekeeper::new(
            Arc::clone(&ctx),
            Arc::clone(&submission),
            Arc::clone(&polling),
        );
        Self {
            ctx,
            submission,
            polling,
            housekeeper,
        }
    }

    /// Run startup recovery and start the housekeeper loop. Call once.
    pub async fn start(&self) {
        self.housekeeper.recover_orphaned_jobs().await;
        let housekeeper = Arc::clone(&self.housekeeper);
        tokio::spawn(async move {
            housekeeper.run().await;
        });
    }

    /// Create and enqueue a batch of jobs. Returns the job ids in prompt
    /// order.
    pub async fn submit_bulk(
        &self,
        user_id: &str,
        prompts: Vec<String>,
        aspect_ratio: AspectRatio,
    ) -> OrchestratorResult<Vec<JobId>> {
        if prompts.is_empty() || prompts.len() > MAX_BULK_PROMPTS {
            return Err(OrchestratorError::validation(format!(
                "Between 1 and {} prompts are accepted per request",
                MAX_BULK_PROMPTS
            )));
        }
        for (i, prompt) in prompts.iter().enumerate() {
            validate_prompt(prompt)
                .map_err(|e| OrchestratorError::validation(format!("Prompt {}: {}", i + 1, e)))?;
        }

        let user = self.load_user(user_id).await?;
        let check = access::can_bulk_generate(&user, prompts.len(), Utc::now());
        if !check.allowed {
            return Err(OrchestratorError::authorization(
                check.reason.unwrap_or_else(|| "Bulk generation denied".to_string()),
            ));
        }

        let jobs: Vec<VideoJob> = prompts
            .iter()
            .map(|p| VideoJob::new(user_id, p.clone(), aspect_ratio))
            .collect();
        let created = self
            .ctx
            .db
            .retrying("bulk_create_jobs", || {
                let jobs = jobs.clone();
                async move { JobRepo::create_many(self.ctx.db.pool(), &jobs).await }
            })
            .await?;

        let created_count = created.len() as i32;
        self.ctx
            .db
            .retrying("bulk_increment_daily", || async move {
                UserRepo::increment_daily_count(self.ctx.db.pool(), user_id, created_count).await
            })
            .await?;

        let bulk = access::batch_config(&user);
        let queued: Vec<QueuedJob> = created
            .iter()
            .enumerate()
            .map(|(i, job)| QueuedJob {
                job_id: job.id.clone(),
                user_id: user_id.to_string(),
                prompt: job.prompt.clone(),
                aspect_ratio,
                scene_number: i as u32 + 1,
                reference_image: None,
            })
            .collect();

        info!(
            user_id = %user_id,
            jobs = queued.len(),
            delay_seconds = bulk.delay_seconds,
            "Bulk request accepted"
        );
        self.submission.enqueue(queued, Some(bulk.delay_seconds));

        Ok(created.into_iter().map(|j| j.id).collect())
    }

    /// Synchronous single submission: the upstream handle is returned to
    /// the caller and polling continues internally.
    pub async fn submit_single(
        &self,
        user_id: &str,
        prompt: &str,
        aspect_ratio: AspectRatio,
    ) -> OrchestratorResult<SingleSubmission> {
        validate_prompt(prompt).map_err(OrchestratorError::validation)?;

        let user = self.load_user(user_id).await?;
        self.require_tool(&user, Tool::Veo)?;
        let quota = access::can_generate_video(&user, Utc::now());
        if !quota.allowed {
            return Err(OrchestratorError::authorization(
                quota.reason.unwrap_or_else(|| "Generation denied".to_string()),
            ));
        }

        let job = VideoJob::new(user_id, prompt, aspect_ratio);
        let job = self
            .ctx
            .db
            .retrying("single_create_job", || {
                let job = job.clone();
                async move { JobRepo::create(self.ctx.db.pool(), &job).await }
            })
            .await?;
        self.ctx
            .db
            .retrying("single_increment_daily", || async move {
                UserRepo::increment_daily_count(self.ctx.db.pool(), user_id, 1).await
            })
            .await?;

        self.submit_now(job, None).await
    }

    /// Two-stage image-to-video submission: upload the reference image
    /// upstream, then submit against the reference-image model.
    pub async fn submit_image_to_video(
        &self,
        user_id: &str,
        image_bytes: Vec<u8>,
        mime_type: &str,
        prompt: &str,
        aspect_ratio: AspectRatio,
    ) -> OrchestratorResult<SingleSubmission> {
        validate_prompt(prompt).map_err(OrchestratorError::validation)?;
        if image_bytes.is_empty() {
            return Err(OrchestratorError::validation("Image payload is empty"));
        }

        let user = self.load_user(user_id).await?;
        self.require_tool(&user, Tool::ImageToVideo)?;
        let quota = access::can_generate_video(&user, Utc::now());
        if !quota.allowed {
            return Err(OrchestratorError::authorization(
                quota.reason.unwrap_or_else(|| "Generation denied".to_string()),
            ));
        }

        let (token_value, _token_id) = self.credential().await?;
        let uploaded = self
            .ctx
            .upstream
            .upload_image(&token_value, &image_bytes, mime_type)
            .await?;

        // Keep a stable copy of the reference image on the media host for
        // the job record; the upstream image id is what generation uses.
        let reference_url = match self.ctx.media.upload_image(image_bytes, mime_type).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(user_id = %user_id, "Reference image re-host failed: {}", e);
                None
            }
        };

        let mut job = VideoJob::new(user_id, prompt, aspect_ratio);
        job.reference_image_url = reference_url;
        let job = self
            .ctx
            .db
            .retrying("i2v_create_job", || {
                let job = job.clone();
                async move { JobRepo::create(self.ctx.db.pool(), &job).await }
            })
            .await?;
        self.ctx
            .db
            .retrying("i2v_increment_daily", || async move {
                UserRepo::increment_daily_count(self.ctx.db.pool(), user_id, 1).await
            })
            .await?;

        let reference = ReferenceImageInput {
            image_id: uploaded.image_id,
            mime_type: mime_type.to_string(),
        };
        self.submit_now(job, Some(reference)).await
    }

    /// Re-submit an existing job with a fresh scene id. In a bulk context
    /// the token comes from `scene_number mod N_active`; otherwise the
    /// batch dispenser decides.
    pub async fn regenerate(
        &self,
        user_id: &str,
        job_id: &JobId,
        prompt: &str,
        aspect_ratio: AspectRatio,
        scene_number: Option<u32>,
    ) -> OrchestratorResult<SingleSubmission> {
        validate_prompt(prompt).map_err(OrchestratorError::validation)?;

        let user = self.load_user(user_id).await?;
        self.require_tool(&user, Tool::Veo)?;

        let existing = JobRepo::get_for_user(self.ctx.db.pool(), job_id, user_id)
            .await?
            .ok_or_else(|| OrchestratorError::validation(format!("Unknown job {}", job_id)))?;

        let (token_value, token_id) = match scene_number {
            Some(n) => {
                let active = self.ctx.tokens.active_tokens().await?;
                if active.is_empty() {
                    match &self.ctx.config.fallback_token {
                        Some(fallback) => (fallback.clone(), None),
                        None => return Err(OrchestratorError::NoTokensAvailable),
                    }
                } else {
                    let token = &active[(n as usize) % active.len()];
                    (token.token.clone(), Some(token.id.clone()))
                }
            }
            None => self.credential().await?,
        };

        let scene_id = new_scene_id(&existing.id);
        let operation = self
            .ctx
            .upstream
            .submit_text(&token_value, prompt, aspect_ratio, &scene_id)
            .await
            .map_err(|e| {
                if let Some(id) = &token_id {
                    self.ctx.tokens.record_error(id);
                }
                OrchestratorError::from(e)
            })?;

        let mut update = JobUpdate::default()
            .status(JobStatus::Queued)
            .operation_name(operation.operation_name.clone())
            .scene_id(operation.scene_id.clone());
        if let Some(id) = &token_id {
            update = update.token_used(id.clone());
        }
        self.ctx
            .db
            .retrying("regenerate_persist", || {
                let update = update.clone();
                let job_id = existing.id.clone();
                async move {
                    JobRepo::update_fields(self.ctx.db.pool(), &job_id, None, update).await
                }
            })
            .await?;

        self.polling.enqueue_status_check(PollTask {
            job_id: existing.id.clone(),
            user_id: user_id.to_string(),
            prompt: prompt.to_string(),
            aspect_ratio,
            operation_name: operation.operation_name.clone(),
            scene_id: operation.scene_id.clone(),
            token_value,
            token_id: token_id.clone(),
            reference_image: None,
        });

        Ok(SingleSubmission {
            job_id: existing.id,
            operation_name: operation.operation_name,
            scene_id: operation.scene_id,
            token_id,
        })
    }

    /// Single-shot status check outside the coordinator loop. A completed
    /// response triggers the deduplicated upload path, so this and the
    /// polling worker can race safely.
    pub async fn check_status(
        &self,
        operation_name: &str,
        scene_id: &str,
        token_id: Option<&TokenId>,
        job_id: Option<&JobId>,
    ) -> OrchestratorResult<StatusCheck> {
        let token_value = match token_id {
            Some(id) => match TokenRepo::get(self.ctx.db.pool(), id).await? {
                Some(token) => token.token,
                None => self.credential().await?.0,
            },
            None => self.credential().await?.0,
        };

        let entry = self
            .ctx
            .upstream
            .check_status(&token_value, operation_name, scene_id)
            .await?;

        if let Some(error) = &entry.error {
            let message = if error.message.is_empty() {
                "Upstream reported an unspecified generation error".to_string()
            } else {
                error.message.clone()
            };
            if let Some(id) = token_id {
                self.ctx.tokens.record_error(id);
            }
            if let Some(job_id) = job_id {
                self.polling.fail_job(job_id, &message).await;
            }
            return Ok(StatusCheck {
                status: JobStatus::Failed,
                video_url: None,
                error_message: Some(message),
            });
        }

        if entry.is_complete() {
            if let Some(url) = entry.video_url() {
                return match self.polling.upload_deduped(scene_id, &url).await {
                    Ok(hosted) => {
                        if let Some(job_id) = job_id {
                            self.polling.complete_job(job_id, &hosted).await;
                        }
                        Ok(StatusCheck {
                            status: JobStatus::Completed,
                            video_url: Some(hosted),
                            error_message: None,
                        })
                    }
                    Err(message) => Ok(StatusCheck {
                        status: JobStatus::Queued,
                        video_url: None,
                        error_message: Some(format!("Upload failed: {}", message)),
                    }),
                };
            }
        }

        Ok(StatusCheck {
            status: JobStatus::Queued,
            video_url: None,
            error_message: None,
        })
    }

    /// A user's job history, newest first.
    pub async fn list_jobs(
        &self,
        user_id: &str,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> OrchestratorResult<Vec<VideoJob>> {
        Ok(JobRepo::list_for_user(self.ctx.db.pool(), user_id, limit, offset).await?)
    }

    /// Job counts per status (operator view).
    pub async fn job_counts(&self) -> OrchestratorResult<Vec<(JobStatus, i64)>> {
        Ok(JobRepo::count_by_status(self.ctx.db.pool()).await?)
    }

    /// Generate a still image from a prompt and re-host it. Returns the
    /// hosted image URL.
    pub async fn generate_image(
        &self,
        user_id: &str,
        prompt: &str,
    ) -> OrchestratorResult<String> {
        validate_prompt(prompt).map_err(OrchestratorError::validation)?;

        let user = self.load_user(user_id).await?;
        self.require_tool(&user, Tool::TextToImage)?;

        let (token_value, token_id) = self.credential().await?;
        let generated = match self.ctx.upstream.generate_image(&token_value, prompt).await {
            Ok(image) => image,
            Err(e) => {
                if let Some(id) = &token_id {
                    self.ctx.tokens.record_error(id);
                }
                return Err(e.into());
            }
        };

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(generated.encoded_image.as_bytes())
            .map_err(|e| {
                OrchestratorError::internal(format!("Undecodable image payload: {}", e))
            })?;
        Ok(self.ctx.media.upload_image(bytes, "image/png").await?)
    }

    /// Update submission pacing (admin operation).
    pub async fn update_pacing(
        &self,
        videos_per_batch: i32,
        batch_delay_seconds: i32,
    ) -> OrchestratorResult<()> {
        if videos_per_batch < 1 || batch_delay_seconds < 0 {
            return Err(OrchestratorError::validation(
                "videos_per_batch must be >= 1 and batch_delay_seconds >= 0",
            ));
        }
        SettingsRepo::update_pacing(self.ctx.db.pool(), videos_per_batch, batch_delay_seconds)
            .await?;
        Ok(())
    }

    /// Replace the token set (admin operation).
    pub async fn replace_tokens(&self, raw_tokens: Vec<String>) -> OrchestratorResult<usize> {
        let inserted = self
            .ctx
            .db
            .retrying("replace_tokens", || {
                let raw = raw_tokens.clone();
                async move { TokenRepo::replace_all(self.ctx.db.pool(), &raw).await }
            })
            .await?;
        Ok(inserted.len())
    }

    /// Register one token (admin operation).
    pub async fn add_token(&self, token: &str, label: &str) -> OrchestratorResult<TokenId> {
        if token.trim().is_empty() {
            return Err(OrchestratorError::validation("Token value is empty"));
        }
        let row = TokenRepo::insert(self.ctx.db.pool(), token.trim(), label).await?;
        Ok(row.id)
    }

    /// All tokens with their batch counters (admin view).
    pub async fn list_tokens(&self) -> OrchestratorResult<Vec<vgen_models::ApiToken>> {
        Ok(TokenRepo::list_all(self.ctx.db.pool()).await?)
    }

    /// Enable or disable a token (admin operation).
    pub async fn set_token_active(
        &self,
        token_id: &TokenId,
        active: bool,
    ) -> OrchestratorResult<()> {
        TokenRepo::set_active(self.ctx.db.pool(), token_id, active).await?;
        Ok(())
    }

    /// Remove a token (admin operation).
    pub async fn remove_token(&self, token_id: &TokenId) -> OrchestratorResult<bool> {
        Ok(TokenRepo::delete(self.ctx.db.pool(), token_id).await?)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Submit an already-created job row immediately (single-job paths).
    async fn submit_now(
        &self,
        job: VideoJob,
        reference_image: Option<ReferenceImageInput>,
    ) -> OrchestratorResult<SingleSubmission> {
        let (token_value, token_id) = self.credential().await?;

        let scene_id = new_scene_id(&job.id);
        let submitted = match &reference_image {
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
                if let Some(id) = &token_id {
                    self.ctx.tokens.record_error(id);
                }
                self.polling
                    .fail_job(&job.id, &format!("Upstream submit failed: {}", e))
                    .await;
                return Err(e.into());
            }
        };

        let mut update = JobUpdate::default()
            .status(JobStatus::Queued)
            .operation_name(operation.operation_name.clone())
            .scene_id(operation.scene_id.clone());
        if let Some(id) = &token_id {
            update = update.token_used(id.clone());
        }
        self.ctx
            .db
            .retrying("single_persist_accept", || {
                let update = update.clone();
                let job_id = job.id.clone();
                async move {
                    JobRepo::update_fields(self.ctx.db.pool(), &job_id, None, update).await
                }
            })
            .await?;

        self.polling.enqueue_status_check(PollTask {
            job_id: job.id.clone(),
            user_id: job.user_id.clone(),
            prompt: job.prompt.clone(),
            aspect_ratio: job.aspect_ratio,
            operation_name: operation.operation_name.clone(),
            scene_id: operation.scene_id.clone(),
            token_value,
            token_id: token_id.clone(),
            reference_image,
        });

        Ok(SingleSubmission {
            job_id: job.id,
            operation_name: operation.operation_name,
            scene_id: operation.scene_id,
            token_id,
        })
    }

    /// Batch-mode credential with environment fallback.
    async fn credential(&self) -> OrchestratorResult<(String, Option<TokenId>)> {
        match self.ctx.tokens.dispense().await {
            Ok(token) => Ok((token.token.clone(), Some(token.id))),
            Err(PoolError::NoTokensAvailable) => match &self.ctx.config.fallback_token {
                Some(fallback) => Ok((fallback.clone(), None)),
                None => Err(OrchestratorError::NoTokensAvailable),
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn load_user(&self, user_id: &str) -> OrchestratorResult<User> {
        UserRepo::get(self.ctx.db.pool(), user_id)
            .await?
            .ok_or_else(|| OrchestratorError::validation(format!("Unknown user {}", user_id)))
    }

    fn require_tool(&self, user: &User, tool: Tool) -> OrchestratorResult<()> {
        let check = access::can_access_tool(user, tool, Utc::now());
        if check.allowed {
            Ok(())
        } else {
            Err(OrchestratorError::authorization(
                check.reason.unwrap_or_else(|| "Tool access denied".to_string()),
            ))
        }
    }
}

/// Validate a generation prompt.
fn validate_prompt(prompt: &str) -> Result<String, String> {
    let trimmed = prompt.trim();
    if trimmed.len() < PROMPT_MIN_LEN {
        return Err(format!(
            "prompt must be at least {} characters",
            PROMPT_MIN_LEN
        ));
    }
    if trimmed.len() > PROMPT_MAX_LEN {
        return Err(format!(
            "prompt must be at most {} characters",
            PROMPT_MAX_LEN
        ));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_bounds() {
        assert!(validate_prompt("too short").is_err());
        assert!(validate_prompt("a cat surfing a big wave at sunset").is_ok());
        assert!(validate_prompt(&"x".repeat(PROMPT_MAX_LEN)).is_ok());
        assert!(validate_prompt(&"x".repeat(PROMPT_MAX_LEN + 1)).is_err());
        // Whitespace does not count toward the minimum.
        assert!(validate_prompt("   hi    ").is_err());
    }
}
