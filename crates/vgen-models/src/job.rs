//! Video generation job records.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::aspect::AspectRatio;
use crate::token::TokenId;

/// Unique identifier for a job.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
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

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job lifecycle state.
///
/// `Pending` rows have not been accepted by the submission queue yet;
/// `Queued` rows have an upstream submission in flight or being polled.
/// `Completed` and `Failed` are terminal and never mutated again.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, sqlx::Type, Default,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Pending,
    Queued,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A video generation job row. The durable source of truth for a request
/// from submission to terminal state.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, sqlx::FromRow)]
pub struct VideoJob {
    pub id: JobId,

    pub user_id: String,

    /// The generation prompt.
    pub prompt: String,

    pub aspect_ratio: AspectRatio,

    pub status: JobStatus,

    /// Re-hosted artifact URL, set when the job completes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,

    /// Opaque upstream handle for status polling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,

    /// Correlation id for the current submission attempt. Changes when the
    /// job is re-submitted mid flight.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_id: Option<String>,

    /// Token used for the current attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_used: Option<TokenId>,

    /// Submission retries consumed (0..=2).
    pub retry_count: i32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Extra payload for derived/merged records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,

    /// Source image for image-to-video jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_image_url: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VideoJob {
    /// Create a fresh pending job.
    pub fn new(
        user_id: impl Into<String>,
        prompt: impl Into<String>,
        aspect_ratio: AspectRatio,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            user_id: user_id.into(),
            prompt: prompt.into(),
            aspect_ratio,
            status: JobStatus::Pending,
            video_url: None,
            operation_name: None,
            scene_id: None,
            token_used: None,
            retry_count: 0,
            error_message: None,
            metadata: None,
            reference_image_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_is_pending() {
        let job = VideoJob::new("user123", "a cat surfing a wave", AspectRatio::Landscape);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert!(job.operation_name.is_none());
        assert!(!job.is_terminal());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_serde_round_trip() {
        let s = serde_json::to_string(&JobStatus::Queued).unwrap();
        assert_eq!(s, "\"queued\"");
        let back: JobStatus = serde_json::from_str(&s).unwrap();
        assert_eq!(back, JobStatus::Queued);
    }
}
