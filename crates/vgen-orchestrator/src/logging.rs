//! Structured job logging utilities.

use tracing::{error, info, warn};

use vgen_models::JobId;

/// Job logger with consistent contextual fields.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: String,
}

impl JobLogger {
    /// Create a logger for a job and operation ("submission", "polling",
    /// "upload", ...).
    pub fn new(job_id: &JobId, operation: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation: operation.to_string(),
        }
    }

    pub fn progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "{}", message
        );
    }

    pub fn warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = %self.operation,
            "{}", message
        );
    }

    pub fn failure(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = %self.operation,
            "{}", message
        );
    }
}
