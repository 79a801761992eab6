//! Bulk video generation orchestrator.
//!
//! The core of the platform: accepts batches of prompts, paces upstream
//! submissions through the token pool, polls every in-flight job to a
//! terminal state, re-hosts completed artifacts, and keeps the job rows
//! durable through failures and restarts.
//!
//! Components, leaves first:
//! - [`config`]: env-driven configuration
//! - [`context`]: injected collaborators (store, pool, upstream, media)
//! - [`submission`]: paced, bounded-concurrency submission queue
//! - [`polling`]: worker-pool polling coordinator with upload dedup
//! - [`housekeeper`]: daily resets, stale-job expiry, startup recovery
//! - [`orchestrator`]: the facade the transport layer calls

pub mod config;
pub mod context;
pub mod error;
pub mod housekeeper;
pub mod logging;
pub mod orchestrator;
pub mod polling;
pub mod submission;

pub use config::OrchestratorConfig;
pub use context::Context;
pub use error::{OrchestratorError, OrchestratorResult};
pub use housekeeper::Housekeeper;
pub use orchestrator::{Orchestrator, SingleSubmission, StatusCheck};
pub use polling::{PollTask, PollingCoordinator, ReferenceImageInput};
pub use submission::{QueuedJob, SubmissionQueue};
