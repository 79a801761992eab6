//! Shared data models for the vgen backend.
//!
//! This crate provides Serde-serializable types for:
//! - Users, roles, and plan tiers
//! - Plan enforcement (tool access, daily quota, bulk limits)
//! - Upstream API tokens and the rotation settings singleton
//! - Video generation jobs and their lifecycle
//! - Aspect ratios

pub mod access;
pub mod aspect;
pub mod job;
pub mod plan;
pub mod token;
pub mod user;

// Re-export common types
pub use access::AccessCheck;
pub use aspect::AspectRatio;
pub use job::{JobId, JobStatus, VideoJob};
pub use plan::{BulkLimits, PlanConfig, PlanTier, Tool};
pub use token::{ApiToken, TokenId, TokenSettings, BATCH_SIZE};
pub use user::{User, UserRole};
