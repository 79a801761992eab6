//! Client for the upstream video generation API.
//!
//! Covers the five endpoints the orchestrator consumes:
//! - `video:batchAsyncGenerateVideoText` (text-to-video submit)
//! - `video:batchAsyncGenerateVideoReferenceImages` (image-to-video submit)
//! - `video:batchCheckAsyncVideoGenerationStatus` (polling)
//! - `v1:uploadUserImage` (reference image upload)
//! - `v1/whisk:generateImage` (still image generation)
//!
//! Authorization is `Bearer <token>`, with the credential supplied per call
//! so the token pool can rotate freely over one shared connection pool.

pub mod client;
pub mod error;
pub mod types;

pub use client::{random_seed, SubmittedOperation, UpstreamClient, UpstreamConfig};
pub use error::{UpstreamError, UpstreamResult};
pub use types::{
    decode_html_entities, GenerationMode, OperationEntry, COMPLETED_STATUSES,
};
