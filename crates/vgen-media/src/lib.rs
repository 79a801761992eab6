//! Artifact re-hosting for the vgen backend.
//!
//! Upstream artifact URLs expire; completed videos are fetched once and
//! re-uploaded to the media host, whose `secure_url` is what users keep.

pub mod error;
pub mod retry;
pub mod uploader;

pub use error::{MediaError, MediaResult};
pub use retry::{with_retry, RetryConfig};
pub use uploader::{MediaHostConfig, MediaUploader};
