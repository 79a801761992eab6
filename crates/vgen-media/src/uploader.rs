//! Media host uploader.
//!
//! Two-stage re-hosting: fetch the artifact bytes from the upstream URL,
//! then POST them to the media host's unsigned upload endpoint. Each stage
//! retries independently; the hosted `secure_url` is the stable URL stored
//! on the job row.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{MediaError, MediaResult};
use crate::retry::{with_retry, RetryConfig};

/// Media host configuration.
#[derive(Debug, Clone)]
pub struct MediaHostConfig {
    /// Unsigned video upload endpoint.
    pub video_endpoint: String,
    /// Unsigned image upload endpoint.
    pub image_endpoint: String,
    /// Unsigned upload preset name.
    pub upload_preset: String,
    /// Retry policy for both stages.
    pub retry: RetryConfig,
}

impl MediaHostConfig {
    /// Create config from environment variables.
    pub fn from_env() -> MediaResult<Self> {
        Ok(Self {
            video_endpoint: std::env::var("MEDIA_VIDEO_UPLOAD_URL")
                .map_err(|_| MediaError::config_error("MEDIA_VIDEO_UPLOAD_URL not set"))?,
            image_endpoint: std::env::var("MEDIA_IMAGE_UPLOAD_URL")
                .map_err(|_| MediaError::config_error("MEDIA_IMAGE_UPLOAD_URL not set"))?,
            upload_preset: std::env::var("MEDIA_UPLOAD_PRESET")
                .map_err(|_| MediaError::config_error("MEDIA_UPLOAD_PRESET not set"))?,
            retry: RetryConfig::default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: String,
}

/// Client for the media host.
#[derive(Clone)]
pub struct MediaUploader {
    http: Client,
    config: MediaHostConfig,
}

impl MediaUploader {
    /// Create a new uploader.
    pub fn new(config: MediaHostConfig) -> MediaResult<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("vgen-media/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> MediaResult<Self> {
        Self::new(MediaHostConfig::from_env()?)
    }

    /// Re-host a video artifact. Returns the hosted URL.
    pub async fn upload_video(&self, upstream_url: &str) -> MediaResult<String> {
        let bytes = self.fetch_artifact(upstream_url).await?;
        self.upload_bytes(&self.config.video_endpoint, bytes, "video.mp4", "video/mp4")
            .await
    }

    /// Re-host an image artifact. Returns the hosted URL.
    pub async fn upload_image(&self, bytes: Vec<u8>, mime_type: &str) -> MediaResult<String> {
        let file_name = if mime_type == "image/png" {
            "image.png"
        } else {
            "image.jpg"
        };
        self.upload_bytes(&self.config.image_endpoint, bytes, file_name, mime_type)
            .await
    }

    /// Stage 1: fetch the artifact bytes from the upstream URL.
    async fn fetch_artifact(&self, url: &str) -> MediaResult<Vec<u8>> {
        let bytes = with_retry(&self.config.retry, "fetch", || async move {
            let response = self
                .http
                .get(url)
                .send()
                .await
                .map_err(|e| MediaError::fetch_failed(format!("fetch failed: {}", e)))?;

            let status = response.status();
            if !status.is_success() {
                return Err(MediaError::fetch_failed(format!(
                    "HTTP {} from origin",
                    status.as_u16()
                )));
            }

            let bytes = response
                .bytes()
                .await
                .map_err(|e| MediaError::fetch_failed(format!("fetch failed: {}", e)))?;
            Ok(bytes.to_vec())
        })
        .await?;

        debug!(url = %url, size = bytes.len(), "Fetched upstream artifact");
        Ok(bytes)
    }

    /// Stage 2: multipart POST to the media host with the unsigned preset.
    async fn upload_bytes(
        &self,
        endpoint: &str,
        bytes: Vec<u8>,
        file_name: &'static str,
        mime_type: &str,
    ) -> MediaResult<String> {
        let size = bytes.len();
        let hosted = with_retry(&self.config.retry, "upload", || {
            let bytes = bytes.clone();
            async move {
                let part = Part::bytes(bytes)
                    .file_name(file_name)
                    .mime_str(mime_type)
                    .map_err(|e| MediaError::upload_failed(e.to_string()))?;
                let form = Form::new()
                    .text("upload_preset", self.config.upload_preset.clone())
                    .part("file", part);

                let response = self
                    .http
                    .post(endpoint)
                    .multipart(form)
                    .send()
                    .await
                    .map_err(|e| MediaError::upload_failed(e.to_string()))?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(MediaError::upload_failed(format!(
                        "HTTP {}: {}",
                        status.as_u16(),
                        body
                    )));
                }

                let parsed: UploadResponse = response
                    .json()
                    .await
                    .map_err(|_| MediaError::invalid_response("upload response missing secure_url"))?;
                Ok(parsed.secure_url)
            }
        })
        .await?;

        info!(size = size, hosted_url = %hosted, "Artifact re-hosted");
        Ok(hosted)
    }
}
