//! Video generation API client.
//!
//! One shared `reqwest` client with keep-alive pooling sized to the
//! polling worker pool. Every call carries an explicit timeout and a
//! caller-provided bearer credential, so one client serves all tokens.

use std::time::Duration;

use base64::Engine;
use rand::Rng;
use reqwest::{Client, StatusCode};
use tracing::debug;

use vgen_models::AspectRatio;

use crate::error::{UpstreamError, UpstreamResult};
use crate::types::{
    aspect_tag, model_key, ClientContext, GenerateImageRequest, GenerateImageResponse,
    GenerationMode, GenerationRequest, OperationEntry, OperationQuery, OperationRef,
    ReferenceImage, RequestMetadata, StatusRequest, StatusResponse, SubmitRequest,
    SubmitResponse, TextInput, UploadImageRequest, UploadImageResponse,
};

/// Upstream client configuration.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// API base URL.
    pub base_url: String,
    /// Project id sent in the client context.
    pub project_id: String,
    /// Timeout for submission requests.
    pub submit_timeout: Duration,
    /// Timeout for status checks.
    pub status_timeout: Duration,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Keep-alive idle window.
    pub pool_idle_timeout: Duration,
    /// Connection pool size.
    pub pool_max_idle: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "https://aisandbox-pa.googleapis.com".to_string(),
            project_id: String::new(),
            submit_timeout: Duration::from_secs(90),
            status_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            pool_idle_timeout: Duration::from_secs(30),
            pool_max_idle: 40,
        }
    }
}

impl UpstreamConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("UPSTREAM_BASE_URL").unwrap_or(defaults.base_url),
            project_id: std::env::var("UPSTREAM_PROJECT_ID").unwrap_or_default(),
            submit_timeout: Duration::from_secs(
                std::env::var("UPSTREAM_SUBMIT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(90),
            ),
            status_timeout: Duration::from_secs(
                std::env::var("UPSTREAM_STATUS_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            connect_timeout: defaults.connect_timeout,
            pool_idle_timeout: defaults.pool_idle_timeout,
            pool_max_idle: std::env::var("UPSTREAM_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(40),
        }
    }
}

/// Result of an accepted submission.
#[derive(Debug, Clone)]
pub struct SubmittedOperation {
    pub operation_name: String,
    pub scene_id: String,
}

/// Video generation API client.
#[derive(Clone)]
pub struct UpstreamClient {
    http: Client,
    config: UpstreamConfig,
}

impl UpstreamClient {
    /// Create a new client.
    pub fn new(config: UpstreamConfig) -> UpstreamResult<Self> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle)
            .user_agent(concat!("vgen-upstream/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(UpstreamError::from)?;
        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> UpstreamResult<Self> {
        Self::new(UpstreamConfig::from_env())
    }

    /// Submit one text-to-video generation. Returns the operation handle
    /// the caller must poll.
    pub async fn submit_text(
        &self,
        token: &str,
        prompt: &str,
        aspect: AspectRatio,
        scene_id: &str,
    ) -> UpstreamResult<SubmittedOperation> {
        let request = self.build_submit(prompt, aspect, scene_id, GenerationMode::TextToVideo, None);
        self.submit(token, "video:batchAsyncGenerateVideoText", &request, scene_id)
            .await
    }

    /// Submit one image-to-video generation against a previously uploaded
    /// reference image.
    pub async fn submit_reference_image(
        &self,
        token: &str,
        prompt: &str,
        aspect: AspectRatio,
        scene_id: &str,
        image_id: &str,
        mime_type: &str,
    ) -> UpstreamResult<SubmittedOperation> {
        let reference = ReferenceImage {
            image_id: image_id.to_string(),
            mime_type: mime_type.to_string(),
        };
        let request = self.build_submit(
            prompt,
            aspect,
            scene_id,
            GenerationMode::ImageToVideo,
            Some(reference),
        );
        self.submit(
            token,
            "video:batchAsyncGenerateVideoReferenceImages",
            &request,
            scene_id,
        )
        .await
    }

    /// Poll one operation.
    pub async fn check_status(
        &self,
        token: &str,
        operation_name: &str,
        scene_id: &str,
    ) -> UpstreamResult<OperationEntry> {
        let request = StatusRequest {
            operations: vec![OperationQuery {
                operation: OperationRef {
                    name: operation_name.to_string(),
                },
                scene_id: scene_id.to_string(),
            }],
        };

        let url = self.endpoint("video:batchCheckAsyncVideoGenerationStatus");
        let response = self
            .http
            .post(&url)
            .timeout(self.config.status_timeout)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?;

        let body: StatusResponse = Self::parse_json(response).await?;
        body.operations
            .into_iter()
            .next()
            .ok_or_else(|| UpstreamError::invalid_response("status response had no operations"))
    }

    /// Upload a user image; the returned id feeds `submit_reference_image`.
    pub async fn upload_image(
        &self,
        token: &str,
        image_bytes: &[u8],
        mime_type: &str,
    ) -> UpstreamResult<UploadImageResponse> {
        let request = UploadImageRequest {
            image_bytes: base64::engine::general_purpose::STANDARD.encode(image_bytes),
            mime_type: mime_type.to_string(),
        };

        let url = self.endpoint("v1:uploadUserImage");
        let response = self
            .http
            .post(&url)
            .timeout(self.config.submit_timeout)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?;
        Self::parse_json(response).await
    }

    /// Generate a still image from a prompt.
    pub async fn generate_image(
        &self,
        token: &str,
        prompt: &str,
    ) -> UpstreamResult<GenerateImageResponse> {
        let request = GenerateImageRequest {
            prompt: prompt.to_string(),
            seed: random_seed(),
        };

        let url = self.endpoint("v1/whisk:generateImage");
        let response = self
            .http
            .post(&url)
            .timeout(self.config.submit_timeout)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?;
        Self::parse_json(response).await
    }

    fn build_submit(
        &self,
        prompt: &str,
        aspect: AspectRatio,
        scene_id: &str,
        mode: GenerationMode,
        reference_image: Option<ReferenceImage>,
    ) -> SubmitRequest {
        SubmitRequest {
            client_context: ClientContext {
                project_id: self.config.project_id.clone(),
                tool: "PINHOLE".to_string(),
            },
            requests: vec![GenerationRequest {
                aspect_ratio: aspect_tag(aspect),
                seed: random_seed(),
                text_input: TextInput {
                    prompt: prompt.to_string(),
                },
                video_model_key: model_key(aspect, mode),
                metadata: RequestMetadata {
                    scene_id: scene_id.to_string(),
                },
                reference_image,
            }],
        }
    }

    async fn submit(
        &self,
        token: &str,
        path: &str,
        request: &SubmitRequest,
        scene_id: &str,
    ) -> UpstreamResult<SubmittedOperation> {
        let url = self.endpoint(path);
        let response = self
            .http
            .post(&url)
            .timeout(self.config.submit_timeout)
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;

        let body: SubmitResponse = Self::parse_json(response).await?;
        let entry = body
            .operations
            .into_iter()
            .next()
            .ok_or(UpstreamError::MissingOperation)?;
        let operation_name = entry
            .operation_name()
            .ok_or(UpstreamError::MissingOperation)?
            .to_string();

        debug!(scene_id = %scene_id, operation = %operation_name, "Upstream accepted submission");

        Ok(SubmittedOperation {
            operation_name,
            scene_id: entry.scene_id.unwrap_or_else(|| scene_id.to_string()),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn parse_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> UpstreamResult<T> {
        let status = response.status();
        if status == StatusCode::OK {
            Ok(response.json().await?)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(UpstreamError::Http {
                status: status.as_u16(),
                body,
            })
        }
    }
}

/// Random 32-bit seed for a generation request.
pub fn random_seed() -> u32 {
    rand::rng().random()
}
