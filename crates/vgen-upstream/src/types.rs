//! Wire types for the video generation API.
//!
//! Requests are fully typed; polled operation entries keep their unmapped
//! fields as raw JSON because the artifact URL can surface under several
//! names depending on the upstream serving path.

use serde::{Deserialize, Serialize};

use vgen_models::AspectRatio;

/// Upstream statuses that mean the artifact is ready.
pub const COMPLETED_STATUSES: [&str; 3] = [
    "COMPLETED",
    "MEDIA_GENERATION_STATUS_COMPLETE",
    "MEDIA_GENERATION_STATUS_SUCCESSFUL",
];

/// Generation mode, which selects the model key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    TextToVideo,
    ImageToVideo,
}

/// Upstream aspect-ratio tag.
pub fn aspect_tag(aspect: AspectRatio) -> &'static str {
    match aspect {
        AspectRatio::Landscape => "VIDEO_ASPECT_RATIO_LANDSCAPE",
        AspectRatio::Portrait => "VIDEO_ASPECT_RATIO_PORTRAIT",
    }
}

/// Model key for an aspect ratio and generation mode.
pub fn model_key(aspect: AspectRatio, mode: GenerationMode) -> &'static str {
    match (mode, aspect) {
        (GenerationMode::TextToVideo, AspectRatio::Landscape) => "veo_3_0_t2v_fast",
        (GenerationMode::TextToVideo, AspectRatio::Portrait) => "veo_3_0_t2v_fast_portrait",
        (GenerationMode::ImageToVideo, AspectRatio::Landscape) => "veo_3_0_i2v_fast",
        (GenerationMode::ImageToVideo, AspectRatio::Portrait) => "veo_3_0_i2v_fast_portrait",
    }
}

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContext {
    pub project_id: String,
    pub tool: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextInput {
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceImage {
    pub image_id: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMetadata {
    pub scene_id: String,
}

/// One generation request inside a batch submit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub aspect_ratio: &'static str,
    pub seed: u32,
    pub text_input: TextInput,
    pub video_model_key: &'static str,
    pub metadata: RequestMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_image: Option<ReferenceImage>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub client_context: ClientContext,
    pub requests: Vec<GenerationRequest>,
}

/// One operation handle inside a status check.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationQuery {
    pub operation: OperationRef,
    pub scene_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRef {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    pub operations: Vec<OperationQuery>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadImageRequest {
    /// Base64-encoded image payload.
    pub image_bytes: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateImageRequest {
    pub prompt: String,
    pub seed: u32,
}

// =============================================================================
// Responses
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    #[serde(default)]
    pub operations: Vec<OperationEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    #[serde(default)]
    pub operations: Vec<OperationEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: Option<i64>,
}

/// A polled operation. Known fields are typed; everything else (including
/// whichever field carries the artifact URL) stays in `rest`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationEntry {
    #[serde(default)]
    pub operation: Option<OperationRef>,
    #[serde(default)]
    pub scene_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<OperationError>,
    #[serde(flatten)]
    pub rest: serde_json::Value,
}

impl OperationEntry {
    /// Name of the long-running operation, if present.
    pub fn operation_name(&self) -> Option<&str> {
        self.operation.as_ref().map(|op| op.name.as_str())
    }

    /// Whether the upstream status marks the artifact as ready.
    pub fn is_complete(&self) -> bool {
        self.status
            .as_deref()
            .map(|s| COMPLETED_STATUSES.contains(&s))
            .unwrap_or(false)
    }

    /// Extract the artifact URL, trying each known location in order,
    /// then decode HTML entities the upstream serializer leaves behind.
    pub fn video_url(&self) -> Option<String> {
        let candidates = [
            self.rest
                .pointer("/metadata/video/fifeUrl")
                .and_then(|v| v.as_str()),
            self.rest.get("videoUrl").and_then(|v| v.as_str()),
            self.rest.get("fileUrl").and_then(|v| v.as_str()),
            self.rest.get("downloadUrl").and_then(|v| v.as_str()),
        ];
        candidates
            .into_iter()
            .flatten()
            .next()
            .map(decode_html_entities)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadImageResponse {
    pub image_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateImageResponse {
    /// Base64-encoded generated image.
    pub encoded_image: String,
    #[serde(default)]
    pub seed: Option<u32>,
}

/// Decode the HTML entities upstream responses escape URLs with.
pub fn decode_html_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(value: serde_json::Value) -> OperationEntry {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_completion_statuses() {
        for status in COMPLETED_STATUSES {
            let e = entry(json!({ "status": status }));
            assert!(e.is_complete(), "{status} should be terminal");
        }
        let pending = entry(json!({ "status": "MEDIA_GENERATION_STATUS_PENDING" }));
        assert!(!pending.is_complete());
        let missing = entry(json!({}));
        assert!(!missing.is_complete());
    }

    #[test]
    fn test_video_url_extraction_order() {
        let e = entry(json!({
            "metadata": { "video": { "fifeUrl": "https://cdn.example.com/fife.mp4" } },
            "videoUrl": "https://cdn.example.com/plain.mp4"
        }));
        assert_eq!(
            e.video_url().unwrap(),
            "https://cdn.example.com/fife.mp4"
        );

        let e = entry(json!({ "fileUrl": "https://cdn.example.com/file.mp4" }));
        assert_eq!(e.video_url().unwrap(), "https://cdn.example.com/file.mp4");

        let e = entry(json!({ "downloadUrl": "https://cdn.example.com/dl.mp4" }));
        assert_eq!(e.video_url().unwrap(), "https://cdn.example.com/dl.mp4");

        let e = entry(json!({ "status": "COMPLETED" }));
        assert!(e.video_url().is_none());
    }

    #[test]
    fn test_video_url_entity_decoding() {
        let e = entry(json!({
            "videoUrl": "https://cdn.example.com/v.mp4?a=1&amp;b=2&amp;sig=x%3D"
        }));
        assert_eq!(
            e.video_url().unwrap(),
            "https://cdn.example.com/v.mp4?a=1&b=2&sig=x%3D"
        );
    }

    #[test]
    fn test_decode_html_entities() {
        assert_eq!(decode_html_entities("a &amp; b"), "a & b");
        assert_eq!(decode_html_entities("&lt;tag&gt;"), "<tag>");
        assert_eq!(decode_html_entities("&quot;x&#39;"), "\"x'");
        assert_eq!(decode_html_entities("plain"), "plain");
    }

    #[test]
    fn test_error_entry_parsing() {
        let e = entry(json!({
            "operation": { "name": "operations/abc" },
            "error": { "message": "Prompt violates policy", "code": 3 }
        }));
        assert_eq!(e.operation_name(), Some("operations/abc"));
        assert_eq!(e.error.unwrap().message, "Prompt violates policy");
    }

    #[test]
    fn test_model_key_matrix() {
        assert_eq!(
            model_key(AspectRatio::Landscape, GenerationMode::TextToVideo),
            "veo_3_0_t2v_fast"
        );
        assert_eq!(
            model_key(AspectRatio::Portrait, GenerationMode::ImageToVideo),
            "veo_3_0_i2v_fast_portrait"
        );
        assert_eq!(aspect_tag(AspectRatio::Portrait), "VIDEO_ASPECT_RATIO_PORTRAIT");
    }
}
