use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use bytes::Bytes;
use serde_json::Value;

use super::{GeneratedImage, ImageGenerator, SourceImage};
use crate::artifact::DEFAULT_CONTENT_TYPE;
use crate::utils::http::{MAX_ERROR_BODY_BYTES, response_bytes_limited, response_text_truncated};
use crate::{PortraitError, Result};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

const MAX_RESPONSE_BODY_BYTES: usize = 64 * 1024 * 1024;

const SAFETY_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "IMAGE_SAFETY",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
    "RECITATION",
];

#[derive(Clone)]
pub struct GeminiImageClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiImageClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| PortraitError::Config(format!("failed to build http client: {err}")))?;

        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
        })
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn model_path(model: &str) -> String {
        let model = model.trim();
        if model.starts_with("models/") {
            model.to_string()
        } else {
            format!("models/{model}")
        }
    }

    fn generate_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = Self::model_path(&self.model);
        format!("{base}/{path}:generateContent")
    }

    fn request_body(image: &SourceImage, instruction: &str) -> Value {
        let mime_type = if image.content_type.trim().starts_with("image/") {
            image.content_type.trim()
        } else {
            DEFAULT_CONTENT_TYPE
        };
        serde_json::json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "inline_data": { "mime_type": mime_type, "data": STANDARD.encode(&image.bytes) } },
                    { "text": instruction },
                ],
            }],
        })
    }
}

impl std::fmt::Debug for GeminiImageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiImageClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl ImageGenerator for GeminiImageClient {
    fn provider(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, image: &SourceImage, instruction: &str) -> Result<GeneratedImage> {
        let started = Instant::now();
        let response = self
            .http
            .post(self.generate_url())
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::request_body(image, instruction))
            .send()
            .await?;

        let status = response.status();
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if !status.is_success() {
            let body = response_text_truncated(response, MAX_ERROR_BODY_BYTES).await;
            tracing::warn!(status = status.as_u16(), elapsed_ms, body = %body, "generation api returned an error");
            return Err(PortraitError::Upstream {
                status: Some(status),
                message: format!("generation api returned {status}"),
            });
        }
        tracing::debug!(status = status.as_u16(), elapsed_ms, "generation api responded");

        let bytes = response_bytes_limited(response, MAX_RESPONSE_BODY_BYTES)
            .await
            .inspect_err(|err| {
                tracing::warn!(elapsed_ms, error = %err, "failed to read generation api response");
            })?;
        let parsed: Value = serde_json::from_slice(&bytes)
            .map_err(|err| PortraitError::malformed(format!("response is not valid json: {err}")))?;

        interpret_response(&parsed)
    }
}

/// Pulls the first inline image out of a `generateContent` response.
pub(crate) fn interpret_response(body: &Value) -> Result<GeneratedImage> {
    if let Some(reason) = body
        .get("promptFeedback")
        .and_then(|feedback| feedback.get("blockReason"))
        .and_then(Value::as_str)
    {
        return Err(PortraitError::ContentRejected {
            reason: reason.to_string(),
        });
    }

    let Some(candidate) = body
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
    else {
        return Err(PortraitError::malformed("response has no candidates"));
    };

    let parts = candidate
        .get("content")
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for part in parts {
        let Some(inline) = part.get("inlineData").or_else(|| part.get("inline_data")) else {
            continue;
        };
        let Some(data) = inline.get("data").and_then(Value::as_str) else {
            continue;
        };
        let content_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        let decoded = STANDARD
            .decode(data.trim())
            .or_else(|_| URL_SAFE.decode(data.trim()))
            .map_err(|err| PortraitError::malformed(format!("inline image is not base64: {err}")))?;
        if decoded.is_empty() {
            return Err(PortraitError::malformed("inline image is empty"));
        }
        return Ok(GeneratedImage {
            bytes: Bytes::from(decoded),
            content_type,
        });
    }

    if let Some(reason) = candidate
        .get("finishReason")
        .and_then(Value::as_str)
        .filter(|reason| SAFETY_FINISH_REASONS.contains(reason))
    {
        return Err(PortraitError::ContentRejected {
            reason: reason.to_string(),
        });
    }

    Err(PortraitError::malformed("response has no inline image data"))
}
