//! Upstream image generation.

pub mod gemini;

use async_trait::async_trait;
use bytes::Bytes;

use crate::Result;

pub use gemini::GeminiImageClient;

/// The uploaded photo as received from the client.
#[derive(Clone, Debug)]
pub struct SourceImage {
    pub bytes: Bytes,
    pub content_type: String,
}

#[derive(Clone, Debug)]
pub struct GeneratedImage {
    pub bytes: Bytes,
    pub content_type: String,
}

/// Opaque remote function: image + instruction in, image out.
///
/// Implementations map transport and non-success statuses to `PortraitError::Upstream`,
/// safety refusals to `ContentRejected`, and missing image payloads to
/// `MalformedUpstreamResponse`.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    fn provider(&self) -> &str;

    async fn generate(&self, image: &SourceImage, instruction: &str) -> Result<GeneratedImage>;
}
