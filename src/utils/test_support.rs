use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use crate::providers::{GeneratedImage, ImageGenerator, SourceImage};
use crate::{PortraitError, Result};

pub fn should_skip_httpmock() -> bool {
    if can_bind_localhost() {
        return false;
    }
    eprintln!("skipping httpmock test: sandbox forbids binding to localhost");
    true
}

fn can_bind_localhost() -> bool {
    match std::net::TcpListener::bind(("127.0.0.1", 0)) {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => false,
        Err(err) => panic!("failed to bind localhost for httpmock tests: {err}"),
    }
}

/// What a `ScriptedGenerator` does on every call.
#[derive(Clone, Debug)]
pub enum UpstreamScript {
    Image { bytes: Bytes, content_type: String },
    Status(u16),
    Rejected,
    NoImage,
    Panic,
}

impl UpstreamScript {
    pub fn image(bytes: &'static [u8], content_type: &str) -> Self {
        Self::Image {
            bytes: Bytes::from_static(bytes),
            content_type: content_type.to_string(),
        }
    }
}

/// In-process stand-in for the generation API that records what it was asked.
#[derive(Debug)]
pub struct ScriptedGenerator {
    script: UpstreamScript,
    calls: AtomicUsize,
    instructions: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(script: UpstreamScript) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            instructions: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn instructions(&self) -> Vec<String> {
        self.instructions
            .lock()
            .map(|seen| seen.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ImageGenerator for ScriptedGenerator {
    fn provider(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, _image: &SourceImage, instruction: &str) -> Result<GeneratedImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.instructions.lock() {
            seen.push(instruction.to_string());
        }
        match &self.script {
            UpstreamScript::Image {
                bytes,
                content_type,
            } => Ok(GeneratedImage {
                bytes: bytes.clone(),
                content_type: content_type.clone(),
            }),
            UpstreamScript::Status(code) => Err(PortraitError::Upstream {
                status: reqwest::StatusCode::from_u16(*code).ok(),
                message: format!("generation api returned {code}"),
            }),
            UpstreamScript::Rejected => Err(PortraitError::ContentRejected {
                reason: "SAFETY".to_string(),
            }),
            UpstreamScript::NoImage => Err(PortraitError::malformed(
                "response has no inline image data",
            )),
            UpstreamScript::Panic => panic!("scripted upstream panic"),
        }
    }
}

/// Builds a `multipart/form-data` body. Each field is `(name, filename, content_type, data)`.
pub fn multipart_body(
    boundary: &str,
    fields: &[(&str, Option<&str>, Option<&str>, &[u8])],
) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, content_type, data) in fields {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        let mut disposition = format!("Content-Disposition: form-data; name=\"{name}\"");
        if let Some(filename) = filename {
            disposition.push_str(&format!("; filename=\"{filename}\""));
        }
        body.extend_from_slice(disposition.as_bytes());
        body.extend_from_slice(b"\r\n");
        if let Some(content_type) = content_type {
            body.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}
