use bytes::Bytes;
use futures_util::StreamExt;

use crate::{PortraitError, Result};

pub(crate) const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

/// Reads at most `max_bytes` of the body as lossy UTF-8. Used only for log diagnostics.
pub(crate) async fn response_text_truncated(
    response: reqwest::Response,
    max_bytes: usize,
) -> String {
    let (bytes, truncated) = response_bytes_truncated(response, max_bytes).await;
    let mut body = String::from_utf8_lossy(&bytes).to_string();
    if truncated {
        if !body.is_empty() {
            body.push('\n');
        }
        body.push_str("...(truncated)");
    }
    body
}

/// Reads the full body. Transport errors and timeouts mid-body surface as
/// `Upstream`; a body over `max_bytes` is rejected as malformed.
pub(crate) async fn response_bytes_limited(
    response: reqwest::Response,
    max_bytes: usize,
) -> Result<Bytes> {
    if response
        .content_length()
        .is_some_and(|len| len > max_bytes as u64)
    {
        return Err(PortraitError::malformed(format!(
            "response exceeded max bytes ({max_bytes})"
        )));
    }

    let mut out = Vec::<u8>::new();
    let mut stream = response.bytes_stream();
    while let Some(next) = stream.next().await {
        let chunk = next?;
        if out.len().saturating_add(chunk.len()) > max_bytes {
            return Err(PortraitError::malformed(format!(
                "response exceeded max bytes ({max_bytes})"
            )));
        }
        out.extend_from_slice(chunk.as_ref());
    }
    Ok(Bytes::from(out))
}

/// Lossy variant for diagnostics: stops at the first stream error or at `max_bytes`.
pub(crate) async fn response_bytes_truncated(
    response: reqwest::Response,
    max_bytes: usize,
) -> (Vec<u8>, bool) {
    let max_bytes = max_bytes.max(1);
    let mut out = Vec::<u8>::new();
    let mut truncated = false;

    let mut stream = response.bytes_stream();
    while let Some(next) = stream.next().await {
        let Ok(chunk) = next else {
            break;
        };
        let remaining = max_bytes.saturating_sub(out.len());
        if remaining == 0 {
            truncated = true;
            break;
        }
        if chunk.len() <= remaining {
            out.extend_from_slice(chunk.as_ref());
        } else {
            out.extend_from_slice(&chunk.as_ref()[..remaining]);
            truncated = true;
            break;
        }
    }
    (out, truncated)
}
