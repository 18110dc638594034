use bytes::Bytes;

use crate::providers::SourceImage;
use crate::{PortraitError, Result};

const IMAGE_FIELDS: &[&str] = &["file", "image"];
const STYLE_FIELD: &str = "style";

#[derive(Debug, Clone)]
pub(crate) struct FormPart {
    pub(crate) name: String,
    pub(crate) filename: Option<String>,
    pub(crate) content_type: Option<String>,
    pub(crate) data: Bytes,
}

/// The `/generate` form: one image field plus an optional style key.
#[derive(Debug)]
pub(crate) struct UploadForm {
    pub(crate) image: SourceImage,
    pub(crate) filename: Option<String>,
    pub(crate) style_key: Option<String>,
}

impl UploadForm {
    pub(crate) fn parse(content_type: &str, body: &Bytes) -> Result<Self> {
        let parts = parse_form_parts(content_type, body).map_err(PortraitError::invalid_request)?;

        let mut image = None;
        let mut style_key = None;
        for part in parts {
            if IMAGE_FIELDS.contains(&part.name.as_str()) {
                if image.is_none() {
                    image = Some(part);
                }
            } else if part.name == STYLE_FIELD {
                style_key = Some(String::from_utf8_lossy(&part.data).trim().to_string());
            }
        }

        let image = image
            .ok_or_else(|| PortraitError::invalid_request("Missing image file field."))?;
        let content_type = image
            .content_type
            .clone()
            .unwrap_or_else(|| crate::artifact::DEFAULT_CONTENT_TYPE.to_string());

        Ok(Self {
            image: SourceImage {
                bytes: image.data,
                content_type,
            },
            filename: image.filename,
            style_key: style_key.filter(|key| !key.is_empty()),
        })
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8], start: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(start);
    }
    if start >= haystack.len() {
        return None;
    }
    let first = needle[0];
    let mut pos = start;
    while pos + needle.len() <= haystack.len() {
        let rel = haystack[pos..].iter().position(|&b| b == first)?;
        pos += rel;
        if pos + needle.len() > haystack.len() {
            return None;
        }
        if &haystack[pos..pos + needle.len()] == needle {
            return Some(pos);
        }
        pos += 1;
    }
    None
}

fn form_boundary(content_type: &str) -> std::result::Result<String, String> {
    let mut params = content_type.split(';').map(str::trim);
    let mime = params.next().unwrap_or_default();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return Err("Expected a multipart/form-data upload.".to_string());
    }

    for param in params {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        if !key.trim().eq_ignore_ascii_case("boundary") {
            continue;
        }
        let value = value.trim();
        let unquoted = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        if !unquoted.trim().is_empty() {
            return Ok(unquoted.to_string());
        }
    }

    Err("Multipart boundary is missing.".to_string())
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// `key=value` pairs of a `Content-Disposition` header; `;` inside quotes does not split.
fn disposition_params(value: &str) -> Vec<(&str, &str)> {
    let mut items = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (idx, ch) in value.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            ';' if !quoted => {
                items.push(&value[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    items.push(&value[start..]);

    items
        .into_iter()
        .filter_map(|item| item.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect()
}

pub(crate) fn parse_form_parts(
    content_type: &str,
    body: &Bytes,
) -> std::result::Result<Vec<FormPart>, String> {
    let boundary = form_boundary(content_type)?;
    let opening = format!("--{boundary}");
    let opening = opening.as_bytes();
    let delimiter = format!("\r\n--{boundary}");
    let delimiter = delimiter.as_bytes();

    let bytes = body.as_ref();
    let Some(mut cursor) = find_subslice(bytes, opening, 0) else {
        return Err("Multipart body is missing its boundary.".to_string());
    };
    cursor += opening.len();

    let mut parts = Vec::<FormPart>::new();
    loop {
        if bytes.get(cursor..cursor + 2) == Some(b"--") {
            break;
        }
        if bytes.get(cursor..cursor + 2) == Some(b"\r\n") {
            cursor += 2;
        }

        let Some(headers_end) = find_subslice(bytes, b"\r\n\r\n", cursor) else {
            return Err("Multipart part is missing its headers.".to_string());
        };

        let headers = String::from_utf8_lossy(&bytes[cursor..headers_end]);
        let mut name = None;
        let mut filename = None;
        let mut part_type = None;
        for line in headers.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            if key.trim().eq_ignore_ascii_case("content-disposition") {
                for (param, v) in disposition_params(value) {
                    if param.eq_ignore_ascii_case("name") {
                        name = Some(unquote(v).to_string());
                    } else if param.eq_ignore_ascii_case("filename") {
                        filename = Some(unquote(v).to_string());
                    }
                }
            } else if key.trim().eq_ignore_ascii_case("content-type") && !value.is_empty() {
                part_type = Some(value.to_string());
            }
        }

        let name = name.ok_or_else(|| "Multipart part has no field name.".to_string())?;
        let data_start = headers_end + 4;
        let Some(data_end) = find_subslice(bytes, delimiter, data_start) else {
            return Err("Multipart part is not terminated.".to_string());
        };

        parts.push(FormPart {
            name,
            filename,
            content_type: part_type,
            data: body.slice(data_start..data_end),
        });

        cursor = data_end + delimiter.len();
    }

    Ok(parts)
}
