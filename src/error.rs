use axum::http::StatusCode;
use thiserror::Error;

pub const ARTIFACT_NOT_FOUND_MESSAGE: &str = "File expired or not found.";

#[derive(Debug, Error)]
pub enum PortraitError {
    #[error("rate limit exceeded for client")]
    RateLimited,
    #[error("content rejected by upstream safety screening: {reason}")]
    ContentRejected { reason: String },
    #[error("upstream error: {message}")]
    Upstream {
        status: Option<reqwest::StatusCode>,
        message: String,
    },
    #[error("malformed upstream response: {reason}")]
    MalformedUpstreamResponse { reason: String },
    #[error("artifact not found")]
    ArtifactNotFound,
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },
    #[error("internal error: {0}")]
    Internal(String),
    #[error("config error: {0}")]
    Config(String),
}

impl PortraitError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::ContentRejected { .. } | Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::ArtifactNotFound => StatusCode::NOT_FOUND,
            Self::MalformedUpstreamResponse { .. } | Self::Internal(_) | Self::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Caller-visible message. Upstream diagnostics and internal detail stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::RateLimited => {
                "Daily request limit reached. Please try again later.".to_string()
            }
            Self::ContentRejected { .. } => {
                "The image was rejected by the content safety filter.".to_string()
            }
            Self::Upstream { .. } => {
                "Image generation service error. Please retry.".to_string()
            }
            Self::MalformedUpstreamResponse { .. } => {
                "Image generation service returned no image. Please retry.".to_string()
            }
            Self::ArtifactNotFound => ARTIFACT_NOT_FOUND_MESSAGE.to_string(),
            Self::InvalidRequest { reason } => reason.clone(),
            Self::Internal(_) | Self::Config(_) => {
                "Internal server error. Please retry.".to_string()
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::ContentRejected { .. } => "content_rejected",
            Self::Upstream { .. } => "upstream_error",
            Self::MalformedUpstreamResponse { .. } => "malformed_upstream_response",
            Self::ArtifactNotFound => "artifact_not_found",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::Internal(_) => "internal_error",
            Self::Config(_) => "config_error",
        }
    }

    pub(crate) fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedUpstreamResponse {
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for PortraitError {
    fn from(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            "upstream request timed out".to_string()
        } else {
            err.to_string()
        };
        Self::Upstream {
            status: err.status(),
            message,
        }
    }
}

impl From<std::io::Error> for PortraitError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(format!("io error: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, PortraitError>;
