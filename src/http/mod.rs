//! HTTP surface: `POST /generate`, `GET /download/:id`, plus health and metrics.

mod multipart;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, DefaultBodyLimit, Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::observability::ObservabilitySnapshot;
use crate::studio::{GenerationRequest, Studio};
use crate::PortraitError;

use multipart::UploadForm;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const DOWNLOAD_FILE_STEM: &str = "britishme_result";

#[derive(Clone)]
pub struct StudioHttpState {
    studio: Arc<Studio>,
    max_upload_bytes: usize,
}

impl StudioHttpState {
    pub fn new(studio: Studio) -> Self {
        Self {
            studio: Arc::new(studio),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_max_upload_bytes(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes.max(1);
        self
    }

    pub fn studio(&self) -> &Arc<Studio> {
        &self.studio
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub status: String,
    pub download_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Requests must be served with `into_make_service_with_connect_info::<SocketAddr>()`;
/// the peer address is the rate-limit key.
pub fn router(state: StudioHttpState) -> Router {
    let max_upload_bytes = state.max_upload_bytes;
    Router::new()
        .route("/generate", post(handle_generate))
        .route("/download/:id", get(handle_download))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

fn error_response(err: &PortraitError) -> (StatusCode, Json<ErrorResponse>) {
    (
        err.status(),
        Json(ErrorResponse {
            error: err.public_message(),
        }),
    )
}

/// Rate-limit key for a peer. Clients sharing a NAT or proxy share a key, and
/// forwarded-for headers are not consulted.
pub fn client_key(peer: &SocketAddr) -> String {
    peer.ip().to_canonical().to_string()
}

async fn handle_generate(
    State(state): State<StudioHttpState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<GenerateResponse>, (StatusCode, Json<ErrorResponse>)> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let form = UploadForm::parse(content_type, &body).map_err(|err| error_response(&err))?;
    tracing::debug!(
        filename = form.filename.as_deref().unwrap_or("-"),
        size = form.image.bytes.len(),
        "upload received"
    );

    let request = GenerationRequest {
        image: form.image,
        style_key: form.style_key.unwrap_or_default(),
    };
    let handle = state
        .studio
        .generate(request, &client_key(&peer))
        .await
        .map_err(|err| error_response(&err))?;

    Ok(Json(GenerateResponse {
        status: "success".to_string(),
        download_url: handle.download_url(),
    }))
}

async fn handle_download(
    State(state): State<StudioHttpState>,
    Path(id): Path<String>,
) -> Response {
    let artifact = match state.studio.download(&id).await {
        Ok(artifact) => artifact,
        Err(err) => return error_response(&err).into_response(),
    };

    let mut headers = HeaderMap::new();
    let content_type = HeaderValue::from_str(&artifact.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("image/jpeg"));
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    let disposition = format!(
        "attachment; filename=\"{DOWNLOAD_FILE_STEM}.{}\"",
        artifact.file_extension()
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    (StatusCode::OK, headers, artifact.bytes).into_response()
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn metrics(State(state): State<StudioHttpState>) -> Json<ObservabilitySnapshot> {
    Json(state.studio.observability())
}
