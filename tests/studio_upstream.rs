use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode, header};
use britishme::http::{ErrorResponse, GenerateResponse};
use britishme::utils::test_support::{multipart_body, should_skip_httpmock};
use britishme::{
    ArtifactStore, GeminiImageClient, ImageGenerator, PortraitError, SourceImage, Studio,
    StudioHttpState, Style, router,
};
use bytes::Bytes;
use httpmock::{Method::POST, MockServer};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tower::util::ServiceExt;

const BOUNDARY: &str = "upstream-test-boundary";
const GENERATE_PATH: &str = "/v1beta/models/gemini-2.5-flash-image:generateContent";

fn app(upstream: &MockServer, artifacts: Arc<ArtifactStore>) -> Router {
    app_with_timeout(upstream, artifacts, Duration::from_secs(10))
}

fn app_with_timeout(
    upstream: &MockServer,
    artifacts: Arc<ArtifactStore>,
    timeout: Duration,
) -> Router {
    let client = GeminiImageClient::new("AIza-test", timeout)
        .unwrap()
        .with_base_url(format!("{}/v1beta", upstream.base_url()));
    let studio = Studio::new(Arc::new(client), artifacts);
    router(StudioHttpState::new(studio))
}

fn source_image() -> SourceImage {
    SourceImage {
        bytes: Bytes::from_static(b"original"),
        content_type: "image/png".to_string(),
    }
}

/// One-shot upstream that answers 200 with a long declared body, sends only a
/// prefix of it, then either hangs up or stalls.
async fn serve_partial_body(hang_up: bool) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;
        socket
            .write_all(
                b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 100000\r\n\r\n{\"candidates\":[{\"content\":",
            )
            .await
            .unwrap();
        socket.flush().await.unwrap();
        if hang_up {
            drop(socket);
        } else {
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(socket);
        }
    });
    format!("http://{addr}/v1beta")
}

async fn read_request(socket: &mut tokio::net::TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        let Some(headers_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let headers = String::from_utf8_lossy(&buf[..headers_end]).to_ascii_lowercase();
        let content_length = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if buf.len() >= headers_end + 4 + content_length {
            return;
        }
    }
}

fn upload(style: &str) -> Request<Body> {
    let body = multipart_body(
        BOUNDARY,
        &[
            ("file", Some("photo.png"), Some("image/png"), b"original".as_slice()),
            ("style", None, None, style.as_bytes()),
        ],
    );
    let mut request = Request::builder()
        .method("POST")
        .uri("/generate")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([198, 51, 100, 9], 51_000))));
    request
}

#[tokio::test]
async fn generation_round_trips_through_the_api() {
    if should_skip_httpmock() {
        return;
    }

    let upstream = MockServer::start();
    let mock = upstream.mock(|when, then| {
        when.method(POST)
            .path(GENERATE_PATH)
            .header("x-goog-api-key", "AIza-test")
            // "original" base64-encoded, with the uploaded MIME type passed through.
            .body_includes("\"data\":\"b3JpZ2luYWw=\"")
            .body_includes("\"mime_type\":\"image/png\"")
            .body_includes("royal British portrait");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({
                "candidates": [{
                    "content": { "parts": [
                        { "text": "Here you go." },
                        { "inlineData": { "mimeType": "image/png", "data": "cmVzdHlsZWQ=" } }
                    ] },
                    "finishReason": "STOP"
                }]
            }));
    });

    let dir = tempfile::tempdir().unwrap();
    let artifacts = Arc::new(ArtifactStore::open_dir(dir.path()).await.unwrap());
    let app = app(&upstream, artifacts.clone());

    let response = app.clone().oneshot(upload("royal")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: GenerateResponse = serde_json::from_slice(&bytes).unwrap();
    mock.assert();
    assert_eq!(artifacts.len(), 1);

    let download = Request::builder()
        .method("GET")
        .uri(&parsed.download_url)
        .body(Body::empty())
        .unwrap();
    let download = app.oneshot(download).await.unwrap();
    assert_eq!(download.status(), StatusCode::OK);
    assert_eq!(download.headers()[header::CONTENT_TYPE], "image/png");
    let bytes = to_bytes(download.into_body(), usize::MAX).await.unwrap();
    assert_eq!(bytes.as_ref(), b"restyled");
}

#[tokio::test]
async fn style_instruction_is_sent_for_each_style() {
    if should_skip_httpmock() {
        return;
    }

    let upstream = MockServer::start();
    let mut mocks = Vec::new();
    for style in Style::ALL {
        let instruction = style.instruction();
        mocks.push(upstream.mock(|when, then| {
            when.method(POST)
                .path(GENERATE_PATH)
                .body_includes(instruction);
            then.status(200).json_body(json!({
                "candidates": [{ "content": { "parts": [
                    { "inline_data": { "data": "cmVzdHlsZWQ=" } }
                ] } }]
            }));
        }));
    }

    let app = app(&upstream, Arc::new(ArtifactStore::in_memory()));
    for style in Style::ALL {
        let response = app.clone().oneshot(upload(style.as_str())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "style: {style}");
    }

    for mock in &mocks {
        mock.assert();
    }
}

#[tokio::test]
async fn upstream_error_is_bad_gateway_without_leaking_detail() {
    if should_skip_httpmock() {
        return;
    }

    let upstream = MockServer::start();
    let mock = upstream.mock(|when, then| {
        when.method(POST).path(GENERATE_PATH);
        then.status(503)
            .header("content-type", "application/json")
            .body(r#"{"error":{"message":"model overloaded, key AIza-test"}}"#);
    });

    let artifacts = Arc::new(ArtifactStore::in_memory());
    let app = app(&upstream, artifacts.clone());

    let response = app.oneshot(upload("classic")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let err: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
    assert!(!err.error.contains("overloaded"));
    assert!(!err.error.contains("AIza"));
    assert!(artifacts.is_empty());
    mock.assert();
}

#[tokio::test]
async fn response_without_image_is_server_error() {
    if should_skip_httpmock() {
        return;
    }

    let upstream = MockServer::start();
    let mock = upstream.mock(|when, then| {
        when.method(POST).path(GENERATE_PATH);
        then.status(200).json_body(json!({
            "candidates": [{
                "content": { "parts": [ { "text": "I can only describe this photo." } ] },
                "finishReason": "STOP"
            }]
        }));
    });

    let artifacts = Arc::new(ArtifactStore::in_memory());
    let app = app(&upstream, artifacts.clone());

    let response = app.oneshot(upload("modern")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(artifacts.is_empty());
    mock.assert();
}

#[tokio::test]
async fn blocked_prompt_is_bad_request() {
    if should_skip_httpmock() {
        return;
    }

    let upstream = MockServer::start();
    let mock = upstream.mock(|when, then| {
        when.method(POST).path(GENERATE_PATH);
        then.status(200)
            .json_body(json!({ "promptFeedback": { "blockReason": "SAFETY" } }));
    });

    let app = app(&upstream, Arc::new(ArtifactStore::in_memory()));

    let response = app.oneshot(upload("classic")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let err: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
    assert!(err.error.contains("safety"));
    mock.assert();
}

#[tokio::test]
async fn connection_lost_mid_body_is_upstream_error() {
    if should_skip_httpmock() {
        return;
    }

    let base_url = serve_partial_body(true).await;
    let client = GeminiImageClient::new("AIza-test", Duration::from_secs(10))
        .unwrap()
        .with_base_url(base_url);

    let err = client
        .generate(&source_image(), Style::Classic.instruction())
        .await
        .unwrap_err();
    assert!(
        matches!(err, PortraitError::Upstream { .. }),
        "unexpected error: {err:?}"
    );
    assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn timeout_mid_body_is_upstream_error() {
    if should_skip_httpmock() {
        return;
    }

    let base_url = serve_partial_body(false).await;
    let client = GeminiImageClient::new("AIza-test", Duration::from_millis(500))
        .unwrap()
        .with_base_url(base_url);

    let err = client
        .generate(&source_image(), Style::Classic.instruction())
        .await
        .unwrap_err();
    assert!(
        matches!(err, PortraitError::Upstream { .. }),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn slow_upstream_times_out_as_bad_gateway() {
    if should_skip_httpmock() {
        return;
    }

    let upstream = MockServer::start();
    upstream.mock(|when, then| {
        when.method(POST).path(GENERATE_PATH);
        then.status(200)
            .delay(Duration::from_secs(3))
            .json_body(json!({
                "candidates": [{ "content": { "parts": [
                    { "inlineData": { "mimeType": "image/png", "data": "cmVzdHlsZWQ=" } }
                ] } }]
            }));
    });

    let artifacts = Arc::new(ArtifactStore::in_memory());
    let app = app_with_timeout(&upstream, artifacts.clone(), Duration::from_millis(300));

    let response = app.oneshot(upload("classic")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let err: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
    let generic = PortraitError::Upstream {
        status: None,
        message: String::new(),
    }
    .public_message();
    assert_eq!(err.error, generic);
    assert!(artifacts.is_empty());
}
