//! Common test utilities for API testing with mocks.
//!
//! This module provides a test fixture that builds the router in process
//! with mock collaborators injected, so the HTTP surface can be exercised
//! without a peer-to-peer engine, yt-dlp or ffmpeg installed.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use jobhub_core::config::StoreBackend;
use jobhub_core::{ChannelSink, Config, Fanout, JobManager, MemoryJobStore};
use jobhub_server::api::create_router;
use jobhub_server::state::AppState;

/// Re-export mocks and fixtures for test convenience
pub use jobhub_core::testing::{fixtures, MockExtractor, MockPeerEngine, MockTranscoder};

pub const MAGNET: &str =
    "magnet:?xt=urn:btih:0123456789abcdef0123456789abcdef01234567&dn=Show";

/// Test fixture with an in-process router and controllable mocks.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_submit() {
///     let fixture = TestFixture::new();
///
///     let response = fixture.post("/api/v1/jobs/transfer", json!({
///         "url": "https://example.com/v/1"
///     })).await;
///
///     assert_eq!(response.status, 201);
/// }
/// ```
pub struct TestFixture {
    pub router: Router,
    pub engine: MockPeerEngine,
    pub extractor: MockExtractor,
    pub transcoder: MockTranscoder,
    pub events: ChannelSink,
    /// Storage root of the job manager
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    /// Parsed JSON body, `Null` when empty or not JSON.
    pub body: Value,
    pub text: String,
}

impl TestFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let engine = MockPeerEngine::with_save_path(temp_dir.path().join("torrents"));
        let extractor = MockExtractor::new();
        let transcoder = MockTranscoder::new();

        let mut config = Config::default();
        config.storage.root = temp_dir.path().to_path_buf();
        config.store.backend = StoreBackend::Memory;

        let events = ChannelSink::new(64);
        let manager = JobManager::new(
            Arc::new(MemoryJobStore::default()),
            fixtures::collaborators(&engine, &extractor, &transcoder),
            Fanout::new().with_sink(Arc::new(events.clone())),
            fixtures::fast_settings(temp_dir.path()),
        );

        let state = Arc::new(AppState::new(config, manager, events.clone()));
        let router = create_router(state);

        Self {
            router,
            engine,
            extractor,
            transcoder,
            events,
            temp_dir,
        }
    }

    /// Three files of 1000, 2000 and 3000 bytes for every new torrent.
    pub async fn with_three_files(self) -> Self {
        self.engine
            .set_default_metadata(fixtures::torrent_metadata("Show", &[1000, 2000, 3000], 100))
            .await;
        self
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        self.send(
            Request::builder()
                .method("POST")
                .uri(path)
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    /// POST a multipart form; `file` parts carry `(name, filename, bytes)`.
    pub async fn post_multipart(
        &self,
        path: &str,
        files: &[(&str, &str, &[u8])],
        fields: &[(&str, &str)],
    ) -> TestResponse {
        let boundary = "jobhub-test-boundary";
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
            );
            body.extend_from_slice(value.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
        for (name, filename, bytes) in files {
            body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    name, filename
                )
                .as_bytes(),
            );
            body.extend_from_slice(b"Content-Type: application/x-bittorrent\r\n\r\n");
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

        self.send(
            Request::builder()
                .method("POST")
                .uri(path)
                .header(
                    "Content-Type",
                    format!("multipart/form-data; boundary={}", boundary),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }

    /// Poll `GET /api/v1/jobs/{id}` until its status matches.
    pub async fn wait_status(&self, job_id: &str, status: &str) -> Value {
        let path = format!("/api/v1/jobs/{}", job_id);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let response = self.get(&path).await;
            if response.body["status"] == status {
                return response.body;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {} never reached {}; last: {}",
                job_id,
                status,
                response.body
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        self.send(request_builder.body(body).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let text = String::from_utf8_lossy(&body_bytes).into_owned();
        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body, text }
    }
}

/// Bencoded single-file `.torrent` with zeroed piece hashes.
pub fn single_file_torrent(name: &str, length: u64, piece_length: u64) -> Vec<u8> {
    let pieces = length.div_ceil(piece_length) as usize;
    let mut out = Vec::new();
    out.extend_from_slice(b"d4:infod");
    out.extend_from_slice(format!("6:lengthi{}e", length).as_bytes());
    out.extend_from_slice(format!("4:name{}:{}", name.len(), name).as_bytes());
    out.extend_from_slice(format!("12:piece lengthi{}e", piece_length).as_bytes());
    out.extend_from_slice(format!("6:pieces{}:", pieces * 20).as_bytes());
    out.extend(std::iter::repeat(0u8).take(pieces * 20));
    out.extend_from_slice(b"ee");
    out
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status, $response.status, $response.text
        );
    };
}
