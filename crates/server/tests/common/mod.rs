//! Common test utilities for API testing with mock converters.
//!
//! This module provides a test fixture that creates an in-process server
//! with mock converter plugins, a file-backed job store, and storage
//! directories inside a temp dir.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use transmute_core::{
    testing::MockConverter, Category, ChecksumConverter, Config, ConversionService,
    ConverterDispatch, DatabaseConfig, FileStorage, JobStore, RateLimitConfig, SqliteJobStore,
    StorageConfig,
};
use transmute_server::state::AppState;

const BOUNDARY: &str = "transmute-test-boundary";

/// Test fixture for API testing with mock converters.
///
/// Plugins wired by default:
/// - image: succeeds, writes `converted by image`
/// - audio: fails with `corrupt header`
/// - video: reports the pair as not implemented
/// - `sha256` operation: the real checksum plugin
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_upload() {
///     let fixture = TestFixture::new().await;
///     let response = fixture.upload("photo.png", b"pixels").await;
///     assert_eq!(response.status, 201);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Mock image plugin
    pub image: Arc<MockConverter>,
    /// Service behind the router, for direct inspection
    pub service: ConversionService,
    /// Temporary directory for the database and storage
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub bytes: Bytes,
    pub body: Value,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl TestFixture {
    /// Create a new test fixture with a 1 MB upload limit.
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let config = Config {
            database: DatabaseConfig {
                path: temp_dir.path().join("test.db"),
            },
            storage: StorageConfig {
                upload_dir: temp_dir.path().join("uploads"),
                output_dir: temp_dir.path().join("outputs"),
                max_upload_mb: 1,
            },
            rate_limit: RateLimitConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        };

        let image = Arc::new(MockConverter::new("image"));
        let mut dispatch = ConverterDispatch::new();
        dispatch.register_category(Category::Image, image.clone());
        dispatch.register_category(
            Category::Audio,
            Arc::new(MockConverter::new("audio").failing("corrupt header")),
        );
        dispatch.register_category(
            Category::Video,
            Arc::new(MockConverter::new("video").unsupported()),
        );
        dispatch.register_operation("sha256", "sha256", Arc::new(ChecksumConverter::new()));

        let store: Arc<dyn JobStore> = Arc::new(
            SqliteJobStore::new(&config.database.path).expect("Failed to create job store"),
        );
        let storage = FileStorage::new(&config.storage.upload_dir, &config.storage.output_dir);
        storage.ensure_dirs().await.expect("Failed to create dirs");

        let service = ConversionService::new(
            store,
            Arc::new(dispatch),
            storage,
            config.conversion.clone(),
        )
        .with_max_upload_bytes(config.storage.max_upload_bytes());

        let state = Arc::new(AppState::new(config, service.clone(), None));
        let router = transmute_server::api::create_router(state);

        Self {
            router,
            image,
            service,
            temp_dir,
        }
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.temp_dir.path().join("uploads")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.temp_dir.path().join("outputs")
    }

    /// Number of regular files in a directory.
    pub fn file_count(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(Result::ok)
                    .filter(|e| e.path().is_file())
                    .count()
            })
            .unwrap_or(0)
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// Upload one file to `/api/v1/uploads`.
    pub async fn upload(&self, filename: &str, content: &[u8]) -> TestResponse {
        self.post_multipart("/api/v1/uploads", "file", &[(filename, content)])
            .await
    }

    /// Upload several files to `/api/v1/batch/upload`.
    pub async fn batch_upload(&self, files: &[(&str, &[u8])]) -> TestResponse {
        self.post_multipart("/api/v1/batch/upload", "files", files)
            .await
    }

    /// Upload a file and return its job id.
    pub async fn uploaded_id(&self, filename: &str, content: &[u8]) -> String {
        let response = self.upload(filename, content).await;
        assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.body);
        response.body["id"].as_str().unwrap().to_string()
    }

    /// Send a multipart POST with every file under the same field name.
    pub async fn post_multipart(
        &self,
        path: &str,
        field: &str,
        files: &[(&str, &[u8])],
    ) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(field, files)))
            .unwrap();
        self.send(request).await
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

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        TestResponse {
            status,
            headers,
            bytes,
            body,
        }
    }
}

/// Encode files as a `multipart/form-data` body.
pub fn multipart_body(field: &str, files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (filename, content) in files {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                field, filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}

/// Helper to assert a JSON path equals expected value.
#[macro_export]
macro_rules! assert_json_path {
    ($json:expr, $path:expr, $expected:expr) => {
        let actual = &$json[$path];
        assert_eq!(
            actual, &$expected,
            "Path '{}' expected {:?}, got {:?}",
            $path, $expected, actual
        );
    };
}
