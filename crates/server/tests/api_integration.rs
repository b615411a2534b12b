//! API tests for single-job endpoints using the in-process router.
//!
//! Run with: cargo test -p transmute-server --test api_integration

mod common;

use axum::http::StatusCode;
use serde_json::{json, Value};

use common::TestFixture;

// =============================================================================
// Health, config, formats, metrics
// =============================================================================

#[tokio::test]
async fn test_health() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/health").await;

    assert_status!(response, StatusCode::OK);
    assert_json_path!(response.body, "status", json!("ok"));
}

#[tokio::test]
async fn test_config_hides_paths() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/config").await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["storage"]["max_upload_mb"], 1);
    assert!(response.body["storage"].get("upload_dir").is_none());
    assert!(response.body.get("database").is_none());
}

#[tokio::test]
async fn test_formats_lists_categories_and_operations() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/formats").await;

    assert_status!(response, StatusCode::OK);
    let images = response.body["formats"]["image"].as_array().unwrap();
    assert!(images.contains(&json!("png")));
    assert!(response.body["formats"]["audio"]
        .as_array()
        .unwrap()
        .contains(&json!("mp3")));
    assert_eq!(response.body["operations"], json!(["sha256"]));
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new().await;
    fixture.get("/api/v1/health").await;

    let response = fixture.get("/metrics").await;
    assert_status!(response, StatusCode::OK);
    let text = String::from_utf8(response.bytes.to_vec()).unwrap();
    assert!(text.contains("transmute_http_requests_total"));
    assert!(text.contains("transmute_jobs_by_status"));
}

// =============================================================================
// Uploads
// =============================================================================

#[tokio::test]
async fn test_upload_creates_job() {
    let fixture = TestFixture::new().await;
    let response = fixture.upload("Holiday Photo.PNG", b"pixels").await;

    assert_status!(response, StatusCode::CREATED);
    assert_json_path!(response.body, "status", json!("uploaded"));
    assert_json_path!(response.body, "source_format", json!("png"));
    assert_json_path!(response.body, "original_filename", json!("Holiday Photo.PNG"));
    assert_json_path!(response.body, "file_size_bytes", json!(6));
    assert_json_path!(response.body, "download_url", Value::Null);
    assert_eq!(TestFixture::file_count(&fixture.upload_dir()), 1);
}

#[tokio::test]
async fn test_upload_unknown_extension_rejected() {
    let fixture = TestFixture::new().await;
    let response = fixture.upload("setup.exe", b"MZ").await;

    assert_status!(response, StatusCode::BAD_REQUEST);
    assert_json_path!(response.body, "kind", json!("unsupported_format"));

    let list = fixture.get("/api/v1/conversions").await;
    assert_json_path!(list.body, "total", json!(0));
    assert_eq!(TestFixture::file_count(&fixture.upload_dir()), 0);
}

#[tokio::test]
async fn test_upload_over_limit_rejected_without_job() {
    let fixture = TestFixture::new().await;
    let too_big = vec![7u8; 1024 * 1024 + 1];
    let response = fixture.upload("big.png", &too_big).await;

    assert_status!(response, StatusCode::PAYLOAD_TOO_LARGE);
    assert_json_path!(response.body, "kind", json!("size_exceeded"));

    let list = fixture.get("/api/v1/conversions").await;
    assert_json_path!(list.body, "total", json!(0));
    assert_eq!(TestFixture::file_count(&fixture.upload_dir()), 0);
}

#[tokio::test]
async fn test_upload_without_file_field() {
    let fixture = TestFixture::new().await;
    let response = fixture
        .post_multipart("/api/v1/uploads", "attachment", &[("a.png", &b"x"[..])])
        .await;

    assert_status!(response, StatusCode::BAD_REQUEST);
    assert_json_path!(response.body, "kind", json!("invalid_request"));
}

// =============================================================================
// Conversions
// =============================================================================

#[tokio::test]
async fn test_convert_and_download() {
    let fixture = TestFixture::new().await;
    let id = fixture.uploaded_id("Holiday Photo.png", b"pixels").await;

    let response = fixture
        .post(
            &format!("/api/v1/conversions/{}/convert", id),
            json!({ "target_format": "JPG" }),
        )
        .await;
    assert_status!(response, StatusCode::OK);
    assert_json_path!(response.body, "status", json!("completed"));
    assert_json_path!(response.body, "target_format", json!("jpg"));
    assert_json_path!(
        response.body,
        "download_url",
        json!(format!("/api/v1/conversions/{}/download", id))
    );
    assert!(response.body["completed_at"].is_string());
    assert_eq!(fixture.image.call_count(), 1);

    let download = fixture
        .get(&format!("/api/v1/conversions/{}/download", id))
        .await;
    assert_status!(download, StatusCode::OK);
    assert_eq!(&download.bytes[..], b"converted by image");
    let disposition = download.header("content-disposition").unwrap();
    assert!(disposition.starts_with("attachment"));
    assert!(disposition.contains("filename=\"Holiday Photo.jpg\""));
    assert!(disposition.contains("filename*=UTF-8''Holiday%20Photo.jpg"));
}

#[tokio::test]
async fn test_convert_completed_job_conflicts() {
    let fixture = TestFixture::new().await;
    let id = fixture.uploaded_id("a.png", b"pixels").await;
    let path = format!("/api/v1/conversions/{}/convert", id);

    let first = fixture.post(&path, json!({ "target_format": "jpg" })).await;
    assert_status!(first, StatusCode::OK);

    let second = fixture.post(&path, json!({ "target_format": "webp" })).await;
    assert_status!(second, StatusCode::CONFLICT);
    assert_json_path!(second.body, "kind", json!("already_terminal"));
    assert_eq!(fixture.image.call_count(), 1);
}

#[tokio::test]
async fn test_convert_unknown_job() {
    let fixture = TestFixture::new().await;
    let response = fixture
        .post(
            "/api/v1/conversions/does-not-exist/convert",
            json!({ "target_format": "jpg" }),
        )
        .await;

    assert_status!(response, StatusCode::NOT_FOUND);
    assert_json_path!(response.body, "kind", json!("not_found"));
}

#[tokio::test]
async fn test_convert_invalid_pairs() {
    let fixture = TestFixture::new().await;
    let id = fixture.uploaded_id("a.png", b"pixels").await;
    let path = format!("/api/v1/conversions/{}/convert", id);

    let same = fixture.post(&path, json!({ "target_format": "png" })).await;
    assert_status!(same, StatusCode::BAD_REQUEST);
    assert_json_path!(same.body, "kind", json!("invalid_conversion"));

    let cross = fixture.post(&path, json!({ "target_format": "mp3" })).await;
    assert_status!(cross, StatusCode::BAD_REQUEST);
    assert_json_path!(cross.body, "kind", json!("invalid_conversion"));

    let unknown = fixture.post(&path, json!({ "target_format": "xyz" })).await;
    assert_status!(unknown, StatusCode::BAD_REQUEST);
    assert_json_path!(unknown.body, "kind", json!("unsupported_format"));

    let empty = fixture.post(&path, json!({ "target_format": "  " })).await;
    assert_status!(empty, StatusCode::BAD_REQUEST);

    // Rejected requests leave the job untouched
    let job = fixture.get(&format!("/api/v1/conversions/{}", id)).await;
    assert_json_path!(job.body, "status", json!("uploaded"));
    assert_eq!(fixture.image.call_count(), 0);
}

#[tokio::test]
async fn test_plugin_failure_persists_failed_state() {
    let fixture = TestFixture::new().await;
    let id = fixture.uploaded_id("song.mp3", b"id3").await;

    let response = fixture
        .post(
            &format!("/api/v1/conversions/{}/convert", id),
            json!({ "target_format": "wav" }),
        )
        .await;
    assert_status!(response, StatusCode::INTERNAL_SERVER_ERROR);
    assert_json_path!(response.body, "kind", json!("conversion_failure"));

    let job = fixture.get(&format!("/api/v1/conversions/{}", id)).await;
    assert_json_path!(job.body, "status", json!("failed"));
    assert_json_path!(job.body, "failure_kind", json!("conversion_failure"));
    assert!(job.body["error_message"]
        .as_str()
        .unwrap()
        .contains("corrupt header"));
    assert_json_path!(job.body, "download_url", Value::Null);
}

#[tokio::test]
async fn test_unimplemented_pair_is_501() {
    let fixture = TestFixture::new().await;
    let id = fixture.uploaded_id("clip.mp4", b"ftyp").await;

    let response = fixture
        .post(
            &format!("/api/v1/conversions/{}/convert", id),
            json!({ "target_format": "mkv" }),
        )
        .await;
    assert_status!(response, StatusCode::NOT_IMPLEMENTED);
    assert_json_path!(response.body, "kind", json!("unsupported_conversion"));

    let job = fixture.get(&format!("/api/v1/conversions/{}", id)).await;
    assert_json_path!(job.body, "status", json!("failed"));
    assert_json_path!(job.body, "failure_kind", json!("unsupported_conversion"));
}

#[tokio::test]
async fn test_download_before_completion() {
    let fixture = TestFixture::new().await;
    let id = fixture.uploaded_id("a.png", b"pixels").await;

    let response = fixture
        .get(&format!("/api/v1/conversions/{}/download", id))
        .await;
    assert_status!(response, StatusCode::CONFLICT);
    assert_json_path!(response.body, "kind", json!("not_ready"));
}

#[tokio::test]
async fn test_download_after_output_removed() {
    let fixture = TestFixture::new().await;
    let id = fixture.uploaded_id("a.png", b"pixels").await;
    fixture
        .post(
            &format!("/api/v1/conversions/{}/convert", id),
            json!({ "target_format": "jpg" }),
        )
        .await;

    for entry in std::fs::read_dir(fixture.output_dir()).unwrap() {
        std::fs::remove_file(entry.unwrap().path()).unwrap();
    }

    let response = fixture
        .get(&format!("/api/v1/conversions/{}/download", id))
        .await;
    assert_status!(response, StatusCode::GONE);
    assert_json_path!(response.body, "kind", json!("output_missing"));
}

// =============================================================================
// Operations
// =============================================================================

#[tokio::test]
async fn test_sha256_operation() {
    let fixture = TestFixture::new().await;
    let id = fixture.uploaded_id("report.pdf", b"hello").await;

    let response = fixture
        .post(&format!("/api/v1/conversions/{}/operations/sha256", id), json!({}))
        .await;
    assert_status!(response, StatusCode::OK);
    assert_json_path!(response.body, "status", json!("completed"));
    assert_json_path!(response.body, "target_format", json!("sha256"));

    let download = fixture
        .get(&format!("/api/v1/conversions/{}/download", id))
        .await;
    assert_status!(download, StatusCode::OK);
    let text = String::from_utf8(download.bytes.to_vec()).unwrap();
    assert!(text.starts_with("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"));
    assert!(download
        .header("content-disposition")
        .unwrap()
        .contains("report.sha256"));
}

#[tokio::test]
async fn test_unknown_operation_is_501() {
    let fixture = TestFixture::new().await;
    let id = fixture.uploaded_id("report.pdf", b"hello").await;

    let response = fixture
        .post(&format!("/api/v1/conversions/{}/operations/crc32", id), json!({}))
        .await;
    assert_status!(response, StatusCode::NOT_IMPLEMENTED);

    let job = fixture.get(&format!("/api/v1/conversions/{}", id)).await;
    assert_json_path!(job.body, "status", json!("uploaded"));
}

// =============================================================================
// Listing and deletion
// =============================================================================

#[tokio::test]
async fn test_list_with_filter_and_pagination() {
    let fixture = TestFixture::new().await;
    let done = fixture.uploaded_id("a.png", b"1").await;
    fixture.uploaded_id("b.png", b"2").await;
    fixture.uploaded_id("c.png", b"3").await;
    fixture
        .post(
            &format!("/api/v1/conversions/{}/convert", done),
            json!({ "target_format": "gif" }),
        )
        .await;

    let all = fixture.get("/api/v1/conversions?limit=2").await;
    assert_status!(all, StatusCode::OK);
    assert_json_path!(all.body, "total", json!(3));
    assert_json_path!(all.body, "limit", json!(2));
    assert_eq!(all.body["conversions"].as_array().unwrap().len(), 2);

    let rest = fixture.get("/api/v1/conversions?limit=2&offset=2").await;
    assert_eq!(rest.body["conversions"].as_array().unwrap().len(), 1);

    let completed = fixture.get("/api/v1/conversions?status=completed").await;
    assert_json_path!(completed.body, "total", json!(1));
    assert_eq!(completed.body["conversions"][0]["id"], json!(done));

    let bad = fixture.get("/api/v1/conversions?status=sideways").await;
    assert_status!(bad, StatusCode::BAD_REQUEST);
    assert_json_path!(bad.body, "kind", json!("invalid_request"));
}

#[tokio::test]
async fn test_delete_removes_record_and_files() {
    let fixture = TestFixture::new().await;
    let id = fixture.uploaded_id("a.png", b"pixels").await;
    fixture
        .post(
            &format!("/api/v1/conversions/{}/convert", id),
            json!({ "target_format": "jpg" }),
        )
        .await;
    assert_eq!(TestFixture::file_count(&fixture.output_dir()), 1);

    let response = fixture.delete(&format!("/api/v1/conversions/{}", id)).await;
    assert_status!(response, StatusCode::OK);
    assert_json_path!(response.body, "deleted", json!(true));

    assert_eq!(TestFixture::file_count(&fixture.upload_dir()), 0);
    assert_eq!(TestFixture::file_count(&fixture.output_dir()), 0);

    let gone = fixture.get(&format!("/api/v1/conversions/{}", id)).await;
    assert_status!(gone, StatusCode::NOT_FOUND);

    let again = fixture.delete(&format!("/api/v1/conversions/{}", id)).await;
    assert_status!(again, StatusCode::NOT_FOUND);
}
