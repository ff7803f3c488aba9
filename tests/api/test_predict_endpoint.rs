// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Predict endpoint tests for POST /predict
//!
//! These tests verify that the router:
//! - Rejects requests while the detector is unavailable
//! - Rejects uploads without a `file` field
//! - Returns the verification status, labels, count and artifact path
//! - Serves the annotated image under /outputs
//! - Removes the request-scoped upload copy on success and failure

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use microbe_detect_node::{
    api::{build_router, AppState},
    storage::{MockContentStorage, StorageError},
};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot`

use crate::common::{
    build_pipeline, sample_png_bytes, StubDetector, StubVerifier, VerifierBehaviour,
};

const BOUNDARY: &str = "microbe-test-boundary";

fn multipart_body(field: &str, file_name: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn predict_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/predict")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn app_with_reply(output_dir: &Path, reply: &str, storage: Arc<MockContentStorage>) -> Router {
    let verifier = Arc::new(StubVerifier::replying(reply));
    let pipeline = build_pipeline(
        Arc::new(StubDetector::amoeba()),
        verifier.clone(),
        storage,
        output_dir,
    );
    build_router(AppState {
        pipeline: Some(Arc::new(pipeline)),
        models: vec![],
        verifier,
        output_dir: output_dir.to_path_buf(),
    })
}

fn app_without_detector(output_dir: &Path) -> Router {
    build_router(AppState {
        pipeline: None,
        models: vec![],
        verifier: Arc::new(StubVerifier::replying("OK")),
        output_dir: output_dir.to_path_buf(),
    })
}

async fn health_body(app: Router) -> Value {
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    json_body(response).await
}

/// Files in the system temp dir left over from an upload named `marker`
fn leftover_uploads(marker: &str) -> usize {
    std::fs::read_dir(std::env::temp_dir())
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| {
                    let name = e.file_name().to_string_lossy().to_string();
                    name.starts_with("temp_") && name.ends_with(marker)
                })
                .count()
        })
        .unwrap_or(0)
}

#[tokio::test]
async fn test_root_message() {
    let dir = TempDir::new().unwrap();
    let response = app_without_detector(dir.path())
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        serde_json::json!({"message": "Microbe Detection API is running."})
    );
}

#[tokio::test]
async fn test_health_reports_degraded_without_detector() {
    let dir = TempDir::new().unwrap();
    let body = health_body(app_without_detector(dir.path())).await;

    assert_eq!(body["status"], "degraded");
    assert_eq!(body["verifier"]["model"], "stub");
    assert_eq!(body["verifier"]["available"], true);
}

#[tokio::test]
async fn test_health_reports_healthy_when_everything_answers() {
    let dir = TempDir::new().unwrap();
    let app = app_with_reply(dir.path(), "OK", Arc::new(MockContentStorage::new()));
    let body = health_body(app).await;

    assert_eq!(body["status"], "healthy");
    assert_eq!(body["verifier"]["available"], true);
}

#[tokio::test]
async fn test_health_reports_unavailable_verifier() {
    let dir = TempDir::new().unwrap();
    let verifier = Arc::new(StubVerifier::new(VerifierBehaviour::MissingKey));
    let pipeline = build_pipeline(
        Arc::new(StubDetector::amoeba()),
        verifier.clone(),
        Arc::new(MockContentStorage::new()),
        dir.path(),
    );
    let app = build_router(AppState {
        pipeline: Some(Arc::new(pipeline)),
        models: vec![],
        verifier,
        output_dir: dir.path().to_path_buf(),
    });
    let body = health_body(app).await;

    assert_eq!(body["status"], "degraded");
    assert_eq!(body["verifier"]["available"], false);
}

#[tokio::test]
async fn test_predict_without_detector_is_500() {
    let dir = TempDir::new().unwrap();
    let response = app_without_detector(dir.path())
        .oneshot(predict_request(multipart_body(
            "file",
            "slide.png",
            &sample_png_bytes(),
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        json_body(response).await["detail"],
        "Detection model is not available."
    );
}

#[tokio::test]
async fn test_predict_missing_file_field_is_400() {
    let dir = TempDir::new().unwrap();
    let app = app_with_reply(dir.path(), "OK", Arc::new(MockContentStorage::new()));

    let response = app
        .oneshot(predict_request(multipart_body(
            "image",
            "slide.png",
            &sample_png_bytes(),
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(response).await["detail"]
        .as_str()
        .unwrap()
        .contains("file"));
}

#[tokio::test]
async fn test_predict_confirmed() {
    let dir = TempDir::new().unwrap();
    let marker = "_predict_confirmed_case.png";
    let app = app_with_reply(dir.path(), "OK", Arc::new(MockContentStorage::new()));

    let response = app
        .oneshot(predict_request(multipart_body(
            "file",
            "predict_confirmed_case.png",
            &sample_png_bytes(),
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["verification_status"], "OK");
    assert_eq!(body["labels"], serde_json::json!(["amoeba"]));
    assert_eq!(body["count"], 1);

    let annotated = body["annotated_image"].as_str().unwrap();
    assert!(!annotated.contains('\\'));
    assert!(annotated.ends_with(marker));
    assert!(Path::new(annotated)
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("processed_temp_"));
    assert!(body["ipfs_image_cid"].is_string());
    assert!(body["ipfs_json_url"]
        .as_str()
        .unwrap()
        .starts_with("https://gateway.pinata.cloud/ipfs/"));

    assert_eq!(leftover_uploads(marker), 0);
}

#[tokio::test]
async fn test_predict_corrected() {
    let dir = TempDir::new().unwrap();
    let app = app_with_reply(
        dir.path(),
        r#"[{"box":[1,2,3,4],"label":"paramecium"},{"box":[5,6,7,8],"label":"euglena"}]"#,
        Arc::new(MockContentStorage::new()),
    );

    let response = app
        .oneshot(predict_request(multipart_body(
            "file",
            "slide.png",
            &sample_png_bytes(),
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["verification_status"], "CORRECTED");
    assert_eq!(body["labels"], serde_json::json!(["paramecium", "euglena"]));
    assert_eq!(body["count"], 2);
}

#[tokio::test]
async fn test_predict_failure_is_500_and_cleans_up() {
    let dir = TempDir::new().unwrap();
    let marker = "_predict_failure_case.png";
    let storage = Arc::new(MockContentStorage::new());
    storage
        .inject_error(StorageError::Server {
            status: 403,
            body: "forbidden".to_string(),
        })
        .await;
    let app = app_with_reply(dir.path(), "OK", storage);

    let response = app
        .oneshot(predict_request(multipart_body(
            "file",
            "predict_failure_case.png",
            &sample_png_bytes(),
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json_body(response).await["detail"]
        .as_str()
        .unwrap()
        .contains("403"));
    assert_eq!(leftover_uploads(marker), 0);
}

#[tokio::test]
async fn test_annotated_image_is_served() {
    let dir = TempDir::new().unwrap();
    let app = app_with_reply(dir.path(), "OK", Arc::new(MockContentStorage::new()));

    let response = app
        .clone()
        .oneshot(predict_request(multipart_body(
            "file",
            "served.png",
            &sample_png_bytes(),
        )))
        .await
        .unwrap();
    let body = json_body(response).await;
    let file_name = Path::new(body["annotated_image"].as_str().unwrap())
        .file_name()
        .unwrap()
        .to_string_lossy()
        .to_string();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/outputs/{}", file_name))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(image::load_from_memory(&bytes).is_ok());
}
