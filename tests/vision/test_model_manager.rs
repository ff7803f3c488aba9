// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Vision model manager tests
//!
//! The ONNX model itself is not shipped with the repository; these tests
//! cover the graceful paths around it.

use microbe_detect_node::vision::{
    detection::{yolo::load_class_names_file, YoloDetector},
    VisionModelConfig, VisionModelManager,
};
use std::path::Path;

#[tokio::test]
async fn test_manager_survives_missing_model() {
    let manager = VisionModelManager::new(VisionModelConfig {
        detector_model_path: Some("/nonexistent/models/best.onnx".to_string()),
        class_names_path: None,
    })
    .await
    .unwrap();

    assert!(!manager.has_detector());
    let models = manager.list_models();
    assert_eq!(models.len(), 1);
    assert!(!models[0].available);
}

#[test]
fn test_detector_reports_missing_file() {
    let err = match YoloDetector::new("/nonexistent/models/best.onnx", None) {
        Ok(_) => panic!("loading a missing model must fail"),
        Err(e) => e,
    };
    assert!(err.to_string().contains("not found"));
}

#[test]
fn test_class_names_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("names.txt");
    std::fs::write(&path, "amoeba\nparamecium\n\nvolvox\n").unwrap();

    let names = load_class_names_file(&path).unwrap();
    assert_eq!(names.get(&0).map(String::as_str), Some("amoeba"));
    assert_eq!(names.get(&1).map(String::as_str), Some("paramecium"));
    assert!(load_class_names_file(Path::new("/nonexistent/names.txt")).is_err());
}
