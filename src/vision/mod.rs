// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Vision processing for microscope images
//!
//! This module provides:
//! - Object detection via a YOLO ONNX export (CPU)
//! - Verification of detections by a hosted VLM, with reconciliation
//! - Rendering of the final detections onto the image

pub mod annotate;
pub mod detection;
pub mod image_utils;
pub mod model_manager;
pub mod verification;
pub mod vlm_client;

pub use annotate::{annotated_output_path, AnnotationRenderer, RenderError};
pub use detection::{Detection, DetectorOutput, ObjectDetector, CONFIDENCE_THRESHOLD};
pub use image_utils::{detect_format, load_image, ImageError, ImageInfo};
pub use model_manager::{VisionModelConfig, VisionModelInfo, VisionModelManager};
pub use verification::{
    reconcile, verify_detections, VerificationOutcome, VerificationStatus,
};
pub use vlm_client::{GeminiClient, GeminiConfig, Verifier, VerifierError};
