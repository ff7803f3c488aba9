// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Detection pipeline: detect, verify, annotate, upload
//!
//! One call handles one image end to end. Steps run strictly in order and
//! nothing is shared between calls except the injected handles.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ServiceConfig;
use crate::storage::{create_storage, ContentStorage, StorageError};
use crate::vision::{
    annotated_output_path, verify_detections, AnnotationRenderer, Detection,
    ObjectDetector, RenderError, VerificationStatus, Verifier, VerifierError,
    CONFIDENCE_THRESHOLD,
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Verifier not configured: {0}")]
    Verifier(#[from] VerifierError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Image file not found: {0}")]
    InputNotFound(String),

    #[error("Failed to prepare output directory {path}: {message}")]
    OutputDir { path: String, message: String },

    #[error("Detection failed: {0}")]
    Detection(String),

    #[error("Rendering failed: {0}")]
    Render(#[from] RenderError),

    #[error("Worker task failed: {0}")]
    Task(String),
}

/// Everything produced for one processed image
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    source_image: PathBuf,
    verification_status: VerificationStatus,
    detections: Vec<Detection>,
    annotated_image: PathBuf,
    image_cid: Option<String>,
    image_url: Option<String>,
    summary_cid: Option<String>,
    summary_url: Option<String>,
}

impl PipelineResult {
    pub fn source_image(&self) -> &Path {
        &self.source_image
    }

    pub fn verification_status(&self) -> VerificationStatus {
        self.verification_status
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    pub fn labels(&self) -> Vec<String> {
        self.detections.iter().map(|d| d.label.clone()).collect()
    }

    /// Always the length of the final detection list
    pub fn final_count(&self) -> usize {
        self.detections.len()
    }

    pub fn annotated_image(&self) -> &Path {
        &self.annotated_image
    }

    pub fn image_cid(&self) -> Option<&str> {
        self.image_cid.as_deref()
    }

    pub fn image_url(&self) -> Option<&str> {
        self.image_url.as_deref()
    }

    pub fn summary_cid(&self) -> Option<&str> {
        self.summary_cid.as_deref()
    }

    pub fn summary_url(&self) -> Option<&str> {
        self.summary_url.as_deref()
    }

    /// JSON document pinned alongside the annotated image
    fn summary_json(&self) -> serde_json::Value {
        serde_json::json!({
            "source_image": self.source_image.to_string_lossy(),
            "verification_status": self.verification_status,
            "detected_objects": self.labels(),
            "final_count": self.final_count(),
            "annotated_image_path": self.annotated_image.to_string_lossy(),
            "ipfs_image_cid": self.image_cid,
            "ipfs_image_url": self.image_url,
        })
    }
}

pub struct Pipeline {
    detector: Arc<dyn ObjectDetector>,
    verifier: Arc<dyn Verifier>,
    storage: Arc<dyn ContentStorage>,
    renderer: Arc<AnnotationRenderer>,
    output_dir: PathBuf,
    confidence: f32,
}

impl Pipeline {
    pub fn new(
        detector: Arc<dyn ObjectDetector>,
        verifier: Arc<dyn Verifier>,
        storage: Arc<dyn ContentStorage>,
        renderer: Arc<AnnotationRenderer>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            detector,
            verifier,
            storage,
            renderer,
            output_dir: output_dir.into(),
            confidence: CONFIDENCE_THRESHOLD,
        }
    }

    /// Wire the storage and renderer described by `config` around an already
    /// loaded detector and verifier
    pub fn from_config(
        config: &ServiceConfig,
        detector: Arc<dyn ObjectDetector>,
        verifier: Arc<dyn Verifier>,
    ) -> anyhow::Result<Self> {
        let storage = create_storage(config.storage_backend, config.storage.clone())?;
        let renderer = Arc::new(AnnotationRenderer::from_font_path(
            config.font_path.as_deref(),
        ));

        Ok(Self::new(
            detector,
            verifier,
            storage,
            renderer,
            config.output_dir.clone(),
        ))
    }

    /// Run the full pipeline for the image at `image_path`
    pub async fn process_image(&self, image_path: &Path) -> Result<PipelineResult, PipelineError> {
        self.verifier.preflight()?;
        self.storage.preflight()?;

        if !tokio::fs::try_exists(image_path).await.unwrap_or(false) {
            return Err(PipelineError::InputNotFound(
                image_path.display().to_string(),
            ));
        }

        let name = image_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        info!("===== Processing {} =====", name);

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| PipelineError::OutputDir {
                path: self.output_dir.display().to_string(),
                message: e.to_string(),
            })?;

        info!("--- Step 1: Running detector ---");
        let detector = Arc::clone(&self.detector);
        let source = image_path.to_path_buf();
        let confidence = self.confidence;
        let detected = tokio::task::spawn_blocking(move || detector.detect(&source, confidence))
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))?
            .map_err(|e| PipelineError::Detection(format!("{:#}", e)))?
            .to_detections();
        info!("Detector found {} objects", detected.len());

        info!("--- Step 2: Verifying detections ---");
        let outcome = verify_detections(self.verifier.as_ref(), image_path, &detected).await;
        let status = outcome.status();
        let detections = outcome.into_detections();

        info!("--- Step 3: Rendering annotated image ---");
        let renderer = Arc::clone(&self.renderer);
        let source = image_path.to_path_buf();
        let output = annotated_output_path(image_path, &self.output_dir);
        let to_draw = detections.clone();
        let annotated_image =
            tokio::task::spawn_blocking(move || renderer.render(&source, &to_draw, &output))
                .await
                .map_err(|e| PipelineError::Task(e.to_string()))??;
        info!("Annotated image saved to {}", annotated_image.display());

        info!("--- Step 4: Uploading results ---");
        let image_receipt = self.storage.upload_file(&annotated_image).await?;

        let mut result = PipelineResult {
            source_image: image_path.to_path_buf(),
            verification_status: status,
            detections,
            annotated_image,
            image_url: Some(self.storage.gateway_url(&image_receipt.cid)),
            image_cid: Some(image_receipt.cid),
            summary_cid: None,
            summary_url: None,
        };

        match self.storage.upload_json(&result.summary_json()).await {
            Ok(receipt) => {
                result.summary_url = Some(self.storage.gateway_url(&receipt.cid));
                result.summary_cid = Some(receipt.cid);
            }
            Err(e) => warn!("⚠️ Failed to upload result summary: {}", e),
        }

        info!(
            "===== Processing complete. Status: {}, Final Count: {} =====",
            result.verification_status,
            result.final_count()
        );

        Ok(result)
    }
}
