// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Vision model manager for loading the detector once at startup

use std::path::PathBuf;
use std::sync::Arc;

use crate::vision::detection::{ObjectDetector, YoloDetector};

const DEFAULT_DETECTOR_MODEL_PATH: &str = "./models/best.onnx";

/// Configuration for loading vision models
#[derive(Debug, Clone)]
pub struct VisionModelConfig {
    /// Path to the detector ONNX file (optional)
    pub detector_model_path: Option<String>,
    /// Path to a class names file, one label per line (optional)
    pub class_names_path: Option<String>,
}

impl Default for VisionModelConfig {
    fn default() -> Self {
        Self {
            detector_model_path: Some(DEFAULT_DETECTOR_MODEL_PATH.to_string()),
            class_names_path: None,
        }
    }
}

/// Information about a loaded vision model
#[derive(Debug, Clone, serde::Serialize)]
pub struct VisionModelInfo {
    /// Model name
    pub name: String,
    /// Model type (detector)
    pub model_type: String,
    /// Whether the model is available
    pub available: bool,
}

/// Manager for the object detector
///
/// A missing or broken model file does not stop the service; requests that
/// need the detector are rejected until it is fixed and the node restarted.
pub struct VisionModelManager {
    detector: Option<Arc<dyn ObjectDetector>>,
    detector_name: String,
}

impl VisionModelManager {
    /// Create a new VisionModelManager with the given configuration
    pub async fn new(config: VisionModelConfig) -> anyhow::Result<Self> {
        let Some(model_path) = config.detector_model_path else {
            tracing::warn!("⚠️ No detector model configured");
            return Ok(Self::empty());
        };

        let names_path = config.class_names_path.map(PathBuf::from);
        let path_for_load = model_path.clone();
        let loaded = tokio::task::spawn_blocking(move || {
            YoloDetector::new(&path_for_load, names_path.as_deref())
        })
        .await?;

        match loaded {
            Ok(detector) => {
                tracing::info!("✅ Detector model loaded from {}", model_path);
                let name = detector.name().to_string();
                Ok(Self {
                    detector: Some(Arc::new(detector)),
                    detector_name: name,
                })
            }
            Err(e) => {
                tracing::warn!(
                    "⚠️ Failed to load detector model from {}: {:#}",
                    model_path,
                    e
                );
                Ok(Self::empty())
            }
        }
    }

    /// Manager with no detector loaded
    pub fn empty() -> Self {
        Self {
            detector: None,
            detector_name: "yolo".to_string(),
        }
    }

    /// Manager wrapping an already constructed detector
    pub fn with_detector(detector: Arc<dyn ObjectDetector>, name: impl Into<String>) -> Self {
        Self {
            detector: Some(detector),
            detector_name: name.into(),
        }
    }

    /// Get the detector if available
    pub fn get_detector(&self) -> Option<Arc<dyn ObjectDetector>> {
        self.detector.clone()
    }

    pub fn has_detector(&self) -> bool {
        self.detector.is_some()
    }

    /// List all vision models and their availability
    pub fn list_models(&self) -> Vec<VisionModelInfo> {
        vec![VisionModelInfo {
            name: self.detector_name.clone(),
            model_type: "detector".to_string(),
            available: self.detector.is_some(),
        }]
    }
}
