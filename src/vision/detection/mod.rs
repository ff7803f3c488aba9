// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Object detection types and the detector seam
//!
//! Components:
//! - `Detection` - labelled integer pixel box shared by every stage
//! - `ObjectDetector` - trait the pipeline calls, implemented by the ONNX model
//! - `yolo` - YOLOv8 ONNX detector running on CPU

pub mod preprocessing;
pub mod yolo;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub use yolo::{YoloDetector, YOLO_INPUT_SIZE};

/// Minimum score a raw detection needs to be reported
pub const CONFIDENCE_THRESHOLD: f32 = 0.25;

/// Label used when a class id has no entry in the name map
pub const UNKNOWN_LABEL: &str = "unknown";

/// Largest magnitude a box coordinate may take; keeps box arithmetic in range
pub const MAX_PIXEL_COORD: i32 = 1 << 20;

/// A labelled bounding box in source image pixels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub label: String,
}

impl Detection {
    /// Create a detection, ordering the corners so `x1 <= x2` and `y1 <= y2`
    ///
    /// Coordinates are clamped to `±MAX_PIXEL_COORD`.
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32, label: impl Into<String>) -> Self {
        let clamp = |v: i32| v.clamp(-MAX_PIXEL_COORD, MAX_PIXEL_COORD);
        let (x1, y1, x2, y2) = (clamp(x1), clamp(y1), clamp(x2), clamp(y2));
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
            label: label.into(),
        }
    }

    pub fn width(&self) -> i32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> i32 {
        self.y2.saturating_sub(self.y1)
    }

    /// Copy with ordered, clamped corners, for values built without `new`
    pub fn normalized(&self) -> Self {
        Self::new(self.x1, self.y1, self.x2, self.y2, self.label.clone())
    }
}

/// A raw box as produced by the model, before label lookup
#[derive(Debug, Clone, PartialEq)]
pub struct RawBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub class_id: usize,
    pub confidence: f32,
}

/// Everything a detector run produces
#[derive(Debug, Clone, Default)]
pub struct DetectorOutput {
    /// Boxes in model order (highest confidence first)
    pub boxes: Vec<RawBox>,
    /// Class id to human readable label
    pub names: HashMap<usize, String>,
}

impl DetectorOutput {
    /// Resolve class ids to labels and round coordinates to pixels
    pub fn to_detections(&self) -> Vec<Detection> {
        self.boxes
            .iter()
            .map(|b| {
                let label = self
                    .names
                    .get(&b.class_id)
                    .cloned()
                    .unwrap_or_else(|| UNKNOWN_LABEL.to_string());
                Detection::new(
                    b.x1.round() as i32,
                    b.y1.round() as i32,
                    b.x2.round() as i32,
                    b.y2.round() as i32,
                    label,
                )
            })
            .collect()
    }
}

/// Object detector used by the pipeline
///
/// Implementations must be safe to share across concurrent requests.
#[cfg_attr(test, mockall::automock)]
pub trait ObjectDetector: Send + Sync {
    /// Run detection on the image at `image_path`, keeping boxes scoring at
    /// least `confidence`
    fn detect(&self, image_path: &Path, confidence: f32) -> Result<DetectorOutput>;

    /// Short model name for logs and health output
    fn name(&self) -> &str;
}
