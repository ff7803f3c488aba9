// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! YOLOv8 object detector (ONNX export)
//!
//! The exported graph takes a letterboxed `[1, 3, 640, 640]` tensor and emits
//! `[1, 4 + classes, anchors]` where the first four rows are the box centre
//! and size in input pixels and the remaining rows are per-class scores.

use anyhow::{anyhow, Context, Result};
use ndarray::{ArrayView2, ArrayViewD, Axis, Ix2};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use super::preprocessing::{letterbox, LetterboxInfo};
use super::{DetectorOutput, ObjectDetector, RawBox};
use crate::vision::image_utils::load_image;

/// Model input edge length
pub const YOLO_INPUT_SIZE: u32 = 640;

/// IoU above which a lower scoring box of the same class is suppressed
pub const NMS_IOU_THRESHOLD: f32 = 0.7;

/// Upper bound on boxes kept per image
pub const MAX_DETECTIONS: usize = 300;

/// YOLO detector backed by an ONNX Runtime session
///
/// Loaded once at startup and shared across requests. `Session::run` needs
/// exclusive access, so the session sits behind a mutex.
pub struct YoloDetector {
    session: Mutex<Session>,
    input_name: String,
    names: HashMap<usize, String>,
    model_name: String,
}

impl std::fmt::Debug for YoloDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YoloDetector")
            .field("input_name", &self.input_name)
            .field("classes", &self.names.len())
            .field("model_name", &self.model_name)
            .finish_non_exhaustive()
    }
}

impl YoloDetector {
    /// Load the detector from an ONNX file
    ///
    /// Class names are taken from `class_names_path` (one label per line) when
    /// given, otherwise from the `names` metadata the exporter writes.
    pub fn new<P: AsRef<Path>>(model_path: P, class_names_path: Option<&Path>) -> Result<Self> {
        let model_path = model_path.as_ref();

        if !model_path.exists() {
            anyhow::bail!("Detector model not found: {}", model_path.display());
        }

        info!("Loading detector model from {}", model_path.display());

        let session = Session::builder()
            .context("Failed to create session builder")?
            .with_execution_providers([CPUExecutionProvider::default().build()])
            .context("Failed to set CPU execution provider")?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .context("Failed to set optimization level")?
            .with_intra_threads(4)
            .context("Failed to set intra threads")?
            .commit_from_file(model_path)
            .context(format!(
                "Failed to load detector model from {}",
                model_path.display()
            ))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "images".to_string());

        let names = match class_names_path {
            Some(path) => load_class_names_file(path)?,
            None => {
                let embedded = session
                    .metadata()
                    .ok()
                    .and_then(|meta| meta.custom("names").ok().flatten());
                match embedded {
                    Some(raw) => parse_class_names_metadata(&raw),
                    None => {
                        warn!("Detector model carries no class names, labels will be class ids");
                        HashMap::new()
                    }
                }
            }
        };

        let model_name = model_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "yolo".to_string());

        info!(
            "✅ Detector model loaded ({} classes, input: {})",
            names.len(),
            input_name
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            names,
            model_name,
        })
    }

    fn label_map(&self, boxes: &[RawBox]) -> HashMap<usize, String> {
        let mut names = self.names.clone();
        for b in boxes {
            names
                .entry(b.class_id)
                .or_insert_with(|| format!("class_{}", b.class_id));
        }
        names
    }
}

impl ObjectDetector for YoloDetector {
    fn detect(&self, image_path: &Path, confidence: f32) -> Result<DetectorOutput> {
        let (image, image_info) = load_image(image_path)?;
        debug!(
            "Running detector on {}x{} image",
            image_info.width, image_info.height
        );

        let (input, letterbox_info) = letterbox(&image, YOLO_INPUT_SIZE);
        let input_value = Value::from_array(input).context("Failed to create input tensor")?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("Detector session lock poisoned"))?;

        let outputs = session
            .run(ort::inputs![&self.input_name => input_value])
            .context("Detection inference failed")?;

        let output_tensor = outputs[0]
            .try_extract_array::<f32>()
            .context("Failed to extract output tensor")?;

        let boxes = decode_predictions(
            output_tensor.view(),
            &letterbox_info,
            confidence,
            NMS_IOU_THRESHOLD,
            MAX_DETECTIONS,
        )?;
        debug!("Detector kept {} boxes", boxes.len());

        let names = self.label_map(&boxes);
        Ok(DetectorOutput { boxes, names })
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

/// Decode raw YOLOv8 output into boxes in source image coordinates
///
/// Accepts `[1, 4 + C, N]` (exporter default) or the transposed `[1, N, 4 + C]`.
pub fn decode_predictions(
    output: ArrayViewD<f32>,
    info: &LetterboxInfo,
    confidence: f32,
    iou_threshold: f32,
    max_detections: usize,
) -> Result<Vec<RawBox>> {
    let shape = output.shape().to_vec();
    if shape.len() != 3 || shape[0] != 1 {
        anyhow::bail!("Unexpected detector output shape: {:?}", shape);
    }

    let predictions = output
        .index_axis(Axis(0), 0)
        .into_dimensionality::<Ix2>()
        .context("Failed to reshape detector output")?;

    // Rows are attributes unless the anchor axis comes first
    let predictions: ArrayView2<f32> = if shape[1] > shape[2] {
        predictions.reversed_axes()
    } else {
        predictions
    };

    let attributes = predictions.shape()[0];
    if attributes <= 4 {
        anyhow::bail!("Detector output has no class scores: {:?}", shape);
    }

    let mut candidates = Vec::new();
    for anchor in predictions.axis_iter(Axis(1)) {
        let (class_id, score) = anchor
            .iter()
            .skip(4)
            .enumerate()
            .fold((0usize, f32::MIN), |best, (idx, &s)| {
                if s > best.1 {
                    (idx, s)
                } else {
                    best
                }
            });

        if !score.is_finite() || score < confidence {
            continue;
        }

        let (cx, cy, w, h) = (anchor[0], anchor[1], anchor[2], anchor[3]);
        if !(cx.is_finite() && cy.is_finite() && w.is_finite() && h.is_finite()) {
            continue;
        }

        let (x1, y1) = info.map_to_original(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = info.map_to_original(cx + w / 2.0, cy + h / 2.0);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        candidates.push(RawBox {
            x1,
            y1,
            x2,
            y2,
            class_id,
            confidence: score,
        });
    }

    Ok(non_max_suppression(candidates, iou_threshold, max_detections))
}

/// Class-aware non-maximum suppression, highest confidence first
pub fn non_max_suppression(
    mut boxes: Vec<RawBox>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<RawBox> {
    boxes.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut keep: Vec<RawBox> = Vec::new();
    for candidate in boxes {
        if keep.len() >= max_detections {
            break;
        }
        let suppressed = keep
            .iter()
            .any(|k| k.class_id == candidate.class_id && iou(k, &candidate) > iou_threshold);
        if !suppressed {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &RawBox, b: &RawBox) -> f32 {
    let inter_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let inter_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = inter_w * inter_h;
    let union = (a.x2 - a.x1) * (a.y2 - a.y1) + (b.x2 - b.x1) * (b.y2 - b.y1) - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Parse the exporter's `names` metadata, e.g. `{0: 'amoeba', 1: 'euglena'}`
pub fn parse_class_names_metadata(raw: &str) -> HashMap<usize, String> {
    let pattern = match Regex::new(r#"(\d+)\s*:\s*['"]([^'"]*)['"]"#) {
        Ok(p) => p,
        Err(_) => return HashMap::new(),
    };

    pattern
        .captures_iter(raw)
        .filter_map(|cap| {
            let id = cap[1].parse::<usize>().ok()?;
            Some((id, cap[2].to_string()))
        })
        .collect()
}

/// Read class names from a text file, one label per line in class id order
pub fn load_class_names_file(path: &Path) -> Result<HashMap<usize, String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read class names from {}", path.display()))?;

    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(id, name)| (id, name.to_string()))
        .collect())
}
