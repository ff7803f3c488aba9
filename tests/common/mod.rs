// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

//! Shared stubs for integration tests
//!
//! The in-crate mockall mocks only exist under `cfg(test)` of the library, so
//! integration tests use these hand-written stand-ins instead.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};
use microbe_detect_node::{
    config::ConfigError,
    pipeline::Pipeline,
    storage::MockContentStorage,
    vision::{
        detection::RawBox, AnnotationRenderer, DetectorOutput, ObjectDetector, Verifier,
        VerifierError,
    },
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Detector returning a fixed set of boxes
pub struct StubDetector {
    output: DetectorOutput,
    pub calls: AtomicUsize,
}

impl StubDetector {
    pub fn with_boxes(boxes: &[(f32, f32, f32, f32, &str)]) -> Self {
        let mut names = HashMap::new();
        let boxes = boxes
            .iter()
            .enumerate()
            .map(|(class_id, &(x1, y1, x2, y2, label))| {
                names.insert(class_id, label.to_string());
                RawBox {
                    x1,
                    y1,
                    x2,
                    y2,
                    class_id,
                    confidence: 0.9,
                }
            })
            .collect();

        Self {
            output: DetectorOutput { boxes, names },
            calls: AtomicUsize::new(0),
        }
    }

    /// The canonical single amoeba at (10, 10, 50, 50)
    pub fn amoeba() -> Self {
        Self::with_boxes(&[(10.0, 10.0, 50.0, 50.0, "amoeba")])
    }
}

impl ObjectDetector for StubDetector {
    fn detect(&self, _image_path: &Path, _confidence: f32) -> anyhow::Result<DetectorOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }

    fn name(&self) -> &str {
        "stub"
    }
}

/// What a [`StubVerifier`] does when asked
#[derive(Clone)]
pub enum VerifierBehaviour {
    Reply(String),
    TransportError,
    MissingKey,
}

pub struct StubVerifier {
    behaviour: VerifierBehaviour,
    pub prompts: std::sync::Mutex<Vec<String>>,
}

impl StubVerifier {
    pub fn replying(reply: &str) -> Self {
        Self::new(VerifierBehaviour::Reply(reply.to_string()))
    }

    pub fn new(behaviour: VerifierBehaviour) -> Self {
        Self {
            behaviour,
            prompts: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Verifier for StubVerifier {
    fn preflight(&self) -> Result<(), VerifierError> {
        match self.behaviour {
            VerifierBehaviour::MissingKey => Err(VerifierError::Config(
                ConfigError::MissingCredential("GOOGLE_API_KEY".to_string()),
            )),
            _ => Ok(()),
        }
    }

    fn model_name(&self) -> &str {
        "stub"
    }

    async fn health_check(&self) -> bool {
        !matches!(self.behaviour, VerifierBehaviour::MissingKey)
    }

    async fn verify(&self, _image_path: &Path, prompt: &str) -> Result<String, VerifierError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        match &self.behaviour {
            VerifierBehaviour::Reply(reply) => Ok(reply.clone()),
            VerifierBehaviour::TransportError => {
                Err(VerifierError::Transport("connection refused".to_string()))
            }
            VerifierBehaviour::MissingKey => Err(VerifierError::Config(
                ConfigError::MissingCredential("GOOGLE_API_KEY".to_string()),
            )),
        }
    }
}

/// Write a plain grey PNG and return its path
pub fn write_sample_png(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_pixel(120, 90, Rgb([180, 180, 180]))
        .save_with_format(&path, ImageFormat::Png)
        .expect("Failed to write sample image");
    path
}

/// Encoded PNG bytes for multipart uploads
pub fn sample_png_bytes() -> Vec<u8> {
    let mut bytes = std::io::Cursor::new(Vec::new());
    RgbImage::from_pixel(120, 90, Rgb([180, 180, 180]))
        .write_to(&mut bytes, ImageFormat::Png)
        .expect("Failed to encode sample image");
    bytes.into_inner()
}

pub fn build_pipeline(
    detector: Arc<dyn ObjectDetector>,
    verifier: Arc<dyn Verifier>,
    storage: Arc<MockContentStorage>,
    output_dir: &Path,
) -> Pipeline {
    Pipeline::new(
        detector,
        verifier,
        storage,
        Arc::new(AnnotationRenderer::new(None)),
        output_dir,
    )
}
