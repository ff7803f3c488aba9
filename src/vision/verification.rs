// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Reconciliation of detector output with the verifier's free-text reply
//!
//! The verifier is prompted to answer either `OK` or a JSON array of
//! `{"box": [x1, y1, x2, y2], "label": "..."}` objects, but nothing forces it
//! to. Everything here is best effort: any reply that cannot be read as a
//! correction degrades to trusting the detector.

use serde_json::Value;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::detection::Detection;
use super::vlm_client::Verifier;

/// Token the verifier answers with when the detections are correct
pub const CONFIRMATION_TOKEN: &str = "OK";

/// Replies at least this many characters long are never read as a
/// confirmation, even if they contain the token
pub const CONFIRMATION_MAX_LEN: usize = 10;

/// Outcome of verifying one image's detections
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// Detector output stands unchanged
    Confirmed(Vec<Detection>),
    /// Verifier supplied a complete replacement set
    Corrected(Vec<Detection>),
}

/// Wire tag for a [`VerificationOutcome`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum VerificationStatus {
    #[serde(rename = "OK")]
    Confirmed,
    #[serde(rename = "CORRECTED")]
    Corrected,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Confirmed => "OK",
            VerificationStatus::Corrected => "CORRECTED",
        }
    }
}

impl std::fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl VerificationOutcome {
    pub fn status(&self) -> VerificationStatus {
        match self {
            VerificationOutcome::Confirmed(_) => VerificationStatus::Confirmed,
            VerificationOutcome::Corrected(_) => VerificationStatus::Corrected,
        }
    }

    pub fn detections(&self) -> &[Detection] {
        match self {
            VerificationOutcome::Confirmed(d) | VerificationOutcome::Corrected(d) => d,
        }
    }

    pub fn into_detections(self) -> Vec<Detection> {
        match self {
            VerificationOutcome::Confirmed(d) | VerificationOutcome::Corrected(d) => d,
        }
    }
}

/// Reasons a reply could not be read as a correction
#[derive(Debug, Error, PartialEq)]
pub enum ReconcileError {
    #[error("reply contains no JSON array")]
    NoArray,

    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("expected a JSON array, found {0}")]
    NotAnArray(&'static str),

    #[error("entry {index}: {message}")]
    InvalidEntry { index: usize, message: String },
}

/// Interpret the verifier's reply
///
/// Never fails: a confirmation, or anything that cannot be parsed as a
/// correction, yields `Confirmed` with the original detections.
pub fn reconcile(response: &str, original: &[Detection]) -> VerificationOutcome {
    match parse_corrections(response) {
        Ok(None) => {
            info!("Verifier confirmed {} detections", original.len());
            VerificationOutcome::Confirmed(original.to_vec())
        }
        Ok(Some(corrected)) => {
            info!(
                "Verifier corrected detections: {} -> {}",
                original.len(),
                corrected.len()
            );
            VerificationOutcome::Corrected(corrected)
        }
        Err(e) => {
            warn!(
                "Could not read verifier reply ({}), keeping {} detector detections. Reply was: {}",
                e,
                original.len(),
                response
            );
            VerificationOutcome::Confirmed(original.to_vec())
        }
    }
}

/// Parse a verifier reply
///
/// Returns `Ok(None)` for a confirmation and `Ok(Some(list))` for a
/// correction. Entries missing `box` or `label` are dropped; present fields
/// with the wrong type fail the whole reply.
pub fn parse_corrections(response: &str) -> Result<Option<Vec<Detection>>, ReconcileError> {
    let text = response.trim();

    if text.to_uppercase().contains(CONFIRMATION_TOKEN)
        && text.chars().count() < CONFIRMATION_MAX_LEN
    {
        return Ok(None);
    }

    let start = text.find('[').ok_or(ReconcileError::NoArray)?;
    let end = text.rfind(']').ok_or(ReconcileError::NoArray)?;
    if end < start {
        return Err(ReconcileError::NoArray);
    }

    let candidate = &text[start..=end];
    debug!("Verifier JSON candidate: {}", candidate);

    let value: Value =
        serde_json::from_str(candidate).map_err(|e| ReconcileError::InvalidJson(e.to_string()))?;
    let entries = match value {
        Value::Array(entries) => entries,
        other => return Err(ReconcileError::NotAnArray(json_type(&other))),
    };

    let mut detections = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        if let Some(detection) = parse_entry(index, entry)? {
            detections.push(detection);
        }
    }

    Ok(Some(detections))
}

fn parse_entry(index: usize, entry: &Value) -> Result<Option<Detection>, ReconcileError> {
    let invalid = |message: String| ReconcileError::InvalidEntry { index, message };

    let object = entry
        .as_object()
        .ok_or_else(|| invalid(format!("expected an object, found {}", json_type(entry))))?;

    let (Some(bbox), Some(label)) = (object.get("box"), object.get("label")) else {
        debug!("Dropping verifier entry {} without box/label", index);
        return Ok(None);
    };

    let coords = bbox
        .as_array()
        .ok_or_else(|| invalid(format!("box must be an array, found {}", json_type(bbox))))?;
    if coords.len() < 4 {
        return Err(invalid(format!(
            "box needs 4 coordinates, found {}",
            coords.len()
        )));
    }

    let mut xyxy = [0i32; 4];
    for (slot, value) in xyxy.iter_mut().zip(coords.iter()) {
        let number = value
            .as_f64()
            .filter(|n| n.is_finite())
            .ok_or_else(|| invalid(format!("box coordinate {} is not a number", value)))?;
        *slot = number.round() as i32;
    }

    let label = label
        .as_str()
        .ok_or_else(|| invalid(format!("label must be a string, found {}", json_type(label))))?;

    Ok(Some(Detection::new(
        xyxy[0], xyxy[1], xyxy[2], xyxy[3], label,
    )))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One line per detection, embedded in the verifier prompt
pub fn summarize_detections(detections: &[Detection]) -> String {
    if detections.is_empty() {
        return "No objects were detected by YOLO.".to_string();
    }

    detections
        .iter()
        .map(|d| {
            format!(
                "- Detected '{}' at BBox: ({}, {}, {}, {})",
                d.label, d.x1, d.y1, d.x2, d.y2
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Full instruction prompt sent to the verifier
pub fn build_verification_prompt(detections: &[Detection]) -> String {
    format!(
        r#"<role>
You are a highly precise, automated microbiological analysis system. Your sole purpose is to verify object detections from a machine learning model against a provided image. You must be meticulous and accurate.
</role>

<instructions>
1. Analyze the image and the provided YOLO detections.
2. Think step-by-step. First, check each YOLO detection for correctness (label and bounding box). Second, scan the entire image for any organisms that YOLO missed.
3. If all YOLO detections are 100% correct and no organisms are missing, your ONLY response must be the word: `OK`. Do not add any other text.
4. If any detection is incorrect OR if any organism is missing, you MUST generate a complete and corrected list of ALL organisms in the image. Your response MUST ONLY be a single, valid JSON array of objects. Do not add any introductory text, explanations, or markdown formatting around the JSON.
</instructions>

<yolo_detections>
{}
</yolo_detections>

<required_json_format>
[
  {{"box": [x1, y1, x2, y2], "label": "Correct Organism Name"}},
  {{"box": [x1, y1, x2, y2], "label": "Another Correct Organism"}}
]
</required_json_format>"#,
        summarize_detections(detections)
    )
}

/// Ask the verifier about `detections` and reconcile its answer
///
/// Transport failures are treated exactly like an unreadable reply.
pub async fn verify_detections(
    verifier: &dyn Verifier,
    image_path: &Path,
    detections: &[Detection],
) -> VerificationOutcome {
    let prompt = build_verification_prompt(detections);

    match verifier.verify(image_path, &prompt).await {
        Ok(response) => reconcile(&response, detections),
        Err(e) => {
            warn!(
                "Verifier call failed ({}), keeping {} detector detections",
                e,
                detections.len()
            );
            VerificationOutcome::Confirmed(detections.to_vec())
        }
    }
}
