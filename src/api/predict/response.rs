// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Predict response types

use serde::{Deserialize, Serialize};

use crate::pipeline::PipelineResult;
use crate::vision::VerificationStatus;

/// Response from POST /predict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictResponse {
    /// "OK" when the verifier confirmed the detector, "CORRECTED" otherwise
    pub verification_status: VerificationStatus,
    /// Final labels, one per detection
    pub labels: Vec<String>,
    /// Number of final detections
    pub count: usize,
    /// Annotated image path, always with `/` separators
    pub annotated_image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipfs_image_cid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipfs_image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipfs_json_cid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipfs_json_url: Option<String>,
}

impl From<&PipelineResult> for PredictResponse {
    fn from(result: &PipelineResult) -> Self {
        Self {
            verification_status: result.verification_status(),
            labels: result.labels(),
            count: result.final_count(),
            annotated_image: result
                .annotated_image()
                .to_string_lossy()
                .replace('\\', "/"),
            ipfs_image_cid: result.image_cid().map(str::to_string),
            ipfs_image_url: result.image_url().map(str::to_string),
            ipfs_json_cid: result.summary_cid().map(str::to_string),
            ipfs_json_url: result.summary_url().map(str::to_string),
        }
    }
}
