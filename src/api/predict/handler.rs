// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Predict endpoint handler

use axum::{extract::State, Json};
use axum_extra::extract::Multipart;
use std::path::Path;
use tracing::{debug, error, info, warn};

use super::response::PredictResponse;
use crate::api::errors::ApiError;
use crate::api::http_server::AppState;

/// Multipart field carrying the image
pub const FILE_FIELD: &str = "file";

/// Prefix of the request-scoped copy of the upload
pub const TEMP_PREFIX: &str = "temp_";

/// POST /predict - Detect, verify and annotate microbes in an uploaded image
///
/// # Request
/// Multipart form with a `file` field holding the image.
///
/// # Response
/// - `verification_status`: "OK" or "CORRECTED"
/// - `labels`: final labels in order
/// - `count`: number of final detections
/// - `annotated_image`: path of the annotated image, servable under `/outputs`
/// - `ipfs_*`: storage identifiers and gateway URLs when uploads succeeded
///
/// # Errors
/// - 400 Bad Request: no `file` field, or it is empty
/// - 500 Internal Server Error: detector unavailable or any pipeline step failed
pub async fn predict_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<PredictResponse>, ApiError> {
    let pipeline = state.pipeline.clone().ok_or_else(|| {
        warn!("Predict request rejected: detector not loaded");
        ApiError::ModelUnavailable
    })?;

    let (file_name, data) = read_upload(&mut multipart).await?;
    debug!("Predict request for {} ({} bytes)", file_name, data.len());

    // Removed when `temp` drops, on every exit path
    let temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(&format!("_{}", sanitize_file_name(&file_name)))
        .tempfile()
        .map_err(|e| ApiError::InternalError(format!("Failed to create temp file: {}", e)))?;
    tokio::fs::write(temp.path(), &data)
        .await
        .map_err(|e| ApiError::InternalError(format!("Failed to store upload: {}", e)))?;

    let result = pipeline.process_image(temp.path()).await.map_err(|e| {
        error!("🔴 Prediction failed for {}: {}", file_name, e);
        ApiError::from(e)
    })?;

    info!(
        "Prediction complete for {}: {} ({} objects)",
        file_name,
        result.verification_status(),
        result.final_count()
    );

    Ok(Json(PredictResponse::from(&result)))
}

async fn read_upload(multipart: &mut Multipart) -> Result<(String, Vec<u8>), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidRequest(format!("Malformed multipart body: {}", e)))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or("upload").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to read upload: {}", e)))?;

        if data.is_empty() {
            return Err(ApiError::InvalidRequest("Uploaded file is empty".to_string()));
        }
        return Ok((file_name, data.to_vec()));
    }

    Err(ApiError::InvalidRequest(format!(
        "Missing '{}' field in multipart form",
        FILE_FIELD
    )))
}

/// Reduce a client-supplied file name to a safe basename
pub fn sanitize_file_name(name: &str) -> String {
    let base = Path::new(&name.replace('\\', "/"))
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.trim_matches('.').is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}
