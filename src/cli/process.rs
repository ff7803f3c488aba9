// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::{anyhow, Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::config::ServiceConfig;
use crate::pipeline::Pipeline;
use crate::storage::StorageBackend;
use crate::vision::{reconcile, Detection, GeminiClient, VisionModelManager};

/// Arguments for the process command
#[derive(Args, Debug)]
pub struct ProcessArgs {
    /// Image to analyse
    pub image: PathBuf,

    /// Detector ONNX file (overrides DETECTOR_MODEL_PATH)
    #[arg(long)]
    pub model: Option<String>,

    /// Class names file, one label per line (overrides DETECTOR_CLASS_NAMES)
    #[arg(long)]
    pub class_names: Option<String>,

    /// Where the annotated image is written (overrides OUTPUT_DIR)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Storage backend: pinata or mock (overrides STORAGE_BACKEND)
    #[arg(long)]
    pub storage: Option<String>,
}

/// Arguments for the reconcile command
#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// File holding the verifier's raw reply
    pub reply: PathBuf,

    /// JSON file with the detector's detections (empty list when omitted)
    #[arg(long)]
    pub detections: Option<PathBuf>,
}

/// Process one image end to end and print the result as JSON
pub async fn process_image(args: ProcessArgs) -> Result<()> {
    dotenv::dotenv().ok();

    let mut config = ServiceConfig::from_env()?;
    if let Some(model) = args.model {
        config.vision.detector_model_path = Some(model);
    }
    if let Some(names) = args.class_names {
        config.vision.class_names_path = Some(names);
    }
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if let Some(backend) = args.storage {
        config.storage_backend = StorageBackend::from_str(&backend)?;
    }

    let manager = VisionModelManager::new(config.vision.clone()).await?;
    let detector = manager.get_detector().ok_or_else(|| {
        anyhow!(
            "Detector model could not be loaded from {}",
            config
                .vision
                .detector_model_path
                .as_deref()
                .unwrap_or("<unset>")
        )
    })?;

    let verifier = Arc::new(GeminiClient::new(config.verifier.clone())?);
    let pipeline = Pipeline::from_config(&config, detector, verifier)?;
    info!("Processing {}", args.image.display());
    let result = pipeline.process_image(&args.image).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn read_detections(path: Option<&Path>) -> Result<Vec<Detection>> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let detections: Vec<Detection> = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a detection list", path.display()))?;
            Ok(detections.iter().map(Detection::normalized).collect())
        }
        None => Ok(Vec::new()),
    }
}

/// Replay reconciliation on a saved reply and print the outcome
pub fn reconcile_reply(args: ReconcileArgs) -> Result<()> {
    let reply = std::fs::read_to_string(&args.reply)
        .with_context(|| format!("Failed to read {}", args.reply.display()))?;
    let detections = read_detections(args.detections.as_deref())?;

    let outcome = reconcile(&reply, &detections);
    let output = serde_json::json!({
        "verification_status": outcome.status(),
        "count": outcome.detections().len(),
        "detections": outcome.detections(),
    });

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
