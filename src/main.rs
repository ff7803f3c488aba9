// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use anyhow::Result;
use microbe_detect_node::{
    api::{start_server, AppState},
    config::ServiceConfig,
    pipeline::Pipeline,
    version,
    vision::{GeminiClient, Verifier, VisionModelManager},
};
use std::{env, sync::Arc};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Initialize tracing subscriber for logging
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    println!("🚀 Starting Microbe Detection Node...\n");
    println!("📦 BUILD VERSION: {}", version::VERSION);
    println!("📅 Build Date: {}", version::BUILD_DATE);
    println!();

    let config = ServiceConfig::from_env()?;
    let verifier: Arc<dyn Verifier> = Arc::new(GeminiClient::new(config.verifier.clone())?);

    // The detector is loaded once and shared by every request
    println!("🔬 Loading detector model...");
    let manager = VisionModelManager::new(config.vision.clone()).await?;
    let pipeline = match manager.get_detector() {
        Some(detector) => {
            println!("✅ Detector ready");
            Some(Arc::new(Pipeline::from_config(
                &config,
                detector,
                Arc::clone(&verifier),
            )?))
        }
        None => {
            println!("🔴 Detector unavailable, /predict will return 500 until it is fixed");
            None
        }
    };

    let state = AppState {
        pipeline,
        models: manager.list_models(),
        verifier,
        output_dir: config.output_dir.clone(),
    };

    println!("🌐 Serving on port {}", config.api_port);
    start_server(state, config.api_port).await
}
