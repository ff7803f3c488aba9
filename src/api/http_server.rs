// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use axum::{
    extract::{DefaultBodyLimit, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use super::predict::predict_handler;
use crate::pipeline::Pipeline;
use crate::version;
use crate::vision::{image_utils::MAX_IMAGE_SIZE, Verifier, VisionModelInfo};

/// Room for multipart framing on top of the largest accepted image
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    /// `None` when the detector failed to load
    pub pipeline: Option<Arc<Pipeline>>,
    pub models: Vec<VisionModelInfo>,
    /// Shared with the pipeline; checked by `/health`
    pub verifier: Arc<dyn Verifier>,
    pub output_dir: PathBuf,
}

pub fn build_router(state: AppState) -> Router {
    let outputs = ServeDir::new(&state.output_dir);

    Router::new()
        // Liveness message
        .route("/", get(root_handler))
        // Health check
        .route("/health", get(health_handler))
        // Detection endpoint
        .route("/predict", post(predict_handler))
        // Annotated images
        .nest_service("/outputs", outputs)
        .layer(DefaultBodyLimit::max(MAX_IMAGE_SIZE + MULTIPART_OVERHEAD))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(state: AppState, port: u16) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&state.output_dir).await?;
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("API server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn root_handler() -> impl IntoResponse {
    Json(json!({ "message": "Microbe Detection API is running." }))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let verifier_available = state.verifier.health_check().await;
    let status = if state.pipeline.is_some() && verifier_available {
        "healthy"
    } else {
        "degraded"
    };

    Json(json!({
        "status": status,
        "version": version::get_version_info(),
        "models": state.models,
        "verifier": {
            "model": state.verifier.model_name(),
            "available": verifier_available,
        },
    }))
}
