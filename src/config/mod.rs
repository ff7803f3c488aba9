// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Process configuration
//!
//! Everything except the service credentials is read once at startup from
//! environment variables (optionally seeded from a `.env` file). Credentials
//! live in [`credentials`] and are looked up at call time.

pub mod credentials;

use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::storage::{PinataConfig, StorageBackend};
use crate::vision::{GeminiConfig, VisionModelConfig};

pub use credentials::{require_credential, GOOGLE_API_KEY_VAR, PINATA_JWT_VAR};

const DEFAULT_API_PORT: u16 = 8000;
const DEFAULT_OUTPUT_DIR: &str = "outputs";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} not found in environment")]
    MissingCredential(String),

    #[error("Invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
}

/// Startup configuration for the detection service
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub api_port: u16,
    /// Directory annotated images are written to and served from
    pub output_dir: PathBuf,
    /// TTF/OTF used for labels; system fonts are searched when unset
    pub font_path: Option<PathBuf>,
    pub vision: VisionModelConfig,
    pub verifier: GeminiConfig,
    pub storage_backend: StorageBackend,
    pub storage: PinataConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_port: DEFAULT_API_PORT,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            font_path: None,
            vision: VisionModelConfig::default(),
            verifier: GeminiConfig::default(),
            storage_backend: StorageBackend::Pinata,
            storage: PinataConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Build the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(port) = lookup("API_PORT") {
            config.api_port = port.parse::<u16>().map_err(|e| ConfigError::InvalidValue {
                name: "API_PORT".to_string(),
                message: e.to_string(),
            })?;
        }
        if let Some(dir) = lookup("OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        config.font_path = lookup("FONT_PATH").map(PathBuf::from);

        if let Some(path) = lookup("DETECTOR_MODEL_PATH") {
            config.vision.detector_model_path = Some(path);
        }
        config.vision.class_names_path = lookup("DETECTOR_CLASS_NAMES");

        if let Some(endpoint) = lookup("GEMINI_ENDPOINT") {
            config.verifier.endpoint = endpoint;
        }
        if let Some(model) = lookup("GEMINI_MODEL") {
            config.verifier.model = model;
        }

        if let Some(backend) = lookup("STORAGE_BACKEND") {
            config.storage_backend = StorageBackend::from_str(&backend)?;
        }
        if let Some(url) = lookup("PINATA_API_URL") {
            config.storage.api_url = url;
        }
        if let Some(url) = lookup("PINATA_GATEWAY_URL") {
            config.storage.gateway_url = url;
        }

        Ok(config)
    }
}
