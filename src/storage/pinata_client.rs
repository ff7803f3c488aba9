// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Content-addressed uploads to IPFS through the Pinata pinning API

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{require_credential, ConfigError, PINATA_JWT_VAR};

pub const DEFAULT_PINATA_API_URL: &str = "https://api.pinata.cloud";
pub const DEFAULT_PINATA_GATEWAY_URL: &str = "https://gateway.pinata.cloud/ipfs";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to read {path}: {message}")]
    Io { path: String, message: String },
    #[error("Network error: {0}")]
    Network(String),
    #[error("Server error: HTTP {status}: {body}")]
    Server { status: u16, body: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Which storage implementation the service talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Pinata,
    Mock,
}

impl FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pinata" => Ok(StorageBackend::Pinata),
            "mock" => Ok(StorageBackend::Mock),
            other => Err(ConfigError::InvalidValue {
                name: "STORAGE_BACKEND".to_string(),
                message: format!("unknown backend '{}', expected 'pinata' or 'mock'", other),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PinataConfig {
    pub api_url: String,
    pub gateway_url: String,
    /// Environment variable holding the bearer JWT
    pub jwt_var: String,
}

impl Default for PinataConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_PINATA_API_URL.to_string(),
            gateway_url: DEFAULT_PINATA_GATEWAY_URL.to_string(),
            jwt_var: PINATA_JWT_VAR.to_string(),
        }
    }
}

/// What the provider reports for a stored object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadReceipt {
    #[serde(rename = "IpfsHash")]
    pub cid: String,
    #[serde(rename = "PinSize", default)]
    pub size: u64,
    #[serde(rename = "Timestamp", default)]
    pub timestamp: String,
}

#[async_trait]
pub trait ContentStorage: Send + Sync {
    /// Fail fast when uploads cannot be attempted (missing credential)
    fn preflight(&self) -> Result<(), StorageError>;
    async fn upload_file(&self, path: &Path) -> Result<UploadReceipt, StorageError>;
    async fn upload_json(&self, value: &serde_json::Value) -> Result<UploadReceipt, StorageError>;
    /// Public URL the object can be fetched from
    fn gateway_url(&self, cid: &str) -> String;
}

/// Build the configured storage backend
pub fn create_storage(
    backend: StorageBackend,
    config: PinataConfig,
) -> Result<Arc<dyn ContentStorage>, StorageError> {
    match backend {
        StorageBackend::Pinata => Ok(Arc::new(PinataClient::new(config)?)),
        StorageBackend::Mock => {
            info!("Using in-memory mock storage, uploads are not persisted");
            Ok(Arc::new(MockContentStorage::new()))
        }
    }
}

fn join_gateway(gateway: &str, cid: &str) -> String {
    format!("{}/{}", gateway.trim_end_matches('/'), cid)
}

#[derive(Debug)]
pub struct PinataClient {
    client: reqwest::Client,
    config: PinataConfig,
}

impl PinataClient {
    pub fn new(mut config: PinataConfig) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StorageError::Network(e.to_string()))?;

        config.api_url = config.api_url.trim_end_matches('/').to_string();
        info!("Pinata client configured: api={}", config.api_url);

        Ok(Self { client, config })
    }

    fn jwt(&self) -> Result<String, StorageError> {
        Ok(require_credential(&self.config.jwt_var)?)
    }

    async fn read_receipt(response: reqwest::Response) -> Result<UploadReceipt, StorageError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Server {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<UploadReceipt>()
            .await
            .map_err(|e| StorageError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ContentStorage for PinataClient {
    fn preflight(&self) -> Result<(), StorageError> {
        self.jwt().map(|_| ())
    }

    async fn upload_file(&self, path: &Path) -> Result<UploadReceipt, StorageError> {
        let jwt = self.jwt()?;

        let data = tokio::fs::read(path).await.map_err(|e| StorageError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());
        debug!("Pinning file {} ({} bytes)", file_name, data.len());

        let form = Form::new().part("file", Part::bytes(data).file_name(file_name));
        let response = self
            .client
            .post(format!("{}/pinning/pinFileToIPFS", self.config.api_url))
            .bearer_auth(jwt)
            .multipart(form)
            .send()
            .await
            .map_err(|e| StorageError::Network(e.to_string()))?;

        let receipt = Self::read_receipt(response).await?;
        info!("Pinned file {} as {}", path.display(), receipt.cid);
        Ok(receipt)
    }

    async fn upload_json(&self, value: &serde_json::Value) -> Result<UploadReceipt, StorageError> {
        let jwt = self.jwt()?;

        let response = self
            .client
            .post(format!("{}/pinning/pinJSONToIPFS", self.config.api_url))
            .bearer_auth(jwt)
            .json(value)
            .send()
            .await
            .map_err(|e| StorageError::Network(e.to_string()))?;

        let receipt = Self::read_receipt(response).await?;
        info!("Pinned JSON summary as {}", receipt.cid);
        Ok(receipt)
    }

    fn gateway_url(&self, cid: &str) -> String {
        join_gateway(&self.config.gateway_url, cid)
    }
}

/// In-memory storage with content-derived CIDs
#[derive(Debug, Default)]
pub struct MockContentStorage {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    injected_error: Arc<Mutex<Option<StorageError>>>,
    json_error: Arc<Mutex<Option<StorageError>>>,
}

impl MockContentStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn generate_cid(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("bafymock{}", &hex::encode(hasher.finalize())[0..32])
    }

    /// Fail the next upload of any kind with `error`
    pub async fn inject_error(&self, error: StorageError) {
        *self.injected_error.lock().await = Some(error);
    }

    /// Fail the next JSON upload with `error`
    pub async fn inject_json_error(&self, error: StorageError) {
        *self.json_error.lock().await = Some(error);
    }

    pub async fn get(&self, cid: &str) -> Option<Vec<u8>> {
        self.objects.lock().await.get(cid).cloned()
    }

    pub async fn object_count(&self) -> usize {
        self.objects.lock().await.len()
    }

    async fn check_injected_error(&self) -> Result<(), StorageError> {
        if let Some(error) = self.injected_error.lock().await.take() {
            return Err(error);
        }
        Ok(())
    }

    async fn store(&self, data: Vec<u8>) -> UploadReceipt {
        let cid = Self::generate_cid(&data);
        let size = data.len() as u64;
        self.objects.lock().await.insert(cid.clone(), data);
        UploadReceipt {
            cid,
            size,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[async_trait]
impl ContentStorage for MockContentStorage {
    fn preflight(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn upload_file(&self, path: &Path) -> Result<UploadReceipt, StorageError> {
        self.check_injected_error().await?;
        let data = tokio::fs::read(path).await.map_err(|e| StorageError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(self.store(data).await)
    }

    async fn upload_json(&self, value: &serde_json::Value) -> Result<UploadReceipt, StorageError> {
        self.check_injected_error().await?;
        if let Some(error) = self.json_error.lock().await.take() {
            return Err(error);
        }
        let data = serde_json::to_vec(value)
            .map_err(|e| StorageError::InvalidResponse(e.to_string()))?;
        Ok(self.store(data).await)
    }

    fn gateway_url(&self, cid: &str) -> String {
        join_gateway(DEFAULT_PINATA_GATEWAY_URL, cid)
    }
}
