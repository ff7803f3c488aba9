// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod pinata_client;

// Re-export main types for convenience
pub use pinata_client::{
    create_storage, ContentStorage, MockContentStorage, PinataClient, PinataConfig,
    StorageBackend, StorageError, UploadReceipt,
};
