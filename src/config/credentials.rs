// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Credential lookup for the hosted services
//!
//! Credentials are read from the process environment on every call and never
//! cached, so rotating a key in the environment takes effect on the next
//! request. A missing or blank value is reported before any network activity.

use super::ConfigError;

/// API key for the hosted reasoning service
pub const GOOGLE_API_KEY_VAR: &str = "GOOGLE_API_KEY";

/// Bearer token for the pinning service
pub const PINATA_JWT_VAR: &str = "PINATA_JWT";

/// Read a required credential from the environment
pub fn require_credential(var: &str) -> Result<String, ConfigError> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ConfigError::MissingCredential(var.to_string())),
    }
}
