// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod api;
pub mod cli;
pub mod config;
pub mod pipeline;
pub mod storage;
pub mod version;
pub mod vision;

pub use pipeline::{Pipeline, PipelineError, PipelineResult};
pub use vision::{Detection, VerificationOutcome, VerificationStatus};
