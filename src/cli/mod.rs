// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod process;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Microbe detection node CLI
#[derive(Parser, Debug)]
#[command(name = "microbe-cli")]
#[command(version)]
#[command(about = "Offline tools for the microbe detection node", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full detection pipeline on one image
    Process(process::ProcessArgs),

    /// Reconcile a saved verifier reply against detector output
    Reconcile(process::ReconcileArgs),
}

/// Execute CLI command
pub async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Process(args) => process::process_image(args).await,
        Commands::Reconcile(args) => process::reconcile_reply(args),
    }
}
