// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # rvt
//!
//! Command-line interface for the CPU + KPU inference runtime. Models run
//! against the simulated accelerator.
//!
//! ## Usage
//! ```bash
//! # Run a built-in model on a synthetic image
//! rvt run --model tiny_detect
//!
//! # Run a model directory (model.json + model.safetensors) on a raw CHW image
//! rvt run --manifest ./models/tiny_detect/model.json --image frame.raw --output scores.bin
//!
//! # Write a built-in model out as a model directory
//! rvt export --model tiny_detect --dir ./models/tiny_detect
//!
//! # Inspect a model directory
//! rvt inspect --dir ./models/tiny_detect
//! ```

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "rvt",
    about = "Embedded CNN inference on a CPU + KPU target",
    version,
    author
)]
struct Cli {
    /// Path to a TOML configuration file (CLI arguments override it).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one inference and print the output.
    Run {
        /// Registered model name.
        #[arg(short, long)]
        model: Option<String>,

        /// Compiled-model manifest to run instead of a registered model.
        #[arg(long)]
        manifest: Option<PathBuf>,

        /// Arena budget (e.g., "64K", "2M").
        #[arg(short = 'b', long)]
        memory_budget: Option<String>,

        /// Raw 8-bit CHW image file. A synthetic gradient is used if absent.
        #[arg(short, long)]
        image: Option<PathBuf>,

        /// Image size as C,H,W.
        #[arg(long, default_value = "3,8,8")]
        dims: String,

        /// Write the dense output bytes here.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print metrics as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print a model's tensors and nodes.
    Inspect {
        /// Model directory holding model.json (and optionally weights).
        #[arg(short, long, conflicts_with = "model")]
        dir: Option<PathBuf>,

        /// Built-in model name.
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Write a built-in model as model.json + model.safetensors.
    Export {
        #[arg(short, long, default_value = "tiny_detect")]
        model: String,

        /// Target directory, created if missing.
        #[arg(short, long)]
        dir: PathBuf,
    },

    /// List the registered models.
    Models,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    commands::init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            model,
            manifest,
            memory_budget,
            image,
            dims,
            output,
            json,
        } => commands::run::execute(commands::run::RunArgs {
            config: cli.config,
            model,
            manifest,
            memory_budget,
            image,
            dims,
            output,
            json,
        }),
        Commands::Inspect { dir, model } => commands::inspect::execute(dir, model),
        Commands::Export { model, dir } => commands::export::execute(&model, &dir),
        Commands::Models => commands::inspect::list_models(),
    }
}
