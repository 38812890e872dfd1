// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Kernel generator tool
//!
//! Loads `feagi_kernelgen.toml`, builds the demonstration network and writes
//! its simulation sources for the configured backend.
//!
//! Usage:
//!   kernelgen [--config <path>] [--backend cuda|cpu] [--output-dir <dir>]
//!             [--set key=value]... [--plan] [--debug-<crate>] [--debug-all]

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use feagi_kernelgen::codegen::{BackendType, CudaBackend};
use feagi_kernelgen::config::{
    collect_validation_errors, load_config, ConfigValidationError, KernelGenConfig,
};
use feagi_kernelgen::model::FinalizedModel;
use feagi_kernelgen::observability::{debug_flags_help, init_logging, parse_debug_flags};
use feagi_kernelgen::{demo, pipeline};

/// FEAGI Kernel Generator - CUDA and CPU sources for spiking network models
#[derive(Parser, Debug)]
#[command(
    name = "kernelgen",
    version,
    author,
    long_about = None,
    after_help = debug_flags_help()
)]
struct Args {
    /// Path to feagi_kernelgen.toml (searched for when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend to generate for: cuda or cpu
    #[arg(short, long)]
    backend: Option<String>,

    /// Directory the generated sources are written to
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Name of the generated model
    #[arg(long)]
    model_name: Option<String>,

    /// Scalar precision: float or double
    #[arg(long)]
    precision: Option<String>,

    /// Configuration override as key=value (repeatable, e.g. --set block_size=64)
    #[arg(long = "set", value_name = "KEY=VALUE")]
    overrides: Vec<String>,

    /// Print the presynaptic update plan (CUDA only) without writing files
    #[arg(long, default_value_t = false)]
    plan: bool,
}

impl Args {
    /// Every override as the `key=value` map `feagi-config` applies last
    fn cli_overrides(&self) -> Result<HashMap<String, String>> {
        let mut overrides = HashMap::new();
        for entry in &self.overrides {
            let Some((key, value)) = entry.split_once('=') else {
                bail!("Override '{}' is not of the form key=value", entry);
            };
            overrides.insert(key.trim().to_string(), value.trim().to_string());
        }

        if let Some(backend) = &self.backend {
            overrides.insert("backend".to_string(), backend.clone());
        }
        if let Some(dir) = &self.output_dir {
            overrides.insert("output_dir".to_string(), dir.display().to_string());
        }
        if let Some(name) = &self.model_name {
            overrides.insert("model_name".to_string(), name.clone());
        }
        if let Some(precision) = &self.precision {
            overrides.insert("precision".to_string(), precision.clone());
        }
        Ok(overrides)
    }
}

fn main() -> Result<()> {
    // Debug flags are not clap arguments; strip them before parsing
    let debug_flags = parse_debug_flags();
    let args = Args::parse_from(env::args().filter(|arg| !arg.starts_with("--debug-")));

    let config = load_config(args.config.as_deref(), Some(&args.cli_overrides()?))
        .context("Failed to load configuration")?;
    check_config(&config)?;

    let _logging = init_logging(&debug_flags, &pipeline::logging_options(&config))?;
    info!("FEAGI kernel generator v{}", feagi_kernelgen::VERSION);

    let mut spec = demo::build_demo_model(&config.codegen.model_name)?;
    pipeline::apply_model_settings(&config, &mut spec)?;
    let model = spec.finalize()?;

    if args.plan {
        return print_plan(&config, &model);
    }

    let descriptor = pipeline::generate(&config, &model)?;
    println!(
        "Generated {} ({} backend) in {}",
        descriptor.model,
        descriptor.backend,
        config.codegen.output_dir.display()
    );
    for file in &descriptor.files {
        println!("  {}", file);
    }
    Ok(())
}

/// Report every validation problem at once
fn check_config(config: &KernelGenConfig) -> Result<()> {
    let errors: Vec<ConfigValidationError> = collect_validation_errors(config);
    if errors.is_empty() {
        return Ok(());
    }
    for error in &errors {
        eprintln!("config error: {}", error);
    }
    bail!("Configuration has {} error(s)", errors.len())
}

fn print_plan(config: &KernelGenConfig, model: &FinalizedModel) -> Result<()> {
    if pipeline::backend_type(config)? != BackendType::Cuda {
        warn!("Presynaptic update plans only exist for the CUDA backend");
        return Ok(());
    }

    let backend = CudaBackend::new(pipeline::backend_preferences(config).cuda)?;
    let plans = backend.plan_presynaptic_update(model)?;

    println!(
        "{:<12} {:<18} {:<14} {:>8} {:>8} {:>8}",
        "connection", "strategy", "accumulation", "threads", "start", "end"
    );
    for plan in &plans {
        println!(
            "{:<12} {:<18} {:<14} {:>8} {:>8} {:>8}",
            plan.synapse_group.name(),
            plan.strategy.to_string(),
            format!("{:?}", plan.accumulation),
            plan.num_threads,
            plan.start,
            plan.end
        );
    }
    Ok(())
}
