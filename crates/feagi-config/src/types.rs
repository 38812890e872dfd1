// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration type definitions
//!
//! This module defines all configuration structs that map to sections in
//! `feagi_kernelgen.toml`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct KernelGenConfig {
    pub codegen: CodegenConfig,
    pub cuda: CudaConfig,
    pub cpu: CpuConfig,
    pub logging: LoggingConfig,
}

/// What to generate and where
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CodegenConfig {
    /// "cuda" or "cpu"
    pub backend: String,
    pub output_dir: PathBuf,
    pub model_name: String,
    /// "float" or "double"
    pub precision: String,
    /// Simulation time step (ms)
    pub dt: f64,
    /// Device RNG seed; 0 seeds from the host at simulation start
    pub seed: u64,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            backend: "cuda".to_string(),
            output_dir: PathBuf::from("./generated"),
            model_name: "kernelgen_demo".to_string(),
            precision: "float".to_string(),
            dt: 0.1,
            seed: 0,
        }
    }
}

/// Target GPU and kernel shape
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CudaConfig {
    pub capability_major: u32,
    pub capability_minor: u32,
    pub block_sizes: BlockSizeConfig,
}

impl Default for CudaConfig {
    fn default() -> Self {
        Self {
            capability_major: 7,
            capability_minor: 0,
            block_sizes: BlockSizeConfig::default(),
        }
    }
}

/// Threads per block for each generated kernel
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BlockSizeConfig {
    pub neuron_update: usize,
    pub presynaptic_update: usize,
    pub initialize: usize,
    pub pre_neuron_reset: usize,
}

impl Default for BlockSizeConfig {
    fn default() -> Self {
        Self {
            neuron_update: 32,
            presynaptic_update: 32,
            initialize: 32,
            pre_neuron_reset: 32,
        }
    }
}

impl BlockSizeConfig {
    /// `(name, block size)` for every kernel
    pub fn all_block_sizes(&self) -> Vec<(&'static str, usize)> {
        vec![
            ("neuron_update", self.neuron_update),
            ("presynaptic_update", self.presynaptic_update),
            ("initialize", self.initialize),
            ("pre_neuron_reset", self.pre_neuron_reset),
        ]
    }
}

/// Host compiler for the single-threaded CPU backend
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CpuConfig {
    pub compiler: String,
    pub optimization_flags: String,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            compiler: "g++".to_string(),
            optimization_flags: "-O3".to_string(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level for crates without a debug flag (trace, debug, info, warn, error)
    pub level: String,
    /// Write log files as well as console output
    pub file_logging: bool,
    pub log_dir: PathBuf,
    /// Remove run folders older than this many days
    pub retention_days: u64,
    /// Keep at most this many run folders
    pub retention_runs: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_logging: false,
            log_dir: PathBuf::from("./logs"),
            retention_days: 30,
            retention_runs: 10,
        }
    }
}
