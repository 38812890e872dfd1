// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # FEAGI Kernel Generator
//!
//! Turns a [`FinalizedModel`](feagi_kernelgen_model::FinalizedModel) into
//! compilable simulation source for one backend:
//! - **Substitutions**: `$(name)` placeholder engine with chained contexts
//! - **Code stream**: indentation-aware output with checked scopes
//! - **Strategies**: presynaptic update strategies and accumulation choice
//! - **Backends**: CUDA and single-threaded CPU
//! - **Generators**: neuron update, synapse update, initialisation, runner, Makefile
//!
//! ## Example
//!
//! ```no_run
//! use feagi_kernelgen_codegen::{create_backend, generate_all, BackendPreferences, BackendType};
//! # fn run(model: &feagi_kernelgen_model::FinalizedModel) -> feagi_kernelgen_codegen::Result<()> {
//! let backend = create_backend(BackendType::SingleThreadedCpu, BackendPreferences::default())?;
//! let descriptor = generate_all(model, backend.as_ref(), std::path::Path::new("generated"))?;
//! println!("wrote {} files", descriptor.files.len());
//! # Ok(())
//! # }
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod backend;
pub mod code_stream;
pub mod error;
pub mod generator;
pub mod kernel;
pub mod strategy;
pub mod substitutions;

pub use backend::{
    create_backend, Backend, BackendPreferences, BackendType, CpuPreferences, CudaBackend,
    CudaPreferences, PresynapticPlan, SingleThreadedCpuBackend, SpikeKind, SynapseUpdateHandlers,
};
pub use code_stream::CodeStream;
pub use error::{CodegenError, Result};
pub use generator::{generate_all, BuildDescriptor};
pub use kernel::{Kernel, KernelBlockSizes};
pub use strategy::{partition_targets, select_strategy, Accumulation, PresynapticUpdateStrategy};
pub use substitutions::Substitutions;
