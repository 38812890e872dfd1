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
//! Generates CUDA or single-threaded C++ simulation sources for spiking
//! neural network models. This crate re-exports the member crates and
//! wires configuration to code generation.
//!
//! ## Crates
//!
//! - **`model`**: population and connection descriptors, two-phase model build
//! - **`codegen`**: substitution engine, parallelization strategies, backends, generators
//! - **`config`**: `feagi_kernelgen.toml` loading with environment and CLI overrides
//! - **`observability`**: per-crate debug flags and logging initialization
//!
//! ## Usage
//!
//! ```rust,no_run
//! use feagi_kernelgen::prelude::*;
//!
//! let config = load_config(None, None)?;
//! validate_config(&config)?;
//!
//! let mut spec = demo::build_demo_model(&config.codegen.model_name)?;
//! pipeline::apply_model_settings(&config, &mut spec)?;
//! let model = spec.finalize()?;
//!
//! let descriptor = pipeline::generate(&config, &model)?;
//! println!("Wrote {} files", descriptor.files.len());
//! # Ok::<(), anyhow::Error>(())
//! ```

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod demo;
pub mod pipeline;

pub use feagi_config as config;
pub use feagi_kernelgen_codegen as codegen;
pub use feagi_kernelgen_model as model;
pub use feagi_observability as observability;

/// Prelude for common imports
pub mod prelude {
    pub use crate::{demo, pipeline};

    pub use feagi_config::{load_config, validate_config, KernelGenConfig};
    pub use feagi_kernelgen_codegen::{
        create_backend, generate_all, Backend, BackendPreferences, BackendType, BuildDescriptor,
        CodegenError,
    };
    pub use feagi_kernelgen_model::{
        FinalizedModel, ModelError, ModelSpec, Precision, SpanType, SynapseGroupParams,
        SynapseMatrixConnectivity, VarInitialiser,
    };
}
