// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # FEAGI Kernel Generator Model
//!
//! Descriptors the kernel generator works from:
//! - **Types**: storage modes, precision, connectivity and span enums
//! - **Snippets**: symbolic code fragments and parameter rules
//! - **Neuron groups**: population shape, delay queues, spike-like events
//! - **Synapse groups**: connectivity representation, span, dendritic delay
//! - **Model**: two-phase assembly (`ModelSpec` -> `FinalizedModel`)

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod error;
pub mod model;
pub mod neuron_group;
pub mod snippets;
pub mod synapse_group;
pub mod types;
pub mod utils;

pub use error::{ModelError, Result};
pub use model::{FinalizedModel, ModelSpec};
pub use neuron_group::{NeuronGroup, SpikeEventCondition};
pub use snippets::{
    ConnectivityInitialiser, ConnectivitySnippet, DerivedParam, ExtraGlobalParam, Initialiser,
    NeuronModel, PostsynapticModel, Var, VarInitSnippet, VarInitialiser, WeightUpdateModel,
};
pub use synapse_group::{SynapseGroup, SynapseGroupParams};
pub use types::{InitLocation, Precision, SpanType, SynapseMatrixConnectivity, VarLocation, VarMode};
