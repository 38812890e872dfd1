// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Code Generation Backend Abstraction
//!
//! A backend decides how the model-independent handlers produced by the
//! generators are wrapped into kernels for one target: thread layout, storage
//! declarations, accumulation primitives and build rules.
//!
//! Any backend must produce observably identical simulation results for the
//! same model; backends differ only in execution strategy.

mod cuda;
mod single_threaded_cpu;

pub use cuda::{CudaBackend, CudaPreferences, PresynapticPlan};
pub use single_threaded_cpu::{CpuPreferences, SingleThreadedCpuBackend};

use std::collections::BTreeMap;
use std::fmt::Write;

use feagi_kernelgen_model::utils::references_placeholder;
use feagi_kernelgen_model::{
    FinalizedModel, InitLocation, NeuronGroup, Precision, SynapseGroup, SynapseMatrixConnectivity,
    VarLocation, VarMode,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::code_stream::CodeStream;
use crate::error::{CodegenError, Result};
use crate::kernel::Kernel;
use crate::substitutions::Substitutions;

/// Emits code for one neuron population inside a kernel or loop body
pub type NeuronGroupHandler<'h> =
    &'h dyn Fn(&mut CodeStream, &NeuronGroup, &Substitutions<'_>) -> Result<()>;

/// Emits code for one synapse population inside a kernel or loop body
pub type SynapseGroupHandler<'h> =
    &'h dyn Fn(&mut CodeStream, &SynapseGroup, &Substitutions<'_>) -> Result<()>;

/// Emits initialisation code for one neuron population at an initialisation site
pub type NeuronInitHandler<'h> =
    &'h dyn Fn(&mut CodeStream, &NeuronGroup, &Substitutions<'_>, InitLocation) -> Result<()>;

/// Emits initialisation code for one synapse population at an initialisation site
pub type SynapseInitHandler<'h> =
    &'h dyn Fn(&mut CodeStream, &SynapseGroup, &Substitutions<'_>, InitLocation) -> Result<()>;

/// Emits the initialisation of a single element, addressed by `$(id)`
pub type VarInitHandler<'h> = &'h dyn Fn(&mut CodeStream, &Substitutions<'_>) -> Result<()>;

/// Weight update handlers the synapse update kernel delegates to
pub struct SynapseUpdateHandlers<'h> {
    /// Writes the event threshold condition as an expression
    pub wum_thresh: SynapseGroupHandler<'h>,
    /// Weight update for a true spike
    pub wum_sim: SynapseGroupHandler<'h>,
    /// Weight update for a spike-like event
    pub wum_event: SynapseGroupHandler<'h>,
    /// Procedural row builder; calls `$(addSynapse, ...)` per synapse
    pub wum_procedural_connect: SynapseGroupHandler<'h>,
}

impl<'h> SynapseUpdateHandlers<'h> {
    /// Weight update handler for true spikes or spike-like events
    pub fn update_handler(&self, true_spike: bool) -> SynapseGroupHandler<'h> {
        if true_spike {
            self.wum_sim
        } else {
            self.wum_event
        }
    }
}

/// Kind of spike a neuron emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpikeKind {
    True,
    Event,
}

impl SpikeKind {
    /// Suffix of the buffers holding this kind of spike
    pub fn suffix(self) -> &'static str {
        match self {
            SpikeKind::True => "",
            SpikeKind::Event => "Evnt",
        }
    }

    pub fn from_true_spike(true_spike: bool) -> Self {
        if true_spike {
            SpikeKind::True
        } else {
            SpikeKind::Event
        }
    }
}

/// Code generation backend (CUDA, single-threaded CPU)
pub trait Backend: Send + Sync {
    /// Backend name for logging and build descriptors
    fn name(&self) -> &'static str;

    fn backend_type(&self) -> BackendType;

    // ------------------------------------------------------------------
    // Kernels
    // ------------------------------------------------------------------

    /// Neuron update entry point, calling `handler` once per population per unit
    fn gen_neuron_update(
        &self,
        os: &mut CodeStream,
        model: &FinalizedModel,
        handler: NeuronGroupHandler<'_>,
    ) -> Result<()>;

    /// Synapse update entry point, delegating per connection
    fn gen_synapse_update(
        &self,
        os: &mut CodeStream,
        model: &FinalizedModel,
        handlers: &SynapseUpdateHandlers<'_>,
    ) -> Result<()>;

    /// State initialisation entry point
    fn gen_init(
        &self,
        os: &mut CodeStream,
        model: &FinalizedModel,
        ng_handler: NeuronInitHandler<'_>,
        sg_handler: SynapseInitHandler<'_>,
    ) -> Result<()>;

    // ------------------------------------------------------------------
    // Storage
    // ------------------------------------------------------------------

    /// Includes and macros at the top of the shared definitions header
    fn gen_definitions_preamble(&self, os: &mut CodeStream) -> Result<()>;

    /// Backend-specific globals at the top of the runner
    fn gen_runner_preamble(&self, os: &mut CodeStream, model: &FinalizedModel) -> Result<()>;

    fn gen_variable_definition(
        &self,
        os: &mut CodeStream,
        ty: &str,
        name: &str,
        location: VarLocation,
    ) -> Result<()>;

    fn gen_variable_implementation(
        &self,
        os: &mut CodeStream,
        ty: &str,
        name: &str,
        location: VarLocation,
    ) -> Result<()>;

    fn gen_variable_allocation(
        &self,
        os: &mut CodeStream,
        ty: &str,
        name: &str,
        location: VarLocation,
        count: usize,
    ) -> Result<()>;

    fn gen_variable_free(&self, os: &mut CodeStream, name: &str, location: VarLocation)
        -> Result<()>;

    /// Copy a host-initialised buffer to wherever kernels read it
    fn gen_variable_push(
        &self,
        os: &mut CodeStream,
        ty: &str,
        name: &str,
        location: VarLocation,
        count: usize,
    ) -> Result<()>;

    /// Copy a buffer back to the host after kernels wrote it
    fn gen_variable_pull(
        &self,
        os: &mut CodeStream,
        ty: &str,
        name: &str,
        location: VarLocation,
        count: usize,
    ) -> Result<()>;

    /// Initialise `count` elements of a variable if `mode` initialises it at `site`
    fn gen_variable_init(
        &self,
        os: &mut CodeStream,
        mode: VarMode,
        site: InitLocation,
        count: usize,
        kernel_subs: &Substitutions<'_>,
        handler: VarInitHandler<'_>,
    ) -> Result<()>;

    /// Declare a ring-buffer pointer (delay queue or dendritic delay)
    fn gen_ring_pointer_definition(&self, os: &mut CodeStream, name: &str) -> Result<()>;

    fn gen_ring_pointer_implementation(&self, os: &mut CodeStream, name: &str) -> Result<()>;

    /// Record that neuron `$(id)` of `ng` emitted a spike of `kind`
    fn gen_emit_spike(
        &self,
        os: &mut CodeStream,
        ng: &NeuronGroup,
        subs: &Substitutions<'_>,
        kind: SpikeKind,
    ) -> Result<()>;

    /// Bind the `$(gennrand_*)` functions, drawing from `$(rng)`
    fn add_rng_functions(&self, subs: &mut Substitutions<'_>, precision: Precision) -> Result<()>;

    /// Per-neuron RNG state type, if populations carry their own generators
    fn population_rng_type(&self) -> Option<&'static str>;

    // ------------------------------------------------------------------
    // Build
    // ------------------------------------------------------------------

    fn gen_makefile_preamble(&self, os: &mut CodeStream) -> Result<()>;

    fn gen_makefile_link_rule(&self, os: &mut CodeStream) -> Result<()>;

    fn gen_makefile_compile_rule(&self, os: &mut CodeStream) -> Result<()>;

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Threads per block of `kernel`
    fn kernel_block_size(&self, kernel: Kernel) -> usize;

    /// Hardware capability tier (compute capability major version on CUDA)
    fn capability_tier(&self) -> u32;

    /// Expression adding `value` to `*address`, safe against concurrent writers where needed
    fn float_atomic_add(&self, precision: Precision, address: &str, value: &str) -> String;

    /// Prefix of the device-side symbol of a buffer (`dd_` on CUDA)
    fn var_prefix(&self) -> &'static str;

    fn source_extension(&self) -> &'static str;

    fn compiler_command(&self) -> String;

    /// First RNG sequence used to regenerate rows of procedural connection `sg`
    fn procedural_connectivity_sequence(&self, sg: &SynapseGroup, model: &FinalizedModel) -> u64;
}

/// Backend type enum for construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    /// Sequential loops on the host
    SingleThreadedCpu,

    /// CUDA kernels
    #[default]
    Cuda,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendType::SingleThreadedCpu => write!(f, "SingleThreadedCPU"),
            BackendType::Cuda => write!(f, "CUDA"),
        }
    }
}

impl std::str::FromStr for BackendType {
    type Err = CodegenError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cpu" | "single_threaded_cpu" | "singlethreadedcpu" => Ok(BackendType::SingleThreadedCpu),
            "cuda" => Ok(BackendType::Cuda),
            _ => Err(CodegenError::InvalidBackend(s.to_string())),
        }
    }
}

/// Preferences of every backend; only the selected backend's are read
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendPreferences {
    pub cuda: CudaPreferences,
    pub cpu: CpuPreferences,
}

/// Construct a backend of `backend_type`
pub fn create_backend(
    backend_type: BackendType,
    preferences: BackendPreferences,
) -> Result<Box<dyn Backend>> {
    match backend_type {
        BackendType::SingleThreadedCpu => {
            info!("Using single-threaded CPU backend");
            Ok(Box::new(SingleThreadedCpuBackend::with_preferences(
                preferences.cpu,
            )))
        }
        BackendType::Cuda => {
            let cuda = preferences.cuda;
            info!(
                "Using CUDA backend (compute capability {}.{})",
                cuda.capability_major, cuda.capability_minor
            );
            Ok(Box::new(CudaBackend::new(cuda)?))
        }
    }
}

// ----------------------------------------------------------------------
// Helpers shared by backends
// ----------------------------------------------------------------------

/// Elements per source row of per-synapse storage
pub(crate) fn synapse_row_stride(sg: &SynapseGroup) -> usize {
    match sg.connectivity() {
        SynapseMatrixConnectivity::Dense | SynapseMatrixConnectivity::Bitmask => sg.trg_num_neurons(),
        SynapseMatrixConnectivity::Sparse | SynapseMatrixConnectivity::Procedural => {
            sg.max_connections()
        }
    }
}

/// Connections processed by the synapse update
pub(crate) fn presynaptic_update_groups(
    model: &FinalizedModel,
) -> impl Iterator<Item = &SynapseGroup> + '_ {
    model
        .synapse_groups()
        .iter()
        .filter(|sg| sg.is_true_spike_required() || sg.is_spike_event_required())
}

/// Extra global parameters referenced by neuron code, keyed by uniquified name
///
/// Spike-like event conditions run in the source population's kernel, so
/// weight update parameters they reference are included.
pub(crate) fn neuron_kernel_extra_global_params(model: &FinalizedModel) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    for ng in model.neuron_groups() {
        ng.kernel_extra_global_params(&mut params);
        for sg in model.spike_event_sources(ng) {
            let wu = sg.wu_model();
            for egp in &wu.extra_global_params {
                if references_placeholder(&wu.event_threshold_condition_code, &egp.name) {
                    params.insert(format!("{}{}", egp.name, sg.name()), egp.ty.clone());
                }
            }
        }
    }
    params
}

/// Extra global parameters referenced by weight update code, keyed by uniquified name
pub(crate) fn synapse_kernel_extra_global_params(model: &FinalizedModel) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();
    for sg in presynaptic_update_groups(model) {
        let wu = sg.wu_model();
        for egp in &wu.extra_global_params {
            let used = references_placeholder(&wu.sim_code, &egp.name)
                || references_placeholder(&wu.event_code, &egp.name)
                || references_placeholder(&wu.event_threshold_condition_code, &egp.name);
            if used {
                params.insert(format!("{}{}", egp.name, sg.name()), egp.ty.clone());
            }
        }
    }
    params
}

/// `ty name, ` for every kernel parameter
pub(crate) fn kernel_param_list(params: &BTreeMap<String, String>) -> String {
    let mut list = String::new();
    for (name, ty) in params {
        // Writing to a String cannot fail
        let _ = write!(list, "{} {}, ", ty, name);
    }
    list
}

/// `name, ` for every kernel parameter, for a launch
pub(crate) fn kernel_arg_list(params: &BTreeMap<String, String>) -> String {
    params.keys().map(|name| format!("{}, ", name)).collect()
}

/// Index of the spike count written this step: the queue pointer when delayed, else 0
pub(crate) fn spike_count_slot(ng: &NeuronGroup, prefix: &str) -> String {
    if ng.is_delay_required() {
        format!("{}spkQuePtr{}", prefix, ng.name())
    } else {
        "0".to_string()
    }
}

/// Bind the `$(gennrand_*)` functions to standard library distributions drawing from `$(rng)`
///
/// The runner declares the distributions next to `hostRNG`.
pub(crate) fn add_host_rng_functions(subs: &mut Substitutions<'_>) -> Result<()> {
    subs.add_func_substitution("gennrand_uniform", 0, "standardUniformDistribution($(rng))")?;
    subs.add_func_substitution("gennrand_normal", 0, "standardNormalDistribution($(rng))")?;
    subs.add_func_substitution(
        "gennrand_exponential",
        0,
        "standardExponentialDistribution($(rng))",
    )?;
    subs.add_func_substitution(
        "gennrand_log_normal",
        2,
        "std::lognormal_distribution<scalar>($(0), $(1))($(rng))",
    )?;
    Ok(())
}

/// Slot of the source spike queue a delayed connection reads this step
pub(crate) fn pre_read_delay_slot(sg: &SynapseGroup, src: &NeuronGroup, prefix: &str) -> String {
    let slots = src.num_delay_slots();
    format!(
        "(({}spkQuePtr{} + {}) % {})",
        prefix,
        src.name(),
        slots - sg.delay_steps(),
        slots
    )
}

/// Emit the read-delay slot and offset of a delayed source population
pub(crate) fn gen_pre_read_delay(
    os: &mut CodeStream,
    sg: &SynapseGroup,
    src: &NeuronGroup,
    prefix: &str,
) -> Result<()> {
    if src.is_delay_required() {
        writeln!(
            os,
            "const unsigned int preReadDelaySlot = {};",
            pre_read_delay_slot(sg, src, prefix)
        )?;
        writeln!(
            os,
            "const unsigned int preReadDelayOffset = preReadDelaySlot * {};",
            src.num_neurons()
        )?;
    }
    Ok(())
}

/// Emit the read and write offsets into a delayed population's variable queues
pub(crate) fn gen_neuron_delay_offsets(os: &mut CodeStream, ng: &NeuronGroup, prefix: &str) -> Result<()> {
    if ng.is_delay_required() {
        let slots = ng.num_delay_slots();
        writeln!(
            os,
            "const unsigned int readDelayOffset = ((({}spkQuePtr{} + {}) % {}) * {});",
            prefix,
            ng.name(),
            slots - 1,
            slots,
            ng.num_neurons()
        )?;
        writeln!(
            os,
            "const unsigned int writeDelayOffset = ({}spkQuePtr{} * {});",
            prefix,
            ng.name(),
            ng.num_neurons()
        )?;
    }
    Ok(())
}
