// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! CUDA Backend for FEAGI Kernel Generation
//!
//! Emits CUDA kernels for NVIDIA GPUs with Compute Capability 3.0+.
//!
//! # Thread layout
//! Every kernel lays its populations out back to back in one thread index
//! space. Each population's range is padded to a whole number of blocks, so a
//! block never mixes two populations and `__syncthreads()` inside a population
//! branch is reached by the whole block.
//!
//! # Kernels
//! - `preNeuronResetKernel`: one thread per population and per dendritic delay
//!   buffer; advances ring pointers and clears this step's spike counts
//! - `updateNeuronsKernel`: one thread per neuron; spikes are staged in shared
//!   memory and appended to the global buffers with one atomic per block
//! - `updatePresynapticKernel`: threads per connection as chosen by its
//!   [`PresynapticUpdateStrategy`]
//! - `initializeKernel`: device-side state initialisation

use std::fmt::Write;

use feagi_kernelgen_model::utils::{ceil_divide, pad_size};
use feagi_kernelgen_model::{
    FinalizedModel, InitLocation, NeuronGroup, Precision, SynapseGroup, SynapseMatrixConnectivity,
    VarLocation, VarMode,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    add_host_rng_functions, gen_neuron_delay_offsets, gen_pre_read_delay, kernel_arg_list,
    kernel_param_list, neuron_kernel_extra_global_params, presynaptic_update_groups,
    spike_count_slot, synapse_kernel_extra_global_params, synapse_row_stride, Backend,
    BackendType, NeuronGroupHandler, NeuronInitHandler, SpikeKind, SynapseInitHandler,
    SynapseUpdateHandlers, VarInitHandler,
};
use crate::code_stream::CodeStream;
use crate::error::{CodegenError, Result};
use crate::kernel::{Kernel, KernelBlockSizes};
use crate::strategy::{select_strategy, Accumulation, PresynapticUpdateStrategy};
use crate::substitutions::Substitutions;

/// Prefix of device-side symbols
const DEVICE_PREFIX: &str = "dd_";

/// Threads per warp; block sizes must be a multiple of it
const WARP_SIZE: usize = 32;

const MAX_BLOCK_SIZE: usize = 1024;

/// Oldest supported compute capability (major version)
const MIN_CAPABILITY_MAJOR: u32 = 3;

/// Double precision `atomicAdd` is native from this capability on
const NATIVE_DOUBLE_ATOMIC_MAJOR: u32 = 6;

/// Target device and kernel shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CudaPreferences {
    /// Compute capability major version of the target device
    pub capability_major: u32,
    /// Compute capability minor version of the target device
    pub capability_minor: u32,
    pub block_sizes: KernelBlockSizes,
}

impl Default for CudaPreferences {
    fn default() -> Self {
        Self {
            capability_major: 7,
            capability_minor: 0,
            block_sizes: KernelBlockSizes::default(),
        }
    }
}

/// Strategy, accumulation and thread range chosen for one connection
#[derive(Debug, Clone, Copy)]
pub struct PresynapticPlan<'m> {
    pub synapse_group: &'m SynapseGroup,
    pub strategy: PresynapticUpdateStrategy,
    pub accumulation: Accumulation,
    /// Threads the strategy needs, before padding
    pub num_threads: usize,
    /// First thread of the connection's padded range
    pub start: usize,
    /// One past the last thread of the padded range
    pub end: usize,
}

/// CUDA code generation backend
#[derive(Debug, Clone)]
pub struct CudaBackend {
    preferences: CudaPreferences,
}

impl CudaBackend {
    /// Create a backend for the device described by `preferences`
    pub fn new(preferences: CudaPreferences) -> Result<Self> {
        if preferences.capability_major < MIN_CAPABILITY_MAJOR {
            return Err(CodegenError::UnsupportedConfiguration(format!(
                "compute capability {}.{} is below the supported minimum {}.0",
                preferences.capability_major, preferences.capability_minor, MIN_CAPABILITY_MAJOR
            )));
        }

        for kernel in Kernel::ALL {
            let block_size = preferences.block_sizes.get(kernel);
            if block_size == 0 || block_size % WARP_SIZE != 0 || block_size > MAX_BLOCK_SIZE {
                return Err(CodegenError::UnsupportedConfiguration(format!(
                    "{} block size {} must be a non-zero multiple of {} no larger than {}",
                    kernel, block_size, WARP_SIZE, MAX_BLOCK_SIZE
                )));
            }
        }

        debug!(
            "CUDA backend: sm_{}{}, block sizes {:?}",
            preferences.capability_major, preferences.capability_minor, preferences.block_sizes
        );
        Ok(Self { preferences })
    }

    pub fn preferences(&self) -> &CudaPreferences {
        &self.preferences
    }

    /// Choose a strategy and thread range for every connection the synapse update processes
    ///
    /// Runs before any kernel text is written, so a connection no strategy
    /// accepts fails generation without leaving partial output.
    pub fn plan_presynaptic_update<'m>(
        &self,
        model: &'m FinalizedModel,
    ) -> Result<Vec<PresynapticPlan<'m>>> {
        let block_size = self.kernel_block_size(Kernel::PresynapticUpdate);
        let mut plans = Vec::new();
        let mut start = 0;

        for sg in presynaptic_update_groups(model) {
            let strategy = select_strategy(sg)?;
            let num_threads = strategy.num_threads(sg);
            let accumulation = strategy.accumulation(sg, self);
            let end = start + pad_size(num_threads, block_size);

            debug!(
                "Synapse population '{}': {} strategy, {:?} accumulation, threads {}..{}",
                sg.name(),
                strategy,
                accumulation,
                start,
                end
            );

            plans.push(PresynapticPlan {
                synapse_group: sg,
                strategy,
                accumulation,
                num_threads,
                start,
                end,
            });
            start = end;
        }

        info!(
            "Planned presynaptic update: {} synapse populations, {} threads",
            plans.len(),
            start
        );
        Ok(plans)
    }

    fn sm_version(&self) -> String {
        format!(
            "sm_{}{}",
            self.preferences.capability_major, self.preferences.capability_minor
        )
    }

    /// Padded thread range of every population in a kernel of `block_size`
    fn neuron_ranges<'m>(
        model: &'m FinalizedModel,
        block_size: usize,
    ) -> Vec<(&'m NeuronGroup, (usize, usize))> {
        let (mut id_start, mut padded_id_start) = (0, 0);
        model
            .neuron_groups()
            .iter()
            .map(|ng| {
                let (_, padded) = ng.calc_sizes(block_size, &mut id_start, &mut padded_id_start);
                (ng, padded)
            })
            .collect()
    }

    /// Connections with at least one variable initialised on the device
    fn device_init_synapse_groups(model: &FinalizedModel) -> impl Iterator<Item = &SynapseGroup> + '_ {
        model.synapse_groups().iter().filter(|sg| {
            sg.wu_var_modes()
                .iter()
                .zip(sg.wu_var_initialisers())
                .any(|(mode, init)| mode.is_device_init() && init.has_code())
        })
    }

    /// Padded thread range of every population and connection in the initialisation kernel
    fn init_ranges<'m>(
        &self,
        model: &'m FinalizedModel,
    ) -> (
        Vec<(&'m NeuronGroup, (usize, usize))>,
        Vec<(&'m SynapseGroup, (usize, usize))>,
    ) {
        let block_size = self.kernel_block_size(Kernel::Initialize);
        let neurons = Self::neuron_ranges(model, block_size);
        let mut start = neurons.last().map(|(_, (_, end))| *end).unwrap_or(0);

        let synapses = Self::device_init_synapse_groups(model)
            .map(|sg| {
                let end = start + pad_size(sg.src_num_neurons() * synapse_row_stride(sg), block_size);
                let range = (sg, (start, end));
                start = end;
                range
            })
            .collect();
        (neurons, synapses)
    }

    fn init_thread_count(&self, model: &FinalizedModel) -> usize {
        let (neurons, synapses) = self.init_ranges(model);
        synapses
            .last()
            .map(|(_, (_, end))| *end)
            .or_else(|| neurons.last().map(|(_, (_, end))| *end))
            .unwrap_or(0)
    }

    fn gen_kernel_launch(
        os: &mut CodeStream,
        kernel: Kernel,
        block_size: usize,
        num_threads: usize,
        args: &str,
    ) -> Result<()> {
        os.scope(|os| {
            writeln!(os, "const dim3 threads({}, 1);", block_size)?;
            writeln!(os, "const dim3 grid({}, 1);", ceil_divide(num_threads, block_size))?;
            writeln!(os, "{}<<<grid, threads>>>({});", kernel.function_name(), args)?;
            writeln!(os, "CHECK_CUDA_ERRORS(cudaPeekAtLastError());")?;
            Ok(())
        })
    }

    /// `if (id < end)` chain header for the `index`th range of a kernel
    fn gen_range_test(os: &mut CodeStream, index: usize, end: usize) -> Result<()> {
        if index == 0 {
            write!(os, "if (id < {})", end)?;
        } else {
            write!(os, "else if (id < {})", end)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Neuron update
    // ------------------------------------------------------------------

    fn gen_pre_neuron_reset_kernel(&self, os: &mut CodeStream, model: &FinalizedModel) -> Result<usize> {
        let dendritic: Vec<&SynapseGroup> = model
            .synapse_groups()
            .iter()
            .filter(|sg| sg.is_dendritic_delay_required())
            .collect();

        writeln!(
            os,
            "extern \"C\" __global__ void {}()",
            Kernel::PreNeuronReset.function_name()
        )?;
        os.scope(|os| {
            writeln!(
                os,
                "const unsigned int id = {} * blockIdx.x + threadIdx.x;",
                self.kernel_block_size(Kernel::PreNeuronReset)
            )?;

            for (i, ng) in model.neuron_groups().iter().enumerate() {
                Self::gen_range_test(os, i, i + 1)?;
                os.scope(|os| {
                    let name = ng.name();
                    if ng.is_delay_required() {
                        writeln!(
                            os,
                            "{0}spkQuePtr{1} = ({0}spkQuePtr{1} + 1) % {2};",
                            DEVICE_PREFIX,
                            name,
                            ng.num_delay_slots()
                        )?;
                    }
                    let slot = spike_count_slot(ng, DEVICE_PREFIX);
                    if ng.is_spike_event_required() {
                        writeln!(os, "{}glbSpkCntEvnt{}[{}] = 0;", DEVICE_PREFIX, name, slot)?;
                    }
                    writeln!(os, "{}glbSpkCnt{}[{}] = 0;", DEVICE_PREFIX, name, slot)?;
                    Ok(())
                })?;
            }

            let offset = model.neuron_groups().len();
            for (i, sg) in dendritic.iter().enumerate() {
                Self::gen_range_test(os, offset + i, offset + i + 1)?;
                os.scope(|os| {
                    writeln!(
                        os,
                        "{0}denDelayPtr{1} = ({0}denDelayPtr{1} + 1) % {2};",
                        DEVICE_PREFIX,
                        sg.ps_target_name(),
                        sg.max_dendritic_delay_timesteps()
                    )?;
                    Ok(())
                })?;
            }
            Ok(())
        })?;
        writeln!(os)?;

        Ok(model.neuron_groups().len() + dendritic.len())
    }

    fn gen_neuron_population(
        &self,
        os: &mut CodeStream,
        model: &FinalizedModel,
        ng: &NeuronGroup,
        start: usize,
        kernel_subs: &Substitutions<'_>,
        handler: NeuronGroupHandler<'_>,
    ) -> Result<()> {
        let name = ng.name();
        writeln!(os, "const unsigned int lid = id - {};", start)?;
        gen_neuron_delay_offsets(os, ng, DEVICE_PREFIX)?;

        let mut pop_subs = kernel_subs.child();
        pop_subs.add_var_substitution("id", "lid")?;
        if model.is_neuron_sim_rng_required(ng) {
            pop_subs.add_var_substitution("rng", format!("&{}rng{}[lid]", DEVICE_PREFIX, name))?;
        }

        write!(os, "if (lid < {})", ng.num_neurons())?;
        os.scope(|os| handler(os, ng, &pop_subs))?;
        writeln!(os, "__syncthreads();")?;

        let kinds: &[SpikeKind] = if ng.is_spike_event_required() {
            &[SpikeKind::Event, SpikeKind::True]
        } else {
            &[SpikeKind::True]
        };
        let slot = spike_count_slot(ng, DEVICE_PREFIX);

        // One global atomic per block reserves room for the block's spikes
        for kind in kinds {
            let sfx = kind.suffix();
            write!(os, "if (threadIdx.x == 0)")?;
            os.scope(|os| {
                write!(os, "if (shSpk{}Count > 0)", sfx)?;
                os.scope(|os| {
                    writeln!(
                        os,
                        "shPosSpk{0} = atomicAdd((unsigned int *) &{1}glbSpkCnt{0}{2}[{3}], shSpk{0}Count);",
                        sfx, DEVICE_PREFIX, name, slot
                    )?;
                    Ok(())
                })
            })?;
        }
        writeln!(os, "__syncthreads();")?;

        let queue_offset = ng.queue_offset(DEVICE_PREFIX);
        for kind in kinds {
            let sfx = kind.suffix();
            write!(os, "if (threadIdx.x < shSpk{}Count)", sfx)?;
            os.scope(|os| {
                writeln!(os, "const unsigned int spkId = shSpk{}[threadIdx.x];", sfx)?;
                writeln!(
                    os,
                    "{}glbSpk{}{}[{}shPosSpk{} + threadIdx.x] = spkId;",
                    DEVICE_PREFIX, sfx, name, queue_offset, sfx
                )?;
                if *kind == SpikeKind::True && ng.is_spike_time_required() {
                    writeln!(os, "{}sT{}[{}spkId] = t;", DEVICE_PREFIX, name, queue_offset)?;
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Synapse update
    // ------------------------------------------------------------------

    fn gen_presynaptic_plan(
        &self,
        os: &mut CodeStream,
        model: &FinalizedModel,
        plan: &PresynapticPlan<'_>,
        kernel_subs: &Substitutions<'_>,
        handlers: &SynapseUpdateHandlers<'_>,
    ) -> Result<()> {
        let sg = plan.synapse_group;
        let src = model.src_neuron_group(sg);
        let trg_num_neurons = sg.trg_num_neurons();

        writeln!(os, "const unsigned int lid = id - {};", plan.start)?;
        gen_pre_read_delay(os, sg, src, DEVICE_PREFIX)?;

        let mut pop_subs = kernel_subs.child();
        pop_subs.add_var_substitution("id", "lid")?;

        match plan.accumulation {
            Accumulation::SharedMemory => {
                writeln!(os, "shLg[threadIdx.x] = 0;")?;
                writeln!(os, "__syncthreads();")?;
            }
            Accumulation::Register => writeln!(os, "scalar linSyn = 0;")?,
            Accumulation::GlobalAtomic => {}
        }

        if sg.is_spike_event_required() {
            writeln!(os, "// process presynaptic events: spike-like events")?;
            os.scope(|os| {
                plan.strategy
                    .gen_code(os, model, sg, &pop_subs, self, false, handlers)
            })?;
        }
        if sg.is_true_spike_required() {
            writeln!(os, "// process presynaptic events: true spikes")?;
            os.scope(|os| {
                plan.strategy
                    .gen_code(os, model, sg, &pop_subs, self, true, handlers)
            })?;
        }

        match plan.accumulation {
            Accumulation::SharedMemory => {
                writeln!(os, "__syncthreads();")?;
                write!(os, "if (threadIdx.x < {})", trg_num_neurons)?;
                os.scope(|os| {
                    let target = format!("&{}inSyn{}[threadIdx.x]", DEVICE_PREFIX, sg.ps_target_name());
                    writeln!(
                        os,
                        "{};",
                        self.float_atomic_add(model.precision(), &target, "shLg[threadIdx.x]")
                    )?;
                    Ok(())
                })?;
            }
            Accumulation::Register => {
                write!(os, "if (lid < {})", trg_num_neurons)?;
                os.scope(|os| {
                    writeln!(
                        os,
                        "{}inSyn{}[lid] += linSyn;",
                        DEVICE_PREFIX,
                        sg.ps_target_name()
                    )?;
                    Ok(())
                })?;
            }
            Accumulation::GlobalAtomic => {}
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Initialisation
    // ------------------------------------------------------------------

    fn gen_neuron_init_population(
        &self,
        os: &mut CodeStream,
        model: &FinalizedModel,
        ng: &NeuronGroup,
        start: usize,
        kernel_subs: &Substitutions<'_>,
        handler: NeuronInitHandler<'_>,
    ) -> Result<()> {
        let name = ng.name();
        let num_neurons = ng.num_neurons();
        writeln!(os, "const unsigned int lid = id - {};", start)?;

        let mut pop_subs = kernel_subs.child();
        pop_subs.add_var_substitution("id", "lid")?;
        if ng.is_init_rng_required() {
            writeln!(os, "curandStatePhilox4_32_10_t initRNG;")?;
            writeln!(os, "curand_init(deviceRNGSeed, id, 0, &initRNG);")?;
            pop_subs.add_var_substitution("rng", "&initRNG")?;
        }

        write!(os, "if (lid < {})", num_neurons)?;
        os.scope(|os| {
            if model.is_neuron_sim_rng_required(ng) {
                writeln!(
                    os,
                    "curand_init(deviceRNGSeed, id, 0, &{}rng{}[lid]);",
                    DEVICE_PREFIX, name
                )?;
            }

            write!(os, "if (lid == 0)")?;
            os.scope(|os| {
                for slot in 0..ng.num_delay_slots() {
                    writeln!(os, "{}glbSpkCnt{}[{}] = 0;", DEVICE_PREFIX, name, slot)?;
                    if ng.is_spike_event_required() {
                        writeln!(os, "{}glbSpkCntEvnt{}[{}] = 0;", DEVICE_PREFIX, name, slot)?;
                    }
                }
                Ok(())
            })?;

            for slot in 0..ng.num_delay_slots() {
                let offset = slot * num_neurons;
                writeln!(os, "{}glbSpk{}[{} + lid] = 0;", DEVICE_PREFIX, name, offset)?;
                if ng.is_spike_event_required() {
                    writeln!(os, "{}glbSpkEvnt{}[{} + lid] = 0;", DEVICE_PREFIX, name, offset)?;
                }
                if ng.is_spike_time_required() {
                    writeln!(os, "{}sT{}[{} + lid] = -TIME_MAX;", DEVICE_PREFIX, name, offset)?;
                }
            }

            handler(os, ng, &pop_subs, InitLocation::Device)
        })
    }
}

impl Backend for CudaBackend {
    fn name(&self) -> &'static str {
        "CUDA"
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Cuda
    }

    fn gen_neuron_update(
        &self,
        os: &mut CodeStream,
        model: &FinalizedModel,
        handler: NeuronGroupHandler<'_>,
    ) -> Result<()> {
        let block_size = self.kernel_block_size(Kernel::NeuronUpdate);
        let ranges = Self::neuron_ranges(model, block_size);
        let num_threads = ranges.last().map(|(_, (_, end))| *end).unwrap_or(0);
        let egps = neuron_kernel_extra_global_params(model);
        let any_events = model.neuron_groups().iter().any(|ng| ng.is_spike_event_required());

        let reset_threads = self.gen_pre_neuron_reset_kernel(os, model)?;

        writeln!(
            os,
            "extern \"C\" __global__ void {}({}scalar t)",
            Kernel::NeuronUpdate.function_name(),
            kernel_param_list(&egps)
        )?;
        os.scope(|os| {
            writeln!(os, "const unsigned int id = {} * blockIdx.x + threadIdx.x;", block_size)?;

            let kinds: &[SpikeKind] = if any_events {
                &[SpikeKind::True, SpikeKind::Event]
            } else {
                &[SpikeKind::True]
            };
            for kind in kinds {
                let sfx = kind.suffix();
                writeln!(os, "__shared__ volatile unsigned int shSpk{}[{}];", sfx, block_size)?;
                writeln!(os, "__shared__ volatile unsigned int shPosSpk{};", sfx)?;
                writeln!(os, "__shared__ volatile unsigned int shSpk{}Count;", sfx)?;
            }
            writeln!(os)?;

            write!(os, "if (threadIdx.x == 0)")?;
            os.scope(|os| {
                for kind in kinds {
                    writeln!(os, "shSpk{}Count = 0;", kind.suffix())?;
                }
                Ok(())
            })?;
            writeln!(os, "__syncthreads();")?;
            writeln!(os)?;

            let mut kernel_subs = Substitutions::new();
            kernel_subs.add_var_substitution("t", "t")?;
            self.add_rng_functions(&mut kernel_subs, model.precision())?;

            for (i, (ng, (start, end))) in ranges.iter().enumerate() {
                writeln!(os, "// neuron group {}", ng.name())?;
                Self::gen_range_test(os, i, *end)?;
                os.scope(|os| {
                    self.gen_neuron_population(os, model, ng, *start, &kernel_subs, handler)
                })?;
            }
            Ok(())
        })?;
        writeln!(os)?;

        writeln!(os, "void updateNeurons(scalar t)")?;
        os.scope(|os| {
            if reset_threads > 0 {
                Self::gen_kernel_launch(
                    os,
                    Kernel::PreNeuronReset,
                    self.kernel_block_size(Kernel::PreNeuronReset),
                    reset_threads,
                    "",
                )?;
            }
            if num_threads > 0 {
                let args = format!("{}t", kernel_arg_list(&egps));
                Self::gen_kernel_launch(os, Kernel::NeuronUpdate, block_size, num_threads, &args)?;
            }

            // Host mirrors of the device ring pointers
            for ng in model.neuron_groups().iter().filter(|ng| ng.is_delay_required()) {
                writeln!(
                    os,
                    "spkQuePtr{0} = (spkQuePtr{0} + 1) % {1};",
                    ng.name(),
                    ng.num_delay_slots()
                )?;
            }
            for sg in model.synapse_groups().iter().filter(|sg| sg.is_dendritic_delay_required()) {
                writeln!(
                    os,
                    "denDelayPtr{0} = (denDelayPtr{0} + 1) % {1};",
                    sg.ps_target_name(),
                    sg.max_dendritic_delay_timesteps()
                )?;
            }
            Ok(())
        })
    }

    fn gen_synapse_update(
        &self,
        os: &mut CodeStream,
        model: &FinalizedModel,
        handlers: &SynapseUpdateHandlers<'_>,
    ) -> Result<()> {
        let plans = self.plan_presynaptic_update(model)?;
        let block_size = self.kernel_block_size(Kernel::PresynapticUpdate);
        let num_threads = plans.last().map(|p| p.end).unwrap_or(0);
        let egps = synapse_kernel_extra_global_params(model);

        if !plans.is_empty() {
            writeln!(
                os,
                "extern \"C\" __global__ void {}({}scalar t)",
                Kernel::PresynapticUpdate.function_name(),
                kernel_param_list(&egps)
            )?;
            os.scope(|os| {
                writeln!(os, "const unsigned int id = {} * blockIdx.x + threadIdx.x;", block_size)?;

                let post_span: Vec<&SynapseGroup> = plans
                    .iter()
                    .filter(|p| p.strategy == PresynapticUpdateStrategy::PostSpan)
                    .map(|p| p.synapse_group)
                    .collect();
                if post_span.iter().any(|sg| sg.is_true_spike_required()) {
                    writeln!(os, "__shared__ unsigned int shSpk[{}];", block_size)?;
                }
                if post_span.iter().any(|sg| sg.is_spike_event_required()) {
                    writeln!(os, "__shared__ unsigned int shSpkEvnt[{}];", block_size)?;
                }
                if post_span
                    .iter()
                    .any(|sg| sg.connectivity() == SynapseMatrixConnectivity::Sparse) {
                    writeln!(os, "__shared__ unsigned int shRowLength[{}];", block_size)?;
                }
                if plans.iter().any(|p| p.accumulation == Accumulation::SharedMemory) {
                    writeln!(os, "__shared__ scalar shLg[{}];", block_size)?;
                }
                writeln!(os)?;

                let mut kernel_subs = Substitutions::new();
                kernel_subs.add_var_substitution("t", "t")?;
                self.add_rng_functions(&mut kernel_subs, model.precision())?;

                for (i, plan) in plans.iter().enumerate() {
                    writeln!(os, "// synapse group {}", plan.synapse_group.name())?;
                    Self::gen_range_test(os, i, plan.end)?;
                    os.scope(|os| self.gen_presynaptic_plan(os, model, plan, &kernel_subs, handlers))?;
                }
                Ok(())
            })?;
            writeln!(os)?;
        }

        writeln!(os, "void updateSynapses(scalar t)")?;
        os.scope(|os| {
            if num_threads > 0 {
                let args = format!("{}t", kernel_arg_list(&egps));
                Self::gen_kernel_launch(os, Kernel::PresynapticUpdate, block_size, num_threads, &args)?;
            }
            Ok(())
        })
    }

    fn gen_init(
        &self,
        os: &mut CodeStream,
        model: &FinalizedModel,
        ng_handler: NeuronInitHandler<'_>,
        sg_handler: SynapseInitHandler<'_>,
    ) -> Result<()> {
        let block_size = self.kernel_block_size(Kernel::Initialize);
        let (neuron_ranges, synapse_ranges) = self.init_ranges(model);
        let num_threads = self.init_thread_count(model);
        let procedural_rng = model
            .synapse_groups()
            .iter()
            .any(|sg| sg.is_procedural_connectivity_rng_required());

        writeln!(
            os,
            "extern \"C\" __global__ void {}(unsigned long long deviceRNGSeed)",
            Kernel::Initialize.function_name()
        )?;
        os.scope(|os| {
            writeln!(os, "const unsigned int id = {} * blockIdx.x + threadIdx.x;", block_size)?;

            if procedural_rng {
                write!(os, "if (id == 0)")?;
                os.scope(|os| {
                    writeln!(os, "curand_init(deviceRNGSeed, 0, 0, &{}rng[0]);", DEVICE_PREFIX)?;
                    Ok(())
                })?;
            }

            let mut kernel_subs = Substitutions::new();
            self.add_rng_functions(&mut kernel_subs, model.precision())?;

            for (i, (ng, (start, end))) in neuron_ranges.iter().enumerate() {
                writeln!(os, "// neuron group {}", ng.name())?;
                Self::gen_range_test(os, i, *end)?;
                os.scope(|os| {
                    self.gen_neuron_init_population(os, model, ng, *start, &kernel_subs, ng_handler)
                })?;
            }

            let offset = neuron_ranges.len();
            for (i, (sg, (start, end))) in synapse_ranges.iter().enumerate() {
                writeln!(os, "// synapse group {}", sg.name())?;
                Self::gen_range_test(os, offset + i, *end)?;
                os.scope(|os| {
                    writeln!(os, "const unsigned int lid = id - {};", start)?;
                    let mut pop_subs = kernel_subs.child();
                    pop_subs.add_var_substitution("id", "lid")?;
                    if sg.is_wu_init_rng_required() {
                        writeln!(os, "curandStatePhilox4_32_10_t initRNG;")?;
                        writeln!(os, "curand_init(deviceRNGSeed, id, 0, &initRNG);")?;
                        pop_subs.add_var_substitution("rng", "&initRNG")?;
                    }

                    write!(
                        os,
                        "if (lid < {})",
                        sg.src_num_neurons() * synapse_row_stride(sg)
                    )?;
                    os.scope(|os| sg_handler(os, sg, &pop_subs, InitLocation::Device))
                })?;
            }
            Ok(())
        })?;
        writeln!(os)?;

        writeln!(os, "void initialize()")?;
        os.scope(|os| {
            if model.seed() == 0 {
                writeln!(os, "std::random_device seedSource;")?;
                writeln!(os, "const unsigned long long deviceRNGSeed = seedSource();")?;
                writeln!(os, "hostRNG.seed(seedSource());")?;
            } else {
                writeln!(os, "const unsigned long long deviceRNGSeed = {}ull;", model.seed())?;
                writeln!(os, "hostRNG.seed({});", model.seed())?;
            }
            writeln!(os)?;

            let mut host_subs = Substitutions::new();
            host_subs.add_var_substitution("rng", "hostRNG")?;
            add_host_rng_functions(&mut host_subs)?;

            for ng in model.neuron_groups() {
                writeln!(os, "// neuron group {}", ng.name())?;
                os.scope(|os| ng_handler(os, ng, &host_subs, InitLocation::Host))?;
            }
            for sg in model.synapse_groups() {
                writeln!(os, "// synapse group {}", sg.name())?;
                os.scope(|os| sg_handler(os, sg, &host_subs, InitLocation::Host))?;
            }

            writeln!(os, "copyStateToDevice();")?;
            if num_threads > 0 {
                Self::gen_kernel_launch(os, Kernel::Initialize, block_size, num_threads, "deviceRNGSeed")?;
            }
            writeln!(os, "CHECK_CUDA_ERRORS(cudaDeviceSynchronize());")?;
            Ok(())
        })
    }

    fn gen_definitions_preamble(&self, os: &mut CodeStream) -> Result<()> {
        writeln!(os, "// CUDA includes")?;
        writeln!(os, "#include <cuda.h>")?;
        writeln!(os, "#include <cuda_runtime.h>")?;
        writeln!(os, "#include <curand_kernel.h>")?;
        writeln!(os)?;
        writeln!(os, "#define SUPPORT_CODE_FUNC __device__ __host__ inline")?;
        os.write_str(concat!(
            "#define CHECK_CUDA_ERRORS(call) {\\\n",
            "    cudaError_t error = call;\\\n",
            "    if (error != cudaSuccess) {\\\n",
            "        fprintf(stderr, \"%s: %i: cuda error %i: %s\\n\", __FILE__, __LINE__, (int)error, cudaGetErrorString(error));\\\n",
            "        exit(EXIT_FAILURE);\\\n",
            "    }\\\n",
            "}\n",
        ))?;

        if self.preferences.capability_major < NATIVE_DOUBLE_ATOMIC_MAJOR {
            writeln!(os)?;
            writeln!(os, "// software double precision atomic add")?;
            os.write_str(concat!(
                "__device__ inline double atomicAddSW(double *address, double val) {\n",
                "    unsigned long long int *address_as_ull = (unsigned long long int *)address;\n",
                "    unsigned long long int old = *address_as_ull, assumed;\n",
                "    do {\n",
                "        assumed = old;\n",
                "        old = atomicCAS(address_as_ull, assumed, __double_as_longlong(val + __longlong_as_double(assumed)));\n",
                "    } while (assumed != old);\n",
                "    return __longlong_as_double(old);\n",
                "}\n",
            ))?;
        }
        Ok(())
    }

    fn gen_runner_preamble(&self, os: &mut CodeStream, model: &FinalizedModel) -> Result<()> {
        // Shared Philox state that procedural connections copy and skip ahead from
        if model
            .synapse_groups()
            .iter()
            .any(|sg| sg.is_procedural_connectivity_rng_required())
        {
            writeln!(os, "__device__ curandStatePhilox4_32_10_t {}rng[1];", DEVICE_PREFIX)?;
        }
        Ok(())
    }

    fn gen_variable_definition(
        &self,
        os: &mut CodeStream,
        ty: &str,
        name: &str,
        location: VarLocation,
    ) -> Result<()> {
        if location.is_host() {
            writeln!(os, "EXPORT_VAR {}* {};", ty, name)?;
        }
        if location.is_device() {
            writeln!(os, "EXPORT_VAR {}* d_{};", ty, name)?;
            writeln!(os, "EXPORT_VAR __device__ {}* {}{};", ty, DEVICE_PREFIX, name)?;
        }
        Ok(())
    }

    fn gen_variable_implementation(
        &self,
        os: &mut CodeStream,
        ty: &str,
        name: &str,
        location: VarLocation,
    ) -> Result<()> {
        if location.is_host() {
            writeln!(os, "{}* {};", ty, name)?;
        }
        if location.is_device() {
            writeln!(os, "{}* d_{};", ty, name)?;
            writeln!(os, "__device__ {}* {}{};", ty, DEVICE_PREFIX, name)?;
        }
        Ok(())
    }

    fn gen_variable_allocation(
        &self,
        os: &mut CodeStream,
        ty: &str,
        name: &str,
        location: VarLocation,
        count: usize,
    ) -> Result<()> {
        if location.is_zero_copy() && !location.is_host() {
            return Err(CodegenError::UnsupportedConfiguration(format!(
                "zero-copy variable '{}' must have a host copy",
                name
            )));
        }

        if location.is_host() {
            let flags = if location.is_zero_copy() {
                "cudaHostAllocMapped"
            } else {
                "cudaHostAllocPortable"
            };
            writeln!(
                os,
                "CHECK_CUDA_ERRORS(cudaHostAlloc(&{}, {} * sizeof({}), {}));",
                name, count, ty, flags
            )?;
        }

        if location.is_device() {
            if location.is_zero_copy() {
                writeln!(
                    os,
                    "CHECK_CUDA_ERRORS(cudaHostGetDevicePointer((void **)&d_{0}, (void *){0}, 0));",
                    name
                )?;
            } else {
                writeln!(
                    os,
                    "CHECK_CUDA_ERRORS(cudaMalloc(&d_{}, {} * sizeof({})));",
                    name, count, ty
                )?;
            }
            writeln!(
                os,
                "CHECK_CUDA_ERRORS(cudaMemcpyToSymbol({0}{1}, &d_{1}, sizeof({2}*)));",
                DEVICE_PREFIX, name, ty
            )?;
        }
        Ok(())
    }

    fn gen_variable_free(&self, os: &mut CodeStream, name: &str, location: VarLocation) -> Result<()> {
        if location.is_host() {
            writeln!(os, "CHECK_CUDA_ERRORS(cudaFreeHost({}));", name)?;
        }
        // Zero-copy device pointers alias the host allocation
        if location.is_device() && !location.is_zero_copy() {
            writeln!(os, "CHECK_CUDA_ERRORS(cudaFree(d_{}));", name)?;
        }
        Ok(())
    }

    fn gen_variable_push(
        &self,
        os: &mut CodeStream,
        ty: &str,
        name: &str,
        location: VarLocation,
        count: usize,
    ) -> Result<()> {
        if location.is_host() && location.is_device() && !location.is_zero_copy() {
            writeln!(
                os,
                "CHECK_CUDA_ERRORS(cudaMemcpy(d_{0}, {0}, {1} * sizeof({2}), cudaMemcpyHostToDevice));",
                name, count, ty
            )?;
        }
        Ok(())
    }

    fn gen_variable_pull(
        &self,
        os: &mut CodeStream,
        ty: &str,
        name: &str,
        location: VarLocation,
        count: usize,
    ) -> Result<()> {
        if location.is_host() && location.is_device() && !location.is_zero_copy() {
            writeln!(
                os,
                "CHECK_CUDA_ERRORS(cudaMemcpy({0}, d_{0}, {1} * sizeof({2}), cudaMemcpyDeviceToHost));",
                name, count, ty
            )?;
        }
        Ok(())
    }

    fn gen_variable_init(
        &self,
        os: &mut CodeStream,
        mode: VarMode,
        site: InitLocation,
        count: usize,
        kernel_subs: &Substitutions<'_>,
        handler: VarInitHandler<'_>,
    ) -> Result<()> {
        match site {
            // Inside the initialisation kernel `$(id)` is already this thread's element
            InitLocation::Device => {
                if mode.is_device_init() {
                    let var_subs = kernel_subs.child();
                    handler(os, &var_subs)?;
                }
            }
            InitLocation::Host => {
                if mode.is_device_init() {
                    return Ok(());
                }
                if !mode.location.is_host() {
                    return Err(CodegenError::UnsupportedConfiguration(format!(
                        "variable initialised on the host but stored in {} memory",
                        mode.location
                    )));
                }
                write!(os, "for (unsigned int i = 0; i < {}; i++)", count)?;
                os.scope(|os| {
                    let mut var_subs = kernel_subs.child();
                    var_subs.add_var_substitution("id", "i")?;
                    handler(os, &var_subs)
                })?;
            }
        }
        Ok(())
    }

    fn gen_ring_pointer_definition(&self, os: &mut CodeStream, name: &str) -> Result<()> {
        writeln!(os, "EXPORT_VAR unsigned int {};", name)?;
        writeln!(os, "EXPORT_VAR __device__ volatile unsigned int {}{};", DEVICE_PREFIX, name)?;
        Ok(())
    }

    fn gen_ring_pointer_implementation(&self, os: &mut CodeStream, name: &str) -> Result<()> {
        writeln!(os, "unsigned int {} = 0;", name)?;
        writeln!(os, "__device__ volatile unsigned int {}{} = 0;", DEVICE_PREFIX, name)?;
        Ok(())
    }

    fn gen_emit_spike(
        &self,
        os: &mut CodeStream,
        _ng: &NeuronGroup,
        subs: &Substitutions<'_>,
        kind: SpikeKind,
    ) -> Result<()> {
        let sfx = kind.suffix();
        writeln!(
            os,
            "const unsigned int spk{0}Idx = atomicAdd((unsigned int *) &shSpk{0}Count, 1);",
            sfx
        )?;
        writeln!(os, "shSpk{0}[spk{0}Idx] = {1};", sfx, subs.var("id")?)?;
        Ok(())
    }

    fn add_rng_functions(&self, subs: &mut Substitutions<'_>, precision: Precision) -> Result<()> {
        let (uniform, normal, log_normal) = match precision {
            Precision::Float => ("curand_uniform", "curand_normal", "curand_log_normal"),
            Precision::Double => (
                "curand_uniform_double",
                "curand_normal_double",
                "curand_log_normal_double",
            ),
        };
        subs.add_func_substitution("gennrand_uniform", 0, format!("{}($(rng))", uniform))?;
        subs.add_func_substitution("gennrand_normal", 0, format!("{}($(rng))", normal))?;
        subs.add_func_substitution(
            "gennrand_exponential",
            0,
            format!("(-log({}($(rng))))", uniform),
        )?;
        subs.add_func_substitution(
            "gennrand_log_normal",
            2,
            format!("{}($(rng), $(0), $(1))", log_normal),
        )?;
        Ok(())
    }

    fn population_rng_type(&self) -> Option<&'static str> {
        Some("curandState")
    }

    fn gen_makefile_preamble(&self, os: &mut CodeStream) -> Result<()> {
        writeln!(os, "NVCC := nvcc")?;
        writeln!(
            os,
            "NVCCFLAGS := -x cu -arch {} -std=c++11 -rdc=true --compiler-options \"-fPIC\"",
            self.sm_version()
        )?;
        writeln!(os, "LINKFLAGS := --shared -arch {}", self.sm_version())?;
        Ok(())
    }

    fn gen_makefile_link_rule(&self, os: &mut CodeStream) -> Result<()> {
        writeln!(os, "\t@$(NVCC) $(LINKFLAGS) -o $@ $(OBJECTS)")?;
        Ok(())
    }

    fn gen_makefile_compile_rule(&self, os: &mut CodeStream) -> Result<()> {
        writeln!(os, "%.o: %.cu")?;
        writeln!(os, "\t@$(NVCC) $(NVCCFLAGS) -c -o $@ $<")?;
        Ok(())
    }

    fn kernel_block_size(&self, kernel: Kernel) -> usize {
        self.preferences.block_sizes.get(kernel)
    }

    fn capability_tier(&self) -> u32 {
        self.preferences.capability_major
    }

    fn float_atomic_add(&self, precision: Precision, address: &str, value: &str) -> String {
        if precision == Precision::Double
            && self.preferences.capability_major < NATIVE_DOUBLE_ATOMIC_MAJOR
        {
            format!("atomicAddSW({}, {})", address, value)
        } else {
            format!("atomicAdd({}, {})", address, value)
        }
    }

    fn var_prefix(&self) -> &'static str {
        DEVICE_PREFIX
    }

    fn source_extension(&self) -> &'static str {
        "cu"
    }

    fn compiler_command(&self) -> String {
        "nvcc".to_string()
    }

    /// Sequences below the initialisation thread count belong to the init kernel;
    /// procedural connections follow in model order, one sequence per thread.
    fn procedural_connectivity_sequence(&self, sg: &SynapseGroup, model: &FinalizedModel) -> u64 {
        let mut sequence = self.init_thread_count(model) as u64;
        for other in model.synapse_groups() {
            if other.name() == sg.name() {
                break;
            }
            if other.is_procedural_connectivity_rng_required() {
                sequence += (other.src_num_neurons() * other.num_threads_per_spike()) as u64;
            }
        }
        sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_preferences_are_valid() {
        let backend = CudaBackend::new(CudaPreferences::default()).unwrap();
        assert_eq!(backend.capability_tier(), 7);
        assert_eq!(backend.kernel_block_size(Kernel::PresynapticUpdate), 32);
        assert_eq!(backend.var_prefix(), "dd_");
    }

    #[test]
    fn test_block_size_validation() {
        for bad in [0, 48, 2048] {
            let mut prefs = CudaPreferences::default();
            prefs.block_sizes.set(Kernel::NeuronUpdate, bad);
            assert!(matches!(
                CudaBackend::new(prefs),
                Err(CodegenError::UnsupportedConfiguration(_))
            ));
        }

        let mut prefs = CudaPreferences::default();
        prefs.block_sizes.set(Kernel::Initialize, 1024);
        assert!(CudaBackend::new(prefs).is_ok());
    }

    #[test]
    fn test_old_capability_rejected() {
        let prefs = CudaPreferences {
            capability_major: 2,
            ..Default::default()
        };
        assert!(CudaBackend::new(prefs).is_err());
    }

    #[test]
    fn test_double_atomic_falls_back_below_capability_6() {
        let old = CudaBackend::new(CudaPreferences {
            capability_major: 5,
            capability_minor: 2,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            old.float_atomic_add(Precision::Double, "&x[i]", "v"),
            "atomicAddSW(&x[i], v)"
        );
        assert_eq!(
            old.float_atomic_add(Precision::Float, "&x[i]", "v"),
            "atomicAdd(&x[i], v)"
        );

        let new = CudaBackend::new(CudaPreferences::default()).unwrap();
        assert_eq!(
            new.float_atomic_add(Precision::Double, "&x[i]", "v"),
            "atomicAdd(&x[i], v)"
        );
    }

    #[test]
    fn test_software_atomic_only_emitted_when_needed() {
        let old = CudaBackend::new(CudaPreferences {
            capability_major: 5,
            ..Default::default()
        })
        .unwrap();
        let mut os = CodeStream::new();
        old.gen_definitions_preamble(&mut os).unwrap();
        assert!(os.as_str().contains("atomicAddSW"));

        let new = CudaBackend::new(CudaPreferences::default()).unwrap();
        let mut os = CodeStream::new();
        new.gen_definitions_preamble(&mut os).unwrap();
        assert!(!os.as_str().contains("atomicAddSW"));
        assert!(os.as_str().contains("CHECK_CUDA_ERRORS"));
    }

    #[test]
    fn test_rng_functions_follow_precision() {
        let backend = CudaBackend::new(CudaPreferences::default()).unwrap();
        let mut subs = Substitutions::new();
        backend.add_rng_functions(&mut subs, Precision::Double).unwrap();
        subs.add_var_substitution("rng", "&rngState").unwrap();
        assert_eq!(
            subs.apply("$(gennrand_uniform)").unwrap(),
            "curand_uniform_double(&rngState)"
        );
        assert_eq!(
            subs.apply("$(gennrand_log_normal, 0.0, 1.0)").unwrap(),
            "curand_log_normal_double(&rngState, 0.0, 1.0)"
        );
    }

    #[test]
    fn test_zero_copy_allocation_maps_host_memory() {
        let backend = CudaBackend::new(CudaPreferences::default()).unwrap();
        let mut os = CodeStream::new();
        backend
            .gen_variable_allocation(&mut os, "scalar", "VExc", VarLocation::HOST_DEVICE_ZERO_COPY, 10)
            .unwrap();
        let code = os.as_str();
        assert!(code.contains("cudaHostAllocMapped"));
        assert!(code.contains("cudaHostGetDevicePointer((void **)&d_VExc, (void *)VExc, 0)"));
        assert!(!code.contains("cudaMalloc"));

        let mut os = CodeStream::new();
        backend
            .gen_variable_push(&mut os, "scalar", "VExc", VarLocation::HOST_DEVICE_ZERO_COPY, 10)
            .unwrap();
        assert!(os.as_str().is_empty());
    }

    #[test]
    fn test_host_init_of_device_only_variable_fails() {
        let backend = CudaBackend::new(CudaPreferences::default()).unwrap();
        let mut os = CodeStream::new();
        let subs = Substitutions::new();
        let mode = VarMode::new(VarLocation::DEVICE, InitLocation::Host);
        let err = backend
            .gen_variable_init(&mut os, mode, InitLocation::Host, 4, &subs, &|_, _| Ok(()))
            .unwrap_err();
        assert!(matches!(err, CodegenError::UnsupportedConfiguration(_)));
    }
}
