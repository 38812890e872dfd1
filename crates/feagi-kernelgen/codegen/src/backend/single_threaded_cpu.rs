// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! Single-threaded CPU Backend
//!
//! Reference backend: every kernel becomes plain nested loops on the host, in
//! the same order the parallel backends process populations. Accumulation is a
//! non-atomic `+=` and every connectivity representation is walked row by row,
//! so no presynaptic update strategy is involved.

use std::fmt::Write;

use feagi_kernelgen_model::{
    FinalizedModel, InitLocation, NeuronGroup, Precision, SynapseGroup, SynapseMatrixConnectivity,
    VarLocation, VarMode,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    add_host_rng_functions, gen_neuron_delay_offsets, gen_pre_read_delay, presynaptic_update_groups,
    spike_count_slot, Backend, BackendType, NeuronGroupHandler, NeuronInitHandler, SpikeKind,
    SynapseInitHandler, SynapseUpdateHandlers, VarInitHandler,
};
use crate::code_stream::CodeStream;
use crate::error::Result;
use crate::kernel::Kernel;
use crate::substitutions::Substitutions;

const RETEST_BRACE: u32 = 230;

/// Host compiler used by the generated Makefile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuPreferences {
    pub compiler: String,
    pub optimization_flags: String,
}

impl Default for CpuPreferences {
    fn default() -> Self {
        Self {
            compiler: "g++".to_string(),
            optimization_flags: "-O3".to_string(),
        }
    }
}

/// Sequential host code generation backend
#[derive(Debug, Clone, Default)]
pub struct SingleThreadedCpuBackend {
    preferences: CpuPreferences,
}

impl SingleThreadedCpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_preferences(preferences: CpuPreferences) -> Self {
        debug!("CPU backend: {} {}", preferences.compiler, preferences.optimization_flags);
        Self { preferences }
    }

    pub fn preferences(&self) -> &CpuPreferences {
        &self.preferences
    }

    fn is_procedural_rng_required(model: &FinalizedModel) -> bool {
        model
            .synapse_groups()
            .iter()
            .any(|sg| sg.is_procedural_connectivity_rng_required())
    }

    /// Loop over the spikes of one kind a connection's source emitted
    fn gen_spike_loop(
        &self,
        os: &mut CodeStream,
        model: &FinalizedModel,
        sg: &SynapseGroup,
        kernel_subs: &Substitutions<'_>,
        handlers: &SynapseUpdateHandlers<'_>,
        true_spike: bool,
    ) -> Result<()> {
        let src = model.src_neuron_group(sg);
        let sfx = SpikeKind::from_true_spike(true_spike).suffix();
        let (slot, queue_offset) = if src.is_delay_required() {
            ("preReadDelaySlot", "preReadDelayOffset + ")
        } else {
            ("0", "")
        };

        write!(
            os,
            "for (unsigned int i = 0; i < glbSpkCnt{}{}[{}]; i++)",
            sfx,
            src.name(),
            slot
        )?;
        os.scope(|os| {
            writeln!(
                os,
                "const unsigned int ipre = glbSpk{}{}[{}i];",
                sfx,
                src.name(),
                queue_offset
            )?;
            if !sg.wu_model().sim_support_code.is_empty() {
                writeln!(os, "using namespace {}_weightupdate_simCode;", sg.name())?;
            }

            let mut pre_subs = kernel_subs.child();
            pre_subs.add_var_substitution("id_pre", "ipre")?;

            let retest = !true_spike && sg.is_event_threshold_retest_required();
            if retest {
                write!(os, "if (")?;
                (handlers.wum_thresh)(os, sg, &pre_subs)?;
                write!(os, ")")?;
                os.open_brace(RETEST_BRACE)?;
            }

            self.gen_row(os, model, sg, &pre_subs, handlers, true_spike)?;

            if retest {
                os.close_brace(RETEST_BRACE)?;
            }
            Ok(())
        })
    }

    /// Visit every synapse in the row of `$(id_pre)`
    fn gen_row(
        &self,
        os: &mut CodeStream,
        model: &FinalizedModel,
        sg: &SynapseGroup,
        pre_subs: &Substitutions<'_>,
        handlers: &SynapseUpdateHandlers<'_>,
        true_spike: bool,
    ) -> Result<()> {
        let name = sg.name();
        let trg_num_neurons = sg.trg_num_neurons();
        let update = handlers.update_handler(true_spike);

        match sg.connectivity() {
            SynapseMatrixConnectivity::Sparse => {
                writeln!(os, "const unsigned int npost = rowLength{}[ipre];", name)?;
                write!(os, "for (unsigned int j = 0; j < npost; j++)")?;
                os.scope(|os| {
                    writeln!(
                        os,
                        "const unsigned int synAddress = (ipre * {}) + j;",
                        sg.max_connections()
                    )?;
                    writeln!(os, "const unsigned int ipost = ind{}[synAddress];", name)?;
                    let syn_subs = Self::synapse_subs(sg, pre_subs, "ipost")?;
                    update(os, sg, &syn_subs)
                })
            }
            SynapseMatrixConnectivity::Dense => {
                write!(os, "for (unsigned int ipost = 0; ipost < {}; ipost++)", trg_num_neurons)?;
                os.scope(|os| {
                    writeln!(
                        os,
                        "const unsigned int synAddress = (ipre * {}) + ipost;",
                        trg_num_neurons
                    )?;
                    let syn_subs = Self::synapse_subs(sg, pre_subs, "ipost")?;
                    update(os, sg, &syn_subs)
                })
            }
            SynapseMatrixConnectivity::Bitmask => {
                write!(os, "for (unsigned int ipost = 0; ipost < {}; ipost++)", trg_num_neurons)?;
                os.scope(|os| {
                    writeln!(
                        os,
                        "const uint64_t synAddress = ((uint64_t)ipre * {}ull) + ipost;",
                        trg_num_neurons
                    )?;
                    write!(os, "if (B(gp{}[synAddress / 32], synAddress & 31))", name)?;
                    os.scope(|os| {
                        let syn_subs = Self::synapse_subs(sg, pre_subs, "ipost")?;
                        update(os, sg, &syn_subs)
                    })
                })
            }
            SynapseMatrixConnectivity::Procedural => {
                self.gen_procedural_row(os, model, sg, pre_subs, handlers, true_spike)
            }
        }
    }

    /// Regenerate a procedural row, running the weight update for each synapse it adds
    fn gen_procedural_row(
        &self,
        os: &mut CodeStream,
        model: &FinalizedModel,
        sg: &SynapseGroup,
        pre_subs: &Substitutions<'_>,
        handlers: &SynapseUpdateHandlers<'_>,
        true_spike: bool,
    ) -> Result<()> {
        let mut row_subs = pre_subs.child();
        if sg.is_procedural_connectivity_rng_required() {
            // Seeded per row so every regeneration yields the same synapses
            writeln!(
                os,
                "std::seed_seq connectSeed{{proceduralRNGSeed, (unsigned long long)({} + ipre)}};",
                self.procedural_connectivity_sequence(sg, model)
            )?;
            writeln!(os, "std::mt19937 connectRNG(connectSeed);")?;
            row_subs.add_var_substitution("rng", "connectRNG")?;
        }
        writeln!(os, "unsigned int synAddress = ipre * {};", sg.max_connections())?;

        let mut syn_subs = Self::synapse_subs(sg, &row_subs, "$(0)")?;
        syn_subs.set_template_arity(1);
        let mut body = CodeStream::new();
        (handlers.update_handler(true_spike))(&mut body, sg, &syn_subs)?;
        writeln!(body, "synAddress++;")?;
        let add_synapse = body.into_string()?;

        let mut conn_subs = row_subs.child();
        conn_subs.add_func_substitution("addSynapse", 1, add_synapse)?;
        conn_subs.add_var_substitution("id_post_begin", "0")?;
        conn_subs.add_var_substitution("num_post", sg.trg_num_neurons().to_string())?;
        (handlers.wum_procedural_connect)(os, sg, &conn_subs)
    }

    /// Bindings for one synapse targeting `id_post`
    ///
    /// Accumulation templates index through `$(id_post)` rather than the
    /// target text itself, so a positional target survives template expansion.
    fn synapse_subs<'p>(
        sg: &SynapseGroup,
        parent: &'p Substitutions<'p>,
        id_post: &str,
    ) -> Result<Substitutions<'p>> {
        let mut subs = Substitutions::with_parent(parent);
        subs.add_var_substitution("id_post", id_post)?;
        subs.add_var_substitution("id_syn", "synAddress")?;

        if sg.is_dendritic_delay_required() {
            subs.add_func_substitution(
                "addToInSynDelay",
                2,
                format!(
                    "denDelay{}[{}$(id_post)] += $(0)",
                    sg.ps_target_name(),
                    sg.dendritic_delay_offset("", "$(1)")
                ),
            )?;
        } else {
            subs.add_func_substitution(
                "addToInSyn",
                1,
                format!("inSyn{}[$(id_post)] += $(0)", sg.ps_target_name()),
            )?;
        }
        Ok(subs)
    }
}

impl Backend for SingleThreadedCpuBackend {
    fn name(&self) -> &'static str {
        "SingleThreadedCPU"
    }

    fn backend_type(&self) -> BackendType {
        BackendType::SingleThreadedCpu
    }

    fn gen_neuron_update(
        &self,
        os: &mut CodeStream,
        model: &FinalizedModel,
        handler: NeuronGroupHandler<'_>,
    ) -> Result<()> {
        writeln!(os, "void updateNeurons(scalar t)")?;
        os.scope(|os| {
            for sg in model.synapse_groups().iter().filter(|sg| sg.is_dendritic_delay_required()) {
                writeln!(
                    os,
                    "denDelayPtr{0} = (denDelayPtr{0} + 1) % {1};",
                    sg.ps_target_name(),
                    sg.max_dendritic_delay_timesteps()
                )?;
            }

            let mut kernel_subs = Substitutions::new();
            kernel_subs.add_var_substitution("t", "t")?;
            kernel_subs.add_var_substitution("rng", "hostRNG")?;
            add_host_rng_functions(&mut kernel_subs)?;

            for ng in model.neuron_groups() {
                let name = ng.name();
                writeln!(os, "// neuron group {}", name)?;
                os.scope(|os| {
                    if ng.is_delay_required() {
                        writeln!(
                            os,
                            "spkQuePtr{0} = (spkQuePtr{0} + 1) % {1};",
                            name,
                            ng.num_delay_slots()
                        )?;
                    }
                    let slot = spike_count_slot(ng, "");
                    if ng.is_spike_event_required() {
                        writeln!(os, "glbSpkCntEvnt{}[{}] = 0;", name, slot)?;
                    }
                    writeln!(os, "glbSpkCnt{}[{}] = 0;", name, slot)?;
                    gen_neuron_delay_offsets(os, ng, "")?;

                    write!(os, "for (unsigned int i = 0; i < {}; i++)", ng.num_neurons())?;
                    os.scope(|os| {
                        let mut pop_subs = kernel_subs.child();
                        pop_subs.add_var_substitution("id", "i")?;
                        handler(os, ng, &pop_subs)
                    })
                })?;
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
        writeln!(os, "void updateSynapses(scalar t)")?;
        os.scope(|os| {
            let mut kernel_subs = Substitutions::new();
            kernel_subs.add_var_substitution("t", "t")?;
            kernel_subs.add_var_substitution("rng", "hostRNG")?;
            add_host_rng_functions(&mut kernel_subs)?;

            for sg in presynaptic_update_groups(model) {
                debug!(
                    "Synapse population '{}': sequential {} rows",
                    sg.name(),
                    sg.connectivity()
                );
                writeln!(os, "// synapse group {}", sg.name())?;
                os.scope(|os| {
                    gen_pre_read_delay(os, sg, model.src_neuron_group(sg), "")?;
                    if sg.is_spike_event_required() {
                        self.gen_spike_loop(os, model, sg, &kernel_subs, handlers, false)?;
                    }
                    if sg.is_true_spike_required() {
                        self.gen_spike_loop(os, model, sg, &kernel_subs, handlers, true)?;
                    }
                    Ok(())
                })?;
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
        writeln!(os, "void initialize()")?;
        os.scope(|os| {
            if model.seed() == 0 {
                writeln!(os, "std::random_device seedSource;")?;
                writeln!(os, "hostRNG.seed(seedSource());")?;
                if Self::is_procedural_rng_required(model) {
                    writeln!(os, "proceduralRNGSeed = seedSource();")?;
                }
            } else {
                writeln!(os, "hostRNG.seed({});", model.seed())?;
                if Self::is_procedural_rng_required(model) {
                    writeln!(os, "proceduralRNGSeed = {}ull;", model.seed())?;
                }
            }
            writeln!(os)?;

            let mut host_subs = Substitutions::new();
            host_subs.add_var_substitution("rng", "hostRNG")?;
            add_host_rng_functions(&mut host_subs)?;

            for ng in model.neuron_groups() {
                let name = ng.name();
                let slots = ng.num_delay_slots();
                writeln!(os, "// neuron group {}", name)?;
                os.scope(|os| {
                    write!(os, "for (unsigned int i = 0; i < {}; i++)", slots)?;
                    os.scope(|os| {
                        writeln!(os, "glbSpkCnt{}[i] = 0;", name)?;
                        if ng.is_spike_event_required() {
                            writeln!(os, "glbSpkCntEvnt{}[i] = 0;", name)?;
                        }
                        Ok(())
                    })?;
                    write!(os, "for (unsigned int i = 0; i < {}; i++)", slots * ng.num_neurons())?;
                    os.scope(|os| {
                        writeln!(os, "glbSpk{}[i] = 0;", name)?;
                        if ng.is_spike_event_required() {
                            writeln!(os, "glbSpkEvnt{}[i] = 0;", name)?;
                        }
                        if ng.is_spike_time_required() {
                            writeln!(os, "sT{}[i] = -TIME_MAX;", name)?;
                        }
                        Ok(())
                    })?;
                    ng_handler(os, ng, &host_subs, InitLocation::Host)
                })?;
            }

            for sg in model.synapse_groups() {
                writeln!(os, "// synapse group {}", sg.name())?;
                os.scope(|os| sg_handler(os, sg, &host_subs, InitLocation::Host))?;
            }
            Ok(())
        })
    }

    fn gen_definitions_preamble(&self, os: &mut CodeStream) -> Result<()> {
        writeln!(os, "#define SUPPORT_CODE_FUNC inline")?;
        Ok(())
    }

    fn gen_runner_preamble(&self, os: &mut CodeStream, model: &FinalizedModel) -> Result<()> {
        if Self::is_procedural_rng_required(model) {
            writeln!(os, "unsigned long long proceduralRNGSeed;")?;
        }
        Ok(())
    }

    fn gen_variable_definition(
        &self,
        os: &mut CodeStream,
        ty: &str,
        name: &str,
        _location: VarLocation,
    ) -> Result<()> {
        writeln!(os, "EXPORT_VAR {}* {};", ty, name)?;
        Ok(())
    }

    fn gen_variable_implementation(
        &self,
        os: &mut CodeStream,
        ty: &str,
        name: &str,
        _location: VarLocation,
    ) -> Result<()> {
        writeln!(os, "{}* {};", ty, name)?;
        Ok(())
    }

    fn gen_variable_allocation(
        &self,
        os: &mut CodeStream,
        ty: &str,
        name: &str,
        _location: VarLocation,
        count: usize,
    ) -> Result<()> {
        writeln!(os, "{} = new {}[{}];", name, ty, count)?;
        Ok(())
    }

    fn gen_variable_free(&self, os: &mut CodeStream, name: &str, _location: VarLocation) -> Result<()> {
        writeln!(os, "delete[] {};", name)?;
        Ok(())
    }

    fn gen_variable_push(
        &self,
        _os: &mut CodeStream,
        _ty: &str,
        _name: &str,
        _location: VarLocation,
        _count: usize,
    ) -> Result<()> {
        Ok(())
    }

    fn gen_variable_pull(
        &self,
        _os: &mut CodeStream,
        _ty: &str,
        _name: &str,
        _location: VarLocation,
        _count: usize,
    ) -> Result<()> {
        Ok(())
    }

    /// Host memory is the only memory, so every variable is initialised by a loop here
    fn gen_variable_init(
        &self,
        os: &mut CodeStream,
        _mode: VarMode,
        site: InitLocation,
        count: usize,
        kernel_subs: &Substitutions<'_>,
        handler: VarInitHandler<'_>,
    ) -> Result<()> {
        if site == InitLocation::Device {
            return Ok(());
        }
        write!(os, "for (unsigned int i = 0; i < {}; i++)", count)?;
        os.scope(|os| {
            let mut var_subs = kernel_subs.child();
            var_subs.add_var_substitution("id", "i")?;
            handler(os, &var_subs)
        })
    }

    fn gen_ring_pointer_definition(&self, os: &mut CodeStream, name: &str) -> Result<()> {
        writeln!(os, "EXPORT_VAR unsigned int {};", name)?;
        Ok(())
    }

    fn gen_ring_pointer_implementation(&self, os: &mut CodeStream, name: &str) -> Result<()> {
        writeln!(os, "unsigned int {} = 0;", name)?;
        Ok(())
    }

    fn gen_emit_spike(
        &self,
        os: &mut CodeStream,
        ng: &NeuronGroup,
        subs: &Substitutions<'_>,
        kind: SpikeKind,
    ) -> Result<()> {
        let sfx = kind.suffix();
        let name = ng.name();
        let queue_offset = ng.queue_offset("");
        let id = subs.var("id")?;
        writeln!(
            os,
            "glbSpk{0}{1}[{2}glbSpkCnt{0}{1}[{3}]++] = {4};",
            sfx,
            name,
            queue_offset,
            spike_count_slot(ng, ""),
            id
        )?;
        if kind == SpikeKind::True && ng.is_spike_time_required() {
            writeln!(os, "sT{}[{}{}] = {};", name, queue_offset, id, subs.var("t")?)?;
        }
        Ok(())
    }

    fn add_rng_functions(&self, subs: &mut Substitutions<'_>, _precision: Precision) -> Result<()> {
        add_host_rng_functions(subs)
    }

    fn population_rng_type(&self) -> Option<&'static str> {
        None
    }

    fn gen_makefile_preamble(&self, os: &mut CodeStream) -> Result<()> {
        writeln!(os, "CXX := {}", self.compiler_command())?;
        writeln!(
            os,
            "CXXFLAGS := -std=c++11 {} -fPIC",
            self.preferences.optimization_flags
        )?;
        writeln!(os, "LINKFLAGS := -shared")?;
        Ok(())
    }

    fn gen_makefile_link_rule(&self, os: &mut CodeStream) -> Result<()> {
        writeln!(os, "\t@$(CXX) $(LINKFLAGS) -o $@ $(OBJECTS)")?;
        Ok(())
    }

    fn gen_makefile_compile_rule(&self, os: &mut CodeStream) -> Result<()> {
        writeln!(os, "%.o: %.cc")?;
        writeln!(os, "\t@$(CXX) $(CXXFLAGS) -c -o $@ $<")?;
        Ok(())
    }

    fn kernel_block_size(&self, _kernel: Kernel) -> usize {
        1
    }

    fn capability_tier(&self) -> u32 {
        0
    }

    fn float_atomic_add(&self, _precision: Precision, address: &str, value: &str) -> String {
        format!("*{} += {}", address, value)
    }

    fn var_prefix(&self) -> &'static str {
        ""
    }

    fn source_extension(&self) -> &'static str {
        "cc"
    }

    fn compiler_command(&self) -> String {
        self.preferences.compiler.clone()
    }

    /// One seed sequence entry per source neuron of each earlier procedural connection
    fn procedural_connectivity_sequence(&self, sg: &SynapseGroup, model: &FinalizedModel) -> u64 {
        model
            .synapse_groups()
            .iter()
            .take_while(|other| other.name() != sg.name())
            .filter(|other| other.is_procedural_connectivity_rng_required())
            .map(|other| other.src_num_neurons() as u64)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let backend = SingleThreadedCpuBackend::new();
        assert_eq!(backend.var_prefix(), "");
        assert_eq!(backend.source_extension(), "cc");
        assert_eq!(backend.backend_type(), BackendType::SingleThreadedCpu);
        assert!(backend.population_rng_type().is_none());
    }

    #[test]
    fn test_accumulation_is_plain_addition() {
        let backend = SingleThreadedCpuBackend::new();
        assert_eq!(
            backend.float_atomic_add(Precision::Double, "&inSynSyn[ipost]", "w"),
            "*&inSynSyn[ipost] += w"
        );
    }

    #[test]
    fn test_variable_init_loops_on_host() {
        let backend = SingleThreadedCpuBackend::new();
        let subs = Substitutions::new();
        let mut os = CodeStream::new();
        backend
            .gen_variable_init(
                &mut os,
                VarMode::HOST_DEVICE_INIT_DEVICE,
                InitLocation::Host,
                8,
                &subs,
                &|os, subs| {
                    writeln!(os, "VExc[{}] = 0.0f;", subs.var("id")?)?;
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(
            os.into_string().unwrap(),
            "for (unsigned int i = 0; i < 8; i++) {\n    VExc[i] = 0.0f;\n}\n"
        );
    }

    #[test]
    fn test_storage_is_plain_heap_arrays() {
        let backend = SingleThreadedCpuBackend::new();
        let mut os = CodeStream::new();
        backend
            .gen_variable_allocation(&mut os, "scalar", "gSyn", VarLocation::DEVICE, 100)
            .unwrap();
        backend.gen_variable_free(&mut os, "gSyn", VarLocation::DEVICE).unwrap();
        assert_eq!(os.as_str(), "gSyn = new scalar[100];\ndelete[] gSyn;\n");
    }

    #[test]
    fn test_makefile_uses_configured_compiler() {
        let backend = SingleThreadedCpuBackend::with_preferences(CpuPreferences {
            compiler: "clang++".to_string(),
            optimization_flags: "-O2 -march=native".to_string(),
        });
        let mut os = CodeStream::new();
        backend.gen_makefile_preamble(&mut os).unwrap();

        assert_eq!(backend.compiler_command(), "clang++");
        assert_eq!(
            os.as_str(),
            "CXX := clang++\nCXXFLAGS := -std=c++11 -O2 -march=native -fPIC\nLINKFLAGS := -shared\n"
        );
    }
}
