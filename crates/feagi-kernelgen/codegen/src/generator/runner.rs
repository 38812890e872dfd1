// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Runner
//!
//! Generates the shared definitions header and the runner translation unit:
//! every buffer the kernels touch, its allocation and release, host/device
//! transfers and the `stepTime()` entry point.
//!
//! ## Buffer naming
//!
//! | Buffer | Element type | Elements |
//! |--------|--------------|----------|
//! | `glbSpkCnt<pop>` | `unsigned int` | delay slots |
//! | `glbSpk<pop>` | `unsigned int` | delay slots x neurons |
//! | `glbSpkCntEvnt<pop>`, `glbSpkEvnt<pop>` | `unsigned int` | as above, spike-like events |
//! | `sT<pop>` | `scalar` | delay slots x neurons |
//! | `<var><pop>` | variable type | neurons (x delay slots when queued) |
//! | `inSyn<syn>` | `scalar` | target neurons |
//! | `denDelay<syn>` | `scalar` | dendritic delay steps x target neurons |
//! | `<var><syn>` | variable type | source neurons x row stride |
//! | `rowLength<syn>`, `ind<syn>` | `unsigned int` | sparse rows |
//! | `gp<syn>` | `uint32_t` | bitmask words |

use std::fmt::Write;

use feagi_kernelgen_model::utils::ceil_divide;
use feagi_kernelgen_model::{FinalizedModel, Precision, SynapseMatrixConnectivity, VarLocation};
use tracing::debug;

use crate::backend::{synapse_row_stride, Backend};
use crate::code_stream::CodeStream;
use crate::error::Result;

use super::{is_var_queued, DEFINITIONS_HEADER};

/// Functions the runner exports, in declaration order
const EXPORTED_FUNCTIONS: [&str; 8] = [
    "void allocateMem()",
    "void freeMem()",
    "void initialize()",
    "void copyStateToDevice()",
    "void copyStateFromDevice()",
    "void updateNeurons(scalar t)",
    "void updateSynapses(scalar t)",
    "void stepTime()",
];

/// An array owned by the runner
#[derive(Debug, Clone)]
struct Buffer {
    ty: String,
    name: String,
    location: VarLocation,
    count: usize,
}

impl Buffer {
    fn new(ty: impl Into<String>, name: String, location: VarLocation, count: usize) -> Self {
        Self {
            ty: ty.into(),
            name,
            location,
            count,
        }
    }
}

/// Storage grouped by owning population, so both files list it in the same order
struct GroupStorage {
    label: String,
    ring_pointer: Option<String>,
    buffers: Vec<Buffer>,
    extra_global_params: Vec<(String, String)>,
}

fn model_storage(model: &FinalizedModel, backend: &dyn Backend) -> Result<Vec<GroupStorage>> {
    let mut groups = Vec::new();

    for ng in model.neuron_groups() {
        let name = ng.name();
        let n = ng.num_neurons();
        let slots = ng.num_delay_slots();
        let mut buffers = vec![
            Buffer::new("unsigned int", format!("glbSpkCnt{}", name), ng.spike_location(), slots),
            Buffer::new("unsigned int", format!("glbSpk{}", name), ng.spike_location(), slots * n),
        ];
        if ng.is_spike_event_required() {
            let location = ng.spike_event_location();
            buffers.push(Buffer::new("unsigned int", format!("glbSpkCntEvnt{}", name), location, slots));
            buffers.push(Buffer::new("unsigned int", format!("glbSpkEvnt{}", name), location, slots * n));
        }
        if ng.is_spike_time_required() {
            buffers.push(Buffer::new("scalar", format!("sT{}", name), ng.spike_time_location(), slots * n));
        }
        if let Some(rng_type) = backend.population_rng_type() {
            if model.is_neuron_sim_rng_required(ng) {
                buffers.push(Buffer::new(rng_type, format!("rng{}", name), VarLocation::DEVICE, n));
            }
        }
        for (var, mode) in ng.model().vars.iter().zip(ng.var_modes()) {
            let count = if is_var_queued(ng, &var.name)? { slots * n } else { n };
            buffers.push(Buffer::new(var.ty.clone(), format!("{}{}", var.name, name), mode.location, count));
        }

        groups.push(GroupStorage {
            label: format!("neuron group {}", name),
            ring_pointer: ng.is_delay_required().then(|| format!("spkQuePtr{}", name)),
            buffers,
            extra_global_params: ng
                .model()
                .extra_global_params
                .iter()
                .map(|e| (e.ty.clone(), format!("{}{}", e.name, name)))
                .collect(),
        });
    }

    for sg in model.synapse_groups() {
        let name = sg.name();
        let target = sg.ps_target_name();
        let num_trg = sg.trg_num_neurons();
        let num_src = sg.src_num_neurons();

        let mut buffers = vec![Buffer::new(
            "scalar",
            format!("inSyn{}", target),
            sg.in_syn_location(),
            num_trg,
        )];
        for var in &sg.ps_model().vars {
            buffers.push(Buffer::new(var.ty.clone(), format!("{}{}", var.name, target), sg.in_syn_location(), num_trg));
        }
        if sg.is_dendritic_delay_required() {
            buffers.push(Buffer::new(
                "scalar",
                format!("denDelay{}", target),
                sg.dendritic_delay_location(),
                sg.max_dendritic_delay_timesteps() * num_trg,
            ));
        }

        match sg.connectivity() {
            SynapseMatrixConnectivity::Sparse => {
                buffers.push(Buffer::new("unsigned int", format!("rowLength{}", name), VarLocation::HOST_DEVICE, num_src));
                buffers.push(Buffer::new(
                    "unsigned int",
                    format!("ind{}", name),
                    VarLocation::HOST_DEVICE,
                    num_src * sg.max_connections(),
                ));
            }
            SynapseMatrixConnectivity::Bitmask => {
                buffers.push(Buffer::new(
                    "uint32_t",
                    format!("gp{}", name),
                    VarLocation::HOST_DEVICE,
                    ceil_divide(num_src * num_trg, 32),
                ));
            }
            SynapseMatrixConnectivity::Dense | SynapseMatrixConnectivity::Procedural => {}
        }

        let count = num_src * synapse_row_stride(sg);
        for (var, mode) in sg.wu_model().vars.iter().zip(sg.wu_var_modes()) {
            buffers.push(Buffer::new(var.ty.clone(), format!("{}{}", var.name, name), mode.location, count));
        }

        groups.push(GroupStorage {
            label: format!("synapse group {}", name),
            ring_pointer: sg
                .is_dendritic_delay_required()
                .then(|| format!("denDelayPtr{}", target)),
            buffers,
            extra_global_params: sg
                .wu_model()
                .extra_global_params
                .iter()
                .map(|e| (e.ty.clone(), format!("{}{}", e.name, name)))
                .collect(),
        });
    }
    Ok(groups)
}

/// Write `definitions.h` to `definitions` and the runner translation unit to `runner`
pub fn generate_runner(
    definitions: &mut CodeStream,
    runner: &mut CodeStream,
    model: &FinalizedModel,
    backend: &dyn Backend,
) -> Result<()> {
    let storage = model_storage(model, backend)?;
    debug!(
        "Runner for model '{}': {} buffers",
        model.name(),
        storage.iter().map(|g| g.buffers.len()).sum::<usize>()
    );

    gen_definitions(definitions, model, backend, &storage)?;
    gen_runner(runner, model, backend, &storage)
}

fn gen_definitions(
    os: &mut CodeStream,
    model: &FinalizedModel,
    backend: &dyn Backend,
    storage: &[GroupStorage],
) -> Result<()> {
    writeln!(os, "#pragma once")?;
    writeln!(os)?;
    writeln!(os, "#define EXPORT_VAR extern")?;
    writeln!(os, "#define EXPORT_FUNC")?;
    writeln!(os)?;
    writeln!(os, "// Standard C++ includes")?;
    writeln!(os, "#include <random>")?;
    writeln!(os)?;
    writeln!(os, "// Standard C includes")?;
    writeln!(os, "#include <cfloat>")?;
    writeln!(os, "#include <cmath>")?;
    writeln!(os, "#include <cstdint>")?;
    writeln!(os, "#include <cstdio>")?;
    writeln!(os, "#include <cstdlib>")?;
    writeln!(os)?;

    backend.gen_definitions_preamble(os)?;
    writeln!(os)?;

    let precision = model.precision();
    writeln!(os, "typedef {} scalar;", precision.scalar_type())?;
    writeln!(os, "#define DT {}", model.scalar_expr(model.dt()))?;
    let time_max = match precision {
        Precision::Float => "FLT_MAX",
        Precision::Double => "DBL_MAX",
    };
    writeln!(os, "#define TIME_MAX {}", time_max)?;
    writeln!(os)?;

    writeln!(os, "// bit tool macros")?;
    writeln!(os, "#define B(x, i) ((x) & (0x80000000 >> (i)))")?;
    writeln!(os, "#define setB(x, i) x = ((x) | (0x80000000 >> (i)))")?;
    writeln!(os, "#define delB(x, i) x = ((x) & (~(0x80000000 >> (i))))")?;
    writeln!(os)?;

    writeln!(os, "// time and host random numbers")?;
    writeln!(os, "EXPORT_VAR unsigned long long iT;")?;
    writeln!(os, "EXPORT_VAR scalar t;")?;
    writeln!(os, "EXPORT_VAR std::mt19937 hostRNG;")?;
    writeln!(os, "EXPORT_VAR std::uniform_real_distribution<scalar> standardUniformDistribution;")?;
    writeln!(os, "EXPORT_VAR std::normal_distribution<scalar> standardNormalDistribution;")?;
    writeln!(os, "EXPORT_VAR std::exponential_distribution<scalar> standardExponentialDistribution;")?;
    writeln!(os)?;

    for group in storage {
        writeln!(os, "// {}", group.label)?;
        if let Some(pointer) = &group.ring_pointer {
            backend.gen_ring_pointer_definition(os, pointer)?;
        }
        for buffer in &group.buffers {
            backend.gen_variable_definition(os, &buffer.ty, &buffer.name, buffer.location)?;
        }
        for (ty, name) in &group.extra_global_params {
            writeln!(os, "EXPORT_VAR {} {};", ty, name)?;
        }
        writeln!(os)?;
    }

    for function in EXPORTED_FUNCTIONS {
        writeln!(os, "EXPORT_FUNC {};", function)?;
    }
    Ok(())
}

fn gen_runner(
    os: &mut CodeStream,
    model: &FinalizedModel,
    backend: &dyn Backend,
    storage: &[GroupStorage],
) -> Result<()> {
    writeln!(os, "#include \"{}\"", DEFINITIONS_HEADER)?;
    writeln!(os)?;

    writeln!(os, "// time and host random numbers")?;
    writeln!(os, "unsigned long long iT = 0;")?;
    writeln!(os, "scalar t = 0;")?;
    writeln!(os, "std::mt19937 hostRNG;")?;
    writeln!(os, "std::uniform_real_distribution<scalar> standardUniformDistribution(0, 1);")?;
    writeln!(os, "std::normal_distribution<scalar> standardNormalDistribution(0, 1);")?;
    writeln!(os, "std::exponential_distribution<scalar> standardExponentialDistribution(1);")?;
    backend.gen_runner_preamble(os, model)?;
    writeln!(os)?;

    for group in storage {
        writeln!(os, "// {}", group.label)?;
        if let Some(pointer) = &group.ring_pointer {
            backend.gen_ring_pointer_implementation(os, pointer)?;
        }
        for buffer in &group.buffers {
            backend.gen_variable_implementation(os, &buffer.ty, &buffer.name, buffer.location)?;
        }
        for (ty, name) in &group.extra_global_params {
            writeln!(os, "{} {};", ty, name)?;
        }
        writeln!(os)?;
    }

    writeln!(os, "void allocateMem()")?;
    os.scope(|os| {
        for buffer in storage.iter().flat_map(|g| &g.buffers) {
            backend.gen_variable_allocation(os, &buffer.ty, &buffer.name, buffer.location, buffer.count)?;
        }
        Ok(())
    })?;
    writeln!(os)?;

    writeln!(os, "void freeMem()")?;
    os.scope(|os| {
        for buffer in storage.iter().flat_map(|g| &g.buffers) {
            backend.gen_variable_free(os, &buffer.name, buffer.location)?;
        }
        Ok(())
    })?;
    writeln!(os)?;

    writeln!(os, "void copyStateToDevice()")?;
    os.scope(|os| {
        for buffer in storage.iter().flat_map(|g| &g.buffers) {
            backend.gen_variable_push(os, &buffer.ty, &buffer.name, buffer.location, buffer.count)?;
        }
        Ok(())
    })?;
    writeln!(os)?;

    writeln!(os, "void copyStateFromDevice()")?;
    os.scope(|os| {
        for buffer in storage.iter().flat_map(|g| &g.buffers) {
            backend.gen_variable_pull(os, &buffer.ty, &buffer.name, buffer.location, buffer.count)?;
        }
        Ok(())
    })?;
    writeln!(os)?;

    writeln!(os, "void stepTime()")?;
    os.scope(|os| {
        writeln!(os, "updateSynapses(t);")?;
        writeln!(os, "updateNeurons(t);")?;
        writeln!(os, "iT++;")?;
        writeln!(os, "t = iT * DT;")?;
        Ok(())
    })
}
