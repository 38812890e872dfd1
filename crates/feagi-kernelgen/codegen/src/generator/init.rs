// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! State initialisation handlers
//!
//! Each handler is called once per initialisation site. The backend's
//! [`Backend::gen_variable_init`] decides whether a variable is initialised
//! at that site, so a variable is written by exactly one of them.

use std::fmt::Write;

use feagi_kernelgen_model::{
    FinalizedModel, InitLocation, NeuronGroup, SynapseGroup, SynapseMatrixConnectivity,
    VarLocation, VarMode,
};

use crate::backend::{synapse_row_stride, Backend};
use crate::code_stream::CodeStream;
use crate::error::Result;
use crate::substitutions::Substitutions;

use super::{is_var_queued, DEFINITIONS_HEADER};

/// Write the initialisation translation unit
pub fn generate_init(os: &mut CodeStream, model: &FinalizedModel, backend: &dyn Backend) -> Result<()> {
    writeln!(os, "#include \"{}\"", DEFINITIONS_HEADER)?;
    writeln!(os)?;

    backend.gen_init(
        os,
        model,
        &|os, ng, subs, site| gen_neuron_init(os, model, backend, ng, subs, site),
        &|os, sg, subs, site| gen_synapse_init(os, model, backend, sg, subs, site),
    )
}

/// Storage prefix of the copy written at `site`
fn storage_prefix(backend: &dyn Backend, site: InitLocation) -> &'static str {
    match site {
        InitLocation::Host => "",
        InitLocation::Device => backend.var_prefix(),
    }
}

/// Buffers without initialisers are zeroed wherever kernels read them
fn zeroed_buffer_mode(location: VarLocation) -> VarMode {
    if location.is_device() {
        VarMode::new(location, InitLocation::Device)
    } else {
        VarMode::new(location, InitLocation::Host)
    }
}

fn gen_neuron_init(
    os: &mut CodeStream,
    model: &FinalizedModel,
    backend: &dyn Backend,
    ng: &NeuronGroup,
    subs: &Substitutions<'_>,
    site: InitLocation,
) -> Result<()> {
    let prefix = storage_prefix(backend, site);
    let name = ng.name();
    let num_neurons = ng.num_neurons();
    let precision = model.precision();

    let vars = ng
        .model()
        .vars
        .iter()
        .zip(ng.var_initialisers())
        .zip(ng.var_modes());
    for ((var, initialiser), mode) in vars {
        if !initialiser.has_code() {
            continue;
        }
        let slots = if is_var_queued(ng, &var.name)? {
            ng.num_delay_slots()
        } else {
            1
        };
        let context = format!("initVarCode : {}.{}", name, var.name);

        backend.gen_variable_init(os, *mode, site, num_neurons, subs, &|os, var_subs| {
            let id = var_subs.var("id")?;
            let mut init_subs = var_subs.child();
            init_subs.add_param_value_substitution(initialiser.named_values(), precision)?;

            if slots > 1 {
                // Every queue slot starts from the same value
                writeln!(os, "{} initVal;", var.ty)?;
                init_subs.add_var_substitution("value", "initVal")?;
                let code = init_subs.apply_check_unreplaced(&initialiser.snippet.code, &context)?;
                writeln!(os, "{}", code)?;
                for slot in 0..slots {
                    writeln!(
                        os,
                        "{}{}{}[{} + {}] = initVal;",
                        prefix,
                        var.name,
                        name,
                        slot * num_neurons,
                        id
                    )?;
                }
            } else {
                init_subs.add_var_substitution(
                    "value",
                    format!("{}{}{}[{}]", prefix, var.name, name, id),
                )?;
                let code = init_subs.apply_check_unreplaced(&initialiser.snippet.code, &context)?;
                writeln!(os, "{}", code)?;
            }
            Ok(())
        })?;
    }

    let zero = model.scalar_expr(0.0);
    for sg in model.in_syn(ng) {
        let target = sg.ps_target_name();
        backend.gen_variable_init(
            os,
            zeroed_buffer_mode(sg.in_syn_location()),
            site,
            num_neurons,
            subs,
            &|os, var_subs| {
                let id = var_subs.var("id")?;
                writeln!(os, "{}inSyn{}[{}] = {};", prefix, target, id, zero)?;
                for var in &sg.ps_model().vars {
                    writeln!(os, "{}{}{}[{}] = 0;", prefix, var.name, target, id)?;
                }
                Ok(())
            },
        )?;

        if sg.is_dendritic_delay_required() {
            backend.gen_variable_init(
                os,
                zeroed_buffer_mode(sg.dendritic_delay_location()),
                site,
                num_neurons,
                subs,
                &|os, var_subs| {
                    let id = var_subs.var("id")?;
                    for slot in 0..sg.max_dendritic_delay_timesteps() {
                        writeln!(
                            os,
                            "{}denDelay{}[{} + {}] = {};",
                            prefix,
                            target,
                            slot * num_neurons,
                            id,
                            zero
                        )?;
                    }
                    Ok(())
                },
            )?;
        }
    }
    Ok(())
}

fn gen_synapse_init(
    os: &mut CodeStream,
    model: &FinalizedModel,
    backend: &dyn Backend,
    sg: &SynapseGroup,
    subs: &Substitutions<'_>,
    site: InitLocation,
) -> Result<()> {
    let prefix = storage_prefix(backend, site);
    let stride = synapse_row_stride(sg);
    let count = sg.src_num_neurons() * stride;
    let dense = matches!(
        sg.connectivity(),
        SynapseMatrixConnectivity::Dense | SynapseMatrixConnectivity::Bitmask
    );

    let vars = sg
        .wu_model()
        .vars
        .iter()
        .zip(sg.wu_var_initialisers())
        .zip(sg.wu_var_modes());
    for ((var, initialiser), mode) in vars {
        if !initialiser.has_code() {
            continue;
        }
        let context = format!("initVarCode : {}.{}", sg.name(), var.name);

        backend.gen_variable_init(os, *mode, site, count, subs, &|os, var_subs| {
            let id = var_subs.var("id")?;
            let mut init_subs = var_subs.child();
            init_subs.add_param_value_substitution(initialiser.named_values(), model.precision())?;
            init_subs.add_var_substitution(
                "value",
                format!("{}{}{}[{}]", prefix, var.name, sg.name(), id),
            )?;
            init_subs.add_var_substitution("id_pre", format!("({} / {})", id, stride))?;
            // Sparse rows hold slots, not targets
            if dense {
                init_subs.add_var_substitution("id_post", format!("({} % {})", id, stride))?;
            }
            let code = init_subs.apply_check_unreplaced(&initialiser.snippet.code, &context)?;
            writeln!(os, "{}", code)?;
            Ok(())
        })?;
    }
    Ok(())
}
