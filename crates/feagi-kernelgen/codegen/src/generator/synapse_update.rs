// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Weight update handlers for the synapse update
//!
//! The backend decides which synapse, source and target each invocation
//! addresses (through `$(id_pre)`, `$(id_post)` and `$(id_syn)`) and how
//! input accumulates (`$(addToInSyn)`); these handlers supply the rest.

use std::fmt::Write;

use feagi_kernelgen_model::{FinalizedModel, SynapseGroup, SynapseMatrixConnectivity};

use crate::backend::{Backend, SynapseUpdateHandlers};
use crate::code_stream::CodeStream;
use crate::error::{CodegenError, Result};
use crate::substitutions::Substitutions;

use super::{gen_unit_preamble, is_var_queued};

/// Write the synapse update translation unit
pub fn generate_synapse_update(
    os: &mut CodeStream,
    model: &FinalizedModel,
    backend: &dyn Backend,
) -> Result<()> {
    gen_unit_preamble(os, model)?;

    let handlers = SynapseUpdateHandlers {
        wum_thresh: &|os, sg, subs| gen_event_threshold(os, model, backend, sg, subs),
        wum_sim: &|os, sg, subs| {
            gen_weight_update(os, model, backend, sg, subs, &sg.wu_model().sim_code, "simCode")
        },
        wum_event: &|os, sg, subs| {
            gen_weight_update(os, model, backend, sg, subs, &sg.wu_model().event_code, "eventCode")
        },
        wum_procedural_connect: &|os, sg, subs| gen_procedural_connect(os, model, sg, subs),
    };
    backend.gen_synapse_update(os, model, &handlers)
}

/// Bind weight update parameters, synapse state and neuron state on either side
fn weight_update_subs<'a>(
    model: &FinalizedModel,
    backend: &dyn Backend,
    sg: &SynapseGroup,
    parent: &'a Substitutions<'_>,
) -> Result<Substitutions<'a>> {
    let wu = sg.wu_model();
    let prefix = backend.var_prefix();
    let src = model.src_neuron_group(sg);
    let trg = model.trg_neuron_group(sg);

    let mut subs = parent.child();
    subs.add_param_value_substitution(sg.wu_named_params(), model.precision())?;
    subs.add_var_name_substitution(
        wu.extra_global_params.iter().map(|e| e.name.as_str()),
        "",
        "",
        sg.name(),
    )?;
    subs.add_var_name_substitution(
        wu.vars.iter().map(|v| v.name.as_str()),
        "",
        prefix,
        &format!("{}[$(id_syn)]", sg.name()),
    )?;

    for var in &src.model().vars {
        let offset = if is_var_queued(src, &var.name)? {
            "preReadDelayOffset + "
        } else {
            ""
        };
        subs.add_var_substitution(
            format!("{}_pre", var.name),
            format!("{}{}{}[{}$(id_pre)]", prefix, var.name, src.name(), offset),
        )?;
    }
    if src.is_spike_time_required() {
        let offset = if src.is_delay_required() {
            "preReadDelayOffset + "
        } else {
            ""
        };
        subs.add_var_substitution(
            "sT_pre",
            format!("{}sT{}[{}$(id_pre)]", prefix, src.name(), offset),
        )?;
    }

    for var in &trg.model().vars {
        let offset = if is_var_queued(trg, &var.name)? {
            trg.queue_offset(prefix)
        } else {
            String::new()
        };
        subs.add_var_substitution(
            format!("{}_post", var.name),
            format!("{}{}{}[{}$(id_post)]", prefix, var.name, trg.name(), offset),
        )?;
    }
    Ok(subs)
}

/// Event threshold condition, written as a bare expression
fn gen_event_threshold(
    os: &mut CodeStream,
    model: &FinalizedModel,
    backend: &dyn Backend,
    sg: &SynapseGroup,
    subs: &Substitutions<'_>,
) -> Result<()> {
    let syn_subs = weight_update_subs(model, backend, sg, subs)?;
    let code = syn_subs.apply_check_unreplaced(
        &sg.wu_model().event_threshold_condition_code,
        &format!("eventThresholdConditionCode : {}", sg.name()),
    )?;
    write!(os, "{}", code)?;
    Ok(())
}

fn gen_weight_update(
    os: &mut CodeStream,
    model: &FinalizedModel,
    backend: &dyn Backend,
    sg: &SynapseGroup,
    subs: &Substitutions<'_>,
    code: &str,
    context: &str,
) -> Result<()> {
    let syn_subs = weight_update_subs(model, backend, sg, subs)?;
    let code = syn_subs.apply_check_unreplaced(code, &format!("{} : {}", context, sg.name()))?;
    writeln!(os, "{}", code)?;
    Ok(())
}

/// Row build code of a procedural connection; `$(addSynapse, ...)` is bound by the backend
fn gen_procedural_connect(
    os: &mut CodeStream,
    model: &FinalizedModel,
    sg: &SynapseGroup,
    subs: &Substitutions<'_>,
) -> Result<()> {
    let initialiser = match (sg.connectivity(), sg.connectivity_initialiser()) {
        (SynapseMatrixConnectivity::Procedural, Some(initialiser)) => initialiser,
        _ => {
            return Err(CodegenError::UnsupportedConfiguration(format!(
                "synapse population '{}' has no procedural connectivity initialiser",
                sg.name()
            )))
        }
    };

    let mut conn_subs = subs.child();
    conn_subs.add_param_value_substitution(initialiser.named_values(), model.precision())?;
    let code = conn_subs.apply_check_unreplaced(
        &initialiser.snippet.row_build_code,
        &format!("rowBuildCode : {}", sg.name()),
    )?;
    writeln!(os, "{}", code)?;
    Ok(())
}
