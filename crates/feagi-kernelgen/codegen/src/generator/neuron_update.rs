// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Neuron update body
//!
//! Runs once per neuron per step: state is copied into registers, incoming
//! postsynaptic input is applied, the sim code runs, spike-like events and
//! true spikes are detected, and the registers are written back.

use std::collections::BTreeSet;
use std::fmt::Write;

use feagi_kernelgen_model::utils::references_placeholder;
use feagi_kernelgen_model::{FinalizedModel, NeuronGroup, SynapseGroup};
use tracing::{debug, warn};

use crate::backend::{Backend, SpikeKind};
use crate::code_stream::CodeStream;
use crate::error::Result;
use crate::substitutions::Substitutions;

use super::{gen_unit_preamble, is_var_queued};

const EVENT_CONDITION_BRACE: u32 = 31;

/// Write the neuron update translation unit
pub fn generate_neuron_update(
    os: &mut CodeStream,
    model: &FinalizedModel,
    backend: &dyn Backend,
) -> Result<()> {
    gen_unit_preamble(os, model)?;
    backend.gen_neuron_update(os, model, &|os, ng, pop_subs| {
        gen_neuron_body(os, model, backend, ng, pop_subs)
    })
}

fn gen_neuron_body(
    os: &mut CodeStream,
    model: &FinalizedModel,
    backend: &dyn Backend,
    ng: &NeuronGroup,
    pop_subs: &Substitutions<'_>,
) -> Result<()> {
    let nm = ng.model();
    let name = ng.name();
    let prefix = backend.var_prefix();
    let precision = model.precision();
    let id = pop_subs.var("id")?.to_string();
    let in_syn: Vec<&SynapseGroup> = model.in_syn(ng).collect();
    debug!(
        "Neuron population '{}': {} incoming connections",
        name,
        in_syn.len()
    );

    for var in &nm.vars {
        let offset = if is_var_queued(ng, &var.name)? {
            "readDelayOffset + "
        } else {
            ""
        };
        writeln!(
            os,
            "{} l{} = {}{}{}[{}{}];",
            var.ty, var.name, prefix, var.name, name, offset, id
        )?;
    }
    if ng.is_spike_time_required() {
        let offset = if ng.is_delay_required() {
            "readDelayOffset + "
        } else {
            ""
        };
        writeln!(os, "const scalar lsT = {}sT{}[{}{}];", prefix, name, offset, id)?;
    }
    writeln!(os)?;

    let mut neuron_subs = pop_subs.child();
    neuron_subs.add_var_name_substitution(nm.vars.iter().map(|v| v.name.as_str()), "", "l", "")?;
    neuron_subs.add_param_value_substitution(ng.named_params(), precision)?;
    neuron_subs.add_var_name_substitution(
        nm.extra_global_params.iter().map(|e| e.name.as_str()),
        "",
        "",
        name,
    )?;
    if ng.is_spike_time_required() {
        neuron_subs.add_var_substitution("sT", "lsT")?;
    }

    let isyn_used = [&nm.sim_code, &nm.threshold_condition_code, &nm.reset_code]
        .iter()
        .any(|code| references_placeholder(code, "Isyn"));
    if !in_syn.is_empty() || isyn_used {
        writeln!(os, "scalar Isyn = 0;")?;
        neuron_subs.add_var_substitution("Isyn", "Isyn")?;
    }

    for sg in &in_syn {
        let target = sg.ps_target_name();
        let psm = sg.ps_model();

        writeln!(os, "// pull inSyn values in a coalesced access")?;
        writeln!(os, "scalar linSyn{0} = {1}inSyn{0}[{2}];", target, prefix, id)?;

        if sg.is_dendritic_delay_required() {
            writeln!(
                os,
                "scalar &denDelayFront{0} = {1}denDelay{0}[{2}{3}];",
                target,
                prefix,
                sg.dendritic_delay_offset(prefix, ""),
                id
            )?;
            writeln!(os, "linSyn{0} += denDelayFront{0};", target)?;
            writeln!(os, "denDelayFront{} = {};", target, model.scalar_expr(0.0))?;
        }

        for var in &psm.vars {
            writeln!(
                os,
                "{} lps{}{} = {}{}{}[{}];",
                var.ty, var.name, target, prefix, var.name, target, id
            )?;
        }

        let subs = postsynaptic_subs(&neuron_subs, model, sg)?;
        let code = subs.apply_check_unreplaced(
            &psm.apply_input_code,
            &format!("applyInputCode : {}", sg.name()),
        )?;
        if !code.is_empty() {
            writeln!(os, "{}", code)?;
        }
    }

    if !nm.support_code.is_empty() {
        writeln!(os, "using namespace {}_neuron;", name)?;
    }

    // Threshold is evaluated on the updated state
    let threshold = if nm.threshold_condition_code.is_empty() {
        warn!(
            "No threshold condition for neuron population '{}'; it will never spike",
            name
        );
        None
    } else {
        Some(neuron_subs.apply_check_unreplaced(
            &nm.threshold_condition_code,
            &format!("thresholdConditionCode : {}", name),
        )?)
    };

    writeln!(os, "// calculate membrane potential")?;
    let sim = neuron_subs.apply_check_unreplaced(&nm.sim_code, &format!("simCode : {}", name))?;
    writeln!(os, "{}", sim)?;

    let conditions = spike_event_conditions(model, ng, &neuron_subs)?;
    if !conditions.is_empty() {
        writeln!(os, "bool spikeLikeEvent = false;")?;
        for (code, namespace) in &conditions {
            os.open_brace(EVENT_CONDITION_BRACE)?;
            if !namespace.is_empty() {
                writeln!(os, "using namespace {};", namespace)?;
            }
            writeln!(os, "spikeLikeEvent |= ({});", code)?;
            os.close_brace(EVENT_CONDITION_BRACE)?;
        }

        writeln!(os, "// register a spike-like event")?;
        write!(os, "if (spikeLikeEvent)")?;
        os.scope(|os| backend.gen_emit_spike(os, ng, pop_subs, SpikeKind::Event))?;
    }

    if let Some(threshold) = threshold {
        writeln!(os, "// test for and register a true spike")?;
        write!(os, "if ({})", threshold)?;
        os.scope(|os| {
            backend.gen_emit_spike(os, ng, pop_subs, SpikeKind::True)?;
            if !nm.reset_code.is_empty() {
                let reset = neuron_subs
                    .apply_check_unreplaced(&nm.reset_code, &format!("resetCode : {}", name))?;
                writeln!(os, "// spike reset code")?;
                writeln!(os, "{}", reset)?;
            }
            Ok(())
        })?;
    }

    for var in &nm.vars {
        let offset = if is_var_queued(ng, &var.name)? {
            "writeDelayOffset + "
        } else {
            ""
        };
        writeln!(
            os,
            "{}{}{}[{}{}] = l{};",
            prefix, var.name, name, offset, id, var.name
        )?;
    }

    for sg in &in_syn {
        let target = sg.ps_target_name();
        let psm = sg.ps_model();

        let subs = postsynaptic_subs(&neuron_subs, model, sg)?;
        let decay =
            subs.apply_check_unreplaced(&psm.decay_code, &format!("decayCode : {}", sg.name()))?;
        writeln!(os, "// the post-synaptic dynamics")?;
        if !decay.is_empty() {
            writeln!(os, "{}", decay)?;
        }
        writeln!(os, "{}inSyn{}[{}] = linSyn{};", prefix, target, id, target)?;
        for var in &psm.vars {
            writeln!(
                os,
                "{}{}{}[{}] = lps{}{};",
                prefix, var.name, target, id, var.name, target
            )?;
        }
    }
    Ok(())
}

/// Bindings for postsynaptic code of `sg`, layered over the neuron's
fn postsynaptic_subs<'a>(
    neuron_subs: &'a Substitutions<'_>,
    model: &FinalizedModel,
    sg: &SynapseGroup,
) -> Result<Substitutions<'a>> {
    let target = sg.ps_target_name();
    let mut subs = neuron_subs.child();
    subs.add_var_substitution("inSyn", format!("linSyn{}", target))?;
    subs.add_param_value_substitution(sg.ps_named_params(), model.precision())?;
    subs.add_var_name_substitution(
        sg.ps_model().vars.iter().map(|v| v.name.as_str()),
        "",
        "lps",
        target,
    )?;
    Ok(subs)
}

/// Event conditions of every outgoing connection, substituted and deduplicated
///
/// Connections sharing both the substituted condition and the support code
/// namespace are tested once.
fn spike_event_conditions(
    model: &FinalizedModel,
    ng: &NeuronGroup,
    neuron_subs: &Substitutions<'_>,
) -> Result<BTreeSet<(String, String)>> {
    let mut conditions = BTreeSet::new();
    for sg in model.spike_event_sources(ng) {
        let wu = sg.wu_model();
        let mut subs = neuron_subs.child();
        subs.add_param_value_substitution(sg.wu_named_params(), model.precision())?;
        subs.add_var_name_substitution(
            ng.model().vars.iter().map(|v| v.name.as_str()),
            "_pre",
            "l",
            "",
        )?;
        subs.add_var_name_substitution(
            wu.extra_global_params.iter().map(|e| e.name.as_str()),
            "",
            "",
            sg.name(),
        )?;
        subs.add_var_substitution("id_pre", neuron_subs.var("id")?)?;
        if ng.is_spike_time_required() {
            subs.add_var_substitution("sT_pre", "lsT")?;
        }

        let code = subs.apply_check_unreplaced(
            &wu.event_threshold_condition_code,
            &format!("eventThresholdConditionCode : {}", sg.name()),
        )?;
        let namespace = if wu.sim_support_code.is_empty() {
            String::new()
        } else {
            format!("{}_weightupdate_simCode", sg.name())
        };
        conditions.insert((code, namespace));
    }
    Ok(conditions)
}
