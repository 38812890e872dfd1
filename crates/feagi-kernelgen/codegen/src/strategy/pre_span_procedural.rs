// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Presynaptic span over procedural connectivity
//!
//! Rows are never stored. The weight update code is first rendered into an
//! `addSynapse` template with the target id left as `$(0)`, then the row build
//! code is rendered with `$(addSynapse, ...)` calls expanding that template.

use std::fmt::Write;

use feagi_kernelgen_model::utils::ceil_divide;

use crate::code_stream::CodeStream;
use crate::error::Result;
use crate::substitutions::Substitutions;

use super::{partition_targets, StrategyContext};

const RETEST_BRACE: u32 = 130;

pub(super) fn gen_code(
    os: &mut CodeStream,
    pop_subs: &Substitutions<'_>,
    ctx: &StrategyContext<'_>,
) -> Result<()> {
    let sg = ctx.sg;
    let src = ctx.model.src_neuron_group(sg);
    let prefix = ctx.prefix();
    let suffix = ctx.event_suffix();
    let id = pop_subs.var("id")?;
    let threads_per_spike = sg.num_threads_per_spike();
    let num_trg_neurons = sg.trg_num_neurons();

    if threads_per_spike > 1 {
        writeln!(os, "const unsigned int spike = {} / {};", id, threads_per_spike)?;
        writeln!(os, "const unsigned int thread = {} % {};", id, threads_per_spike)?;
    } else {
        writeln!(os, "const unsigned int spike = {};", id)?;
    }

    write!(os, "if (spike < {})", ctx.spike_count())?;
    os.scope(|os| {
        let queue_offset = if src.is_delay_required() {
            "preReadDelayOffset + "
        } else {
            ""
        };
        writeln!(
            os,
            "const unsigned int preInd = {}glbSpk{}{}[{}spike];",
            prefix,
            suffix,
            src.name(),
            queue_offset
        )?;

        let mut proc_subs = pop_subs.child();
        proc_subs.add_var_substitution("id_pre", "preInd")?;

        // Copy the connectivity RNG and skip to the sequence owned by this row segment.
        // Keyed on the source neuron, so a row regenerates identically whichever
        // slot of the spike queue it arrives in.
        if sg.is_procedural_connectivity_rng_required() {
            let row_sequence = if threads_per_spike > 1 {
                format!("preInd * {} + thread", threads_per_spike)
            } else {
                "preInd".to_string()
            };
            writeln!(os, "curandStatePhilox4_32_10_t connectRNG = {}rng[0];", prefix)?;
            writeln!(
                os,
                "skipahead_sequence((unsigned long long)({} + {}), &connectRNG);",
                ctx.backend.procedural_connectivity_sequence(sg, ctx.model),
                row_sequence
            )?;
            proc_subs.add_var_substitution("rng", "&connectRNG")?;
        }

        if let Some(namespace) = ctx.support_code_namespace() {
            writeln!(os, "{}", namespace)?;
        }

        if ctx.retest_event_threshold() {
            write!(os, "if (")?;
            let thresh_subs = proc_subs.child();
            (ctx.handlers.wum_thresh)(os, sg, &thresh_subs)?;
            write!(os, ")")?;
            os.open_brace(RETEST_BRACE)?;
        }

        writeln!(os, "unsigned int synAddress = preInd * {};", sg.max_connections())?;

        // Weight update code becomes the body of addSynapse, target id as its argument
        let mut syn_subs = proc_subs.child();
        syn_subs.add_var_substitution("id_post", "$(0)")?;
        syn_subs.add_var_substitution("id_syn", "synAddress")?;
        syn_subs.set_template_arity(1);
        ctx.add_accumulation_substitution(&mut syn_subs, "$(id_post)")?;

        let mut update = CodeStream::new();
        (ctx.handlers.update_handler(ctx.true_spike))(&mut update, sg, &syn_subs)?;
        writeln!(update, "synAddress++;")?;
        let add_synapse = update.into_string()?;

        let mut conn_subs = proc_subs.child();
        conn_subs.add_func_substitution("addSynapse", 1, add_synapse)?;

        if threads_per_spike > 1 {
            let num_post_per_thread = ceil_divide(num_trg_neurons, threads_per_spike);
            writeln!(
                os,
                "const unsigned int idPostStart = thread * {};",
                num_post_per_thread
            )?;

            let blocks = partition_targets(num_trg_neurons, threads_per_spike);
            if blocks.iter().all(|b| *b == num_post_per_thread) {
                conn_subs.add_var_substitution("num_post", num_post_per_thread.to_string())?;
            } else {
                // Trailing threads take what is left of the row, possibly nothing
                writeln!(
                    os,
                    "const unsigned int numPost = (idPostStart < {0}) ? min({1}u, {0}u - idPostStart) : 0;",
                    num_trg_neurons, num_post_per_thread
                )?;
                conn_subs.add_var_substitution("num_post", "numPost")?;
            }
            conn_subs.add_var_substitution("id_post_begin", "idPostStart")?;
        } else {
            conn_subs.add_var_substitution("id_post_begin", "0")?;
            conn_subs.add_var_substitution("num_post", num_trg_neurons.to_string())?;
        }

        (ctx.handlers.wum_procedural_connect)(os, sg, &conn_subs)?;

        if ctx.retest_event_threshold() {
            os.close_brace(RETEST_BRACE)?;
        }
        Ok(())
    })
}
