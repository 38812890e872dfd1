// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Presynaptic span: each spike's row is walked by its own thread(s)

use std::fmt::Write;

use crate::code_stream::CodeStream;
use crate::error::Result;
use crate::substitutions::Substitutions;

use super::StrategyContext;

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

    if threads_per_spike > 1 {
        writeln!(os, "const unsigned int spike = {} / {};", id, threads_per_spike)?;
        writeln!(os, "const unsigned int thread = {} % {};", id, threads_per_spike)?;
    } else {
        writeln!(os, "const unsigned int spike = {};", id)?;
    }

    write!(os, "if (spike < {})", ctx.spike_count())?;
    os.scope(|os| {
        if let Some(namespace) = ctx.support_code_namespace() {
            writeln!(os, "{}", namespace)?;
        }

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

        if threads_per_spike > 1 {
            writeln!(
                os,
                "unsigned int synAddress = (preInd * {}) + thread;",
                sg.max_connections()
            )?;
        } else {
            writeln!(os, "unsigned int synAddress = preInd * {};", sg.max_connections())?;
        }
        writeln!(os, "const unsigned int npost = {}rowLength{}[preInd];", prefix, sg.name())?;

        if ctx.retest_event_threshold() {
            write!(os, "if (")?;
            let mut thresh_subs = pop_subs.child();
            thresh_subs.add_var_substitution("id_pre", "preInd")?;
            (ctx.handlers.wum_thresh)(os, sg, &thresh_subs)?;
            write!(os, ")")?;
            os.open_brace(RETEST_BRACE)?;
        }

        if threads_per_spike > 1 {
            write!(
                os,
                "for (unsigned int i = thread; i < npost; i += {0}, synAddress += {0})",
                threads_per_spike
            )?;
        } else {
            write!(os, "for (unsigned int i = 0; i < npost; i++, synAddress++)")?;
        }
        os.scope(|os| {
            writeln!(os, "const unsigned int ipost = {}ind{}[synAddress];", prefix, sg.name())?;

            let mut syn_subs = pop_subs.child();
            syn_subs.add_var_substitution("id_pre", "preInd")?;
            syn_subs.add_var_substitution("id_post", "ipost")?;
            syn_subs.add_var_substitution("id_syn", "synAddress")?;
            ctx.add_accumulation_substitution(&mut syn_subs, "ipost")?;

            (ctx.handlers.update_handler(ctx.true_spike))(os, sg, &syn_subs)
        })?;

        if ctx.retest_event_threshold() {
            os.close_brace(RETEST_BRACE)?;
        }
        Ok(())
    })
}
