// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Postsynaptic span: each thread owns a target (or row slot) and loops over spikes
//!
//! Spikes are staged through shared memory one block at a time, between two
//! barriers, so every thread of the block sees the same spike list.

use std::fmt::Write;

use feagi_kernelgen_model::SynapseMatrixConnectivity;

use crate::code_stream::CodeStream;
use crate::error::Result;
use crate::kernel::Kernel;
use crate::substitutions::Substitutions;

use super::StrategyContext;

const RETEST_BRACE: u32 = 130;
const BITMASK_BRACE: u32 = 135;
const ROW_LENGTH_BRACE: u32 = 140;

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
    let block_size = ctx.backend.kernel_block_size(Kernel::PresynapticUpdate);
    let sparse = sg.connectivity() == SynapseMatrixConnectivity::Sparse;
    let bitmask = sg.connectivity() == SynapseMatrixConnectivity::Bitmask;

    writeln!(os, "const unsigned int numSpikes = {};", ctx.spike_count())?;
    writeln!(
        os,
        "const unsigned int numSpikeBlocks = (numSpikes + {0} - 1) / {0};",
        block_size
    )?;

    write!(os, "for (unsigned int r = 0; r < numSpikeBlocks; r++)")?;
    os.scope(|os| {
        writeln!(
            os,
            "const unsigned int numSpikesInBlock = (r == numSpikeBlocks - 1) ? ((numSpikes - 1) % {0}) + 1 : {0};",
            block_size
        )?;

        writeln!(os, "__syncthreads();")?;
        write!(os, "if (threadIdx.x < numSpikesInBlock)")?;
        os.scope(|os| {
            let queue_offset = if src.is_delay_required() {
                "preReadDelayOffset + "
            } else {
                ""
            };
            writeln!(
                os,
                "const unsigned int spk = {}glbSpk{}{}[{}(r * {}) + threadIdx.x];",
                prefix,
                suffix,
                src.name(),
                queue_offset,
                block_size
            )?;
            writeln!(os, "shSpk{}[threadIdx.x] = spk;", suffix)?;
            if sparse {
                writeln!(os, "shRowLength[threadIdx.x] = {}rowLength{}[spk];", prefix, sg.name())?;
            }
            Ok(())
        })?;
        writeln!(os, "__syncthreads();")?;

        writeln!(os, "// loop through all incoming spikes")?;
        write!(os, "for (unsigned int j = 0; j < numSpikesInBlock; j++)")?;
        os.scope(|os| {
            writeln!(os, "// only work on existing neurons")?;
            write!(os, "if ({} < {})", id, sg.max_connections())?;
            os.scope(|os| gen_synapse_body(os, pop_subs, ctx, id, sparse, bitmask))
        })
    })
}

fn gen_synapse_body(
    os: &mut CodeStream,
    pop_subs: &Substitutions<'_>,
    ctx: &StrategyContext<'_>,
    id: &str,
    sparse: bool,
    bitmask: bool,
) -> Result<()> {
    let sg = ctx.sg;
    let prefix = ctx.prefix();
    let suffix = ctx.event_suffix();
    let trg_num_neurons = sg.trg_num_neurons();

    if bitmask {
        let max_synapses = (sg.src_num_neurons() as u64) * (trg_num_neurons as u64);
        if max_synapses > u64::from(u32::MAX) {
            writeln!(
                os,
                "const uint64_t gid = (shSpk{}[j] * {}ull + {});",
                suffix, trg_num_neurons, id
            )?;
        } else {
            writeln!(
                os,
                "const unsigned int gid = (shSpk{}[j] * {} + {});",
                suffix, trg_num_neurons, id
            )?;
        }
    }

    if let Some(namespace) = ctx.support_code_namespace() {
        writeln!(os, "{}", namespace)?;
    }

    let bitmask_test = format!("B({}gp{}[gid / 32], gid & 31)", prefix, sg.name());
    if ctx.retest_event_threshold() {
        write!(os, "if (")?;
        if bitmask {
            write!(os, "({}) && ", bitmask_test)?;
        }
        let mut thresh_subs = pop_subs.child();
        thresh_subs.add_var_substitution("id_pre", format!("shSpk{}[j]", suffix))?;
        (ctx.handlers.wum_thresh)(os, sg, &thresh_subs)?;
        write!(os, ")")?;
        os.open_brace(RETEST_BRACE)?;
    } else if bitmask {
        write!(os, "if ({})", bitmask_test)?;
        os.open_brace(BITMASK_BRACE)?;
    }

    let mut syn_subs = pop_subs.child();
    syn_subs.add_var_substitution("id_pre", format!("shSpk{}[j]", suffix))?;
    let id_post = if sparse {
        writeln!(os, "unsigned int synAddress = shSpk{}[j] * {};", suffix, sg.max_connections())?;
        writeln!(os, "const unsigned int npost = shRowLength[j];")?;

        write!(os, "if ({} < npost)", id)?;
        os.open_brace(ROW_LENGTH_BRACE)?;
        writeln!(os, "synAddress += {};", id)?;
        writeln!(os, "const unsigned int ipost = {}ind{}[synAddress];", prefix, sg.name())?;
        "ipost".to_string()
    } else {
        writeln!(
            os,
            "unsigned int synAddress = (shSpk{}[j] * {}) + {};",
            suffix, trg_num_neurons, id
        )?;
        id.to_string()
    };
    syn_subs.add_var_substitution("id_post", id_post.clone())?;
    syn_subs.add_var_substitution("id_syn", "synAddress")?;
    ctx.add_accumulation_substitution(&mut syn_subs, &id_post)?;

    (ctx.handlers.update_handler(ctx.true_spike))(os, sg, &syn_subs)?;

    if sparse {
        os.close_brace(ROW_LENGTH_BRACE)?;
    }

    if ctx.retest_event_threshold() {
        os.close_brace(RETEST_BRACE)?;
    } else if bitmask {
        os.close_brace(BITMASK_BRACE)?;
    }
    Ok(())
}
