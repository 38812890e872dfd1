// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Presynaptic Update Strategies
//!
//! How the presynaptic update kernel spreads a connection's work over threads.
//!
//! | Strategy | Compatible when | Threads | Accumulation |
//! |---|---|---|---|
//! | `PreSpan` | presynaptic span, sparse | source size × threads per spike | shared or global atomic |
//! | `PostSpan` | postsynaptic span, not procedural | max row length (sparse) or target size | register (dense, bitmask), else shared or global atomic |
//! | `PreSpanProcedural` | procedural | source size × threads per spike | shared or global atomic |
//!
//! Selection is a pure scan over [`PresynapticUpdateStrategy::ALL`]; exactly one
//! strategy must match. Dendritic delay writes always go through a global atomic.

mod post_span;
mod pre_span;
mod pre_span_procedural;

use feagi_kernelgen_model::utils::ceil_divide;
use feagi_kernelgen_model::{FinalizedModel, SpanType, SynapseGroup, SynapseMatrixConnectivity};
use serde::Serialize;

use crate::backend::{Backend, SynapseUpdateHandlers};
use crate::code_stream::CodeStream;
use crate::error::{CodegenError, Result};
use crate::kernel::Kernel;
use crate::substitutions::Substitutions;

/// Shared-memory atomics below this capability tier are emulated and slower than global atomics
pub const MIN_SHARED_ATOMIC_TIER: u32 = 5;

/// Parallelisation of one connection's presynaptic update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PresynapticUpdateStrategy {
    /// One thread (or `threads_per_spike` threads) per incoming spike, walking its row
    PreSpan,
    /// One thread per target (or row slot), looping over incoming spikes
    PostSpan,
    /// Like `PreSpan`, regenerating each row from its connectivity rule
    PreSpanProcedural,
}

/// Where a connection's postsynaptic input is summed before reaching the target buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Accumulation {
    /// Thread-private register, written back once (thread owns its target)
    Register,
    /// Per-block shared array, flushed into the target buffer after all spikes
    SharedMemory,
    /// Atomic add straight into global memory
    GlobalAtomic,
}

impl PresynapticUpdateStrategy {
    /// Every strategy, in selection order
    pub const ALL: [PresynapticUpdateStrategy; 3] = [
        PresynapticUpdateStrategy::PreSpan,
        PresynapticUpdateStrategy::PostSpan,
        PresynapticUpdateStrategy::PreSpanProcedural,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PresynapticUpdateStrategy::PreSpan => "PreSpan",
            PresynapticUpdateStrategy::PostSpan => "PostSpan",
            PresynapticUpdateStrategy::PreSpanProcedural => "PreSpanProcedural",
        }
    }

    /// Threads the presynaptic update kernel devotes to `sg`
    pub fn num_threads(self, sg: &SynapseGroup) -> usize {
        match self {
            PresynapticUpdateStrategy::PreSpan | PresynapticUpdateStrategy::PreSpanProcedural => {
                sg.src_num_neurons() * sg.num_threads_per_spike()
            }
            PresynapticUpdateStrategy::PostSpan => {
                if sg.connectivity() == SynapseMatrixConnectivity::Sparse {
                    sg.max_connections()
                } else {
                    sg.trg_num_neurons()
                }
            }
        }
    }

    pub fn is_compatible(self, sg: &SynapseGroup) -> bool {
        match self {
            PresynapticUpdateStrategy::PreSpan => {
                sg.span_type() == SpanType::Presynaptic
                    && sg.connectivity() == SynapseMatrixConnectivity::Sparse
            }
            PresynapticUpdateStrategy::PostSpan => {
                sg.span_type() == SpanType::Postsynaptic
                    && sg.connectivity() != SynapseMatrixConnectivity::Procedural
            }
            PresynapticUpdateStrategy::PreSpanProcedural => {
                sg.connectivity() == SynapseMatrixConnectivity::Procedural
            }
        }
    }

    /// Each thread exclusively owns one target neuron
    pub fn should_accumulate_in_register(self, sg: &SynapseGroup) -> bool {
        match self {
            PresynapticUpdateStrategy::PreSpan | PresynapticUpdateStrategy::PreSpanProcedural => false,
            PresynapticUpdateStrategy::PostSpan => matches!(
                sg.connectivity(),
                SynapseMatrixConnectivity::Dense | SynapseMatrixConnectivity::Bitmask
            ),
        }
    }

    /// The whole target population fits in a per-block shared accumulator
    pub fn should_accumulate_in_shared_memory(self, sg: &SynapseGroup, backend: &dyn Backend) -> bool {
        let fits_in_block =
            sg.trg_num_neurons() <= backend.kernel_block_size(Kernel::PresynapticUpdate);

        match self {
            PresynapticUpdateStrategy::PreSpan | PresynapticUpdateStrategy::PreSpanProcedural => {
                if backend.capability_tier() < MIN_SHARED_ATOMIC_TIER {
                    false
                } else if sg.is_dendritic_delay_required() {
                    false
                } else {
                    fits_in_block
                }
            }
            PresynapticUpdateStrategy::PostSpan => {
                if sg.is_dendritic_delay_required() {
                    false
                } else {
                    sg.connectivity() == SynapseMatrixConnectivity::Sparse && fits_in_block
                }
            }
        }
    }

    /// Accumulation actually used for `sg`'s `addToInSyn`
    pub fn accumulation(self, sg: &SynapseGroup, backend: &dyn Backend) -> Accumulation {
        if sg.is_dendritic_delay_required() {
            Accumulation::GlobalAtomic
        } else if self.should_accumulate_in_register(sg) {
            Accumulation::Register
        } else if self.should_accumulate_in_shared_memory(sg, backend) {
            Accumulation::SharedMemory
        } else {
            Accumulation::GlobalAtomic
        }
    }

    /// Emit the body processing one kind of spike for `sg`
    ///
    /// `pop_subs` binds `$(id)` to the thread's index within the connection.
    #[allow(clippy::too_many_arguments)]
    pub fn gen_code(
        self,
        os: &mut CodeStream,
        model: &FinalizedModel,
        sg: &SynapseGroup,
        pop_subs: &Substitutions<'_>,
        backend: &dyn Backend,
        true_spike: bool,
        handlers: &SynapseUpdateHandlers<'_>,
    ) -> Result<()> {
        let ctx = StrategyContext {
            model,
            sg,
            backend,
            true_spike,
            handlers,
            accumulation: self.accumulation(sg, backend),
        };
        match self {
            PresynapticUpdateStrategy::PreSpan => pre_span::gen_code(os, pop_subs, &ctx),
            PresynapticUpdateStrategy::PostSpan => post_span::gen_code(os, pop_subs, &ctx),
            PresynapticUpdateStrategy::PreSpanProcedural => {
                pre_span_procedural::gen_code(os, pop_subs, &ctx)
            }
        }
    }
}

impl std::fmt::Display for PresynapticUpdateStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The single strategy compatible with `sg`
pub fn select_strategy(sg: &SynapseGroup) -> Result<PresynapticUpdateStrategy> {
    let matches: Vec<PresynapticUpdateStrategy> = PresynapticUpdateStrategy::ALL
        .iter()
        .copied()
        .filter(|s| s.is_compatible(sg))
        .collect();

    match matches.as_slice() {
        [strategy] => Ok(*strategy),
        [] => Err(CodegenError::NoCompatibleStrategy(sg.name().to_string())),
        _ => Err(CodegenError::AmbiguousStrategy {
            name: sg.name().to_string(),
            strategies: matches.iter().map(|s| s.name()).collect(),
        }),
    }
}

/// Targets handled by each of `threads` threads splitting a row of `num_targets`
///
/// Blocks are `ceil(num_targets / threads)` wide; trailing threads get the
/// remainder, clamped to zero once the row is exhausted.
pub fn partition_targets(num_targets: usize, threads: usize) -> Vec<usize> {
    if threads == 0 {
        return Vec::new();
    }
    let per_thread = ceil_divide(num_targets, threads);
    (0..threads)
        .map(|t| per_thread.min(num_targets.saturating_sub(t * per_thread)))
        .collect()
}

/// Everything a strategy body needs besides the output and the substitution chain
pub(crate) struct StrategyContext<'a> {
    pub model: &'a FinalizedModel,
    pub sg: &'a SynapseGroup,
    pub backend: &'a dyn Backend,
    pub true_spike: bool,
    pub handlers: &'a SynapseUpdateHandlers<'a>,
    pub accumulation: Accumulation,
}

impl StrategyContext<'_> {
    pub fn event_suffix(&self) -> &'static str {
        if self.true_spike {
            ""
        } else {
            "Evnt"
        }
    }

    pub fn prefix(&self) -> &'static str {
        self.backend.var_prefix()
    }

    /// Spike count of the source population in the slot this connection reads
    pub fn spike_count(&self) -> String {
        let src = self.model.src_neuron_group(self.sg);
        let slot = if src.is_delay_required() {
            "preReadDelaySlot"
        } else {
            "0"
        };
        format!(
            "{}glbSpkCnt{}{}[{}]",
            self.prefix(),
            self.event_suffix(),
            src.name(),
            slot
        )
    }

    /// Should this body re-test the event threshold before processing an event?
    pub fn retest_event_threshold(&self) -> bool {
        !self.true_spike && self.sg.is_event_threshold_retest_required()
    }

    /// `using namespace` line for weight update support code, if any
    pub fn support_code_namespace(&self) -> Option<String> {
        if self.sg.wu_model().sim_support_code.is_empty() {
            None
        } else {
            Some(format!("using namespace {}_weightupdate_simCode;", self.sg.name()))
        }
    }

    /// Atomic add into `array[index]` in the model's precision
    pub fn atomic_add(&self, array: &str, index: &str) -> String {
        self.backend.float_atomic_add(
            self.model.precision(),
            &format!("&{}[{}]", array, index),
            "$(0)",
        )
    }

    /// Bind `addToInSyn` (or `addToInSynDelay`) for a synapse targeting `id_post`
    pub fn add_accumulation_substitution(&self, subs: &mut Substitutions<'_>, id_post: &str) -> Result<()> {
        let sg = self.sg;
        let prefix = self.prefix();

        if sg.is_dendritic_delay_required() {
            let index = format!("{}{}", sg.dendritic_delay_offset(prefix, "$(1)"), id_post);
            let array = format!("{}denDelay{}", prefix, sg.ps_target_name());
            return subs.add_func_substitution("addToInSynDelay", 2, self.atomic_add(&array, &index));
        }

        let template = match self.accumulation {
            Accumulation::Register => "linSyn += $(0)".to_string(),
            // Several spikes in a block can reach the same target, so shared sums stay atomic
            Accumulation::SharedMemory => self.atomic_add("shLg", id_post),
            Accumulation::GlobalAtomic => {
                let array = format!("{}inSyn{}", prefix, sg.ps_target_name());
                self.atomic_add(&array, id_post)
            }
        };
        subs.add_func_substitution("addToInSyn", 1, template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_with_remainder() {
        assert_eq!(partition_targets(10, 3), vec![4, 4, 2]);
    }

    #[test]
    fn test_partition_clamps_exhausted_threads() {
        assert_eq!(partition_targets(10, 6), vec![2, 2, 2, 2, 2, 0]);
        assert_eq!(partition_targets(8, 4), vec![2, 2, 2, 2]);
        assert_eq!(partition_targets(3, 1), vec![3]);
        assert!(partition_targets(5, 0).is_empty());
    }

    #[test]
    fn test_partition_covers_every_target() {
        for n in 1..40 {
            for t in 1..9 {
                assert_eq!(partition_targets(n, t).iter().sum::<usize>(), n);
            }
        }
    }
}
