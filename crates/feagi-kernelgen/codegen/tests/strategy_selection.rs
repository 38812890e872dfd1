// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Strategy Selection Tests
//!
//! Which presynaptic update strategy and accumulation each connection gets,
//! and how the CUDA backend lays connections out in the kernel's thread space.

mod common;

use common::*;
use feagi_kernelgen_codegen::{
    select_strategy, Accumulation, Backend, CodegenError, PresynapticUpdateStrategy,
};
use feagi_kernelgen_model::{SpanType, SynapseMatrixConnectivity};

#[test]
fn test_dense_and_bitmask_post_span_accumulate_in_registers() {
    let backend = cuda(7);
    for connectivity in [SynapseMatrixConnectivity::Dense, SynapseMatrixConnectivity::Bitmask] {
        let model = single_connection(connectivity, SpanType::Postsynaptic, 4)
            .finalize()
            .unwrap();
        let sg = model.synapse_group("Syn").unwrap();

        let strategy = select_strategy(sg).unwrap();
        assert_eq!(strategy, PresynapticUpdateStrategy::PostSpan);
        assert_eq!(strategy.accumulation(sg, &backend), Accumulation::Register);
        assert_eq!(strategy.num_threads(sg), 4);
    }
}

#[test]
fn test_sparse_post_span_uses_shared_memory_when_target_fits_block() {
    let backend = cuda(5);
    let mut spec = single_connection(SynapseMatrixConnectivity::Sparse, SpanType::Postsynaptic, 4);
    spec.synapse_group_mut("Syn").unwrap().set_max_connections(8).unwrap();
    let model = spec.finalize().unwrap();
    let sg = model.synapse_group("Syn").unwrap();

    let strategy = select_strategy(sg).unwrap();
    assert_eq!(strategy, PresynapticUpdateStrategy::PostSpan);
    assert_eq!(strategy.num_threads(sg), 8);
    assert_eq!(strategy.accumulation(sg, &backend), Accumulation::SharedMemory);
}

#[test]
fn test_sparse_post_span_falls_back_to_global_atomics_for_large_targets() {
    let backend = cuda(7);
    let model = single_connection(SynapseMatrixConnectivity::Sparse, SpanType::Postsynaptic, 64)
        .finalize()
        .unwrap();
    let sg = model.synapse_group("Syn").unwrap();

    let strategy = select_strategy(sg).unwrap();
    assert!(!strategy.should_accumulate_in_shared_memory(sg, &backend));
    assert_eq!(strategy.accumulation(sg, &backend), Accumulation::GlobalAtomic);
}

#[test]
fn test_pre_span_shared_memory_needs_capability_tier() {
    let model = single_connection(SynapseMatrixConnectivity::Sparse, SpanType::Presynaptic, 4)
        .finalize()
        .unwrap();
    let sg = model.synapse_group("Syn").unwrap();
    let strategy = select_strategy(sg).unwrap();
    assert_eq!(strategy, PresynapticUpdateStrategy::PreSpan);

    let old = cuda(3);
    assert!(old.capability_tier() < 5);
    assert_eq!(strategy.accumulation(sg, &old), Accumulation::GlobalAtomic);
    assert_eq!(strategy.accumulation(sg, &cuda(5)), Accumulation::SharedMemory);
}

#[test]
fn test_pre_span_threads_scale_with_threads_per_spike() {
    let mut spec = single_connection(SynapseMatrixConnectivity::Sparse, SpanType::Presynaptic, 4);
    spec.synapse_group_mut("Syn").unwrap().set_num_threads_per_spike(3).unwrap();
    let model = spec.finalize().unwrap();
    let sg = model.synapse_group("Syn").unwrap();

    assert_eq!(select_strategy(sg).unwrap().num_threads(sg), 30);
}

#[test]
fn test_dendritic_delay_always_uses_global_atomics() {
    let backend = cuda(7);
    for (connectivity, span) in [
        (SynapseMatrixConnectivity::Dense, SpanType::Postsynaptic),
        (SynapseMatrixConnectivity::Sparse, SpanType::Postsynaptic),
        (SynapseMatrixConnectivity::Sparse, SpanType::Presynaptic),
    ] {
        let mut spec = two_populations(4);
        let mut params = connection("Syn", connectivity, span);
        params.wu_model = delayed_pulse();
        spec.add_synapse_population(params)
            .unwrap()
            .set_max_dendritic_delay_timesteps(4);
        let model = spec.finalize().unwrap();
        let sg = model.synapse_group("Syn").unwrap();
        assert!(sg.is_dendritic_delay_required());

        let strategy = select_strategy(sg).unwrap();
        assert!(!strategy.should_accumulate_in_shared_memory(sg, &backend));
        assert_eq!(strategy.accumulation(sg, &backend), Accumulation::GlobalAtomic);
    }
}

#[test]
fn test_procedural_connectivity_selects_procedural_strategy() {
    let model = single_connection(SynapseMatrixConnectivity::Procedural, SpanType::Postsynaptic, 4)
        .finalize()
        .unwrap();
    let sg = model.synapse_group("Syn").unwrap();

    assert_eq!(
        select_strategy(sg).unwrap(),
        PresynapticUpdateStrategy::PreSpanProcedural
    );
}

#[test]
fn test_exactly_one_strategy_matches_supported_connections() {
    let supported = [
        (SynapseMatrixConnectivity::Dense, SpanType::Postsynaptic),
        (SynapseMatrixConnectivity::Bitmask, SpanType::Postsynaptic),
        (SynapseMatrixConnectivity::Sparse, SpanType::Postsynaptic),
        (SynapseMatrixConnectivity::Sparse, SpanType::Presynaptic),
        (SynapseMatrixConnectivity::Procedural, SpanType::Presynaptic),
        (SynapseMatrixConnectivity::Procedural, SpanType::Postsynaptic),
    ];
    for (connectivity, span) in supported {
        let model = single_connection(connectivity, span, 4).finalize().unwrap();
        let sg = model.synapse_group("Syn").unwrap();
        let matching = PresynapticUpdateStrategy::ALL
            .iter()
            .filter(|s| s.is_compatible(sg))
            .count();
        assert_eq!(matching, 1, "{:?} / {:?}", connectivity, span);
    }
}

#[test]
fn test_dense_presynaptic_span_has_no_strategy() {
    let model = single_connection(SynapseMatrixConnectivity::Dense, SpanType::Presynaptic, 4)
        .finalize()
        .unwrap();
    let sg = model.synapse_group("Syn").unwrap();

    assert!(matches!(
        select_strategy(sg),
        Err(CodegenError::NoCompatibleStrategy(name)) if name == "Syn"
    ));
    assert!(matches!(
        cuda(7).plan_presynaptic_update(&model),
        Err(CodegenError::NoCompatibleStrategy(_))
    ));
}

#[test]
fn test_plan_pads_each_connection_to_whole_blocks() {
    let mut spec = two_populations(4);
    spec.add_synapse_population(connection(
        "Dense",
        SynapseMatrixConnectivity::Dense,
        SpanType::Postsynaptic,
    ))
    .unwrap();
    spec.add_synapse_population(connection(
        "Sparse",
        SynapseMatrixConnectivity::Sparse,
        SpanType::Presynaptic,
    ))
    .unwrap()
    .set_num_threads_per_spike(4)
    .unwrap();
    let model = spec.finalize().unwrap();

    let plans = cuda(7).plan_presynaptic_update(&model).unwrap();
    assert_eq!(plans.len(), 2);

    assert_eq!(plans[0].synapse_group.name(), "Dense");
    assert_eq!(plans[0].strategy, PresynapticUpdateStrategy::PostSpan);
    assert_eq!(plans[0].accumulation, Accumulation::Register);
    assert_eq!((plans[0].num_threads, plans[0].start, plans[0].end), (4, 0, 32));

    assert_eq!(plans[1].synapse_group.name(), "Sparse");
    assert_eq!(plans[1].strategy, PresynapticUpdateStrategy::PreSpan);
    assert_eq!((plans[1].num_threads, plans[1].start, plans[1].end), (40, 32, 96));
}
