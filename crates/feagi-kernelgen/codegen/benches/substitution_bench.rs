// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Code Generation Microbenchmarks
//!
//! Notes:
//! - Substitution runs once per snippet per population, so it dominates
//!   generation time for models with many populations.
//! - Fixed inputs, no I/O.

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use feagi_kernelgen_codegen::generator::neuron_update::generate_neuron_update;
use feagi_kernelgen_codegen::{CodeStream, SingleThreadedCpuBackend, Substitutions};
use feagi_kernelgen_model::*;

/// Izhikevich-style sim code with nested placeholders and a function call
const SIM_CODE: &str = "if ($(V) >= 30.0) { $(V) = $(c); $(U) += $(d); }\n\
$(V) += 0.5 * (0.04 * $(V) * $(V) + 5.0 * $(V) + 140.0 - $(U) + $(Isyn)) * DT;\n\
$(V) += 0.5 * (0.04 * $(V) * $(V) + 5.0 * $(V) + 140.0 - $(U) + $(Isyn)) * DT;\n\
$(U) += $(a) * ($(b) * $(V) - $(U)) * DT;\n\
$(V) += $(clamp, $(gennrand_normal) * $(noise), 1.0);";

fn izhikevich() -> Arc<NeuronModel> {
    Arc::new(NeuronModel {
        param_names: ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect(),
        vars: vec![Var::new("V", "scalar"), Var::new("U", "scalar")],
        sim_code: "$(V) += $(a) * $(Isyn); $(U) += $(b) * $(V);".to_string(),
        threshold_condition_code: "$(V) >= 30.0".to_string(),
        reset_code: "$(V) = $(c); $(U) += $(d);".to_string(),
        ..Default::default()
    })
}

fn chain_model(populations: usize) -> FinalizedModel {
    let mut model = ModelSpec::new("chain");
    for i in 0..populations {
        model
            .add_neuron_population(
                &format!("Pop{}", i),
                1000,
                izhikevich(),
                vec![0.02, 0.2, -65.0, 8.0],
                vec![VarInitialiser::constant(-65.0), VarInitialiser::constant(-13.0)],
            )
            .unwrap();
    }
    for i in 1..populations {
        model
            .add_synapse_population(SynapseGroupParams {
                name: format!("Syn{}", i),
                source: format!("Pop{}", i - 1),
                target: format!("Pop{}", i),
                connectivity: SynapseMatrixConnectivity::Sparse,
                span_type: SpanType::Postsynaptic,
                delay_steps: i % 4,
                wu_model: Arc::new(WeightUpdateModel {
                    vars: vec![Var::new("g", "scalar")],
                    sim_code: "$(addToInSyn, $(g));".to_string(),
                    ..Default::default()
                }),
                wu_params: vec![],
                wu_var_initialisers: vec![VarInitialiser::constant(0.1)],
                ps_model: Arc::new(PostsynapticModel {
                    apply_input_code: "$(Isyn) += $(inSyn);".to_string(),
                    decay_code: "$(inSyn) *= 0.9;".to_string(),
                    ..Default::default()
                }),
                ps_params: vec![],
                connectivity_initialiser: None,
            })
            .unwrap();
    }
    model.finalize().unwrap()
}

fn bench_substitution(c: &mut Criterion) {
    let mut group = c.benchmark_group("substitution");
    group.sample_size(20);
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_secs(1));
    group.throughput(Throughput::Bytes(SIM_CODE.len() as u64));

    let mut kernel_subs = Substitutions::new();
    kernel_subs.add_var_substitution("gennrand_normal", "curand_normal(&lrng)").unwrap();
    kernel_subs.add_func_substitution("clamp", 2, "fminf($(0), $(1))").unwrap();

    let mut neuron_subs = kernel_subs.child();
    neuron_subs
        .add_var_name_substitution(["V", "U"], "", "l", "")
        .unwrap();
    neuron_subs
        .add_param_value_substitution(
            [("a", 0.02), ("b", 0.2), ("c", -65.0), ("d", 8.0), ("noise", 0.5)],
            Precision::Float,
        )
        .unwrap();
    neuron_subs.add_var_substitution("Isyn", "Isyn").unwrap();

    group.bench_function("izhikevich_sim_code", |b| {
        b.iter(|| neuron_subs.apply_check_unreplaced(black_box(SIM_CODE), "bench").unwrap())
    });

    group.finish();
}

fn bench_neuron_update_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("neuron_update_generation");
    group.sample_size(10);
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_secs(2));

    let backend = SingleThreadedCpuBackend::new();
    for populations in [10, 100] {
        let model = chain_model(populations);
        group.throughput(Throughput::Elements(populations as u64));
        group.bench_with_input(
            BenchmarkId::new("cpu", populations),
            &model,
            |b, model| {
                b.iter(|| {
                    let mut os = CodeStream::new();
                    generate_neuron_update(&mut os, black_box(model), &backend).unwrap();
                    os.into_string().unwrap()
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_substitution, bench_neuron_update_generation);
criterion_main!(benches);
