// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Generated Code Tests
//!
//! Whole build directories for both backends, checked for the fragments a
//! compiler and the host application depend on.

mod common;

use std::fs;
use std::path::Path;

use common::*;
use feagi_kernelgen_codegen::generator::BUILD_DESCRIPTOR_FILE;
use feagi_kernelgen_codegen::{
    generate_all, Backend, BuildDescriptor, CodegenError, SingleThreadedCpuBackend,
};
use feagi_kernelgen_model::{FinalizedModel, Precision, SpanType, SynapseMatrixConnectivity};
use tempfile::TempDir;

fn read(dir: &Path, file: &str) -> String {
    fs::read_to_string(dir.join(file)).unwrap()
}

fn generate(model: &FinalizedModel, backend: &dyn Backend) -> (TempDir, BuildDescriptor) {
    let dir = TempDir::new().unwrap();
    let descriptor = generate_all(model, backend, dir.path()).unwrap();
    (dir, descriptor)
}

fn dense_model() -> FinalizedModel {
    single_connection(SynapseMatrixConnectivity::Dense, SpanType::Postsynaptic, 4)
        .finalize()
        .unwrap()
}

#[test]
fn test_build_directory_lists_every_file() {
    let model = dense_model();
    let (dir, descriptor) = generate(&model, &SingleThreadedCpuBackend::new());

    assert_eq!(descriptor.model, "test");
    assert_eq!(descriptor.backend, "SingleThreadedCPU");
    assert_eq!(descriptor.compiler, "g++");
    assert_eq!(descriptor.precision, Precision::Float);
    assert_eq!(
        descriptor.sources,
        vec!["neuronUpdate.cc", "synapseUpdate.cc", "init.cc", "runner.cc"]
    );
    for file in &descriptor.files {
        assert!(dir.path().join(file).is_file(), "missing {}", file);
    }

    let on_disk: BuildDescriptor =
        serde_json::from_str(&read(dir.path(), BUILD_DESCRIPTOR_FILE)).unwrap();
    assert_eq!(on_disk, descriptor);
}

#[test]
fn test_cpu_definitions_declare_state_and_entry_points() {
    let model = dense_model();
    let (dir, _) = generate(&model, &SingleThreadedCpuBackend::new());
    let definitions = read(dir.path(), "definitions.h");

    assert!(definitions.starts_with("#pragma once\n"));
    assert!(definitions.contains("typedef float scalar;\n"));
    assert!(definitions.contains("#define TIME_MAX FLT_MAX\n"));
    assert!(definitions.contains("#define SUPPORT_CODE_FUNC inline\n"));
    assert!(definitions.contains("// neuron group Pre\n"));
    assert!(definitions.contains("EXPORT_VAR scalar* VPost;\n"));
    assert!(definitions.contains("EXPORT_VAR scalar* inSynSyn;\n"));
    assert!(definitions.contains("EXPORT_VAR scalar* gSyn;\n"));
    assert!(definitions.contains("EXPORT_FUNC void stepTime();\n"));
    assert!(definitions.contains("EXPORT_FUNC void updateNeurons(scalar t);\n"));
}

#[test]
fn test_cpu_neuron_update_applies_input_and_detects_spikes() {
    let model = dense_model();
    let (dir, _) = generate(&model, &SingleThreadedCpuBackend::new());
    let neuron_update = read(dir.path(), "neuronUpdate.cc");

    assert!(neuron_update.starts_with("#include \"definitions.h\"\n"));
    assert!(neuron_update.contains("void updateNeurons(scalar t)"));
    assert!(neuron_update.contains("scalar lV = VPost[i];"));
    assert!(neuron_update.contains("scalar Isyn = 0;"));
    assert!(neuron_update.contains("scalar linSynSyn = inSynSyn[i];"));
    assert!(neuron_update.contains("Isyn += linSynSyn;"));
    assert!(neuron_update.contains("lV += Isyn;"));
    assert!(neuron_update.contains("if (lV >= 1.0)"));
    assert!(neuron_update.contains("lV = 0.0;"));
    assert!(neuron_update.contains("VPost[i] = lV;"));
    assert!(neuron_update.contains("inSynSyn[i] = linSynSyn;"));
    assert!(!neuron_update.contains("$("));
}

#[test]
fn test_cpu_synapse_update_and_runner() {
    let model = dense_model();
    let (dir, _) = generate(&model, &SingleThreadedCpuBackend::new());

    let synapse_update = read(dir.path(), "synapseUpdate.cc");
    assert!(synapse_update.contains("void updateSynapses(scalar t)"));
    assert!(synapse_update.contains("// synapse group Syn"));
    assert!(synapse_update.contains("gSyn["));
    assert!(!synapse_update.contains("$("));

    let runner = read(dir.path(), "runner.cc");
    assert!(runner.contains("unsigned long long iT = 0;"));
    assert!(runner.contains("void allocateMem()"));
    assert!(runner.contains("void stepTime()"));
    assert!(runner.contains("updateSynapses(t);"));
    assert!(runner.contains("t = iT * DT;"));

    let init = read(dir.path(), "init.cc");
    assert!(init.contains("void initialize()"));
    assert!(init.contains("inSynSyn["));
    assert!(!init.contains("$("));
}

#[test]
fn test_cuda_build_directory() {
    let model = dense_model();
    let backend = cuda(7);
    let (dir, descriptor) = generate(&model, &backend);

    assert_eq!(descriptor.backend, "CUDA");
    assert!(descriptor.sources.iter().all(|s| s.ends_with(".cu")));

    let definitions = read(dir.path(), "definitions.h");
    assert!(definitions.contains("#define SUPPORT_CODE_FUNC __device__ __host__ inline\n"));

    let neuron_update = read(dir.path(), "neuronUpdate.cu");
    assert!(neuron_update.contains("__global__ void updateNeuronsKernel("));
    assert!(neuron_update.contains("void updateNeurons(scalar t)"));
    assert!(neuron_update.contains("scalar lV = dd_VPost["));
    assert!(!neuron_update.contains("$("));

    let synapse_update = read(dir.path(), "synapseUpdate.cu");
    assert!(synapse_update.contains("__global__ void updatePresynapticKernel("));
    assert!(synapse_update.contains("scalar linSyn = 0;"));
    assert!(synapse_update.contains("dd_inSynSyn[lid] += linSyn;"));
    assert!(!synapse_update.contains("__shared__ scalar shLg"));
    assert!(!synapse_update.contains("$("));

    let makefile = read(dir.path(), "Makefile");
    assert!(makefile.contains("sm_70"));
}

#[test]
fn test_cuda_dendritic_delay_goes_through_global_atomics() {
    let mut spec = two_populations(4);
    let mut params = connection("Syn", SynapseMatrixConnectivity::Sparse, SpanType::Postsynaptic);
    params.wu_model = delayed_pulse();
    spec.add_synapse_population(params)
        .unwrap()
        .set_max_dendritic_delay_timesteps(4);
    let model = spec.finalize().unwrap();

    let (dir, _) = generate(&model, &cuda(7));
    let synapse_update = read(dir.path(), "synapseUpdate.cu");
    assert!(synapse_update.contains("atomicAdd(&dd_denDelaySyn["));
    assert!(!synapse_update.contains("__shared__ scalar shLg"));

    let neuron_update = read(dir.path(), "neuronUpdate.cu");
    assert!(neuron_update.contains("linSynSyn += denDelayFrontSyn;"));
}

#[test]
fn test_cuda_shared_memory_accumulator_for_small_sparse_target() {
    let mut spec = single_connection(SynapseMatrixConnectivity::Sparse, SpanType::Postsynaptic, 4);
    spec.synapse_group_mut("Syn").unwrap().set_max_connections(8).unwrap();
    let model = spec.finalize().unwrap();

    let (dir, _) = generate(&model, &cuda(7));
    let synapse_update = read(dir.path(), "synapseUpdate.cu");
    assert!(synapse_update.contains("__shared__ scalar shLg[32];"));
    assert!(synapse_update.contains("shLg[threadIdx.x] = 0;"));
    assert!(synapse_update.contains("__shared__ unsigned int shRowLength[32];"));

    // Several spikes in one block may hit the same target
    assert!(synapse_update.contains("atomicAdd(&shLg[ipost], "));
    assert!(!synapse_update.contains("shLg[ipost] +="));
}

#[test]
fn test_cuda_post_span_stages_spikes_between_barriers() {
    let mut spec = single_connection(SynapseMatrixConnectivity::Sparse, SpanType::Postsynaptic, 4);
    spec.synapse_group_mut("Syn").unwrap().set_max_connections(8).unwrap();
    let model = spec.finalize().unwrap();

    let (dir, _) = generate(&model, &cuda(7));
    let synapse_update = read(dir.path(), "synapseUpdate.cu");

    let stage = synapse_update.find("shSpk[threadIdx.x] = spk;").unwrap();
    let first_barrier = synapse_update[..stage].rfind("__syncthreads();").unwrap();
    let guard = synapse_update[..stage]
        .rfind("if (threadIdx.x < numSpikesInBlock)")
        .unwrap();
    let row_length = synapse_update
        .find("shRowLength[threadIdx.x] = dd_rowLengthSyn[spk];")
        .unwrap();
    let second_barrier = stage + synapse_update[stage..].find("__syncthreads();").unwrap();
    let spike_loop = synapse_update
        .find("for (unsigned int j = 0; j < numSpikesInBlock; j++)")
        .unwrap();

    assert!(first_barrier < guard);
    assert!(stage < row_length && row_length < second_barrier);
    assert!(second_barrier < spike_loop);
}

#[test]
fn test_cuda_event_threshold_retested_per_connection() {
    let mut spec = two_populations(4);
    for (name, threshold) in [("Strong", "0.5"), ("Weak", "0.2")] {
        let mut params = connection(name, SynapseMatrixConnectivity::Dense, SpanType::Postsynaptic);
        params.wu_model = graded_pulse(threshold);
        spec.add_synapse_population(params).unwrap();
    }
    let model = spec.finalize().unwrap();
    assert!(model.synapse_group("Strong").unwrap().is_event_threshold_retest_required());

    let (dir, _) = generate(&model, &cuda(7));
    let synapse_update = read(dir.path(), "synapseUpdate.cu");
    assert!(synapse_update.contains("if (dd_VPre[shSpkEvnt[j]] > 0.5)"));
    assert!(synapse_update.contains("if (dd_VPre[shSpkEvnt[j]] > 0.2)"));
}

/// `Pre -> Post` procedural rows drawn from the connectivity RNG
fn random_procedural_model(post_size: usize, threads_per_spike: usize) -> FinalizedModel {
    let mut spec = two_populations(post_size);
    let mut params = connection("Syn", SynapseMatrixConnectivity::Procedural, SpanType::Presynaptic);
    params.wu_model = global_pulse();
    params.wu_params = vec![0.25];
    params.wu_var_initialisers = vec![];
    params.connectivity_initialiser = Some(random_rows(0.5));
    spec.add_synapse_population(params)
        .unwrap()
        .set_num_threads_per_spike(threads_per_spike)
        .unwrap();
    spec.finalize().unwrap()
}

#[test]
fn test_cuda_procedural_rng_keyed_on_source_row() {
    let model = random_procedural_model(10, 1);
    let backend = cuda(7);
    let sequence = backend.procedural_connectivity_sequence(model.synapse_group("Syn").unwrap(), &model);

    let (dir, _) = generate(&model, &backend);
    let synapse_update = read(dir.path(), "synapseUpdate.cu");
    assert!(synapse_update.contains("curandStatePhilox4_32_10_t connectRNG = dd_rng[0];"));
    assert!(synapse_update.contains(&format!(
        "skipahead_sequence((unsigned long long)({} + preInd), &connectRNG);",
        sequence
    )));
    assert!(!synapse_update.contains("+ lid), &connectRNG"));
}

#[test]
fn test_cuda_procedural_row_split_over_threads() {
    // 10 targets over 3 threads: 4, 4 and the remaining 2
    let model = random_procedural_model(10, 3);
    let backend = cuda(7);
    let sequence = backend.procedural_connectivity_sequence(model.synapse_group("Syn").unwrap(), &model);

    let (dir, _) = generate(&model, &backend);
    let synapse_update = read(dir.path(), "synapseUpdate.cu");
    assert!(synapse_update.contains("const unsigned int spike = lid / 3;"));
    assert!(synapse_update.contains("const unsigned int thread = lid % 3;"));
    assert!(synapse_update.contains(&format!(
        "skipahead_sequence((unsigned long long)({} + preInd * 3 + thread), &connectRNG);",
        sequence
    )));
    assert!(synapse_update.contains("const unsigned int idPostStart = thread * 4;"));
    assert!(synapse_update
        .contains("const unsigned int numPost = (idPostStart < 10) ? min(4u, 10u - idPostStart) : 0;"));
    assert!(!synapse_update.contains("$("));
}

#[test]
fn test_cpu_procedural_rng_keyed_on_source_row() {
    let model = random_procedural_model(10, 1);
    let (dir, _) = generate(&model, &SingleThreadedCpuBackend::new());
    let synapse_update = read(dir.path(), "synapseUpdate.cc");
    assert!(synapse_update
        .contains("std::seed_seq connectSeed{proceduralRNGSeed, (unsigned long long)(0 + ipre)};"));
    assert!(synapse_update.contains("std::mt19937 connectRNG(connectSeed);"));
}

#[test]
fn test_generation_fails_without_compatible_strategy() {
    let model = single_connection(SynapseMatrixConnectivity::Dense, SpanType::Presynaptic, 4)
        .finalize()
        .unwrap();
    let dir = TempDir::new().unwrap();

    let err = generate_all(&model, &cuda(7), dir.path()).unwrap_err();
    assert!(matches!(err, CodegenError::NoCompatibleStrategy(name) if name == "Syn"));
}
