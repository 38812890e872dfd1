// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Kernel Generator Pipeline Tests
//!
//! Configuration file to build directory, for the demonstration network on
//! both backends.

use std::fs;
use std::path::Path;

use feagi_kernelgen::codegen::generator::BUILD_DESCRIPTOR_FILE;
use feagi_kernelgen::codegen::{BuildDescriptor, CudaBackend, PresynapticUpdateStrategy};
use feagi_kernelgen::config::{collect_validation_errors, load_config, KernelGenConfig};
use feagi_kernelgen::model::{FinalizedModel, Precision};
use feagi_kernelgen::{demo, pipeline};
use tempfile::TempDir;

/// Write `toml` (with `output_dir` pointing into `dir`) and load it
fn config_from_toml(dir: &Path, toml: &str) -> KernelGenConfig {
    let out = dir.join("generated");
    let content = format!(
        "[codegen]\noutput_dir = \"{}\"\n{}",
        out.display().to_string().replace('\\', "/"),
        toml
    );
    let path = dir.join("feagi_kernelgen.toml");
    fs::write(&path, content).unwrap();
    load_config(Some(&path), None).unwrap()
}

fn demo_model(config: &KernelGenConfig) -> FinalizedModel {
    let mut spec = demo::build_demo_model(&config.codegen.model_name).unwrap();
    pipeline::apply_model_settings(config, &mut spec).unwrap();
    spec.finalize().unwrap()
}

fn read(config: &KernelGenConfig, file: &str) -> String {
    fs::read_to_string(config.codegen.output_dir.join(file)).unwrap()
}

/// No placeholder survives into any translation unit or header
fn assert_fully_substituted(config: &KernelGenConfig, descriptor: &BuildDescriptor) {
    for file in descriptor.files.iter().filter(|f| *f != "Makefile") {
        let text = read(config, file);
        assert!(!text.contains("$("), "unresolved placeholder in {}", file);
    }
}

#[test]
fn test_cuda_demo_build_directory() {
    let dir = TempDir::new().unwrap();
    let config = config_from_toml(
        dir.path(),
        "model_name = \"cuda_demo\"\n\n[cuda]\ncapability_major = 8\ncapability_minor = 6\n",
    );
    assert!(collect_validation_errors(&config).is_empty());

    let model = demo_model(&config);
    let descriptor = pipeline::generate(&config, &model).unwrap();

    assert_eq!(descriptor.model, "cuda_demo");
    assert_eq!(descriptor.backend, "CUDA");
    assert_eq!(
        descriptor.sources,
        vec!["neuronUpdate.cu", "synapseUpdate.cu", "init.cu", "runner.cu"]
    );
    for file in &descriptor.files {
        assert!(config.codegen.output_dir.join(file).is_file(), "missing {}", file);
    }
    let on_disk: BuildDescriptor =
        serde_json::from_str(&read(&config, BUILD_DESCRIPTOR_FILE)).unwrap();
    assert_eq!(on_disk, descriptor);
    assert_fully_substituted(&config, &descriptor);

    assert!(read(&config, "Makefile").contains("sm_86"));

    let synapse_update = read(&config, "synapseUpdate.cu");
    assert!(synapse_update.contains("__global__ void updatePresynapticKernel("));
    assert!(synapse_update.contains("atomicAdd(&dd_denDelayInhInh["));
    assert!(synapse_update.contains("connectRNG"));

    let neuron_update = read(&config, "neuronUpdate.cu");
    assert!(neuron_update.contains("__global__ void updateNeuronsKernel("));
    assert!(neuron_update.contains("linSynInhInh += denDelayFrontInhInh;"));
    assert!(neuron_update.contains("spikeLikeEvent"));
}

#[test]
fn test_cpu_demo_build_directory() {
    let dir = TempDir::new().unwrap();
    let config = config_from_toml(
        dir.path(),
        "backend = \"cpu\"\nprecision = \"double\"\n\n[cpu]\ncompiler = \"clang++\"\n",
    );

    let model = demo_model(&config);
    assert_eq!(model.precision(), Precision::Double);

    let descriptor = pipeline::generate(&config, &model).unwrap();
    assert_eq!(descriptor.backend, "SingleThreadedCPU");
    assert_eq!(descriptor.compiler, "clang++");
    assert_eq!(descriptor.precision, Precision::Double);
    assert_eq!(
        descriptor.sources,
        vec!["neuronUpdate.cc", "synapseUpdate.cc", "init.cc", "runner.cc"]
    );
    assert_fully_substituted(&config, &descriptor);

    assert!(read(&config, "definitions.h").contains("typedef double scalar;\n"));
    assert!(read(&config, "Makefile").starts_with("CXX := clang++\n"));
    assert!(read(&config, "neuronUpdate.cc").contains("scalar linSynExcExc = inSynExcExc[i];"));
}

#[test]
fn test_cuda_plan_covers_every_connection() {
    let config = KernelGenConfig::default();
    let model = demo_model(&config);
    let backend = CudaBackend::new(pipeline::backend_preferences(&config).cuda).unwrap();
    let plans = backend.plan_presynaptic_update(&model).unwrap();

    assert_eq!(plans.len(), model.synapse_groups().len());
    let strategy = |name: &str| {
        plans
            .iter()
            .find(|p| p.synapse_group.name() == name)
            .map(|p| p.strategy)
            .unwrap()
    };
    assert_eq!(strategy("ExcExc"), PresynapticUpdateStrategy::PostSpan);
    assert_eq!(strategy("ExcInh"), PresynapticUpdateStrategy::PostSpan);
    assert_eq!(strategy("InhExc"), PresynapticUpdateStrategy::PostSpan);
    assert_eq!(strategy("InputExc"), PresynapticUpdateStrategy::PreSpan);
    assert_eq!(strategy("InputInh"), PresynapticUpdateStrategy::PreSpanProcedural);

    // Ranges tile the thread space in block-sized steps
    let mut expected_start = 0;
    for plan in &plans {
        assert_eq!(plan.start, expected_start);
        assert!(plan.end - plan.start >= plan.num_threads);
        assert_eq!((plan.end - plan.start) % 32, 0);
        expected_start = plan.end;
    }
}

#[test]
fn test_invalid_block_size_is_reported_before_generation() {
    let dir = TempDir::new().unwrap();
    let config = config_from_toml(dir.path(), "\n[cuda.block_sizes]\npresynaptic_update = 48\n");

    let errors = collect_validation_errors(&config);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].to_string().contains("presynaptic_update"));

    let model = demo_model(&config);
    assert!(pipeline::generate(&config, &model).is_err());
    assert!(!config.codegen.output_dir.join("runner.cu").exists());
}
