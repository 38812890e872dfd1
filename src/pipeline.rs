// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration to generated sources
//!
//! `feagi-config` keeps plain names and numbers; this module turns them into
//! the model settings, backend and logging options they describe.

use anyhow::{Context, Result};
use feagi_config::KernelGenConfig;
use feagi_kernelgen_codegen::{
    create_backend, generate_all, BackendPreferences, BackendType, BuildDescriptor, CpuPreferences,
    CudaPreferences, KernelBlockSizes,
};
use feagi_kernelgen_model::{FinalizedModel, ModelSpec, Precision};
use feagi_observability::LoggingOptions;
use tracing::info;

pub fn backend_type(config: &KernelGenConfig) -> Result<BackendType> {
    config
        .codegen
        .backend
        .parse::<BackendType>()
        .with_context(|| format!("Invalid [codegen] backend '{}'", config.codegen.backend))
}

pub fn precision(config: &KernelGenConfig) -> Result<Precision> {
    config
        .codegen
        .precision
        .parse::<Precision>()
        .with_context(|| format!("Invalid [codegen] precision '{}'", config.codegen.precision))
}

/// Backend preferences from the `[cuda]` and `[cpu]` sections
pub fn backend_preferences(config: &KernelGenConfig) -> BackendPreferences {
    let sizes = &config.cuda.block_sizes;
    BackendPreferences {
        cuda: CudaPreferences {
            capability_major: config.cuda.capability_major,
            capability_minor: config.cuda.capability_minor,
            block_sizes: KernelBlockSizes {
                neuron_update: sizes.neuron_update,
                presynaptic_update: sizes.presynaptic_update,
                initialize: sizes.initialize,
                pre_neuron_reset: sizes.pre_neuron_reset,
            },
        },
        cpu: CpuPreferences {
            compiler: config.cpu.compiler.clone(),
            optimization_flags: config.cpu.optimization_flags.clone(),
        },
    }
}

/// Apply `[codegen]` time step, precision and seed to a model under construction
pub fn apply_model_settings(config: &KernelGenConfig, spec: &mut ModelSpec) -> Result<()> {
    spec.set_dt(config.codegen.dt)
        .set_precision(precision(config)?)
        .set_seed(config.codegen.seed);
    Ok(())
}

/// Logging options from the `[logging]` section
pub fn logging_options(config: &KernelGenConfig) -> LoggingOptions {
    let logging = &config.logging;
    LoggingOptions {
        default_level: logging.level.clone(),
        log_dir: logging.file_logging.then(|| logging.log_dir.clone()),
        retention_days: logging.retention_days,
        retention_runs: logging.retention_runs,
    }
}

/// Generate `model` with the configured backend into `[codegen] output_dir`
pub fn generate(config: &KernelGenConfig, model: &FinalizedModel) -> Result<BuildDescriptor> {
    let backend = create_backend(backend_type(config)?, backend_preferences(config))
        .context("Failed to create code generation backend")?;

    let out_dir = &config.codegen.output_dir;
    let descriptor = generate_all(model, backend.as_ref(), out_dir).with_context(|| {
        format!(
            "Failed to generate model '{}' into {}",
            model.name(),
            out_dir.display()
        )
    })?;

    info!(
        "Generated {} files for model '{}' ({} backend, {} precision)",
        descriptor.files.len(),
        descriptor.model,
        descriptor.backend,
        descriptor.precision
    );
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_default_config_targets_cuda() {
        let config = KernelGenConfig::default();
        assert_eq!(backend_type(&config).unwrap(), BackendType::Cuda);
        assert_eq!(precision(&config).unwrap(), Precision::Float);
        assert_eq!(backend_preferences(&config), BackendPreferences::default());
    }

    #[test]
    fn test_preferences_follow_config_sections() {
        let mut config = KernelGenConfig::default();
        config.cuda.capability_major = 8;
        config.cuda.capability_minor = 6;
        config.cuda.block_sizes.presynaptic_update = 128;
        config.cpu.compiler = "clang++".to_string();

        let prefs = backend_preferences(&config);
        assert_eq!(prefs.cuda.capability_major, 8);
        assert_eq!(prefs.cuda.capability_minor, 6);
        assert_eq!(prefs.cuda.block_sizes.presynaptic_update, 128);
        assert_eq!(prefs.cuda.block_sizes.neuron_update, 32);
        assert_eq!(prefs.cpu.compiler, "clang++");
        assert_eq!(prefs.cpu.optimization_flags, "-O3");
    }

    #[test]
    fn test_unknown_names_are_errors() {
        let mut config = KernelGenConfig::default();
        config.codegen.backend = "opencl".to_string();
        assert!(backend_type(&config).is_err());

        config.codegen.precision = "half".to_string();
        let err = precision(&config).unwrap_err();
        assert!(err.to_string().contains("half"));
    }

    #[test]
    fn test_model_settings_applied() {
        let mut config = KernelGenConfig::default();
        config.codegen.dt = 0.5;
        config.codegen.precision = "double".to_string();
        config.codegen.seed = 1234;

        let mut spec = ModelSpec::new("settings");
        apply_model_settings(&config, &mut spec).unwrap();
        let model = spec.finalize().unwrap();
        assert_eq!(model.dt(), 0.5);
        assert_eq!(model.precision(), Precision::Double);
        assert_eq!(model.seed(), 1234);
    }

    #[test]
    fn test_logging_options_only_name_a_dir_when_file_logging() {
        let mut config = KernelGenConfig::default();
        assert_eq!(logging_options(&config).log_dir, None);

        config.logging.file_logging = true;
        config.logging.log_dir = PathBuf::from("/tmp/kernelgen-logs");
        config.logging.level = "debug".to_string();
        let options = logging_options(&config);
        assert_eq!(options.log_dir, Some(PathBuf::from("/tmp/kernelgen-logs")));
        assert_eq!(options.default_level, "debug");
        assert_eq!(options.retention_runs, 10);
    }
}
