// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration validation
//!
//! This module checks that configuration values are within the ranges the
//! generator and the target backends accept, collecting every problem
//! before reporting.

use crate::{ConfigError, ConfigResult, KernelGenConfig};

/// Backend names accepted in `codegen.backend`
pub const KNOWN_BACKENDS: &[&str] = &["cuda", "cpu", "single_threaded_cpu"];

/// Precision names accepted in `codegen.precision`
pub const KNOWN_PRECISIONS: &[&str] = &["float", "double"];

/// Log levels accepted in `logging.level`
pub const KNOWN_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

const WARP_SIZE: usize = 32;
const MAX_BLOCK_SIZE: usize = 1024;
const MIN_CAPABILITY_MAJOR: u32 = 3;

/// Validation errors that can occur during config validation
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    InvalidBlockSize { kernel: String, block_size: usize },
    UnsupportedCapability { major: u32, minor: u32 },
    UnknownName { field: String, value: String, allowed: &'static [&'static str] },
    MissingRequired { field: String },
    InvalidValue { field: String, reason: String },
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidBlockSize { kernel, block_size } => {
                write!(
                    f,
                    "cuda.block_sizes.{} = {} must be a non-zero multiple of {} no larger than {}",
                    kernel, block_size, WARP_SIZE, MAX_BLOCK_SIZE
                )
            }
            Self::UnsupportedCapability { major, minor } => {
                write!(
                    f,
                    "Compute capability {}.{} is below the supported minimum {}.0",
                    major, minor, MIN_CAPABILITY_MAJOR
                )
            }
            Self::UnknownName { field, value, allowed } => {
                write!(
                    f,
                    "Unknown {} '{}' (expected one of: {})",
                    field,
                    value,
                    allowed.join(", ")
                )
            }
            Self::MissingRequired { field } => {
                write!(f, "Missing required configuration: {}", field)
            }
            Self::InvalidValue { field, reason } => {
                write!(f, "Invalid configuration value for {}: {}", field, reason)
            }
        }
    }
}

/// Validate the complete configuration
///
/// Checks for:
/// - Block sizes (positive, warp multiples, at most 1024)
/// - Minimum compute capability
/// - Known backend, precision and log level names
/// - Required fields and value ranges
///
/// # Errors
///
/// Returns `ConfigError::ValidationError` listing every problem found
pub fn validate_config(config: &KernelGenConfig) -> ConfigResult<()> {
    let errors = collect_validation_errors(config);

    if !errors.is_empty() {
        let error_messages = errors
            .iter()
            .map(|e| format!("  - {}", e))
            .collect::<Vec<_>>()
            .join("\n");

        return Err(ConfigError::ValidationError(format!(
            "Configuration validation failed:\n{}",
            error_messages
        )));
    }

    Ok(())
}

/// Every validation problem in `config`, in section order
pub fn collect_validation_errors(config: &KernelGenConfig) -> Vec<ConfigValidationError> {
    let mut errors = Vec::new();
    validate_names(config, &mut errors);
    validate_required_fields(config, &mut errors);
    validate_value_ranges(config, &mut errors);
    validate_cuda(config, &mut errors);
    errors
}

fn check_name(
    field: &str,
    value: &str,
    allowed: &'static [&'static str],
    errors: &mut Vec<ConfigValidationError>,
) {
    if !allowed.contains(&value.to_lowercase().as_str()) {
        errors.push(ConfigValidationError::UnknownName {
            field: field.to_string(),
            value: value.to_string(),
            allowed,
        });
    }
}

fn validate_names(config: &KernelGenConfig, errors: &mut Vec<ConfigValidationError>) {
    check_name("codegen.backend", &config.codegen.backend, KNOWN_BACKENDS, errors);
    check_name("codegen.precision", &config.codegen.precision, KNOWN_PRECISIONS, errors);
    check_name("logging.level", &config.logging.level, KNOWN_LOG_LEVELS, errors);
}

fn validate_required_fields(config: &KernelGenConfig, errors: &mut Vec<ConfigValidationError>) {
    if config.codegen.model_name.trim().is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: "codegen.model_name".to_string(),
        });
    }
    if config.codegen.output_dir.as_os_str().is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: "codegen.output_dir".to_string(),
        });
    }
    if config.cpu.compiler.trim().is_empty() {
        errors.push(ConfigValidationError::MissingRequired {
            field: "cpu.compiler".to_string(),
        });
    }
}

fn validate_value_ranges(config: &KernelGenConfig, errors: &mut Vec<ConfigValidationError>) {
    // Also rejects NaN
    if !(config.codegen.dt > 0.0) || !config.codegen.dt.is_finite() {
        errors.push(ConfigValidationError::InvalidValue {
            field: "codegen.dt".to_string(),
            reason: format!("time step must be positive and finite, got {}", config.codegen.dt),
        });
    }
    if config.logging.retention_runs == 0 {
        errors.push(ConfigValidationError::InvalidValue {
            field: "logging.retention_runs".to_string(),
            reason: "at least the current run must be kept".to_string(),
        });
    }
}

fn validate_cuda(config: &KernelGenConfig, errors: &mut Vec<ConfigValidationError>) {
    let cuda = &config.cuda;
    if cuda.capability_major < MIN_CAPABILITY_MAJOR {
        errors.push(ConfigValidationError::UnsupportedCapability {
            major: cuda.capability_major,
            minor: cuda.capability_minor,
        });
    }
    for (kernel, block_size) in cuda.block_sizes.all_block_sizes() {
        if block_size == 0 || block_size % WARP_SIZE != 0 || block_size > MAX_BLOCK_SIZE {
            errors.push(ConfigValidationError::InvalidBlockSize {
                kernel: kernel.to_string(),
                block_size,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = KernelGenConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_block_sizes() {
        let mut config = KernelGenConfig::default();
        config.cuda.block_sizes.neuron_update = 48;
        config.cuda.block_sizes.initialize = 0;
        config.cuda.block_sizes.pre_neuron_reset = 2048;

        let errors = collect_validation_errors(&config);
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ConfigValidationError::InvalidBlockSize {
            kernel: "neuron_update".to_string(),
            block_size: 48,
        }));
    }

    #[test]
    fn test_old_capability_rejected() {
        let mut config = KernelGenConfig::default();
        config.cuda.capability_major = 2;

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("Compute capability 2.0"));
    }

    #[test]
    fn test_unknown_backend_and_precision() {
        let mut config = KernelGenConfig::default();
        config.codegen.backend = "opencl".to_string();
        config.codegen.precision = "half".to_string();

        let errors = collect_validation_errors(&config);
        assert_eq!(errors.len(), 2);
        assert!(errors[0].to_string().contains("'opencl'"));
        assert!(errors[1].to_string().contains("float, double"));
    }

    #[test]
    fn test_names_are_case_insensitive() {
        let mut config = KernelGenConfig::default();
        config.codegen.backend = "CUDA".to_string();
        config.logging.level = "Debug".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_all_errors_are_reported_together() {
        let mut config = KernelGenConfig::default();
        config.codegen.dt = 0.0;
        config.codegen.model_name = "  ".to_string();
        config.cuda.block_sizes.presynaptic_update = 33;

        let message = validate_config(&config).unwrap_err().to_string();
        assert!(message.contains("codegen.dt"));
        assert!(message.contains("codegen.model_name"));
        assert!(message.contains("presynaptic_update = 33"));
    }

    #[test]
    fn test_nan_time_step_rejected() {
        let mut config = KernelGenConfig::default();
        config.codegen.dt = f64::NAN;
        assert!(validate_config(&config).is_err());
    }
}
