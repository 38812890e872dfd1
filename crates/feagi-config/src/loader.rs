// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Configuration file loading with override support
//!
//! This module implements the 3-tier configuration loading system:
//! 1. TOML file (base defaults)
//! 2. Environment variables (runtime overrides)
//! 3. CLI arguments (explicit user overrides)

use crate::{ConfigError, ConfigResult, KernelGenConfig};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default configuration file name
pub const CONFIG_FILE_NAME: &str = "feagi_kernelgen.toml";

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "FEAGI_KERNELGEN_CONFIG_PATH";

/// Locations searched for [`CONFIG_FILE_NAME`]: cwd and up to 5 parents
fn search_paths() -> Vec<PathBuf> {
    let mut search_paths = Vec::new();
    if let Ok(cwd) = env::current_dir() {
        search_paths.push(cwd.join(CONFIG_FILE_NAME));
        let mut current = cwd.as_path();
        for _ in 0..5 {
            match current.parent() {
                Some(parent) => {
                    search_paths.push(parent.join(CONFIG_FILE_NAME));
                    current = parent;
                }
                None => break,
            }
        }
    }
    search_paths
}

/// Find the kernel generator configuration file
///
/// Search order:
/// 1. `FEAGI_KERNELGEN_CONFIG_PATH` environment variable
/// 2. Current working directory: `./feagi_kernelgen.toml`
/// 3. Parent directories (up to 5 levels)
///
/// # Errors
///
/// Returns `ConfigError::FileNotFound` if no config file is found in any location
pub fn find_config_file() -> ConfigResult<PathBuf> {
    if let Ok(env_path) = env::var(CONFIG_PATH_ENV) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        return Err(ConfigError::FileNotFound(format!(
            "Config file specified by {} not found: {}",
            CONFIG_PATH_ENV,
            path.display()
        )));
    }

    let search_paths = search_paths();
    if let Some(path) = search_paths.iter().find(|p| p.exists()) {
        return Ok(path.clone());
    }

    let search_list = search_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");
    Err(ConfigError::FileNotFound(format!(
        "'{}' not found in any of these locations:\n{}\n\nSet {} to specify a custom location.",
        CONFIG_FILE_NAME, search_list, CONFIG_PATH_ENV
    )))
}

/// Load configuration from TOML file
///
/// # Arguments
///
/// * `config_path` - Optional path to config file. If `None`, the file is
///   searched for; when the search finds nothing, built-in defaults are used
///   unless `FEAGI_KERNELGEN_CONFIG_PATH` names a missing file.
/// * `cli_args` - Optional CLI argument overrides
///
/// # Errors
///
/// Returns error if an explicitly named config file is missing or contains invalid TOML
pub fn load_config(
    config_path: Option<&Path>,
    cli_args: Option<&HashMap<String, String>>,
) -> ConfigResult<KernelGenConfig> {
    let config_file = match config_path {
        Some(path) => Some(path.to_path_buf()),
        None if env::var_os(CONFIG_PATH_ENV).is_some() => Some(find_config_file()?),
        None => find_config_file().ok(),
    };

    let mut config = match config_file {
        Some(path) => {
            let content = fs::read_to_string(&path)?;
            toml::from_str(&content)?
        }
        None => KernelGenConfig::default(),
    };

    apply_environment_overrides(&mut config);
    if let Some(cli) = cli_args {
        apply_cli_overrides(&mut config, cli);
    }

    Ok(config)
}

/// Overwrite `target` when `value` parses; unparsable values are ignored
fn parse_into<T: FromStr>(value: &str, target: &mut T) {
    if let Ok(parsed) = value.trim().parse::<T>() {
        *target = parsed;
    }
}

fn parse_bool(value: &str) -> bool {
    let value = value.to_lowercase();
    value == "true" || value == "1" || value == "yes"
}

/// Apply environment variable overrides to configuration
///
/// Supported environment variables:
/// - `FEAGI_KERNELGEN_BACKEND` -> `codegen.backend`
/// - `FEAGI_KERNELGEN_OUTPUT_DIR` -> `codegen.output_dir`
/// - `FEAGI_KERNELGEN_MODEL_NAME` -> `codegen.model_name`
/// - `FEAGI_KERNELGEN_PRECISION` -> `codegen.precision`
/// - `FEAGI_KERNELGEN_DT` -> `codegen.dt`
/// - `FEAGI_KERNELGEN_SEED` -> `codegen.seed`
/// - `FEAGI_KERNELGEN_CUDA_CAPABILITY_MAJOR` -> `cuda.capability_major`
/// - `FEAGI_KERNELGEN_CUDA_CAPABILITY_MINOR` -> `cuda.capability_minor`
/// - `FEAGI_KERNELGEN_BLOCK_SIZE` -> every `cuda.block_sizes` entry
/// - `FEAGI_KERNELGEN_CXX` -> `cpu.compiler`
/// - `FEAGI_KERNELGEN_LOG_LEVEL` -> `logging.level`
/// - `FEAGI_KERNELGEN_FILE_LOGGING` -> `logging.file_logging`
/// - `FEAGI_KERNELGEN_LOG_DIR` -> `logging.log_dir`
pub fn apply_environment_overrides(config: &mut KernelGenConfig) {
    let overrides: HashMap<String, String> = env::vars()
        .filter_map(|(key, value)| {
            key.strip_prefix("FEAGI_KERNELGEN_")
                .filter(|k| *k != "CONFIG_PATH")
                .map(|k| (k.to_lowercase(), value))
        })
        .collect();

    if let Some(value) = overrides.get("cuda_capability_major") {
        parse_into(value, &mut config.cuda.capability_major);
    }
    if let Some(value) = overrides.get("cuda_capability_minor") {
        parse_into(value, &mut config.cuda.capability_minor);
    }
    if let Some(value) = overrides.get("cxx") {
        config.cpu.compiler = value.clone();
    }
    if let Some(value) = overrides.get("file_logging") {
        config.logging.file_logging = parse_bool(value);
    }
    if let Some(value) = overrides.get("log_dir") {
        config.logging.log_dir = PathBuf::from(value);
    }

    // The remaining variables share their names with CLI keys
    apply_cli_overrides(config, &overrides);
}

/// Apply CLI argument overrides to configuration
///
/// # Arguments
///
/// * `config` - Configuration to modify
/// * `cli_args` - HashMap of CLI arguments (e.g., `{"backend": "cpu", "block_size": "64"}`)
pub fn apply_cli_overrides(config: &mut KernelGenConfig, cli_args: &HashMap<String, String>) {
    // Codegen settings
    if let Some(value) = cli_args.get("backend") {
        config.codegen.backend = value.to_lowercase();
    }
    if let Some(value) = cli_args.get("output_dir") {
        config.codegen.output_dir = PathBuf::from(value);
    }
    if let Some(value) = cli_args.get("model_name") {
        config.codegen.model_name = value.clone();
    }
    if let Some(value) = cli_args.get("precision") {
        config.codegen.precision = value.to_lowercase();
    }
    if let Some(value) = cli_args.get("dt") {
        parse_into(value, &mut config.codegen.dt);
    }
    if let Some(value) = cli_args.get("seed") {
        parse_into(value, &mut config.codegen.seed);
    }

    // CUDA settings
    if let Some(value) = cli_args.get("capability_major") {
        parse_into(value, &mut config.cuda.capability_major);
    }
    if let Some(value) = cli_args.get("capability_minor") {
        parse_into(value, &mut config.cuda.capability_minor);
    }
    if let Some(value) = cli_args.get("block_size") {
        if let Ok(block_size) = value.trim().parse::<usize>() {
            let sizes = &mut config.cuda.block_sizes;
            sizes.neuron_update = block_size;
            sizes.presynaptic_update = block_size;
            sizes.initialize = block_size;
            sizes.pre_neuron_reset = block_size;
        }
    }

    // CPU settings
    if let Some(value) = cli_args.get("compiler") {
        config.cpu.compiler = value.clone();
    }

    // Logging settings
    if let Some(value) = cli_args.get("log_level") {
        config.logging.level = value.to_lowercase();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_find_config_file_env_var() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("custom_config.toml");
        File::create(&config_path).unwrap();

        env::set_var(CONFIG_PATH_ENV, config_path.to_str().unwrap());
        let result = find_config_file();
        env::remove_var(CONFIG_PATH_ENV);

        assert_eq!(result.unwrap(), config_path);
    }

    #[test]
    fn test_missing_env_config_is_an_error() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();

        env::set_var(CONFIG_PATH_ENV, dir.path().join("missing.toml"));
        let result = load_config(None, None);
        env::remove_var(CONFIG_PATH_ENV);

        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_partial_config() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[codegen]").unwrap();
        writeln!(file, "backend = \"cpu\"").unwrap();
        writeln!(file, "dt = 0.5").unwrap();
        writeln!(file, "[cuda.block_sizes]").unwrap();
        writeln!(file, "presynaptic_update = 128").unwrap();

        let config = load_config(Some(&config_path), None).unwrap();

        assert_eq!(config.codegen.backend, "cpu");
        assert_eq!(config.codegen.dt, 0.5);
        assert_eq!(config.codegen.precision, "float");
        assert_eq!(config.cuda.block_sizes.presynaptic_update, 128);
        assert_eq!(config.cuda.block_sizes.neuron_update, 32);
    }

    #[test]
    fn test_invalid_toml_is_a_parse_error() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&config_path, "[codegen\nbackend = ").unwrap();

        assert!(matches!(
            load_config(Some(&config_path), None),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_environment_overrides() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let mut config = KernelGenConfig::default();

        env::set_var("FEAGI_KERNELGEN_BACKEND", "CPU");
        env::set_var("FEAGI_KERNELGEN_CUDA_CAPABILITY_MAJOR", "8");
        env::set_var("FEAGI_KERNELGEN_SEED", "not-a-number");

        apply_environment_overrides(&mut config);

        env::remove_var("FEAGI_KERNELGEN_BACKEND");
        env::remove_var("FEAGI_KERNELGEN_CUDA_CAPABILITY_MAJOR");
        env::remove_var("FEAGI_KERNELGEN_SEED");

        assert_eq!(config.codegen.backend, "cpu");
        assert_eq!(config.cuda.capability_major, 8);
        assert_eq!(config.codegen.seed, 0);
    }

    #[test]
    fn test_cli_block_size_applies_to_every_kernel() {
        let mut config = KernelGenConfig::default();
        let mut cli_args = HashMap::new();
        cli_args.insert("block_size".to_string(), "64".to_string());
        cli_args.insert("precision".to_string(), "Double".to_string());

        apply_cli_overrides(&mut config, &cli_args);

        assert!(config
            .cuda
            .block_sizes
            .all_block_sizes()
            .iter()
            .all(|(_, size)| *size == 64));
        assert_eq!(config.codegen.precision, "double");
    }

    #[test]
    fn test_override_precedence() {
        let _env_lock = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let config_path = dir.path().join(CONFIG_FILE_NAME);

        let mut file = File::create(&config_path).unwrap();
        writeln!(file, "[codegen]").unwrap();
        writeln!(file, "model_name = \"file-model\"").unwrap();
        writeln!(file, "seed = 1").unwrap();

        env::set_var("FEAGI_KERNELGEN_MODEL_NAME", "env-model");
        env::set_var("FEAGI_KERNELGEN_SEED", "2");

        let mut cli_args = HashMap::new();
        cli_args.insert("model_name".to_string(), "cli-model".to_string());

        let config = load_config(Some(&config_path), Some(&cli_args)).unwrap();

        env::remove_var("FEAGI_KERNELGEN_MODEL_NAME");
        env::remove_var("FEAGI_KERNELGEN_SEED");

        // CLI wins for the model name, env wins for the seed (no CLI override)
        assert_eq!(config.codegen.model_name, "cli-model");
        assert_eq!(config.codegen.seed, 2);
    }
}
