// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! CLI argument parsing for per-crate debug flags
//!
//! Supports flags like `--debug-feagi-kernelgen-codegen` to raise one
//! crate's log level to debug.

use std::collections::BTreeSet;
use std::env;

use crate::KNOWN_CRATES;

/// Per-crate debug flags
///
/// # Example
/// ```rust
/// use feagi_observability::CrateDebugFlags;
///
/// let flags = CrateDebugFlags::from_args(vec!["--debug-feagi-config".to_string()]);
/// assert!(flags.is_enabled("feagi-config"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrateDebugFlags {
    pub enabled_crates: BTreeSet<String>,
}

impl CrateDebugFlags {
    /// Parse debug flags from command-line arguments
    ///
    /// Looks for arguments matching `--debug-{crate-name}`, plus
    /// `--debug-all` to enable all known crates.
    pub fn from_args<I>(args: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut flags = CrateDebugFlags::default();
        for arg in args {
            if arg == "--debug-all" {
                flags.enable_all();
            } else if let Some(crate_name) = arg.strip_prefix("--debug-") {
                flags.enable(crate_name);
            }
        }
        flags
    }

    /// Add crates named in a `FEAGI_DEBUG` style value: `all` or comma-separated names
    pub fn merge_env_value(&mut self, value: &str) {
        if value.trim() == "all" {
            self.enable_all();
            return;
        }
        for crate_name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            self.enable(crate_name);
        }
    }

    pub fn enable(&mut self, crate_name: &str) {
        self.enabled_crates.insert(crate_name.to_string());
    }

    pub fn enable_all(&mut self) {
        for crate_name in KNOWN_CRATES {
            self.enable(crate_name);
        }
    }

    /// Check if debug is enabled for a specific crate
    pub fn is_enabled(&self, crate_name: &str) -> bool {
        self.enabled_crates.contains(crate_name)
    }

    /// Check if debug is enabled for any crate
    pub fn any_enabled(&self) -> bool {
        !self.enabled_crates.is_empty()
    }

    /// `DEBUG` for flagged crates, `INFO` otherwise
    pub fn log_level(&self, crate_name: &str) -> tracing::Level {
        if self.is_enabled(crate_name) {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Filter directives for `EnvFilter`
    ///
    /// Tracing targets are module paths, so crate names are written with
    /// underscores: `feagi_kernelgen_codegen=debug,info`. Crates without a
    /// flag log at `default_level`.
    pub fn to_filter_string(&self, default_level: &str) -> String {
        let mut filters: Vec<String> = self
            .enabled_crates
            .iter()
            .map(|crate_name| format!("{}=debug", crate_name.replace('-', "_")))
            .collect();
        filters.push(default_level.to_string());
        filters.join(",")
    }
}

/// Debug flags from the process arguments and the `FEAGI_DEBUG` environment variable
///
/// Environment variable format: `all`, or comma-separated crate names, e.g.
/// `feagi-kernelgen-codegen,feagi-config`.
pub fn parse_debug_flags() -> CrateDebugFlags {
    let mut flags = CrateDebugFlags::from_args(env::args());
    if let Ok(value) = env::var("FEAGI_DEBUG") {
        flags.merge_env_value(&value);
    }
    flags
}

/// Generate help text for debug flags
pub fn debug_flags_help() -> String {
    format!(
        r#"Debug Flags:
  --debug-all                    Enable debug logging for all crates
  --debug-{{crate-name}}          Enable debug logging for specific crate

Available crates:
  {}

Environment Variable:
  FEAGI_DEBUG={{crate-name}}[,{{crate-name}}]  Enable debug for crates (comma-separated)
  FEAGI_DEBUG=all                               Enable debug for all crates

Examples:
  --debug-feagi-kernelgen-codegen
  FEAGI_DEBUG=feagi-kernelgen-model,feagi-config
"#,
        KNOWN_CRATES.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_crate_flag() {
        let flags = CrateDebugFlags::from_args(vec!["--debug-feagi-kernelgen-codegen".to_string()]);
        assert!(flags.is_enabled("feagi-kernelgen-codegen"));
        assert!(!flags.is_enabled("feagi-kernelgen-model"));
    }

    #[test]
    fn test_unrelated_arguments_ignored() {
        let flags = CrateDebugFlags::from_args(vec![
            "kernelgen".to_string(),
            "--backend".to_string(),
            "cpu".to_string(),
        ]);
        assert!(!flags.any_enabled());
    }

    #[test]
    fn test_debug_all() {
        let flags = CrateDebugFlags::from_args(vec!["--debug-all".to_string()]);
        for crate_name in KNOWN_CRATES {
            assert!(flags.is_enabled(crate_name), "{} should be enabled", crate_name);
        }
    }

    #[test]
    fn test_env_value_merges() {
        let mut flags = CrateDebugFlags::from_args(vec!["--debug-feagi-config".to_string()]);
        flags.merge_env_value(" feagi-kernelgen-model , ,");
        assert!(flags.is_enabled("feagi-config"));
        assert!(flags.is_enabled("feagi-kernelgen-model"));
        assert_eq!(flags.enabled_crates.len(), 2);
    }

    #[test]
    fn test_filter_string_uses_target_names() {
        let flags = CrateDebugFlags::from_args(vec![
            "--debug-feagi-kernelgen-codegen".to_string(),
            "--debug-feagi-config".to_string(),
        ]);
        assert_eq!(
            flags.to_filter_string("warn"),
            "feagi_config=debug,feagi_kernelgen_codegen=debug,warn"
        );
        assert_eq!(CrateDebugFlags::default().to_filter_string("info"), "info");
    }

    #[test]
    fn test_log_level() {
        let flags = CrateDebugFlags::from_args(vec!["--debug-feagi-config".to_string()]);
        assert_eq!(flags.log_level("feagi-config"), tracing::Level::DEBUG);
        assert_eq!(flags.log_level("feagi-kernelgen-model"), tracing::Level::INFO);
    }
}
