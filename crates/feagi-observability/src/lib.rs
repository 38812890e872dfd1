// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # feagi-observability
//!
//! Logging infrastructure for the FEAGI kernel generator.
//!
//! Provides consistent logging across the generator crates with per-crate
//! debug flag support, console output and optional per-run log files.

/// Crate version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod init;

// Re-export commonly used items
pub use cli::*;
pub use init::*;

/// Crates that accept `--debug-<crate>` flags
pub const KNOWN_CRATES: &[&str] = &[
    "feagi-kernelgen",
    "feagi-kernelgen-model",
    "feagi-kernelgen-codegen",
    "feagi-config",
];
