// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for kernel generation

use feagi_kernelgen_model::ModelError;

/// Errors that abort code generation for a model
#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    #[error("Unresolved placeholder '$({name})' in {context}: {code}")]
    UnresolvedPlaceholder {
        name: String,
        context: String,
        code: String,
    },

    #[error("'{name}' is already bound as a {existing} in this substitution context")]
    NameCollision { name: String, existing: &'static str },

    #[error("Function '{name}' takes {expected} arguments, called with {actual}")]
    ArityMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Malformed placeholder in {context}: {code}")]
    MalformedPlaceholder { context: String, code: String },

    #[error("Substitution did not reach a fixed point after {passes} passes: {code}")]
    SubstitutionDepthExceeded { passes: usize, code: String },

    #[error("No presynaptic update strategy is compatible with synapse population '{0}'")]
    NoCompatibleStrategy(String),

    #[error("Synapse population '{name}' matches several presynaptic update strategies: {strategies:?}")]
    AmbiguousStrategy {
        name: String,
        strategies: Vec<&'static str>,
    },

    #[error("Unbalanced code scope: expected to close {expected:?}, closing {actual}")]
    UnbalancedScope { expected: Option<u32>, actual: u32 },

    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error("Invalid backend: {0}")]
    InvalidBackend(String),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("Failed to format generated code")]
    Format(#[from] std::fmt::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize build descriptor: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CodegenError>;
