// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for model assembly

/// Errors raised while assembling or finalizing a model
///
/// All of these indicate a malformed model handed over by the front-end;
/// none are recoverable at generation time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("Unknown variable '{variable}' in {owner}")]
    UnknownVariable { owner: String, variable: String },

    #[error("Unknown neuron population '{0}'")]
    UnknownPopulation(String),

    #[error("Unknown synapse population '{0}'")]
    UnknownSynapseGroup(String),

    #[error("Duplicate population name '{0}'")]
    DuplicateName(String),

    #[error("{owner} expects {expected} parameter values for {snippet}, got {actual}")]
    ParamCountMismatch {
        owner: String,
        snippet: String,
        expected: usize,
        actual: usize,
    },

    #[error("{owner} expects {expected} variable initialisers, got {actual}")]
    VarInitCountMismatch {
        owner: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid model configuration: {0}")]
    InvalidConfiguration(String),
}

pub type Result<T> = core::result::Result<T, ModelError>;
