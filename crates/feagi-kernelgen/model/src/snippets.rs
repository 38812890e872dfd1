// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! # Model Snippets
//!
//! Plain carriers for the symbolic code the front-end hands over. A snippet
//! holds code strings written against `$(name)` placeholders, the names of its
//! parameters and state variables, and rules for parameters derived from them.
//! Snippets are shared between populations through `Arc`.

use std::sync::Arc;

/// A state variable: name and generated-code type (`scalar`, `unsigned int`, ...)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Var {
    pub name: String,
    pub ty: String,
}

impl Var {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
        }
    }
}

/// Parameter set at run time through a kernel argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraGlobalParam {
    pub name: String,
    pub ty: String,
}

impl ExtraGlobalParam {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
        }
    }
}

/// Rule computing a parameter from the declared parameters and the time step
#[derive(Clone)]
pub struct DerivedParam {
    pub name: String,
    pub func: fn(&[f64], f64) -> f64,
}

impl DerivedParam {
    pub fn new(name: impl Into<String>, func: fn(&[f64], f64) -> f64) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl std::fmt::Debug for DerivedParam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedParam").field("name", &self.name).finish()
    }
}

/// Find a named entry, returning its index
pub(crate) fn index_of<'a, I>(names: I, name: &str) -> Option<usize>
where
    I: IntoIterator<Item = &'a str>,
{
    names.into_iter().position(|n| n == name)
}

/// Neuron model: per-step update, threshold and reset code
#[derive(Debug, Clone, Default)]
pub struct NeuronModel {
    pub param_names: Vec<String>,
    pub derived_params: Vec<DerivedParam>,
    pub vars: Vec<Var>,
    pub extra_global_params: Vec<ExtraGlobalParam>,
    pub sim_code: String,
    pub threshold_condition_code: String,
    pub reset_code: String,
    pub support_code: String,
}

impl NeuronModel {
    pub fn var_index(&self, name: &str) -> Option<usize> {
        index_of(self.vars.iter().map(|v| v.name.as_str()), name)
    }
}

/// Weight update model: what a synapse does when its source spikes
#[derive(Debug, Clone, Default)]
pub struct WeightUpdateModel {
    pub param_names: Vec<String>,
    pub derived_params: Vec<DerivedParam>,
    pub vars: Vec<Var>,
    pub extra_global_params: Vec<ExtraGlobalParam>,
    /// Run for every synapse of a source neuron that emitted a true spike
    pub sim_code: String,
    /// Run for every synapse of a source neuron that emitted a spike-like event
    pub event_code: String,
    /// Condition (evaluated in the source population) that emits a spike-like event
    pub event_threshold_condition_code: String,
    pub sim_support_code: String,
}

impl WeightUpdateModel {
    pub fn var_index(&self, name: &str) -> Option<usize> {
        index_of(self.vars.iter().map(|v| v.name.as_str()), name)
    }
}

/// Postsynaptic model: how accumulated input is applied to, and decays in, the target
#[derive(Debug, Clone, Default)]
pub struct PostsynapticModel {
    pub param_names: Vec<String>,
    pub derived_params: Vec<DerivedParam>,
    pub vars: Vec<Var>,
    pub apply_input_code: String,
    pub decay_code: String,
}

/// Rule regenerating one row of a procedural connection
///
/// `row_build_code` calls `$(addSynapse, idPost)` for every synapse in the row
/// of `$(id_pre)`, iterating over `$(num_post)` targets starting at `$(id_post_begin)`.
#[derive(Debug, Clone, Default)]
pub struct ConnectivitySnippet {
    pub param_names: Vec<String>,
    pub derived_params: Vec<DerivedParam>,
    pub row_build_code: String,
}

/// Variable initialisation snippet, assigning to `$(value)`
#[derive(Debug, Clone, Default)]
pub struct VarInitSnippet {
    pub param_names: Vec<String>,
    pub derived_params: Vec<DerivedParam>,
    pub code: String,
}

impl VarInitSnippet {
    /// Snippet that assigns a constant: `$(value) = $(constant);`
    pub fn constant() -> Arc<Self> {
        Arc::new(Self {
            param_names: vec!["constant".to_string()],
            derived_params: Vec::new(),
            code: "$(value) = $(constant);".to_string(),
        })
    }

    /// Snippet drawing uniformly from `[min, max)`
    pub fn uniform() -> Arc<Self> {
        Arc::new(Self {
            param_names: vec!["min".to_string(), "max".to_string()],
            derived_params: vec![DerivedParam::new("scale", |p, _| p[1] - p[0])],
            code: "$(value) = $(min) + ($(gennrand_uniform) * $(scale));".to_string(),
        })
    }

    /// Snippet that leaves the variable uninitialised
    pub fn uninitialised() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

/// A snippet bound to concrete parameter values
#[derive(Debug, Clone)]
pub struct Initialiser<S> {
    pub snippet: Arc<S>,
    pub params: Vec<f64>,
    derived: Vec<f64>,
}

impl<S> Initialiser<S> {
    pub fn new(snippet: Arc<S>, params: Vec<f64>) -> Self {
        Self {
            snippet,
            params,
            derived: Vec::new(),
        }
    }

    pub fn derived_params(&self) -> &[f64] {
        &self.derived
    }
}

/// Snippets that declare parameters and derived parameters
pub trait ParameterisedSnippet {
    fn param_names(&self) -> &[String];
    fn derived_params(&self) -> &[DerivedParam];
}

macro_rules! impl_parameterised {
    ($($ty:ty),*) => {
        $(
            impl ParameterisedSnippet for $ty {
                fn param_names(&self) -> &[String] {
                    &self.param_names
                }
                fn derived_params(&self) -> &[DerivedParam] {
                    &self.derived_params
                }
            }
        )*
    };
}

impl_parameterised!(
    NeuronModel,
    WeightUpdateModel,
    PostsynapticModel,
    ConnectivitySnippet,
    VarInitSnippet
);

impl<S: ParameterisedSnippet> Initialiser<S> {
    /// Compute derived parameter values for time step `dt`
    pub fn init_derived_params(&mut self, dt: f64) {
        self.derived = compute_derived_params(self.snippet.as_ref(), &self.params, dt);
    }

    /// `(name, value)` pairs for every declared and derived parameter
    pub fn named_values(&self) -> Vec<(&str, f64)> {
        named_values(self.snippet.as_ref(), &self.params, &self.derived)
    }
}

pub type VarInitialiser = Initialiser<VarInitSnippet>;
pub type ConnectivityInitialiser = Initialiser<ConnectivitySnippet>;

impl VarInitialiser {
    pub fn constant(value: f64) -> Self {
        Self::new(VarInitSnippet::constant(), vec![value])
    }

    pub fn uninitialised() -> Self {
        Self::new(VarInitSnippet::uninitialised(), Vec::new())
    }

    pub fn has_code(&self) -> bool {
        !self.snippet.code.is_empty()
    }
}

pub(crate) fn compute_derived_params<S: ParameterisedSnippet + ?Sized>(
    snippet: &S,
    params: &[f64],
    dt: f64,
) -> Vec<f64> {
    snippet
        .derived_params()
        .iter()
        .map(|d| (d.func)(params, dt))
        .collect()
}

pub(crate) fn named_values<'a, S: ParameterisedSnippet + ?Sized>(
    snippet: &'a S,
    params: &[f64],
    derived: &[f64],
) -> Vec<(&'a str, f64)> {
    snippet
        .param_names()
        .iter()
        .map(String::as_str)
        .zip(params.iter().copied())
        .chain(
            snippet
                .derived_params()
                .iter()
                .map(|d| d.name.as_str())
                .zip(derived.iter().copied()),
        )
        .collect()
}
