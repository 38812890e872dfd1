// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Synapse Population Descriptor
//!
//! A directed projection from a source to a target neuron population. The
//! connectivity representation and span type decide which presynaptic update
//! strategy a parallel backend may use; see `feagi-kernelgen-codegen`.

use std::sync::Arc;

use crate::error::{ModelError, Result};
use crate::snippets::{
    compute_derived_params, named_values, ConnectivityInitialiser, PostsynapticModel,
    VarInitialiser, WeightUpdateModel,
};
use crate::types::{SpanType, SynapseMatrixConnectivity, VarLocation, VarMode};
use crate::utils::{is_rng_required, references_placeholder};

/// Everything needed to add a synapse population to a model
#[derive(Debug, Clone)]
pub struct SynapseGroupParams {
    pub name: String,
    pub source: String,
    pub target: String,
    pub connectivity: SynapseMatrixConnectivity,
    pub span_type: SpanType,
    /// Axonal delay in time steps
    pub delay_steps: usize,
    pub wu_model: Arc<WeightUpdateModel>,
    pub wu_params: Vec<f64>,
    pub wu_var_initialisers: Vec<VarInitialiser>,
    pub ps_model: Arc<PostsynapticModel>,
    pub ps_params: Vec<f64>,
    pub connectivity_initialiser: Option<ConnectivityInitialiser>,
}

/// A synapse population
#[derive(Debug, Clone)]
pub struct SynapseGroup {
    name: String,
    src_index: usize,
    trg_index: usize,
    src_num_neurons: usize,
    trg_num_neurons: usize,
    connectivity: SynapseMatrixConnectivity,
    span_type: SpanType,
    delay_steps: usize,
    max_connections: usize,
    max_dendritic_delay_timesteps: usize,
    num_threads_per_spike: usize,
    wu_model: Arc<WeightUpdateModel>,
    wu_params: Vec<f64>,
    wu_derived_params: Vec<f64>,
    wu_var_initialisers: Vec<VarInitialiser>,
    wu_var_modes: Vec<VarMode>,
    ps_model: Arc<PostsynapticModel>,
    ps_params: Vec<f64>,
    ps_derived_params: Vec<f64>,
    connectivity_initialiser: Option<ConnectivityInitialiser>,
    in_syn_location: VarLocation,
    dendritic_delay_location: VarLocation,
    event_threshold_retest_required: bool,
}

impl SynapseGroup {
    pub(crate) fn new(
        params: SynapseGroupParams,
        src: (usize, usize),
        trg: (usize, usize),
        default_var_mode: VarMode,
    ) -> Result<Self> {
        let SynapseGroupParams {
            name,
            connectivity,
            span_type,
            delay_steps,
            wu_model,
            wu_params,
            wu_var_initialisers,
            ps_model,
            ps_params,
            connectivity_initialiser,
            ..
        } = params;

        if wu_params.len() != wu_model.param_names.len() {
            return Err(ModelError::ParamCountMismatch {
                owner: name,
                snippet: "weight update model".to_string(),
                expected: wu_model.param_names.len(),
                actual: wu_params.len(),
            });
        }
        if ps_params.len() != ps_model.param_names.len() {
            return Err(ModelError::ParamCountMismatch {
                owner: name,
                snippet: "postsynaptic model".to_string(),
                expected: ps_model.param_names.len(),
                actual: ps_params.len(),
            });
        }
        if wu_var_initialisers.len() != wu_model.vars.len() {
            return Err(ModelError::VarInitCountMismatch {
                owner: name,
                expected: wu_model.vars.len(),
                actual: wu_var_initialisers.len(),
            });
        }
        if connectivity == SynapseMatrixConnectivity::Procedural && connectivity_initialiser.is_none()
        {
            return Err(ModelError::InvalidConfiguration(format!(
                "procedural synapse population '{}' has no connectivity initialiser",
                name
            )));
        }

        let (src_index, src_num_neurons) = src;
        let (trg_index, trg_num_neurons) = trg;
        let num_wu_vars = wu_model.vars.len();

        Ok(Self {
            name,
            src_index,
            trg_index,
            src_num_neurons,
            trg_num_neurons,
            connectivity,
            span_type,
            delay_steps,
            // Dense rows span the whole target population until told otherwise
            max_connections: trg_num_neurons,
            max_dendritic_delay_timesteps: 1,
            num_threads_per_spike: 1,
            wu_model,
            wu_params,
            wu_derived_params: Vec::new(),
            wu_var_initialisers,
            wu_var_modes: vec![default_var_mode; num_wu_vars],
            ps_model,
            ps_params,
            ps_derived_params: Vec::new(),
            connectivity_initialiser,
            in_syn_location: default_var_mode.location,
            dendritic_delay_location: default_var_mode.location,
            event_threshold_retest_required: false,
        })
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index of the source population in the owning model
    pub fn src_index(&self) -> usize {
        self.src_index
    }

    /// Index of the target population in the owning model
    pub fn trg_index(&self) -> usize {
        self.trg_index
    }

    pub fn src_num_neurons(&self) -> usize {
        self.src_num_neurons
    }

    pub fn trg_num_neurons(&self) -> usize {
        self.trg_num_neurons
    }

    pub fn connectivity(&self) -> SynapseMatrixConnectivity {
        self.connectivity
    }

    pub fn span_type(&self) -> SpanType {
        self.span_type
    }

    pub fn delay_steps(&self) -> usize {
        self.delay_steps
    }

    /// Length of the padded row; the whole target population unless sparse rows were sized
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn set_max_connections(&mut self, max_connections: usize) -> Result<()> {
        match self.connectivity {
            SynapseMatrixConnectivity::Sparse | SynapseMatrixConnectivity::Procedural => {
                self.max_connections = max_connections;
                Ok(())
            }
            _ => Err(ModelError::InvalidConfiguration(format!(
                "max connections can only be set on sparse or procedural synapse population '{}'",
                self.name
            ))),
        }
    }

    pub fn num_threads_per_spike(&self) -> usize {
        self.num_threads_per_spike
    }

    pub fn set_num_threads_per_spike(&mut self, num_threads: usize) -> Result<()> {
        if num_threads == 0 {
            return Err(ModelError::InvalidConfiguration(format!(
                "synapse population '{}' needs at least one thread per spike",
                self.name
            )));
        }
        self.num_threads_per_spike = num_threads;
        Ok(())
    }

    pub fn max_dendritic_delay_timesteps(&self) -> usize {
        self.max_dendritic_delay_timesteps
    }

    pub fn set_max_dendritic_delay_timesteps(&mut self, timesteps: usize) {
        self.max_dendritic_delay_timesteps = timesteps.max(1);
    }

    // ------------------------------------------------------------------
    // Models
    // ------------------------------------------------------------------

    pub fn wu_model(&self) -> &WeightUpdateModel {
        &self.wu_model
    }

    pub fn wu_params(&self) -> &[f64] {
        &self.wu_params
    }

    pub fn wu_derived_params(&self) -> &[f64] {
        &self.wu_derived_params
    }

    pub fn wu_named_params(&self) -> Vec<(&str, f64)> {
        named_values(self.wu_model.as_ref(), &self.wu_params, &self.wu_derived_params)
    }

    pub fn wu_var_initialisers(&self) -> &[VarInitialiser] {
        &self.wu_var_initialisers
    }

    pub fn ps_model(&self) -> &PostsynapticModel {
        &self.ps_model
    }

    pub fn ps_named_params(&self) -> Vec<(&str, f64)> {
        named_values(self.ps_model.as_ref(), &self.ps_params, &self.ps_derived_params)
    }

    pub fn connectivity_initialiser(&self) -> Option<&ConnectivityInitialiser> {
        self.connectivity_initialiser.as_ref()
    }

    /// Name of the postsynaptic input buffers this population accumulates into
    pub fn ps_target_name(&self) -> &str {
        &self.name
    }

    // ------------------------------------------------------------------
    // Storage
    // ------------------------------------------------------------------

    pub fn wu_var_mode(&self, var_name: &str) -> Result<VarMode> {
        Ok(self.wu_var_modes[self.wu_var_index(var_name)?])
    }

    pub fn set_wu_var_mode(&mut self, var_name: &str, mode: VarMode) -> Result<()> {
        let index = self.wu_var_index(var_name)?;
        self.wu_var_modes[index] = mode;
        Ok(())
    }

    pub fn wu_var_modes(&self) -> &[VarMode] {
        &self.wu_var_modes
    }

    fn wu_var_index(&self, var_name: &str) -> Result<usize> {
        self.wu_model
            .var_index(var_name)
            .ok_or_else(|| ModelError::UnknownVariable {
                owner: format!("synapse population '{}'", self.name),
                variable: var_name.to_string(),
            })
    }

    pub fn in_syn_location(&self) -> VarLocation {
        self.in_syn_location
    }

    pub fn set_in_syn_location(&mut self, location: VarLocation) {
        self.in_syn_location = location;
    }

    pub fn dendritic_delay_location(&self) -> VarLocation {
        self.dendritic_delay_location
    }

    pub fn set_dendritic_delay_location(&mut self, location: VarLocation) {
        self.dendritic_delay_location = location;
    }

    // ------------------------------------------------------------------
    // Derived requirements
    // ------------------------------------------------------------------

    /// Weight update code writes into a per-target delay ring buffer
    pub fn is_dendritic_delay_required(&self) -> bool {
        self.max_dendritic_delay_timesteps > 1
            && (references_placeholder(&self.wu_model.sim_code, "addToInSynDelay")
                || references_placeholder(&self.wu_model.event_code, "addToInSynDelay"))
    }

    pub fn is_true_spike_required(&self) -> bool {
        !self.wu_model.sim_code.is_empty()
    }

    pub fn is_spike_event_required(&self) -> bool {
        !self.wu_model.event_code.is_empty()
    }

    /// The source population evaluates several event conditions, so each
    /// connection must re-test its own condition before processing an event
    pub fn is_event_threshold_retest_required(&self) -> bool {
        self.event_threshold_retest_required
    }

    pub fn is_procedural_connectivity_rng_required(&self) -> bool {
        self.connectivity_initialiser
            .as_ref()
            .map(|c| is_rng_required(&c.snippet.row_build_code))
            .unwrap_or(false)
    }

    pub fn is_wu_init_rng_required(&self) -> bool {
        self.wu_var_initialisers
            .iter()
            .any(|v| is_rng_required(&v.snippet.code))
    }

    /// Index expression into the dendritic delay buffer, ending in `+ ` so the target id can follow
    ///
    /// `offset` is the delay (in steps) of the contribution being written.
    pub fn dendritic_delay_offset(&self, dev_prefix: &str, offset: &str) -> String {
        debug_assert!(self.max_dendritic_delay_timesteps > 1);
        let ptr = format!("{}denDelayPtr{}", dev_prefix, self.ps_target_name());
        if offset.is_empty() {
            format!("({} * {}) + ", ptr, self.trg_num_neurons)
        } else {
            format!(
                "((({} + {}) % {}) * {}) + ",
                ptr, offset, self.max_dendritic_delay_timesteps, self.trg_num_neurons
            )
        }
    }

    pub(crate) fn set_event_threshold_retest_required(&mut self, required: bool) {
        self.event_threshold_retest_required = required;
    }

    pub(crate) fn init_derived_params(&mut self, dt: f64) {
        self.wu_derived_params = compute_derived_params(self.wu_model.as_ref(), &self.wu_params, dt);
        self.ps_derived_params = compute_derived_params(self.ps_model.as_ref(), &self.ps_params, dt);
        for v in &mut self.wu_var_initialisers {
            v.init_derived_params(dt);
        }
        if let Some(c) = &mut self.connectivity_initialiser {
            c.init_derived_params(dt);
        }
    }
}
