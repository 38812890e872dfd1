// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Neuron Population Descriptor
//!
//! Resolved runtime shape of one neuron population: variable storage, delay
//! queue depth, which variables need time-indexed copies and which spike-like
//! event conditions the population evaluates on behalf of its outgoing
//! connections.
//!
//! ## Lifecycle
//! ```text
//! ModelSpec::add_neuron_population  -> created, 1 delay slot
//! ModelSpec::add_synapse_population -> source/target raise delay slots, flag queued vars
//! ModelSpec::finalize               -> derived params cached, descriptor frozen
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::{ModelError, Result};
use crate::snippets::{compute_derived_params, named_values, NeuronModel, VarInitialiser};
use crate::synapse_group::SynapseGroup;
use crate::types::{VarLocation, VarMode};
use crate::utils::{is_rng_required, pad_size, references_placeholder};

/// One spike-like event condition: code plus the support-code namespace it needs
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpikeEventCondition {
    pub code: String,
    pub support_namespace: String,
}

/// A homogeneous population of neurons
#[derive(Debug, Clone)]
pub struct NeuronGroup {
    name: String,
    num_neurons: usize,
    model: Arc<NeuronModel>,
    params: Vec<f64>,
    derived_params: Vec<f64>,
    var_initialisers: Vec<VarInitialiser>,
    var_modes: Vec<VarMode>,
    var_queue_required: Vec<bool>,
    num_delay_slots: usize,
    spike_event_conditions: BTreeSet<SpikeEventCondition>,
    spike_location: VarLocation,
    spike_event_location: VarLocation,
    spike_time_location: VarLocation,
    spike_time_required: bool,
    in_syn: Vec<usize>,
    out_syn: Vec<usize>,
}

impl NeuronGroup {
    pub(crate) fn new(
        name: impl Into<String>,
        num_neurons: usize,
        model: Arc<NeuronModel>,
        params: Vec<f64>,
        var_initialisers: Vec<VarInitialiser>,
        default_var_mode: VarMode,
    ) -> Result<Self> {
        let name = name.into();
        if params.len() != model.param_names.len() {
            return Err(ModelError::ParamCountMismatch {
                owner: name,
                snippet: "neuron model".to_string(),
                expected: model.param_names.len(),
                actual: params.len(),
            });
        }
        if var_initialisers.len() != model.vars.len() {
            return Err(ModelError::VarInitCountMismatch {
                owner: name,
                expected: model.vars.len(),
                actual: var_initialisers.len(),
            });
        }

        let num_vars = model.vars.len();
        Ok(Self {
            name,
            num_neurons,
            model,
            params,
            derived_params: Vec::new(),
            var_initialisers,
            var_modes: vec![default_var_mode; num_vars],
            var_queue_required: vec![false; num_vars],
            num_delay_slots: 1,
            spike_event_conditions: BTreeSet::new(),
            spike_location: default_var_mode.location,
            spike_event_location: default_var_mode.location,
            spike_time_location: default_var_mode.location,
            spike_time_required: false,
            in_syn: Vec::new(),
            out_syn: Vec::new(),
        })
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_neurons(&self) -> usize {
        self.num_neurons
    }

    pub fn model(&self) -> &NeuronModel {
        &self.model
    }

    pub fn params(&self) -> &[f64] {
        &self.params
    }

    pub fn derived_params(&self) -> &[f64] {
        &self.derived_params
    }

    /// `(name, value)` for every declared and derived parameter
    pub fn named_params(&self) -> Vec<(&str, f64)> {
        named_values(self.model.as_ref(), &self.params, &self.derived_params)
    }

    pub fn var_initialisers(&self) -> &[VarInitialiser] {
        &self.var_initialisers
    }

    // ------------------------------------------------------------------
    // Delay queue
    // ------------------------------------------------------------------

    /// Make room for a consumer reading this population `delay_steps` steps in the past
    ///
    /// Monotone: the slot count becomes `max(current, delay_steps + 1)`.
    pub fn require_delay_slots(&mut self, delay_steps: usize) {
        if delay_steps >= self.num_delay_slots {
            self.num_delay_slots = delay_steps + 1;
        }
    }

    pub fn num_delay_slots(&self) -> usize {
        self.num_delay_slots
    }

    pub fn is_delay_required(&self) -> bool {
        self.num_delay_slots > 1
    }

    /// Flag every variable `v` referenced as `v_pre` in `code` as needing a per-slot copy
    pub fn mark_queued_variables(&mut self, code: &str) {
        for (i, var) in self.model.vars.iter().enumerate() {
            if code.contains(&format!("{}_pre", var.name)) {
                self.var_queue_required[i] = true;
            }
        }
    }

    pub fn is_var_queue_required(&self, var_name: &str) -> Result<bool> {
        Ok(self.var_queue_required[self.var_index(var_name)?])
    }

    pub fn any_var_queues_required(&self) -> bool {
        self.var_queue_required.iter().any(|q| *q)
    }

    /// `(<prefix>spkQuePtr<name> * N) + ` when delayed, empty otherwise
    pub fn queue_offset(&self, dev_prefix: &str) -> String {
        if self.is_delay_required() {
            format!(
                "({}spkQuePtr{} * {}) + ",
                dev_prefix, self.name, self.num_neurons
            )
        } else {
            String::new()
        }
    }

    // ------------------------------------------------------------------
    // Storage
    // ------------------------------------------------------------------

    fn var_index(&self, var_name: &str) -> Result<usize> {
        self.model
            .var_index(var_name)
            .ok_or_else(|| ModelError::UnknownVariable {
                owner: format!("neuron population '{}'", self.name),
                variable: var_name.to_string(),
            })
    }

    pub fn var_mode(&self, var_name: &str) -> Result<VarMode> {
        Ok(self.var_modes[self.var_index(var_name)?])
    }

    pub fn set_var_mode(&mut self, var_name: &str, mode: VarMode) -> Result<()> {
        let index = self.var_index(var_name)?;
        self.var_modes[index] = mode;
        Ok(())
    }

    pub fn var_modes(&self) -> &[VarMode] {
        &self.var_modes
    }

    pub fn spike_location(&self) -> VarLocation {
        self.spike_location
    }

    pub fn set_spike_location(&mut self, location: VarLocation) {
        self.spike_location = location;
    }

    pub fn spike_event_location(&self) -> VarLocation {
        self.spike_event_location
    }

    pub fn set_spike_event_location(&mut self, location: VarLocation) {
        self.spike_event_location = location;
    }

    pub fn spike_time_location(&self) -> VarLocation {
        self.spike_time_location
    }

    pub fn set_spike_time_location(&mut self, location: VarLocation) {
        self.spike_time_location = location;
    }

    pub fn is_spike_time_required(&self) -> bool {
        self.spike_time_required
    }

    pub(crate) fn set_spike_time_required(&mut self) {
        self.spike_time_required = true;
    }

    /// True if any variable or any spike buffer is zero-copy
    pub fn is_zero_copy_enabled(&self) -> bool {
        if self.spike_location.is_zero_copy()
            || self.spike_event_location.is_zero_copy()
            || self.spike_time_location.is_zero_copy()
        {
            return true;
        }

        self.var_modes.iter().any(|m| m.is_zero_copy())
    }

    // ------------------------------------------------------------------
    // Spike-like events
    // ------------------------------------------------------------------

    pub fn add_spike_event_condition(&mut self, code: &str, support_namespace: &str) {
        self.spike_event_conditions.insert(SpikeEventCondition {
            code: code.to_string(),
            support_namespace: support_namespace.to_string(),
        });
    }

    pub fn spike_event_conditions(&self) -> &BTreeSet<SpikeEventCondition> {
        &self.spike_event_conditions
    }

    pub fn is_spike_event_required(&self) -> bool {
        !self.spike_event_conditions.is_empty()
    }

    /// Does any event condition reference parameter `param_name` (in its non-uniquified form)?
    pub fn is_param_required_by_spike_event_condition(&self, param_name: &str) -> bool {
        self.spike_event_conditions
            .iter()
            .any(|c| c.code.contains(param_name))
    }

    // ------------------------------------------------------------------
    // Code requirements
    // ------------------------------------------------------------------

    /// Does this population's update kernel draw random numbers?
    ///
    /// Postsynaptic apply-input and decay code of incoming connections executes
    /// inside this population's kernel, so it is scanned too.
    pub fn is_sim_rng_required<'a, I>(&self, incoming: I) -> bool
    where
        I: IntoIterator<Item = &'a SynapseGroup>,
    {
        if is_rng_required(&self.model.sim_code)
            || is_rng_required(&self.model.threshold_condition_code)
            || is_rng_required(&self.model.reset_code)
        {
            return true;
        }

        incoming.into_iter().any(|sg| {
            is_rng_required(&sg.ps_model().apply_input_code)
                || is_rng_required(&sg.ps_model().decay_code)
        })
    }

    pub fn is_init_code_required(&self) -> bool {
        self.var_initialisers.iter().any(|v| v.has_code())
    }

    pub fn is_init_rng_required(&self) -> bool {
        self.var_initialisers
            .iter()
            .any(|v| is_rng_required(&v.snippet.code))
    }

    /// Register extra global parameters referenced by update code as kernel parameters
    ///
    /// Keys are the uniquified names (`<param><population>`), values the types.
    pub fn kernel_extra_global_params(&self, kernel_params: &mut BTreeMap<String, String>) {
        for egp in &self.model.extra_global_params {
            let full_name = format!("{}{}", egp.name, self.name);
            if kernel_params.contains_key(&full_name) {
                continue;
            }

            let used = references_placeholder(&self.model.sim_code, &egp.name)
                || references_placeholder(&self.model.threshold_condition_code, &egp.name)
                || references_placeholder(&self.model.reset_code, &egp.name);
            if used {
                kernel_params.insert(full_name, egp.ty.clone());
            }
        }
    }

    // ------------------------------------------------------------------
    // Kernel layout
    // ------------------------------------------------------------------

    /// Place this population after `id_start` in a kernel with `block_size` wide blocks
    ///
    /// Advances both cursors and returns the `(start, end)` id range and the
    /// padded range; padded ranges are whole blocks, so a block never spans two
    /// populations.
    pub fn calc_sizes(
        &self,
        block_size: usize,
        id_start: &mut usize,
        padded_id_start: &mut usize,
    ) -> ((usize, usize), (usize, usize)) {
        let id_range = (*id_start, *id_start + self.num_neurons);
        let padded_id_range = (
            *padded_id_start,
            *padded_id_start + pad_size(self.num_neurons, block_size),
        );

        *id_start = id_range.1;
        *padded_id_start = padded_id_range.1;
        (id_range, padded_id_range)
    }

    // ------------------------------------------------------------------
    // Wiring
    // ------------------------------------------------------------------

    pub(crate) fn add_in_syn(&mut self, synapse_group: usize) {
        self.in_syn.push(synapse_group);
    }

    pub(crate) fn add_out_syn(&mut self, synapse_group: usize) {
        self.out_syn.push(synapse_group);
    }

    /// Indices of connections targeting this population
    pub fn in_syn(&self) -> &[usize] {
        &self.in_syn
    }

    /// Indices of connections leaving this population
    pub fn out_syn(&self) -> &[usize] {
        &self.out_syn
    }

    pub(crate) fn init_derived_params(&mut self, dt: f64) {
        self.derived_params = compute_derived_params(self.model.as_ref(), &self.params, dt);
        for v in &mut self.var_initialisers {
            v.init_derived_params(dt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snippets::{ExtraGlobalParam, Var};
    use crate::types::{InitLocation, VarLocation};

    fn lif() -> Arc<NeuronModel> {
        Arc::new(NeuronModel {
            param_names: vec!["tau".to_string(), "vthresh".to_string()],
            vars: vec![Var::new("V", "scalar"), Var::new("RefracTime", "scalar")],
            extra_global_params: vec![ExtraGlobalParam::new("input", "scalar")],
            sim_code: "$(V) += $(Isyn) + $(input);".to_string(),
            threshold_condition_code: "$(V) >= $(vthresh)".to_string(),
            reset_code: "$(V) = 0.0;".to_string(),
            ..Default::default()
        })
    }

    fn group() -> NeuronGroup {
        NeuronGroup::new(
            "Exc",
            10,
            lif(),
            vec![20.0, 1.0],
            vec![VarInitialiser::constant(0.0), VarInitialiser::constant(0.0)],
            VarMode::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_delay_slots_are_monotone() {
        let mut ng = group();
        assert_eq!(ng.num_delay_slots(), 1);
        assert!(!ng.is_delay_required());

        for d in [2, 5, 1] {
            ng.require_delay_slots(d);
        }
        assert_eq!(ng.num_delay_slots(), 6);

        ng.require_delay_slots(5);
        assert_eq!(ng.num_delay_slots(), 6);
        assert!(ng.is_delay_required());
    }

    #[test]
    fn test_queued_variables() {
        let mut ng = group();
        ng.mark_queued_variables("$(g) * $(V_pre)");
        assert!(ng.is_var_queue_required("V").unwrap());
        assert!(!ng.is_var_queue_required("RefracTime").unwrap());
        assert!(ng.any_var_queues_required());
        assert!(ng.is_var_queue_required("U").is_err());
    }

    #[test]
    fn test_var_mode_unknown_name_fails() {
        let mut ng = group();
        let err = ng
            .set_var_mode("W", VarMode::HOST_INIT_HOST)
            .unwrap_err();
        assert!(matches!(err, ModelError::UnknownVariable { .. }));
        ng.set_var_mode("V", VarMode::HOST_INIT_HOST).unwrap();
        assert_eq!(ng.var_mode("V").unwrap(), VarMode::HOST_INIT_HOST);
    }

    #[test]
    fn test_zero_copy_detection() {
        let mut ng = group();
        assert!(!ng.is_zero_copy_enabled());

        ng.set_spike_time_location(VarLocation::HOST_DEVICE_ZERO_COPY);
        assert!(ng.is_zero_copy_enabled());

        let mut ng = group();
        ng.set_var_mode(
            "RefracTime",
            VarMode::new(VarLocation::HOST_DEVICE_ZERO_COPY, InitLocation::Host),
        )
        .unwrap();
        assert!(ng.is_zero_copy_enabled());
    }

    #[test]
    fn test_extra_global_params_registered_when_used() {
        let ng = group();
        let mut params = BTreeMap::new();
        ng.kernel_extra_global_params(&mut params);
        assert_eq!(params.get("inputExc").map(String::as_str), Some("scalar"));
    }

    #[test]
    fn test_queue_offset_and_sizes() {
        let mut ng = group();
        assert_eq!(ng.queue_offset("dd_"), "");
        ng.require_delay_slots(3);
        assert_eq!(ng.queue_offset("dd_"), "(dd_spkQuePtrExc * 10) + ");

        let (mut start, mut padded) = (5, 32);
        let (ids, padded_ids) = ng.calc_sizes(32, &mut start, &mut padded);
        assert_eq!(ids, (5, 15));
        assert_eq!(padded_ids, (32, 64));
        assert_eq!((start, padded), (15, 64));
    }

    #[test]
    fn test_param_count_mismatch() {
        let err = NeuronGroup::new(
            "Bad",
            1,
            lif(),
            vec![1.0],
            vec![VarInitialiser::constant(0.0), VarInitialiser::constant(0.0)],
            VarMode::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::ParamCountMismatch { expected: 2, actual: 1, .. }));
    }
}
