// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Model Assembly
//!
//! Two phases, enforced by type:
//! - [`ModelSpec`]: mutable, populations and connections are added and storage
//!   modes chosen; connections register delay and queue requirements on their
//!   endpoints as they are added.
//! - [`FinalizedModel`]: produced once by [`ModelSpec::finalize`]; derived
//!   parameters are cached and descriptors are read-only. Code generation only
//!   accepts this type.

use ahash::AHashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ModelError, Result};
use crate::neuron_group::NeuronGroup;
use crate::snippets::{NeuronModel, VarInitialiser};
use crate::synapse_group::{SynapseGroup, SynapseGroupParams};
use crate::types::{Precision, VarMode};

/// Model under construction
#[derive(Debug, Clone)]
pub struct ModelSpec {
    name: String,
    dt: f64,
    precision: Precision,
    seed: u64,
    default_var_mode: VarMode,
    neuron_groups: Vec<NeuronGroup>,
    synapse_groups: Vec<SynapseGroup>,
    neuron_index: AHashMap<String, usize>,
    synapse_index: AHashMap<String, usize>,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dt: 0.1,
            precision: Precision::Float,
            seed: 0,
            default_var_mode: VarMode::default(),
            neuron_groups: Vec::new(),
            synapse_groups: Vec::new(),
            neuron_index: AHashMap::new(),
            synapse_index: AHashMap::new(),
        }
    }

    pub fn set_dt(&mut self, dt: f64) -> &mut Self {
        self.dt = dt;
        self
    }

    pub fn set_precision(&mut self, precision: Precision) -> &mut Self {
        self.precision = precision;
        self
    }

    /// Seed for device RNGs; 0 draws one at simulation start
    pub fn set_seed(&mut self, seed: u64) -> &mut Self {
        self.seed = seed;
        self
    }

    /// Storage mode given to populations added after this call
    pub fn set_default_var_mode(&mut self, mode: VarMode) -> &mut Self {
        self.default_var_mode = mode;
        self
    }

    fn check_unique(&self, name: &str) -> Result<()> {
        if self.neuron_index.contains_key(name) || self.synapse_index.contains_key(name) {
            return Err(ModelError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    pub fn add_neuron_population(
        &mut self,
        name: &str,
        num_neurons: usize,
        model: Arc<NeuronModel>,
        params: Vec<f64>,
        var_initialisers: Vec<VarInitialiser>,
    ) -> Result<&mut NeuronGroup> {
        self.check_unique(name)?;

        let group = NeuronGroup::new(
            name,
            num_neurons,
            model,
            params,
            var_initialisers,
            self.default_var_mode,
        )?;

        let index = self.neuron_groups.len();
        self.neuron_groups.push(group);
        self.neuron_index.insert(name.to_string(), index);
        debug!("Added neuron population '{}' ({} neurons)", name, num_neurons);
        Ok(&mut self.neuron_groups[index])
    }

    /// Add a synapse population, registering delay and queue requirements on its endpoints
    pub fn add_synapse_population(&mut self, params: SynapseGroupParams) -> Result<&mut SynapseGroup> {
        self.check_unique(&params.name)?;

        let src_index = self.neuron_group_index(&params.source)?;
        let trg_index = self.neuron_group_index(&params.target)?;
        let src = (src_index, self.neuron_groups[src_index].num_neurons());
        let trg = (trg_index, self.neuron_groups[trg_index].num_neurons());

        let group = SynapseGroup::new(params, src, trg, self.default_var_mode)?;

        // Axonal delay is served from the source population's spike queue
        let source = &mut self.neuron_groups[src_index];
        source.require_delay_slots(group.delay_steps());
        let wu = group.wu_model();
        source.mark_queued_variables(&wu.sim_code);
        source.mark_queued_variables(&wu.event_code);
        source.mark_queued_variables(&wu.event_threshold_condition_code);

        let index = self.synapse_groups.len();
        let name = group.name().to_string();
        self.neuron_groups[src_index].add_out_syn(index);
        self.neuron_groups[trg_index].add_in_syn(index);
        self.synapse_groups.push(group);
        self.synapse_index.insert(name.clone(), index);

        debug!(
            "Added synapse population '{}' ({} -> {})",
            name,
            self.neuron_groups[src_index].name(),
            self.neuron_groups[trg_index].name()
        );
        Ok(&mut self.synapse_groups[index])
    }

    fn neuron_group_index(&self, name: &str) -> Result<usize> {
        self.neuron_index
            .get(name)
            .copied()
            .ok_or_else(|| ModelError::UnknownPopulation(name.to_string()))
    }

    pub fn neuron_group_mut(&mut self, name: &str) -> Result<&mut NeuronGroup> {
        let index = self.neuron_group_index(name)?;
        Ok(&mut self.neuron_groups[index])
    }

    pub fn synapse_group_mut(&mut self, name: &str) -> Result<&mut SynapseGroup> {
        let index = self
            .synapse_index
            .get(name)
            .copied()
            .ok_or_else(|| ModelError::UnknownSynapseGroup(name.to_string()))?;
        Ok(&mut self.synapse_groups[index])
    }

    /// Freeze the model for code generation
    pub fn finalize(mut self) -> Result<FinalizedModel> {
        if !(self.dt > 0.0) {
            return Err(ModelError::InvalidConfiguration(format!(
                "time step must be positive, got {}",
                self.dt
            )));
        }

        let dt = self.dt;
        for ng in &mut self.neuron_groups {
            ng.init_derived_params(dt);
        }

        for sg in &mut self.synapse_groups {
            sg.init_derived_params(dt);

            let wu = sg.wu_model();
            let src = &mut self.neuron_groups[sg.src_index()];

            // Spike-like events are detected in the source population's kernel
            if !wu.event_threshold_condition_code.is_empty() {
                let namespace = if wu.sim_support_code.is_empty() {
                    String::new()
                } else {
                    format!("{}_weightupdate_simCode", sg.name())
                };
                src.add_spike_event_condition(&wu.event_threshold_condition_code, &namespace);
            }

            if wu.sim_code.contains("sT_pre") || wu.event_code.contains("sT_pre") {
                src.set_spike_time_required();
            }
        }

        for sg in &mut self.synapse_groups {
            let retest = !sg.wu_model().event_threshold_condition_code.is_empty()
                && self.neuron_groups[sg.src_index()].spike_event_conditions().len() > 1;
            sg.set_event_threshold_retest_required(retest);
        }

        debug!(
            "Finalized model '{}': {} neuron populations, {} synapse populations",
            self.name,
            self.neuron_groups.len(),
            self.synapse_groups.len()
        );

        Ok(FinalizedModel {
            name: self.name,
            dt: self.dt,
            precision: self.precision,
            seed: self.seed,
            neuron_groups: self.neuron_groups,
            synapse_groups: self.synapse_groups,
            neuron_index: self.neuron_index,
            synapse_index: self.synapse_index,
        })
    }
}

/// A model ready for code generation
#[derive(Debug, Clone)]
pub struct FinalizedModel {
    name: String,
    dt: f64,
    precision: Precision,
    seed: u64,
    neuron_groups: Vec<NeuronGroup>,
    synapse_groups: Vec<SynapseGroup>,
    neuron_index: AHashMap<String, usize>,
    synapse_index: AHashMap<String, usize>,
}

impl FinalizedModel {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Populations in insertion order
    pub fn neuron_groups(&self) -> &[NeuronGroup] {
        &self.neuron_groups
    }

    /// Connections in insertion order
    pub fn synapse_groups(&self) -> &[SynapseGroup] {
        &self.synapse_groups
    }

    pub fn neuron_group(&self, name: &str) -> Result<&NeuronGroup> {
        self.neuron_index
            .get(name)
            .map(|i| &self.neuron_groups[*i])
            .ok_or_else(|| ModelError::UnknownPopulation(name.to_string()))
    }

    pub fn synapse_group(&self, name: &str) -> Result<&SynapseGroup> {
        self.synapse_index
            .get(name)
            .map(|i| &self.synapse_groups[*i])
            .ok_or_else(|| ModelError::UnknownSynapseGroup(name.to_string()))
    }

    pub fn src_neuron_group(&self, sg: &SynapseGroup) -> &NeuronGroup {
        &self.neuron_groups[sg.src_index()]
    }

    pub fn trg_neuron_group(&self, sg: &SynapseGroup) -> &NeuronGroup {
        &self.neuron_groups[sg.trg_index()]
    }

    /// Connections targeting `ng`
    pub fn in_syn<'a>(&'a self, ng: &'a NeuronGroup) -> impl Iterator<Item = &'a SynapseGroup> + 'a {
        ng.in_syn().iter().map(move |i| &self.synapse_groups[*i])
    }

    /// Connections leaving `ng`
    pub fn out_syn<'a>(&'a self, ng: &'a NeuronGroup) -> impl Iterator<Item = &'a SynapseGroup> + 'a {
        ng.out_syn().iter().map(move |i| &self.synapse_groups[*i])
    }

    /// Does `ng`'s update kernel need an RNG, including incoming postsynaptic code?
    pub fn is_neuron_sim_rng_required(&self, ng: &NeuronGroup) -> bool {
        ng.is_sim_rng_required(self.in_syn(ng))
    }

    /// Does any kernel need a per-thread device RNG?
    pub fn is_device_rng_required(&self) -> bool {
        self.neuron_groups
            .iter()
            .any(|ng| self.is_neuron_sim_rng_required(ng) || ng.is_init_rng_required())
            || self
                .synapse_groups
                .iter()
                .any(|sg| sg.is_wu_init_rng_required() || sg.is_procedural_connectivity_rng_required())
    }

    pub fn is_zero_copy_enabled(&self) -> bool {
        self.neuron_groups.iter().any(|ng| ng.is_zero_copy_enabled())
            || self.synapse_groups.iter().any(|sg| {
                sg.in_syn_location().is_zero_copy()
                    || sg.wu_var_modes().iter().any(|m| m.is_zero_copy())
            })
    }

    /// `scalar` literal for `value` in this model's precision
    pub fn scalar_expr(&self, value: f64) -> String {
        crate::utils::scalar_literal(value, self.precision)
    }

    /// Synapse groups with spike-like event code whose source is `ng`, used by its event conditions
    pub fn spike_event_sources<'a>(
        &'a self,
        ng: &'a NeuronGroup,
    ) -> impl Iterator<Item = &'a SynapseGroup> + 'a {
        self.out_syn(ng)
            .filter(|sg| !sg.wu_model().event_threshold_condition_code.is_empty())
    }
}
