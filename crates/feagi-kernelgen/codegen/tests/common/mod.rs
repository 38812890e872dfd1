// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures for code generation tests

#![allow(dead_code)]

use std::sync::Arc;

use feagi_kernelgen_codegen::{CudaBackend, CudaPreferences};
use feagi_kernelgen_model::*;

pub fn lif() -> Arc<NeuronModel> {
    Arc::new(NeuronModel {
        vars: vec![Var::new("V", "scalar")],
        sim_code: "$(V) += $(Isyn);".to_string(),
        threshold_condition_code: "$(V) >= 1.0".to_string(),
        reset_code: "$(V) = 0.0;".to_string(),
        ..Default::default()
    })
}

pub fn static_pulse() -> Arc<WeightUpdateModel> {
    Arc::new(WeightUpdateModel {
        vars: vec![Var::new("g", "scalar")],
        sim_code: "$(addToInSyn, $(g));".to_string(),
        ..Default::default()
    })
}

/// Pulse with one weight `g` shared by every synapse
pub fn global_pulse() -> Arc<WeightUpdateModel> {
    Arc::new(WeightUpdateModel {
        param_names: vec!["g".to_string()],
        sim_code: "$(addToInSyn, $(g));".to_string(),
        ..Default::default()
    })
}

/// Static pulse delivered through the dendritic delay buffer
pub fn delayed_pulse() -> Arc<WeightUpdateModel> {
    Arc::new(WeightUpdateModel {
        vars: vec![Var::new("g", "scalar")],
        sim_code: "$(addToInSynDelay, $(g), 2);".to_string(),
        ..Default::default()
    })
}

pub fn delta_curr() -> Arc<PostsynapticModel> {
    Arc::new(PostsynapticModel {
        apply_input_code: "$(Isyn) += $(inSyn);".to_string(),
        decay_code: "$(inSyn) = 0;".to_string(),
        ..Default::default()
    })
}

/// Every target of the row, in order
pub fn all_to_all_rows() -> ConnectivityInitialiser {
    ConnectivityInitialiser::new(
        Arc::new(ConnectivitySnippet {
            row_build_code: "for (unsigned int j = 0; j < $(num_post); j++) { $(addSynapse, $(id_post_begin) + j); }"
                .to_string(),
            ..Default::default()
        }),
        vec![],
    )
}

/// Each target joins the row with probability `prob`, drawn from the connectivity RNG
pub fn random_rows(prob: f64) -> ConnectivityInitialiser {
    ConnectivityInitialiser::new(
        Arc::new(ConnectivitySnippet {
            param_names: vec!["prob".to_string()],
            row_build_code: concat!(
                "for (unsigned int j = 0; j < $(num_post); j++) {\n",
                "    if ($(gennrand_uniform) < $(prob)) { $(addSynapse, $(id_post_begin) + j); }\n",
                "}"
            )
            .to_string(),
            ..Default::default()
        }),
        vec![prob],
    )
}

/// Transmits on spike-like events while the source voltage is above `threshold`
pub fn graded_pulse(threshold: &str) -> Arc<WeightUpdateModel> {
    Arc::new(WeightUpdateModel {
        vars: vec![Var::new("g", "scalar")],
        event_code: "$(addToInSyn, $(g));".to_string(),
        event_threshold_condition_code: format!("$(V_pre) > {}", threshold),
        ..Default::default()
    })
}

pub fn connection(
    name: &str,
    connectivity: SynapseMatrixConnectivity,
    span_type: SpanType,
) -> SynapseGroupParams {
    SynapseGroupParams {
        name: name.to_string(),
        source: "Pre".to_string(),
        target: "Post".to_string(),
        connectivity,
        span_type,
        delay_steps: 0,
        wu_model: static_pulse(),
        wu_params: vec![],
        wu_var_initialisers: vec![VarInitialiser::constant(0.5)],
        ps_model: delta_curr(),
        ps_params: vec![],
        connectivity_initialiser: if connectivity == SynapseMatrixConnectivity::Procedural {
            Some(all_to_all_rows())
        } else {
            None
        },
    }
}

/// `Pre` (10 neurons) and `Post` (`post_size` neurons), unconnected
pub fn two_populations(post_size: usize) -> ModelSpec {
    let mut model = ModelSpec::new("test");
    model
        .add_neuron_population("Pre", 10, lif(), vec![], vec![VarInitialiser::constant(0.0)])
        .unwrap();
    model
        .add_neuron_population("Post", post_size, lif(), vec![], vec![VarInitialiser::constant(0.0)])
        .unwrap();
    model
}

/// A model with a single `Pre -> Post` connection named `Syn`
pub fn single_connection(
    connectivity: SynapseMatrixConnectivity,
    span_type: SpanType,
    post_size: usize,
) -> ModelSpec {
    let mut model = two_populations(post_size);
    model
        .add_synapse_population(connection("Syn", connectivity, span_type))
        .unwrap();
    model
}

pub fn cuda(capability_major: u32) -> CudaBackend {
    CudaBackend::new(CudaPreferences {
        capability_major,
        capability_minor: 0,
        ..Default::default()
    })
    .unwrap()
}
