// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Built-in demonstration network
//!
//! An excitatory/inhibitory network driven by a Poisson input population.
//! Its connections cover every connectivity representation and span type
//! the generator supports, plus axonal and dendritic delays and spike-like
//! events, so generating it touches every code path.

use std::sync::Arc;

use feagi_kernelgen_model::{
    ConnectivityInitialiser, ConnectivitySnippet, DerivedParam, ModelSpec, NeuronModel,
    PostsynapticModel, Result, SpanType, SynapseGroupParams, SynapseMatrixConnectivity, Var,
    VarInitSnippet, VarInitialiser, WeightUpdateModel,
};

pub const EXCITATORY: &str = "Exc";
pub const INHIBITORY: &str = "Inh";
pub const INPUT: &str = "Input";

pub const NUM_EXCITATORY: usize = 800;
pub const NUM_INHIBITORY: usize = 200;
pub const NUM_INPUT: usize = 100;

/// Leaky integrate-and-fire neuron
///
/// Params: `TauM`, `Vrest`, `Vreset`, `Vthresh`, `Rmembrane`
pub fn lif() -> Arc<NeuronModel> {
    Arc::new(NeuronModel {
        param_names: ["TauM", "Vrest", "Vreset", "Vthresh", "Rmembrane"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        derived_params: vec![DerivedParam::new("ExpTC", |p, dt| (-dt / p[0]).exp())],
        vars: vec![Var::new("V", "scalar")],
        sim_code: "$(V) = $(Vrest) + ($(V) - $(Vrest)) * $(ExpTC) + $(Isyn) * $(Rmembrane) * (1.0 - $(ExpTC));"
            .to_string(),
        threshold_condition_code: "$(V) >= $(Vthresh)".to_string(),
        reset_code: "$(V) = $(Vreset);".to_string(),
        ..Default::default()
    })
}

/// Poisson spike source; `rate` in Hz
pub fn poisson() -> Arc<NeuronModel> {
    Arc::new(NeuronModel {
        param_names: vec!["rate".to_string()],
        derived_params: vec![DerivedParam::new("probSpike", |p, dt| p[0] * dt / 1000.0)],
        threshold_condition_code: "$(gennrand_uniform) < $(probSpike)".to_string(),
        ..Default::default()
    })
}

/// Pulse with a per-synapse weight `g`
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

/// Graded transmission while the source is above `Epre`
pub fn graded_pulse() -> Arc<WeightUpdateModel> {
    Arc::new(WeightUpdateModel {
        param_names: vec!["g".to_string(), "Epre".to_string()],
        event_code: "$(addToInSyn, $(g));".to_string(),
        event_threshold_condition_code: "$(V_pre) > $(Epre)".to_string(),
        ..Default::default()
    })
}

/// Pulse arriving `d` time steps late through the dendritic delay buffer
pub fn dendritic_pulse() -> Arc<WeightUpdateModel> {
    Arc::new(WeightUpdateModel {
        vars: vec![Var::new("g", "scalar"), Var::new("d", "uint8_t")],
        sim_code: "$(addToInSynDelay, $(g), $(d));".to_string(),
        ..Default::default()
    })
}

/// Exponentially decaying current; `tau` in ms
pub fn exp_curr() -> Arc<PostsynapticModel> {
    Arc::new(PostsynapticModel {
        param_names: vec!["tau".to_string()],
        derived_params: vec![DerivedParam::new("expDecay", |p, dt| (-dt / p[0]).exp())],
        apply_input_code: "$(Isyn) += $(inSyn);".to_string(),
        decay_code: "$(inSyn) *= $(expDecay);".to_string(),
        ..Default::default()
    })
}

/// Each target joins the row with probability `prob`
pub fn fixed_probability(prob: f64) -> ConnectivityInitialiser {
    ConnectivityInitialiser::new(
        Arc::new(ConnectivitySnippet {
            param_names: vec!["prob".to_string()],
            derived_params: Vec::new(),
            row_build_code: concat!(
                "for (unsigned int j = 0; j < $(num_post); j++) {\n",
                "    if ($(gennrand_uniform) < $(prob)) {\n",
                "        $(addSynapse, $(id_post_begin) + j);\n",
                "    }\n",
                "}"
            )
            .to_string(),
        }),
        vec![prob],
    )
}

fn lif_params() -> Vec<f64> {
    vec![20.0, -65.0, -65.0, -50.0, 20.0]
}

#[allow(clippy::too_many_arguments)]
fn connection(
    name: &str,
    source: &str,
    target: &str,
    connectivity: SynapseMatrixConnectivity,
    span_type: SpanType,
    wu_model: Arc<WeightUpdateModel>,
    wu_params: Vec<f64>,
    wu_var_initialisers: Vec<VarInitialiser>,
) -> SynapseGroupParams {
    SynapseGroupParams {
        name: name.to_string(),
        source: source.to_string(),
        target: target.to_string(),
        connectivity,
        span_type,
        delay_steps: 0,
        wu_model,
        wu_params,
        wu_var_initialisers,
        ps_model: exp_curr(),
        ps_params: vec![5.0],
        connectivity_initialiser: None,
    }
}

/// Build the demonstration network, ready for time step and precision settings
pub fn build_demo_model(name: &str) -> Result<ModelSpec> {
    let mut spec = ModelSpec::new(name);

    let v_init = || VarInitialiser::new(VarInitSnippet::uniform(), vec![-65.0, -55.0]);
    spec.add_neuron_population(EXCITATORY, NUM_EXCITATORY, lif(), lif_params(), vec![v_init()])?;
    spec.add_neuron_population(INHIBITORY, NUM_INHIBITORY, lif(), lif_params(), vec![v_init()])?;
    spec.add_neuron_population(INPUT, NUM_INPUT, poisson(), vec![20.0], vec![])?;

    // Recurrent excitation: sparse rows, one thread per target
    spec.add_synapse_population(connection(
        "ExcExc",
        EXCITATORY,
        EXCITATORY,
        SynapseMatrixConnectivity::Sparse,
        SpanType::Postsynaptic,
        static_pulse(),
        vec![],
        vec![VarInitialiser::constant(0.05)],
    ))?
    .set_max_connections(80)?;

    // Dense with a two step axonal delay
    let mut exc_inh = connection(
        "ExcInh",
        EXCITATORY,
        INHIBITORY,
        SynapseMatrixConnectivity::Dense,
        SpanType::Postsynaptic,
        static_pulse(),
        vec![],
        vec![VarInitialiser::constant(0.05)],
    );
    exc_inh.delay_steps = 2;
    spec.add_synapse_population(exc_inh)?;

    // Graded inhibition on spike-like events
    spec.add_synapse_population(connection(
        "InhExc",
        INHIBITORY,
        EXCITATORY,
        SynapseMatrixConnectivity::Bitmask,
        SpanType::Postsynaptic,
        graded_pulse(),
        vec![-0.25, -55.0],
        vec![],
    ))?;

    // Input rows split over several threads per spike
    let input_exc = spec.add_synapse_population(connection(
        "InputExc",
        INPUT,
        EXCITATORY,
        SynapseMatrixConnectivity::Sparse,
        SpanType::Presynaptic,
        static_pulse(),
        vec![],
        vec![VarInitialiser::new(VarInitSnippet::uniform(), vec![0.05, 0.15])],
    ))?;
    input_exc.set_max_connections(40)?;
    input_exc.set_num_threads_per_spike(4)?;

    // Rows regenerated on every spike
    let mut input_inh = connection(
        "InputInh",
        INPUT,
        INHIBITORY,
        SynapseMatrixConnectivity::Procedural,
        SpanType::Presynaptic,
        global_pulse(),
        vec![0.1],
        vec![],
    );
    input_inh.connectivity_initialiser = Some(fixed_probability(0.1));
    spec.add_synapse_population(input_inh)?.set_max_connections(40)?;

    // Recurrent inhibition through the dendritic delay buffer
    let inh_inh = spec.add_synapse_population(connection(
        "InhInh",
        INHIBITORY,
        INHIBITORY,
        SynapseMatrixConnectivity::Sparse,
        SpanType::Postsynaptic,
        dendritic_pulse(),
        vec![],
        vec![VarInitialiser::constant(-0.1), VarInitialiser::constant(3.0)],
    ))?;
    inh_inh.set_max_connections(20)?;
    inh_inh.set_max_dendritic_delay_timesteps(4);

    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_model_covers_every_representation() {
        let model = build_demo_model("demo").unwrap().finalize().unwrap();

        assert_eq!(model.neuron_groups().len(), 3);
        assert_eq!(model.synapse_groups().len(), 6);

        let representations: Vec<_> = model
            .synapse_groups()
            .iter()
            .map(|sg| (sg.connectivity(), sg.span_type()))
            .collect();
        assert!(representations.contains(&(SynapseMatrixConnectivity::Dense, SpanType::Postsynaptic)));
        assert!(representations.contains(&(SynapseMatrixConnectivity::Bitmask, SpanType::Postsynaptic)));
        assert!(representations.contains(&(SynapseMatrixConnectivity::Sparse, SpanType::Postsynaptic)));
        assert!(representations.contains(&(SynapseMatrixConnectivity::Sparse, SpanType::Presynaptic)));
        assert!(representations.contains(&(SynapseMatrixConnectivity::Procedural, SpanType::Presynaptic)));
    }

    #[test]
    fn test_demo_delays_and_events() {
        let model = build_demo_model("demo").unwrap().finalize().unwrap();

        assert!(model.synapse_group("InhInh").unwrap().is_dendritic_delay_required());
        assert!(!model.synapse_group("ExcExc").unwrap().is_dendritic_delay_required());
        assert!(model.neuron_group(EXCITATORY).unwrap().is_delay_required());
        assert!(model.neuron_group(INHIBITORY).unwrap().is_spike_event_required());
        assert!(model.synapse_group("InputInh").unwrap().is_procedural_connectivity_rng_required());
        assert!(model.is_device_rng_required());
    }

    #[test]
    fn test_demo_sizes() {
        let model = build_demo_model("demo").unwrap().finalize().unwrap();
        let input_exc = model.synapse_group("InputExc").unwrap();
        assert_eq!(input_exc.src_num_neurons(), NUM_INPUT);
        assert_eq!(input_exc.trg_num_neurons(), NUM_EXCITATORY);
        assert_eq!(input_exc.max_connections(), 40);
        assert_eq!(input_exc.num_threads_per_spike(), 4);
    }
}
