// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*
 * Copyright 2025 Neuraville Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 */

//! # Source Generators
//!
//! The generators own the model-specific half of code generation: they turn
//! neuron, weight update, postsynaptic and initialisation snippets into
//! handler bodies, and hand those handlers to a [`Backend`] which wraps them
//! into kernels or loops.
//!
//! [`generate_all`] writes one complete build directory:
//!
//! | File | Contents |
//! |------|----------|
//! | `definitions.h` | scalar type, macros, buffer and function declarations |
//! | `neuronUpdate.<ext>` | neuron update |
//! | `synapseUpdate.<ext>` | presynaptic (synapse) update |
//! | `init.<ext>` | `initialize()` and the device initialisation kernel |
//! | `runner.<ext>` | buffer definitions, allocation, transfers, `stepTime()` |
//! | `Makefile` | builds `librunner.so` |
//! | `build.json` | [`BuildDescriptor`] for tooling |

pub mod init;
pub mod makefile;
pub mod neuron_update;
pub mod runner;
pub mod synapse_update;

pub use makefile::BuildDescriptor;

use std::fmt::Write;
use std::fs;
use std::path::Path;

use feagi_kernelgen_model::{FinalizedModel, NeuronGroup};
use tracing::{debug, info};

use crate::backend::Backend;
use crate::code_stream::CodeStream;
use crate::error::Result;
use crate::substitutions::Substitutions;

/// Translation units, in link order, without extension
pub const MODULES: [&str; 4] = ["neuronUpdate", "synapseUpdate", "init", "runner"];

pub const DEFINITIONS_HEADER: &str = "definitions.h";

pub const BUILD_DESCRIPTOR_FILE: &str = "build.json";

/// Generate every source file for `model` into `out_dir`, creating it if needed
pub fn generate_all(
    model: &FinalizedModel,
    backend: &dyn Backend,
    out_dir: &Path,
) -> Result<BuildDescriptor> {
    info!(
        "Generating {} code for model '{}' into {}",
        backend.name(),
        model.name(),
        out_dir.display()
    );
    fs::create_dir_all(out_dir)?;
    let ext = backend.source_extension();

    let mut os = CodeStream::new();
    neuron_update::generate_neuron_update(&mut os, model, backend)?;
    write_file(out_dir, &format!("neuronUpdate.{}", ext), os)?;

    let mut os = CodeStream::new();
    synapse_update::generate_synapse_update(&mut os, model, backend)?;
    write_file(out_dir, &format!("synapseUpdate.{}", ext), os)?;

    let mut os = CodeStream::new();
    init::generate_init(&mut os, model, backend)?;
    write_file(out_dir, &format!("init.{}", ext), os)?;

    let mut definitions = CodeStream::new();
    let mut os = CodeStream::new();
    runner::generate_runner(&mut definitions, &mut os, model, backend)?;
    write_file(out_dir, DEFINITIONS_HEADER, definitions)?;
    write_file(out_dir, &format!("runner.{}", ext), os)?;

    let mut os = CodeStream::new();
    makefile::generate_makefile(&mut os, backend, &MODULES)?;
    write_file(out_dir, "Makefile", os)?;

    let descriptor = BuildDescriptor::new(model, backend, &MODULES);
    fs::write(
        out_dir.join(BUILD_DESCRIPTOR_FILE),
        serde_json::to_string_pretty(&descriptor)?,
    )?;

    info!(
        "Generated {} files for model '{}'",
        descriptor.files.len(),
        model.name()
    );
    Ok(descriptor)
}

fn write_file(out_dir: &Path, file_name: &str, os: CodeStream) -> Result<()> {
    let path = out_dir.join(file_name);
    let text = os.into_string()?;
    debug!("Writing {} ({} bytes)", path.display(), text.len());
    fs::write(&path, text)?;
    Ok(())
}

/// Is `var_name` of `ng` held in a per-slot delay queue?
pub(crate) fn is_var_queued(ng: &NeuronGroup, var_name: &str) -> Result<bool> {
    Ok(ng.is_delay_required() && ng.is_var_queue_required(var_name)?)
}

/// Header include and support code namespaces shared by the kernel translation units
pub(crate) fn gen_unit_preamble(os: &mut CodeStream, model: &FinalizedModel) -> Result<()> {
    writeln!(os, "#include \"{}\"", DEFINITIONS_HEADER)?;
    writeln!(os)?;

    let precision = model.precision();
    for ng in model.neuron_groups() {
        let code = &ng.model().support_code;
        if !code.is_empty() {
            let mut subs = Substitutions::new();
            subs.add_param_value_substitution(ng.named_params(), precision)?;
            gen_support_namespace(os, &format!("{}_neuron", ng.name()), &subs.apply(code)?)?;
        }
    }
    for sg in model.synapse_groups() {
        let code = &sg.wu_model().sim_support_code;
        if !code.is_empty() {
            let mut subs = Substitutions::new();
            subs.add_param_value_substitution(sg.wu_named_params(), precision)?;
            gen_support_namespace(
                os,
                &format!("{}_weightupdate_simCode", sg.name()),
                &subs.apply(code)?,
            )?;
        }
    }
    Ok(())
}

fn gen_support_namespace(os: &mut CodeStream, name: &str, code: &str) -> Result<()> {
    write!(os, "namespace {}", name)?;
    os.scope(|os| {
        writeln!(os, "{}", code)?;
        Ok(())
    })?;
    writeln!(os)?;
    Ok(())
}
