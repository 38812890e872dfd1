// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Makefile and build descriptor for a generated build directory

use std::fmt::Write;

use feagi_kernelgen_model::{FinalizedModel, Precision};
use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::code_stream::CodeStream;
use crate::error::Result;

use super::{BUILD_DESCRIPTOR_FILE, DEFINITIONS_HEADER};

/// Shared library the Makefile links
pub const LIBRARY_NAME: &str = "librunner.so";

/// Machine-readable summary of a generated build directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDescriptor {
    pub model: String,
    pub backend: String,
    pub compiler: String,
    pub precision: Precision,
    /// Translation units, relative to the build directory
    pub sources: Vec<String>,
    /// Every generated file, relative to the build directory
    pub files: Vec<String>,
    pub library: String,
    pub generator_version: String,
}

impl BuildDescriptor {
    pub fn new(model: &FinalizedModel, backend: &dyn Backend, modules: &[&str]) -> Self {
        let sources: Vec<String> = modules
            .iter()
            .map(|m| format!("{}.{}", m, backend.source_extension()))
            .collect();

        let mut files = vec![DEFINITIONS_HEADER.to_string()];
        files.extend(sources.iter().cloned());
        files.push("Makefile".to_string());
        files.push(BUILD_DESCRIPTOR_FILE.to_string());

        Self {
            model: model.name().to_string(),
            backend: backend.name().to_string(),
            compiler: backend.compiler_command(),
            precision: model.precision(),
            sources,
            files,
            library: LIBRARY_NAME.to_string(),
            generator_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Makefile building every module in `modules` into [`LIBRARY_NAME`]
pub fn generate_makefile(os: &mut CodeStream, backend: &dyn Backend, modules: &[&str]) -> Result<()> {
    backend.gen_makefile_preamble(os)?;
    writeln!(os)?;

    let objects: Vec<String> = modules.iter().map(|m| format!("{}.o", m)).collect();
    writeln!(os, "OBJECTS := {}", objects.join(" "))?;
    writeln!(os)?;
    writeln!(os, ".PHONY: all clean")?;
    writeln!(os)?;
    writeln!(os, "all: {}", LIBRARY_NAME)?;
    writeln!(os)?;
    writeln!(os, "{}: $(OBJECTS)", LIBRARY_NAME)?;
    backend.gen_makefile_link_rule(os)?;
    writeln!(os)?;
    writeln!(os, "$(OBJECTS): {}", DEFINITIONS_HEADER)?;
    writeln!(os)?;
    backend.gen_makefile_compile_rule(os)?;
    writeln!(os)?;
    writeln!(os, "clean:")?;
    writeln!(os, "\t@rm -f $(OBJECTS) {}", LIBRARY_NAME)?;
    Ok(())
}
