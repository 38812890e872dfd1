// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Kernel categories and their block sizes
//!
//! A [`Kernel`] is passed explicitly wherever a backend or a strategy needs to
//! know which kernel it is sizing (e.g. the shared-memory accumulator of the
//! presynaptic update kernel holds one entry per thread of its block).

use serde::{Deserialize, Serialize};

/// Kernels a parallel backend emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kernel {
    NeuronUpdate,
    PresynapticUpdate,
    Initialize,
    PreNeuronReset,
}

impl Kernel {
    pub const ALL: [Kernel; 4] = [
        Kernel::NeuronUpdate,
        Kernel::PresynapticUpdate,
        Kernel::Initialize,
        Kernel::PreNeuronReset,
    ];

    /// Function name of the kernel in generated code
    pub fn function_name(self) -> &'static str {
        match self {
            Kernel::NeuronUpdate => "updateNeuronsKernel",
            Kernel::PresynapticUpdate => "updatePresynapticKernel",
            Kernel::Initialize => "initializeKernel",
            Kernel::PreNeuronReset => "preNeuronResetKernel",
        }
    }
}

impl std::fmt::Display for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Kernel::NeuronUpdate => write!(f, "neuron_update"),
            Kernel::PresynapticUpdate => write!(f, "presynaptic_update"),
            Kernel::Initialize => write!(f, "initialize"),
            Kernel::PreNeuronReset => write!(f, "pre_neuron_reset"),
        }
    }
}

/// Threads per block for each kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelBlockSizes {
    pub neuron_update: usize,
    pub presynaptic_update: usize,
    pub initialize: usize,
    pub pre_neuron_reset: usize,
}

impl Default for KernelBlockSizes {
    fn default() -> Self {
        Self {
            neuron_update: 32,
            presynaptic_update: 32,
            initialize: 32,
            pre_neuron_reset: 32,
        }
    }
}

impl KernelBlockSizes {
    pub fn get(&self, kernel: Kernel) -> usize {
        match kernel {
            Kernel::NeuronUpdate => self.neuron_update,
            Kernel::PresynapticUpdate => self.presynaptic_update,
            Kernel::Initialize => self.initialize,
            Kernel::PreNeuronReset => self.pre_neuron_reset,
        }
    }

    pub fn set(&mut self, kernel: Kernel, block_size: usize) {
        match kernel {
            Kernel::NeuronUpdate => self.neuron_update = block_size,
            Kernel::PresynapticUpdate => self.presynaptic_update = block_size,
            Kernel::Initialize => self.initialize = block_size,
            Kernel::PreNeuronReset => self.pre_neuron_reset = block_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_size_lookup() {
        let mut sizes = KernelBlockSizes::default();
        sizes.set(Kernel::PresynapticUpdate, 64);
        assert_eq!(sizes.get(Kernel::PresynapticUpdate), 64);
        assert_eq!(sizes.get(Kernel::NeuronUpdate), 32);
    }

    #[test]
    fn test_names() {
        assert_eq!(Kernel::Initialize.function_name(), "initializeKernel");
        assert_eq!(Kernel::PreNeuronReset.to_string(), "pre_neuron_reset");
        assert_eq!(Kernel::ALL.len(), 4);
    }
}
