// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

//! Storage, precision and connectivity enumerations shared by every descriptor

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Where a variable lives (bit set)
///
/// `HOST | DEVICE` is a lazily synchronised pair: the host copy and the device copy
/// are kept apart and only made consistent by explicit push/pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VarLocation(u8);

impl VarLocation {
    pub const HOST: Self = Self(0x1);
    pub const DEVICE: Self = Self(0x2);
    pub const ZERO_COPY: Self = Self(0x4);

    pub const HOST_DEVICE: Self = Self(0x1 | 0x2);
    pub const HOST_DEVICE_ZERO_COPY: Self = Self(0x1 | 0x2 | 0x4);

    #[inline(always)]
    pub fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline(always)]
    pub fn is_host(self) -> bool {
        self.contains(Self::HOST)
    }

    #[inline(always)]
    pub fn is_device(self) -> bool {
        self.contains(Self::DEVICE)
    }

    #[inline(always)]
    pub fn is_zero_copy(self) -> bool {
        self.contains(Self::ZERO_COPY)
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl Default for VarLocation {
    fn default() -> Self {
        Self::HOST_DEVICE
    }
}

impl core::ops::BitOr for VarLocation {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for VarLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.is_host() {
            parts.push("host");
        }
        if self.is_device() {
            parts.push("device");
        }
        if self.is_zero_copy() {
            parts.push("zero-copy");
        }
        if parts.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", parts.join("+"))
        }
    }
}

/// Where a variable's initial values are computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InitLocation {
    Host,
    Device,
}

/// Full storage mode of a variable: location plus initialisation site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VarMode {
    pub location: VarLocation,
    pub init: InitLocation,
}

impl VarMode {
    pub const HOST_DEVICE_INIT_HOST: Self = Self::new(VarLocation::HOST_DEVICE, InitLocation::Host);
    pub const HOST_DEVICE_INIT_DEVICE: Self =
        Self::new(VarLocation::HOST_DEVICE, InitLocation::Device);
    pub const DEVICE_INIT_DEVICE: Self = Self::new(VarLocation::DEVICE, InitLocation::Device);
    pub const ZERO_COPY_INIT_HOST: Self =
        Self::new(VarLocation::HOST_DEVICE_ZERO_COPY, InitLocation::Host);
    pub const HOST_INIT_HOST: Self = Self::new(VarLocation::HOST, InitLocation::Host);

    pub const fn new(location: VarLocation, init: InitLocation) -> Self {
        Self { location, init }
    }

    #[inline(always)]
    pub fn is_zero_copy(self) -> bool {
        self.location.is_zero_copy()
    }

    /// True when initial values must be written by a device kernel
    pub fn is_device_init(self) -> bool {
        self.init == InitLocation::Device && self.location.is_device()
    }
}

impl Default for VarMode {
    fn default() -> Self {
        Self::HOST_DEVICE_INIT_DEVICE
    }
}

/// Floating point precision of `scalar` in generated code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    Float,
    Double,
}

impl Precision {
    /// Type name substituted for `scalar`
    pub fn scalar_type(self) -> &'static str {
        match self {
            Precision::Float => "float",
            Precision::Double => "double",
        }
    }

    /// Literal suffix appended to floating point constants
    pub fn literal_suffix(self) -> &'static str {
        match self {
            Precision::Float => "f",
            Precision::Double => "",
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.scalar_type())
    }
}

impl FromStr for Precision {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "float" | "f32" | "single" => Ok(Precision::Float),
            "double" | "f64" => Ok(Precision::Double),
            _ => Err(ModelError::InvalidConfiguration(format!(
                "unknown precision '{}'",
                s
            ))),
        }
    }
}

/// How the synapses of a connection are represented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynapseMatrixConnectivity {
    /// Every source/target pair is connected; weights are a full matrix
    Dense,
    /// Row-compressed: per-source row length plus target indices, padded to max row length
    Sparse,
    /// One bit per source/target pair
    Bitmask,
    /// Rows are regenerated on demand from a seeded rule
    Procedural,
}

impl SynapseMatrixConnectivity {
    pub fn name(self) -> &'static str {
        match self {
            SynapseMatrixConnectivity::Dense => "dense",
            SynapseMatrixConnectivity::Sparse => "sparse",
            SynapseMatrixConnectivity::Bitmask => "bitmask",
            SynapseMatrixConnectivity::Procedural => "procedural",
        }
    }
}

impl fmt::Display for SynapseMatrixConnectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for SynapseMatrixConnectivity {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "dense" => Ok(Self::Dense),
            "sparse" => Ok(Self::Sparse),
            "bitmask" => Ok(Self::Bitmask),
            "procedural" => Ok(Self::Procedural),
            _ => Err(ModelError::InvalidConfiguration(format!(
                "unknown connectivity '{}'",
                s
            ))),
        }
    }
}

/// Axis along which a connection's propagation work is split across parallel units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanType {
    /// One unit (or `threads_per_spike` units) per source neuron
    Presynaptic,
    /// One unit per target neuron / row entry
    #[default]
    Postsynaptic,
}

impl fmt::Display for SpanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpanType::Presynaptic => write!(f, "presynaptic"),
            SpanType::Postsynaptic => write!(f, "postsynaptic"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_location_bits() {
        assert!(VarLocation::HOST_DEVICE.is_host());
        assert!(VarLocation::HOST_DEVICE.is_device());
        assert!(!VarLocation::HOST_DEVICE.is_zero_copy());
        assert!(VarLocation::HOST_DEVICE_ZERO_COPY.is_zero_copy());
        assert_eq!(VarLocation::HOST | VarLocation::DEVICE, VarLocation::HOST_DEVICE);
        assert_eq!(VarLocation::HOST_DEVICE_ZERO_COPY.to_string(), "host+device+zero-copy");
    }

    #[test]
    fn test_device_init_requires_device_location() {
        assert!(VarMode::HOST_DEVICE_INIT_DEVICE.is_device_init());
        assert!(!VarMode::new(VarLocation::HOST, InitLocation::Device).is_device_init());
        assert!(!VarMode::HOST_DEVICE_INIT_HOST.is_device_init());
    }

    #[test]
    fn test_precision_parsing() {
        assert_eq!("double".parse::<Precision>().unwrap(), Precision::Double);
        assert_eq!("F32".parse::<Precision>().unwrap(), Precision::Float);
        assert!("half".parse::<Precision>().is_err());
        assert_eq!(Precision::Double.scalar_type(), "double");
    }

    #[test]
    fn test_connectivity_parsing() {
        assert_eq!(
            "Procedural".parse::<SynapseMatrixConnectivity>().unwrap(),
            SynapseMatrixConnectivity::Procedural
        );
        assert!("ragged".parse::<SynapseMatrixConnectivity>().is_err());
    }
}
