// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! API generation, feature level and driver type.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Graphics API generation a device, texture or handle belongs to.
///
/// Handles minted by one generation are never opened by the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u32)]
pub enum Generation {
    /// Direct3D 9Ex. Sharing goes through a companion surface and the
    /// legacy memory bridge.
    Legacy = 1,
    /// Direct3D 11. Shared textures are bound directly.
    Current = 2,
}

impl Generation {
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    pub fn from_u32(tag: u32) -> Option<Self> {
        match tag {
            1 => Some(Self::Legacy),
            2 => Some(Self::Current),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Legacy => "d3d9ex",
            Self::Current => "d3d11",
        }
    }
}

impl FromStr for Generation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "legacy" | "d3d9" | "d3d9ex" | "1" => Ok(Self::Legacy),
            "current" | "d3d11" | "2" => Ok(Self::Current),
            _ => Err(format!(
                "Unknown generation '{}'. Valid values: d3d9ex, d3d11",
                s
            )),
        }
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Negotiated set of GPU capabilities of a generation-2 device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FeatureLevel {
    L9_1,
    L9_2,
    L9_3,
    L10_0,
    L10_1,
    L11_0,
    L11_1,
}

impl FeatureLevel {
    /// Levels requested at device creation, highest first.
    pub const NEGOTIATION_ORDER: [FeatureLevel; 4] = [
        FeatureLevel::L11_1,
        FeatureLevel::L11_0,
        FeatureLevel::L10_1,
        FeatureLevel::L10_0,
    ];

    /// `D3D_FEATURE_LEVEL` value.
    pub fn as_d3d(&self) -> i32 {
        match self {
            Self::L9_1 => 0x9100,
            Self::L9_2 => 0x9200,
            Self::L9_3 => 0x9300,
            Self::L10_0 => 0xa000,
            Self::L10_1 => 0xa100,
            Self::L11_0 => 0xb000,
            Self::L11_1 => 0xb100,
        }
    }

    pub fn from_d3d(value: i32) -> Option<Self> {
        match value {
            0x9100 => Some(Self::L9_1),
            0x9200 => Some(Self::L9_2),
            0x9300 => Some(Self::L9_3),
            0xa000 => Some(Self::L10_0),
            0xa100 => Some(Self::L10_1),
            0xb000 => Some(Self::L11_0),
            0xb100 => Some(Self::L11_1),
            _ => None,
        }
    }
}

impl std::fmt::Display for FeatureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::L9_1 => "9_1",
            Self::L9_2 => "9_2",
            Self::L9_3 => "9_3",
            Self::L10_0 => "10_0",
            Self::L10_1 => "10_1",
            Self::L11_0 => "11_0",
            Self::L11_1 => "11_1",
        };
        write!(f, "{}", s)
    }
}

/// Kind of driver a device was created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriverType {
    Hardware,
    /// High-performance software rasterizer.
    Warp,
    /// Reference rasterizer, slow but exact.
    Reference,
}

impl DriverType {
    /// Driver types tried when no adapter was explicitly selected.
    pub const NEGOTIATION_ORDER: [DriverType; 3] =
        [DriverType::Hardware, DriverType::Warp, DriverType::Reference];

    pub fn is_hardware(&self) -> bool {
        matches!(self, Self::Hardware)
    }
}

impl std::fmt::Display for DriverType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Hardware => "hardware",
            Self::Warp => "warp",
            Self::Reference => "reference",
        };
        write!(f, "{}", s)
    }
}
