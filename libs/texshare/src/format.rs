// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Pixel formats that can back a shared texture.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::caps::FeatureLevel;

/// Texture pixel formats the drivers can share natively.
///
/// Backends map these to `DXGI_FORMAT` / `D3DFORMAT` constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureFormat {
    /// 8-bit BGRA, unsigned normalized. The default exchange format.
    Bgra8Unorm,
    /// 8-bit BGR with an ignored alpha byte.
    Bgrx8Unorm,
    /// 8-bit RGBA, unsigned normalized.
    Rgba8Unorm,
    /// 10-bit RGB, 2-bit alpha.
    Rgb10A2Unorm,
    /// 16-bit float RGBA.
    Rgba16Float,
    /// 32-bit float RGBA.
    Rgba32Float,
}

impl TextureFormat {
    pub const ALL: [TextureFormat; 6] = [
        TextureFormat::Bgra8Unorm,
        TextureFormat::Bgrx8Unorm,
        TextureFormat::Rgba8Unorm,
        TextureFormat::Rgb10A2Unorm,
        TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float,
    ];

    /// Bytes per pixel for this format.
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            Self::Bgra8Unorm | Self::Bgrx8Unorm | Self::Rgba8Unorm | Self::Rgb10A2Unorm => 4,
            Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
        }
    }

    /// `DXGI_FORMAT` code.
    pub fn dxgi_format(&self) -> u32 {
        match self {
            Self::Bgra8Unorm => 87,
            Self::Bgrx8Unorm => 88,
            Self::Rgba8Unorm => 28,
            Self::Rgb10A2Unorm => 24,
            Self::Rgba16Float => 10,
            Self::Rgba32Float => 2,
        }
    }

    pub fn from_dxgi_format(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.dxgi_format() == code)
    }

    /// `D3DFORMAT` code, if the legacy API can share this format.
    pub fn d3d9_format(&self) -> Option<u32> {
        match self {
            Self::Bgra8Unorm => Some(21),   // D3DFMT_A8R8G8B8
            Self::Bgrx8Unorm => Some(22),   // D3DFMT_X8R8G8B8
            Self::Rgb10A2Unorm => Some(31), // D3DFMT_A2B10G10R10
            Self::Rgba16Float => Some(113), // D3DFMT_A16B16G16R16F
            Self::Rgba32Float => Some(116), // D3DFMT_A32B32G32R32F
            Self::Rgba8Unorm => None,
        }
    }

    pub fn from_d3d9_format(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.d3d9_format() == Some(code))
    }

    /// Lowest feature level that can create a shareable texture of this
    /// format. Negotiation never goes below 10_0, so neither does this.
    pub fn min_feature_level(&self) -> FeatureLevel {
        FeatureLevel::L10_0
    }

    /// Encode a normalized RGBA color as one texel of this format.
    pub fn encode_color(&self, rgba: [f32; 4]) -> Vec<u8> {
        let [r, g, b, a] = rgba;
        match self {
            Self::Bgra8Unorm => vec![unorm8(b), unorm8(g), unorm8(r), unorm8(a)],
            Self::Bgrx8Unorm => vec![unorm8(b), unorm8(g), unorm8(r), 0xff],
            Self::Rgba8Unorm => vec![unorm8(r), unorm8(g), unorm8(b), unorm8(a)],
            Self::Rgb10A2Unorm => {
                let packed = unorm(r, 1023)
                    | (unorm(g, 1023) << 10)
                    | (unorm(b, 1023) << 20)
                    | (unorm(a, 3) << 30);
                packed.to_le_bytes().to_vec()
            }
            Self::Rgba16Float => rgba
                .iter()
                .flat_map(|c| f32_to_f16_bits(*c).to_le_bytes())
                .collect(),
            Self::Rgba32Float => rgba.iter().flat_map(|c| c.to_le_bytes()).collect(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bgra8Unorm => "bgra8",
            Self::Bgrx8Unorm => "bgrx8",
            Self::Rgba8Unorm => "rgba8",
            Self::Rgb10A2Unorm => "rgb10a2",
            Self::Rgba16Float => "rgba16f",
            Self::Rgba32Float => "rgba32f",
        }
    }
}

impl FromStr for TextureFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == lower)
            .ok_or_else(|| {
                let valid: Vec<&str> = Self::ALL.iter().map(|f| f.as_str()).collect();
                format!("Unknown format '{}'. Valid values: {}", s, valid.join(", "))
            })
    }
}

impl std::fmt::Display for TextureFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn unorm(value: f32, max: u32) -> u32 {
    (value.clamp(0.0, 1.0) * max as f32).round() as u32
}

fn unorm8(value: f32) -> u8 {
    unorm(value, 255) as u8
}

fn f32_to_f16_bits(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exponent = ((bits >> 23) & 0xff) as i32;
    let mantissa = bits & 0x007f_ffff;

    if exponent == 0xff {
        let nan = if mantissa != 0 { 0x0200 } else { 0 };
        return sign | 0x7c00 | nan;
    }

    let half_exponent = exponent - 127 + 15;
    if half_exponent >= 0x1f {
        return sign | 0x7c00;
    }
    if half_exponent <= 0 {
        if half_exponent < -10 {
            return sign;
        }
        let full = mantissa | 0x0080_0000;
        return sign | (full >> (14 - half_exponent) as u32) as u16;
    }
    sign | ((half_exponent as u16) << 10) | (mantissa >> 13) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dxgi_codes_round_trip() {
        for format in TextureFormat::ALL {
            assert_eq!(
                TextureFormat::from_dxgi_format(format.dxgi_format()),
                Some(format)
            );
        }
        assert_eq!(TextureFormat::from_dxgi_format(0), None);
    }

    #[test]
    fn test_min_feature_level_is_negotiable() {
        for format in TextureFormat::ALL {
            assert!(FeatureLevel::NEGOTIATION_ORDER.contains(&format.min_feature_level()));
        }
    }

    #[test]
    fn test_legacy_formats() {
        assert_eq!(TextureFormat::Bgra8Unorm.d3d9_format(), Some(21));
        assert_eq!(TextureFormat::Rgba8Unorm.d3d9_format(), None);
        assert_eq!(
            TextureFormat::from_d3d9_format(22),
            Some(TextureFormat::Bgrx8Unorm)
        );
    }

    #[test]
    fn test_encode_color() {
        let red = [1.0, 0.0, 0.0, 1.0];
        assert_eq!(TextureFormat::Bgra8Unorm.encode_color(red), vec![0, 0, 255, 255]);
        assert_eq!(TextureFormat::Rgba8Unorm.encode_color(red), vec![255, 0, 0, 255]);
        assert_eq!(
            TextureFormat::Bgrx8Unorm.encode_color([0.0, 0.0, 1.0, 0.0]),
            vec![255, 0, 0, 255]
        );
        assert_eq!(
            TextureFormat::Rgb10A2Unorm.encode_color(red),
            (1023u32 | (3 << 30)).to_le_bytes().to_vec()
        );

        for format in TextureFormat::ALL {
            assert_eq!(
                format.encode_color(red).len() as u32,
                format.bytes_per_pixel()
            );
        }
    }

    #[test]
    fn test_half_float_encoding() {
        assert_eq!(f32_to_f16_bits(1.0), 0x3c00);
        assert_eq!(f32_to_f16_bits(0.5), 0x3800);
        assert_eq!(f32_to_f16_bits(0.0), 0x0000);
        assert_eq!(f32_to_f16_bits(-2.0), 0xc000);
        assert_eq!(f32_to_f16_bits(1.0e6), 0x7c00);
    }

    #[test]
    fn test_parse_format() {
        assert_eq!(
            "BGRA8".parse::<TextureFormat>().unwrap(),
            TextureFormat::Bgra8Unorm
        );
        assert!("nv12".parse::<TextureFormat>().is_err());
    }
}
