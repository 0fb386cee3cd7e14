// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Share handle token.
//!
//! A [`ShareHandle`] is what crosses the process boundary. It carries no
//! ownership: holding one never keeps the texture alive, and liveness is only
//! known after a successful open.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::adapter::AdapterLuid;
use crate::caps::Generation;
use crate::error::{Result, ShareError};
use crate::format::TextureFormat;

/// Opaque, fixed-size, process-transferable token identifying one shared GPU
/// allocation.
///
/// Layout of the byte form (little endian): raw driver handle (8), exporting
/// adapter LUID (8), generation tag (4), reserved (4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShareHandle {
    raw: u64,
    adapter: AdapterLuid,
    generation: Generation,
}

impl ShareHandle {
    /// Size of the byte form.
    pub const SIZE: usize = 24;

    pub(crate) fn new(raw: u64, adapter: AdapterLuid, generation: Generation) -> Self {
        Self {
            raw,
            adapter,
            generation,
        }
    }

    /// Driver handle value (`HANDLE` on Windows).
    pub fn raw(&self) -> u64 {
        self.raw
    }

    /// Adapter the texture was allocated on.
    pub fn adapter(&self) -> AdapterLuid {
        self.adapter
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..8].copy_from_slice(&self.raw.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.adapter.0.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.generation.as_u32().to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: &[u8; Self::SIZE] = bytes.try_into().map_err(|_| {
            ShareError::MalformedHandle(format!(
                "expected {} bytes, got {}",
                Self::SIZE,
                bytes.len()
            ))
        })?;

        let raw = u64::from_le_bytes(bytes[0..8].try_into().unwrap_or_default());
        let adapter = u64::from_le_bytes(bytes[8..16].try_into().unwrap_or_default());
        let tag = u32::from_le_bytes(bytes[16..20].try_into().unwrap_or_default());

        if raw == 0 {
            return Err(ShareError::MalformedHandle("null handle".into()));
        }
        let generation = Generation::from_u32(tag)
            .ok_or_else(|| ShareError::MalformedHandle(format!("unknown generation tag {}", tag)))?;

        Ok(Self::new(raw, AdapterLuid(adapter), generation))
    }
}

impl std::fmt::Display for ShareHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.to_bytes() {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for ShareHandle {
    type Err = ShareError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != Self::SIZE * 2 || !s.is_ascii() {
            return Err(ShareError::MalformedHandle(format!(
                "expected {} hex digits",
                Self::SIZE * 2
            )));
        }
        let bytes = (0..Self::SIZE)
            .map(|i| u8::from_str_radix(&s[i * 2..i * 2 + 2], 16))
            .collect::<std::result::Result<Vec<u8>, _>>()
            .map_err(|e| ShareError::MalformedHandle(e.to_string()))?;
        Self::from_bytes(&bytes)
    }
}

/// What a producer publishes out-of-band: the handle plus the description
/// the legacy importer needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SharedTextureInfo {
    pub handle: ShareHandle,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_form_parses_back() {
        let handle = ShareHandle::new(0x4000_0040, AdapterLuid(0x1_0000_0002), Generation::Current);
        let text = handle.to_string();
        assert_eq!(text.len(), 48);
        assert_eq!(text.parse::<ShareHandle>().unwrap(), handle);
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(ShareHandle::from_bytes(&[0u8; 3]).is_err());
        assert!("zz".parse::<ShareHandle>().is_err());

        let mut bytes = ShareHandle::new(8, AdapterLuid(1), Generation::Legacy).to_bytes();
        bytes[16] = 9;
        assert!(matches!(
            ShareHandle::from_bytes(&bytes),
            Err(ShareError::MalformedHandle(_))
        ));

        let null = ShareHandle::new(0, AdapterLuid(1), Generation::Legacy).to_bytes();
        assert!(ShareHandle::from_bytes(&null).is_err());
    }
}
