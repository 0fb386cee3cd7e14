// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Adapter directory: enumeration and selection of physical GPUs.
//!
//! Enumeration is read-only and creates no GPU resources. The selected index
//! is an explicit value handed to the device factory; nothing here is global.

use serde::{Deserialize, Serialize};

use crate::diagnostics::{Diagnostics, Operation};
use crate::driver::Driver;
use crate::error::{Result, ShareError};

/// PCI vendor ids used for vendor preference.
pub mod vendor {
    pub const NVIDIA: u32 = 0x10de;
    pub const AMD: u32 = 0x1002;
    pub const INTEL: u32 = 0x8086;
    /// Microsoft Basic Render Driver (WARP).
    pub const MICROSOFT: u32 = 0x1414;

    /// Resolve a vendor name or numeric id (`nvidia`, `0x10de`, `4318`).
    pub fn parse(value: &str) -> Option<u32> {
        let lower = value.trim().to_lowercase();
        match lower.as_str() {
            "nvidia" => Some(NVIDIA),
            "amd" | "ati" => Some(AMD),
            "intel" => Some(INTEL),
            "microsoft" | "warp" => Some(MICROSOFT),
            _ => match lower.strip_prefix("0x") {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => lower.parse().ok(),
            },
        }
    }
}

/// Locally unique identifier of an adapter. Stable while the adapter is
/// present, and identical in every process on the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AdapterLuid(pub u64);

impl AdapterLuid {
    /// Build from the `LUID { LowPart, HighPart }` pair the driver reports.
    pub fn from_parts(low: u32, high: i32) -> Self {
        Self(((high as u32 as u64) << 32) | low as u64)
    }

    pub fn low(&self) -> u32 {
        self.0 as u32
    }

    pub fn high(&self) -> i32 {
        (self.0 >> 32) as u32 as i32
    }
}

impl std::fmt::Display for AdapterLuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08x}-{:08x}", self.high() as u32, self.low())
    }
}

/// One enumerated adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    /// Position in driver enumeration order.
    pub index: usize,
    pub name: String,
    pub vendor_id: u32,
    pub device_id: u32,
    pub luid: AdapterLuid,
    pub dedicated_video_memory: u64,
    /// Display outputs attached to this adapter (device names).
    pub outputs: Vec<String>,
    /// Software rasterizer rather than a physical GPU.
    pub software: bool,
}

/// Which adapter device creation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AdapterSelection {
    /// Let the driver pick its default adapter.
    #[default]
    SystemDefault,
    Index(usize),
}

impl AdapterSelection {
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::SystemDefault => None,
            Self::Index(index) => Some(*index),
        }
    }
}

impl std::fmt::Display for AdapterSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SystemDefault => write!(f, "default"),
            Self::Index(index) => write!(f, "{}", index),
        }
    }
}

/// Render and display descriptions of the selected adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterDescription {
    /// Adapter (renderer) description.
    pub render: String,
    /// First display output attached to the adapter, empty when headless.
    pub display: String,
}

/// Enumerated adapters plus the current selection.
#[derive(Debug, Clone)]
pub struct AdapterDirectory {
    adapters: Vec<AdapterInfo>,
    selection: AdapterSelection,
    diagnostics: Diagnostics,
}

impl AdapterDirectory {
    /// Enumerate the driver's adapters. Never fails: an unavailable
    /// enumeration API yields an empty directory.
    pub fn enumerate(driver: &dyn Driver) -> Self {
        Self::enumerate_with(driver, Diagnostics::default())
    }

    pub fn enumerate_with(driver: &dyn Driver, diagnostics: Diagnostics) -> Self {
        let adapters = match driver.enumerate_adapters() {
            Ok(adapters) => adapters,
            Err(e) => {
                diagnostics.report(Operation::EnumerateAdapters, &e);
                Vec::new()
            }
        };
        tracing::debug!(
            "Enumerated {} adapter(s) on {} driver",
            adapters.len(),
            driver.backend()
        );
        Self {
            adapters,
            selection: AdapterSelection::SystemDefault,
            diagnostics,
        }
    }

    pub fn from_adapters(adapters: Vec<AdapterInfo>) -> Self {
        Self {
            adapters,
            selection: AdapterSelection::SystemDefault,
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Number of adapters visible at enumeration time.
    pub fn count(&self) -> usize {
        self.adapters.len()
    }

    pub fn adapters(&self) -> &[AdapterInfo] {
        &self.adapters
    }

    pub fn get(&self, index: usize) -> Option<&AdapterInfo> {
        self.adapters.get(index)
    }

    /// Adapter display name truncated to `max_chars` characters.
    pub fn name(&self, index: usize, max_chars: usize) -> Result<String> {
        let adapter = self.checked(Operation::AdapterName, index)?;
        Ok(truncate_chars(&adapter.name, max_chars))
    }

    /// Write the adapter name into `out`. `out` is only touched on success.
    pub fn copy_name(&self, index: usize, out: &mut String, max_chars: usize) -> Result<()> {
        let name = self.name(index, max_chars)?;
        out.clear();
        out.push_str(&name);
        Ok(())
    }

    /// Descriptions of the currently selected adapter.
    pub fn info(&self, max_chars: usize) -> Result<AdapterDescription> {
        let result = self.describe_selected(max_chars);
        self.diagnostics.check(Operation::AdapterInfo, result)
    }

    fn describe_selected(&self, max_chars: usize) -> Result<AdapterDescription> {
        let index = self
            .selection
            .index()
            .ok_or(ShareError::NoAdapterSelected)?;
        let adapter = self.adapters.get(index).ok_or(ShareError::AdapterOutOfRange {
            index,
            count: self.adapters.len(),
        })?;
        if adapter.name.is_empty() {
            return Err(ShareError::AdapterInfoUnavailable(format!(
                "adapter {} reports no description",
                index
            )));
        }
        let display = adapter.outputs.first().cloned().unwrap_or_default();
        Ok(AdapterDescription {
            render: truncate_chars(&adapter.name, max_chars),
            display: truncate_chars(&display, max_chars),
        })
    }

    /// Index of the first adapter matching `predicate`.
    pub fn find_by_vendor(&self, predicate: impl Fn(&AdapterInfo) -> bool) -> Option<usize> {
        self.adapters.iter().position(predicate)
    }

    /// Index of the first adapter with this PCI vendor id.
    pub fn find_vendor_id(&self, vendor_id: u32) -> Option<usize> {
        self.find_by_vendor(|a| a.vendor_id == vendor_id)
    }

    /// Index of the first NVIDIA adapter in a multi-adapter system.
    pub fn find_nvidia(&self) -> Option<usize> {
        self.find_by_vendor(|a| a.vendor_id == vendor::NVIDIA || a.name.contains("NVIDIA"))
    }

    /// Record `index` for subsequent device creation. An invalid index
    /// leaves the current selection unchanged.
    pub fn select(&mut self, index: usize) -> Result<()> {
        let adapter = self.checked(Operation::SelectAdapter, index)?;
        tracing::info!("Selected adapter {}: {} ({})", index, adapter.name, adapter.luid);
        self.selection = AdapterSelection::Index(index);
        Ok(())
    }

    /// Go back to the driver's default adapter.
    pub fn select_default(&mut self) {
        self.selection = AdapterSelection::SystemDefault;
    }

    /// Last successful selection, or [`AdapterSelection::SystemDefault`].
    pub fn current(&self) -> AdapterSelection {
        self.selection
    }

    pub fn selected(&self) -> Option<&AdapterInfo> {
        self.selection.index().and_then(|i| self.adapters.get(i))
    }

    /// Adapter a selection refers to; `None` for the system default.
    pub fn resolve(&self, selection: AdapterSelection) -> Result<Option<&AdapterInfo>> {
        match selection {
            AdapterSelection::SystemDefault => Ok(None),
            AdapterSelection::Index(index) => {
                self.checked(Operation::SelectAdapter, index).map(Some)
            }
        }
    }

    pub fn find_luid(&self, luid: AdapterLuid) -> Option<&AdapterInfo> {
        self.adapters.iter().find(|a| a.luid == luid)
    }

    fn checked(&self, operation: Operation, index: usize) -> Result<&AdapterInfo> {
        let result = if self.adapters.is_empty() {
            Err(ShareError::NoAdapters)
        } else {
            self.adapters.get(index).ok_or(ShareError::AdapterOutOfRange {
                index,
                count: self.adapters.len(),
            })
        };
        self.diagnostics.check(operation, result)
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;
    use std::sync::Arc;

    fn adapter(index: usize, name: &str, vendor_id: u32) -> AdapterInfo {
        AdapterInfo {
            index,
            name: name.to_string(),
            vendor_id,
            device_id: 0,
            luid: AdapterLuid(0x100 + index as u64),
            dedicated_video_memory: 0,
            outputs: vec![format!("\\\\.\\DISPLAY{}", index + 1)],
            software: false,
        }
    }

    fn directory() -> AdapterDirectory {
        AdapterDirectory::from_adapters(vec![
            adapter(0, "Intel(R) UHD Graphics 630", vendor::INTEL),
            adapter(1, "NVIDIA GeForce RTX 3080", vendor::NVIDIA),
        ])
    }

    #[test]
    fn test_name_truncates() {
        let dir = directory();
        assert_eq!(dir.name(1, 6).unwrap(), "NVIDIA");
        assert_eq!(dir.name(0, 256).unwrap(), "Intel(R) UHD Graphics 630");
    }

    #[test]
    fn test_name_one_past_end_leaves_output_untouched() {
        let dir = directory();
        let mut out = String::from("unchanged");
        let err = dir.copy_name(dir.count(), &mut out, 64).unwrap_err();
        assert!(matches!(err, ShareError::AdapterOutOfRange { index: 2, count: 2 }));
        assert_eq!(out, "unchanged");
    }

    #[test]
    fn test_select_out_of_range_keeps_current() {
        let mut dir = directory();
        dir.select(1).unwrap();
        assert!(dir.select(dir.count()).is_err());
        assert_eq!(dir.current(), AdapterSelection::Index(1));
    }

    #[test]
    fn test_info_requires_selection() {
        let mut dir = directory();
        assert!(matches!(dir.info(64), Err(ShareError::NoAdapterSelected)));
        dir.select(0).unwrap();
        let info = dir.info(64).unwrap();
        assert_eq!(info.render, "Intel(R) UHD Graphics 630");
        assert_eq!(info.display, "\\\\.\\DISPLAY1");
    }

    #[test]
    fn test_find_vendor() {
        let dir = directory();
        assert_eq!(dir.find_nvidia(), Some(1));
        assert_eq!(dir.find_vendor_id(vendor::AMD), None);
        assert_eq!(dir.find_by_vendor(|a| a.name.contains("UHD")), Some(0));
    }

    #[test]
    fn test_empty_directory_reports_no_adapters() {
        let sink = Arc::new(MemorySink::new());
        let mut dir = AdapterDirectory::from_adapters(Vec::new())
            .with_diagnostics(Diagnostics::new(sink.clone()));
        assert_eq!(dir.count(), 0);
        assert!(matches!(dir.select(0), Err(ShareError::NoAdapters)));
        assert_eq!(sink.count_for(Operation::SelectAdapter), 1);
    }

    #[test]
    fn test_vendor_parse() {
        assert_eq!(vendor::parse("NVIDIA"), Some(vendor::NVIDIA));
        assert_eq!(vendor::parse("0x1002"), Some(vendor::AMD));
        assert_eq!(vendor::parse("32902"), Some(vendor::INTEL));
        assert_eq!(vendor::parse("voodoo"), None);
    }

    #[test]
    fn test_luid_parts() {
        let luid = AdapterLuid::from_parts(0xdead_beef, 7);
        assert_eq!(luid.low(), 0xdead_beef);
        assert_eq!(luid.high(), 7);
        assert_eq!(luid.to_string(), "00000007-deadbeef");
    }
}
