// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! In-process software reference driver.
//!
//! Models the driver semantics the crate depends on without a GPU:
//! - virtual adapters with LUIDs, outputs, feature levels and memory budgets
//! - a process-wide share table with weak entries, so handles go stale once
//!   the last local reference is released
//! - a worker thread per immediate context that executes flushed batches
//!   after a configurable latency
//!
//! Two `SoftwareDriver` instances built from the same specs see identical
//! LUIDs and can exchange handles, which is how tests stand in for two
//! processes.

mod device;
mod legacy;
mod memory;
mod queue;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::adapter::{AdapterInfo, AdapterLuid, vendor};
use crate::caps::{DriverType, FeatureLevel};
use crate::driver::{
    CreatedDevice, DeviceRequest, Driver, DriverBackend, LegacyObjectBackend,
};
use crate::error::{Result, ShareError};

use device::{SoftContext, SoftDevice};
use legacy::SoftLegacyObject;
use queue::SoftQueue;

/// Description of one virtual adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct SoftAdapterSpec {
    pub name: String,
    pub vendor_id: u32,
    pub device_id: u32,
    /// Fixed LUID. `None` derives one from the enumeration index.
    pub luid: Option<AdapterLuid>,
    pub outputs: Vec<String>,
    pub max_feature_level: FeatureLevel,
    pub driver_type: DriverType,
    /// Whether generation-1 devices get the extended interface.
    pub supports_legacy_ex: bool,
    /// Time the "GPU" spends on each submitted batch.
    pub command_latency: Duration,
    /// Bytes available for texture allocations.
    pub memory_budget: u64,
}

impl SoftAdapterSpec {
    const DEFAULT_BUDGET: u64 = 512 * 1024 * 1024;

    /// A hardware adapter with one output.
    pub fn hardware(name: impl Into<String>, vendor_id: u32) -> Self {
        Self {
            name: name.into(),
            vendor_id,
            device_id: 0x1000,
            luid: None,
            outputs: Vec::new(),
            max_feature_level: FeatureLevel::L11_1,
            driver_type: DriverType::Hardware,
            supports_legacy_ex: true,
            command_latency: Duration::ZERO,
            memory_budget: Self::DEFAULT_BUDGET,
        }
    }

    /// The software rasterizer adapter.
    pub fn warp() -> Self {
        Self {
            device_id: 0x8c,
            driver_type: DriverType::Warp,
            ..Self::hardware("texshare Software Adapter", vendor::MICROSOFT)
        }
    }

    pub fn with_luid(mut self, luid: AdapterLuid) -> Self {
        self.luid = Some(luid);
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.outputs.push(output.into());
        self
    }

    pub fn with_feature_level(mut self, level: FeatureLevel) -> Self {
        self.max_feature_level = level;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.command_latency = latency;
        self
    }

    pub fn with_memory_budget(mut self, bytes: u64) -> Self {
        self.memory_budget = bytes;
        self
    }

    pub fn without_legacy_ex(mut self) -> Self {
        self.supports_legacy_ex = false;
        self
    }
}

impl Default for SoftAdapterSpec {
    fn default() -> Self {
        Self::warp()
    }
}

/// Runtime state of one virtual adapter.
pub(crate) struct SoftAdapter {
    pub(crate) info: AdapterInfo,
    pub(crate) spec: SoftAdapterSpec,
    allocated: Mutex<u64>,
    removed: Mutex<Option<String>>,
}

impl SoftAdapter {
    fn new(index: usize, spec: SoftAdapterSpec) -> Self {
        let luid = spec
            .luid
            .unwrap_or_else(|| AdapterLuid::from_parts(0x0001_0000 + index as u32, 0));
        let info = AdapterInfo {
            index,
            name: spec.name.clone(),
            vendor_id: spec.vendor_id,
            device_id: spec.device_id,
            luid,
            dedicated_video_memory: spec.memory_budget,
            outputs: spec.outputs.clone(),
            software: !spec.driver_type.is_hardware(),
        };
        Self {
            info,
            spec,
            allocated: Mutex::new(0),
            removed: Mutex::new(None),
        }
    }

    pub(crate) fn luid(&self) -> AdapterLuid {
        self.info.luid
    }

    pub(crate) fn removed_reason(&self) -> Option<String> {
        self.removed.lock().clone()
    }

    /// `Err(DeviceLost)` once the adapter has been removed.
    pub(crate) fn check_present(&self) -> Result<()> {
        match self.removed_reason() {
            Some(reason) => Err(ShareError::DeviceLost(reason)),
            None => Ok(()),
        }
    }

    /// Charge `bytes` against the memory budget.
    pub(crate) fn reserve(&self, bytes: u64) -> Result<()> {
        let mut allocated = self.allocated.lock();
        if *allocated + bytes > self.spec.memory_budget {
            return Err(ShareError::OutOfMemory(format!(
                "{} bytes requested, {} of {} in use on {}",
                bytes, *allocated, self.spec.memory_budget, self.info.name
            )));
        }
        *allocated += bytes;
        Ok(())
    }

    pub(crate) fn unreserve(&self, bytes: u64) {
        let mut allocated = self.allocated.lock();
        *allocated = allocated.saturating_sub(bytes);
    }

    pub(crate) fn allocated(&self) -> u64 {
        *self.allocated.lock()
    }
}

/// Software reference driver.
pub struct SoftwareDriver {
    adapters: Vec<Arc<SoftAdapter>>,
}

impl SoftwareDriver {
    /// Driver exposing the given adapters in order.
    pub fn with_adapters(specs: Vec<SoftAdapterSpec>) -> Self {
        let adapters = specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| Arc::new(SoftAdapter::new(index, spec)))
            .collect();
        Self { adapters }
    }

    /// Mark an adapter as removed. Every device on it reports device loss
    /// from then on.
    pub fn simulate_device_removed(&self, index: usize) -> Result<()> {
        let adapter = self.adapters.get(index).ok_or(ShareError::AdapterOutOfRange {
            index,
            count: self.adapters.len(),
        })?;
        tracing::warn!("[SoftwareDriver] Removing adapter {}: {}", index, adapter.info.name);
        *adapter.removed.lock() = Some(format!(
            "adapter {} removed (DXGI_ERROR_DEVICE_REMOVED)",
            index
        ));
        Ok(())
    }

    /// Bytes of texture memory currently allocated on an adapter.
    pub fn allocated_bytes(&self, index: usize) -> Option<u64> {
        self.adapters.get(index).map(|a| a.allocated())
    }

    fn pick_adapter(&self, request: &DeviceRequest) -> Result<Arc<SoftAdapter>> {
        if let Some(luid) = request.adapter {
            return self
                .adapters
                .iter()
                .find(|a| a.luid() == luid)
                .cloned()
                .ok_or_else(|| {
                    ShareError::NoCompatibleDriver(format!("no adapter with LUID {}", luid))
                });
        }

        for driver_type in &request.driver_types {
            if let Some(adapter) = self
                .adapters
                .iter()
                .find(|a| a.spec.driver_type == *driver_type)
            {
                return Ok(Arc::clone(adapter));
            }
        }

        Err(ShareError::NoCompatibleDriver(format!(
            "no adapter for driver types {:?}",
            request.driver_types
        )))
    }
}

impl Default for SoftwareDriver {
    fn default() -> Self {
        Self::with_adapters(vec![SoftAdapterSpec::default()])
    }
}

impl Driver for SoftwareDriver {
    fn backend(&self) -> DriverBackend {
        DriverBackend::Software
    }

    fn enumerate_adapters(&self) -> Result<Vec<AdapterInfo>> {
        Ok(self.adapters.iter().map(|a| a.info.clone()).collect())
    }

    fn create_device(&self, request: &DeviceRequest) -> Result<CreatedDevice> {
        let adapter = self.pick_adapter(request)?;
        adapter.check_present()?;

        let max = adapter.spec.max_feature_level;
        let feature_level = request
            .feature_levels
            .iter()
            .copied()
            .find(|level| *level <= max)
            .ok_or_else(|| ShareError::UnsupportedFeatureLevel {
                required: request
                    .feature_levels
                    .iter()
                    .copied()
                    .min()
                    .unwrap_or(FeatureLevel::L10_0),
                actual: max,
            })?;

        let queue = SoftQueue::spawn(Arc::clone(&adapter))?;
        tracing::debug!(
            "[SoftwareDriver] Device on {} at feature level {}",
            adapter.info.name,
            feature_level
        );

        Ok(CreatedDevice {
            device: Box::new(SoftDevice::new(Arc::clone(&adapter), feature_level)),
            context: Box::new(SoftContext::new(Arc::clone(&adapter), queue)),
            adapter: adapter.luid(),
            feature_level,
            driver_type: adapter.spec.driver_type,
        })
    }

    fn create_legacy_object(&self) -> Result<Box<dyn LegacyObjectBackend>> {
        Ok(Box::new(SoftLegacyObject::new(self.adapters.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(adapter: Option<AdapterLuid>) -> DeviceRequest {
        DeviceRequest {
            adapter,
            feature_levels: FeatureLevel::NEGOTIATION_ORDER.to_vec(),
            driver_types: DriverType::NEGOTIATION_ORDER.to_vec(),
            debug_layer: false,
        }
    }

    #[test]
    fn test_luids_are_deterministic() {
        let a = SoftwareDriver::with_adapters(vec![
            SoftAdapterSpec::hardware("A", vendor::AMD),
            SoftAdapterSpec::hardware("B", vendor::NVIDIA),
        ]);
        let b = SoftwareDriver::with_adapters(vec![
            SoftAdapterSpec::hardware("A", vendor::AMD),
            SoftAdapterSpec::hardware("B", vendor::NVIDIA),
        ]);
        let a = a.enumerate_adapters().unwrap();
        let b = b.enumerate_adapters().unwrap();
        assert_eq!(a[0].luid, b[0].luid);
        assert_ne!(a[0].luid, a[1].luid);
    }

    #[test]
    fn test_negotiates_highest_supported_level() {
        let driver = SoftwareDriver::with_adapters(vec![
            SoftAdapterSpec::hardware("Old", vendor::INTEL).with_feature_level(FeatureLevel::L10_1),
        ]);
        let created = driver.create_device(&request(None)).unwrap();
        assert_eq!(created.feature_level, FeatureLevel::L10_1);
        assert_eq!(created.driver_type, DriverType::Hardware);
    }

    #[test]
    fn test_rejects_level_below_floor() {
        let driver = SoftwareDriver::with_adapters(vec![
            SoftAdapterSpec::hardware("Ancient", vendor::INTEL)
                .with_feature_level(FeatureLevel::L9_3),
        ]);
        assert!(matches!(
            driver.create_device(&request(None)),
            Err(ShareError::UnsupportedFeatureLevel {
                required: FeatureLevel::L10_0,
                actual: FeatureLevel::L9_3
            })
        ));
    }

    #[test]
    fn test_hardware_only_request_skips_warp() {
        let driver = SoftwareDriver::default();
        let mut req = request(None);
        req.driver_types = vec![DriverType::Hardware];
        assert!(matches!(
            driver.create_device(&req),
            Err(ShareError::NoCompatibleDriver(_))
        ));
    }

    #[test]
    fn test_removed_adapter_is_device_lost() {
        let driver = SoftwareDriver::default();
        driver.simulate_device_removed(0).unwrap();
        let err = driver.create_device(&request(None)).err().unwrap();
        assert!(err.is_device_lost());
    }
}
