// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! GPU synchronization gate.
//!
//! The only ordering mechanism between processes sharing a texture. A
//! producer calls [`SyncGate::flush_and_wait`] after writing and before
//! publishing; a consumer calls it after receiving a handle and before
//! reading.

use std::time::{Duration, Instant};

use crate::device::Device;
use crate::diagnostics::{Diagnostics, Operation};
use crate::driver::FenceBackend;
use crate::error::{Result, ShareError};

/// Wait bounds for fence polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Longest a wait may block before the device is considered lost.
    pub timeout: Duration,
    /// Sleep between completion polls. Zero yields instead of sleeping.
    pub poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(1000),
            poll_interval: Duration::from_micros(200),
        }
    }
}

/// Flush / wait operations on a device's immediate context.
#[derive(Debug, Clone, Default)]
pub struct SyncGate {
    config: SyncConfig,
    diagnostics: Diagnostics,
}

impl SyncGate {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn config(&self) -> SyncConfig {
        self.config
    }

    /// Submit pending commands without waiting for them.
    pub fn flush(&self, device: &Device) -> Result<()> {
        let result = device
            .check_removed()
            .and_then(|_| device.context_backend().flush());
        self.diagnostics.check(Operation::Flush, result)
    }

    /// Submit pending commands and block until the GPU has executed them.
    ///
    /// Returns within [`SyncConfig::timeout`] (plus one poll interval). An
    /// exceeded bound is [`ShareError::SyncTimeout`], a device-lost error.
    pub fn flush_and_wait(&self, device: &Device) -> Result<()> {
        let result = self.fence_and_wait(device, true);
        self.diagnostics.check(Operation::FlushAndWait, result)
    }

    /// Wait for already-submitted work without an explicit flush first.
    pub fn wait(&self, device: &Device) -> Result<()> {
        let result = self.fence_and_wait(device, false);
        self.diagnostics.check(Operation::Wait, result)
    }

    fn fence_and_wait(&self, device: &Device, flush_first: bool) -> Result<()> {
        device.check_removed()?;
        let context = device.context_backend();
        let fence = device.shared.backend.create_fence()?;

        if flush_first {
            context.flush()?;
        }
        context.signal(fence.as_ref())?;
        context.flush()?;

        self.poll_until_signalled(device, fence.as_ref())
    }

    fn poll_until_signalled(&self, device: &Device, fence: &dyn FenceBackend) -> Result<()> {
        let context = device.context_backend();
        let start = Instant::now();
        loop {
            if context.poll(fence)? {
                return Ok(());
            }
            if start.elapsed() >= self.config.timeout {
                device.check_removed()?;
                return Err(ShareError::SyncTimeout {
                    waited: start.elapsed(),
                });
            }
            if self.config.poll_interval.is_zero() {
                std::thread::yield_now();
            } else {
                std::thread::sleep(self.config.poll_interval);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::adapter::{AdapterSelection, vendor};
    use crate::device::DeviceFactory;
    use crate::diagnostics::MemorySink;
    use crate::driver::{SoftAdapterSpec, SoftwareDriver};
    use crate::format::TextureFormat;

    fn device(latency: Duration) -> (Arc<SoftwareDriver>, Device) {
        let driver = Arc::new(SoftwareDriver::with_adapters(vec![
            SoftAdapterSpec::hardware("GPU", vendor::NVIDIA).with_latency(latency),
        ]));
        let device = DeviceFactory::new(driver.clone())
            .create_device(AdapterSelection::Index(0))
            .unwrap();
        (driver, device)
    }

    #[test]
    fn test_flush_and_wait_with_no_work_is_bounded() {
        let (_, device) = device(Duration::ZERO);
        let gate = SyncGate::new(SyncConfig {
            timeout: Duration::from_millis(200),
            poll_interval: Duration::from_micros(100),
        });
        let start = Instant::now();
        gate.flush_and_wait(&device).unwrap();
        assert!(start.elapsed() < Duration::from_millis(300));
    }

    #[test]
    fn test_flush_and_wait_makes_writes_visible() {
        let (_, device) = device(Duration::from_millis(5));
        let (texture, _) = device
            .create_shared_texture(4, 4, TextureFormat::Bgra8Unorm)
            .unwrap();
        device.clear_texture(&texture, [0.0, 1.0, 0.0, 1.0]).unwrap();
        SyncGate::default().flush_and_wait(&device).unwrap();
        assert_eq!(&device.read_pixels(&texture).unwrap()[..4], &[0, 255, 0, 255]);
    }

    #[test]
    fn test_slow_gpu_times_out_as_device_lost() {
        let (_, device) = device(Duration::from_millis(400));
        let sink = Arc::new(MemorySink::new());
        let gate = SyncGate::new(SyncConfig {
            timeout: Duration::from_millis(20),
            poll_interval: Duration::from_millis(1),
        })
        .with_diagnostics(Diagnostics::new(sink.clone()));

        let err = gate.flush_and_wait(&device).unwrap_err();
        assert!(matches!(err, ShareError::SyncTimeout { .. }));
        assert!(err.is_device_lost());
        assert_eq!(sink.count_for(Operation::FlushAndWait), 1);
    }

    #[test]
    fn test_removed_device_is_lost() {
        let (driver, device) = device(Duration::ZERO);
        driver.simulate_device_removed(0).unwrap();
        let gate = SyncGate::default();
        assert!(matches!(gate.flush(&device), Err(ShareError::DeviceLost(_))));
        assert!(matches!(gate.wait(&device), Err(ShareError::DeviceLost(_))));
    }
}
