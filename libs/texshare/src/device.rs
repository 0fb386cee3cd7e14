// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Device factory and generation-2 devices.
//!
//! A [`Device`] owns its [`ImmediateContext`] and is used from one thread at
//! a time (it is `Send` but not `Sync`). Textures keep the device's shared
//! state alive, so release order mistakes leak instead of dangling.

use std::sync::Arc;

use crate::adapter::{AdapterDirectory, AdapterInfo, AdapterLuid, AdapterSelection};
use crate::caps::{DriverType, FeatureLevel, Generation};
use crate::diagnostics::{Diagnostics, Operation};
use crate::driver::{ContextBackend, DeviceBackend, DeviceRequest, Driver, DriverBackend};
use crate::error::{Result, ShareError};
use crate::format::TextureFormat;
use crate::handle::ShareHandle;
use crate::legacy::{LegacyDevice, LegacyObject};
use crate::texture::{SharedTexture, TextureDesc, TextureOrigin};

/// Device creation options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceOptions {
    /// Accept WARP / reference devices when no hardware device is available.
    pub allow_software_fallback: bool,
    /// Request the driver's debug layer.
    pub debug_layer: bool,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            allow_software_fallback: true,
            debug_layer: false,
        }
    }
}

/// Creates devices of either generation on a driver.
#[derive(Clone)]
pub struct DeviceFactory {
    driver: Arc<dyn Driver>,
    diagnostics: Diagnostics,
    options: DeviceOptions,
}

impl DeviceFactory {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            diagnostics: Diagnostics::default(),
            options: DeviceOptions::default(),
        }
    }

    /// Factory on a freshly opened driver for `backend`.
    pub fn open(backend: DriverBackend) -> Result<Self> {
        Ok(Self::new(backend.open()?))
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_options(mut self, options: DeviceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn options(&self) -> DeviceOptions {
        self.options
    }

    /// Enumerate the driver's adapters, reporting through this factory's sink.
    pub fn adapter_directory(&self) -> AdapterDirectory {
        AdapterDirectory::enumerate_with(self.driver.as_ref(), self.diagnostics.clone())
    }

    /// Create a generation-2 device and its immediate context.
    ///
    /// Negotiates the highest feature level the adapter supports. With
    /// [`AdapterSelection::SystemDefault`] driver types are tried in order
    /// hardware, WARP, reference; an explicit adapter takes whatever type the
    /// adapter is.
    pub fn create_device(&self, selection: AdapterSelection) -> Result<Device> {
        let result = self.try_create_device(selection);
        self.diagnostics.check(Operation::CreateDevice, result)
    }

    fn try_create_device(&self, selection: AdapterSelection) -> Result<Device> {
        let adapters = self.enumerate();
        let target = resolve_selection(&adapters, selection)?;

        if let Some(adapter) = &target {
            if adapter.software && !self.options.allow_software_fallback {
                return Err(ShareError::NoCompatibleDriver(format!(
                    "{} is a software adapter and software fallback is disabled",
                    adapter.name
                )));
            }
        }

        let driver_types = if self.options.allow_software_fallback {
            DriverType::NEGOTIATION_ORDER.to_vec()
        } else {
            vec![DriverType::Hardware]
        };
        let request = DeviceRequest {
            adapter: target.as_ref().map(|a| a.luid),
            feature_levels: FeatureLevel::NEGOTIATION_ORDER.to_vec(),
            driver_types,
            debug_layer: self.options.debug_layer,
        };

        let created = self.driver.create_device(&request)?;
        let adapter = adapters.into_iter().find(|a| a.luid == created.adapter);

        tracing::info!(
            "Created {} device on {} (feature level {}, {} driver)",
            Generation::Current,
            adapter.as_ref().map(|a| a.name.as_str()).unwrap_or("default adapter"),
            created.feature_level,
            created.driver_type
        );

        Ok(Device {
            shared: Arc::new(DeviceShared {
                backend: created.device,
                adapter_luid: created.adapter,
                adapter,
                feature_level: created.feature_level,
                driver_type: created.driver_type,
            }),
            context: ImmediateContext {
                backend: created.context,
            },
            diagnostics: self.diagnostics.clone(),
        })
    }

    /// Create the generation-1 API object.
    pub fn create_legacy_object(&self) -> Result<LegacyObject> {
        let result = self
            .driver
            .create_legacy_object()
            .map(|backend| LegacyObject::new(backend, self.enumerate(), self.diagnostics.clone()));
        self.diagnostics.check(Operation::CreateLegacyObject, result)
    }

    /// Create the generation-1 API object and an extended device on
    /// `selection`, bound to `window` (the desktop window when `None`).
    pub fn create_legacy_device(
        &self,
        selection: AdapterSelection,
        window: Option<isize>,
    ) -> Result<LegacyDevice> {
        self.create_legacy_object()?.create_device(selection, window)
    }

    fn enumerate(&self) -> Vec<AdapterInfo> {
        match self.driver.enumerate_adapters() {
            Ok(adapters) => adapters,
            Err(e) => {
                self.diagnostics.report(Operation::EnumerateAdapters, &e);
                Vec::new()
            }
        }
    }
}

impl std::fmt::Debug for DeviceFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceFactory")
            .field("backend", &self.driver.backend())
            .field("options", &self.options)
            .finish()
    }
}

/// Adapter an explicit selection refers to, `None` for the system default.
pub(crate) fn resolve_selection(
    adapters: &[AdapterInfo],
    selection: AdapterSelection,
) -> Result<Option<AdapterInfo>> {
    match selection {
        AdapterSelection::SystemDefault => Ok(None),
        AdapterSelection::Index(_) if adapters.is_empty() => Err(ShareError::NoAdapters),
        AdapterSelection::Index(index) => adapters
            .get(index)
            .cloned()
            .map(Some)
            .ok_or(ShareError::AdapterOutOfRange {
                index,
                count: adapters.len(),
            }),
    }
}

/// State shared between a device and every texture it created or opened.
pub(crate) struct DeviceShared {
    pub(crate) backend: Box<dyn DeviceBackend>,
    pub(crate) adapter_luid: AdapterLuid,
    pub(crate) adapter: Option<AdapterInfo>,
    pub(crate) feature_level: FeatureLevel,
    pub(crate) driver_type: DriverType,
}

/// Command-submission queue of a generation-2 device.
pub struct ImmediateContext {
    pub(crate) backend: Box<dyn ContextBackend>,
}

impl ImmediateContext {
    /// Submit pending commands without waiting.
    pub fn flush(&self) -> Result<()> {
        self.backend.flush()
    }
}

/// A generation-2 rendering device bound to one adapter.
pub struct Device {
    pub(crate) shared: Arc<DeviceShared>,
    context: ImmediateContext,
    diagnostics: Diagnostics,
}

impl Device {
    pub fn generation(&self) -> Generation {
        Generation::Current
    }

    pub fn feature_level(&self) -> FeatureLevel {
        self.shared.feature_level
    }

    pub fn driver_type(&self) -> DriverType {
        self.shared.driver_type
    }

    pub fn adapter_luid(&self) -> AdapterLuid {
        self.shared.adapter_luid
    }

    /// Enumerated description of the device's adapter, when the driver
    /// reported one.
    pub fn adapter(&self) -> Option<&AdapterInfo> {
        self.shared.adapter.as_ref()
    }

    pub fn immediate_context(&self) -> &ImmediateContext {
        &self.context
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// `Err(DeviceLost)` once the driver has removed the device.
    pub fn check_removed(&self) -> Result<()> {
        match self.shared.backend.removed_reason() {
            Some(reason) => Err(ShareError::DeviceLost(reason)),
            None => Ok(()),
        }
    }

    /// Whether the device can allocate a shareable texture of `format`.
    pub fn supports_format(&self, format: TextureFormat) -> bool {
        format.min_feature_level() <= self.shared.feature_level
            && self.shared.backend.supports_shared_format(format)
    }

    /// Allocate a shareable 2D texture and mint its share handle.
    ///
    /// On failure nothing stays allocated.
    pub fn create_shared_texture(
        &self,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<(SharedTexture, ShareHandle)> {
        let result = self.try_create_shared_texture(TextureDesc::new(width, height, format));
        self.diagnostics.check(Operation::CreateSharedTexture, result)
    }

    fn try_create_shared_texture(&self, desc: TextureDesc) -> Result<(SharedTexture, ShareHandle)> {
        desc.validate()?;

        let required = desc.format.min_feature_level();
        if required > self.shared.feature_level {
            return Err(ShareError::UnsupportedFormat {
                format: desc.format,
                reason: format!(
                    "needs feature level {}, device has {}",
                    required, self.shared.feature_level
                ),
            });
        }
        if !self.shared.backend.supports_shared_format(desc.format) {
            return Err(ShareError::UnsupportedFormat {
                format: desc.format,
                reason: "not shareable on this device".into(),
            });
        }
        self.check_removed()?;

        let (backend, raw) = self.shared.backend.create_shared_texture(&desc)?;
        let handle = ShareHandle::new(raw, self.shared.adapter_luid, Generation::Current);
        tracing::debug!(
            "Created shared texture {}x{} {} (handle {:#x})",
            desc.width,
            desc.height,
            desc.format,
            raw
        );

        let texture = SharedTexture::new(
            backend,
            handle,
            TextureOrigin::Created,
            Arc::clone(&self.shared),
        );
        Ok((texture, handle))
    }

    /// Bind the texture behind a handle minted by another device.
    ///
    /// A handle exported on a different adapter fails with
    /// [`ShareError::AdapterMismatch`]; one whose owners are all gone fails
    /// with [`ShareError::StaleHandle`].
    pub fn open_shared_texture(&self, handle: &ShareHandle) -> Result<SharedTexture> {
        let result = self.try_open_shared_texture(handle);
        self.diagnostics.check(Operation::OpenSharedTexture, result)
    }

    fn try_open_shared_texture(&self, handle: &ShareHandle) -> Result<SharedTexture> {
        if handle.generation() != Generation::Current {
            return Err(ShareError::GenerationMismatch {
                handle: handle.generation(),
                device: Generation::Current,
            });
        }
        if handle.adapter() != self.shared.adapter_luid {
            return Err(ShareError::AdapterMismatch {
                handle: handle.adapter(),
                device: self.shared.adapter_luid,
            });
        }

        let backend = self.shared.backend.open_shared_texture(handle.raw())?;
        let texture = SharedTexture::new(
            backend,
            *handle,
            TextureOrigin::Opened,
            Arc::clone(&self.shared),
        );
        tracing::debug!(
            "Opened shared texture {}x{} {} (handle {:#x})",
            texture.width(),
            texture.height(),
            texture.format(),
            handle.raw()
        );
        Ok(texture)
    }

    /// Drop one local reference to `texture`; returns the references left.
    pub fn release_texture(&self, texture: SharedTexture) -> usize {
        if !texture.belongs_to(&self.shared) {
            self.diagnostics
                .report(Operation::ReleaseTexture, &ShareError::ForeignObject);
        }
        let remaining = Arc::strong_count(&texture.inner) - 1;
        drop(texture);
        if remaining > 0 {
            tracing::debug!("Texture released, {} local reference(s) remain", remaining);
        }
        remaining
    }

    /// Release the device and its context; returns the number of textures
    /// still holding the device. Non-zero means a leak.
    pub fn release(self) -> usize {
        let Device {
            shared,
            context,
            diagnostics,
        } = self;
        drop(context);
        let remaining = Arc::strong_count(&shared) - 1;
        drop(shared);
        if remaining > 0 {
            diagnostics.report(
                Operation::ReleaseDevice,
                &ShareError::Leaked { count: remaining },
            );
        }
        remaining
    }

    /// Enqueue a clear of the whole texture to `rgba`.
    pub fn clear_texture(&self, texture: &SharedTexture, rgba: [f32; 4]) -> Result<()> {
        let result = self
            .ensure_owned(texture)
            .and_then(|_| self.context.backend.clear(texture.backend(), rgba));
        self.diagnostics.check(Operation::ClearTexture, result)
    }

    /// Enqueue an upload of tightly packed pixel rows.
    pub fn write_pixels(&self, texture: &SharedTexture, data: &[u8]) -> Result<()> {
        let result = self.ensure_owned(texture).and_then(|_| {
            let expected = texture.desc().byte_size();
            if data.len() != expected {
                return Err(ShareError::PixelDataSize {
                    expected,
                    actual: data.len(),
                });
            }
            self.context.backend.write_pixels(texture.backend(), data)
        });
        self.diagnostics.check(Operation::WritePixels, result)
    }

    /// Read back tightly packed pixel rows. Blocks until pending work on
    /// this context completes.
    pub fn read_pixels(&self, texture: &SharedTexture) -> Result<Vec<u8>> {
        let result = self
            .ensure_owned(texture)
            .and_then(|_| self.context.backend.read_pixels(texture.backend()));
        self.diagnostics.check(Operation::ReadPixels, result)
    }

    fn ensure_owned(&self, texture: &SharedTexture) -> Result<()> {
        if texture.belongs_to(&self.shared) {
            Ok(())
        } else {
            Err(ShareError::ForeignObject)
        }
    }

    pub(crate) fn context_backend(&self) -> &dyn ContextBackend {
        self.context.backend.as_ref()
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("adapter", &self.shared.adapter_luid)
            .field("feature_level", &self.shared.feature_level)
            .field("driver_type", &self.shared.driver_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::vendor;
    use crate::diagnostics::MemorySink;
    use crate::driver::{SoftAdapterSpec, SoftwareDriver};

    fn factory() -> DeviceFactory {
        DeviceFactory::new(Arc::new(SoftwareDriver::with_adapters(vec![
            SoftAdapterSpec::hardware("GPU 0", vendor::NVIDIA),
            SoftAdapterSpec::hardware("GPU 1", vendor::AMD),
            SoftAdapterSpec::warp(),
        ])))
    }

    #[test]
    fn test_create_device_on_selected_adapter() {
        let device = factory().create_device(AdapterSelection::Index(1)).unwrap();
        assert_eq!(device.adapter().unwrap().name, "GPU 1");
        assert_eq!(device.feature_level(), FeatureLevel::L11_1);
        assert_eq!(device.driver_type(), DriverType::Hardware);
    }

    #[test]
    fn test_default_adapter_prefers_hardware() {
        let device = factory().create_device(AdapterSelection::SystemDefault).unwrap();
        assert_eq!(device.adapter().unwrap().index, 0);
    }

    #[test]
    fn test_selection_out_of_range() {
        let result = factory().create_device(AdapterSelection::Index(3));
        assert!(matches!(
            result,
            Err(ShareError::AdapterOutOfRange { index: 3, count: 3 })
        ));
    }

    #[test]
    fn test_software_adapter_rejected_without_fallback() {
        let factory = factory().with_options(DeviceOptions {
            allow_software_fallback: false,
            debug_layer: false,
        });
        assert!(matches!(
            factory.create_device(AdapterSelection::Index(2)),
            Err(ShareError::NoCompatibleDriver(_))
        ));
    }

    #[test]
    fn test_invalid_size_and_format() {
        let sink = Arc::new(MemorySink::new());
        let factory = DeviceFactory::new(Arc::new(SoftwareDriver::with_adapters(vec![
            SoftAdapterSpec::hardware("DX10", vendor::INTEL)
                .with_feature_level(FeatureLevel::L10_0),
        ])))
        .with_diagnostics(Diagnostics::new(sink.clone()));
        let device = factory.create_device(AdapterSelection::Index(0)).unwrap();

        assert!(matches!(
            device.create_shared_texture(0, 64, TextureFormat::Bgra8Unorm),
            Err(ShareError::InvalidDimensions { .. })
        ));
        assert_eq!(sink.count_for(Operation::CreateSharedTexture), 1);
        assert!(device.supports_format(TextureFormat::Rgba16Float));
    }

    #[test]
    fn test_write_pixels_checks_size() {
        let device = factory().create_device(AdapterSelection::Index(0)).unwrap();
        let (texture, _) = device
            .create_shared_texture(2, 2, TextureFormat::Bgra8Unorm)
            .unwrap();
        assert!(matches!(
            device.write_pixels(&texture, &[0u8; 15]),
            Err(ShareError::PixelDataSize {
                expected: 16,
                actual: 15
            })
        ));

        let pixels: Vec<u8> = (0..16).collect();
        device.write_pixels(&texture, &pixels).unwrap();
        assert_eq!(device.read_pixels(&texture).unwrap(), pixels);
    }

    #[test]
    fn test_foreign_texture_rejected() {
        let factory = factory();
        let a = factory.create_device(AdapterSelection::Index(0)).unwrap();
        let b = factory.create_device(AdapterSelection::Index(0)).unwrap();
        let (texture, _) = a.create_shared_texture(4, 4, TextureFormat::Bgra8Unorm).unwrap();
        assert!(matches!(
            b.read_pixels(&texture),
            Err(ShareError::ForeignObject)
        ));
    }

    #[test]
    fn test_release_counts() {
        let device = factory().create_device(AdapterSelection::Index(0)).unwrap();
        let (texture, _) = device
            .create_shared_texture(8, 8, TextureFormat::Bgra8Unorm)
            .unwrap();
        let extra = texture.clone();
        assert_eq!(device.release_texture(texture), 1);
        assert_eq!(device.release_texture(extra), 0);
        assert_eq!(device.release(), 0);
    }

    #[test]
    fn test_device_release_with_live_texture_reports_leak() {
        let device = factory().create_device(AdapterSelection::Index(0)).unwrap();
        let (texture, _) = device
            .create_shared_texture(8, 8, TextureFormat::Bgra8Unorm)
            .unwrap();
        assert_eq!(device.release(), 1);
        assert_eq!(texture.width(), 8);
    }
}
