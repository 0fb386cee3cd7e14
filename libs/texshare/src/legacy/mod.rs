// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Generation-1 (Direct3D 9Ex) devices, shared textures and surfaces.
//!
//! Legacy sharing goes through a texture's level-0 surface. Pixels reach
//! the shared texture through the memory bridge ([`LegacyDevice::write_to_texture`],
//! [`LegacyDevice::write_to_surface`]) rather than by binding the texture.

mod bridge;

use std::sync::Arc;

use crate::adapter::{AdapterInfo, AdapterLuid, AdapterSelection};
use crate::caps::Generation;
use crate::device::resolve_selection;
use crate::diagnostics::{Diagnostics, Operation};
use crate::driver::{
    LegacyDeviceBackend, LegacyDeviceRequest, LegacyObjectBackend, LegacySurfaceBackend,
    LegacyTextureBackend,
};
use crate::error::{Result, ShareError};
use crate::format::TextureFormat;
use crate::handle::{ShareHandle, SharedTextureInfo};
use crate::texture::{TextureDesc, TextureOrigin};

/// Memory pool of a legacy surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceKind {
    /// System-memory surface, lockable from the CPU.
    Staging,
    /// Default-pool render target.
    RenderTarget,
}

/// The generation-1 API object (`IDirect3D9Ex`).
pub struct LegacyObject {
    backend: Box<dyn LegacyObjectBackend>,
    adapters: Vec<AdapterInfo>,
    diagnostics: Diagnostics,
}

impl LegacyObject {
    pub(crate) fn new(
        backend: Box<dyn LegacyObjectBackend>,
        adapters: Vec<AdapterInfo>,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            backend,
            adapters,
            diagnostics,
        }
    }

    /// Adapters the legacy API sees.
    pub fn adapter_count(&self) -> usize {
        self.backend.adapter_count()
    }

    /// Create an extended device on `selection`.
    ///
    /// A driver without the extended interface cannot share textures and
    /// fails with [`ShareError::LegacyExUnavailable`]; there is no fallback.
    pub fn create_device(
        &self,
        selection: AdapterSelection,
        window: Option<isize>,
    ) -> Result<LegacyDevice> {
        let result = self.try_create_device(selection, window);
        self.diagnostics.check(Operation::CreateLegacyDevice, result)
    }

    fn try_create_device(
        &self,
        selection: AdapterSelection,
        window: Option<isize>,
    ) -> Result<LegacyDevice> {
        let target = resolve_selection(&self.adapters, selection)?;
        let request = LegacyDeviceRequest {
            adapter: target.as_ref().map(|a| a.luid),
            window,
        };
        let backend = self.backend.create_device(&request)?;
        let adapter = backend.adapter();

        tracing::info!(
            "Created {} device on {}",
            Generation::Legacy,
            target
                .as_ref()
                .map(|a| a.name.as_str())
                .unwrap_or("default adapter")
        );

        Ok(LegacyDevice {
            shared: Arc::new(LegacyDeviceShared { backend, adapter }),
            diagnostics: self.diagnostics.clone(),
        })
    }
}

impl std::fmt::Debug for LegacyObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyObject")
            .field("adapter_count", &self.adapter_count())
            .finish()
    }
}

pub(crate) struct LegacyDeviceShared {
    pub(crate) backend: Box<dyn LegacyDeviceBackend>,
    adapter: AdapterLuid,
}

/// A generation-1 device with the extended interface.
pub struct LegacyDevice {
    shared: Arc<LegacyDeviceShared>,
    diagnostics: Diagnostics,
}

impl LegacyDevice {
    pub fn generation(&self) -> Generation {
        Generation::Legacy
    }

    pub fn adapter_luid(&self) -> AdapterLuid {
        self.shared.adapter
    }

    /// `Err(DeviceLost)` once the device is unusable.
    pub fn check_state(&self) -> Result<()> {
        self.shared.backend.check_state()
    }

    /// Allocate a shareable render-target texture.
    ///
    /// Returns the texture, its level-0 surface and the share handle.
    pub fn create_shared_texture(
        &self,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<(LegacyTexture, LegacySurface, ShareHandle)> {
        let result = self.try_create_shared_texture(TextureDesc::new(width, height, format));
        self.diagnostics.check(Operation::CreateSharedTexture, result)
    }

    fn try_create_shared_texture(
        &self,
        desc: TextureDesc,
    ) -> Result<(LegacyTexture, LegacySurface, ShareHandle)> {
        desc.validate()?;
        ensure_legacy_format(desc.format)?;

        let (texture, surface, raw) = self.shared.backend.create_shared_texture(&desc)?;
        let handle = ShareHandle::new(raw, self.shared.adapter, Generation::Legacy);
        tracing::debug!(
            "Created legacy shared texture {}x{} {} (handle {:#x})",
            desc.width,
            desc.height,
            desc.format,
            raw
        );

        Ok((
            LegacyTexture::new(texture, handle, TextureOrigin::Created, &self.shared),
            LegacySurface::new(surface, &self.shared),
            handle,
        ))
    }

    /// Open a texture published by another legacy device. The description
    /// must match the one the texture was created with.
    pub fn open_shared_texture(&self, info: &SharedTextureInfo) -> Result<LegacyTexture> {
        let result = self.try_open_shared_texture(info);
        self.diagnostics.check(Operation::OpenSharedTexture, result)
    }

    fn try_open_shared_texture(&self, info: &SharedTextureInfo) -> Result<LegacyTexture> {
        let handle = info.handle;
        if handle.generation() != Generation::Legacy {
            return Err(ShareError::GenerationMismatch {
                handle: handle.generation(),
                device: Generation::Legacy,
            });
        }
        if handle.adapter() != self.shared.adapter {
            return Err(ShareError::AdapterMismatch {
                handle: handle.adapter(),
                device: self.shared.adapter,
            });
        }
        let desc = TextureDesc::new(info.width, info.height, info.format);
        desc.validate()?;
        ensure_legacy_format(desc.format)?;

        let texture = self.shared.backend.open_shared_texture(&desc, handle.raw())?;
        tracing::debug!("Opened legacy shared texture (handle {:#x})", handle.raw());
        Ok(LegacyTexture::new(
            texture,
            handle,
            TextureOrigin::Opened,
            &self.shared,
        ))
    }

    /// Level-0 surface of a texture on this device.
    pub fn texture_surface(&self, texture: &LegacyTexture) -> Result<LegacySurface> {
        let result = self.ensure_texture(texture).and_then(|_| {
            self.shared
                .backend
                .texture_surface(texture.inner.backend.as_ref())
        });
        self.diagnostics
            .check(Operation::CreateSurface, result)
            .map(|surface| LegacySurface::new(surface, &self.shared))
    }

    /// CPU-lockable system-memory surface.
    pub fn create_staging_surface(
        &self,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<LegacySurface> {
        self.create_surface(TextureDesc::new(width, height, format), SurfaceKind::Staging)
    }

    /// Default-pool render-target surface.
    pub fn create_render_target(
        &self,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<LegacySurface> {
        self.create_surface(
            TextureDesc::new(width, height, format),
            SurfaceKind::RenderTarget,
        )
    }

    fn create_surface(&self, desc: TextureDesc, kind: SurfaceKind) -> Result<LegacySurface> {
        let result = desc
            .validate()
            .and_then(|_| ensure_legacy_format(desc.format))
            .and_then(|_| self.shared.backend.create_surface(&desc, kind));
        self.diagnostics
            .check(Operation::CreateSurface, result)
            .map(|surface| LegacySurface::new(surface, &self.shared))
    }

    /// Fill a staging surface from tightly packed rows.
    pub fn write_surface(&self, surface: &LegacySurface, data: &[u8]) -> Result<()> {
        let result = self.ensure_surface(surface).and_then(|_| {
            let expected = surface.desc().byte_size();
            if data.len() != expected {
                return Err(ShareError::PixelDataSize {
                    expected,
                    actual: data.len(),
                });
            }
            self.shared
                .backend
                .lock_write(surface.inner.backend.as_ref(), data)
        });
        self.diagnostics.check(Operation::WritePixels, result)
    }

    /// Read a staging surface as tightly packed rows.
    pub fn read_surface(&self, surface: &LegacySurface) -> Result<Vec<u8>> {
        let result = self
            .ensure_surface(surface)
            .and_then(|_| self.shared.backend.lock_read(surface.inner.backend.as_ref()));
        self.diagnostics.check(Operation::ReadPixels, result)
    }

    /// Drop one local reference to `texture`; returns the references left.
    pub fn release_texture(&self, texture: LegacyTexture) -> usize {
        if !Arc::ptr_eq(&texture.inner.device, &self.shared) {
            self.diagnostics
                .report(Operation::ReleaseTexture, &ShareError::ForeignObject);
        }
        let remaining = Arc::strong_count(&texture.inner) - 1;
        drop(texture);
        remaining
    }

    /// Release the device; returns the number of textures and surfaces still
    /// holding it.
    pub fn release(self) -> usize {
        let LegacyDevice {
            shared,
            diagnostics,
        } = self;
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

    fn ensure_texture(&self, texture: &LegacyTexture) -> Result<()> {
        if Arc::ptr_eq(&texture.inner.device, &self.shared) {
            Ok(())
        } else {
            Err(ShareError::ForeignObject)
        }
    }

    fn ensure_surface(&self, surface: &LegacySurface) -> Result<()> {
        if Arc::ptr_eq(&surface.inner.device, &self.shared) {
            Ok(())
        } else {
            Err(ShareError::ForeignObject)
        }
    }
}

impl std::fmt::Debug for LegacyDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyDevice")
            .field("adapter", &self.shared.adapter)
            .finish()
    }
}

fn ensure_legacy_format(format: TextureFormat) -> Result<()> {
    match format.d3d9_format() {
        Some(_) => Ok(()),
        None => Err(ShareError::UnsupportedFormat {
            format,
            reason: "no Direct3D 9 equivalent".into(),
        }),
    }
}

struct LegacyTextureShared {
    backend: Box<dyn LegacyTextureBackend>,
    desc: TextureDesc,
    handle: ShareHandle,
    origin: TextureOrigin,
    device: Arc<LegacyDeviceShared>,
}

/// A generation-1 shared texture. Cloning adds a local reference.
#[derive(Clone)]
pub struct LegacyTexture {
    inner: Arc<LegacyTextureShared>,
}

impl LegacyTexture {
    fn new(
        backend: Box<dyn LegacyTextureBackend>,
        handle: ShareHandle,
        origin: TextureOrigin,
        device: &Arc<LegacyDeviceShared>,
    ) -> Self {
        let desc = backend.desc();
        Self {
            inner: Arc::new(LegacyTextureShared {
                backend,
                desc,
                handle,
                origin,
                device: Arc::clone(device),
            }),
        }
    }

    pub fn desc(&self) -> TextureDesc {
        self.inner.desc
    }

    pub fn width(&self) -> u32 {
        self.inner.desc.width
    }

    pub fn height(&self) -> u32 {
        self.inner.desc.height
    }

    pub fn format(&self) -> TextureFormat {
        self.inner.desc.format
    }

    pub fn share_handle(&self) -> ShareHandle {
        self.inner.handle
    }

    pub fn info(&self) -> SharedTextureInfo {
        SharedTextureInfo {
            handle: self.inner.handle,
            width: self.inner.desc.width,
            height: self.inner.desc.height,
            format: self.inner.desc.format,
        }
    }

    pub fn origin(&self) -> TextureOrigin {
        self.inner.origin
    }

    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl std::fmt::Debug for LegacyTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyTexture")
            .field("desc", &self.inner.desc)
            .field("handle", &self.inner.handle)
            .field("origin", &self.inner.origin)
            .finish()
    }
}

struct LegacySurfaceShared {
    backend: Box<dyn LegacySurfaceBackend>,
    device: Arc<LegacyDeviceShared>,
}

/// A generation-1 surface: a texture's level 0, a staging surface or a
/// standalone render target.
#[derive(Clone)]
pub struct LegacySurface {
    inner: Arc<LegacySurfaceShared>,
}

impl LegacySurface {
    fn new(backend: Box<dyn LegacySurfaceBackend>, device: &Arc<LegacyDeviceShared>) -> Self {
        Self {
            inner: Arc::new(LegacySurfaceShared {
                backend,
                device: Arc::clone(device),
            }),
        }
    }

    pub fn desc(&self) -> TextureDesc {
        self.inner.backend.desc()
    }

    pub fn kind(&self) -> SurfaceKind {
        self.inner.backend.kind()
    }
}

impl std::fmt::Debug for LegacySurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacySurface")
            .field("desc", &self.desc())
            .field("kind", &self.kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::vendor;
    use crate::device::DeviceFactory;
    use crate::diagnostics::MemorySink;
    use crate::driver::{SoftAdapterSpec, SoftwareDriver};

    fn factory(specs: Vec<SoftAdapterSpec>) -> DeviceFactory {
        DeviceFactory::new(Arc::new(SoftwareDriver::with_adapters(specs)))
    }

    #[test]
    fn test_missing_ex_interface_is_fatal() {
        let factory = factory(vec![
            SoftAdapterSpec::hardware("Old driver", vendor::INTEL).without_legacy_ex(),
        ]);
        let err = factory
            .create_legacy_device(AdapterSelection::Index(0), None)
            .unwrap_err();
        assert!(matches!(err, ShareError::LegacyExUnavailable(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_release_with_outstanding_surface_reports_leak() {
        let sink = Arc::new(MemorySink::new());
        let device = factory(vec![SoftAdapterSpec::hardware("A", vendor::AMD)])
            .with_diagnostics(Diagnostics::new(sink.clone()))
            .create_legacy_device(AdapterSelection::Index(0), None)
            .unwrap();
        let staging = device
            .create_staging_surface(2, 2, TextureFormat::Bgra8Unorm)
            .unwrap();

        assert_eq!(device.release(), 1);
        assert_eq!(sink.count_for(Operation::ReleaseDevice), 1);
        drop(staging);
    }

    #[test]
    fn test_adapter_count() {
        let factory = factory(vec![
            SoftAdapterSpec::hardware("A", vendor::AMD),
            SoftAdapterSpec::hardware("B", vendor::NVIDIA),
        ]);
        assert_eq!(factory.create_legacy_object().unwrap().adapter_count(), 2);
    }

    #[test]
    fn test_rgba8_is_not_shareable() {
        let device = factory(vec![SoftAdapterSpec::hardware("A", vendor::AMD)])
            .create_legacy_device(AdapterSelection::SystemDefault, None)
            .unwrap();
        assert!(matches!(
            device.create_shared_texture(8, 8, TextureFormat::Rgba8Unorm),
            Err(ShareError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_open_requires_matching_description() {
        let factory = factory(vec![SoftAdapterSpec::hardware("A", vendor::AMD)]);
        let producer = factory
            .create_legacy_device(AdapterSelection::Index(0), None)
            .unwrap();
        let consumer = factory
            .create_legacy_device(AdapterSelection::Index(0), None)
            .unwrap();
        let (texture, surface, _) = producer
            .create_shared_texture(64, 32, TextureFormat::Bgra8Unorm)
            .unwrap();
        assert_eq!(surface.kind(), SurfaceKind::RenderTarget);

        let opened = consumer.open_shared_texture(&texture.info()).unwrap();
        assert_eq!(opened.desc(), texture.desc());
        assert_eq!(opened.origin(), TextureOrigin::Opened);

        let mut wrong = texture.info();
        wrong.width = 63;
        assert!(matches!(
            consumer.open_shared_texture(&wrong),
            Err(ShareError::SurfaceMismatch(_))
        ));
    }
}
