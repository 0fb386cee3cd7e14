// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Generation-1 objects of the software driver. Every call completes
//! synchronously.

use std::any::Any;
use std::sync::Arc;

use super::SoftAdapter;
use super::memory::SoftMemory;
use crate::adapter::AdapterLuid;
use crate::caps::Generation;
use crate::driver::{
    LegacyDeviceBackend, LegacyDeviceRequest, LegacyObjectBackend, LegacySurfaceBackend,
    LegacyTextureBackend, downcast,
};
use crate::error::{Result, ShareError};
use crate::legacy::SurfaceKind;
use crate::texture::TextureDesc;

pub(crate) struct SoftLegacyObject {
    adapters: Vec<Arc<SoftAdapter>>,
}

impl SoftLegacyObject {
    pub(crate) fn new(adapters: Vec<Arc<SoftAdapter>>) -> Self {
        Self { adapters }
    }
}

impl LegacyObjectBackend for SoftLegacyObject {
    fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    fn create_device(&self, request: &LegacyDeviceRequest) -> Result<Box<dyn LegacyDeviceBackend>> {
        let adapter = match request.adapter {
            Some(luid) => self.adapters.iter().find(|a| a.luid() == luid),
            None => self.adapters.first(),
        }
        .ok_or_else(|| ShareError::NoCompatibleDriver("no legacy adapter available".into()))?;

        adapter.check_present()?;
        if !adapter.spec.supports_legacy_ex {
            return Err(ShareError::LegacyExUnavailable(format!(
                "{} has no extended device interface",
                adapter.info.name
            )));
        }

        tracing::debug!("[SoftwareDriver] Legacy device on {}", adapter.info.name);
        Ok(Box::new(SoftLegacyDevice {
            adapter: Arc::clone(adapter),
        }))
    }
}

struct SoftLegacyTexture {
    memory: Arc<SoftMemory>,
}

impl LegacyTextureBackend for SoftLegacyTexture {
    fn desc(&self) -> TextureDesc {
        self.memory.desc()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct SoftLegacySurface {
    memory: Arc<SoftMemory>,
    kind: SurfaceKind,
}

impl LegacySurfaceBackend for SoftLegacySurface {
    fn desc(&self) -> TextureDesc {
        self.memory.desc()
    }

    fn kind(&self) -> SurfaceKind {
        self.kind
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct SoftLegacyDevice {
    adapter: Arc<SoftAdapter>,
}

impl SoftLegacyDevice {
    fn surface<'a>(&self, surface: &'a dyn LegacySurfaceBackend) -> Result<&'a SoftLegacySurface> {
        downcast::<SoftLegacySurface>(surface.as_any(), "surface")
    }

    fn expect_kind(surface: &SoftLegacySurface, kind: SurfaceKind, call: &str) -> Result<()> {
        if surface.kind != kind {
            return Err(ShareError::Driver(format!(
                "{} needs a {:?} surface, got {:?}",
                call, kind, surface.kind
            )));
        }
        Ok(())
    }
}

impl LegacyDeviceBackend for SoftLegacyDevice {
    fn adapter(&self) -> AdapterLuid {
        self.adapter.luid()
    }

    fn create_shared_texture(
        &self,
        desc: &TextureDesc,
    ) -> Result<(
        Box<dyn LegacyTextureBackend>,
        Box<dyn LegacySurfaceBackend>,
        u64,
    )> {
        let memory = SoftMemory::allocate(&self.adapter, *desc, Some(Generation::Legacy))?;
        let raw = memory.raw();
        let surface = SoftLegacySurface {
            memory: Arc::clone(&memory),
            kind: SurfaceKind::RenderTarget,
        };
        Ok((Box::new(SoftLegacyTexture { memory }), Box::new(surface), raw))
    }

    fn open_shared_texture(
        &self,
        desc: &TextureDesc,
        raw: u64,
    ) -> Result<Box<dyn LegacyTextureBackend>> {
        let memory = SoftMemory::open(raw, &self.adapter, Generation::Legacy)?;
        if memory.desc() != *desc {
            return Err(ShareError::SurfaceMismatch(format!(
                "published description {:?} does not match shared texture {:?}",
                desc,
                memory.desc()
            )));
        }
        Ok(Box::new(SoftLegacyTexture { memory }))
    }

    fn texture_surface(
        &self,
        texture: &dyn LegacyTextureBackend,
    ) -> Result<Box<dyn LegacySurfaceBackend>> {
        let texture = downcast::<SoftLegacyTexture>(texture.as_any(), "texture")?;
        Ok(Box::new(SoftLegacySurface {
            memory: Arc::clone(&texture.memory),
            kind: SurfaceKind::RenderTarget,
        }))
    }

    fn create_surface(
        &self,
        desc: &TextureDesc,
        kind: SurfaceKind,
    ) -> Result<Box<dyn LegacySurfaceBackend>> {
        let memory = SoftMemory::allocate(&self.adapter, *desc, None)?;
        Ok(Box::new(SoftLegacySurface { memory, kind }))
    }

    fn update_surface(
        &self,
        src: &dyn LegacySurfaceBackend,
        dst: &dyn LegacySurfaceBackend,
    ) -> Result<()> {
        self.check_state()?;
        let (src, dst) = (self.surface(src)?, self.surface(dst)?);
        Self::expect_kind(src, SurfaceKind::Staging, "UpdateSurface source")?;
        Self::expect_kind(dst, SurfaceKind::RenderTarget, "UpdateSurface destination")?;
        dst.memory.copy_from(&src.memory)
    }

    fn stretch_rect(
        &self,
        src: &dyn LegacySurfaceBackend,
        dst: &dyn LegacySurfaceBackend,
    ) -> Result<()> {
        self.check_state()?;
        let (src, dst) = (self.surface(src)?, self.surface(dst)?);
        Self::expect_kind(src, SurfaceKind::RenderTarget, "StretchRect source")?;
        Self::expect_kind(dst, SurfaceKind::RenderTarget, "StretchRect destination")?;
        dst.memory.copy_from(&src.memory)
    }

    fn get_render_target_data(
        &self,
        src: &dyn LegacySurfaceBackend,
        dst: &dyn LegacySurfaceBackend,
    ) -> Result<()> {
        self.check_state()?;
        let (src, dst) = (self.surface(src)?, self.surface(dst)?);
        Self::expect_kind(src, SurfaceKind::RenderTarget, "GetRenderTargetData source")?;
        Self::expect_kind(dst, SurfaceKind::Staging, "GetRenderTargetData destination")?;
        dst.memory.copy_from(&src.memory)
    }

    fn lock_read(&self, surface: &dyn LegacySurfaceBackend) -> Result<Vec<u8>> {
        self.check_state()?;
        let surface = self.surface(surface)?;
        Self::expect_kind(surface, SurfaceKind::Staging, "LockRect")?;
        Ok(surface.memory.read())
    }

    fn lock_write(&self, surface: &dyn LegacySurfaceBackend, data: &[u8]) -> Result<()> {
        self.check_state()?;
        let surface = self.surface(surface)?;
        Self::expect_kind(surface, SurfaceKind::Staging, "LockRect")?;
        surface.memory.write(data)
    }

    fn check_state(&self) -> Result<()> {
        self.adapter.check_present()
    }
}
