// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Legacy memory bridge: copies between surfaces and shared textures.

use super::{LegacyDevice, LegacySurface, LegacyTexture, SurfaceKind};
use crate::diagnostics::Operation;
use crate::error::{Result, ShareError};
use crate::texture::TextureDesc;

impl LegacyDevice {
    /// Copy `surface` into the shared `texture`.
    ///
    /// Staging surfaces go through `UpdateSurface`, render targets through
    /// `StretchRect`.
    pub fn write_to_texture(&self, surface: &LegacySurface, texture: &LegacyTexture) -> Result<()> {
        let result = self.try_write_to_texture(surface, texture);
        self.diagnostics.check(Operation::WriteToTexture, result)
    }

    fn try_write_to_texture(&self, surface: &LegacySurface, texture: &LegacyTexture) -> Result<()> {
        self.ensure_surface(surface)?;
        self.ensure_texture(texture)?;
        check_same_shape(surface.desc(), texture.desc())?;

        let backend = &self.shared.backend;
        let target = backend.texture_surface(texture.inner.backend.as_ref())?;
        let source = surface.inner.backend.as_ref();
        match surface.kind() {
            SurfaceKind::Staging => backend.update_surface(source, target.as_ref()),
            SurfaceKind::RenderTarget => backend.stretch_rect(source, target.as_ref()),
        }
    }

    /// Copy the shared `texture` into `surface`.
    ///
    /// Staging surfaces are filled with `GetRenderTargetData`, render targets
    /// with `StretchRect`.
    pub fn write_to_surface(&self, texture: &LegacyTexture, surface: &LegacySurface) -> Result<()> {
        let result = self.try_write_to_surface(texture, surface);
        self.diagnostics.check(Operation::WriteToSurface, result)
    }

    fn try_write_to_surface(&self, texture: &LegacyTexture, surface: &LegacySurface) -> Result<()> {
        self.ensure_texture(texture)?;
        self.ensure_surface(surface)?;
        check_same_shape(texture.desc(), surface.desc())?;

        let backend = &self.shared.backend;
        let source = backend.texture_surface(texture.inner.backend.as_ref())?;
        let target = surface.inner.backend.as_ref();
        match surface.kind() {
            SurfaceKind::Staging => backend.get_render_target_data(source.as_ref(), target),
            SurfaceKind::RenderTarget => backend.stretch_rect(source.as_ref(), target),
        }
    }
}

fn check_same_shape(src: TextureDesc, dst: TextureDesc) -> Result<()> {
    if src.width != dst.width || src.height != dst.height {
        return Err(ShareError::SurfaceMismatch(format!(
            "{}x{} source, {}x{} destination",
            src.width, src.height, dst.width, dst.height
        )));
    }
    if src.format != dst.format {
        return Err(ShareError::SurfaceMismatch(format!(
            "{} source, {} destination",
            src.format, dst.format
        )));
    }
    Ok(())
}
