// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Shared texture objects.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::device::DeviceShared;
use crate::driver::TextureBackend;
use crate::error::{Result, ShareError};
use crate::format::TextureFormat;
use crate::handle::{ShareHandle, SharedTextureInfo};

/// Size and format of a 2D texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

impl TextureDesc {
    pub fn new(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    /// Reject zero-sized textures.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ShareError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }

    /// Tightly packed row size in bytes.
    pub fn row_pitch(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel() as usize
    }

    /// Tightly packed image size in bytes.
    pub fn byte_size(&self) -> usize {
        self.row_pitch() * self.height as usize
    }
}

/// How a local texture object came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureOrigin {
    /// Allocated by this process.
    Created,
    /// Bound from a share handle minted elsewhere.
    Opened,
}

pub(crate) struct TextureShared {
    pub(crate) backend: Box<dyn TextureBackend>,
    pub(crate) desc: TextureDesc,
    pub(crate) handle: ShareHandle,
    pub(crate) origin: TextureOrigin,
    pub(crate) device: Arc<DeviceShared>,
}

/// A local reference to shared GPU memory.
///
/// Cloning adds a reference; the GPU object is freed when the last clone is
/// released. Every texture keeps the device state alive until the last texture
/// drops; after [`Device::release`](crate::Device::release) its pixels can no
/// longer be read or written through that device.
#[derive(Clone)]
pub struct SharedTexture {
    pub(crate) inner: Arc<TextureShared>,
}

impl SharedTexture {
    pub(crate) fn new(
        backend: Box<dyn TextureBackend>,
        handle: ShareHandle,
        origin: TextureOrigin,
        device: Arc<DeviceShared>,
    ) -> Self {
        let desc = backend.desc();
        Self {
            inner: Arc::new(TextureShared {
                backend,
                desc,
                handle,
                origin,
                device,
            }),
        }
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

    pub fn desc(&self) -> TextureDesc {
        self.inner.desc
    }

    /// The handle other processes open this texture with.
    pub fn share_handle(&self) -> ShareHandle {
        self.inner.handle
    }

    /// Handle plus description, ready to publish.
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

    pub fn is_imported(&self) -> bool {
        self.inner.origin == TextureOrigin::Opened
    }

    /// Number of live local references to this texture object.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub(crate) fn backend(&self) -> &dyn TextureBackend {
        self.inner.backend.as_ref()
    }

    pub(crate) fn belongs_to(&self, device: &Arc<DeviceShared>) -> bool {
        Arc::ptr_eq(&self.inner.device, device)
    }
}

impl std::fmt::Debug for SharedTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTexture")
            .field("desc", &self.inner.desc)
            .field("handle", &self.inner.handle)
            .field("origin", &self.inner.origin)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desc_validation() {
        assert!(TextureDesc::new(512, 512, TextureFormat::Bgra8Unorm).validate().is_ok());
        assert!(matches!(
            TextureDesc::new(0, 16, TextureFormat::Bgra8Unorm).validate(),
            Err(ShareError::InvalidDimensions { width: 0, height: 16 })
        ));
        assert!(TextureDesc::new(16, 0, TextureFormat::Bgra8Unorm).validate().is_err());
    }

    #[test]
    fn test_desc_sizes() {
        let desc = TextureDesc::new(4, 3, TextureFormat::Rgba16Float);
        assert_eq!(desc.row_pitch(), 32);
        assert_eq!(desc.byte_size(), 96);
    }
}
