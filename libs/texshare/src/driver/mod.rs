// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Driver seam.
//!
//! The public device, texture and sync types are written once against these
//! traits. Backends:
//! - [`SoftwareDriver`]: in-process reference driver, every platform
//! - `D3dDriver`: Direct3D 11 / 9Ex over DXGI, Windows only
//!
//! The backend can be selected at runtime via:
//! 1. Explicit parameter passed to [`DriverBackend::resolve`]
//! 2. `TEXSHARE_DRIVER` environment variable
//! 3. Platform default (Direct3D on Windows, software elsewhere)

use std::any::Any;
use std::str::FromStr;
use std::sync::Arc;

use crate::adapter::{AdapterInfo, AdapterLuid};
use crate::caps::{DriverType, FeatureLevel};
use crate::error::{Result, ShareError};
use crate::format::TextureFormat;
use crate::legacy::SurfaceKind;
use crate::texture::TextureDesc;

mod software;

#[cfg(windows)]
mod d3d11;
#[cfg(windows)]
mod d3d9;
#[cfg(windows)]
mod dxgi;

pub use software::{SoftAdapterSpec, SoftwareDriver};

#[cfg(windows)]
pub use dxgi::D3dDriver;

/// Driver backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverBackend {
    /// Direct3D 11 / 9Ex (Windows).
    D3d,
    /// In-process software reference driver.
    Software,
}

impl DriverBackend {
    /// Environment variable name for backend override.
    pub const ENV_VAR: &'static str = "TEXSHARE_DRIVER";

    /// Resolve the backend to use.
    ///
    /// Resolution priority:
    /// 1. Explicit value (if provided)
    /// 2. `TEXSHARE_DRIVER` environment variable
    /// 3. Platform default
    pub fn resolve(explicit: Option<Self>) -> Self {
        if let Some(backend) = explicit {
            return backend;
        }

        if let Ok(env_value) = std::env::var(Self::ENV_VAR) {
            match env_value.parse() {
                Ok(backend) => return backend,
                Err(e) => tracing::warn!("Ignoring {}: {}", Self::ENV_VAR, e),
            }
        }

        Self::platform_default()
    }

    /// Get the platform default backend.
    #[cfg(windows)]
    pub fn platform_default() -> Self {
        Self::D3d
    }

    /// Get the platform default backend.
    #[cfg(not(windows))]
    pub fn platform_default() -> Self {
        Self::Software
    }

    /// Check if this backend is available on the current platform.
    pub fn is_available(&self) -> bool {
        match self {
            Self::D3d => cfg!(windows),
            Self::Software => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::D3d => "d3d",
            Self::Software => "software",
        }
    }

    /// Instantiate the driver for this backend.
    pub fn open(&self) -> Result<Arc<dyn Driver>> {
        match self {
            Self::Software => Ok(Arc::new(SoftwareDriver::default())),
            #[cfg(windows)]
            Self::D3d => Ok(Arc::new(D3dDriver::new())),
            #[cfg(not(windows))]
            Self::D3d => Err(ShareError::Configuration(
                "the d3d driver is only available on Windows".into(),
            )),
        }
    }
}

impl FromStr for DriverBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "d3d" | "d3d11" | "directx" => Ok(Self::D3d),
            "software" | "soft" | "reference" => Ok(Self::Software),
            _ => Err(format!(
                "Unknown driver '{}'. Valid values: d3d, software",
                s
            )),
        }
    }
}

impl std::fmt::Display for DriverBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Generation-2 device creation parameters.
#[derive(Debug, Clone)]
pub struct DeviceRequest {
    /// Target adapter; `None` lets the driver choose.
    pub adapter: Option<AdapterLuid>,
    /// Feature levels to negotiate, highest first.
    pub feature_levels: Vec<FeatureLevel>,
    /// Driver types to try when no adapter is given, in order.
    pub driver_types: Vec<DriverType>,
    pub debug_layer: bool,
}

/// Result of a successful generation-2 device creation.
pub struct CreatedDevice {
    pub device: Box<dyn DeviceBackend>,
    pub context: Box<dyn ContextBackend>,
    pub adapter: AdapterLuid,
    pub feature_level: FeatureLevel,
    pub driver_type: DriverType,
}

/// Generation-1 device creation parameters.
#[derive(Debug, Clone, Default)]
pub struct LegacyDeviceRequest {
    pub adapter: Option<AdapterLuid>,
    /// Focus window (`HWND`). `None` uses the desktop window.
    pub window: Option<isize>,
}

/// Entry point of a backend.
pub trait Driver: Send + Sync {
    fn backend(&self) -> DriverBackend;

    /// Adapters in driver enumeration order.
    fn enumerate_adapters(&self) -> Result<Vec<AdapterInfo>>;

    fn create_device(&self, request: &DeviceRequest) -> Result<CreatedDevice>;

    /// Create the generation-1 API object.
    fn create_legacy_object(&self) -> Result<Box<dyn LegacyObjectBackend>>;
}

/// Generation-2 device. Free-threaded for resource creation.
pub trait DeviceBackend: Send + Sync {
    fn supports_shared_format(&self, format: TextureFormat) -> bool;

    /// Allocate a shareable 2D texture; returns it with its raw share handle.
    fn create_shared_texture(&self, desc: &TextureDesc) -> Result<(Box<dyn TextureBackend>, u64)>;

    fn open_shared_texture(&self, raw: u64) -> Result<Box<dyn TextureBackend>>;

    /// Fence object for completion queries.
    fn create_fence(&self) -> Result<Box<dyn FenceBackend>>;

    /// Why the device was removed, if it was.
    fn removed_reason(&self) -> Option<String>;
}

/// Generation-2 immediate context. Single-threaded.
pub trait ContextBackend: Send {
    /// Submit pending commands without waiting.
    fn flush(&self) -> Result<()>;

    fn clear(&self, texture: &dyn TextureBackend, color: [f32; 4]) -> Result<()>;

    fn write_pixels(&self, texture: &dyn TextureBackend, data: &[u8]) -> Result<()>;

    /// Copy to staging and map. Blocks until the copy completes.
    fn read_pixels(&self, texture: &dyn TextureBackend) -> Result<Vec<u8>>;

    /// Enqueue a completion marker for `fence`.
    fn signal(&self, fence: &dyn FenceBackend) -> Result<()>;

    /// Whether the GPU has passed the fence's marker. Implicitly submits
    /// pending work.
    fn poll(&self, fence: &dyn FenceBackend) -> Result<bool>;
}

pub trait TextureBackend: Send + Sync {
    fn desc(&self) -> TextureDesc;
    fn as_any(&self) -> &dyn Any;
}

pub trait FenceBackend: Send {
    fn as_any(&self) -> &dyn Any;
}

/// Generation-1 API object.
pub trait LegacyObjectBackend: Send + Sync {
    fn adapter_count(&self) -> usize;

    /// Create a device with the extended interface. Fails with
    /// [`ShareError::LegacyExUnavailable`] when the driver lacks it.
    fn create_device(&self, request: &LegacyDeviceRequest) -> Result<Box<dyn LegacyDeviceBackend>>;
}

/// Generation-1 device.
pub trait LegacyDeviceBackend: Send + Sync {
    fn adapter(&self) -> AdapterLuid;

    /// Returns the texture, its level-0 surface and the raw share handle.
    fn create_shared_texture(
        &self,
        desc: &TextureDesc,
    ) -> Result<(
        Box<dyn LegacyTextureBackend>,
        Box<dyn LegacySurfaceBackend>,
        u64,
    )>;

    fn open_shared_texture(
        &self,
        desc: &TextureDesc,
        raw: u64,
    ) -> Result<Box<dyn LegacyTextureBackend>>;

    fn texture_surface(
        &self,
        texture: &dyn LegacyTextureBackend,
    ) -> Result<Box<dyn LegacySurfaceBackend>>;

    fn create_surface(
        &self,
        desc: &TextureDesc,
        kind: SurfaceKind,
    ) -> Result<Box<dyn LegacySurfaceBackend>>;

    /// System-memory surface into a default-pool surface.
    fn update_surface(
        &self,
        src: &dyn LegacySurfaceBackend,
        dst: &dyn LegacySurfaceBackend,
    ) -> Result<()>;

    /// GPU copy between default-pool surfaces.
    fn stretch_rect(
        &self,
        src: &dyn LegacySurfaceBackend,
        dst: &dyn LegacySurfaceBackend,
    ) -> Result<()>;

    /// Default-pool surface into a system-memory surface.
    fn get_render_target_data(
        &self,
        src: &dyn LegacySurfaceBackend,
        dst: &dyn LegacySurfaceBackend,
    ) -> Result<()>;

    fn lock_read(&self, surface: &dyn LegacySurfaceBackend) -> Result<Vec<u8>>;

    fn lock_write(&self, surface: &dyn LegacySurfaceBackend, data: &[u8]) -> Result<()>;

    /// `Err(DeviceLost)` once the device is unusable.
    fn check_state(&self) -> Result<()>;
}

pub trait LegacyTextureBackend: Send + Sync {
    fn desc(&self) -> TextureDesc;
    fn as_any(&self) -> &dyn Any;
}

pub trait LegacySurfaceBackend: Send + Sync {
    fn desc(&self) -> TextureDesc;
    fn kind(&self) -> SurfaceKind;
    fn as_any(&self) -> &dyn Any;
}

/// Downcast a backend object to the concrete type a backend expects.
pub(crate) fn downcast<'a, T: 'static>(any: &'a dyn Any, what: &str) -> Result<&'a T> {
    any.downcast_ref::<T>().ok_or_else(|| {
        ShareError::Driver(format!("{} was created by a different driver", what))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backend() {
        assert_eq!("d3d".parse::<DriverBackend>().unwrap(), DriverBackend::D3d);
        assert_eq!(
            "Software".parse::<DriverBackend>().unwrap(),
            DriverBackend::Software
        );
        assert!("vulkan".parse::<DriverBackend>().is_err());
    }

    #[test]
    fn test_resolve_explicit() {
        assert_eq!(
            DriverBackend::resolve(Some(DriverBackend::Software)),
            DriverBackend::Software
        );
    }

    #[test]
    fn test_software_always_available() {
        assert!(DriverBackend::Software.is_available());
        assert!(DriverBackend::Software.open().is_ok());
    }
}
