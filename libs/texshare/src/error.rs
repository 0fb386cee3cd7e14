// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::time::Duration;

use thiserror::Error;

use crate::adapter::AdapterLuid;
use crate::caps::{FeatureLevel, Generation};
use crate::format::TextureFormat;

/// Errors surfaced by adapter, device, texture and sync operations.
#[derive(Error, Debug)]
pub enum ShareError {
    #[error("adapter index {index} out of range (count: {count})")]
    AdapterOutOfRange { index: usize, count: usize },

    #[error("no graphics adapters present")]
    NoAdapters,

    #[error("no adapter selected")]
    NoAdapterSelected,

    #[error("adapter description unavailable: {0}")]
    AdapterInfoUnavailable(String),

    #[error("no compatible driver type / feature level combination: {0}")]
    NoCompatibleDriver(String),

    #[error("feature level {actual} does not support {required}")]
    UnsupportedFeatureLevel {
        required: FeatureLevel,
        actual: FeatureLevel,
    },

    #[error("format {format} is not supported by this device: {reason}")]
    UnsupportedFormat {
        format: TextureFormat,
        reason: String,
    },

    #[error("invalid texture dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("pixel data is {actual} bytes, texture needs {expected}")]
    PixelDataSize { expected: usize, actual: usize },

    #[error("extended legacy device interface unavailable: {0}")]
    LegacyExUnavailable(String),

    #[error("surface and texture do not match: {0}")]
    SurfaceMismatch(String),

    #[error("{handle} handle cannot be used with a {device} device")]
    GenerationMismatch {
        handle: Generation,
        device: Generation,
    },

    #[error("object belongs to a different device")]
    ForeignObject,

    #[error("share handle {raw:#x} is stale (no surviving owner)")]
    StaleHandle { raw: u64 },

    #[error("share handle was exported on adapter {handle} but device is on adapter {device}")]
    AdapterMismatch {
        handle: AdapterLuid,
        device: AdapterLuid,
    },

    #[error("malformed share handle: {0}")]
    MalformedHandle(String),

    #[error("GPU device lost: {0}")]
    DeviceLost(String),

    #[error("GPU did not signal completion within {waited:?}")]
    SyncTimeout { waited: Duration },

    #[error("out of GPU memory: {0}")]
    OutOfMemory(String),

    #[error("released while {count} object(s) still reference it")]
    Leaked { count: usize },

    #[error("driver call failed: {0}")]
    Driver(String),

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("preference store error: {0}")]
    Preferences(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad adapter index or nothing to enumerate. Retry with another index
    /// or accept the default adapter.
    Enumeration,
    /// The device cannot do what was asked. Not retryable without changing
    /// parameters.
    Capability,
    /// Handle problems between processes: stale (try again later) or
    /// adapter mismatch (reconfigure).
    CrossProcess,
    /// Driver reset or GPU removal. Tear down and recreate everything on the
    /// device.
    DeviceLost,
    /// Allocation failed or the driver refused the call.
    Resource,
    /// Bad configuration or preference data.
    Configuration,
}

impl ShareError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AdapterOutOfRange { .. }
            | Self::NoAdapters
            | Self::NoAdapterSelected
            | Self::AdapterInfoUnavailable(_) => ErrorKind::Enumeration,

            Self::NoCompatibleDriver(_)
            | Self::UnsupportedFeatureLevel { .. }
            | Self::UnsupportedFormat { .. }
            | Self::InvalidDimensions { .. }
            | Self::PixelDataSize { .. }
            | Self::LegacyExUnavailable(_)
            | Self::SurfaceMismatch(_)
            | Self::GenerationMismatch { .. }
            | Self::ForeignObject => ErrorKind::Capability,

            Self::StaleHandle { .. } | Self::AdapterMismatch { .. } | Self::MalformedHandle(_) => {
                ErrorKind::CrossProcess
            }

            Self::DeviceLost(_) | Self::SyncTimeout { .. } => ErrorKind::DeviceLost,

            Self::OutOfMemory(_) | Self::Leaked { .. } | Self::Driver(_) | Self::Io(_) => {
                ErrorKind::Resource
            }

            Self::Configuration(_) | Self::Preferences(_) => ErrorKind::Configuration,
        }
    }

    /// Whether the same call may succeed later without reconfiguration.
    ///
    /// Only a stale handle qualifies: the exporting process may not have
    /// published its texture yet.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StaleHandle { .. })
    }

    /// Whether every resource on the owning device must be torn down.
    pub fn is_device_lost(&self) -> bool {
        self.kind() == ErrorKind::DeviceLost
    }
}

pub type Result<T> = std::result::Result<T, ShareError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_errors_are_distinct() {
        let stale = ShareError::StaleHandle { raw: 0x40 };
        let mismatch = ShareError::AdapterMismatch {
            handle: AdapterLuid(1),
            device: AdapterLuid(2),
        };
        assert_eq!(stale.kind(), ErrorKind::CrossProcess);
        assert_eq!(mismatch.kind(), ErrorKind::CrossProcess);
        assert!(stale.is_retryable());
        assert!(!mismatch.is_retryable());
    }

    #[test]
    fn test_sync_timeout_is_device_lost() {
        let err = ShareError::SyncTimeout {
            waited: Duration::from_millis(5),
        };
        assert!(err.is_device_lost());
        assert!(!ShareError::NoAdapters.is_device_lost());
    }
}
