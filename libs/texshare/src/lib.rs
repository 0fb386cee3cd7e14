// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Cross-process GPU shared textures.
//!
//! One process allocates a shareable texture and publishes its [`ShareHandle`];
//! any other process on the same adapter opens the handle and binds the same
//! physical GPU memory. The crate covers adapter enumeration and selection,
//! device creation for both API generations, shared texture allocation and
//! import, and the GPU synchronization that has to happen around every
//! cross-process hand-off.
//!
//! Everything runs against a [`driver::Driver`]: the Direct3D driver on
//! Windows, or the in-process software reference driver on any platform.

#![allow(clippy::type_complexity)] // Backend trait-object signatures read fine in context
#![allow(clippy::missing_safety_doc)] // Safety documented in implementation comments

pub mod adapter;
pub mod caps;
pub mod config;
pub mod device;
pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod format;
pub mod handle;
pub mod legacy;
pub mod prefs;
pub mod session;
pub mod sync;
pub mod texture;

pub use adapter::{
    AdapterDescription, AdapterDirectory, AdapterInfo, AdapterLuid, AdapterSelection, vendor,
};
pub use caps::{DriverType, FeatureLevel, Generation};
pub use config::ShareConfig;
pub use device::{Device, DeviceFactory, DeviceOptions, ImmediateContext};
pub use diagnostics::{
    DiagnosticEvent, DiagnosticSink, Diagnostics, MemorySink, Operation, TracingSink,
};
pub use driver::{Driver, DriverBackend, SoftAdapterSpec, SoftwareDriver};
pub use error::{ErrorKind, Result, ShareError};
pub use format::TextureFormat;
pub use handle::{ShareHandle, SharedTextureInfo};
pub use legacy::{LegacyDevice, LegacyObject, LegacySurface, LegacyTexture, SurfaceKind};
pub use prefs::{AdapterPreference, FilePreferenceStore, PreferenceStore};
pub use session::{
    CurrentSession, LegacySession, SessionConfig, SessionTexture, ShareSession, TextureSharing,
};
pub use sync::{SyncConfig, SyncGate};
pub use texture::{SharedTexture, TextureDesc, TextureOrigin};
