// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Generation-agnostic sharing sessions.
//!
//! [`ShareSession`] is a tagged variant over the two API generations.
//! Callers that only need create / publish / open / release stay generic via
//! [`TextureSharing`].

use crate::adapter::AdapterSelection;
use crate::caps::Generation;
use crate::device::{Device, DeviceFactory};
use crate::error::{Result, ShareError};
use crate::format::TextureFormat;
use crate::handle::{ShareHandle, SharedTextureInfo};
use crate::legacy::{LegacyDevice, LegacySurface, LegacyTexture};
use crate::sync::{SyncConfig, SyncGate};
use crate::texture::{SharedTexture, TextureDesc};

/// Everything needed to open a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub generation: Generation,
    pub adapter: AdapterSelection,
    /// Focus window for generation-1 devices.
    pub window: Option<isize>,
    pub sync: SyncConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            generation: Generation::Current,
            adapter: AdapterSelection::SystemDefault,
            window: None,
            sync: SyncConfig::default(),
        }
    }
}

/// A shared texture of either generation.
#[derive(Debug, Clone)]
pub enum SessionTexture {
    Legacy(LegacyTexture),
    Current(SharedTexture),
}

impl SessionTexture {
    pub fn generation(&self) -> Generation {
        match self {
            Self::Legacy(_) => Generation::Legacy,
            Self::Current(_) => Generation::Current,
        }
    }

    pub fn desc(&self) -> TextureDesc {
        match self {
            Self::Legacy(texture) => texture.desc(),
            Self::Current(texture) => texture.desc(),
        }
    }

    pub fn share_handle(&self) -> ShareHandle {
        match self {
            Self::Legacy(texture) => texture.share_handle(),
            Self::Current(texture) => texture.share_handle(),
        }
    }

    /// Handle plus description, ready to publish.
    pub fn info(&self) -> SharedTextureInfo {
        match self {
            Self::Legacy(texture) => texture.info(),
            Self::Current(texture) => texture.info(),
        }
    }

    pub fn as_current(&self) -> Option<&SharedTexture> {
        match self {
            Self::Current(texture) => Some(texture),
            Self::Legacy(_) => None,
        }
    }

    pub fn as_legacy(&self) -> Option<&LegacyTexture> {
        match self {
            Self::Legacy(texture) => Some(texture),
            Self::Current(_) => None,
        }
    }
}

/// Capability shared by both generations.
pub trait TextureSharing {
    fn generation(&self) -> Generation;

    /// Create the session's device from `config`.
    fn create_device(factory: &DeviceFactory, config: &SessionConfig) -> Result<Self>
    where
        Self: Sized;

    fn create_shared_texture(
        &self,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<(SessionTexture, ShareHandle)>;

    fn open_shared_texture(&self, info: &SharedTextureInfo) -> Result<SessionTexture>;

    /// Make this side's writes visible to other processes, and theirs to
    /// this side.
    fn synchronize(&self) -> Result<()>;

    /// Drop one local reference; returns the references left.
    fn release_texture(&self, texture: SessionTexture) -> usize;

    /// Release the device; returns the references still holding it.
    fn release(self) -> usize
    where
        Self: Sized;
}

/// Generation-2 session: a device plus its sync gate.
#[derive(Debug)]
pub struct CurrentSession {
    device: Device,
    gate: SyncGate,
}

impl CurrentSession {
    pub fn new(device: Device, gate: SyncGate) -> Self {
        Self { device, gate }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn gate(&self) -> &SyncGate {
        &self.gate
    }
}

impl TextureSharing for CurrentSession {
    fn generation(&self) -> Generation {
        Generation::Current
    }

    fn create_device(factory: &DeviceFactory, config: &SessionConfig) -> Result<Self> {
        let device = factory.create_device(config.adapter)?;
        let gate = SyncGate::new(config.sync).with_diagnostics(factory.diagnostics().clone());
        Ok(Self::new(device, gate))
    }

    fn create_shared_texture(
        &self,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<(SessionTexture, ShareHandle)> {
        let (texture, handle) = self.device.create_shared_texture(width, height, format)?;
        Ok((SessionTexture::Current(texture), handle))
    }

    fn open_shared_texture(&self, info: &SharedTextureInfo) -> Result<SessionTexture> {
        let texture = self.device.open_shared_texture(&info.handle)?;
        if texture.desc() != TextureDesc::new(info.width, info.height, info.format) {
            tracing::warn!(
                "Opened texture is {:?}, publisher announced {}x{} {}",
                texture.desc(),
                info.width,
                info.height,
                info.format
            );
        }
        Ok(SessionTexture::Current(texture))
    }

    fn synchronize(&self) -> Result<()> {
        self.gate.flush_and_wait(&self.device)
    }

    fn release_texture(&self, texture: SessionTexture) -> usize {
        match texture {
            SessionTexture::Current(texture) => self.device.release_texture(texture),
            SessionTexture::Legacy(texture) => {
                tracing::warn!("Releasing a legacy texture through a current session");
                let remaining = texture.ref_count() - 1;
                drop(texture);
                remaining
            }
        }
    }

    fn release(self) -> usize {
        self.device.release()
    }
}

/// Generation-1 session: an extended legacy device.
#[derive(Debug)]
pub struct LegacySession {
    device: LegacyDevice,
}

impl LegacySession {
    pub fn new(device: LegacyDevice) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &LegacyDevice {
        &self.device
    }

    /// Level-0 surface of a session texture, for the memory bridge.
    pub fn surface(&self, texture: &SessionTexture) -> Result<LegacySurface> {
        let texture = legacy_texture(texture)?;
        self.device.texture_surface(texture)
    }
}

impl TextureSharing for LegacySession {
    fn generation(&self) -> Generation {
        Generation::Legacy
    }

    fn create_device(factory: &DeviceFactory, config: &SessionConfig) -> Result<Self> {
        let device = factory.create_legacy_device(config.adapter, config.window)?;
        Ok(Self::new(device))
    }

    fn create_shared_texture(
        &self,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<(SessionTexture, ShareHandle)> {
        let (texture, _surface, handle) = self.device.create_shared_texture(width, height, format)?;
        Ok((SessionTexture::Legacy(texture), handle))
    }

    fn open_shared_texture(&self, info: &SharedTextureInfo) -> Result<SessionTexture> {
        let texture = self.device.open_shared_texture(info)?;
        Ok(SessionTexture::Legacy(texture))
    }

    fn synchronize(&self) -> Result<()> {
        // Bridge copies complete before they return.
        self.device.check_state()
    }

    fn release_texture(&self, texture: SessionTexture) -> usize {
        match texture {
            SessionTexture::Legacy(texture) => self.device.release_texture(texture),
            SessionTexture::Current(texture) => {
                tracing::warn!("Releasing a current texture through a legacy session");
                let remaining = texture.ref_count() - 1;
                drop(texture);
                remaining
            }
        }
    }

    fn release(self) -> usize {
        self.device.release()
    }
}

fn legacy_texture(texture: &SessionTexture) -> Result<&LegacyTexture> {
    texture.as_legacy().ok_or(ShareError::GenerationMismatch {
        handle: texture.generation(),
        device: Generation::Legacy,
    })
}

/// A session of either generation.
#[derive(Debug)]
pub enum ShareSession {
    Legacy(LegacySession),
    Current(CurrentSession),
}

impl ShareSession {
    /// Open a session of the configured generation.
    pub fn open(factory: &DeviceFactory, config: &SessionConfig) -> Result<Self> {
        <Self as TextureSharing>::create_device(factory, config)
    }

    pub fn as_current(&self) -> Option<&CurrentSession> {
        match self {
            Self::Current(session) => Some(session),
            Self::Legacy(_) => None,
        }
    }

    pub fn as_legacy(&self) -> Option<&LegacySession> {
        match self {
            Self::Legacy(session) => Some(session),
            Self::Current(_) => None,
        }
    }
}

impl TextureSharing for ShareSession {
    fn generation(&self) -> Generation {
        match self {
            Self::Legacy(session) => session.generation(),
            Self::Current(session) => session.generation(),
        }
    }

    fn create_device(factory: &DeviceFactory, config: &SessionConfig) -> Result<Self> {
        match config.generation {
            Generation::Legacy => LegacySession::create_device(factory, config).map(Self::Legacy),
            Generation::Current => {
                CurrentSession::create_device(factory, config).map(Self::Current)
            }
        }
    }

    fn create_shared_texture(
        &self,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<(SessionTexture, ShareHandle)> {
        match self {
            Self::Legacy(session) => session.create_shared_texture(width, height, format),
            Self::Current(session) => session.create_shared_texture(width, height, format),
        }
    }

    fn open_shared_texture(&self, info: &SharedTextureInfo) -> Result<SessionTexture> {
        match self {
            Self::Legacy(session) => session.open_shared_texture(info),
            Self::Current(session) => session.open_shared_texture(info),
        }
    }

    fn synchronize(&self) -> Result<()> {
        match self {
            Self::Legacy(session) => session.synchronize(),
            Self::Current(session) => session.synchronize(),
        }
    }

    fn release_texture(&self, texture: SessionTexture) -> usize {
        match self {
            Self::Legacy(session) => session.release_texture(texture),
            Self::Current(session) => session.release_texture(texture),
        }
    }

    fn release(self) -> usize {
        match self {
            Self::Legacy(session) => session.release(),
            Self::Current(session) => session.release(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::adapter::vendor;
    use crate::driver::{SoftAdapterSpec, SoftwareDriver};

    fn factory() -> DeviceFactory {
        DeviceFactory::new(Arc::new(SoftwareDriver::with_adapters(vec![
            SoftAdapterSpec::hardware("GPU", vendor::NVIDIA),
        ])))
    }

    fn exchange<S: TextureSharing>(producer: &S, consumer: &S) -> SessionTexture {
        let (texture, handle) = producer
            .create_shared_texture(32, 16, TextureFormat::Bgra8Unorm)
            .unwrap();
        assert_eq!(texture.share_handle(), handle);
        producer.synchronize().unwrap();
        let opened = consumer.open_shared_texture(&texture.info()).unwrap();
        assert_eq!(opened.desc(), texture.desc());
        producer.release_texture(texture);
        opened
    }

    #[test]
    fn test_generic_exchange_for_both_generations() {
        let factory = factory();
        for generation in [Generation::Current, Generation::Legacy] {
            let config = SessionConfig {
                generation,
                adapter: AdapterSelection::Index(0),
                ..SessionConfig::default()
            };
            let producer = ShareSession::open(&factory, &config).unwrap();
            let consumer = ShareSession::open(&factory, &config).unwrap();
            assert_eq!(producer.generation(), generation);

            let opened = exchange(&producer, &consumer);
            assert_eq!(opened.generation(), generation);
            assert_eq!(consumer.release_texture(opened), 0);
            assert_eq!(producer.release(), 0);
            assert_eq!(consumer.release(), 0);
        }
    }

    #[test]
    fn test_generations_do_not_mix() {
        let factory = factory();
        let current = ShareSession::open(&factory, &SessionConfig::default()).unwrap();
        let legacy = ShareSession::open(
            &factory,
            &SessionConfig {
                generation: Generation::Legacy,
                ..SessionConfig::default()
            },
        )
        .unwrap();

        let (texture, _) = current
            .create_shared_texture(8, 8, TextureFormat::Bgra8Unorm)
            .unwrap();
        assert!(matches!(
            legacy.open_shared_texture(&texture.info()),
            Err(ShareError::GenerationMismatch { .. })
        ));
        assert!(legacy.as_legacy().unwrap().surface(&texture).is_err());
    }
}
