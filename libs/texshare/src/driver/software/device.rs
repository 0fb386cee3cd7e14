// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::any::Any;
use std::cell::Cell;
use std::sync::Arc;
use std::time::Duration;

use super::SoftAdapter;
use super::memory::SoftMemory;
use super::queue::{Command, SoftQueue};
use crate::caps::{FeatureLevel, Generation};
use crate::driver::{
    ContextBackend, DeviceBackend, FenceBackend, TextureBackend, downcast,
};
use crate::error::Result;
use crate::format::TextureFormat;
use crate::texture::TextureDesc;

/// Bound on the implicit wait inside a readback.
const READBACK_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) struct SoftTexture {
    pub(crate) memory: Arc<SoftMemory>,
}

impl TextureBackend for SoftTexture {
    fn desc(&self) -> TextureDesc {
        self.memory.desc()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) struct SoftFence {
    /// Batch that carries this fence's marker; `None` until signalled.
    target: Cell<Option<u64>>,
}

impl FenceBackend for SoftFence {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) struct SoftDevice {
    adapter: Arc<SoftAdapter>,
    feature_level: FeatureLevel,
}

impl SoftDevice {
    pub(crate) fn new(adapter: Arc<SoftAdapter>, feature_level: FeatureLevel) -> Self {
        Self {
            adapter,
            feature_level,
        }
    }
}

impl DeviceBackend for SoftDevice {
    fn supports_shared_format(&self, format: TextureFormat) -> bool {
        format.min_feature_level() <= self.feature_level
    }

    fn create_shared_texture(&self, desc: &TextureDesc) -> Result<(Box<dyn TextureBackend>, u64)> {
        let memory = SoftMemory::allocate(&self.adapter, *desc, Some(Generation::Current))?;
        let raw = memory.raw();
        Ok((Box::new(SoftTexture { memory }), raw))
    }

    fn open_shared_texture(&self, raw: u64) -> Result<Box<dyn TextureBackend>> {
        let memory = SoftMemory::open(raw, &self.adapter, Generation::Current)?;
        Ok(Box::new(SoftTexture { memory }))
    }

    fn create_fence(&self) -> Result<Box<dyn FenceBackend>> {
        self.adapter.check_present()?;
        Ok(Box::new(SoftFence {
            target: Cell::new(None),
        }))
    }

    fn removed_reason(&self) -> Option<String> {
        self.adapter.removed_reason()
    }
}

pub(crate) struct SoftContext {
    adapter: Arc<SoftAdapter>,
    queue: SoftQueue,
}

impl SoftContext {
    pub(crate) fn new(adapter: Arc<SoftAdapter>, queue: SoftQueue) -> Self {
        Self { adapter, queue }
    }

    fn memory<'a>(&self, texture: &'a dyn TextureBackend) -> Result<&'a Arc<SoftMemory>> {
        let texture = downcast::<SoftTexture>(texture.as_any(), "texture")?;
        Ok(&texture.memory)
    }
}

impl ContextBackend for SoftContext {
    fn flush(&self) -> Result<()> {
        self.adapter.check_present()?;
        self.queue.flush()
    }

    fn clear(&self, texture: &dyn TextureBackend, color: [f32; 4]) -> Result<()> {
        self.adapter.check_present()?;
        let memory = self.memory(texture)?;
        let texel = memory.desc().format.encode_color(color);
        self.queue.push(Command::Fill {
            memory: Arc::clone(memory),
            texel,
        });
        Ok(())
    }

    fn write_pixels(&self, texture: &dyn TextureBackend, data: &[u8]) -> Result<()> {
        self.adapter.check_present()?;
        let memory = self.memory(texture)?;
        self.queue.push(Command::Write {
            memory: Arc::clone(memory),
            data: data.to_vec(),
        });
        Ok(())
    }

    fn read_pixels(&self, texture: &dyn TextureBackend) -> Result<Vec<u8>> {
        self.adapter.check_present()?;
        let memory = self.memory(texture)?;
        self.queue.finish(READBACK_TIMEOUT)?;
        Ok(memory.read())
    }

    fn signal(&self, fence: &dyn FenceBackend) -> Result<()> {
        self.adapter.check_present()?;
        let fence = downcast::<SoftFence>(fence.as_any(), "fence")?;
        self.queue.push(Command::Marker);
        fence.target.set(Some(self.queue.pending_seq()));
        Ok(())
    }

    fn poll(&self, fence: &dyn FenceBackend) -> Result<bool> {
        self.adapter.check_present()?;
        let fence = downcast::<SoftFence>(fence.as_any(), "fence")?;
        self.queue.flush()?;
        Ok(match fence.target.get() {
            Some(target) => self.queue.completed() >= target,
            None => true,
        })
    }
}
