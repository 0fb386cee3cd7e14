// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Texture memory and the process-wide share table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Weak};

use parking_lot::Mutex;

use super::SoftAdapter;
use crate::adapter::AdapterLuid;
use crate::caps::Generation;
use crate::error::{Result, ShareError};
use crate::texture::TextureDesc;

struct ShareEntry {
    memory: Weak<SoftMemory>,
    adapter: AdapterLuid,
    generation: Generation,
}

// Entries are weak: the table never keeps memory alive. Never drop an
// `Arc<SoftMemory>` while holding this lock, `SoftMemory::drop` takes it.
static SHARE_TABLE: LazyLock<Mutex<HashMap<u64, ShareEntry>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

// Handle values look like kernel handles: non-zero, 4-aligned.
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(0x4000_0040);

/// Pixel storage of one allocation.
pub(crate) struct SoftMemory {
    /// Share handle, 0 when not shared.
    raw: u64,
    desc: TextureDesc,
    pixels: Mutex<Vec<u8>>,
    adapter: Arc<SoftAdapter>,
}

impl SoftMemory {
    /// Allocate against the adapter budget. Unshared memory gets no handle.
    pub(crate) fn allocate(
        adapter: &Arc<SoftAdapter>,
        desc: TextureDesc,
        share: Option<Generation>,
    ) -> Result<Arc<Self>> {
        adapter.check_present()?;
        adapter.reserve(desc.byte_size() as u64)?;

        let raw = match share {
            Some(_) => NEXT_HANDLE.fetch_add(4, Ordering::Relaxed),
            None => 0,
        };
        let memory = Arc::new(Self {
            raw,
            desc,
            pixels: Mutex::new(vec![0u8; desc.byte_size()]),
            adapter: Arc::clone(adapter),
        });

        if let Some(generation) = share {
            SHARE_TABLE.lock().insert(
                raw,
                ShareEntry {
                    memory: Arc::downgrade(&memory),
                    adapter: adapter.luid(),
                    generation,
                },
            );
        }
        Ok(memory)
    }

    /// Resolve a share handle to live memory.
    ///
    /// The adapter is checked before liveness, so an importer on the wrong
    /// adapter always sees `AdapterMismatch`.
    pub(crate) fn open(
        raw: u64,
        adapter: &SoftAdapter,
        generation: Generation,
    ) -> Result<Arc<Self>> {
        adapter.check_present()?;
        let found = {
            let table = SHARE_TABLE.lock();
            table
                .get(&raw)
                .map(|entry| (entry.memory.upgrade(), entry.adapter, entry.generation))
        };

        match found {
            None => Err(ShareError::StaleHandle { raw }),
            Some((_, exported_on, _)) if exported_on != adapter.luid() => {
                Err(ShareError::AdapterMismatch {
                    handle: exported_on,
                    device: adapter.luid(),
                })
            }
            Some((_, _, exported_as)) if exported_as != generation => {
                Err(ShareError::GenerationMismatch {
                    handle: exported_as,
                    device: generation,
                })
            }
            Some((Some(memory), _, _)) => Ok(memory),
            Some((None, _, _)) => Err(ShareError::StaleHandle { raw }),
        }
    }

    pub(crate) fn raw(&self) -> u64 {
        self.raw
    }

    pub(crate) fn desc(&self) -> TextureDesc {
        self.desc
    }

    pub(crate) fn fill(&self, texel: &[u8]) {
        let mut pixels = self.pixels.lock();
        for chunk in pixels.chunks_exact_mut(texel.len()) {
            chunk.copy_from_slice(texel);
        }
    }

    pub(crate) fn write(&self, data: &[u8]) -> Result<()> {
        let mut pixels = self.pixels.lock();
        if data.len() != pixels.len() {
            return Err(ShareError::PixelDataSize {
                expected: pixels.len(),
                actual: data.len(),
            });
        }
        pixels.copy_from_slice(data);
        Ok(())
    }

    pub(crate) fn read(&self) -> Vec<u8> {
        self.pixels.lock().clone()
    }

    /// Copy all pixels of `src` into `self`.
    pub(crate) fn copy_from(&self, src: &SoftMemory) -> Result<()> {
        if std::ptr::eq(self, src) {
            return Ok(());
        }
        let data = src.read();
        self.write(&data)
    }
}

impl Drop for SoftMemory {
    fn drop(&mut self) {
        if self.raw != 0 {
            SHARE_TABLE.lock().remove(&self.raw);
        }
        self.adapter.unreserve(self.desc.byte_size() as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::vendor;
    use crate::driver::software::SoftAdapterSpec;
    use crate::format::TextureFormat;

    fn adapter(index: usize) -> Arc<SoftAdapter> {
        Arc::new(SoftAdapter::new(
            index,
            SoftAdapterSpec::hardware("Test", vendor::AMD),
        ))
    }

    #[test]
    fn test_handle_goes_stale_after_last_release() {
        let adapter = adapter(0);
        let desc = TextureDesc::new(4, 4, TextureFormat::Bgra8Unorm);
        let memory = SoftMemory::allocate(&adapter, desc, Some(Generation::Current)).unwrap();
        let raw = memory.raw();

        let opened = SoftMemory::open(raw, &adapter, Generation::Current).unwrap();
        drop(memory);
        assert!(SoftMemory::open(raw, &adapter, Generation::Current).is_ok());

        drop(opened);
        assert!(matches!(
            SoftMemory::open(raw, &adapter, Generation::Current),
            Err(ShareError::StaleHandle { .. })
        ));
        assert_eq!(adapter.allocated(), 0);
    }

    #[test]
    fn test_open_checks_adapter_and_generation() {
        let exporter = adapter(0);
        let other = adapter(1);
        let desc = TextureDesc::new(2, 2, TextureFormat::Bgra8Unorm);
        let memory = SoftMemory::allocate(&exporter, desc, Some(Generation::Legacy)).unwrap();

        assert!(matches!(
            SoftMemory::open(memory.raw(), &other, Generation::Legacy),
            Err(ShareError::AdapterMismatch { .. })
        ));
        assert!(matches!(
            SoftMemory::open(memory.raw(), &exporter, Generation::Current),
            Err(ShareError::GenerationMismatch { .. })
        ));
    }

    #[test]
    fn test_budget_is_enforced() {
        let adapter = Arc::new(SoftAdapter::new(
            0,
            SoftAdapterSpec::hardware("Small", vendor::INTEL).with_memory_budget(1024),
        ));
        let desc = TextureDesc::new(16, 16, TextureFormat::Bgra8Unorm);
        let first = SoftMemory::allocate(&adapter, desc, None).unwrap();
        assert!(matches!(
            SoftMemory::allocate(&adapter, desc, None),
            Err(ShareError::OutOfMemory(_))
        ));
        drop(first);
        assert!(SoftMemory::allocate(&adapter, desc, None).is_ok());
    }
}
