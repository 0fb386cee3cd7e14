// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Direct3D 9Ex backend for generation-1 sharing.

use std::any::Any;
use std::ffi::c_void;

use windows::Win32::Foundation::{HANDLE, HWND};
use windows::Win32::Graphics::Direct3D9::{
    D3D_SDK_VERSION, D3DCREATE_FPU_PRESERVE, D3DCREATE_HARDWARE_VERTEXPROCESSING,
    D3DCREATE_MULTITHREADED, D3DDEVTYPE_HAL, D3DFORMAT, D3DLOCK_READONLY, D3DLOCKED_RECT,
    D3DMULTISAMPLE_NONE, D3DPOOL_DEFAULT, D3DPOOL_SYSTEMMEM, D3DPRESENT_PARAMETERS,
    D3DSWAPEFFECT_DISCARD, D3DTEXF_NONE, D3DUSAGE_RENDERTARGET, Direct3DCreate9Ex,
    IDirect3D9Ex, IDirect3DDevice9Ex, IDirect3DSurface9, IDirect3DTexture9,
};
use windows::Win32::UI::WindowsAndMessaging::GetDesktopWindow;

use super::dxgi::map_error;
use super::{
    LegacyDeviceBackend, LegacyDeviceRequest, LegacyObjectBackend, LegacySurfaceBackend,
    LegacyTextureBackend, downcast,
};
use crate::adapter::AdapterLuid;
use crate::error::{Result, ShareError};
use crate::legacy::SurfaceKind;
use crate::texture::TextureDesc;

fn d3d9_format(desc: &TextureDesc) -> Result<D3DFORMAT> {
    desc.format
        .d3d9_format()
        .map(D3DFORMAT)
        .ok_or_else(|| ShareError::UnsupportedFormat {
            format: desc.format,
            reason: "no Direct3D 9 equivalent".into(),
        })
}

pub(crate) struct D3d9Object {
    d3d: IDirect3D9Ex,
}

// SAFETY: IDirect3D9Ex only enumerates adapters and creates devices; both
// are safe to call from any thread.
unsafe impl Send for D3d9Object {}
unsafe impl Sync for D3d9Object {}

impl D3d9Object {
    pub(crate) fn new() -> Result<Self> {
        let d3d = unsafe { Direct3DCreate9Ex(D3D_SDK_VERSION) }
            .map_err(|e| ShareError::LegacyExUnavailable(format!("Direct3DCreate9Ex: {}", e)))?;
        Ok(Self { d3d })
    }

    /// Ordinal whose LUID matches. D3D9 ordinals do not follow DXGI order.
    fn ordinal_for(&self, luid: AdapterLuid) -> Result<u32> {
        let count = unsafe { self.d3d.GetAdapterCount() };
        for ordinal in 0..count {
            if let Ok(candidate) = unsafe { self.d3d.GetAdapterLUID(ordinal) } {
                if AdapterLuid::from_parts(candidate.LowPart, candidate.HighPart) == luid {
                    return Ok(ordinal);
                }
            }
        }
        Err(ShareError::NoCompatibleDriver(format!(
            "adapter {} has no Direct3D 9 ordinal",
            luid
        )))
    }
}

impl LegacyObjectBackend for D3d9Object {
    fn adapter_count(&self) -> usize {
        unsafe { self.d3d.GetAdapterCount() as usize }
    }

    fn create_device(&self, request: &LegacyDeviceRequest) -> Result<Box<dyn LegacyDeviceBackend>> {
        let ordinal = match request.adapter {
            Some(luid) => self.ordinal_for(luid)?,
            None => 0,
        };
        let window = match request.window {
            Some(hwnd) => HWND(hwnd as *mut c_void),
            None => unsafe { GetDesktopWindow() },
        };

        let mut params = D3DPRESENT_PARAMETERS {
            Windowed: true.into(),
            SwapEffect: D3DSWAPEFFECT_DISCARD,
            hDeviceWindow: window,
            BackBufferWidth: 1,
            BackBufferHeight: 1,
            ..Default::default()
        };
        let flags = D3DCREATE_HARDWARE_VERTEXPROCESSING as u32
            | D3DCREATE_MULTITHREADED as u32
            | D3DCREATE_FPU_PRESERVE as u32;

        let mut device: Option<IDirect3DDevice9Ex> = None;
        unsafe {
            self.d3d.CreateDeviceEx(
                ordinal,
                D3DDEVTYPE_HAL,
                window,
                flags,
                &mut params,
                std::ptr::null_mut(),
                &mut device,
            )
        }
        .map_err(|e| map_error(e, "CreateDeviceEx"))?;
        let device = device.ok_or_else(|| {
            ShareError::LegacyExUnavailable("CreateDeviceEx returned no device".into())
        })?;

        let luid = unsafe { self.d3d.GetAdapterLUID(ordinal) }
            .map(|l| AdapterLuid::from_parts(l.LowPart, l.HighPart))
            .map_err(|e| map_error(e, "GetAdapterLUID"))?;

        tracing::debug!("[D3D9Ex] Device on adapter ordinal {} ({})", ordinal, luid);
        Ok(Box::new(D3d9Device {
            device,
            window,
            adapter: luid,
        }))
    }
}

struct D3d9Texture {
    texture: IDirect3DTexture9,
    desc: TextureDesc,
}

// SAFETY: The owning device was created with D3DCREATE_MULTITHREADED.
unsafe impl Send for D3d9Texture {}
unsafe impl Sync for D3d9Texture {}

impl LegacyTextureBackend for D3d9Texture {
    fn desc(&self) -> TextureDesc {
        self.desc
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct D3d9Surface {
    surface: IDirect3DSurface9,
    desc: TextureDesc,
    kind: SurfaceKind,
}

// SAFETY: The owning device was created with D3DCREATE_MULTITHREADED.
unsafe impl Send for D3d9Surface {}
unsafe impl Sync for D3d9Surface {}

impl LegacySurfaceBackend for D3d9Surface {
    fn desc(&self) -> TextureDesc {
        self.desc
    }

    fn kind(&self) -> SurfaceKind {
        self.kind
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct D3d9Device {
    device: IDirect3DDevice9Ex,
    window: HWND,
    adapter: AdapterLuid,
}

// SAFETY: Created with D3DCREATE_MULTITHREADED, so the runtime serializes
// calls. The window handle is only passed back to the runtime.
unsafe impl Send for D3d9Device {}
unsafe impl Sync for D3d9Device {}

impl D3d9Device {
    fn surface<'a>(&self, surface: &'a dyn LegacySurfaceBackend) -> Result<&'a D3d9Surface> {
        downcast::<D3d9Surface>(surface.as_any(), "surface")
    }

    fn level_zero(&self, texture: &IDirect3DTexture9, desc: TextureDesc) -> Result<D3d9Surface> {
        let surface =
            unsafe { texture.GetSurfaceLevel(0) }.map_err(|e| map_error(e, "GetSurfaceLevel"))?;
        Ok(D3d9Surface {
            surface,
            desc,
            kind: SurfaceKind::RenderTarget,
        })
    }

    fn shared_texture(
        &self,
        desc: &TextureDesc,
        handle: &mut HANDLE,
    ) -> windows::core::Result<Option<IDirect3DTexture9>> {
        let format = D3DFORMAT(desc.format.d3d9_format().unwrap_or_default());
        let mut texture: Option<IDirect3DTexture9> = None;
        unsafe {
            self.device.CreateTexture(
                desc.width,
                desc.height,
                1,
                D3DUSAGE_RENDERTARGET as u32,
                format,
                D3DPOOL_DEFAULT,
                &mut texture,
                handle,
            )
        }?;
        Ok(texture)
    }
}

fn expect_kind(surface: &D3d9Surface, kind: SurfaceKind, call: &str) -> Result<()> {
    if surface.kind != kind {
        return Err(ShareError::Driver(format!(
            "{} needs a {:?} surface, got {:?}",
            call, kind, surface.kind
        )));
    }
    Ok(())
}

impl LegacyDeviceBackend for D3d9Device {
    fn adapter(&self) -> AdapterLuid {
        self.adapter
    }

    fn create_shared_texture(
        &self,
        desc: &TextureDesc,
    ) -> Result<(
        Box<dyn LegacyTextureBackend>,
        Box<dyn LegacySurfaceBackend>,
        u64,
    )> {
        d3d9_format(desc)?;
        let mut handle = HANDLE::default();
        let texture = self
            .shared_texture(desc, &mut handle)
            .map_err(|e| map_error(e, "CreateTexture(shared)"))?
            .ok_or_else(|| ShareError::Driver("CreateTexture returned no texture".into()))?;
        let surface = self.level_zero(&texture, *desc)?;
        let raw = handle.0 as usize as u64;

        tracing::debug!(
            "[D3D9Ex] Created shared {}x{} {} texture, handle {:#x}",
            desc.width,
            desc.height,
            desc.format,
            raw
        );
        Ok((
            Box::new(D3d9Texture {
                texture,
                desc: *desc,
            }),
            Box::new(surface),
            raw,
        ))
    }

    fn open_shared_texture(
        &self,
        desc: &TextureDesc,
        raw: u64,
    ) -> Result<Box<dyn LegacyTextureBackend>> {
        d3d9_format(desc)?;
        let mut handle = HANDLE(raw as usize as *mut c_void);
        match self.shared_texture(desc, &mut handle) {
            Ok(Some(texture)) => Ok(Box::new(D3d9Texture {
                texture,
                desc: *desc,
            })),
            Err(e) => {
                let mapped = map_error(e, "CreateTexture(open)");
                if mapped.is_device_lost() {
                    Err(mapped)
                } else {
                    // Wrong description and dead handle look the same here.
                    Err(ShareError::StaleHandle { raw })
                }
            }
            Ok(None) => Err(ShareError::StaleHandle { raw }),
        }
    }

    fn texture_surface(
        &self,
        texture: &dyn LegacyTextureBackend,
    ) -> Result<Box<dyn LegacySurfaceBackend>> {
        let texture = downcast::<D3d9Texture>(texture.as_any(), "texture")?;
        Ok(Box::new(self.level_zero(&texture.texture, texture.desc)?))
    }

    fn create_surface(
        &self,
        desc: &TextureDesc,
        kind: SurfaceKind,
    ) -> Result<Box<dyn LegacySurfaceBackend>> {
        let format = d3d9_format(desc)?;
        let mut surface: Option<IDirect3DSurface9> = None;
        let created = match kind {
            SurfaceKind::Staging => unsafe {
                self.device.CreateOffscreenPlainSurface(
                    desc.width,
                    desc.height,
                    format,
                    D3DPOOL_SYSTEMMEM,
                    &mut surface,
                    std::ptr::null_mut(),
                )
            },
            SurfaceKind::RenderTarget => unsafe {
                self.device.CreateRenderTarget(
                    desc.width,
                    desc.height,
                    format,
                    D3DMULTISAMPLE_NONE,
                    0,
                    false.into(),
                    &mut surface,
                    std::ptr::null_mut(),
                )
            },
        };
        created.map_err(|e| map_error(e, "create surface"))?;
        let surface =
            surface.ok_or_else(|| ShareError::Driver("surface creation returned nothing".into()))?;
        Ok(Box::new(D3d9Surface {
            surface,
            desc: *desc,
            kind,
        }))
    }

    fn update_surface(
        &self,
        src: &dyn LegacySurfaceBackend,
        dst: &dyn LegacySurfaceBackend,
    ) -> Result<()> {
        let (src, dst) = (self.surface(src)?, self.surface(dst)?);
        expect_kind(src, SurfaceKind::Staging, "UpdateSurface")?;
        expect_kind(dst, SurfaceKind::RenderTarget, "UpdateSurface")?;
        unsafe {
            self.device
                .UpdateSurface(&src.surface, std::ptr::null(), &dst.surface, std::ptr::null())
        }
        .map_err(|e| map_error(e, "UpdateSurface"))
    }

    fn stretch_rect(
        &self,
        src: &dyn LegacySurfaceBackend,
        dst: &dyn LegacySurfaceBackend,
    ) -> Result<()> {
        let (src, dst) = (self.surface(src)?, self.surface(dst)?);
        expect_kind(src, SurfaceKind::RenderTarget, "StretchRect")?;
        expect_kind(dst, SurfaceKind::RenderTarget, "StretchRect")?;
        unsafe {
            self.device.StretchRect(
                &src.surface,
                std::ptr::null(),
                &dst.surface,
                std::ptr::null(),
                D3DTEXF_NONE,
            )
        }
        .map_err(|e| map_error(e, "StretchRect"))
    }

    fn get_render_target_data(
        &self,
        src: &dyn LegacySurfaceBackend,
        dst: &dyn LegacySurfaceBackend,
    ) -> Result<()> {
        let (src, dst) = (self.surface(src)?, self.surface(dst)?);
        expect_kind(src, SurfaceKind::RenderTarget, "GetRenderTargetData")?;
        expect_kind(dst, SurfaceKind::Staging, "GetRenderTargetData")?;
        unsafe { self.device.GetRenderTargetData(&src.surface, &dst.surface) }
            .map_err(|e| map_error(e, "GetRenderTargetData"))
    }

    fn lock_read(&self, surface: &dyn LegacySurfaceBackend) -> Result<Vec<u8>> {
        let surface = self.surface(surface)?;
        expect_kind(surface, SurfaceKind::Staging, "LockRect")?;

        let mut locked = D3DLOCKED_RECT::default();
        unsafe {
            surface
                .surface
                .LockRect(&mut locked, std::ptr::null(), D3DLOCK_READONLY as u32)
        }
        .map_err(|e| map_error(e, "LockRect"))?;

        let row_bytes = surface.desc.row_pitch();
        let mut pixels = Vec::with_capacity(surface.desc.byte_size());
        for row in 0..surface.desc.height as usize {
            // SAFETY: The rect is locked; pBits spans `height` rows of `Pitch`.
            let line = unsafe {
                std::slice::from_raw_parts(
                    (locked.pBits as *const u8).add(row * locked.Pitch as usize),
                    row_bytes,
                )
            };
            pixels.extend_from_slice(line);
        }
        unsafe { surface.surface.UnlockRect() }.map_err(|e| map_error(e, "UnlockRect"))?;
        Ok(pixels)
    }

    fn lock_write(&self, surface: &dyn LegacySurfaceBackend, data: &[u8]) -> Result<()> {
        let surface = self.surface(surface)?;
        expect_kind(surface, SurfaceKind::Staging, "LockRect")?;
        if data.len() != surface.desc.byte_size() {
            return Err(ShareError::PixelDataSize {
                expected: surface.desc.byte_size(),
                actual: data.len(),
            });
        }

        let mut locked = D3DLOCKED_RECT::default();
        unsafe { surface.surface.LockRect(&mut locked, std::ptr::null(), 0) }
            .map_err(|e| map_error(e, "LockRect"))?;

        let row_bytes = surface.desc.row_pitch();
        for (row, line) in data.chunks_exact(row_bytes).enumerate() {
            // SAFETY: The rect is locked for writing; each destination row
            // holds at least `row_bytes`.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    line.as_ptr(),
                    (locked.pBits as *mut u8).add(row * locked.Pitch as usize),
                    row_bytes,
                );
            }
        }
        unsafe { surface.surface.UnlockRect() }.map_err(|e| map_error(e, "UnlockRect"))
    }

    fn check_state(&self) -> Result<()> {
        unsafe { self.device.CheckDeviceState(self.window) }
            .map_err(|e| map_error(e, "CheckDeviceState"))
    }
}
