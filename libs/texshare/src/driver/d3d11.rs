// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Direct3D 11 backend.

use std::any::Any;
use std::ffi::c_void;

use windows::Win32::Foundation::{HANDLE, HMODULE};
use windows::Win32::Graphics::Direct3D::{
    D3D_DRIVER_TYPE, D3D_DRIVER_TYPE_HARDWARE, D3D_DRIVER_TYPE_REFERENCE,
    D3D_DRIVER_TYPE_UNKNOWN, D3D_DRIVER_TYPE_WARP, D3D_FEATURE_LEVEL,
};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BIND_RENDER_TARGET, D3D11_BIND_SHADER_RESOURCE, D3D11_CPU_ACCESS_READ,
    D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_CREATE_DEVICE_DEBUG, D3D11_CREATE_DEVICE_FLAG,
    D3D11_FORMAT_SUPPORT_RENDER_TARGET, D3D11_FORMAT_SUPPORT_TEXTURE2D,
    D3D11_MAP_READ, D3D11_MAPPED_SUBRESOURCE, D3D11_QUERY_DESC, D3D11_QUERY_EVENT,
    D3D11_RESOURCE_MISC_SHARED, D3D11_SDK_VERSION, D3D11_TEXTURE2D_DESC, D3D11_USAGE_DEFAULT,
    D3D11_USAGE_STAGING, D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Query,
    ID3D11RenderTargetView, ID3D11Texture2D,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::{
    DXGI_ADAPTER_FLAG_SOFTWARE, IDXGIAdapter, IDXGIAdapter1, IDXGIDevice, IDXGIResource,
};
use windows::core::Interface;

use super::dxgi::{E_INVALIDARG, error_code, find_dxgi_adapter, map_error};
use super::{
    ContextBackend, CreatedDevice, DeviceBackend, DeviceRequest, FenceBackend, TextureBackend,
    downcast,
};
use crate::adapter::AdapterLuid;
use crate::caps::{DriverType, FeatureLevel};
use crate::error::{Result, ShareError};
use crate::format::TextureFormat;
use crate::texture::TextureDesc;

fn d3d_driver_type(driver_type: DriverType) -> D3D_DRIVER_TYPE {
    match driver_type {
        DriverType::Hardware => D3D_DRIVER_TYPE_HARDWARE,
        DriverType::Warp => D3D_DRIVER_TYPE_WARP,
        DriverType::Reference => D3D_DRIVER_TYPE_REFERENCE,
    }
}

struct RawDevice {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    level: D3D_FEATURE_LEVEL,
}

fn create_raw(
    adapter: Option<&IDXGIAdapter>,
    driver_type: D3D_DRIVER_TYPE,
    flags: D3D11_CREATE_DEVICE_FLAG,
    levels: &[D3D_FEATURE_LEVEL],
) -> windows::core::Result<RawDevice> {
    let mut device: Option<ID3D11Device> = None;
    let mut context: Option<ID3D11DeviceContext> = None;
    let mut level = D3D_FEATURE_LEVEL::default();
    unsafe {
        D3D11CreateDevice(
            adapter,
            driver_type,
            HMODULE::default(),
            flags,
            Some(levels),
            D3D11_SDK_VERSION,
            Some(&mut device),
            Some(&mut level),
            Some(&mut context),
        )?;
    }
    match (device, context) {
        (Some(device), Some(context)) => Ok(RawDevice {
            device,
            context,
            level,
        }),
        _ => Err(windows::core::Error::from_hresult(windows::core::HRESULT(
            E_INVALIDARG as i32,
        ))),
    }
}

/// Runtimes without 11.1 reject a level list that contains it with
/// `E_INVALIDARG`; retry without it.
fn create_with_fallback(
    adapter: Option<&IDXGIAdapter>,
    driver_type: D3D_DRIVER_TYPE,
    flags: D3D11_CREATE_DEVICE_FLAG,
    levels: &[FeatureLevel],
) -> windows::core::Result<RawDevice> {
    let d3d_levels: Vec<D3D_FEATURE_LEVEL> =
        levels.iter().map(|l| D3D_FEATURE_LEVEL(l.as_d3d())).collect();
    match create_raw(adapter, driver_type, flags, &d3d_levels) {
        Err(e) if error_code(&e) == E_INVALIDARG && levels.contains(&FeatureLevel::L11_1) => {
            tracing::debug!("[D3D11] 11_1 rejected by runtime, retrying without it");
            let without: Vec<D3D_FEATURE_LEVEL> = levels
                .iter()
                .filter(|l| **l != FeatureLevel::L11_1)
                .map(|l| D3D_FEATURE_LEVEL(l.as_d3d()))
                .collect();
            create_raw(adapter, driver_type, flags, &without)
        }
        other => other,
    }
}

fn device_adapter_luid(device: &ID3D11Device) -> Result<(AdapterLuid, bool)> {
    let dxgi_device: IDXGIDevice = device
        .cast()
        .map_err(|e| map_error(e, "ID3D11Device::QueryInterface(IDXGIDevice)"))?;
    let adapter = unsafe { dxgi_device.GetAdapter() }.map_err(|e| map_error(e, "GetAdapter"))?;
    let desc = unsafe { adapter.GetDesc() }.map_err(|e| map_error(e, "GetDesc"))?;
    let luid = AdapterLuid::from_parts(desc.AdapterLuid.LowPart, desc.AdapterLuid.HighPart);
    let software = match adapter.cast::<IDXGIAdapter1>() {
        Ok(adapter1) => unsafe { adapter1.GetDesc1() }
            .map(|d| d.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32 != 0)
            .unwrap_or(false),
        Err(_) => false,
    };
    Ok((luid, software))
}

pub(crate) fn create_device(request: &DeviceRequest) -> Result<CreatedDevice> {
    let mut flags = D3D11_CREATE_DEVICE_BGRA_SUPPORT;
    if request.debug_layer {
        flags |= D3D11_CREATE_DEVICE_DEBUG;
    }

    let (raw, driver_type) = match request.adapter {
        Some(luid) => {
            let adapter1 = find_dxgi_adapter(luid)?.ok_or_else(|| {
                ShareError::NoCompatibleDriver(format!("adapter {} is no longer present", luid))
            })?;
            let adapter: IDXGIAdapter = adapter1
                .cast()
                .map_err(|e| map_error(e, "IDXGIAdapter1::QueryInterface"))?;
            // An explicit adapter requires the unknown driver type.
            let raw = create_with_fallback(
                Some(&adapter),
                D3D_DRIVER_TYPE_UNKNOWN,
                flags,
                &request.feature_levels,
            )
            .map_err(|e| creation_error(e, &request.feature_levels))?;
            (raw, None)
        }
        None => {
            let mut last_error = None;
            let mut created = None;
            for driver_type in &request.driver_types {
                match create_with_fallback(
                    None,
                    d3d_driver_type(*driver_type),
                    flags,
                    &request.feature_levels,
                ) {
                    Ok(raw) => {
                        created = Some((raw, Some(*driver_type)));
                        break;
                    }
                    Err(e) => {
                        tracing::debug!("[D3D11] {} driver unavailable: {}", driver_type, e);
                        last_error = Some(e);
                    }
                }
            }
            match (created, last_error) {
                (Some(created), _) => created,
                (None, Some(e)) => return Err(creation_error(e, &request.feature_levels)),
                (None, None) => {
                    return Err(ShareError::NoCompatibleDriver(
                        "no driver types requested".into(),
                    ));
                }
            }
        }
    };

    let feature_level = FeatureLevel::from_d3d(raw.level.0).ok_or_else(|| {
        ShareError::Driver(format!("unknown feature level {:#x}", raw.level.0))
    })?;
    let (adapter, software) = device_adapter_luid(&raw.device)?;
    let driver_type = driver_type.unwrap_or(if software {
        DriverType::Warp
    } else {
        DriverType::Hardware
    });

    Ok(CreatedDevice {
        device: Box::new(D3d11Device {
            device: raw.device.clone(),
            feature_level,
        }),
        context: Box::new(D3d11Context {
            device: raw.device,
            context: raw.context,
        }),
        adapter,
        feature_level,
        driver_type,
    })
}

fn creation_error(e: windows::core::Error, levels: &[FeatureLevel]) -> ShareError {
    match map_error(e, "D3D11CreateDevice") {
        ShareError::Driver(message) => ShareError::NoCompatibleDriver(format!(
            "{} (levels {})",
            message,
            levels
                .iter()
                .map(|l| l.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )),
        other => other,
    }
}

fn texture_desc_for(desc: &TextureDesc) -> D3D11_TEXTURE2D_DESC {
    D3D11_TEXTURE2D_DESC {
        Width: desc.width,
        Height: desc.height,
        MipLevels: 1,
        ArraySize: 1,
        Format: DXGI_FORMAT(desc.format.dxgi_format() as i32),
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Usage: D3D11_USAGE_DEFAULT,
        BindFlags: (D3D11_BIND_RENDER_TARGET.0 | D3D11_BIND_SHADER_RESOURCE.0) as u32,
        CPUAccessFlags: 0,
        MiscFlags: D3D11_RESOURCE_MISC_SHARED.0 as u32,
    }
}

pub(crate) struct D3d11Texture {
    texture: ID3D11Texture2D,
    desc: TextureDesc,
}

// SAFETY: D3D11 resources are free-threaded; only the immediate context
// that records commands against them is single-threaded.
unsafe impl Send for D3d11Texture {}
unsafe impl Sync for D3d11Texture {}

impl TextureBackend for D3d11Texture {
    fn desc(&self) -> TextureDesc {
        self.desc
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) struct D3d11Fence {
    query: ID3D11Query,
}

// SAFETY: The query is only issued and polled through the owning context.
unsafe impl Send for D3d11Fence {}

impl FenceBackend for D3d11Fence {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) struct D3d11Device {
    device: ID3D11Device,
    feature_level: FeatureLevel,
}

// SAFETY: ID3D11Device is free-threaded for resource creation.
unsafe impl Send for D3d11Device {}
unsafe impl Sync for D3d11Device {}

impl DeviceBackend for D3d11Device {
    fn supports_shared_format(&self, format: TextureFormat) -> bool {
        if format.min_feature_level() > self.feature_level {
            return false;
        }
        let required =
            (D3D11_FORMAT_SUPPORT_TEXTURE2D.0 | D3D11_FORMAT_SUPPORT_RENDER_TARGET.0) as u32;
        match unsafe {
            self.device
                .CheckFormatSupport(DXGI_FORMAT(format.dxgi_format() as i32))
        } {
            Ok(support) => support & required == required,
            Err(_) => false,
        }
    }

    fn create_shared_texture(&self, desc: &TextureDesc) -> Result<(Box<dyn TextureBackend>, u64)> {
        let d3d_desc = texture_desc_for(desc);
        let mut texture: Option<ID3D11Texture2D> = None;
        unsafe { self.device.CreateTexture2D(&d3d_desc, None, Some(&mut texture)) }
            .map_err(|e| map_error(e, "CreateTexture2D"))?;
        let texture = texture
            .ok_or_else(|| ShareError::Driver("CreateTexture2D returned no texture".into()))?;

        let resource: IDXGIResource = texture
            .cast()
            .map_err(|e| map_error(e, "ID3D11Texture2D::QueryInterface(IDXGIResource)"))?;
        let handle = unsafe { resource.GetSharedHandle() }
            .map_err(|e| map_error(e, "GetSharedHandle"))?;
        let raw = handle.0 as usize as u64;

        tracing::debug!(
            "[D3D11] Created shared {}x{} {} texture, handle {:#x}",
            desc.width,
            desc.height,
            desc.format,
            raw
        );
        Ok((
            Box::new(D3d11Texture {
                texture,
                desc: *desc,
            }),
            raw,
        ))
    }

    fn open_shared_texture(&self, raw: u64) -> Result<Box<dyn TextureBackend>> {
        let mut texture: Option<ID3D11Texture2D> = None;
        let opened = unsafe {
            self.device
                .OpenSharedResource(HANDLE(raw as usize as *mut c_void), &mut texture)
        };
        let texture = match (opened, texture) {
            (Ok(()), Some(texture)) => texture,
            (Err(e), _) if map_error(e.clone(), "OpenSharedResource").is_device_lost() => {
                return Err(map_error(e, "OpenSharedResource"));
            }
            // The runtime cannot tell a dead handle from a bad one.
            _ => return Err(ShareError::StaleHandle { raw }),
        };

        let mut d3d_desc = D3D11_TEXTURE2D_DESC::default();
        unsafe { texture.GetDesc(&mut d3d_desc) };
        let format = TextureFormat::from_dxgi_format(d3d_desc.Format.0 as u32).ok_or_else(|| {
            ShareError::Driver(format!(
                "shared texture has unsupported DXGI format {}",
                d3d_desc.Format.0
            ))
        })?;
        Ok(Box::new(D3d11Texture {
            texture,
            desc: TextureDesc::new(d3d_desc.Width, d3d_desc.Height, format),
        }))
    }

    fn create_fence(&self) -> Result<Box<dyn FenceBackend>> {
        let desc = D3D11_QUERY_DESC {
            Query: D3D11_QUERY_EVENT,
            MiscFlags: 0,
        };
        let mut query: Option<ID3D11Query> = None;
        unsafe { self.device.CreateQuery(&desc, Some(&mut query)) }
            .map_err(|e| map_error(e, "CreateQuery"))?;
        let query =
            query.ok_or_else(|| ShareError::Driver("CreateQuery returned no query".into()))?;
        Ok(Box::new(D3d11Fence { query }))
    }

    fn removed_reason(&self) -> Option<String> {
        unsafe { self.device.GetDeviceRemovedReason() }
            .err()
            .map(|e| e.to_string())
    }
}

pub(crate) struct D3d11Context {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
}

// SAFETY: The immediate context is owned by exactly one `Device` and is
// only used from one thread at a time.
unsafe impl Send for D3d11Context {}

impl D3d11Context {
    fn texture<'a>(&self, texture: &'a dyn TextureBackend) -> Result<&'a D3d11Texture> {
        downcast::<D3d11Texture>(texture.as_any(), "texture")
    }
}

impl ContextBackend for D3d11Context {
    fn flush(&self) -> Result<()> {
        unsafe { self.context.Flush() };
        Ok(())
    }

    fn clear(&self, texture: &dyn TextureBackend, color: [f32; 4]) -> Result<()> {
        let texture = self.texture(texture)?;
        let mut view: Option<ID3D11RenderTargetView> = None;
        unsafe {
            self.device
                .CreateRenderTargetView(&texture.texture, None, Some(&mut view))
        }
        .map_err(|e| map_error(e, "CreateRenderTargetView"))?;
        let view = view
            .ok_or_else(|| ShareError::Driver("CreateRenderTargetView returned no view".into()))?;
        unsafe { self.context.ClearRenderTargetView(&view, &color) };
        Ok(())
    }

    fn write_pixels(&self, texture: &dyn TextureBackend, data: &[u8]) -> Result<()> {
        let texture = self.texture(texture)?;
        unsafe {
            self.context.UpdateSubresource(
                &texture.texture,
                0,
                None,
                data.as_ptr() as *const c_void,
                texture.desc.row_pitch() as u32,
                0,
            )
        };
        Ok(())
    }

    fn read_pixels(&self, texture: &dyn TextureBackend) -> Result<Vec<u8>> {
        let texture = self.texture(texture)?;
        let desc = texture.desc;

        let mut staging_desc = texture_desc_for(&desc);
        staging_desc.Usage = D3D11_USAGE_STAGING;
        staging_desc.BindFlags = 0;
        staging_desc.CPUAccessFlags = D3D11_CPU_ACCESS_READ.0 as u32;
        staging_desc.MiscFlags = 0;

        let mut staging: Option<ID3D11Texture2D> = None;
        unsafe {
            self.device
                .CreateTexture2D(&staging_desc, None, Some(&mut staging))
        }
        .map_err(|e| map_error(e, "CreateTexture2D(staging)"))?;
        let staging = staging
            .ok_or_else(|| ShareError::Driver("CreateTexture2D returned no texture".into()))?;

        unsafe { self.context.CopyResource(&staging, &texture.texture) };

        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe { self.context.Map(&staging, 0, D3D11_MAP_READ, 0, Some(&mut mapped)) }
            .map_err(|e| map_error(e, "Map"))?;

        let row_bytes = desc.row_pitch();
        let mut pixels = Vec::with_capacity(desc.byte_size());
        for row in 0..desc.height as usize {
            // SAFETY: Map succeeded, so pData points at `height` rows of
            // `RowPitch` bytes, each at least `row_bytes` long.
            let line = unsafe {
                std::slice::from_raw_parts(
                    (mapped.pData as *const u8).add(row * mapped.RowPitch as usize),
                    row_bytes,
                )
            };
            pixels.extend_from_slice(line);
        }
        unsafe { self.context.Unmap(&staging, 0) };
        Ok(pixels)
    }

    fn signal(&self, fence: &dyn FenceBackend) -> Result<()> {
        let fence = downcast::<D3d11Fence>(fence.as_any(), "fence")?;
        unsafe { self.context.End(&fence.query) };
        Ok(())
    }

    fn poll(&self, fence: &dyn FenceBackend) -> Result<bool> {
        let fence = downcast::<D3d11Fence>(fence.as_any(), "fence")?;
        // Event queries write a BOOL; S_FALSE leaves it untouched.
        let mut done: i32 = 0;
        unsafe {
            self.context.GetData(
                &fence.query,
                Some(&mut done as *mut i32 as *mut c_void),
                std::mem::size_of::<i32>() as u32,
                0,
            )
        }
        .map_err(|e| map_error(e, "GetData"))?;
        Ok(done != 0)
    }
}
