// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Direct3D driver entry point: DXGI adapter enumeration plus the
//! Direct3D 11 and 9Ex backends.

use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory1, DXGI_ADAPTER_FLAG_SOFTWARE, IDXGIAdapter1, IDXGIFactory1,
};

use super::{
    CreatedDevice, DeviceRequest, Driver, DriverBackend, LegacyObjectBackend, d3d9, d3d11,
};
use crate::adapter::{AdapterInfo, AdapterLuid};
use crate::error::{Result, ShareError};

const DXGI_ERROR_NOT_FOUND: u32 = 0x887A_0002;
const DXGI_ERROR_DEVICE_REMOVED: u32 = 0x887A_0005;
const DXGI_ERROR_DEVICE_HUNG: u32 = 0x887A_0006;
const DXGI_ERROR_DEVICE_RESET: u32 = 0x887A_0007;
const D3DERR_DEVICELOST: u32 = 0x8876_0868;
const D3DERR_DEVICEREMOVED: u32 = 0x8876_0870;
const D3DERR_DEVICEHUNG: u32 = 0x8876_0874;
const D3DERR_OUTOFVIDEOMEMORY: u32 = 0x8876_017C;
const E_OUTOFMEMORY: u32 = 0x8007_000E;
pub(crate) const E_INVALIDARG: u32 = 0x8007_0057;

/// Map a failed driver call onto the error taxonomy.
pub(crate) fn map_error(e: windows::core::Error, what: &str) -> ShareError {
    let code = e.code().0 as u32;
    match code {
        DXGI_ERROR_DEVICE_REMOVED
        | DXGI_ERROR_DEVICE_HUNG
        | DXGI_ERROR_DEVICE_RESET
        | D3DERR_DEVICELOST
        | D3DERR_DEVICEREMOVED
        | D3DERR_DEVICEHUNG => ShareError::DeviceLost(format!("{}: {}", what, e)),
        E_OUTOFMEMORY | D3DERR_OUTOFVIDEOMEMORY => {
            ShareError::OutOfMemory(format!("{}: {}", what, e))
        }
        _ => ShareError::Driver(format!("{} failed ({:#010x}): {}", what, code, e)),
    }
}

pub(crate) fn error_code(e: &windows::core::Error) -> u32 {
    e.code().0 as u32
}

/// Null-terminated UTF-16 buffer to `String`.
fn wide_to_string(wide: &[u16]) -> String {
    let len = wide.iter().position(|c| *c == 0).unwrap_or(wide.len());
    String::from_utf16_lossy(&wide[..len])
}

/// Direct3D 11 / 9Ex driver.
#[derive(Debug, Default)]
pub struct D3dDriver;

impl D3dDriver {
    pub fn new() -> Self {
        Self
    }
}

/// DXGI adapters in enumeration order.
pub(crate) fn enumerate_dxgi_adapters() -> Result<Vec<IDXGIAdapter1>> {
    let factory: IDXGIFactory1 = unsafe { CreateDXGIFactory1() }
        .map_err(|e| ShareError::AdapterInfoUnavailable(format!("CreateDXGIFactory1: {}", e)))?;

    let mut adapters = Vec::new();
    let mut index = 0u32;
    loop {
        match unsafe { factory.EnumAdapters1(index) } {
            Ok(adapter) => adapters.push(adapter),
            Err(e) if error_code(&e) == DXGI_ERROR_NOT_FOUND => break,
            Err(e) => return Err(map_error(e, "EnumAdapters1")),
        }
        index += 1;
    }
    Ok(adapters)
}

/// DXGI adapter whose LUID matches, if still present.
pub(crate) fn find_dxgi_adapter(luid: AdapterLuid) -> Result<Option<IDXGIAdapter1>> {
    for adapter in enumerate_dxgi_adapters()? {
        let desc = unsafe { adapter.GetDesc1() }.map_err(|e| map_error(e, "GetDesc1"))?;
        if AdapterLuid::from_parts(desc.AdapterLuid.LowPart, desc.AdapterLuid.HighPart) == luid {
            return Ok(Some(adapter));
        }
    }
    Ok(None)
}

fn describe(index: usize, adapter: &IDXGIAdapter1) -> Result<AdapterInfo> {
    let desc = unsafe { adapter.GetDesc1() }
        .map_err(|e| ShareError::AdapterInfoUnavailable(format!("GetDesc1: {}", e)))?;

    let mut outputs = Vec::new();
    let mut output_index = 0u32;
    while let Ok(output) = unsafe { adapter.EnumOutputs(output_index) } {
        if let Ok(output_desc) = unsafe { output.GetDesc() } {
            outputs.push(wide_to_string(&output_desc.DeviceName));
        }
        output_index += 1;
    }

    Ok(AdapterInfo {
        index,
        name: wide_to_string(&desc.Description),
        vendor_id: desc.VendorId,
        device_id: desc.DeviceId,
        luid: AdapterLuid::from_parts(desc.AdapterLuid.LowPart, desc.AdapterLuid.HighPart),
        dedicated_video_memory: desc.DedicatedVideoMemory as u64,
        outputs,
        software: desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32 != 0,
    })
}

impl Driver for D3dDriver {
    fn backend(&self) -> DriverBackend {
        DriverBackend::D3d
    }

    fn enumerate_adapters(&self) -> Result<Vec<AdapterInfo>> {
        enumerate_dxgi_adapters()?
            .iter()
            .enumerate()
            .map(|(index, adapter)| describe(index, adapter))
            .collect()
    }

    fn create_device(&self, request: &DeviceRequest) -> Result<CreatedDevice> {
        d3d11::create_device(request)
    }

    fn create_legacy_object(&self) -> Result<Box<dyn LegacyObjectBackend>> {
        Ok(Box::new(d3d9::D3d9Object::new()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wide_to_string_stops_at_nul() {
        let mut wide = [0u16; 8];
        for (slot, c) in wide.iter_mut().zip("GPU".encode_utf16()) {
            *slot = c;
        }
        assert_eq!(wide_to_string(&wide), "GPU");
    }

    #[test]
    fn test_removed_codes_map_to_device_lost() {
        let err = windows::core::Error::from_hresult(windows::core::HRESULT(
            DXGI_ERROR_DEVICE_REMOVED as i32,
        ));
        assert!(map_error(err, "Present").is_device_lost());
    }
}
