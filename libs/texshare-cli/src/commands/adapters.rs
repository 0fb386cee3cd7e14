// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use anyhow::Result;
use texshare::vendor;

use super::Context;

fn vendor_name(vendor_id: u32) -> &'static str {
    match vendor_id {
        vendor::NVIDIA => "NVIDIA",
        vendor::AMD => "AMD",
        vendor::INTEL => "Intel",
        vendor::MICROSOFT => "Microsoft",
        _ => "unknown",
    }
}

/// List adapters in enumeration order.
pub fn list(ctx: &Context) -> Result<()> {
    let directory = ctx.directory()?;

    if directory.count() == 0 {
        println!("No adapters found ({} driver).", ctx.backend);
        return Ok(());
    }

    println!("Adapters ({} driver, {}):\n", ctx.backend, directory.count());

    for adapter in directory.adapters() {
        let marker = if directory.current().index() == Some(adapter.index) {
            "*"
        } else {
            " "
        };
        println!("{} [{}] {}", marker, adapter.index, adapter.name);
        println!(
            "      vendor {:#06x} ({}), device {:#06x}{}",
            adapter.vendor_id,
            vendor_name(adapter.vendor_id),
            adapter.device_id,
            if adapter.software { ", software" } else { "" }
        );
        println!("      LUID {}", adapter.luid);
        if adapter.dedicated_video_memory > 0 {
            println!(
                "      {} MiB dedicated video memory",
                adapter.dedicated_video_memory / (1024 * 1024)
            );
        }
        for output in &adapter.outputs {
            println!("      output {}", output);
        }
    }

    if directory.current().index().is_none() {
        println!("\nNo adapter selected; the system default is used.");
    }
    Ok(())
}
