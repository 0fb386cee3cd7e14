// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use anyhow::{Context as _, Result};
use texshare::{AdapterPreference, AdapterSelection};

use super::Context;

/// Persist `index` as the preferred adapter, or forget it when `None`.
pub fn run(ctx: &Context, index: Option<usize>) -> Result<()> {
    let preference = AdapterPreference::default();

    let Some(index) = index else {
        preference.save(&ctx.prefs, AdapterSelection::SystemDefault)?;
        println!("Adapter preference cleared; the system default will be used.");
        return Ok(());
    };

    let mut directory = ctx.factory.adapter_directory();
    directory
        .select(index)
        .with_context(|| format!("Cannot select adapter {}", index))?;
    preference.save(&ctx.prefs, directory.current())?;

    let name = directory.name(index, 256)?;
    println!("Selected adapter {}: {}", index, name);
    println!("Saved to {}", ctx.prefs.path().display());
    Ok(())
}
