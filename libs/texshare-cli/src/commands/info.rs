// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use anyhow::Result;

use super::Context;

/// Print the render and display descriptions of the selected adapter.
pub fn run(ctx: &Context, max_chars: usize) -> Result<()> {
    let mut directory = ctx.directory()?;
    if directory.current().index().is_none() {
        // Describe what the system default would pick.
        if directory.count() == 0 {
            println!("No adapters found ({} driver).", ctx.backend);
            return Ok(());
        }
        directory.select(0)?;
        println!("No adapter selected, describing adapter 0.");
    }

    let description = directory.info(max_chars)?;
    println!("Render:  {}", description.render);
    if description.display.is_empty() {
        println!("Display: (no output attached)");
    } else {
        println!("Display: {}", description.display);
    }
    Ok(())
}
