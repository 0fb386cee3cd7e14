// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! texshare CLI
//!
//! Adapter listing and selection, plus an in-process shared-texture self-test.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use texshare::{DriverBackend, Generation, TextureFormat};

mod commands;

#[derive(Parser)]
#[command(name = "texshare")]
#[command(author, version, about = "Cross-process GPU shared-texture tool", long_about = None)]
struct Cli {
    /// Driver backend (d3d, software). Overrides texshare.toml and TEXSHARE_DRIVER.
    #[arg(long, global = true)]
    driver: Option<DriverBackend>,

    /// Directory containing texshare.toml (default: current directory)
    #[arg(long = "config", value_name = "DIR", global = true)]
    config_dir: Option<PathBuf>,

    /// Preference file (default: <config dir>/texshare/preferences.toml)
    #[arg(long = "prefs", value_name = "FILE", global = true)]
    prefs: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List graphics adapters
    Adapters,

    /// Validate and persist the preferred adapter
    Select {
        /// Adapter index (see `texshare adapters`)
        #[arg(value_name = "INDEX", required_unless_present = "default")]
        index: Option<usize>,

        /// Forget the stored adapter and use the system default
        #[arg(long, conflicts_with = "index")]
        default: bool,
    },

    /// Show render and display descriptions of the selected adapter
    Info {
        /// Truncate descriptions to this many characters
        #[arg(long, default_value = "256")]
        max_chars: usize,
    },

    /// Exchange a texture between two devices in this process
    Selftest {
        /// API generation (d3d11, d3d9ex)
        #[arg(long, default_value = "d3d11")]
        generation: Generation,

        /// Texture width
        #[arg(long, default_value = "512")]
        width: u32,

        /// Texture height
        #[arg(long, default_value = "512")]
        height: u32,

        /// Pixel format (bgra8, bgrx8, rgba8, rgb10a2, rgba16f, rgba32f)
        #[arg(long, default_value = "bgra8")]
        format: TextureFormat,

        /// Fill color as r,g,b,a in 0.0..=1.0
        #[arg(
            long,
            default_value = "1.0,0.0,0.0,1.0",
            value_parser = commands::selftest::parse_color
        )]
        color: [f32; 4],
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let ctx = commands::Context::load(cli.driver, cli.config_dir, cli.prefs)?;

    match cli.command {
        Commands::Adapters => commands::adapters::list(&ctx)?,
        Commands::Select { index, default } => {
            commands::select::run(&ctx, if default { None } else { index })?
        }
        Commands::Info { max_chars } => commands::info::run(&ctx, max_chars)?,
        Commands::Selftest {
            generation,
            width,
            height,
            format,
            color,
        } => commands::selftest::run(&ctx, generation, width, height, format, color)?,
    }

    Ok(())
}
