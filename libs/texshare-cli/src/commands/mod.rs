// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod adapters;
pub mod info;
pub mod select;
pub mod selftest;

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use texshare::{
    AdapterDirectory, AdapterPreference, AdapterSelection, DeviceFactory, Diagnostics,
    DriverBackend, FilePreferenceStore, ShareConfig,
};

/// Resolved configuration shared by every command.
pub struct Context {
    pub config: ShareConfig,
    pub backend: DriverBackend,
    pub factory: DeviceFactory,
    pub prefs: FilePreferenceStore,
}

impl Context {
    pub fn load(
        driver: Option<DriverBackend>,
        config_dir: Option<PathBuf>,
        prefs: Option<PathBuf>,
    ) -> Result<Self> {
        let dir = match config_dir {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };
        let diagnostics = Diagnostics::tracing();
        let config = ShareConfig::load_or_default_with(&dir, &diagnostics).with_env_overrides();

        let backend = match driver {
            Some(backend) => backend,
            None => config.driver_backend()?,
        };
        let factory = DeviceFactory::open(backend)
            .with_context(|| format!("Failed to open the {} driver", backend))?
            .with_options(config.device_options())
            .with_diagnostics(diagnostics.clone());

        let prefs = match prefs {
            Some(path) => FilePreferenceStore::new(path),
            None => FilePreferenceStore::default_location()?,
        }
        .with_diagnostics(diagnostics);

        tracing::debug!("Using {} driver, preferences at {}", backend, prefs.path().display());
        Ok(Self {
            config,
            backend,
            factory,
            prefs,
        })
    }

    /// Enumerate adapters and apply the stored preference, then the config
    /// file's explicit choice on top.
    pub fn directory(&self) -> Result<AdapterDirectory> {
        let mut directory = self.factory.adapter_directory();
        AdapterPreference::default().restore(&self.prefs, &mut directory)?;

        match self.config.adapter_selection(&directory)? {
            AdapterSelection::Index(index) => directory.select(index)?,
            AdapterSelection::SystemDefault => {}
        }
        Ok(directory)
    }
}
