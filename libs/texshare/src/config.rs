// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Configuration via `texshare.toml`.
//!
//! The loaded config resolves to explicit values ([`DriverBackend`],
//! [`AdapterSelection`], [`DeviceOptions`], [`SyncConfig`]) that are handed
//! to the factory and sync gate. Nothing here is stored globally.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapter::{AdapterDirectory, AdapterSelection, vendor};
use crate::caps::Generation;
use crate::device::DeviceOptions;
use crate::diagnostics::{Diagnostics, Operation};
use crate::driver::DriverBackend;
use crate::error::{Result, ShareError};
use crate::session::SessionConfig;
use crate::sync::SyncConfig;

/// `[adapter]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterSection {
    /// Adapter index in enumeration order.
    pub index: Option<usize>,
    /// Vendor to prefer when no index is given (`nvidia`, `amd`, `intel` or
    /// a numeric PCI vendor id).
    pub prefer_vendor: Option<String>,
}

/// `[device]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    pub allow_software_fallback: bool,
    pub debug_layer: bool,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            allow_software_fallback: true,
            debug_layer: false,
        }
    }
}

/// `[sync]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    pub timeout_ms: u64,
    pub poll_interval_us: u64,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            timeout_ms: 1000,
            poll_interval_us: 200,
        }
    }
}

/// Configuration from `texshare.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareConfig {
    /// Driver backend (`d3d` | `software`). Unset defers to
    /// `TEXSHARE_DRIVER` and then the platform default.
    pub driver: Option<String>,
    pub adapter: AdapterSection,
    pub device: DeviceSection,
    pub sync: SyncSection,
}

impl ShareConfig {
    /// Configuration file name.
    pub const FILE_NAME: &'static str = "texshare.toml";

    /// Adapter index override.
    pub const ADAPTER_ENV_VAR: &'static str = "TEXSHARE_ADAPTER";

    /// Load configuration from a directory. Returns error if the file is
    /// missing or cannot be parsed.
    pub fn load(dir: &Path) -> Result<Self> {
        Self::load_with(dir, &Diagnostics::default())
    }

    /// Like [`ShareConfig::load`], reporting failures to `diagnostics`.
    pub fn load_with(dir: &Path, diagnostics: &Diagnostics) -> Result<Self> {
        Self::load_file_with(&dir.join(Self::FILE_NAME), diagnostics)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        Self::load_file_with(path, &Diagnostics::default())
    }

    pub fn load_file_with(path: &Path, diagnostics: &Diagnostics) -> Result<Self> {
        let result = std::fs::read_to_string(path)
            .map_err(|e| {
                ShareError::Configuration(format!("Failed to read {}: {}", path.display(), e))
            })
            .and_then(|content| {
                Self::from_toml_str(&content).map_err(|e| {
                    ShareError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
                })
            });
        let config = diagnostics.check(Operation::LoadConfig, result)?;
        tracing::info!("Loaded texshare config from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a directory, returning defaults if the file
    /// is missing or unparseable.
    pub fn load_or_default(dir: &Path) -> Self {
        Self::load_or_default_with(dir, &Diagnostics::default())
    }

    /// Like [`ShareConfig::load_or_default`]. A file that exists but fails to
    /// load is reported to `diagnostics`; a missing file is not a failure.
    pub fn load_or_default_with(dir: &Path, diagnostics: &Diagnostics) -> Self {
        let path = dir.join(Self::FILE_NAME);
        if !path.exists() {
            tracing::debug!(
                "No {} found in {}, using defaults",
                Self::FILE_NAME,
                dir.display()
            );
            return Self::default();
        }

        match Self::load_file_with(&path, diagnostics) {
            Ok(config) => config,
            Err(_) => {
                tracing::debug!("Using default texshare config");
                Self::default()
            }
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| ShareError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ShareError::Configuration(e.to_string()))
    }

    fn validate(&self) -> Result<()> {
        if self.sync.timeout_ms == 0 {
            return Err(ShareError::Configuration(
                "sync.timeout_ms must be greater than zero".into(),
            ));
        }
        if let Some(driver) = &self.driver {
            driver
                .parse::<DriverBackend>()
                .map_err(ShareError::Configuration)?;
        }
        if let Some(name) = &self.adapter.prefer_vendor {
            if vendor::parse(name).is_none() {
                return Err(ShareError::Configuration(format!(
                    "Unknown vendor '{}' in adapter.prefer_vendor",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Apply `TEXSHARE_DRIVER` and `TEXSHARE_ADAPTER` on top of the file.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(driver) = std::env::var(DriverBackend::ENV_VAR) {
            match driver.parse::<DriverBackend>() {
                Ok(backend) => self.driver = Some(backend.as_str().to_string()),
                Err(e) => tracing::warn!("Ignoring {}: {}", DriverBackend::ENV_VAR, e),
            }
        }
        if let Ok(index) = std::env::var(Self::ADAPTER_ENV_VAR) {
            match index.trim().parse::<usize>() {
                Ok(index) => self.adapter.index = Some(index),
                Err(e) => tracing::warn!("Ignoring {}: {}", Self::ADAPTER_ENV_VAR, e),
            }
        }
        self
    }

    pub fn driver_backend(&self) -> Result<DriverBackend> {
        match &self.driver {
            Some(driver) => driver.parse().map_err(ShareError::Configuration),
            None => Ok(DriverBackend::resolve(None)),
        }
    }

    pub fn device_options(&self) -> DeviceOptions {
        DeviceOptions {
            allow_software_fallback: self.device.allow_software_fallback,
            debug_layer: self.device.debug_layer,
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            timeout: Duration::from_millis(self.sync.timeout_ms),
            poll_interval: Duration::from_micros(self.sync.poll_interval_us),
        }
    }

    /// Resolve the configured adapter against an enumeration.
    ///
    /// An explicit index wins and must exist. Otherwise the first adapter of
    /// the preferred vendor is used, falling back to the system default.
    pub fn adapter_selection(&self, directory: &AdapterDirectory) -> Result<AdapterSelection> {
        if let Some(index) = self.adapter.index {
            directory.resolve(AdapterSelection::Index(index))?;
            return Ok(AdapterSelection::Index(index));
        }

        let Some(name) = &self.adapter.prefer_vendor else {
            return Ok(AdapterSelection::SystemDefault);
        };
        let vendor_id = vendor::parse(name).ok_or_else(|| {
            ShareError::Configuration(format!("Unknown vendor '{}' in adapter.prefer_vendor", name))
        })?;
        match directory.find_vendor_id(vendor_id) {
            Some(index) => Ok(AdapterSelection::Index(index)),
            None => {
                tracing::debug!(
                    "No adapter from vendor {:#06x}, using the system default",
                    vendor_id
                );
                Ok(AdapterSelection::SystemDefault)
            }
        }
    }

    /// Session parameters for `generation` on `directory`.
    pub fn session_config(
        &self,
        generation: Generation,
        directory: &AdapterDirectory,
    ) -> Result<SessionConfig> {
        Ok(SessionConfig {
            generation,
            adapter: self.adapter_selection(directory)?,
            window: None,
            sync: self.sync_config(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterInfo, AdapterLuid};
    use crate::diagnostics::MemorySink;
    use crate::error::ErrorKind;
    use serial_test::serial;
    use std::io::Write;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn directory() -> AdapterDirectory {
        let adapter = |index: usize, vendor_id: u32| AdapterInfo {
            index,
            name: format!("GPU {}", index),
            vendor_id,
            device_id: 0,
            luid: AdapterLuid(index as u64 + 1),
            dedicated_video_memory: 0,
            outputs: Vec::new(),
            software: false,
        };
        AdapterDirectory::from_adapters(vec![adapter(0, vendor::INTEL), adapter(1, vendor::NVIDIA)])
    }

    #[test]
    fn test_load_missing_file_returns_error() {
        let dir = TempDir::new().unwrap();
        assert!(ShareConfig::load(dir.path()).is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = TempDir::new().unwrap();
        let config = ShareConfig::load_or_default(dir.path());
        assert_eq!(config, ShareConfig::default());
        assert_eq!(config.sync_config(), SyncConfig::default());
    }

    #[test]
    fn test_load_full_file() {
        let dir = TempDir::new().unwrap();
        let mut file = std::fs::File::create(dir.path().join(ShareConfig::FILE_NAME)).unwrap();
        write!(
            file,
            r#"
driver = "software"

[adapter]
prefer_vendor = "nvidia"

[device]
allow_software_fallback = false

[sync]
timeout_ms = 250
"#
        )
        .unwrap();

        let config = ShareConfig::load(dir.path()).unwrap();
        assert_eq!(config.driver_backend().unwrap(), DriverBackend::Software);
        assert!(!config.device_options().allow_software_fallback);
        assert_eq!(config.sync_config().timeout, Duration::from_millis(250));
        assert_eq!(config.sync_config().poll_interval, Duration::from_micros(200));
        assert_eq!(
            config.adapter_selection(&directory()).unwrap(),
            AdapterSelection::Index(1)
        );
    }

    #[test]
    fn test_load_or_default_bad_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(ShareConfig::FILE_NAME),
            "[sync]\ntimeout_ms = 0\n",
        )
        .unwrap();
        assert!(ShareConfig::load(dir.path()).is_err());
        assert_eq!(ShareConfig::load_or_default(dir.path()), ShareConfig::default());
    }

    #[test]
    fn test_malformed_file_reported_once() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(ShareConfig::FILE_NAME), "driver = [\n").unwrap();
        let sink = Arc::new(MemorySink::new());
        let diagnostics = Diagnostics::new(sink.clone());

        let config = ShareConfig::load_or_default_with(dir.path(), &diagnostics);
        assert_eq!(config, ShareConfig::default());
        assert_eq!(sink.count_for(Operation::LoadConfig), 1);
        assert_eq!(sink.last().unwrap().kind, ErrorKind::Configuration);

        // A missing file falls back silently.
        let empty = TempDir::new().unwrap();
        ShareConfig::load_or_default_with(empty.path(), &diagnostics);
        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn test_explicit_index_must_exist() {
        let config = ShareConfig {
            adapter: AdapterSection {
                index: Some(5),
                prefer_vendor: None,
            },
            ..ShareConfig::default()
        };
        assert!(matches!(
            config.adapter_selection(&directory()),
            Err(ShareError::AdapterOutOfRange { index: 5, count: 2 })
        ));
    }

    #[test]
    fn test_missing_vendor_falls_back_to_default() {
        let config = ShareConfig::from_toml_str("[adapter]\nprefer_vendor = \"amd\"\n").unwrap();
        assert_eq!(
            config.adapter_selection(&directory()).unwrap(),
            AdapterSelection::SystemDefault
        );
    }

    #[test]
    fn test_unknown_values_rejected() {
        assert!(ShareConfig::from_toml_str("driver = \"metal\"\n").is_err());
        assert!(ShareConfig::from_toml_str("[adapter]\nprefer_vendor = \"3dfx\"\n").is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = ShareConfig::from_toml_str("[adapter]\nindex = 1\n").unwrap();
        let text = config.to_toml_string().unwrap();
        assert_eq!(ShareConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        // SAFETY: serialized with every other test that touches these vars.
        unsafe {
            std::env::set_var(DriverBackend::ENV_VAR, "software");
            std::env::set_var(ShareConfig::ADAPTER_ENV_VAR, "1");
        }
        let config = ShareConfig::default().with_env_overrides();
        unsafe {
            std::env::remove_var(DriverBackend::ENV_VAR);
            std::env::remove_var(ShareConfig::ADAPTER_ENV_VAR);
        }

        assert_eq!(config.driver.as_deref(), Some("software"));
        assert_eq!(config.adapter.index, Some(1));
    }

    #[test]
    #[serial]
    fn test_bad_env_values_ignored() {
        // SAFETY: serialized with every other test that touches these vars.
        unsafe {
            std::env::set_var(DriverBackend::ENV_VAR, "glide");
            std::env::set_var(ShareConfig::ADAPTER_ENV_VAR, "first");
        }
        let config = ShareConfig::default().with_env_overrides();
        unsafe {
            std::env::remove_var(DriverBackend::ENV_VAR);
            std::env::remove_var(ShareConfig::ADAPTER_ENV_VAR);
        }

        assert_eq!(config, ShareConfig::default());
    }
}
