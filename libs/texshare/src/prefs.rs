// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Named key/value preference storage.
//!
//! The core never reads or writes preferences itself. A higher layer
//! persists the selected adapter with [`AdapterPreference::save`] and replays
//! it through [`AdapterDirectory::select`] at the next start.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::adapter::{AdapterDirectory, AdapterSelection};
use crate::diagnostics::{Diagnostics, Operation};
use crate::error::{Result, ShareError};

/// Registry-style preference store: keys hold named integer and path values.
pub trait PreferenceStore: Send + Sync {
    fn read_u32(&self, key: &str, name: &str) -> Result<Option<u32>>;

    fn write_u32(&self, key: &str, name: &str, value: u32) -> Result<()>;

    fn read_path(&self, key: &str, name: &str) -> Result<Option<PathBuf>>;

    fn write_path(&self, key: &str, name: &str, value: &Path) -> Result<()>;

    /// Remove one value. Removing a missing value is not an error.
    fn remove_value(&self, key: &str, name: &str) -> Result<()>;

    /// Remove a key and all its values.
    fn remove_key(&self, key: &str) -> Result<()>;

    fn has_key(&self, key: &str) -> Result<bool>;
}

/// Preferences in a TOML file, one table per key.
///
/// Failed reads and writes are reported to the store's [`Diagnostics`].
#[derive(Debug)]
pub struct FilePreferenceStore {
    path: PathBuf,
    lock: Mutex<()>,
    diagnostics: Diagnostics,
}

impl FilePreferenceStore {
    pub const FILE_NAME: &'static str = "preferences.toml";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// `<config dir>/texshare/preferences.toml`.
    pub fn default_location() -> Result<Self> {
        let dir = dirs::config_dir().ok_or_else(|| {
            ShareError::Preferences("Could not determine the user config directory".into())
        })?;
        Ok(Self::new(dir.join("texshare").join(Self::FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<toml::Table> {
        if !self.path.exists() {
            return Ok(toml::Table::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        content.parse::<toml::Table>().map_err(|e| {
            ShareError::Preferences(format!("Failed to parse {}: {}", self.path.display(), e))
        })
    }

    fn store(&self, table: &toml::Table) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(table)
            .map_err(|e| ShareError::Preferences(e.to_string()))?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }

    fn read_value(&self, key: &str, name: &str) -> Result<Option<toml::Value>> {
        let _guard = self.lock.lock();
        let table = self.load()?;
        Ok(table
            .get(key)
            .and_then(|k| k.as_table())
            .and_then(|k| k.get(name))
            .cloned())
    }

    fn write_value(&self, key: &str, name: &str, value: toml::Value) -> Result<()> {
        let _guard = self.lock.lock();
        let mut table = self.load()?;
        let entry = table
            .entry(key.to_string())
            .or_insert(toml::Value::Table(toml::Table::new()));
        let values = entry.as_table_mut().ok_or_else(|| {
            ShareError::Preferences(format!("'{}' is a value, not a key", key))
        })?;
        values.insert(name.to_string(), value);
        self.store(&table)
    }
}

impl FilePreferenceStore {
    fn read_u32_inner(&self, key: &str, name: &str) -> Result<Option<u32>> {
        match self.read_value(key, name)? {
            None => Ok(None),
            Some(toml::Value::Integer(value)) => u32::try_from(value).map(Some).map_err(|_| {
                ShareError::Preferences(format!("{}\\{} = {} is not a u32", key, name, value))
            }),
            Some(other) => Err(ShareError::Preferences(format!(
                "{}\\{} is a {}, expected an integer",
                key,
                name,
                other.type_str()
            ))),
        }
    }

    fn read_path_inner(&self, key: &str, name: &str) -> Result<Option<PathBuf>> {
        match self.read_value(key, name)? {
            None => Ok(None),
            Some(toml::Value::String(value)) => Ok(Some(PathBuf::from(value))),
            Some(other) => Err(ShareError::Preferences(format!(
                "{}\\{} is a {}, expected a path",
                key,
                name,
                other.type_str()
            ))),
        }
    }

    fn write_path_inner(&self, key: &str, name: &str, value: &Path) -> Result<()> {
        let value = value.to_str().ok_or_else(|| {
            ShareError::Preferences(format!("{} is not valid UTF-8", value.display()))
        })?;
        self.write_value(key, name, toml::Value::String(value.to_string()))
    }

    fn remove_value_inner(&self, key: &str, name: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut table = self.load()?;
        let removed = table
            .get_mut(key)
            .and_then(|k| k.as_table_mut())
            .and_then(|k| k.remove(name));
        if removed.is_some() {
            self.store(&table)?;
        }
        Ok(())
    }

    fn remove_key_inner(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut table = self.load()?;
        if table.remove(key).is_some() {
            self.store(&table)?;
        }
        Ok(())
    }

    fn has_key_inner(&self, key: &str) -> Result<bool> {
        let _guard = self.lock.lock();
        Ok(self.load()?.contains_key(key))
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn read_u32(&self, key: &str, name: &str) -> Result<Option<u32>> {
        self.diagnostics
            .check(Operation::Preferences, self.read_u32_inner(key, name))
    }

    fn write_u32(&self, key: &str, name: &str, value: u32) -> Result<()> {
        let result = self.write_value(key, name, toml::Value::Integer(value as i64));
        self.diagnostics.check(Operation::Preferences, result)
    }

    fn read_path(&self, key: &str, name: &str) -> Result<Option<PathBuf>> {
        self.diagnostics
            .check(Operation::Preferences, self.read_path_inner(key, name))
    }

    fn write_path(&self, key: &str, name: &str, value: &Path) -> Result<()> {
        self.diagnostics
            .check(Operation::Preferences, self.write_path_inner(key, name, value))
    }

    fn remove_value(&self, key: &str, name: &str) -> Result<()> {
        self.diagnostics
            .check(Operation::Preferences, self.remove_value_inner(key, name))
    }

    fn remove_key(&self, key: &str) -> Result<()> {
        self.diagnostics
            .check(Operation::Preferences, self.remove_key_inner(key))
    }

    fn has_key(&self, key: &str) -> Result<bool> {
        self.diagnostics
            .check(Operation::Preferences, self.has_key_inner(key))
    }
}

/// Persisted adapter choice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterPreference {
    key: String,
}

impl AdapterPreference {
    pub const DEFAULT_KEY: &'static str = "texshare";
    const VALUE_NAME: &'static str = "Adapter";

    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Persist `selection`. The system default removes the stored index.
    pub fn save(&self, store: &dyn PreferenceStore, selection: AdapterSelection) -> Result<()> {
        match selection {
            AdapterSelection::SystemDefault => store.remove_value(&self.key, Self::VALUE_NAME),
            AdapterSelection::Index(index) => {
                let value = u32::try_from(index).map_err(|_| {
                    ShareError::Preferences(format!("adapter index {} does not fit", index))
                })?;
                store.write_u32(&self.key, Self::VALUE_NAME, value)
            }
        }
    }

    /// Stored selection, without validating it.
    pub fn load(&self, store: &dyn PreferenceStore) -> Result<AdapterSelection> {
        Ok(match store.read_u32(&self.key, Self::VALUE_NAME)? {
            Some(index) => AdapterSelection::Index(index as usize),
            None => AdapterSelection::SystemDefault,
        })
    }

    /// Replay the stored index into `directory`. An index that no longer
    /// exists is ignored with a warning and the selection is left alone.
    pub fn restore(
        &self,
        store: &dyn PreferenceStore,
        directory: &mut AdapterDirectory,
    ) -> Result<AdapterSelection> {
        if let AdapterSelection::Index(index) = self.load(store)? {
            if let Err(e) = directory.select(index) {
                tracing::warn!("Ignoring stored adapter preference: {}", e);
            }
        }
        Ok(directory.current())
    }
}

impl Default for AdapterPreference {
    fn default() -> Self {
        Self::new(Self::DEFAULT_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterInfo, AdapterLuid, vendor};
    use crate::diagnostics::MemorySink;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> FilePreferenceStore {
        FilePreferenceStore::new(dir.path().join("nested").join(FilePreferenceStore::FILE_NAME))
    }

    #[test]
    fn test_values_persist_across_instances() {
        let dir = TempDir::new().unwrap();
        store(&dir).write_u32("texshare", "Adapter", 2).unwrap();
        store(&dir)
            .write_path("texshare", "LogPath", Path::new("/tmp/texshare.log"))
            .unwrap();

        let reopened = store(&dir);
        assert_eq!(reopened.read_u32("texshare", "Adapter").unwrap(), Some(2));
        assert_eq!(
            reopened.read_path("texshare", "LogPath").unwrap(),
            Some(PathBuf::from("/tmp/texshare.log"))
        );
        assert_eq!(reopened.read_u32("texshare", "Missing").unwrap(), None);
    }

    #[test]
    fn test_remove_value_and_key() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(!store.has_key("texshare").unwrap());

        store.write_u32("texshare", "Adapter", 1).unwrap();
        store.write_u32("texshare", "Other", 3).unwrap();
        assert!(store.has_key("texshare").unwrap());

        store.remove_value("texshare", "Adapter").unwrap();
        assert_eq!(store.read_u32("texshare", "Adapter").unwrap(), None);
        assert_eq!(store.read_u32("texshare", "Other").unwrap(), Some(3));

        store.remove_key("texshare").unwrap();
        assert!(!store.has_key("texshare").unwrap());
        store.remove_key("texshare").unwrap();
    }

    #[test]
    fn test_type_mismatch() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .write_path("texshare", "Adapter", Path::new("not a number"))
            .unwrap();
        assert!(matches!(
            store.read_u32("texshare", "Adapter"),
            Err(ShareError::Preferences(_))
        ));
    }

    #[test]
    fn test_failed_write_reported_once() {
        let dir = TempDir::new().unwrap();
        // The parent "directory" is a regular file, so the write cannot land.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let sink = Arc::new(MemorySink::new());
        let store = FilePreferenceStore::new(blocker.join(FilePreferenceStore::FILE_NAME))
            .with_diagnostics(Diagnostics::new(sink.clone()));

        assert!(store.write_u32("texshare", "Adapter", 1).is_err());
        assert_eq!(sink.count_for(Operation::Preferences), 1);
        assert_eq!(sink.events().len(), 1);
    }

    #[test]
    fn test_adapter_preference_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let adapters = (0..2)
            .map(|index| AdapterInfo {
                index,
                name: format!("GPU {}", index),
                vendor_id: vendor::AMD,
                device_id: 0,
                luid: AdapterLuid(index as u64 + 1),
                dedicated_video_memory: 0,
                outputs: Vec::new(),
                software: false,
            })
            .collect::<Vec<_>>();

        let preference = AdapterPreference::default();
        preference.save(&store, AdapterSelection::Index(1)).unwrap();

        let mut directory = AdapterDirectory::from_adapters(adapters.clone());
        assert_eq!(
            preference.restore(&store, &mut directory).unwrap(),
            AdapterSelection::Index(1)
        );

        let mut shrunk = AdapterDirectory::from_adapters(adapters[..1].to_vec());
        assert_eq!(
            preference.restore(&store, &mut shrunk).unwrap(),
            AdapterSelection::SystemDefault
        );

        preference.save(&store, AdapterSelection::SystemDefault).unwrap();
        assert_eq!(preference.load(&store).unwrap(), AdapterSelection::SystemDefault);
    }
}
