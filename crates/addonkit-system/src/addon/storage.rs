//! Per-addon key-value storage persisted as `storage.json`.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use addonkit_core::{AppError, AppResult};

/// File name of the local storage inside an addon directory.
pub const STORAGE_FILENAME: &str = "storage.json";

/// Whole-file JSON key-value store owned by one addon.
///
/// Changes stay in memory until [`AddonStorage::save`] is called.
#[derive(Debug)]
pub struct AddonStorage {
    path: PathBuf,
    map: Map<String, Value>,
}

impl AddonStorage {
    /// Open the storage of the addon at `addon_dir`, reading it if present.
    pub fn open(addon_dir: &Path) -> AppResult<Self> {
        let mut storage = Self {
            path: addon_dir.join(STORAGE_FILENAME),
            map: Map::new(),
        };
        storage.read()?;
        Ok(storage)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Replace the in-memory map with the file contents (empty if absent).
    pub fn read(&mut self) -> AppResult<()> {
        if !self.exists() {
            self.map = Map::new();
            return Ok(());
        }
        let content = std::fs::read_to_string(&self.path)?;
        self.map = match serde_json::from_str(&content)? {
            Value::Object(map) => map,
            other => {
                return Err(AppError::storage(format!(
                    "Storage file {} must contain an object, found {}",
                    self.path.display(),
                    json_type(&other)
                )));
            }
        };
        Ok(())
    }

    pub fn save(&self) -> AppResult<()> {
        let content = serde_json::to_string_pretty(&self.map)?;
        std::fs::write(&self.path, content)?;
        debug!(path = %self.path.display(), keys = self.map.len(), "Addon storage saved");
        Ok(())
    }

    /// Fill in every key of `defaults` that is missing, saving if anything
    /// changed.
    pub fn initialize(&mut self, defaults: Map<String, Value>) -> AppResult<bool> {
        let mut changed = false;
        for (key, value) in defaults {
            if !self.map.contains_key(&key) {
                self.map.insert(key, value);
                changed = true;
            }
        }
        if changed {
            self.save()?;
        }
        Ok(changed)
    }

    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    /// The value under `key` deserialized into `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        self.map
            .get(key)
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|e| {
                    AppError::type_error(format!("Storage key '{key}' has an unexpected shape: {e}"))
                })
            })
            .transpose()
    }

    /// Store a serialisable value.
    pub fn set<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> AppResult<()> {
        let key = key.into();
        let value = serde_json::to_value(value).map_err(|e| {
            AppError::type_error(format!("Value for storage key '{key}' is not serialisable: {e}"))
        })?;
        self.map.insert(key, value);
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> AppResult<Value> {
        self.map
            .remove(key)
            .ok_or_else(|| AppError::not_found(format!("Storage key '{key}' is not set")))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.map.keys().cloned().collect()
    }
}

pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
