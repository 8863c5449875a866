//! Persistent per-root cache of enabled flags and dependency verdicts.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use addonkit_core::{AppError, AppResult};

/// File name of the cache inside a registry root.
pub const CACHE_FILENAME: &str = ".addons-cache.json";

/// Outcome of the last dependency check of an addon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyCheckResult {
    #[serde(default)]
    pub satisfied: bool,
    pub hash: String,
}

impl DependencyCheckResult {
    /// Whether the verdict was computed for the dependency list hashing to
    /// `current_hash`.
    pub fn is_valid(&self, current_hash: &str) -> bool {
        self.hash == current_hash
    }
}

/// Cached record of one addon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAddon {
    #[serde(default)]
    pub enabled: bool,
    pub last_dependency_check: DependencyCheckResult,
}

/// JSON-file cache of [`StoredAddon`] records keyed by addon id.
///
/// The file is read once when the cache is opened and rewritten wholesale on
/// every mutating call that changes something.
#[derive(Debug)]
pub struct DependencyCache {
    path: PathBuf,
    document: Mutex<Map<String, Value>>,
    writes: AtomicU64,
}

impl DependencyCache {
    /// Open the cache of the registry rooted at `root`, creating the file
    /// if it does not exist.
    pub fn open(root: &Path) -> AppResult<Self> {
        if !root.is_dir() {
            return Err(AppError::system(format!(
                "Dependency cache root must be a directory: {}",
                root.display()
            )));
        }

        let path = root.join(CACHE_FILENAME);
        let cache = Self {
            path,
            document: Mutex::new(Map::new()),
            writes: AtomicU64::new(0),
        };

        if cache.path.exists() {
            let content = std::fs::read_to_string(&cache.path)?;
            match serde_json::from_str(&content)? {
                Value::Object(document) => *cache.document.lock() = document,
                _ => {
                    return Err(AppError::storage(format!(
                        "Dependency cache {} must contain an object",
                        cache.path.display()
                    )));
                }
            }
        } else {
            let mut document = cache.document.lock();
            document.insert("addons".to_string(), Value::Object(Map::new()));
            document.insert("first_init_time".to_string(), Value::from(now_seconds()));
            cache.write(&document)?;
        }
        Ok(cache)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of times the cache file has been written by this instance.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Seconds since the epoch when the cache file was first created.
    pub fn first_init_time(&self) -> Option<f64> {
        self.document
            .lock()
            .get("first_init_time")
            .and_then(Value::as_f64)
    }

    /// The stored record of `addon_id`. Records without a dependency check
    /// or without a hash count as absent.
    pub fn lookup(&self, addon_id: &str) -> Option<StoredAddon> {
        let document = self.document.lock();
        stored(&document, addon_id)
    }

    /// Upsert the record of `addon_id` under `hash`.
    ///
    /// `None` keeps the stored value. Without a stored record both flags
    /// default to `false`. A stored `satisfied` is only kept while its hash
    /// equals `hash`. Nothing is written when the record would not change.
    /// Returns whether the file was written.
    pub fn record(
        &self,
        addon_id: &str,
        hash: &str,
        enabled: Option<bool>,
        satisfied: Option<bool>,
    ) -> AppResult<bool> {
        let mut document = self.document.lock();
        if !document.get("addons").is_some_and(Value::is_object) {
            document.insert("addons".to_string(), Value::Object(Map::new()));
        }

        let current = stored(&document, addon_id);
        let enabled = enabled
            .or_else(|| current.as_ref().map(|record| record.enabled))
            .unwrap_or(false);
        let satisfied = satisfied
            .or_else(|| {
                current
                    .as_ref()
                    .filter(|record| record.last_dependency_check.is_valid(hash))
                    .map(|record| record.last_dependency_check.satisfied)
            })
            .unwrap_or(false);

        let record = StoredAddon {
            enabled,
            last_dependency_check: DependencyCheckResult {
                satisfied,
                hash: hash.to_string(),
            },
        };
        if current.as_ref() == Some(&record) {
            debug!(addon_id = %addon_id, "Dependency cache unchanged, write skipped");
            return Ok(false);
        }

        if let Some(Value::Object(addons)) = document.get_mut("addons") {
            addons.insert(addon_id.to_string(), serde_json::to_value(&record)?);
        }
        self.write(&document)?;
        debug!(
            addon_id = %addon_id,
            enabled = enabled,
            satisfied = satisfied,
            "Dependency cache written"
        );
        Ok(true)
    }

    fn write(&self, document: &Map<String, Value>) -> AppResult<()> {
        let content = serde_json::to_string_pretty(document)?;
        std::fs::write(&self.path, content)?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn stored(document: &Map<String, Value>, addon_id: &str) -> Option<StoredAddon> {
    let entry = document.get("addons")?.as_object()?.get(addon_id)?;
    let check = entry.get("last_dependency_check")?;
    check.get("hash")?.as_str()?;
    serde_json::from_value(entry.clone()).ok()
}

fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
