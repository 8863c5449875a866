//! Shared test helpers for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use serde_json::{Value, json};
use tempfile::TempDir;

use addonkit_core::{AppResult, DependencyChecker};
use addonkit_system::{AddonRuntime, AddonSystem, StaticSource};

/// Checker whose verdict the test flips, counting every call.
#[derive(Debug)]
pub struct SwitchChecker {
    satisfied: AtomicBool,
    checks: AtomicUsize,
    installs: AtomicUsize,
}

impl SwitchChecker {
    pub fn new(satisfied: bool) -> Arc<Self> {
        Arc::new(Self {
            satisfied: AtomicBool::new(satisfied),
            checks: AtomicUsize::new(0),
            installs: AtomicUsize::new(0),
        })
    }

    pub fn set_satisfied(&self, satisfied: bool) {
        self.satisfied.store(satisfied, Ordering::SeqCst);
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn installs(&self) -> usize {
        self.installs.load(Ordering::SeqCst)
    }
}

impl DependencyChecker for SwitchChecker {
    fn check(&self, _specifiers: &[String]) -> AppResult<bool> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.satisfied.load(Ordering::SeqCst))
    }

    fn install(&self, specifiers: &[String]) -> AppResult<Vec<String>> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        Ok(specifiers.to_vec())
    }

    fn list_installed(&self, _force_refresh: bool) -> AppResult<HashMap<String, String>> {
        Ok(HashMap::new())
    }
}

/// Metadata document for an addon with entry module `main`.
pub fn meta(id: &str, name: &str, depends: &[&str]) -> Value {
    json!({
        "id": id,
        "name": name,
        "module": "main",
        "authors": ["Ann"],
        "depends": depends,
    })
}

pub fn write_meta(addon_dir: &Path, meta: &Value) {
    std::fs::write(
        addon_dir.join("addon.json"),
        serde_json::to_string_pretty(meta).unwrap(),
    )
    .unwrap();
}

/// Push the modification time of `path` `secs` seconds into the future.
pub fn bump_mtime(path: &Path, secs: u64) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(secs))
        .unwrap();
}

/// An isolated addon root (`<tmp>/addons`) with its own runtime, unit
/// source and switchable checker.
pub struct Fixture {
    _dir: TempDir,
    pub root: PathBuf,
    pub source: Arc<StaticSource>,
    pub runtime: Arc<AddonRuntime>,
    pub checker: Arc<SwitchChecker>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("addons");
        std::fs::create_dir_all(&root).unwrap();
        let source = Arc::new(StaticSource::new());
        let runtime = AddonRuntime::with_source(source.clone());
        Self {
            _dir: dir,
            root,
            source,
            runtime,
            checker: SwitchChecker::new(true),
        }
    }

    /// Create `<root>/<dir>` holding `meta`.
    pub fn add_addon(&self, dir: &str, meta: &Value) -> PathBuf {
        let path = self.root.join(dir);
        std::fs::create_dir_all(&path).unwrap();
        write_meta(&path, meta);
        path
    }

    pub fn system(&self) -> Arc<AddonSystem> {
        self.runtime
            .system(&self.root, self.checker.clone())
            .unwrap()
    }

    /// Cache file contents as JSON.
    pub fn cache_document(&self) -> Value {
        let content = std::fs::read_to_string(self.root.join(".addons-cache.json")).unwrap();
        serde_json::from_str(&content).unwrap()
    }
}
