//! Library manager over a fixed, in-memory installed set.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use addonkit_core::{AppError, AppResult, DependencyChecker};

use super::spec::DependencySpec;

/// Whether every specifier is satisfied by `installed` (name → version,
/// names lowercased).
pub(crate) fn satisfied_by(
    installed: &HashMap<String, String>,
    specifiers: &[String],
) -> AppResult<bool> {
    for specifier in specifiers {
        if !spec_satisfied(installed, &DependencySpec::parse(specifier)?)? {
            return Ok(false);
        }
    }
    Ok(true)
}

pub(crate) fn spec_satisfied(
    installed: &HashMap<String, String>,
    spec: &DependencySpec,
) -> AppResult<bool> {
    match installed.get(&spec.name) {
        Some(version) => spec.is_compatible(version),
        None => Ok(false),
    }
}

/// Checker answering from a name → version map.
///
/// `install` records the version the specifier asks for instead of
/// fetching anything.
#[derive(Debug, Default)]
pub struct InstalledLibManager {
    installed: RwLock<HashMap<String, String>>,
}

impl InstalledLibManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(installed: HashMap<String, String>) -> Self {
        let installed = installed
            .into_iter()
            .map(|(name, version)| (name.trim().to_lowercase(), version))
            .collect();
        Self {
            installed: RwLock::new(installed),
        }
    }

    pub fn with_installed(self, name: &str, version: &str) -> Self {
        self.installed
            .write()
            .insert(name.trim().to_lowercase(), version.to_string());
        self
    }

    /// Remove `name` from the installed set.
    pub fn uninstall(&self, name: &str) -> Option<String> {
        self.installed.write().remove(&name.trim().to_lowercase())
    }
}

impl DependencyChecker for InstalledLibManager {
    fn check(&self, specifiers: &[String]) -> AppResult<bool> {
        satisfied_by(&self.installed.read(), specifiers)
    }

    fn install(&self, specifiers: &[String]) -> AppResult<Vec<String>> {
        let specs = specifiers
            .iter()
            .map(|s| DependencySpec::parse(s).map(|spec| (s, spec)))
            .collect::<AppResult<Vec<_>>>()?;

        let mut installed = self.installed.write();
        let mut done = Vec::new();
        for (specifier, spec) in specs {
            if spec_satisfied(&installed, &spec)? {
                continue;
            }
            let version = spec.preferred_version().ok_or_else(|| {
                AppError::dependency(format!("Cannot pick a version to install for {specifier}"))
            })?;
            debug!(library = %spec.name, version = %version, "Library installed");
            installed.insert(spec.name.clone(), version.to_string());
            done.push(specifier.clone());
        }
        Ok(done)
    }

    fn list_installed(&self, _force_refresh: bool) -> AppResult<HashMap<String, String>> {
        Ok(self.installed.read().clone())
    }
}
