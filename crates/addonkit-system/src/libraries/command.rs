//! Library manager backed by an external package manager.

use std::collections::HashMap;
use std::process::{Command, Output};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use addonkit_core::config::dependencies::DependencyConfig;
use addonkit_core::{AppError, AppResult, DependencyChecker, ErrorKind};

use super::installed::{satisfied_by, spec_satisfied};
use super::spec::DependencySpec;

/// Parse `name==version` lines. Names are lowercased; other lines are
/// ignored.
pub fn parse_freeze(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim().to_lowercase();
            let mut parts = line.split("==");
            match (parts.next(), parts.next(), parts.next()) {
                (Some(name), Some(version), None) if !name.is_empty() => {
                    Some((name.trim().to_string(), version.trim().to_string()))
                }
                _ => None,
            }
        })
        .collect()
}

/// Checker that lists installed libraries with `list_command` and installs
/// with `install_command`, e.g. `pip freeze` and `pip install`.
///
/// The listing is cached until an install or a forced refresh.
#[derive(Debug)]
pub struct CommandLibManager {
    list_command: Vec<String>,
    install_command: Vec<String>,
    cache: Mutex<Option<HashMap<String, String>>>,
}

impl CommandLibManager {
    pub fn new(list_command: Vec<String>, install_command: Vec<String>) -> AppResult<Self> {
        if list_command.is_empty() || install_command.is_empty() {
            return Err(AppError::configuration(
                "Library manager commands must not be empty",
            ));
        }
        Ok(Self {
            list_command,
            install_command,
            cache: Mutex::new(None),
        })
    }

    pub fn from_config(config: &DependencyConfig) -> AppResult<Self> {
        Self::new(config.list_command.clone(), config.install_command.clone())
    }

    /// Drop the cached listing.
    pub fn invalidate(&self) {
        *self.cache.lock() = None;
    }

    fn run(command: &[String], extra: &[String]) -> AppResult<String> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| AppError::configuration("Empty library manager command"))?;
        let output: Output = Command::new(program)
            .args(args)
            .args(extra)
            .output()
            .map_err(|e| {
                AppError::with_source(
                    ErrorKind::Dependency,
                    format!("Failed to run '{program}'"),
                    e,
                )
            })?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        if !output.status.success() {
            return Err(AppError::dependency(format!(
                "'{}' exited with {}: {}",
                command.join(" "),
                output.status,
                text.trim()
            )));
        }
        Ok(text)
    }
}

impl DependencyChecker for CommandLibManager {
    fn check(&self, specifiers: &[String]) -> AppResult<bool> {
        if specifiers.is_empty() {
            return Ok(true);
        }
        let installed = self.list_installed(false)?;
        satisfied_by(&installed, specifiers)
    }

    fn install(&self, specifiers: &[String]) -> AppResult<Vec<String>> {
        let installed = self.list_installed(false)?;
        let mut pending = Vec::new();
        for specifier in specifiers {
            let spec = DependencySpec::parse(specifier)?;
            if !spec_satisfied(&installed, &spec)? {
                pending.push(specifier.clone());
            }
        }
        if pending.is_empty() {
            debug!("All libraries already installed");
            return Ok(pending);
        }

        let result = Self::run(&self.install_command, &pending);
        self.invalidate();
        let output = result?;
        if output.contains("ERROR") {
            warn!(libraries = ?pending, "Library installation reported errors");
            return Err(AppError::dependency(format!(
                "Error occurred while installing: {}",
                output.trim()
            )));
        }
        info!(libraries = ?pending, "Libraries installed");
        Ok(pending)
    }

    fn list_installed(&self, force_refresh: bool) -> AppResult<HashMap<String, String>> {
        let mut cache = self.cache.lock();
        if !force_refresh {
            if let Some(listing) = cache.as_ref() {
                return Ok(listing.clone());
            }
        }
        let listing = parse_freeze(&Self::run(&self.list_command, &[])?);
        debug!(count = listing.len(), "Installed libraries listed");
        *cache = Some(listing.clone());
        Ok(listing)
    }
}
