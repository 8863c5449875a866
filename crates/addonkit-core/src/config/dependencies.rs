//! Dependency manager configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Which library manager answers dependency checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerKind {
    /// A fixed installed set taken from [`DependencyConfig::installed`].
    #[default]
    Static,
    /// An external package manager invoked as a subprocess.
    Command,
}

/// Dependency manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyConfig {
    /// Manager implementation.
    #[serde(default)]
    pub manager: ManagerKind,
    /// Installed libraries (name → version) for the static manager.
    #[serde(default)]
    pub installed: HashMap<String, String>,
    /// Command that prints `name==version` lines.
    #[serde(default = "default_list_command")]
    pub list_command: Vec<String>,
    /// Command that installs the specifiers appended to it.
    #[serde(default = "default_install_command")]
    pub install_command: Vec<String>,
}

impl Default for DependencyConfig {
    fn default() -> Self {
        Self {
            manager: ManagerKind::default(),
            installed: HashMap::new(),
            list_command: default_list_command(),
            install_command: default_install_command(),
        }
    }
}

fn default_list_command() -> Vec<String> {
    vec!["pip".to_string(), "freeze".to_string()]
}

fn default_install_command() -> Vec<String> {
    vec!["pip".to_string(), "install".to_string()]
}
