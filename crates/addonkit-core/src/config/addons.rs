//! Addon root and loader configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where addons live and how their code is reloaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddonsConfig {
    /// Directory whose immediate subdirectories are addons.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Host unit locators that reload never re-executes.
    ///
    /// A locator is excluded when it equals an entry or lies below one.
    #[serde(default = "default_reload_exclude")]
    pub reload_exclude: Vec<String>,
}

impl Default for AddonsConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            reload_exclude: default_reload_exclude(),
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from("./addons")
}

/// Bootstrap and OS-facade units of the host.
pub fn default_reload_exclude() -> Vec<String> {
    ["host", "std", "core", "os"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
