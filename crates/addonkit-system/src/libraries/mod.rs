//! Dependency checkers: specifier parsing plus the library managers the
//! CLI can be configured with.

pub mod command;
pub mod installed;
pub mod spec;

use std::sync::Arc;

use addonkit_core::config::dependencies::{DependencyConfig, ManagerKind};
use addonkit_core::{AppResult, DependencyChecker};

pub use command::{CommandLibManager, parse_freeze};
pub use installed::InstalledLibManager;
pub use spec::{Clause, DependencySpec, Operator, Version};

/// Build the checker selected by `config`.
pub fn checker_from_config(config: &DependencyConfig) -> AppResult<Arc<dyn DependencyChecker>> {
    Ok(match config.manager {
        ManagerKind::Static => Arc::new(InstalledLibManager::from_map(config.installed.clone())),
        ManagerKind::Command => Arc::new(CommandLibManager::from_config(config)?),
    })
}
