//! Application configuration schemas.
//!
//! All configuration structs are deserialized via the `config` crate from
//! an optional TOML file plus environment variables. Each sub-module
//! represents a logical configuration section.

pub mod addons;
pub mod dependencies;
pub mod logging;

use std::path::Path;

use serde::{Deserialize, Serialize};

use self::addons::AddonsConfig;
use self::dependencies::DependencyConfig;
use self::logging::LoggingConfig;

use crate::error::AppError;

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Addon root and loader settings.
    #[serde(default)]
    pub addons: AddonsConfig,
    /// Dependency manager settings.
    #[serde(default)]
    pub dependencies: DependencyConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from an optional TOML file.
    ///
    /// Environment variables prefixed with `ADDONKIT__` override file
    /// values, e.g. `ADDONKIT__ADDONS__ROOT=/srv/addons`.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        } else {
            builder = builder.add_source(config::File::with_name("addonkit").required(false));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("ADDONKIT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))
    }
}
