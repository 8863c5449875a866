//! CLI command definitions and dispatch.

pub mod addon;
pub mod deps;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use addonkit_core::config::AppConfig;
use addonkit_core::AppResult;
use addonkit_system::libraries::checker_from_config;
use addonkit_system::{AddonRuntime, AddonSystem, ModuleCache, StaticSource};

use crate::output::OutputFormat;

/// Addonkit: manage a directory of addons
#[derive(Debug, Parser)]
#[command(name = "addonkit", version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Addon root directory, overrides the configured one
    #[arg(short, long)]
    pub root: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List every addon under the root
    List,
    /// Show one addon's metadata and status
    Info {
        /// Addon id
        id: String,
    },
    /// Search addons; any matching criterion selects an addon
    Query(addon::QueryArgs),
    /// Enable an addon
    Enable {
        /// Addon id
        id: String,
    },
    /// Disable an addon
    Disable {
        /// Addon id
        id: String,
    },
    /// Check whether an addon's dependencies are satisfied
    Check(deps::CheckArgs),
    /// Install an addon's dependencies
    Satisfy {
        /// Addon id
        id: String,
    },
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(&self, mut config: AppConfig) -> AppResult<()> {
        if let Some(root) = &self.root {
            config.addons.root = root.clone();
        }
        let system = open_system(&config)?;

        match &self.command {
            Commands::List => addon::list(&system, self.format),
            Commands::Info { id } => addon::info(&system, id, self.format),
            Commands::Query(args) => addon::query(&system, args, self.format),
            Commands::Enable { id } => addon::set_enabled(&system, id, true),
            Commands::Disable { id } => addon::set_enabled(&system, id, false),
            Commands::Check(args) => deps::check(&system, args, self.format),
            Commands::Satisfy { id } => deps::satisfy(&system, id, self.format),
        }
    }
}

/// Helper: open the registry of the configured root
pub fn open_system(config: &AppConfig) -> AppResult<Arc<AddonSystem>> {
    tracing::debug!(root = %config.addons.root.display(), "Opening addon root");
    let loader = Arc::new(ModuleCache::with_source(Arc::new(StaticSource::new())));
    let runtime = AddonRuntime::with_config(loader, &config.addons);
    let checker = checker_from_config(&config.dependencies)?;
    runtime.system(&config.addons.root, checker)
}
