//! Dependency check and install commands.

use clap::Args;
use serde_json::json;

use addonkit_core::AppResult;
use addonkit_system::AddonSystem;

use crate::output::{self, OutputFormat};

/// Arguments for the check command
#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Addon id
    pub id: String,
    /// Ignore the cached verdict and do not cache the result
    #[arg(long)]
    pub no_cache: bool,
    /// Run the checker and cache its verdict
    #[arg(long)]
    pub force: bool,
}

pub fn check(system: &AddonSystem, args: &CheckArgs, format: OutputFormat) -> AppResult<()> {
    let satisfied = system.check_dependencies(args.id.as_str(), !args.no_cache, args.force)?;
    match format {
        OutputFormat::Json => {
            output::print_object(&json!({ "id": args.id, "satisfied": satisfied }), format)
        }
        OutputFormat::Table if satisfied => {
            output::print_success(&format!("Dependencies of '{}' are satisfied", args.id))
        }
        OutputFormat::Table => {
            output::print_warning(&format!("Dependencies of '{}' are not satisfied", args.id))
        }
    }
    Ok(())
}

pub fn satisfy(system: &AddonSystem, id: &str, format: OutputFormat) -> AppResult<()> {
    let installed = system.satisfy_dependencies(id)?;
    match format {
        OutputFormat::Json => output::print_object(&json!({ "id": id, "installed": installed }), format),
        OutputFormat::Table if installed.is_empty() => {
            output::print_success(&format!("Dependencies of '{id}' were already installed"))
        }
        OutputFormat::Table => {
            output::print_success(&format!("Installed for '{id}':"));
            for specifier in &installed {
                println!("  {specifier}");
            }
        }
    }
    Ok(())
}
