//! Addon listing, inspection and status commands.

use std::sync::Arc;

use clap::Args;
use serde::Serialize;
use tabled::Tabled;

use addonkit_core::AppResult;
use addonkit_system::{Addon, AddonQuery, AddonSystem};

use crate::output::{self, OutputFormat};

/// Arguments for the query command
#[derive(Debug, Args)]
pub struct QueryArgs {
    /// Exact author name
    #[arg(long)]
    pub author: Option<String>,
    /// Substring of the addon name
    #[arg(long)]
    pub name: Option<String>,
    /// Substring of the description
    #[arg(long)]
    pub description: Option<String>,
    /// Enabled status
    #[arg(long)]
    pub enabled: Option<bool>,
    /// Compare case-insensitively
    #[arg(short = 'i', long)]
    pub ignore_case: bool,
}

impl QueryArgs {
    fn to_query(&self) -> AddonQuery {
        AddonQuery {
            author: self.author.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            enabled: self.enabled,
            case_insensitive: self.ignore_case,
        }
    }
}

/// One table row per addon
#[derive(Debug, Serialize, Tabled)]
pub struct AddonRow {
    #[tabled(rename = "ID")]
    pub id: String,
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "Version")]
    pub version: String,
    #[tabled(rename = "Enabled")]
    pub enabled: bool,
    #[tabled(rename = "Satisfied")]
    pub satisfied: bool,
    #[tabled(rename = "Authors")]
    pub authors: String,
    #[tabled(rename = "Path")]
    pub path: String,
}

impl AddonRow {
    fn new(system: &AddonSystem, addon: &Arc<Addon>) -> AppResult<Self> {
        let meta = addon.metadata().snapshot()?;
        let record = system.storage().lookup(&meta.id);
        Ok(Self {
            enabled: record.as_ref().is_some_and(|r| r.enabled),
            satisfied: record.is_some_and(|r| r.last_dependency_check.satisfied),
            id: meta.id,
            name: meta.name,
            version: meta.version,
            authors: meta.authors.join(", "),
            path: addon.path().display().to_string(),
        })
    }
}

fn rows(
    system: &AddonSystem,
    addons: impl IntoIterator<Item = Arc<Addon>>,
) -> AppResult<Vec<AddonRow>> {
    addons
        .into_iter()
        .map(|addon| AddonRow::new(system, &addon))
        .collect()
}

pub fn list(system: &AddonSystem, format: OutputFormat) -> AppResult<()> {
    let addons = system.discover()?;
    output::print_list(&rows(system, addons)?, format);
    Ok(())
}

pub fn info(system: &AddonSystem, id: &str, format: OutputFormat) -> AppResult<()> {
    let addon = system.find(id)?;
    let meta = addon.metadata().snapshot()?;
    let record = system.storage().lookup(&meta.id);

    let mut value = serde_json::to_value(&meta)?;
    if let serde_json::Value::Object(fields) = &mut value {
        fields.insert("path".into(), addon.path().display().to_string().into());
        fields.insert(
            "enabled".into(),
            record.as_ref().is_some_and(|r| r.enabled).into(),
        );
        fields.insert(
            "dependencies_satisfied".into(),
            record
                .as_ref()
                .map(|r| r.last_dependency_check.satisfied)
                .into(),
        );
    }
    output::print_object(&value, format);
    Ok(())
}

pub fn query(system: &AddonSystem, args: &QueryArgs, format: OutputFormat) -> AppResult<()> {
    let query = args.to_query();
    if query.is_empty() {
        output::print_warning("No criteria given; an empty query matches nothing");
    }
    let found: Vec<Arc<Addon>> = system.query(query)?.collect();
    output::print_list(&rows(system, found)?, format);
    Ok(())
}

pub fn set_enabled(system: &AddonSystem, id: &str, enabled: bool) -> AppResult<()> {
    system.set_enabled(id, enabled)?;
    let state = if enabled { "enabled" } else { "disabled" };
    output::print_success(&format!("Addon '{id}' {state}"));
    Ok(())
}
