//! The API a unit factory sees while its unit executes.

use std::collections::HashMap;
use std::fmt;

use addonkit_core::AppResult;

use super::ModuleCache;
use super::ledger::Holder;
use super::unit::{Attr, CallContext, CodeHandle};
use crate::addon::AddonContext;

/// Bindings visible to a unit while it executes.
///
/// An injection is scoped to a single resolve or reload call and is
/// inherited by every unit imported during that call.
#[derive(Clone, Default)]
pub struct Injection {
    bindings: HashMap<String, Attr>,
    context: Option<AddonContext>,
    package: Option<String>,
}

impl Injection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Injection carrying an addon's namespace bindings and context.
    pub fn for_addon(context: AddonContext) -> Self {
        let bindings = context.namespace().snapshot();
        Self {
            bindings,
            context: Some(context),
            package: None,
        }
    }

    pub fn with_binding(mut self, name: impl Into<String>, value: impl Into<Attr>) -> Self {
        self.bindings.insert(name.into(), value.into());
        self
    }

    /// Package tree the entry unit reloads within.
    pub fn within_package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Attr> {
        self.bindings.get(name)
    }

    pub fn bindings(&self) -> &HashMap<String, Attr> {
        &self.bindings
    }

    pub fn context(&self) -> Option<&AddonContext> {
        self.context.as_ref()
    }

    pub fn package(&self) -> Option<&str> {
        self.package.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl fmt::Debug for Injection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.bindings.keys().collect();
        names.sort();
        f.debug_struct("Injection")
            .field("bindings", &names)
            .field("addon", &self.context.as_ref().map(AddonContext::id))
            .field("package", &self.package)
            .finish()
    }
}

/// Collects the attributes of a unit while its factory runs.
pub struct UnitBuilder<'a> {
    locator: &'a str,
    cache: &'a ModuleCache,
    injection: &'a Injection,
    attrs: HashMap<String, Attr>,
    children: Vec<String>,
    caused: Vec<String>,
}

impl<'a> UnitBuilder<'a> {
    pub(crate) fn new(locator: &'a str, cache: &'a ModuleCache, injection: &'a Injection) -> Self {
        Self {
            locator,
            cache,
            injection,
            attrs: HashMap::new(),
            children: Vec::new(),
            caused: Vec::new(),
        }
    }

    /// Locator of the unit being built.
    pub fn locator(&self) -> &str {
        self.locator
    }

    /// Locator of the package containing this unit.
    pub fn package(&self) -> &str {
        super::unit::parent_locator(self.locator).unwrap_or(self.locator)
    }

    /// Bind `name` to `value`.
    pub fn define(&mut self, name: impl Into<String>, value: impl Into<Attr>) -> &mut Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    /// Bind `name` to a function.
    pub fn function<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&CallContext<'_>) -> AppResult<Attr> + Send + Sync + 'static,
    {
        self.define(name, Attr::function(f))
    }

    /// An attribute defined earlier in this execution.
    pub fn defined(&self, name: &str) -> Option<&Attr> {
        self.attrs.get(name)
    }

    /// A binding injected by the caller of resolve or reload.
    pub fn injected(&self, name: &str) -> Option<&Attr> {
        self.injection.get(name)
    }

    /// Context of the addon whose load triggered this execution.
    pub fn addon(&self) -> Option<&AddonContext> {
        self.injection.context()
    }

    /// Resolve another unit and record it as a child of this one.
    ///
    /// This unit is recorded as a holder of the child until it is purged.
    pub fn import(&mut self, locator: &str) -> AppResult<CodeHandle> {
        let handle = self
            .cache
            .resolve_tracked(locator, self.injection, None, &mut self.caused)?;
        self.cache
            .ledger
            .register(locator, Holder::Importer(self.locator.to_string()));
        if !self.children.iter().any(|child| child == locator) {
            self.children.push(locator.to_string());
        }
        Ok(handle)
    }

    /// Import a unit of the same package by its last segment.
    pub fn import_sibling(&mut self, name: &str) -> AppResult<CodeHandle> {
        let locator = format!("{}.{name}", self.package());
        self.import(&locator)
    }

    pub(crate) fn finish(self) -> BuiltUnit {
        BuiltUnit {
            attrs: self.attrs,
            children: self.children,
            caused: self.caused,
        }
    }
}

pub(crate) struct BuiltUnit {
    pub attrs: HashMap<String, Attr>,
    pub children: Vec<String>,
    pub caused: Vec<String>,
}
