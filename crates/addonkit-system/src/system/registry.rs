//! The addon registry of one root directory.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use tracing::{debug, info};

use addonkit_core::{AppError, AppResult, DependencyChecker, ErrorKind};

use super::query::AddonQuery;
use super::storage::{CACHE_FILENAME, DependencyCache};
use crate::addon::Addon;
use crate::runtime::AddonRuntime;

/// An addon given by id or by instance.
#[derive(Debug, Clone, Copy)]
pub enum AddonRef<'a> {
    Id(&'a str),
    Addon(&'a Arc<Addon>),
}

impl<'a> From<&'a str> for AddonRef<'a> {
    fn from(id: &'a str) -> Self {
        Self::Id(id)
    }
}

impl<'a> From<&'a String> for AddonRef<'a> {
    fn from(id: &'a String) -> Self {
        Self::Id(id)
    }
}

impl<'a> From<&'a Arc<Addon>> for AddonRef<'a> {
    fn from(addon: &'a Arc<Addon>) -> Self {
        Self::Addon(addon)
    }
}

/// Registry of the addons under one root directory.
///
/// Owns the root's [`DependencyCache`] and is the only component that
/// talks to it. One instance exists per root while it is alive; open it
/// through [`AddonRuntime::system`].
pub struct AddonSystem {
    me: Weak<AddonSystem>,
    root: PathBuf,
    checker: Arc<dyn DependencyChecker>,
    storage: DependencyCache,
    runtime: Arc<AddonRuntime>,
}

impl AddonSystem {
    pub(crate) fn open(
        runtime: Arc<AddonRuntime>,
        root: PathBuf,
        checker: Arc<dyn DependencyChecker>,
    ) -> AppResult<Arc<Self>> {
        if !root.is_dir() {
            return Err(AppError::system(format!(
                "Addon system root must be a directory: {}",
                root.display()
            )));
        }
        let storage = DependencyCache::open(&root)?;
        info!(root = %root.display(), "Addon system opened");

        Ok(Arc::new_cyclic(|me| Self {
            me: me.clone(),
            root,
            checker,
            storage,
            runtime,
        }))
    }

    fn arc(&self) -> AppResult<Arc<AddonSystem>> {
        self.me
            .upgrade()
            .ok_or_else(|| AppError::system("Addon system is no longer alive"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn storage(&self) -> &DependencyCache {
        &self.storage
    }

    pub fn checker(&self) -> &Arc<dyn DependencyChecker> {
        &self.checker
    }

    pub fn runtime(&self) -> &Arc<AddonRuntime> {
        &self.runtime
    }

    /// Scan the root for addons.
    ///
    /// Entries are visited in name order. Any invalid entry aborts the scan
    /// with a `Registry` error; two addons sharing an id abort it with
    /// `DuplicateAddon`. Every addon found is bound to this registry and
    /// given a dependency record.
    pub fn discover(&self) -> AppResult<Vec<Arc<Addon>>> {
        let me = self.arc()?;
        self.runtime.prune(&self.root);
        let mut entries = std::fs::read_dir(&self.root)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<Result<Vec<PathBuf>, _>>()?;
        entries.sort();

        let mut ids = HashSet::new();
        let mut addons = Vec::with_capacity(entries.len());
        for path in entries {
            if path.file_name().and_then(|n| n.to_str()) == Some(CACHE_FILENAME) {
                continue;
            }
            if !path.is_dir() {
                return Err(AppError::registry(
                    format!("Non-directory entry in addon root: {}", path.display()),
                    AppError::addon_invalid("Addons must be directories"),
                ));
            }

            let (addon, id) = self
                .open_addon(&path)
                .map_err(|e| match e.kind {
                    ErrorKind::MetaInvalid | ErrorKind::AddonInvalid => AppError::registry(
                        format!("Invalid addon in root: {}", path.display()),
                        e,
                    ),
                    _ => e,
                })?;
            if !ids.insert(id.clone()) {
                return Err(AppError::duplicate_addon(format!(
                    "Found multiple addons with id '{id}' in {}",
                    self.root.display()
                )));
            }

            addon.install_system(&me)?;
            self.ensure_record(&addon, &id)?;
            addons.push(addon);
        }

        debug!(root = %self.root.display(), count = addons.len(), "Addons discovered");
        Ok(addons)
    }

    fn open_addon(&self, path: &Path) -> AppResult<(Arc<Addon>, String)> {
        let addon = self.runtime.addon(path)?;
        let id = addon.id()?;
        Ok((addon, id))
    }

    /// Make sure `addon` has a dependency record valid for its current
    /// dependency list.
    fn ensure_record(&self, addon: &Addon, id: &str) -> AppResult<()> {
        let hash = addon.metadata().depends_hash()?;
        let valid = self
            .storage
            .lookup(id)
            .is_some_and(|record| record.last_dependency_check.is_valid(&hash));
        if valid {
            return Ok(());
        }
        let satisfied = self.checker.check(&addon.metadata().depends()?)?;
        self.storage.record(id, &hash, None, Some(satisfied))?;
        Ok(())
    }

    /// The addon with metadata id `id`.
    pub fn find(&self, id: &str) -> AppResult<Arc<Addon>> {
        for addon in self.discover()? {
            if addon.id()? == id {
                return Ok(addon);
            }
        }
        Err(AppError::not_found(format!(
            "Addon with id '{id}' not found in {}",
            self.root.display()
        )))
    }

    /// Turn an id or instance into an addon of this registry.
    pub fn resolve<'a>(&self, addon: impl Into<AddonRef<'a>>) -> AppResult<Arc<Addon>> {
        match addon.into() {
            AddonRef::Id(id) => self.find(id),
            AddonRef::Addon(addon) => {
                if !addon.is_in_root(self) {
                    return Err(AppError::addon_invalid(format!(
                        "Addon {} is not located under {}",
                        addon.path().display(),
                        self.root.display()
                    )));
                }
                Ok(Arc::clone(addon))
            }
        }
    }

    /// Addons matching any criterion of `query`.
    pub fn query(&self, query: AddonQuery) -> AppResult<impl Iterator<Item = Arc<Addon>> + '_> {
        let addons = self.discover()?;
        Ok(addons.into_iter().filter(move |addon| {
            let Ok(meta) = addon.metadata().snapshot() else {
                return false;
            };
            let enabled = self
                .storage
                .lookup(&meta.id)
                .is_some_and(|record| record.enabled);
            query.matches(&meta, enabled)
        }))
    }

    /// Persist the enabled flag of `addon`.
    pub fn set_enabled<'a>(&self, addon: impl Into<AddonRef<'a>>, enabled: bool) -> AppResult<()> {
        let addon = self.resolve(addon)?;
        let id = addon.id()?;
        let hash = addon.metadata().depends_hash()?;

        let has_valid_check = self
            .storage
            .lookup(&id)
            .is_some_and(|record| record.last_dependency_check.is_valid(&hash));
        let satisfied = if has_valid_check {
            None
        } else {
            Some(self.checker.check(&addon.metadata().depends()?)?)
        };

        if self.storage.record(&id, &hash, Some(enabled), satisfied)? {
            info!(addon_id = %id, enabled = enabled, "Addon status changed");
        }
        Ok(())
    }

    /// The cached enabled flag of `addon`; `false` when nothing is cached.
    pub fn get_enabled<'a>(&self, addon: impl Into<AddonRef<'a>>) -> AppResult<bool> {
        let addon = self.resolve(addon)?;
        let id = addon.id()?;
        Ok(self
            .storage
            .lookup(&id)
            .is_some_and(|record| record.enabled))
    }

    pub fn enable<'a>(&self, addon: impl Into<AddonRef<'a>>) -> AppResult<()> {
        self.set_enabled(addon, true)
    }

    pub fn disable<'a>(&self, addon: impl Into<AddonRef<'a>>) -> AppResult<()> {
        self.set_enabled(addon, false)
    }

    /// Whether the dependencies of `addon` are satisfied.
    ///
    /// With `use_cache` a verdict cached for the current dependency list is
    /// returned as is; otherwise, or with `force`, the checker runs and its
    /// verdict is cached. Without `use_cache` and `force` the checker runs
    /// and nothing is cached.
    pub fn check_dependencies<'a>(
        &self,
        addon: impl Into<AddonRef<'a>>,
        use_cache: bool,
        force: bool,
    ) -> AppResult<bool> {
        let addon = self.resolve(addon)?;
        let id = addon.id()?;
        let depends = addon.metadata().depends()?;

        if !(use_cache || force) {
            return self.checker.check(&depends);
        }

        let hash = addon.metadata().depends_hash()?;
        if !force {
            if let Some(record) = self
                .storage
                .lookup(&id)
                .filter(|record| record.last_dependency_check.is_valid(&hash))
            {
                debug!(addon_id = %id, "Dependency check served from cache");
                return Ok(record.last_dependency_check.satisfied);
            }
        }

        let satisfied = self.checker.check(&depends)?;
        self.storage.record(&id, &hash, None, Some(satisfied))?;
        info!(addon_id = %id, satisfied = satisfied, forced = force, "Dependencies checked");
        Ok(satisfied)
    }

    /// Install the dependencies of `addon` and mark them satisfied without
    /// re-checking. Returns the specifiers the checker installed.
    pub fn satisfy_dependencies<'a>(
        &self,
        addon: impl Into<AddonRef<'a>>,
    ) -> AppResult<Vec<String>> {
        let addon = self.resolve(addon)?;
        let id = addon.id()?;
        let installed = self.checker.install(&addon.metadata().depends()?)?;
        let hash = addon.metadata().depends_hash()?;
        self.storage.record(&id, &hash, None, Some(true))?;
        info!(addon_id = %id, installed = installed.len(), "Dependencies installed");
        Ok(installed)
    }
}

impl PartialEq for AddonSystem {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
    }
}

impl fmt::Debug for AddonSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddonSystem")
            .field("root", &self.root)
            .field("cache", &self.storage.path())
            .finish()
    }
}
