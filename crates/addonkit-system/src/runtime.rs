//! Process-wide services shared by every addon and registry.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use tracing::debug;

use addonkit_core::config::addons::AddonsConfig;
use addonkit_core::{AppError, AppResult, DependencyChecker, ErrorKind};

use crate::addon::Addon;
use crate::interface::usage::UsageLedger;
use crate::loader::{CodeLoader, ModuleCache, UnitSource};
use crate::system::AddonSystem;

static GLOBAL: OnceLock<Arc<AddonRuntime>> = OnceLock::new();

/// Owns the code loader, the usage ledger and the identity caches that keep
/// at most one [`Addon`] per path and one [`AddonSystem`] per root.
///
/// Addon instances stay cached until [`AddonRuntime::forget`] is called or a
/// registry discovery prunes the ones whose directory was removed.
pub struct AddonRuntime {
    loader: Arc<dyn CodeLoader>,
    usage: Arc<UsageLedger>,
    reload_exclude: Vec<String>,
    addons: DashMap<PathBuf, Arc<Addon>>,
    systems: DashMap<PathBuf, Weak<AddonSystem>>,
}

impl AddonRuntime {
    pub fn new(loader: Arc<dyn CodeLoader>) -> Arc<Self> {
        Self::with_config(loader, &AddonsConfig::default())
    }

    pub fn with_config(loader: Arc<dyn CodeLoader>, config: &AddonsConfig) -> Arc<Self> {
        Arc::new(Self {
            loader,
            usage: Arc::new(UsageLedger::new()),
            reload_exclude: config.reload_exclude.clone(),
            addons: DashMap::new(),
            systems: DashMap::new(),
        })
    }

    /// Runtime over a [`ModuleCache`] reading from `source`.
    pub fn with_source(source: Arc<dyn UnitSource>) -> Arc<Self> {
        Self::new(Arc::new(ModuleCache::with_source(source)))
    }

    /// Install the process-wide runtime. Fails if one is installed already.
    pub fn install_global(runtime: Arc<Self>) -> AppResult<()> {
        GLOBAL
            .set(runtime)
            .map_err(|_| AppError::system("A global addon runtime is already installed"))
    }

    /// The process-wide runtime.
    pub fn global() -> AppResult<Arc<Self>> {
        GLOBAL
            .get()
            .cloned()
            .ok_or_else(|| AppError::system("No global addon runtime has been installed"))
    }

    pub fn loader(&self) -> &Arc<dyn CodeLoader> {
        &self.loader
    }

    pub fn usage(&self) -> &Arc<UsageLedger> {
        &self.usage
    }

    pub fn reload_exclude(&self) -> &[String] {
        &self.reload_exclude
    }

    /// The addon at `path`, created on first request.
    pub fn addon(&self, path: &Path) -> AppResult<Arc<Addon>> {
        let path = std::fs::canonicalize(path).map_err(|e| {
            AppError::with_source(
                ErrorKind::AddonInvalid,
                format!("Path doesn't exist: {}", path.display()),
                e,
            )
        })?;
        if let Some(existing) = self.addons.get(&path) {
            return Ok(Arc::clone(existing.value()));
        }

        let addon = Addon::open(
            &path,
            Arc::clone(&self.loader),
            Arc::clone(&self.usage),
            self.reload_exclude.clone(),
        )?;
        let addon = Arc::clone(self.addons.entry(path).or_insert(addon).value());
        debug!(path = %addon.path().display(), "Addon registered in identity cache");
        Ok(addon)
    }

    /// Drop the cached instance for `path`, e.g. after its directory was
    /// removed.
    pub fn forget(&self, path: &Path) -> Option<Arc<Addon>> {
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.addons.remove(&path).map(|(_, addon)| addon)
    }

    /// Drop cached instances under `root` whose directory no longer exists.
    /// Returns how many were dropped.
    pub fn prune(&self, root: &Path) -> usize {
        let before = self.addons.len();
        self.addons
            .retain(|path, _| !path.starts_with(root) || path.is_dir());
        let pruned = before.saturating_sub(self.addons.len());
        if pruned > 0 {
            debug!(root = %root.display(), pruned, "Removed addons dropped from identity cache");
        }
        pruned
    }

    /// The registry of `root`, opened on first request.
    ///
    /// While a registry for the root is alive it is returned as is and
    /// `checker` is ignored.
    pub fn system(
        self: &Arc<Self>,
        root: &Path,
        checker: Arc<dyn DependencyChecker>,
    ) -> AppResult<Arc<AddonSystem>> {
        let root = std::fs::canonicalize(root).map_err(|e| {
            AppError::with_source(
                ErrorKind::System,
                format!("Addon system root must be a directory: {}", root.display()),
                e,
            )
        })?;
        if let Some(existing) = self.systems.get(&root).and_then(|weak| weak.upgrade()) {
            return Ok(existing);
        }

        let system = AddonSystem::open(Arc::clone(self), root.clone(), checker)?;
        self.systems.insert(root, Arc::downgrade(&system));
        Ok(system)
    }
}

impl std::fmt::Debug for AddonRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddonRuntime")
            .field("addons", &self.addons.len())
            .field("systems", &self.systems.len())
            .field("reload_exclude", &self.reload_exclude)
            .finish()
    }
}
