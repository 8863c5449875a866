//! The addon entity: one directory under a registry root holding an
//! `addon.json` and the addon's code.

pub mod context;
pub mod meta;
pub mod namespace;
pub mod storage;

use std::any::TypeId;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use parking_lot::Mutex;
use tracing::{debug, info};

use addonkit_core::{AppError, AppResult, DependencyChecker};

pub use context::AddonContext;
pub use meta::{AddonMeta, AnyExtra, ExtraSchema, ExtraView, MetaData, TypedExtra, ValidatedExtra};
pub use namespace::AddonNamespace;
pub use storage::AddonStorage;

use crate::interface::usage::UsageLedger;
use crate::interface::{ErasedInterface, InterfaceCore, ModuleInterface};
use crate::loader::{Attr, CodeHandle, CodeLoader, Holder, Injection};
use crate::system::AddonSystem;

/// Whether `name` is a valid addon directory name (ASCII letters only).
pub fn is_valid_dir_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphabetic())
}

fn locator_segment(name: &str) -> String {
    name.chars()
        .map(|c| if c == '.' { '_' } else { c })
        .collect()
}

struct AttachedInterface {
    type_id: TypeId,
    type_name: &'static str,
    instance: Weak<dyn ErasedInterface>,
}

#[derive(Default)]
struct AddonState {
    module: Option<CodeHandle>,
    interface: Option<AttachedInterface>,
    system: Option<Weak<AddonSystem>>,
    storage: Option<Arc<Mutex<AddonStorage>>>,
}

/// A discovered or standalone addon.
///
/// Instances are unique per path; obtain them through
/// [`AddonRuntime::addon`](crate::runtime::AddonRuntime::addon) or a
/// registry.
pub struct Addon {
    me: Weak<Addon>,
    path: PathBuf,
    meta: AddonMeta,
    loader: Arc<dyn CodeLoader>,
    usage: Arc<UsageLedger>,
    reload_exclude: Vec<String>,
    namespace: Arc<AddonNamespace>,
    state: Mutex<AddonState>,
}

impl Addon {
    pub(crate) fn open(
        path: &Path,
        loader: Arc<dyn CodeLoader>,
        usage: Arc<UsageLedger>,
        reload_exclude: Vec<String>,
    ) -> AppResult<Arc<Self>> {
        if !path.exists() {
            return Err(AppError::addon_invalid(format!(
                "Path doesn't exist: {}",
                path.display()
            )));
        }
        if !path.is_dir() {
            return Err(AppError::addon_invalid(format!(
                "Addons must be directories: {}",
                path.display()
            )));
        }
        let dir_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if !is_valid_dir_name(dir_name) {
            return Err(AppError::addon_invalid(format!(
                "Addon directory name '{dir_name}' must consist of ASCII letters only"
            )));
        }

        let meta = AddonMeta::open(&path.join(meta::META_FILENAME))?;
        debug!(path = %path.display(), "Addon opened");

        Ok(Arc::new_cyclic(|me| Self {
            me: me.clone(),
            path: path.to_path_buf(),
            meta,
            loader,
            usage,
            reload_exclude,
            namespace: Arc::new(AddonNamespace::new()),
            state: Mutex::new(AddonState::default()),
        }))
    }

    fn arc(&self) -> AppResult<Arc<Addon>> {
        self.me
            .upgrade()
            .ok_or_else(|| AppError::system("Addon instance is no longer alive"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &AddonMeta {
        &self.meta
    }

    pub fn id(&self) -> AppResult<String> {
        self.meta.id()
    }

    /// Bindings injected into the addon's code on every load.
    pub fn namespace(&self) -> &Arc<AddonNamespace> {
        &self.namespace
    }

    pub fn context(&self) -> AppResult<AddonContext> {
        Ok(AddonContext::new(
            self.meta.id()?,
            self.path.clone(),
            Arc::clone(&self.namespace),
        ))
    }

    pub(crate) fn loader(&self) -> &Arc<dyn CodeLoader> {
        &self.loader
    }

    pub(crate) fn usage(&self) -> &Arc<UsageLedger> {
        &self.usage
    }

    // -- system binding ---------------------------------------------------

    /// Bind the addon to the registry whose root contains it.
    pub fn install_system(&self, system: &Arc<AddonSystem>) -> AppResult<()> {
        if !self.is_in_root(system) {
            return Err(AppError::system(format!(
                "Addon {} is not located under the root of the system installed on it",
                self.path.display()
            )));
        }
        self.state.lock().system = Some(Arc::downgrade(system));
        Ok(())
    }

    pub fn is_in_root(&self, system: &AddonSystem) -> bool {
        self.path.starts_with(system.root())
    }

    pub fn system(&self) -> Option<Arc<AddonSystem>> {
        self.state.lock().system.as_ref().and_then(Weak::upgrade)
    }

    fn require_system(&self, action: &str) -> AppResult<Arc<AddonSystem>> {
        self.system().ok_or_else(|| {
            AppError::system(format!(
                "To {action} via the addon instance, a system must be installed on it"
            ))
        })
    }

    // -- enabled status and dependencies -----------------------------------

    pub fn enabled(&self) -> AppResult<bool> {
        self.require_system("read the enabled status")?
            .get_enabled(&self.arc()?)
    }

    pub fn set_enabled(&self, enabled: bool) -> AppResult<()> {
        self.require_system("change the enabled status")?
            .set_enabled(&self.arc()?, enabled)
    }

    pub fn enable(&self) -> AppResult<()> {
        self.set_enabled(true)
    }

    pub fn disable(&self) -> AppResult<()> {
        self.set_enabled(false)
    }

    /// Check the addon's dependencies through the installed system's cache,
    /// or with `checker` when no system is installed.
    pub fn check_dependencies(&self, checker: Option<&dyn DependencyChecker>) -> AppResult<bool> {
        if let Some(system) = self.system() {
            return system.check_dependencies(&self.arc()?, true, false);
        }
        match checker {
            Some(checker) => checker.check(&self.meta.depends()?),
            None => Err(AppError::system(
                "To check dependencies an addon requires a checker or an installed system",
            )),
        }
    }

    /// Install the addon's dependencies through the installed system, or
    /// with `checker` when no system is installed.
    pub fn satisfy_dependencies(
        &self,
        checker: Option<&dyn DependencyChecker>,
    ) -> AppResult<Vec<String>> {
        if let Some(system) = self.system() {
            return system.satisfy_dependencies(&self.arc()?);
        }
        match checker {
            Some(checker) => checker.install(&self.meta.depends()?),
            None => Err(AppError::system(
                "To install dependencies an addon requires a checker or an installed system",
            )),
        }
    }

    // -- code -------------------------------------------------------------

    /// Locator of the addon's package: `<root dir>.<addon dir>`.
    pub fn package_locator(&self) -> String {
        let dir = self
            .path
            .file_name()
            .map(|n| locator_segment(&n.to_string_lossy()))
            .unwrap_or_default();
        match self.path.parent().and_then(Path::file_name) {
            Some(root) => format!("{}.{dir}", locator_segment(&root.to_string_lossy())),
            None => dir,
        }
    }

    /// Locator of the entry unit named by the metadata `module` field.
    pub fn module_locator(&self) -> AppResult<String> {
        let package = self.package_locator();
        let module = self.meta.module()?;
        let module = module.strip_suffix(".rs").unwrap_or(&module);

        let mut segments: Vec<&str> = module
            .split(['/', '\\', '.'])
            .filter(|segment| !segment.is_empty())
            .collect();
        if matches!(segments.last(), Some(&"mod") | Some(&"lib")) {
            segments.pop();
        }

        if segments.is_empty() {
            Ok(package)
        } else {
            Ok(format!("{package}.{}", segments.join(".")))
        }
    }

    /// The loaded entry unit, if any.
    pub fn module(&self) -> Option<CodeHandle> {
        self.state.lock().module.clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().module.is_some()
    }

    /// Load the entry unit, or reload it when `reload` is set.
    ///
    /// Dependencies are re-verified first, through the installed system or
    /// with `checker`. The namespace is injected while the units execute
    /// and then bound onto the entry unit.
    pub fn load(
        &self,
        checker: Option<&dyn DependencyChecker>,
        reload: bool,
    ) -> AppResult<CodeHandle> {
        let current = self.module();
        if let Some(handle) = &current {
            if !reload {
                return Ok(Arc::clone(handle));
            }
        }

        let id = self.meta.id()?;
        if !self.check_dependencies(checker)? {
            return Err(AppError::import(format!(
                "Dependencies of addon '{id}' are not satisfied"
            )));
        }

        let injection = Injection::for_addon(self.context()?).within_package(self.package_locator());
        let handle = match current {
            Some(handle) => self
                .loader
                .reload(&handle, &injection, &self.reload_exclude)?,
            None => self.loader.resolve(&self.module_locator()?, &injection)?,
        };
        for (name, value) in injection.bindings() {
            handle.set(name.clone(), value.clone());
        }

        self.loader
            .ledger()
            .register(handle.locator(), Holder::Addon(self.path.clone()));
        self.state.lock().module = Some(Arc::clone(&handle));

        info!(
            addon_id = %id,
            locator = %handle.locator(),
            reload = reload,
            "Addon code loaded"
        );
        Ok(handle)
    }

    /// Reload the entry unit and its package sub-units, or load it fresh if
    /// it was never loaded.
    pub fn reload(&self, checker: Option<&dyn DependencyChecker>) -> AppResult<CodeHandle> {
        self.load(checker, true)
    }

    /// Purge the entry unit and everything its load resolved. Idempotent.
    ///
    /// An attached interface is detached first without running its
    /// `on_unload` hook.
    pub fn unload(&self) {
        let (module, interface) = {
            let mut state = self.state.lock();
            (
                state.module.take(),
                state.interface.take().map(|attached| attached.instance),
            )
        };
        if let Some(live) = interface.and_then(|weak| weak.upgrade()) {
            live.interface_core().release();
            debug!(path = %self.path.display(), "Interface detached by unload");
        }

        let Some(handle) = module else {
            return;
        };
        self.loader
            .ledger()
            .deregister(handle.locator(), &Holder::Addon(self.path.clone()));
        self.loader.purge(&handle);
        info!(path = %self.path.display(), locator = %handle.locator(), "Addon code unloaded");
    }

    /// Forget `handle` without purging it. A different current handle is
    /// left alone.
    pub(crate) fn detach_module(&self, handle: &CodeHandle) {
        let detached = {
            let mut state = self.state.lock();
            let current = state
                .module
                .as_ref()
                .is_some_and(|module| Arc::ptr_eq(module, handle));
            if current {
                state.module = None;
            }
            current
        };
        if detached {
            self.loader
                .ledger()
                .deregister(handle.locator(), &Holder::Addon(self.path.clone()));
        }
    }

    // -- interface --------------------------------------------------------

    /// Attach an interface of type `T`, loading the addon's code and running
    /// its `on_load` hook with `args`.
    ///
    /// A live interface of the same type is returned as is. A live interface
    /// of another type is a conflict.
    pub fn interface<T: ModuleInterface>(&self, args: &[Attr]) -> AppResult<Arc<T>> {
        let attached = self
            .state
            .lock()
            .interface
            .as_ref()
            .map(|a| (a.type_id, a.type_name, a.instance.clone()));

        if let Some((type_id, type_name, instance)) = attached {
            if let Some(live) = instance.upgrade() {
                if live.interface_core().is_loaded() {
                    if type_id != TypeId::of::<T>() {
                        return Err(AppError::conflict(format!(
                            "Addon {} already has a live {type_name} interface, cannot attach {}",
                            self.path.display(),
                            std::any::type_name::<T>()
                        )));
                    }
                    return live.into_any().downcast::<T>().map_err(|_| {
                        AppError::conflict(format!(
                            "Attached interface is not a {}",
                            std::any::type_name::<T>()
                        ))
                    });
                }
            }
        }

        let core = InterfaceCore::new(self.arc()?);
        core.load(args)?;
        let instance = Arc::new(T::from_core(core));
        let erased: Arc<dyn ErasedInterface> = instance.clone();

        self.state.lock().interface = Some(AttachedInterface {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            instance: Arc::downgrade(&erased),
        });
        info!(
            path = %self.path.display(),
            interface = std::any::type_name::<T>(),
            "Interface attached"
        );
        Ok(instance)
    }

    /// Unload the attached interface, passing `args` to `on_unload`, and
    /// detach it. Does nothing when no interface is attached.
    pub fn unload_interface(&self, args: &[Attr]) -> AppResult<()> {
        let instance = self
            .state
            .lock()
            .interface
            .as_ref()
            .map(|a| a.instance.clone());
        let Some(instance) = instance else {
            return Ok(());
        };

        if let Some(live) = instance.upgrade() {
            let core = live.interface_core();
            if core.is_loaded() {
                core.unload(args)?;
            }
        }
        self.state.lock().interface = None;
        info!(path = %self.path.display(), "Interface detached");
        Ok(())
    }

    pub fn has_interface(&self) -> bool {
        let instance = self
            .state
            .lock()
            .interface
            .as_ref()
            .map(|a| a.instance.clone());
        instance
            .and_then(|weak| weak.upgrade())
            .is_some_and(|live| live.interface_core().is_loaded())
    }

    // -- misc -------------------------------------------------------------

    /// The addon's local key-value storage, opened on first use.
    pub fn storage(&self) -> AppResult<Arc<Mutex<AddonStorage>>> {
        let mut state = self.state.lock();
        if let Some(storage) = &state.storage {
            return Ok(Arc::clone(storage));
        }
        let storage = Arc::new(Mutex::new(AddonStorage::open(&self.path)?));
        state.storage = Some(Arc::clone(&storage));
        Ok(storage)
    }

    /// Latest of the directory and metadata modification times.
    pub fn update_time(&self) -> AppResult<SystemTime> {
        let dir_time = std::fs::metadata(&self.path)?.modified()?;
        Ok(dir_time.max(self.meta.update_time()?))
    }
}

impl PartialEq for Addon {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
            || self.path == other.path
            || matches!((self.meta.id(), other.meta.id()), (Ok(a), Ok(b)) if a == b)
    }
}

impl PartialEq<str> for Addon {
    fn eq(&self, other: &str) -> bool {
        self.meta.id().is_ok_and(|id| id == other)
    }
}

impl fmt::Display for Addon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.meta.id().unwrap_or_else(|_| "?".to_string());
        let name = self.meta.name().unwrap_or_else(|_| "?".to_string());
        write!(f, "Addon<{id}>(name='{name}', path='{}')", self.path.display())
    }
}

impl fmt::Debug for Addon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Addon")
            .field("path", &self.path)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
