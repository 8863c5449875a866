//! Typed host-to-addon call boundary and the safe-unload protocol.
//!
//! A host defines its own interface type implementing [`ModuleInterface`]
//! and asks an addon for it with [`Addon::interface`]. The wrapped
//! [`InterfaceCore`] runs the addon's `on_load`/`on_unload` hooks and
//! tracks the shared units the addon reported as used.

pub mod usage;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use addonkit_core::{AppError, AppResult};

use crate::addon::Addon;
use crate::addon::meta::is_identifier;
use crate::loader::{Attr, CallContext, CodeHandle, Holder, Retention, STRUCTURAL_HOLDERS, UnitFn};

/// A host-defined wrapper around an addon's loaded code.
///
/// ```ignore
/// struct Greeter { core: InterfaceCore }
///
/// impl ModuleInterface for Greeter {
///     fn from_core(core: InterfaceCore) -> Self { Self { core } }
///     fn core(&self) -> &InterfaceCore { &self.core }
/// }
///
/// impl Greeter {
///     fn greet(&self, who: &str) -> AppResult<Attr> {
///         self.core.call("greet", &[Attr::from(who)])
///     }
/// }
/// ```
pub trait ModuleInterface: Send + Sync + 'static {
    fn from_core(core: InterfaceCore) -> Self
    where
        Self: Sized;

    fn core(&self) -> &InterfaceCore;
}

/// Interface with no methods of its own.
#[derive(Debug)]
pub struct PlainInterface {
    core: InterfaceCore,
}

impl ModuleInterface for PlainInterface {
    fn from_core(core: InterfaceCore) -> Self {
        Self { core }
    }

    fn core(&self) -> &InterfaceCore {
        &self.core
    }
}

impl std::ops::Deref for PlainInterface {
    type Target = InterfaceCore;

    fn deref(&self) -> &InterfaceCore {
        &self.core
    }
}

pub(crate) trait ErasedInterface: Send + Sync {
    fn interface_core(&self) -> &InterfaceCore;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: ModuleInterface> ErasedInterface for T {
    fn interface_core(&self) -> &InterfaceCore {
        self.core()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[derive(Default)]
struct CoreState {
    module: Option<CodeHandle>,
    used: Vec<CodeHandle>,
}

/// Loaded-code state shared by every interface type.
pub struct InterfaceCore {
    addon: Arc<Addon>,
    state: Mutex<CoreState>,
}

impl InterfaceCore {
    pub(crate) fn new(addon: Arc<Addon>) -> Self {
        Self {
            addon,
            state: Mutex::new(CoreState::default()),
        }
    }

    pub fn addon(&self) -> &Arc<Addon> {
        &self.addon
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().module.is_some()
    }

    /// The loaded entry unit.
    pub fn module(&self) -> AppResult<CodeHandle> {
        self.state.lock().module.clone().ok_or_else(|| {
            AppError::runtime(format!(
                "Module of addon {} has been unloaded, recreate the interface with addon.interface()",
                self.addon.path().display()
            ))
        })
    }

    /// Locators of the units reported as used by `on_load`.
    pub fn used_units(&self) -> Vec<String> {
        self.state
            .lock()
            .used
            .iter()
            .map(|unit| unit.locator().to_string())
            .collect()
    }

    /// Load the addon's code and run its `on_load` hook with `args`.
    ///
    /// Units in a list returned by `on_load` are recorded as used by this
    /// addon.
    pub fn load(&self, args: &[Attr]) -> AppResult<()> {
        if self.is_loaded() {
            return Err(AppError::already_loaded(format!(
                "Interface of addon {} is already loaded",
                self.addon.path().display()
            )));
        }

        let handle = self.addon.load(None, false)?;
        let ledger = self.addon.loader().ledger();
        let holder = Holder::Interface(self.addon.path().to_path_buf());
        ledger.register(handle.locator(), holder.clone());
        self.state.lock().module = Some(Arc::clone(&handle));

        let used = match self.get_function("on_load")? {
            Some(on_load) => match self.invoke(&on_load, args) {
                Ok(returned) => returned,
                Err(e) => {
                    ledger.deregister(handle.locator(), &holder);
                    self.state.lock().module = None;
                    return Err(e);
                }
            },
            None => Attr::none(),
        };

        if let Attr::List(items) = used {
            let addon_id = self.addon.id()?;
            let mut state = self.state.lock();
            for unit in items.iter().filter_map(Attr::as_unit) {
                self.addon
                    .usage()
                    .register(unit, &addon_id, self.addon.loader().as_ref());
                if !state.used.iter().any(|u| Arc::ptr_eq(u, unit)) {
                    state.used.push(Arc::clone(unit));
                }
            }
        }
        Ok(())
    }

    /// Unload the addon's code, running `on_unload` with `args` first.
    ///
    /// Refused with a `Runtime` error when the entry unit has more holders
    /// than a plain addon + interface load creates. Units used only by this
    /// addon are purged too.
    pub fn unload(&self, args: &[Attr]) -> AppResult<()> {
        let handle = self.module()?;
        let loader = self.addon.loader();
        let holders = loader.ledger().holder_count(handle.locator());
        if holders > STRUCTURAL_HOLDERS {
            return Err(AppError::runtime(format!(
                "Cannot unload: {holders} holders reference unit {}, at most {STRUCTURAL_HOLDERS} allowed",
                handle.locator()
            )));
        }

        if let Some(on_unload) = self.get_function("on_unload")? {
            self.invoke(&on_unload, args)?;
        }

        self.release();
        self.addon.detach_module(&handle);
        let cached = loader
            .lookup(handle.locator())
            .is_some_and(|unit| Arc::ptr_eq(&unit, &handle));
        if cached {
            loader.purge(&handle);
        }

        info!(
            path = %self.addon.path().display(),
            locator = %handle.locator(),
            "Interface unloaded"
        );
        Ok(())
    }

    /// Give up this interface's hold on its unit without running
    /// `on_unload` or purging the unit. Used units are still released.
    pub(crate) fn release(&self) {
        let (handle, used) = {
            let mut state = self.state.lock();
            let Some(handle) = state.module.take() else {
                return;
            };
            (handle, std::mem::take(&mut state.used))
        };

        let loader = self.addon.loader();
        loader.ledger().deregister(
            handle.locator(),
            &Holder::Interface(self.addon.path().to_path_buf()),
        );
        if used.is_empty() {
            return;
        }
        match self.addon.id() {
            Ok(addon_id) => {
                for unit in used {
                    self.addon
                        .usage()
                        .release(unit.locator(), &addon_id, loader.as_ref());
                }
            }
            Err(e) => warn!(
                path = %self.addon.path().display(),
                error = %e,
                "Used units kept, addon id unreadable"
            ),
        }
    }

    /// The function named `name`, or `None` when it is missing, not a
    /// function, or `name` is not an identifier.
    pub fn get_function(&self, name: &str) -> AppResult<Option<UnitFn>> {
        if !is_identifier(name) {
            return Ok(None);
        }
        Ok(self
            .module()?
            .get(name)
            .and_then(|attr| attr.as_function().cloned()))
    }

    /// The attribute named `name`; `Attribute` error when missing.
    pub fn get_attribute(&self, name: &str) -> AppResult<Attr> {
        let module = self.module()?;
        module.get(name).ok_or_else(|| {
            AppError::attribute(format!(
                "Unit {} has no attribute '{name}'",
                module.locator()
            ))
        })
    }

    /// The attribute named `name`, or `default` when missing.
    pub fn get_attribute_or(&self, name: &str, default: Attr) -> AppResult<Attr> {
        Ok(self.module()?.get(name).unwrap_or(default))
    }

    /// Bind each name onto the loaded entry unit.
    pub fn set_attributes<I, K, V>(&self, attrs: I) -> AppResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Attr>,
    {
        let module = self.module()?;
        for (name, value) in attrs {
            module.set(name, value);
        }
        Ok(())
    }

    /// Call the function `name` with `args`.
    pub fn call(&self, name: &str, args: &[Attr]) -> AppResult<Attr> {
        let function = self.get_function(name)?.ok_or_else(|| {
            AppError::attribute(format!(
                "Addon {} exposes no function '{name}'",
                self.addon.path().display()
            ))
        })?;
        self.invoke(&function, args)
    }

    /// Register an outside reference to the loaded unit. While the guard
    /// lives, [`InterfaceCore::unload`] is refused.
    pub fn retain(&self) -> AppResult<Retention> {
        let module = self.module()?;
        Ok(self.addon.loader().ledger().retain(&module))
    }

    fn invoke(&self, function: &UnitFn, args: &[Attr]) -> AppResult<Attr> {
        let context = self.addon.context()?;
        function(&CallContext::new(Some(&context), args))
    }
}

impl Drop for InterfaceCore {
    fn drop(&mut self) {
        if !self.is_loaded() {
            return;
        }
        if let Err(e) = self.unload(&[]) {
            warn!(
                path = %self.addon.path().display(),
                error = %e,
                "Interface dropped while its code could not be unloaded"
            );
        }
    }
}

impl fmt::Debug for InterfaceCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceCore")
            .field("addon", &self.addon.path())
            .field("loaded", &self.is_loaded())
            .field("used", &self.used_units())
            .finish()
    }
}
