//! Code loading: resolve, reload and purge of addon code units.
//!
//! [`CodeLoader`] is the seam the addon lifecycle talks to. [`ModuleCache`]
//! is the in-process implementation: it executes unit factories supplied by
//! one or more [`UnitSource`]s and caches the resulting units by locator.

pub mod builder;
#[cfg(feature = "dynamic")]
pub mod dynamic;
pub mod ledger;
pub mod source;
pub mod unit;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use addonkit_core::{AppError, AppResult};

pub use builder::{Injection, UnitBuilder};
#[cfg(feature = "dynamic")]
pub use dynamic::DylibSource;
pub use ledger::{Holder, OwnershipLedger, Retention, STRUCTURAL_HOLDERS};
pub use source::{StaticSource, UnitFactory, UnitSource};
pub use unit::{Attr, CallContext, CodeHandle, CodeUnit, UnitFn};

/// Resolves, reloads and purges code units.
pub trait CodeLoader: Send + Sync {
    /// Return the cached unit for `locator`, executing it first if needed.
    fn resolve(&self, locator: &str, injection: &Injection) -> AppResult<CodeHandle>;

    /// Re-execute `handle` and every cached unit it imported within its
    /// package tree, children before parents. Units under any `exclude`
    /// prefix are left untouched. Stops at the first failing unit and purges
    /// whatever that failed execution newly resolved.
    fn reload(
        &self,
        handle: &CodeHandle,
        injection: &Injection,
        exclude: &[String],
    ) -> AppResult<CodeHandle>;

    /// Drop `handle` and every unit its resolution caused from the cache.
    fn purge(&self, handle: &CodeHandle);

    /// The cached unit for `locator`, without executing anything.
    fn lookup(&self, locator: &str) -> Option<CodeHandle>;

    /// Ledger of holders for the units this loader hands out.
    fn ledger(&self) -> &Arc<OwnershipLedger>;
}

struct CacheEntry {
    unit: CodeHandle,
    factory: UnitFactory,
    caused: Vec<String>,
}

/// In-process [`CodeLoader`] backed by unit sources.
pub struct ModuleCache {
    sources: Vec<Arc<dyn UnitSource>>,
    units: DashMap<String, CacheEntry>,
    resolving: Mutex<HashSet<String>>,
    ledger: Arc<OwnershipLedger>,
}

impl ModuleCache {
    pub fn new(sources: Vec<Arc<dyn UnitSource>>) -> Self {
        Self {
            sources,
            units: DashMap::new(),
            resolving: Mutex::new(HashSet::new()),
            ledger: Arc::new(OwnershipLedger::new()),
        }
    }

    /// Cache with a single source.
    pub fn with_source(source: Arc<dyn UnitSource>) -> Self {
        Self::new(vec![source])
    }

    /// Locators currently cached, sorted.
    pub fn cached(&self) -> Vec<String> {
        let mut locators: Vec<String> = self.units.iter().map(|e| e.key().clone()).collect();
        locators.sort();
        locators
    }

    pub fn is_cached(&self, locator: &str) -> bool {
        self.units.contains_key(locator)
    }

    fn locate(&self, locator: &str) -> AppResult<UnitFactory> {
        for source in &self.sources {
            if let Some(factory) = source.locate(locator)? {
                return Ok(factory);
            }
        }
        Err(AppError::import(format!("No code unit found for '{locator}'")))
    }

    /// Resolve `locator`, appending every unit newly executed by this call
    /// to `caused`.
    pub(crate) fn resolve_tracked(
        &self,
        locator: &str,
        injection: &Injection,
        package: Option<&str>,
        caused: &mut Vec<String>,
    ) -> AppResult<CodeHandle> {
        if let Some(unit) = self.lookup(locator) {
            return Ok(unit);
        }
        if !self.resolving.lock().insert(locator.to_string()) {
            return Err(AppError::import(format!(
                "Circular import while executing '{locator}'"
            )));
        }
        let result = self.execute(locator, injection, package);
        self.resolving.lock().remove(locator);

        let (unit, sub_caused) = result?;
        caused.push(locator.to_string());
        caused.extend(sub_caused);
        Ok(unit)
    }

    fn execute(
        &self,
        locator: &str,
        injection: &Injection,
        package: Option<&str>,
    ) -> AppResult<(CodeHandle, Vec<String>)> {
        let factory = self.locate(locator)?;
        let mut builder = UnitBuilder::new(locator, self, injection);
        let outcome = factory(&mut builder);
        let built = builder.finish();
        if let Err(e) = outcome {
            self.discard_failed(locator, &built.caused);
            return Err(e);
        }

        let package = package
            .map(str::to_string)
            .or_else(|| unit::parent_locator(locator).map(str::to_string))
            .unwrap_or_else(|| locator.to_string());
        let unit = Arc::new(CodeUnit::new(
            locator,
            package,
            built.attrs,
            built.children,
        ));

        self.ledger.register(locator, Holder::Loader);
        if let Some(parent) = unit::parent_locator(locator) {
            self.ledger
                .register(locator, Holder::ParentNamespace(parent.to_string()));
        }
        self.units.insert(
            locator.to_string(),
            CacheEntry {
                unit: Arc::clone(&unit),
                factory,
                caused: built.caused.clone(),
            },
        );

        debug!(locator = %locator, caused = built.caused.len(), "Unit executed");
        Ok((unit, built.caused))
    }

    fn reexecute(&self, locator: &str, injection: &Injection) -> AppResult<()> {
        let Some((unit, factory)) = self
            .units
            .get(locator)
            .map(|entry| (Arc::clone(&entry.unit), Arc::clone(&entry.factory)))
        else {
            return Ok(());
        };

        let mut builder = UnitBuilder::new(locator, self, injection);
        let outcome = factory(&mut builder);
        let built = builder.finish();
        if let Err(e) = outcome {
            let importer = Holder::Importer(locator.to_string());
            for child in &built.caused {
                self.ledger.deregister(child, &importer);
                self.purge_dependent(child);
            }
            warn!(locator = %locator, error = %e, "Unit re-execution failed");
            return Err(e);
        }
        unit.install(built.attrs, built.children);

        if !built.caused.is_empty() {
            if let Some(mut entry) = self.units.get_mut(locator) {
                entry.caused.extend(built.caused);
            }
        }
        debug!(locator = %locator, executions = unit.executions(), "Unit re-executed");
        Ok(())
    }

    /// Post-order walk over cached children inside `package`.
    fn reload_order(&self, root: &str, package: &str, exclude: &[String]) -> Vec<String> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut stack: Vec<(String, bool)> = vec![(root.to_string(), false)];

        while let Some((locator, expanded)) = stack.pop() {
            if expanded {
                order.push(locator);
                continue;
            }
            if !visited.insert(locator.clone()) {
                continue;
            }
            let Some(unit) = self.lookup(&locator) else {
                continue;
            };
            stack.push((locator, true));
            for child in unit.children().into_iter().rev() {
                let in_tree = unit::is_within(&child, package);
                let excluded = exclude.iter().any(|prefix| unit::is_within(&child, prefix));
                if in_tree && !excluded && !visited.contains(&child) {
                    stack.push((child, false));
                }
            }
        }
        order
    }

    fn purge_locator(&self, locator: &str) {
        let Some((_, entry)) = self.units.remove(locator) else {
            return;
        };
        self.ledger.deregister(locator, &Holder::Loader);
        if let Some(parent) = unit::parent_locator(locator) {
            self.ledger
                .deregister(locator, &Holder::ParentNamespace(parent.to_string()));
        }
        self.ledger
            .deregister_everywhere(&Holder::Importer(locator.to_string()));
        for child in &entry.caused {
            self.purge_dependent(child);
        }

        let nested: Vec<String> = self
            .units
            .iter()
            .map(|e| e.key().clone())
            .filter(|key| key != locator && unit::is_within(key, locator))
            .collect();
        for key in nested {
            self.purge_dependent(&key);
        }
    }

    /// Undo the side effects of an execution that never produced a unit.
    fn discard_failed(&self, locator: &str, caused: &[String]) {
        self.ledger
            .deregister_everywhere(&Holder::Importer(locator.to_string()));
        for child in caused {
            self.purge_dependent(child);
        }
    }

    /// Purge a unit reached through another one, unless an addon still
    /// reports it as used.
    fn purge_dependent(&self, locator: &str) {
        let in_use = self
            .ledger
            .holders(locator)
            .iter()
            .any(|holder| matches!(holder, Holder::Usage(_)));
        if in_use {
            debug!(locator = %locator, "Unit kept, still in use");
            return;
        }
        self.purge_locator(locator);
    }
}

impl CodeLoader for ModuleCache {
    fn resolve(&self, locator: &str, injection: &Injection) -> AppResult<CodeHandle> {
        let mut caused = Vec::new();
        self.resolve_tracked(locator, injection, injection.package(), &mut caused)
    }

    fn reload(
        &self,
        handle: &CodeHandle,
        injection: &Injection,
        exclude: &[String],
    ) -> AppResult<CodeHandle> {
        let locator = handle.locator();
        if !self.is_cached(locator) {
            return self.resolve(locator, injection);
        }

        let order = self.reload_order(locator, handle.package(), exclude);
        for unit in &order {
            self.reexecute(unit, injection)?;
        }
        info!(locator = %locator, units = order.len(), "Unit tree reloaded");
        Ok(Arc::clone(handle))
    }

    fn purge(&self, handle: &CodeHandle) {
        self.purge_locator(handle.locator());
        debug!(locator = %handle.locator(), "Unit purged");
    }

    fn lookup(&self, locator: &str) -> Option<CodeHandle> {
        self.units.get(locator).map(|entry| Arc::clone(&entry.unit))
    }

    fn ledger(&self) -> &Arc<OwnershipLedger> {
        &self.ledger
    }
}

impl fmt::Debug for ModuleCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleCache")
            .field("sources", &self.sources.len())
            .field("cached", &self.cached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn cache_with(source: StaticSource) -> ModuleCache {
        ModuleCache::with_source(Arc::new(source))
    }

    #[test]
    fn test_resolve_caches_units() {
        let runs = Arc::new(AtomicUsize::new(0));
        let source = StaticSource::new();
        let counter = Arc::clone(&runs);
        source.register("addons.Foo.main", move |unit| {
            counter.fetch_add(1, Ordering::SeqCst);
            unit.define("VALUE", 1);
            Ok(())
        });
        let cache = cache_with(source);

        let first = cache.resolve("addons.Foo.main", &Injection::new()).unwrap();
        let second = cache.resolve("addons.Foo.main", &Injection::new()).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(cache.ledger().holder_count("addons.Foo.main"), 2);
    }

    #[test]
    fn test_resolve_unknown_locator_fails() {
        let cache = cache_with(StaticSource::new());
        let err = cache.resolve("addons.Nope.main", &Injection::new()).unwrap_err();
        assert_eq!(err.kind, addonkit_core::ErrorKind::Import);
    }

    #[test]
    fn test_injected_bindings_are_visible() {
        let source = StaticSource::new();
        source.register("addons.Foo.main", |unit| {
            let greeting = unit.injected("greeting").cloned().unwrap_or_else(Attr::none);
            unit.define("GREETING", greeting);
            Ok(())
        });
        let cache = cache_with(source);
        let injection = Injection::new().with_binding("greeting", "hi");

        let unit = cache.resolve("addons.Foo.main", &injection).unwrap();
        assert_eq!(
            unit.get("GREETING").and_then(|a| a.as_value().cloned()),
            Some(serde_json::json!("hi"))
        );
    }

    #[test]
    fn test_purge_removes_caused_units() {
        let source = StaticSource::new();
        source.register("addons.Foo.main", |unit| {
            unit.import("addons.Foo.util")?;
            Ok(())
        });
        source.register("addons.Foo.util", |unit| {
            unit.define("HELPER", true);
            Ok(())
        });
        let cache = cache_with(source);

        let main = cache.resolve("addons.Foo.main", &Injection::new()).unwrap();
        assert_eq!(cache.cached(), vec!["addons.Foo.main", "addons.Foo.util"]);

        cache.purge(&main);
        assert!(cache.cached().is_empty());
        assert_eq!(cache.ledger().holder_count("addons.Foo.util"), 0);
    }

    #[test]
    fn test_purge_keeps_units_resolved_earlier() {
        let source = StaticSource::new();
        source.register("addons.Foo.main", |unit| {
            unit.import("shared.util")?;
            Ok(())
        });
        source.register("shared.util", |_unit| Ok(()));
        let cache = cache_with(source);

        cache.resolve("shared.util", &Injection::new()).unwrap();
        let main = cache.resolve("addons.Foo.main", &Injection::new()).unwrap();
        cache.purge(&main);

        assert_eq!(cache.cached(), vec!["shared.util"]);
    }

    #[test]
    fn test_purge_keeps_caused_units_in_use() {
        let source = StaticSource::new();
        source.register("addons.Foo.main", |unit| {
            unit.import("shared.db")?;
            Ok(())
        });
        source.register("shared.db", |_unit| Ok(()));
        let cache = cache_with(source);

        let main = cache.resolve("addons.Foo.main", &Injection::new()).unwrap();
        cache
            .ledger()
            .register("shared.db", Holder::Usage("bar".to_string()));
        cache.purge(&main);
        assert_eq!(cache.cached(), vec!["shared.db"]);

        let db = cache.lookup("shared.db").unwrap();
        cache.purge(&db);
        assert!(cache.cached().is_empty());
    }

    #[test]
    fn test_failed_execution_leaves_nothing_cached() {
        let source = StaticSource::new();
        source.register("addons.Foo.main", |unit| {
            unit.import("addons.Foo.util")?;
            Err(AppError::runtime("boom"))
        });
        source.register("addons.Foo.util", |_unit| Ok(()));
        let cache = cache_with(source);

        assert!(cache.resolve("addons.Foo.main", &Injection::new()).is_err());
        assert!(cache.cached().is_empty());
    }

    #[test]
    fn test_import_records_the_importer_as_holder() {
        let source = StaticSource::new();
        source.register("other.user", |unit| {
            let foo = unit.import("addons.Foo.main")?;
            unit.define("foo", foo);
            Ok(())
        });
        source.register("addons.Foo.main", |_unit| Ok(()));
        let cache = cache_with(source);

        cache.resolve("addons.Foo.main", &Injection::new()).unwrap();
        let user = cache.resolve("other.user", &Injection::new()).unwrap();
        assert!(
            cache
                .ledger()
                .holders("addons.Foo.main")
                .contains(&Holder::Importer("other.user".to_string()))
        );
        assert_eq!(cache.ledger().holder_count("addons.Foo.main"), 3);

        cache.purge(&user);
        assert_eq!(cache.ledger().holder_count("addons.Foo.main"), 2);
        assert!(cache.is_cached("addons.Foo.main"));
    }

    #[test]
    fn test_failed_reload_purges_units_it_resolved() {
        let fail = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let source = StaticSource::new();
        let switch = Arc::clone(&fail);
        source.register("addons.Foo.main", move |unit| {
            if switch.load(Ordering::SeqCst) {
                unit.import("addons.Foo.extra")?;
                return Err(AppError::runtime("broken edit"));
            }
            Ok(())
        });
        source.register("addons.Foo.extra", |_unit| Ok(()));
        let cache = cache_with(source);
        let injection = Injection::new().within_package("addons.Foo");

        let main = cache.resolve("addons.Foo.main", &injection).unwrap();
        fail.store(true, Ordering::SeqCst);

        let err = cache.reload(&main, &injection, &[]).unwrap_err();
        assert_eq!(err.message, "broken edit");
        assert_eq!(cache.cached(), vec!["addons.Foo.main"]);
        assert_eq!(cache.ledger().holder_count("addons.Foo.extra"), 0);
        assert_eq!(main.executions(), 1);
    }

    #[test]
    fn test_circular_import_is_reported() {
        let source = StaticSource::new();
        source.register("addons.Foo.a", |unit| {
            unit.import("addons.Foo.b")?;
            Ok(())
        });
        source.register("addons.Foo.b", |unit| {
            unit.import("addons.Foo.a")?;
            Ok(())
        });
        let cache = cache_with(source);

        let err = cache.resolve("addons.Foo.a", &Injection::new()).unwrap_err();
        assert!(err.message.contains("Circular import"));
        assert!(cache.cached().is_empty());
    }

    #[test]
    fn test_reload_runs_children_first_within_package() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::<String>::new()));
        let source = StaticSource::new();
        for (locator, imports) in [
            ("addons.Foo.main", vec!["addons.Foo.util", "addons.Bar.main", "host.api"]),
            ("addons.Foo.util", vec![]),
            ("addons.Bar.main", vec![]),
            ("host.api", vec![]),
        ] {
            let log = Arc::clone(&log);
            source.register(locator, move |unit| {
                for child in &imports {
                    unit.import(child)?;
                }
                log.lock().push(unit.locator().to_string());
                Ok(())
            });
        }
        let cache = cache_with(source);
        let injection = Injection::new().within_package("addons.Foo");

        let main = cache.resolve("addons.Foo.main", &injection).unwrap();
        log.lock().clear();

        cache
            .reload(&main, &injection, &["host".to_string()])
            .unwrap();

        assert_eq!(*log.lock(), vec!["addons.Foo.util", "addons.Foo.main"]);
        assert_eq!(main.executions(), 2);
        assert_eq!(cache.lookup("addons.Bar.main").unwrap().executions(), 1);
        assert_eq!(cache.lookup("host.api").unwrap().executions(), 1);
    }
}
