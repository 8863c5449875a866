//! Integration tests for loading, reloading and unloading addon code.

mod helpers;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use addonkit_core::{DependencyChecker, ErrorKind};
use addonkit_system::{Attr, StaticSource};

use helpers::{Fixture, meta};

/// Register a unit that counts its executions and exposes the count as
/// `marker`.
fn counting_unit(source: &StaticSource, locator: &str, imports: &[&str]) -> Arc<AtomicUsize> {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let imports: Vec<String> = imports.iter().map(|s| s.to_string()).collect();
    source.register(locator, move |unit| {
        for child in &imports {
            unit.import(child)?;
        }
        let run = counter.fetch_add(1, Ordering::SeqCst) + 1;
        unit.define("marker", run as i64);
        Ok(())
    });
    runs
}

fn marker(handle: &addonkit_system::CodeHandle) -> i64 {
    handle.get("marker").unwrap().parse().unwrap()
}

#[test]
fn test_unload_of_never_loaded_addon_is_a_noop() {
    let fixture = Fixture::new();
    fixture.add_addon("Foo", &meta("foo", "Foo", &[]));
    let system = fixture.system();
    let addon = system.find("foo").unwrap();

    addon.unload();
    addon.unload();
    assert!(!addon.is_loaded());
    assert!(addon.module().is_none());
}

#[test]
fn test_load_after_unload_executes_again() {
    let fixture = Fixture::new();
    fixture.add_addon("Foo", &meta("foo", "Foo", &[]));
    let runs = counting_unit(&fixture.source, "addons.Foo.main", &[]);
    let system = fixture.system();
    let addon = system.find("foo").unwrap();
    assert_eq!(addon.module_locator().unwrap(), "addons.Foo.main");

    let first = addon.load(None, false).unwrap();
    assert_eq!(marker(&first), 1);
    let again = addon.load(None, false).unwrap();
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    addon.unload();
    assert!(!addon.is_loaded());
    assert!(fixture.runtime.loader().lookup("addons.Foo.main").is_none());

    let second = addon.load(None, false).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(marker(&second), 2);
}

#[test]
fn test_unsatisfied_dependencies_block_loading() {
    let fixture = Fixture::new();
    fixture.checker.set_satisfied(false);
    fixture.add_addon("Foo", &meta("foo", "Foo", &["lib==1.0"]));
    let runs = counting_unit(&fixture.source, "addons.Foo.main", &[]);
    let system = fixture.system();
    let addon = system.find("foo").unwrap();

    let err = addon.load(None, false).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Import);
    assert!(!addon.is_loaded());
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    addon.satisfy_dependencies(None).unwrap();
    addon.load(None, false).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_standalone_addon_needs_a_checker() {
    let fixture = Fixture::new();
    let path = fixture.add_addon("Foo", &meta("foo", "Foo", &["lib==1.0"]));
    counting_unit(&fixture.source, "addons.Foo.main", &[]);
    let addon = fixture.runtime.addon(&path).unwrap();
    assert!(addon.system().is_none());

    assert_eq!(addon.load(None, false).unwrap_err().kind, ErrorKind::System);

    let checker: &dyn DependencyChecker = fixture.checker.as_ref();
    addon.load(Some(checker), false).unwrap();
    assert!(addon.is_loaded());
}

#[test]
fn test_namespace_is_injected_and_bound() {
    let fixture = Fixture::new();
    fixture.add_addon("Foo", &meta("foo", "Foo", &[]));
    fixture.source.register("addons.Foo.main", |unit| {
        let seen = unit.injected("greeting").cloned().unwrap_or_else(Attr::none);
        unit.define("seen", seen);
        unit.function("whoami", |ctx| Ok(Attr::from(ctx.addon()?.id())));
        Ok(())
    });
    let system = fixture.system();
    let addon = system.find("foo").unwrap();
    addon.namespace().set("greeting", "hello");

    let handle = addon.load(None, false).unwrap();
    assert_eq!(handle.get("seen").unwrap().parse::<String>().unwrap(), "hello");
    assert_eq!(handle.get("greeting").unwrap().parse::<String>().unwrap(), "hello");

    let whoami = handle.get("whoami").unwrap();
    let context = addon.context().unwrap();
    let result = (whoami.as_function().unwrap())(&addonkit_system::CallContext::new(
        Some(&context),
        &[],
    ))
    .unwrap();
    assert_eq!(result.parse::<String>().unwrap(), "foo");
}

#[test]
fn test_reload_reexecutes_package_units_only() {
    let fixture = Fixture::new();
    fixture.add_addon("Foo", &meta("foo", "Foo", &[]));
    let main = counting_unit(
        &fixture.source,
        "addons.Foo.main",
        &["addons.Foo.util", "host.log"],
    );
    let util = counting_unit(&fixture.source, "addons.Foo.util", &[]);
    let host = counting_unit(&fixture.source, "host.log", &[]);
    let system = fixture.system();
    let addon = system.find("foo").unwrap();

    let handle = addon.load(None, false).unwrap();
    let reloaded = addon.reload(None).unwrap();
    assert!(Arc::ptr_eq(&handle, &reloaded));
    assert_eq!(main.load(Ordering::SeqCst), 2);
    assert_eq!(util.load(Ordering::SeqCst), 2);
    assert_eq!(host.load(Ordering::SeqCst), 1);
    assert_eq!(marker(&handle), 2);
}

#[test]
fn test_reload_of_unloaded_addon_loads_it() {
    let fixture = Fixture::new();
    fixture.add_addon("Foo", &meta("foo", "Foo", &[]));
    let runs = counting_unit(&fixture.source, "addons.Foo.main", &[]);
    let system = fixture.system();
    let addon = system.find("foo").unwrap();

    addon.reload(None).unwrap();
    assert!(addon.is_loaded());
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unload_purges_caused_units() {
    let fixture = Fixture::new();
    fixture.add_addon("Foo", &meta("foo", "Foo", &[]));
    counting_unit(&fixture.source, "addons.Foo.main", &["addons.Foo.util"]);
    counting_unit(&fixture.source, "addons.Foo.util", &[]);
    let system = fixture.system();
    let addon = system.find("foo").unwrap();

    addon.load(None, false).unwrap();
    let loader = fixture.runtime.loader();
    assert!(loader.lookup("addons.Foo.util").is_some());

    addon.unload();
    assert!(loader.lookup("addons.Foo.util").is_none());
    assert_eq!(loader.ledger().holder_count("addons.Foo.main"), 0);
}

#[test]
fn test_local_storage_persists() {
    let fixture = Fixture::new();
    let path = fixture.add_addon("Foo", &meta("foo", "Foo", &[]));
    let system = fixture.system();
    let addon = system.find("foo").unwrap();

    {
        let storage = addon.storage().unwrap();
        let mut storage = storage.lock();
        storage.set("volume", &7).unwrap();
        storage.save().unwrap();
    }
    assert!(path.join("storage.json").exists());

    let mut reopened = addonkit_system::AddonStorage::open(&path).unwrap();
    reopened.read().unwrap();
    assert_eq!(reopened.get::<i64>("volume").unwrap(), Some(7));
    assert_eq!(reopened.remove("missing").unwrap_err().kind, ErrorKind::NotFound);
}
