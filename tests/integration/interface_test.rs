//! Integration tests for typed interfaces and the safe-unload protocol.

mod helpers;

use std::sync::Arc;

use parking_lot::Mutex;

use addonkit_core::{AppError, AppResult, ErrorKind};
use addonkit_system::loader::{Injection, STRUCTURAL_HOLDERS};
use addonkit_system::{Attr, InterfaceCore, ModuleInterface, PlainInterface, StaticSource};

use helpers::{Fixture, meta};

struct Greeter {
    core: InterfaceCore,
}

impl ModuleInterface for Greeter {
    fn from_core(core: InterfaceCore) -> Self {
        Self { core }
    }

    fn core(&self) -> &InterfaceCore {
        &self.core
    }
}

impl Greeter {
    fn greet(&self, who: &str) -> AppResult<String> {
        self.core.call("greet", &[Attr::from(who)])?.parse()
    }
}

type Log = Arc<Mutex<Vec<String>>>;

/// Entry unit with `greet`, `on_load` and `on_unload`; hook calls are
/// appended to the returned log.
fn greeter_unit(source: &StaticSource, locator: &str, shared: Option<&'static str>) -> Log {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let hooks = Arc::clone(&log);
    source.register(locator, move |unit| {
        let used = match shared {
            Some(locator) => vec![Attr::from(unit.import(locator)?)],
            None => Vec::new(),
        };

        unit.function("greet", |ctx| {
            let who: String = ctx.parse_arg(0)?;
            Ok(Attr::from(format!("Hello, {who} from {}", ctx.addon()?.id())))
        });

        let on_load = Arc::clone(&hooks);
        unit.function("on_load", move |ctx| {
            let args: Vec<String> = ctx
                .args()
                .iter()
                .map(|arg| arg.parse::<String>())
                .collect::<AppResult<_>>()?;
            on_load.lock().push(format!("load:{}", args.join(",")));
            Ok(Attr::from(used.clone()))
        });

        let on_unload = Arc::clone(&hooks);
        unit.function("on_unload", move |ctx| {
            on_unload.lock().push(format!("unload:{}", ctx.args().len()));
            Ok(Attr::none())
        });
        Ok(())
    });
    log
}

#[test]
fn test_interface_runs_hooks_and_calls_functions() {
    let fixture = Fixture::new();
    fixture.add_addon("Foo", &meta("foo", "Foo", &[]));
    let log = greeter_unit(&fixture.source, "addons.Foo.main", None);
    let system = fixture.system();
    let addon = system.find("foo").unwrap();

    let greeter = addon.interface::<Greeter>(&[Attr::from("boot")]).unwrap();
    assert!(addon.is_loaded());
    assert!(addon.has_interface());
    assert_eq!(greeter.greet("Ann").unwrap(), "Hello, Ann from foo");
    assert_eq!(*log.lock(), vec!["load:boot"]);

    addon.unload_interface(&[Attr::from(1), Attr::from(2)]).unwrap();
    assert_eq!(*log.lock(), vec!["load:boot", "unload:2"]);
    assert!(!addon.is_loaded());
    assert!(!addon.has_interface());
    assert_eq!(greeter.core().module().unwrap_err().kind, ErrorKind::Runtime);
}

#[test]
fn test_same_type_is_shared_and_other_type_conflicts() {
    let fixture = Fixture::new();
    fixture.add_addon("Foo", &meta("foo", "Foo", &[]));
    greeter_unit(&fixture.source, "addons.Foo.main", None);
    let system = fixture.system();
    let addon = system.find("foo").unwrap();

    let first = addon.interface::<Greeter>(&[]).unwrap();
    let second = addon.interface::<Greeter>(&[]).unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let err = addon.interface::<PlainInterface>(&[]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);

    let err = first.core().load(&[]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::AlreadyLoaded);
}

#[test]
fn test_unload_is_refused_while_retained() {
    let fixture = Fixture::new();
    fixture.add_addon("Foo", &meta("foo", "Foo", &[]));
    greeter_unit(&fixture.source, "addons.Foo.main", None);
    let system = fixture.system();
    let addon = system.find("foo").unwrap();
    let greeter = addon.interface::<Greeter>(&[]).unwrap();

    let ledger = fixture.runtime.loader().ledger();
    assert_eq!(ledger.holder_count("addons.Foo.main"), STRUCTURAL_HOLDERS);

    let guard = greeter.core().retain().unwrap();
    let err = greeter.core().unload(&[]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Runtime);
    assert!(addon.is_loaded());

    drop(guard);
    greeter.core().unload(&[]).unwrap();
    assert!(!addon.is_loaded());
    assert_eq!(ledger.holder_count("addons.Foo.main"), 0);
    assert!(fixture.runtime.loader().lookup("addons.Foo.main").is_none());
}

#[test]
fn test_unload_is_refused_while_another_unit_imports_the_entry() {
    let fixture = Fixture::new();
    fixture.add_addon("Foo", &meta("foo", "Foo", &[]));
    fixture.source.register("other.user", |unit| {
        let foo = unit.import("addons.Foo.main")?;
        unit.define("foo", foo);
        Ok(())
    });
    fixture.source.register("addons.Foo.main", |_unit| Ok(()));
    let system = fixture.system();
    let addon = system.find("foo").unwrap();
    let plain = addon.interface::<PlainInterface>(&[]).unwrap();

    let loader = fixture.runtime.loader();
    let user = loader.resolve("other.user", &Injection::new()).unwrap();
    assert_eq!(
        loader.ledger().holder_count("addons.Foo.main"),
        STRUCTURAL_HOLDERS + 1
    );

    let err = plain.unload(&[]).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Runtime);
    assert!(loader.lookup("addons.Foo.main").is_some());

    loader.purge(&user);
    plain.unload(&[]).unwrap();
    assert!(loader.lookup("addons.Foo.main").is_none());
}

#[test]
fn test_addon_unload_detaches_the_interface() {
    let fixture = Fixture::new();
    fixture.add_addon("Foo", &meta("foo", "Foo", &[]));
    let log = greeter_unit(&fixture.source, "addons.Foo.main", None);
    let system = fixture.system();
    let addon = system.find("foo").unwrap();
    let loader = fixture.runtime.loader();

    let stale = addon.interface::<Greeter>(&[]).unwrap();
    addon.unload();
    assert!(!addon.has_interface());
    assert!(!stale.core().is_loaded());
    assert_eq!(loader.ledger().holder_count("addons.Foo.main"), 0);
    assert_eq!(*log.lock(), vec!["load:"]);

    let handle = addon.load(None, false).unwrap();
    let fresh = addon.interface::<Greeter>(&[]).unwrap();
    assert!(!Arc::ptr_eq(&stale, &fresh));
    assert!(Arc::ptr_eq(&fresh.core().module().unwrap(), &handle));
    assert_eq!(stale.core().unload(&[]).unwrap_err().kind, ErrorKind::Runtime);
    assert!(loader.lookup("addons.Foo.main").is_some());

    fresh.core().unload(&[]).unwrap();
    assert!(!addon.is_loaded());
    assert!(loader.lookup("addons.Foo.main").is_none());
    assert_eq!(*log.lock(), vec!["load:", "load:", "unload:0"]);
}

#[test]
fn test_dropping_the_interface_unloads_the_code() {
    let fixture = Fixture::new();
    fixture.add_addon("Foo", &meta("foo", "Foo", &[]));
    let log = greeter_unit(&fixture.source, "addons.Foo.main", None);
    let system = fixture.system();
    let addon = system.find("foo").unwrap();

    let greeter = addon.interface::<Greeter>(&[]).unwrap();
    drop(greeter);
    assert!(!addon.is_loaded());
    assert_eq!(log.lock().last().map(String::as_str), Some("unload:0"));

    // A fresh interface of another type can attach afterwards.
    let plain = addon.interface::<PlainInterface>(&[]).unwrap();
    assert!(plain.is_loaded());
}

#[test]
fn test_failing_on_load_attaches_nothing() {
    let fixture = Fixture::new();
    fixture.add_addon("Foo", &meta("foo", "Foo", &[]));
    fixture.source.register("addons.Foo.main", |unit| {
        unit.function("on_load", |_ctx| Err(AppError::runtime("not today")));
        Ok(())
    });
    let system = fixture.system();
    let addon = system.find("foo").unwrap();

    let err = addon.interface::<PlainInterface>(&[]).unwrap_err();
    assert_eq!(err.message, "not today");
    assert!(!addon.has_interface());
}

#[test]
fn test_shared_unit_is_purged_by_its_last_user() {
    let fixture = Fixture::new();
    fixture.add_addon("Foo", &meta("foo", "Foo", &[]));
    fixture.add_addon("Bar", &meta("bar", "Bar", &[]));
    greeter_unit(&fixture.source, "addons.Foo.main", Some("shared.db"));
    greeter_unit(&fixture.source, "addons.Bar.main", Some("shared.db"));
    fixture.source.register("shared.db", |unit| {
        unit.define("connections", 0);
        Ok(())
    });
    let system = fixture.system();
    let foo = system.find("foo").unwrap();
    let bar = system.find("bar").unwrap();
    let usage = fixture.runtime.usage();
    let loader = fixture.runtime.loader();

    let foo_greeter = foo.interface::<Greeter>(&[]).unwrap();
    let bar_greeter = bar.interface::<Greeter>(&[]).unwrap();
    assert_eq!(usage.owners("shared.db"), vec!["bar", "foo"]);
    assert_eq!(foo_greeter.core().used_units(), vec!["shared.db"]);

    foo_greeter.core().unload(&[]).unwrap();
    assert!(loader.lookup("shared.db").is_some());
    assert_eq!(usage.owners("shared.db"), vec!["bar"]);

    bar_greeter.core().unload(&[]).unwrap();
    assert!(loader.lookup("shared.db").is_none());
    assert!(!usage.is_used("shared.db"));
}

#[test]
fn test_attributes_can_be_read_and_set() {
    let fixture = Fixture::new();
    fixture.add_addon("Foo", &meta("foo", "Foo", &[]));
    fixture.source.register("addons.Foo.main", |unit| {
        unit.define("VERSION", "1.2");
        Ok(())
    });
    let system = fixture.system();
    let addon = system.find("foo").unwrap();
    let plain = addon.interface::<PlainInterface>(&[]).unwrap();

    assert_eq!(plain.get_attribute("VERSION").unwrap().parse::<String>().unwrap(), "1.2");
    assert_eq!(plain.get_attribute("missing").unwrap_err().kind, ErrorKind::Attribute);
    assert!(plain.get_attribute_or("missing", Attr::from(3)).unwrap().parse::<i64>().unwrap() == 3);
    assert!(plain.get_function("not an identifier").unwrap().is_none());
    assert!(plain.get_function("VERSION").unwrap().is_none());

    plain.set_attributes([("mode", "fast")]).unwrap();
    assert_eq!(plain.get_attribute("mode").unwrap().parse::<String>().unwrap(), "fast");
    assert_eq!(plain.call("missing", &[]).unwrap_err().kind, ErrorKind::Attribute);
}
