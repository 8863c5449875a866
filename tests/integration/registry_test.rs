//! Integration tests for discovery, enabled status and the dependency cache.

mod helpers;

use std::sync::Arc;

use serde_json::json;

use addonkit_core::ErrorKind;
use addonkit_system::{AddonQuery, AddonRuntime, StaticSource};

use helpers::{Fixture, bump_mtime, meta, write_meta};

#[test]
fn test_dependency_verdict_is_cached_until_forced() {
    let fixture = Fixture::new();
    fixture.checker.set_satisfied(false);
    fixture.add_addon("Foo", &meta("foo", "Foo", &["lib==1.0"]));
    let system = fixture.system();

    assert!(!system.check_dependencies("foo", true, false).unwrap());
    let hash = system.find("foo").unwrap().metadata().depends_hash().unwrap();
    let record = system.storage().lookup("foo").unwrap();
    assert!(!record.last_dependency_check.satisfied);
    assert_eq!(record.last_dependency_check.hash, hash);

    fixture.checker.set_satisfied(true);
    let checks = fixture.checker.checks();
    assert!(!system.check_dependencies("foo", true, false).unwrap());
    assert_eq!(fixture.checker.checks(), checks);

    assert!(system.check_dependencies("foo", true, true).unwrap());
    assert_eq!(fixture.checker.checks(), checks + 1);
    assert!(system.storage().lookup("foo").unwrap().last_dependency_check.satisfied);
    assert!(system.check_dependencies("foo", true, false).unwrap());
}

#[test]
fn test_changed_depends_invalidates_the_verdict() {
    let fixture = Fixture::new();
    let path = fixture.add_addon("Foo", &meta("foo", "Foo", &["lib==1.0"]));
    let system = fixture.system();
    assert!(system.check_dependencies("foo", true, false).unwrap());

    fixture.checker.set_satisfied(false);
    write_meta(&path, &meta("foo", "Foo", &["lib==2.0"]));
    bump_mtime(&path.join("addon.json"), 5);

    let checks = fixture.checker.checks();
    assert!(!system.check_dependencies("foo", true, false).unwrap());
    assert!(fixture.checker.checks() > checks);
}

#[test]
fn test_uncached_check_persists_nothing() {
    let fixture = Fixture::new();
    fixture.add_addon("Foo", &meta("foo", "Foo", &["lib==1.0"]));
    let system = fixture.system();
    system.discover().unwrap();

    fixture.checker.set_satisfied(false);
    let writes = system.storage().write_count();
    assert!(!system.check_dependencies("foo", false, false).unwrap());
    assert_eq!(system.storage().write_count(), writes);
    assert!(system.storage().lookup("foo").unwrap().last_dependency_check.satisfied);
}

#[test]
fn test_set_enabled_skips_identical_writes() {
    let fixture = Fixture::new();
    fixture.add_addon("Foo", &meta("foo", "Foo", &[]));
    let system = fixture.system();
    system.discover().unwrap();
    assert!(!system.get_enabled("foo").unwrap());

    system.set_enabled("foo", true).unwrap();
    assert!(system.get_enabled("foo").unwrap());
    let writes = system.storage().write_count();
    system.set_enabled("foo", true).unwrap();
    system.enable("foo").unwrap();
    assert_eq!(system.storage().write_count(), writes);

    system.disable("foo").unwrap();
    assert!(!system.get_enabled("foo").unwrap());
    assert_eq!(
        fixture.cache_document()["addons"]["foo"]["enabled"],
        json!(false)
    );
}

#[test]
fn test_addon_shortcuts_go_through_the_registry() {
    let fixture = Fixture::new();
    fixture.add_addon("Foo", &meta("foo", "Foo", &[]));
    let system = fixture.system();
    let addon = system.find("foo").unwrap();

    addon.enable().unwrap();
    assert!(addon.enabled().unwrap());
    assert!(system.get_enabled(&addon).unwrap());
    addon.disable().unwrap();
    assert!(!addon.enabled().unwrap());
    assert!(addon.check_dependencies(None).unwrap());
}

#[test]
fn test_duplicate_ids_abort_discovery() {
    let fixture = Fixture::new();
    fixture.add_addon("Alpha", &meta("dup", "Alpha", &[]));
    fixture.add_addon("Beta", &meta("dup", "Beta", &[]));
    let system = fixture.system();

    let err = system.discover().unwrap_err();
    assert_eq!(err.kind, ErrorKind::DuplicateAddon);
}

#[test]
fn test_invalid_addon_is_wrapped_in_registry_error() {
    let fixture = Fixture::new();
    fixture.add_addon("Foo", &meta("foo", "Foo", &[]));
    fixture.add_addon("Broken", &json!({"id": "broken", "name": "Broken"}));
    let system = fixture.system();

    let err = system.discover().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Registry);
    assert_eq!(err.inner().map(|e| e.kind), Some(ErrorKind::MetaInvalid));
}

#[test]
fn test_bad_directory_name_is_wrapped_in_registry_error() {
    let fixture = Fixture::new();
    fixture.add_addon("Foo2", &meta("foo", "Foo", &[]));
    let system = fixture.system();

    let err = system.discover().unwrap_err();
    assert_eq!(err.kind, ErrorKind::Registry);
    assert_eq!(err.inner().map(|e| e.kind), Some(ErrorKind::AddonInvalid));
}

#[test]
fn test_stray_file_fails_discovery() {
    let fixture = Fixture::new();
    fixture.add_addon("Foo", &meta("foo", "Foo", &[]));
    std::fs::write(fixture.root.join("notes.txt"), "hi").unwrap();
    let system = fixture.system();

    assert_eq!(system.discover().unwrap_err().kind, ErrorKind::Registry);
}

#[test]
fn test_discovery_is_sorted_and_skips_the_cache_file() {
    let fixture = Fixture::new();
    fixture.add_addon("Beta", &meta("beta", "Beta", &[]));
    fixture.add_addon("Alpha", &meta("alpha", "Alpha", &[]));
    let system = fixture.system();
    assert!(fixture.root.join(".addons-cache.json").exists());

    let ids: Vec<String> = system
        .discover()
        .unwrap()
        .iter()
        .map(|addon| addon.id().unwrap())
        .collect();
    assert_eq!(ids, vec!["alpha", "beta"]);
    assert_eq!(system.find("missing").unwrap_err().kind, ErrorKind::NotFound);
}

#[test]
fn test_addon_outside_root_is_rejected() {
    let fixture = Fixture::new();
    let other = Fixture::new();
    let path = other.add_addon("Foo", &meta("foo", "Foo", &[]));
    let system = fixture.system();

    let stranger = fixture.runtime.addon(&path).unwrap();
    let err = system.set_enabled(&stranger, true).unwrap_err();
    assert_eq!(err.kind, ErrorKind::AddonInvalid);
}

#[test]
fn test_satisfy_marks_dependencies_satisfied() {
    let fixture = Fixture::new();
    fixture.checker.set_satisfied(false);
    fixture.add_addon("Foo", &meta("foo", "Foo", &["lib==1.0", "other>=2"]));
    let system = fixture.system();
    assert!(!system.check_dependencies("foo", true, false).unwrap());

    let installed = system.satisfy_dependencies("foo").unwrap();
    assert_eq!(installed, vec!["lib==1.0", "other>=2"]);
    assert_eq!(fixture.checker.installs(), 1);
    assert!(system.check_dependencies("foo", true, false).unwrap());
}

#[test]
fn test_query_matches_any_criterion() {
    let fixture = Fixture::new();
    fixture.add_addon("Alpha", &meta("alpha", "Alpha", &[]));
    fixture.add_addon(
        "Beta",
        &json!({"id": "beta", "name": "Beta", "module": "main", "authors": ["Bob"],
                "description": "Weather reports"}),
    );
    let system = fixture.system();
    system.enable("alpha").unwrap();

    let ids = |query: AddonQuery| -> Vec<String> {
        system
            .query(query)
            .unwrap()
            .map(|addon| addon.id().unwrap())
            .collect()
    };
    assert_eq!(ids(AddonQuery::new().author("Bob")), vec!["beta"]);
    assert_eq!(ids(AddonQuery::new().enabled(true)), vec!["alpha"]);
    assert_eq!(
        ids(AddonQuery::new().author("Bob").enabled(true)),
        vec!["alpha", "beta"]
    );
    assert_eq!(
        ids(AddonQuery::new().description("weather").case_insensitive(true)),
        vec!["beta"]
    );
    assert!(ids(AddonQuery::new()).is_empty());
}

#[test]
fn test_one_registry_per_root_while_alive() {
    let fixture = Fixture::new();
    let first = fixture.system();
    let second = fixture.system();
    assert!(Arc::ptr_eq(&first, &second));

    let runtime = AddonRuntime::with_source(Arc::new(StaticSource::new()));
    let third = runtime
        .system(&fixture.root, fixture.checker.clone())
        .unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
    assert_eq!(*first, *third);
}

#[test]
fn test_metadata_round_trip_is_stable() {
    let fixture = Fixture::new();
    let path = fixture.add_addon(
        "Foo",
        &json!({"id": "foo", "name": "Foo", "module": "main", "authors": ["Ann"],
                "extra": {"color": "blue"}, "homepage": "https://example.org"}),
    );
    let system = fixture.system();
    let addon = system.find("foo").unwrap();

    let before = addon.metadata().snapshot().unwrap();
    assert_eq!(before.version, "0.0.1");
    addon.metadata().save().unwrap();
    addon.metadata().read().unwrap();
    assert_eq!(addon.metadata().snapshot().unwrap(), before);

    let on_disk: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(path.join("addon.json")).unwrap()).unwrap();
    assert_eq!(on_disk["homepage"], json!("https://example.org"));
    assert_eq!(on_disk["depends"], json!([]));
}
