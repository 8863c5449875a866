//! Where unit code comes from.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use addonkit_core::AppResult;

use super::builder::UnitBuilder;

/// Executes a unit's body against a builder.
pub type UnitFactory = Arc<dyn Fn(&mut UnitBuilder<'_>) -> AppResult<()> + Send + Sync>;

/// Supplies factories for unit locators.
pub trait UnitSource: Send + Sync {
    /// Returns the factory for `locator`, or `None` when this source does
    /// not provide it.
    fn locate(&self, locator: &str) -> AppResult<Option<UnitFactory>>;
}

/// A source backed by factories registered at runtime.
///
/// Hosts compile addon units into the binary and register them here under
/// their dotted locators.
#[derive(Default)]
pub struct StaticSource {
    factories: DashMap<String, UnitFactory>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the factory for `locator`.
    pub fn register<F>(&self, locator: impl Into<String>, factory: F)
    where
        F: Fn(&mut UnitBuilder<'_>) -> AppResult<()> + Send + Sync + 'static,
    {
        self.factories.insert(locator.into(), Arc::new(factory));
    }

    pub fn unregister(&self, locator: &str) -> bool {
        self.factories.remove(locator).is_some()
    }

    pub fn contains(&self, locator: &str) -> bool {
        self.factories.contains_key(locator)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl UnitSource for StaticSource {
    fn locate(&self, locator: &str) -> AppResult<Option<UnitFactory>> {
        Ok(self
            .factories
            .get(locator)
            .map(|entry| Arc::clone(entry.value())))
    }
}

impl fmt::Debug for StaticSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut locators: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        locators.sort();
        f.debug_struct("StaticSource")
            .field("locators", &locators)
            .finish()
    }
}
