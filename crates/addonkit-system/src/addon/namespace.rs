//! Name bindings injected into an addon's code.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use addonkit_core::{AppError, AppResult};

use crate::loader::Attr;

/// Bindings made available to an addon's units when they execute, and
/// copied onto the entry unit after every load.
#[derive(Debug, Default)]
pub struct AddonNamespace {
    values: RwLock<BTreeMap<String, Attr>>,
}

impl AddonNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<Attr>) {
        self.values.write().insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<Attr> {
        self.values.read().get(name).cloned()
    }

    /// The host object bound to `name`, downcast to `T`.
    pub fn get_as<T: Any + Send + Sync>(&self, name: &str) -> AppResult<Arc<T>> {
        let attr = self
            .get(name)
            .ok_or_else(|| AppError::not_found(format!("Name '{name}' is not defined")))?;
        attr.downcast::<T>().ok_or_else(|| {
            AppError::type_error(format!(
                "Name '{name}' is bound to a {} of another type",
                attr.kind_name()
            ))
        })
    }

    /// The data value bound to `name`, deserialized into `T`.
    pub fn get_value<T: serde::de::DeserializeOwned>(&self, name: &str) -> AppResult<T> {
        self.get(name)
            .ok_or_else(|| AppError::not_found(format!("Name '{name}' is not defined")))?
            .parse()
    }

    pub fn update<I, K, V>(&self, values: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Attr>,
    {
        let mut map = self.values.write();
        for (name, value) in values {
            map.insert(name.into(), value.into());
        }
    }

    pub fn pop(&self, name: &str) -> Option<Attr> {
        self.values.write().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.read().contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Bound names, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.values.read().keys().cloned().collect()
    }

    /// Copy of every binding.
    pub fn snapshot(&self) -> HashMap<String, Attr> {
        self.values
            .read()
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }
}
