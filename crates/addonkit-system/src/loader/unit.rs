//! Loaded code units and the values they expose.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use addonkit_core::{AppError, AppResult};

use crate::addon::AddonContext;

/// A callable exported by a code unit.
pub type UnitFn = Arc<dyn Fn(&CallContext<'_>) -> AppResult<Attr> + Send + Sync>;

/// Shared handle to a loaded code unit.
pub type CodeHandle = Arc<CodeUnit>;

/// A value bound to a name inside a code unit or a namespace.
#[derive(Clone)]
pub enum Attr {
    /// Plain JSON data.
    Value(Value),
    /// A callable.
    Function(UnitFn),
    /// Another loaded unit.
    Unit(CodeHandle),
    /// A sequence of attributes.
    List(Vec<Attr>),
    /// An arbitrary host object.
    Object(Arc<dyn Any + Send + Sync>),
}

impl Attr {
    /// The `null` value.
    pub fn none() -> Self {
        Self::Value(Value::Null)
    }

    /// Wrap a host object.
    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        Self::Object(Arc::new(value))
    }

    /// Wrap a closure as a function attribute.
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&CallContext<'_>) -> AppResult<Attr> + Send + Sync + 'static,
    {
        Self::Function(Arc::new(f))
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&UnitFn> {
        match self {
            Self::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_unit(&self) -> Option<&CodeHandle> {
        match self {
            Self::Unit(unit) => Some(unit),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Attr]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Downcast a host object to a concrete type.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Self::Object(object) => object.clone().downcast::<T>().ok(),
            _ => None,
        }
    }

    /// Deserialize a JSON value into `T`.
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> AppResult<T> {
        let value = self.as_value().ok_or_else(|| {
            AppError::type_error(format!("Expected a data value, got {}", self.kind_name()))
        })?;
        serde_json::from_value(value.clone())
            .map_err(|e| AppError::type_error(format!("Value has an unexpected shape: {e}")))
    }

    /// Short name of the variant, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::Function(_) => "function",
            Self::Unit(_) => "unit",
            Self::List(_) => "list",
            Self::Object(_) => "object",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::Value(Value::Null))
    }
}

impl fmt::Debug for Attr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Function(_) => f.write_str("Function(..)"),
            Self::Unit(unit) => f.debug_tuple("Unit").field(&unit.locator()).finish(),
            Self::List(items) => f.debug_tuple("List").field(items).finish(),
            Self::Object(_) => f.write_str("Object(..)"),
        }
    }
}

impl From<Value> for Attr {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for Attr {
    fn from(value: &str) -> Self {
        Self::Value(Value::String(value.to_string()))
    }
}

impl From<String> for Attr {
    fn from(value: String) -> Self {
        Self::Value(Value::String(value))
    }
}

impl From<i64> for Attr {
    fn from(value: i64) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<i32> for Attr {
    fn from(value: i32) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<f64> for Attr {
    fn from(value: f64) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<bool> for Attr {
    fn from(value: bool) -> Self {
        Self::Value(Value::Bool(value))
    }
}

impl From<CodeHandle> for Attr {
    fn from(unit: CodeHandle) -> Self {
        Self::Unit(unit)
    }
}

impl From<Vec<Attr>> for Attr {
    fn from(items: Vec<Attr>) -> Self {
        Self::List(items)
    }
}

/// Arguments and caller information handed to a [`UnitFn`].
pub struct CallContext<'a> {
    addon: Option<&'a AddonContext>,
    args: &'a [Attr],
}

impl<'a> CallContext<'a> {
    pub fn new(addon: Option<&'a AddonContext>, args: &'a [Attr]) -> Self {
        Self { addon, args }
    }

    pub fn args(&self) -> &[Attr] {
        self.args
    }

    pub fn arg(&self, index: usize) -> Option<&Attr> {
        self.args.get(index)
    }

    /// Deserialize positional argument `index`.
    pub fn parse_arg<T: serde::de::DeserializeOwned>(&self, index: usize) -> AppResult<T> {
        self.arg(index)
            .ok_or_else(|| AppError::type_error(format!("Missing positional argument {index}")))?
            .parse()
    }

    /// The addon on whose behalf the function runs.
    pub fn addon(&self) -> AppResult<&AddonContext> {
        self.addon
            .ok_or_else(|| AppError::system("Function was called outside of an addon context"))
    }
}

struct UnitState {
    attrs: HashMap<String, Attr>,
    children: Vec<String>,
    executions: u64,
}

/// A loaded code unit: a named set of attributes produced by running the
/// unit's factory.
///
/// Reloading re-executes the factory and replaces the attributes in place,
/// so every holder of the handle observes the new code.
pub struct CodeUnit {
    locator: String,
    package: String,
    state: RwLock<UnitState>,
}

impl CodeUnit {
    pub(crate) fn new(
        locator: impl Into<String>,
        package: impl Into<String>,
        attrs: HashMap<String, Attr>,
        children: Vec<String>,
    ) -> Self {
        Self {
            locator: locator.into(),
            package: package.into(),
            state: RwLock::new(UnitState {
                attrs,
                children,
                executions: 1,
            }),
        }
    }

    /// Dotted locator of the unit, e.g. `addons.Foo.main`.
    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Package tree the unit reloads within.
    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn get(&self, name: &str) -> Option<Attr> {
        self.state.read().attrs.get(name).cloned()
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<Attr>) {
        self.state.write().attrs.insert(name.into(), value.into());
    }

    pub fn remove(&self, name: &str) -> Option<Attr> {
        self.state.write().attrs.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.read().attrs.contains_key(name)
    }

    /// Attribute names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().attrs.keys().cloned().collect();
        names.sort();
        names
    }

    /// Locators of the units this unit imported during its last execution.
    pub fn children(&self) -> Vec<String> {
        self.state.read().children.clone()
    }

    /// How many times the unit's factory has run.
    pub fn executions(&self) -> u64 {
        self.state.read().executions
    }

    pub(crate) fn install(&self, attrs: HashMap<String, Attr>, children: Vec<String>) {
        let mut state = self.state.write();
        state.attrs = attrs;
        state.children = children;
        state.executions += 1;
    }
}

impl fmt::Debug for CodeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeUnit")
            .field("locator", &self.locator)
            .field("package", &self.package)
            .field("attrs", &self.names())
            .finish()
    }
}

/// Parent segment of a dotted locator.
pub fn parent_locator(locator: &str) -> Option<&str> {
    locator
        .rsplit_once('.')
        .map(|(parent, _)| parent)
        .filter(|parent| !parent.is_empty())
}

/// Whether `locator` is `prefix` itself or lies underneath it.
pub fn is_within(locator: &str, prefix: &str) -> bool {
    locator == prefix
        || locator
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.'))
}
