//! Everything an addon author or host usually needs.

pub use addonkit_core::{AppError, AppResult, DependencyChecker, ErrorKind};

pub use crate::addon::{Addon, AddonContext, AddonMeta, ExtraSchema, TypedExtra};
pub use crate::interface::{InterfaceCore, ModuleInterface, PlainInterface};
pub use crate::loader::{
    Attr, CallContext, CodeHandle, CodeLoader, Injection, ModuleCache, StaticSource, UnitBuilder,
    UnitSource,
};
pub use crate::runtime::AddonRuntime;
pub use crate::system::{AddonQuery, AddonSystem};
