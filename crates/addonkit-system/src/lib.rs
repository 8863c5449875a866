//! # addonkit-system
//!
//! Addon lifecycle management: discovery of addon directories under a root,
//! metadata and per-addon storage, a dependency-verdict cache, code loading
//! through an ownership-tracking module cache, and typed interfaces with a
//! safe-unload protocol.
//!
//! ## Modules
//!
//! - `addon`: a single addon directory: metadata, storage, namespace, code
//! - `interface`: host-defined typed wrappers around loaded code
//! - `libraries`: dependency specifiers and library managers
//! - `loader`: code units, sources and the module cache
//! - `runtime`: process-wide identity caches and shared services
//! - `system`: registry of one root directory

pub mod addon;
pub mod interface;
pub mod libraries;
pub mod loader;
pub mod prelude;
pub mod runtime;
pub mod system;

pub use addon::{Addon, AddonContext, AddonMeta, AddonNamespace, AddonStorage, MetaData};
pub use interface::{InterfaceCore, ModuleInterface, PlainInterface};
pub use libraries::{CommandLibManager, DependencySpec, InstalledLibManager};
pub use loader::{Attr, CallContext, CodeHandle, CodeLoader, ModuleCache, StaticSource, UnitBuilder};
pub use runtime::AddonRuntime;
pub use system::{AddonQuery, AddonRef, AddonSystem};
