//! Registry of a root directory of addons and its dependency cache.

pub mod query;
pub mod registry;
pub mod storage;

pub use query::AddonQuery;
pub use registry::{AddonRef, AddonSystem};
pub use storage::{CACHE_FILENAME, DependencyCache, DependencyCheckResult, StoredAddon};
