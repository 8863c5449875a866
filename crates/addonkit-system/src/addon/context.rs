//! Caller information passed to addon code.

use std::any::Any;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use addonkit_core::AppResult;

use super::namespace::AddonNamespace;

/// Identifies the addon a unit executes or a function runs for.
///
/// Unit code reads its addon's injected bindings through this context.
#[derive(Clone)]
pub struct AddonContext {
    id: String,
    path: PathBuf,
    namespace: Arc<AddonNamespace>,
}

impl AddonContext {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>, namespace: Arc<AddonNamespace>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            namespace,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn namespace(&self) -> &Arc<AddonNamespace> {
        &self.namespace
    }

    /// Resolve a host object the embedder bound into the addon's namespace.
    pub fn resolve<T: Any + Send + Sync>(&self, name: &str) -> AppResult<Arc<T>> {
        self.namespace.get_as::<T>(name)
    }
}

impl fmt::Debug for AddonContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddonContext")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("namespace", &self.namespace.keys())
            .finish()
    }
}
