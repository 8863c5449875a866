//! Dependency checker capability.

use std::collections::HashMap;

use crate::result::AppResult;

/// External library manager that decides whether dependency specifiers are
/// satisfied and can install them.
///
/// Implementations may shell out to a package manager and be slow; the
/// registry caches their verdicts per dependency hash.
pub trait DependencyChecker: Send + Sync {
    /// Returns `true` when every specifier is satisfied.
    fn check(&self, specifiers: &[String]) -> AppResult<bool>;

    /// Installs the specifiers and returns the ones actually installed.
    fn install(&self, specifiers: &[String]) -> AppResult<Vec<String>>;

    /// Returns installed libraries as name → version.
    ///
    /// Implementations should cache the listing and refresh it only when
    /// `force_refresh` is set.
    fn list_installed(&self, force_refresh: bool) -> AppResult<HashMap<String, String>>;
}
