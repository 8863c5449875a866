//! Unit source loading factories from shared libraries (feature-gated).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use addonkit_core::{AppError, AppResult};

use super::builder::UnitBuilder;
use super::source::{UnitFactory, UnitSource};

/// Type of the init function exported by unit libraries.
///
/// Unit libraries must export:
/// `fn addonkit_unit_init(unit: &mut UnitBuilder<'_>) -> AppResult<()>`
/// built with the same compiler and `addonkit-system` version as the host.
pub type UnitInitFn = fn(&mut UnitBuilder<'_>) -> AppResult<()>;

/// Symbol name of [`UnitInitFn`].
pub const UNIT_INIT_SYMBOL: &[u8] = b"addonkit_unit_init";

/// Maps dotted locators to shared libraries under a base directory.
///
/// `addons.Foo.main` resolves to `<base>/addons/Foo/libmain.so` (platform
/// naming applies). The library stays loaded as long as its factory is
/// referenced by a cached unit.
#[derive(Debug)]
pub struct DylibSource {
    base: PathBuf,
}

impl DylibSource {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Library path for `locator`.
    pub fn library_path(&self, locator: &str) -> PathBuf {
        let mut segments: Vec<&str> = locator.split('.').collect();
        let file = segments.pop().unwrap_or_default();
        let mut path = self.base.clone();
        for segment in segments {
            path.push(segment);
        }
        path.join(libloading::library_filename(file))
    }

    /// Load the library at `path` and wrap its init function.
    ///
    /// # Safety
    /// This runs the initialisers of an arbitrary shared library and trusts
    /// the exported symbol to have the [`UnitInitFn`] signature. Only load
    /// trusted addon libraries.
    unsafe fn open(path: &Path) -> AppResult<UnitFactory> {
        let library = unsafe { libloading::Library::new(path) }.map_err(|e| {
            AppError::import(format!(
                "Failed to load unit library '{}': {}",
                path.display(),
                e
            ))
        })?;

        let init: UnitInitFn = unsafe {
            *library.get::<UnitInitFn>(UNIT_INIT_SYMBOL).map_err(|e| {
                AppError::import(format!(
                    "Unit library '{}' missing 'addonkit_unit_init' symbol: {}",
                    path.display(),
                    e
                ))
            })?
        };

        info!(path = %path.display(), "Unit library loaded");

        let library = Arc::new(library);
        Ok(Arc::new(move |unit: &mut UnitBuilder<'_>| {
            let _library = &library;
            init(unit)
        }))
    }
}

impl UnitSource for DylibSource {
    fn locate(&self, locator: &str) -> AppResult<Option<UnitFactory>> {
        let path = self.library_path(locator);
        if !path.is_file() {
            return Ok(None);
        }
        // SAFETY: libraries under the addon base directory are trusted
        // addon code built against this crate.
        unsafe { Self::open(&path) }.map(Some)
    }
}
