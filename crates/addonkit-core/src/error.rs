//! Unified error types for addonkit.
//!
//! All crates map their internal errors into [`AppError`] for consistent
//! propagation through the ? operator.

use std::fmt;
use std::path::Path;

use thiserror::Error;

/// Top-level error kind categorization used across the addon system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    /// Addon metadata is missing or malformed.
    MetaInvalid,
    /// An addon cannot be created at the given path.
    AddonInvalid,
    /// Two addons in one root declare the same id.
    DuplicateAddon,
    /// The requested addon or key was not found.
    NotFound,
    /// The addon's dependencies are not satisfied.
    Import,
    /// An interface of another type is already attached.
    Conflict,
    /// The interface has already loaded its code.
    AlreadyLoaded,
    /// Unloading is unsafe while the code is referenced elsewhere.
    Runtime,
    /// The operation needs a collaborator that is not installed.
    System,
    /// A registry-level failure, usually wrapping a per-addon error.
    Registry,
    /// A value has an invalid type or was rejected by a validator.
    Type,
    /// A code unit does not expose the requested attribute.
    Attribute,
    /// The dependency checker or installer failed.
    Dependency,
    /// A filesystem I/O error occurred.
    Storage,
    /// A serialization/deserialization error occurred.
    Serialization,
    /// A configuration error occurred.
    Configuration,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MetaInvalid => write!(f, "META_INVALID"),
            Self::AddonInvalid => write!(f, "ADDON_INVALID"),
            Self::DuplicateAddon => write!(f, "DUPLICATE_ADDON"),
            Self::NotFound => write!(f, "NOT_FOUND"),
            Self::Import => write!(f, "IMPORT"),
            Self::Conflict => write!(f, "CONFLICT"),
            Self::AlreadyLoaded => write!(f, "ALREADY_LOADED"),
            Self::Runtime => write!(f, "RUNTIME"),
            Self::System => write!(f, "SYSTEM"),
            Self::Registry => write!(f, "REGISTRY"),
            Self::Type => write!(f, "TYPE"),
            Self::Attribute => write!(f, "ATTRIBUTE"),
            Self::Dependency => write!(f, "DEPENDENCY"),
            Self::Storage => write!(f, "STORAGE"),
            Self::Serialization => write!(f, "SERIALIZATION"),
            Self::Configuration => write!(f, "CONFIGURATION"),
        }
    }
}

/// The unified error used throughout addonkit.
///
/// All crate-specific errors are mapped into `AppError` using `From` impls
/// or explicit `.map_err()` calls.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct AppError {
    /// The category of error.
    pub kind: ErrorKind,
    /// A human-readable error message.
    pub message: String,
    /// Optional underlying cause.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    /// Create a new error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Create a new error with an underlying cause.
    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a metadata error that names the offending file.
    pub fn meta_invalid(message: impl fmt::Display, path: &Path) -> Self {
        Self::new(
            ErrorKind::MetaInvalid,
            format!("{message} <==> Meta path: {}", path.display()),
        )
    }

    /// Create an invalid-addon error.
    pub fn addon_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AddonInvalid, message)
    }

    /// Create a duplicate addon error.
    pub fn duplicate_addon(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DuplicateAddon, message)
    }

    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Create an import error (dependencies not satisfied).
    pub fn import(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Import, message)
    }

    /// Create a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// Create an already-loaded error.
    pub fn already_loaded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyLoaded, message)
    }

    /// Create a runtime fault (unsafe unload).
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }

    /// Create a system fault (missing collaborator or misconfiguration).
    pub fn system(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::System, message)
    }

    /// Create a registry error wrapping the failure that caused it.
    pub fn registry(message: impl Into<String>, source: AppError) -> Self {
        Self::with_source(ErrorKind::Registry, message, source)
    }

    /// Create a type error.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    /// Create a missing-attribute error.
    pub fn attribute(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Attribute, message)
    }

    /// Create a dependency manager error.
    pub fn dependency(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Dependency, message)
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Whether the embedder may fix the cause and retry the operation.
    ///
    /// Unsatisfied dependencies can be installed with
    /// `satisfy_dependencies`, and a refused unload can succeed once the
    /// outside references are released.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Import | ErrorKind::Runtime)
    }

    /// Returns the wrapped `AppError`, if this error was built by
    /// [`AppError::registry`].
    pub fn inner(&self) -> Option<&AppError> {
        self.source
            .as_deref()
            .and_then(|source| source.downcast_ref::<AppError>())
    }
}

impl Clone for AppError {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            message: self.message.clone(),
            source: None,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source(
            ErrorKind::Serialization,
            format!("JSON serialization error: {err}"),
            err,
        )
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source(ErrorKind::Storage, format!("I/O error: {err}"), err)
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::with_source(
            ErrorKind::Configuration,
            format!("Configuration error: {err}"),
            err,
        )
    }
}
