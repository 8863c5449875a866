//! # addonkit-core
//!
//! Core crate for addonkit. Contains the unified error system, the
//! configuration schemas, and the capability traits the addon system
//! consumes but does not implement itself.
//!
//! This crate has **no** internal dependencies on other addonkit crates.

pub mod config;
pub mod error;
pub mod result;
pub mod traits;

pub use error::{AppError, ErrorKind};
pub use result::AppResult;
pub use traits::dependency::DependencyChecker;
