//! Capability traits consumed by the addon system.

pub mod dependency;
