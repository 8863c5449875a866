//! Explicit record of who holds each loaded code unit.
//!
//! The safe-unload check counts the holders recorded here. Loading a unit
//! through an addon and its interface produces exactly
//! [`STRUCTURAL_HOLDERS`] entries; anything above that means outside code
//! still references the unit.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use super::unit::CodeHandle;

/// Holders created by a normal addon + interface load: the addon, the
/// interface, the loader cache and the parent namespace entry.
pub const STRUCTURAL_HOLDERS: usize = 4;

/// Something that keeps a reference to a loaded unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Holder {
    /// The addon at this path stores the handle.
    Addon(PathBuf),
    /// The interface attached to the addon at this path.
    Interface(PathBuf),
    /// The loader's unit cache.
    Loader,
    /// The parent unit's namespace entry for this child.
    ParentNamespace(String),
    /// The addon with this id uses the unit through its interface.
    Usage(String),
    /// The unit at this locator imported the unit and keeps its handle.
    Importer(String),
    /// An outside reference registered with [`OwnershipLedger::retain`].
    External(u64),
}

/// Process-wide ledger mapping unit locators to their holders.
#[derive(Debug, Default)]
pub struct OwnershipLedger {
    holders: Mutex<HashMap<String, HashSet<Holder>>>,
    next_guard: AtomicU64,
}

impl OwnershipLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `holder` for `locator`. Registering twice is a no-op.
    pub fn register(&self, locator: &str, holder: Holder) {
        self.holders
            .lock()
            .entry(locator.to_string())
            .or_default()
            .insert(holder);
    }

    /// Remove `holder` from `locator`. Returns whether it was present.
    pub fn deregister(&self, locator: &str, holder: &Holder) -> bool {
        let mut holders = self.holders.lock();
        let Some(set) = holders.get_mut(locator) else {
            return false;
        };
        let removed = set.remove(holder);
        if set.is_empty() {
            holders.remove(locator);
        }
        removed
    }

    /// Remove `holder` from every locator. Returns how many entries held it.
    pub fn deregister_everywhere(&self, holder: &Holder) -> usize {
        let mut holders = self.holders.lock();
        let mut removed = 0;
        holders.retain(|_, set| {
            if set.remove(holder) {
                removed += 1;
            }
            !set.is_empty()
        });
        removed
    }

    pub fn holder_count(&self, locator: &str) -> usize {
        self.holders.lock().get(locator).map_or(0, HashSet::len)
    }

    pub fn holders(&self, locator: &str) -> Vec<Holder> {
        self.holders
            .lock()
            .get(locator)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Register an outside reference to `handle` that lasts until the
    /// returned guard is dropped.
    pub fn retain(self: &Arc<Self>, handle: &CodeHandle) -> Retention {
        let id = self.next_guard.fetch_add(1, Ordering::Relaxed);
        let locator = handle.locator().to_string();
        self.register(&locator, Holder::External(id));
        debug!(locator = %locator, guard = id, "Unit retained");
        Retention {
            ledger: Arc::clone(self),
            locator,
            id,
        }
    }
}

/// Guard for an outside reference to a code unit.
///
/// While alive it counts as a holder, so the safe-unload check refuses to
/// unload the unit.
#[derive(Debug)]
pub struct Retention {
    ledger: Arc<OwnershipLedger>,
    locator: String,
    id: u64,
}

impl Retention {
    pub fn locator(&self) -> &str {
        &self.locator
    }
}

impl Drop for Retention {
    fn drop(&mut self) {
        self.ledger
            .deregister(&self.locator, &Holder::External(self.id));
    }
}
