//! Which addons use which shared units.

use std::collections::{BTreeSet, HashMap};

use parking_lot::Mutex;
use tracing::debug;

use crate::loader::{CodeHandle, CodeLoader, Holder};

struct UsageEntry {
    handle: CodeHandle,
    addons: BTreeSet<String>,
}

/// Process-wide record of the units addons reported as used from their
/// `on_load` hooks.
///
/// A used unit is purged when the last addon using it unloads its
/// interface.
#[derive(Default)]
pub struct UsageLedger {
    entries: Mutex<HashMap<String, UsageEntry>>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `addon_id` uses `handle`.
    pub fn register(&self, handle: &CodeHandle, addon_id: &str, loader: &dyn CodeLoader) {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(handle.locator().to_string())
            .or_insert_with(|| UsageEntry {
                handle: CodeHandle::clone(handle),
                addons: BTreeSet::new(),
            });
        if entry.addons.insert(addon_id.to_string()) {
            loader
                .ledger()
                .register(handle.locator(), Holder::Usage(addon_id.to_string()));
        }
    }

    /// Drop `addon_id`'s use of `locator`. When no other addon uses the unit
    /// it is purged. Returns whether it was purged.
    pub fn release(&self, locator: &str, addon_id: &str, loader: &dyn CodeLoader) -> bool {
        let purge = {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.get_mut(locator) else {
                return false;
            };
            entry.addons.remove(addon_id);
            if entry.addons.is_empty() {
                entries.remove(locator).map(|entry| entry.handle)
            } else {
                None
            }
        };

        loader
            .ledger()
            .deregister(locator, &Holder::Usage(addon_id.to_string()));
        match purge {
            Some(handle) => {
                loader.purge(&handle);
                debug!(locator = %locator, "Used unit purged");
                true
            }
            None => false,
        }
    }

    /// Ids of the addons using `locator`, sorted.
    pub fn owners(&self, locator: &str) -> Vec<String> {
        self.entries
            .lock()
            .get(locator)
            .map(|entry| entry.addons.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_used(&self, locator: &str) -> bool {
        self.entries.lock().contains_key(locator)
    }
}

impl std::fmt::Debug for UsageLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageLedger")
            .field("units", &self.entries.lock().len())
            .finish()
    }
}
