//! Decides which account/chunk-info records this vault should pull after
//! routing-table churn.
//!
//! Every id asked about gets a time-bound entry in a negative cache: a
//! repeat question inside the lifespan is answered "no" without touching
//! the routing table, whether the first answer was yes (already fetching)
//! or no (not our responsibility). Entries are pruned lazily.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;
use vaultex_model::{Id, Pmid};

use crate::net::{Contact, RoutingTable, contact_within_closest};
use crate::time::Clock;

/// How long an entry suppresses repeat fetch decisions, in seconds.
pub const DEFAULT_INFO_ENTRY_LIFESPAN_SECS: u32 = 120;

/// Tunables for the synchroniser.
#[derive(Clone, Copy, Debug)]
pub struct InfoSynchroniserOptions {
    /// Group size consulted for proximity decisions.
    pub k: usize,
    pub entry_lifespan_secs: u32,
}

impl Default for InfoSynchroniserOptions {
    fn default() -> Self {
        Self {
            k: 16,
            entry_lifespan_secs: DEFAULT_INFO_ENTRY_LIFESPAN_SECS,
        }
    }
}

/// Proximity-based fetch arbiter with a time-bound negative cache.
pub struct InfoSynchroniser {
    pmid: Pmid,
    routing_table: Arc<dyn RoutingTable>,
    clock: Arc<dyn Clock>,
    options: InfoSynchroniserOptions,
    /// id -> expiry epoch seconds.
    entries: Mutex<BTreeMap<Id, u32>>,
}

impl std::fmt::Debug for InfoSynchroniser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("InfoSynchroniser");
        debug.field("pmid", &self.pmid).field("options", &self.options);
        match self.entries.try_lock() {
            Ok(entries) => {
                debug.field("entry_count", &entries.len());
            }
            Err(_) => {
                debug.field("entries", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl InfoSynchroniser {
    pub fn new(
        pmid: Pmid,
        routing_table: Arc<dyn RoutingTable>,
        clock: Arc<dyn Clock>,
        options: InfoSynchroniserOptions,
    ) -> Self {
        Self {
            pmid,
            routing_table,
            clock,
            options,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Whether this vault should fetch and hold the info behind `id`.
    ///
    /// Returns `true` at most once per entry lifespan, and only when this
    /// vault sits within the k closest nodes to `id`; the accompanying
    /// contacts are the group to gossip the info with. Asking about our own
    /// pmid is always `false`.
    pub fn should_fetch(&self, id: &Id) -> (bool, Vec<Contact>) {
        if *id == *self.pmid.id() {
            return (false, Vec::new());
        }
        let now = self.clock.epoch_seconds();
        let expiry = now.saturating_add(self.options.entry_lifespan_secs);
        {
            let mut entries = self.lock();
            if let Some(existing) = entries.get_mut(id) {
                // Either we shouldn't hold this info or we are already
                // fetching it; keep the entry warm.
                *existing = expiry;
                debug!(id = %id, "fetch suppressed by existing entry");
                return (false, Vec::new());
            }
            entries.insert(*id, expiry);
        }

        let closest = self.routing_table.closest_contacts(id, self.options.k);
        if closest.is_empty() {
            debug!(id = %id, "local routing table yielded no contacts");
            return (false, Vec::new());
        }
        let us = Contact::new(self.pmid);
        if contact_within_closest(id, &us, &closest) {
            (true, closest)
        } else {
            (false, Vec::new())
        }
    }

    pub fn remove_entry(&self, id: &Id) {
        self.lock().remove(id);
    }

    /// Drop every entry whose expiry has passed.
    pub fn prune_map(&self) {
        let now = self.clock.epoch_seconds();
        self.lock().retain(|_, expiry| *expiry >= now);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<Id, u32>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
