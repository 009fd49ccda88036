//! Watch-list / reference-list accounting for every chunk a vault answers
//! for.
//!
//! The handler is the authority on when a chunk is wanted, when new
//! replicas must be recruited, when payments are consumed or refunded, and
//! when the record may finally be destroyed. All list mutation happens
//! under one per-handler mutex; callers get values out by copy.
//!
//! Payment flow in short: the first committed watcher pays for all
//! mandatory copies and holds the extra slots as deletable placeholders;
//! each later watcher pays one unit which is routed to a placeholder's
//! owner as a refund. A watcher leaving a mandatory slot is either replaced
//! from the reserve (and refunded) or leaves a deletable placeholder
//! behind. When the last watcher leaves, every remaining slot is refunded
//! and the replicas are released.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tracing::warn;
use vaultex_model::{
    ChunkInfo, ChunkInfoMap, ChunkName, MIN_CHUNK_COPIES, Pmid, ReferenceListEntry,
    VaultChunkInfo, WATCH_LIST_CAPACITY, WaitingListEntry, WatchListEntry, id_checksum,
};

use crate::error::{Result, VaultError};
use crate::time::Clock;

/// Why a pending watch-list addition is being abandoned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResetReason {
    StoringFailed,
    PaymentFailed,
    Stale,
}

/// Lazily-enforced liveness windows, in epoch seconds.
#[derive(Clone, Copy, Debug)]
pub struct ChunkInfoOptions {
    /// How long a reference-list entry counts as an active replica after its
    /// last liveness signal.
    pub ref_active_timeout_secs: u32,
    /// How long a waiting-list entry may sit before it is considered stale.
    pub watcher_pending_timeout_secs: u32,
}

impl Default for ChunkInfoOptions {
    fn default() -> Self {
        Self {
            ref_active_timeout_secs: 24 * 60 * 60,
            watcher_pending_timeout_secs: 60 * 60,
        }
    }
}

/// What a would-be watcher must still deliver before it can commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WatchListPrerequisites {
    /// Replica uploads the client must perform.
    pub required_references: i32,
    /// Payment units the client must provide.
    pub required_payments: i32,
}

/// Result of a commit attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitOutcome {
    pub committed: bool,
    /// Previous occupant of a reclaimed reserve-payout slot, owed one unit.
    pub creditor: Option<Pmid>,
    /// Unconsumed payment units to hand back to the committing client.
    pub refunds: i32,
}

impl CommitOutcome {
    fn not_committed() -> Self {
        Self {
            committed: false,
            creditor: None,
            refunds: 0,
        }
    }
}

/// Result of removing a watcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemovalOutcome {
    pub chunk_size: u64,
    /// Pmids owed one refund unit each (repeats allowed).
    pub creditors: Vec<Pmid>,
    /// Replica holders whose copies can be reclaimed.
    pub references: Vec<Pmid>,
}

struct ChunkInfoState {
    started: bool,
    chunk_infos: BTreeMap<ChunkName, ChunkInfo>,
}

/// Per-chunk lifecycle ledger. Linearizable; every public method takes the
/// instance mutex for its full duration.
pub struct ChunkInfoHandler {
    clock: Arc<dyn Clock>,
    options: ChunkInfoOptions,
    inner: Mutex<ChunkInfoState>,
}

impl std::fmt::Debug for ChunkInfoHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("ChunkInfoHandler");
        debug.field("options", &self.options);
        match self.inner.try_lock() {
            Ok(state) => {
                debug
                    .field("started", &state.started)
                    .field("chunk_count", &state.chunk_infos.len());
            }
            Err(_) => {
                debug.field("state", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl ChunkInfoHandler {
    pub fn new(clock: Arc<dyn Clock>, options: ChunkInfoOptions, started: bool) -> Self {
        Self {
            clock,
            options,
            inner: Mutex::new(ChunkInfoState {
                started,
                chunk_infos: BTreeMap::new(),
            }),
        }
    }

    pub fn set_started(&self, started: bool) {
        self.lock().started = started;
    }

    /// Register `pmid`'s intent to watch `chunk` and report what it still
    /// owes. Creates the chunk record lazily; the declared size must be
    /// non-zero and must match any previously recorded size.
    pub fn prepare_add_to_watch_list(
        &self,
        chunk: &ChunkName,
        pmid: &Pmid,
        chunk_size: u64,
    ) -> Result<WatchListPrerequisites> {
        let now = self.clock.epoch_seconds();
        let ref_timeout = self.options.ref_active_timeout_secs;
        let mut state = self.lock();
        if !state.started {
            return Err(VaultError::HandlerNotStarted);
        }
        if chunk_size == 0 {
            return Err(VaultError::InvalidSize);
        }
        if let Some(ci) = state.chunk_infos.get(chunk)
            && ci.chunk_size != 0
            && ci.chunk_size != chunk_size
        {
            return Err(VaultError::InvalidSize);
        }

        let ci = state.chunk_infos.entry(*chunk).or_default();
        if ci.chunk_size == 0 {
            ci.chunk_size = chunk_size;
        }

        let mut entry = WaitingListEntry {
            pmid: *pmid,
            creation_time: now,
            storing_done: false,
            payments_done: false,
            requested_payments: 0,
        };

        // Only request uploads if this pmid is not already mid-handshake.
        let mut required_references = 0;
        if ci.waiting_list.iter().any(|w| w.pmid == *pmid) {
            entry.storing_done = true;
        } else {
            let active = active_references(ci, now, ref_timeout) as i32;
            required_references = ((MIN_CHUNK_COPIES as i32 - active).max(0) + 1) / 2;
        }

        let occupied = ci.occupied_slots();
        if occupied == 0 {
            entry.requested_payments = MIN_CHUNK_COPIES as i32;
        } else if occupied < WATCH_LIST_CAPACITY {
            entry.requested_payments = 1;
        } else {
            entry.payments_done = true;
        }
        let required_payments = entry.requested_payments;

        ci.waiting_list.push(entry);

        Ok(WatchListPrerequisites {
            required_references,
            required_payments,
        })
    }

    /// Promote a fully prepared waiting entry (both storing and payments
    /// done) into the watch list. Not an error when nothing is ready to
    /// commit; the outcome says so.
    pub fn try_commit_to_watch_list(&self, chunk: &ChunkName, pmid: &Pmid) -> Result<CommitOutcome> {
        let mut state = self.lock();
        if !state.started {
            return Err(VaultError::HandlerNotStarted);
        }
        let Some(ci) = state.chunk_infos.get_mut(chunk) else {
            return Ok(CommitOutcome::not_committed());
        };

        let Some(wait_idx) = ci
            .waiting_list
            .iter()
            .position(|w| w.pmid == *pmid && w.storing_done && w.payments_done)
        else {
            return Ok(CommitOutcome::not_committed());
        };

        let requested = ci.waiting_list[wait_idx].requested_payments;
        let mut creditor = None;
        let mut refunds = 0;

        if requested > 0 {
            let slot = ci
                .watch_list
                .iter()
                .take(MIN_CHUNK_COPIES)
                .position(|e| e.can_delete);
            let consumed = if let Some(i) = slot {
                // Reclaim the deletable slot and pay its owner directly.
                creditor = Some(ci.watch_list[i].pmid);
                ci.watch_list[i] = WatchListEntry {
                    pmid: *pmid,
                    can_delete: false,
                };
                1
            } else if ci.watch_list.len() < WATCH_LIST_CAPACITY {
                ci.watch_list.push(WatchListEntry {
                    pmid: *pmid,
                    can_delete: false,
                });
                if ci.watch_list.len() == 1 {
                    // First watcher pays for every mandatory copy and holds
                    // the remaining slots as deletable placeholders.
                    for _ in 0..MIN_CHUNK_COPIES - 1 {
                        ci.watch_list.push(WatchListEntry {
                            pmid: *pmid,
                            can_delete: true,
                        });
                    }
                    MIN_CHUNK_COPIES as i32
                } else {
                    1
                }
            } else {
                0
            };
            refunds = requested - consumed;
        }

        ci.watcher_count += 1;
        ci.watcher_checksum = ci.watcher_checksum.wrapping_add(id_checksum(pmid.id()));
        ci.waiting_list.remove(wait_idx);

        Ok(CommitOutcome {
            committed: true,
            creditor,
            refunds,
        })
    }

    /// Abandon a pending addition. When that removes the chunk's last trace
    /// of liveness, every watch-list occupant is refunded and every replica
    /// released; the returned lists carry the obligations.
    pub fn reset_add_to_watch_list(
        &self,
        chunk: &ChunkName,
        pmid: &Pmid,
        reason: ResetReason,
    ) -> Result<(Vec<Pmid>, Vec<Pmid>)> {
        let mut state = self.lock();
        if !state.started {
            return Err(VaultError::HandlerNotStarted);
        }
        let Some(ci) = state.chunk_infos.get_mut(chunk) else {
            return Ok((Vec::new(), Vec::new()));
        };

        let matches = |w: &WaitingListEntry| {
            w.pmid == *pmid
                && match reason {
                    ResetReason::PaymentFailed => !w.payments_done,
                    ResetReason::StoringFailed => !w.storing_done,
                    ResetReason::Stale => true,
                }
        };
        if let Some(idx) = ci.waiting_list.iter().position(matches) {
            ci.waiting_list.remove(idx);
        }

        if ci.has_watchers() {
            return Ok((Vec::new(), Vec::new()));
        }

        // No one is watching any more: recompense everyone and implode.
        let creditors = ci.watch_list.iter().map(|e| e.pmid).collect();
        let references = ci.reference_list.iter().map(|e| e.pmid).collect();
        state.chunk_infos.remove(chunk);
        Ok((creditors, references))
    }

    /// Remove `pmid` from the watch list, promoting a reserve into freed
    /// mandatory slots where possible.
    ///
    /// When `pmid` is not actually listed the call is a conservative no-op
    /// on the list itself: the checksum is still reduced by `pmid`'s
    /// contribution, and the watcher count only when it exceeds the
    /// remaining occupied slots. No refund is ever issued for an unlisted
    /// pmid.
    pub fn remove_from_watch_list(&self, chunk: &ChunkName, pmid: &Pmid) -> Result<RemovalOutcome> {
        let mut state = self.lock();
        if !state.started {
            return Err(VaultError::HandlerNotStarted);
        }
        if !state
            .chunk_infos
            .get(chunk)
            .is_some_and(ChunkInfo::has_watchers)
        {
            return Err(VaultError::InvalidName);
        }
        let Some(ci) = state.chunk_infos.get_mut(chunk) else {
            return Err(VaultError::InvalidName);
        };
        let chunk_size = ci.chunk_size;

        // Locate the watcher and the first promotable reserve entry.
        let mut watch_idx = None;
        let mut reserve_idx = None;
        let mut occupied = 0u64;
        for (i, e) in ci.watch_list.iter().enumerate() {
            if e.can_delete {
                continue;
            }
            occupied += 1;
            if watch_idx.is_none() && e.pmid == *pmid {
                watch_idx = Some(i);
            } else if reserve_idx.is_none() && i >= MIN_CHUNK_COPIES {
                reserve_idx = Some(i);
            }
        }

        let mut creditors = Vec::new();
        let mut references = Vec::new();

        match watch_idx {
            None => {
                // Checksum says this pmid was a watcher but the list
                // disagrees: someone has been tampering. Keep the books
                // conservative and do nothing else.
                warn!(chunk = %chunk, "watch list and watcher checksum disagree");
                if ci.watcher_count > occupied {
                    ci.watcher_count -= 1;
                }
                ci.watcher_checksum = ci.watcher_checksum.wrapping_sub(id_checksum(pmid.id()));
            }
            Some(idx) => {
                ci.watcher_count = ci.watcher_count.saturating_sub(1);
                ci.watcher_checksum = ci.watcher_checksum.wrapping_sub(id_checksum(pmid.id()));

                if idx < MIN_CHUNK_COPIES {
                    if let Some(reserve) = reserve_idx {
                        // Promote the reserve into the freed slot; the
                        // leaving watcher gets its unit back.
                        creditors.push(*pmid);
                        ci.watch_list[idx] = ci.watch_list[reserve].clone();
                        ci.watch_list.remove(reserve);
                    } else {
                        ci.watch_list[idx].can_delete = true;
                        if occupied == 1 {
                            ci.watcher_count = 0;
                            if !ci.has_watchers() {
                                creditors.extend(ci.watch_list.iter().map(|e| e.pmid));
                                references.extend(ci.reference_list.iter().map(|e| e.pmid));
                                state.chunk_infos.remove(chunk);
                            }
                        }
                    }
                } else {
                    // Pure reserve entry, just drop it and refund.
                    creditors.push(*pmid);
                    ci.watch_list.remove(idx);
                }
            }
        }

        Ok(RemovalOutcome {
            chunk_size,
            creditors,
            references,
        })
    }

    /// Record (or refresh) `pmid`'s claim to hold a replica of `chunk`.
    pub fn add_to_reference_list(
        &self,
        chunk: &ChunkName,
        pmid: &Pmid,
        chunk_size: u64,
    ) -> Result<()> {
        let now = self.clock.epoch_seconds();
        let mut state = self.lock();
        if !state.started {
            return Err(VaultError::HandlerNotStarted);
        }
        if !state
            .chunk_infos
            .get(chunk)
            .is_some_and(ChunkInfo::has_watchers)
        {
            return Err(VaultError::InvalidName);
        }
        let Some(ci) = state.chunk_infos.get_mut(chunk) else {
            return Err(VaultError::InvalidName);
        };
        if ci.chunk_size != chunk_size {
            return Err(VaultError::InvalidSize);
        }

        if let Some(existing) = ci.reference_list.iter_mut().find(|e| e.pmid == *pmid) {
            existing.last_seen = now;
        } else {
            ci.reference_list.push(ReferenceListEntry {
                pmid: *pmid,
                last_seen: now,
            });
        }
        Ok(())
    }

    /// Drop `pmid`'s replica claim. Refuses to delete the last remaining
    /// reference while the chunk still has watchers.
    pub fn remove_from_reference_list(&self, chunk: &ChunkName, pmid: &Pmid) -> Result<u64> {
        let mut state = self.lock();
        if !state.started {
            return Err(VaultError::HandlerNotStarted);
        }
        let has_watchers = state
            .chunk_infos
            .get(chunk)
            .is_some_and(ChunkInfo::has_watchers);
        let Some(ci) = state.chunk_infos.get_mut(chunk) else {
            return Err(VaultError::InvalidName);
        };
        if ci.reference_list.len() == 1 && has_watchers {
            return Err(VaultError::CannotDelete);
        }
        let Some(idx) = ci.reference_list.iter().position(|e| e.pmid == *pmid) else {
            return Err(VaultError::CannotDelete);
        };
        ci.reference_list.remove(idx);
        Ok(ci.chunk_size)
    }

    /// Replica holders with a liveness signal inside the active window.
    pub fn get_active_references(&self, chunk: &ChunkName) -> Result<Vec<Pmid>> {
        let now = self.clock.epoch_seconds();
        let timeout = self.options.ref_active_timeout_secs;
        let state = self.lock();
        if !state.started {
            return Err(VaultError::HandlerNotStarted);
        }
        let Some(ci) = state.chunk_infos.get(chunk) else {
            return Err(VaultError::InvalidName);
        };
        if ci.watcher_count == 0 && ci.watcher_checksum == 0 {
            return Err(VaultError::NoActiveWatchers);
        }
        Ok(ci
            .reference_list
            .iter()
            .filter(|e| e.last_seen.saturating_add(timeout) >= now)
            .map(|e| e.pmid)
            .collect())
    }

    /// Mark the first incomplete waiting entry for `pmid` as stored.
    pub fn set_storing_done(&self, chunk: &ChunkName, pmid: &Pmid) {
        let mut state = self.lock();
        if !state.started {
            return;
        }
        if let Some(ci) = state.chunk_infos.get_mut(chunk)
            && let Some(entry) = ci
                .waiting_list
                .iter_mut()
                .find(|w| w.pmid == *pmid && !w.storing_done)
        {
            entry.storing_done = true;
        }
    }

    /// Mark the first incomplete waiting entry for `pmid` as paid.
    pub fn set_payments_done(&self, chunk: &ChunkName, pmid: &Pmid) {
        let mut state = self.lock();
        if !state.started {
            return;
        }
        if let Some(ci) = state.chunk_infos.get_mut(chunk)
            && let Some(entry) = ci
                .waiting_list
                .iter_mut()
                .find(|w| w.pmid == *pmid && !w.payments_done)
        {
            entry.payments_done = true;
        }
    }

    /// Waiting entries that have outlived the pending window, across all
    /// chunks.
    pub fn get_stale_waiting_list_entries(&self) -> Vec<(ChunkName, Pmid)> {
        let now = self.clock.epoch_seconds();
        let timeout = self.options.watcher_pending_timeout_secs;
        let state = self.lock();
        if !state.started {
            return Vec::new();
        }
        let mut entries = Vec::new();
        for (name, ci) in &state.chunk_infos {
            for w in &ci.waiting_list {
                if w.creation_time.saturating_add(timeout) < now {
                    entries.push((*name, w.pmid));
                }
            }
        }
        entries
    }

    /// Whether any client still gives `chunk` a reason to exist.
    pub fn has_watchers(&self, chunk: &ChunkName) -> bool {
        self.lock()
            .chunk_infos
            .get(chunk)
            .is_some_and(ChunkInfo::has_watchers)
    }

    /// Copy of the record for `chunk`.
    pub fn get_chunk_info(&self, chunk: &ChunkName) -> Result<ChunkInfo> {
        let state = self.lock();
        if !state.started {
            return Err(VaultError::HandlerNotStarted);
        }
        state
            .chunk_infos
            .get(chunk)
            .cloned()
            .ok_or(VaultError::InvalidName)
    }

    /// Insert a record received from a peer vault; refuses to overwrite.
    pub fn insert_chunk_info(&self, record: VaultChunkInfo) -> Result<()> {
        let mut state = self.lock();
        if !state.started {
            return Err(VaultError::HandlerNotStarted);
        }
        let (name, info) = record.into_parts();
        if state.chunk_infos.contains_key(&name) {
            return Err(VaultError::ChunkInfoExists);
        }
        state.chunk_infos.insert(name, info);
        Ok(())
    }

    /// Serialize the full store to its canonical framed form, records
    /// ordered by chunk name.
    pub fn put_map_to_bytes(&self) -> Result<Vec<u8>> {
        let map = {
            let state = self.lock();
            ChunkInfoMap {
                vault_chunk_infos: state
                    .chunk_infos
                    .iter()
                    .map(|(name, info)| VaultChunkInfo::new(*name, info.clone()))
                    .collect(),
            }
        };
        rkyv::to_bytes::<rancor::Error>(&map)
            .map(|bytes| bytes.to_vec())
            .map_err(|_| VaultError::SerialisationError)
    }

    /// Restore records from a serialized map and mark the handler started.
    /// Existing records with the same name are left in place.
    pub fn get_map_from_bytes(&self, bytes: &[u8]) -> Result<()> {
        let map: ChunkInfoMap = rkyv::from_bytes::<_, rancor::Error>(bytes)
            .map_err(|_| VaultError::SerialisationError)?;
        let mut state = self.lock();
        for record in map.vault_chunk_infos {
            let (name, info) = record.into_parts();
            state.chunk_infos.entry(name).or_insert(info);
        }
        state.started = true;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ChunkInfoState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn active_references(ci: &ChunkInfo, now: u32, timeout: u32) -> usize {
    ci.reference_list
        .iter()
        .filter(|e| e.last_seen.saturating_add(timeout) >= now)
        .count()
}
