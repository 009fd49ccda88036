//! Ledger of in-flight store/IOU operations.
//!
//! Rows are keyed by `(status, chunk_name, pmid, chunk_size)` - the composite
//! key is unique and ordered, so partial-key searches are range scans over
//! the same index. Status moves along fixed edges only; every advance
//! re-keys the row and refreshes its timestamp.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;
use vaultex_model::{ChunkName, ID_SIZE, Id, Pmid};

use crate::error::{Result, VaultError};
use crate::time::Clock;

/// Where an operation stands. The first five belong to the storing vault,
/// the next two to a reference holder, the last two to a rank holder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OperationStatus {
    StoreAccepted,
    StoreDone,
    AwaitingIou,
    IouReady,
    IouRankRetrieved,
    IouReceived,
    IouCollected,
    IouRankDelivered,
    IouErased,
}

impl OperationStatus {
    /// The status a row must currently hold to advance into `self`.
    fn advances_from(self) -> Option<OperationStatus> {
        match self {
            OperationStatus::StoreDone => Some(OperationStatus::StoreAccepted),
            OperationStatus::AwaitingIou => Some(OperationStatus::StoreDone),
            OperationStatus::IouReady => Some(OperationStatus::AwaitingIou),
            OperationStatus::IouRankRetrieved => Some(OperationStatus::IouReady),
            OperationStatus::IouCollected => Some(OperationStatus::IouReceived),
            OperationStatus::IouErased => Some(OperationStatus::IouRankDelivered),
            _ => None,
        }
    }
}

/// How the row being advanced into `to` is identified. Once the storing
/// vault is waiting on an IOU it no longer knows which peer will deliver
/// it, so those rows are found by chunk name alone; the holder-side edges
/// know the peer but not the recorded size.
enum AdvanceLookup {
    FullKey,
    ByChunk,
    ByChunkAndPmid,
}

fn advance_lookup(to: OperationStatus) -> AdvanceLookup {
    match to {
        OperationStatus::IouReady | OperationStatus::IouRankRetrieved => AdvanceLookup::ByChunk,
        OperationStatus::IouCollected | OperationStatus::IouErased => AdvanceLookup::ByChunkAndPmid,
        _ => AdvanceLookup::FullKey,
    }
}

/// One in-flight operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub pmid: Pmid,
    pub chunk_name: ChunkName,
    pub chunk_size: u64,
    /// Signed payment promise, opaque to the engine.
    pub iou: Vec<u8>,
    pub rank_authority: Vec<u8>,
    /// Epoch seconds; zero at construction means "stamp on insert".
    pub timestamp: u32,
    pub public_key: Vec<u8>,
    pub status: OperationStatus,
}

impl PendingOperation {
    fn key(&self) -> OpKey {
        (self.status, self.chunk_name, self.pmid, self.chunk_size)
    }
}

type OpKey = (OperationStatus, ChunkName, Pmid, u64);

/// Multi-index ledger of pending operations.
pub struct PendingOperations {
    clock: Arc<dyn Clock>,
    inner: Mutex<BTreeMap<OpKey, PendingOperation>>,
}

impl std::fmt::Debug for PendingOperations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("PendingOperations");
        match self.inner.try_lock() {
            Ok(ops) => {
                debug.field("count", &ops.len());
            }
            Err(_) => {
                debug.field("state", &"<locked>");
            }
        }
        debug.finish()
    }
}

/// Default prune horizon: anything older than a day is forgotten.
pub const DEFAULT_PRUNE_AGE_SECS: u32 = 24 * 60 * 60;

impl PendingOperations {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Insert a new row. A duplicate key fails `OperationExists` but still
    /// refreshes the stored row's timestamp so pruning does not reap a live
    /// retry.
    pub fn add(&self, mut op: PendingOperation) -> Result<()> {
        validate(&op)?;
        if op.timestamp == 0 {
            op.timestamp = self.clock.epoch_seconds();
        }
        let now = self.clock.epoch_seconds();
        let mut ops = self.lock();
        let key = op.key();
        if let Some(existing) = ops.get_mut(&key) {
            debug!(chunk = %op.chunk_name, status = ?op.status, "pending operation already present");
            existing.timestamp = now;
            return Err(VaultError::OperationExists);
        }
        ops.insert(key, op);
        Ok(())
    }

    /// Move a row along one allowed status edge, recording the new iou and
    /// rank authority and refreshing the timestamp.
    pub fn advance(
        &self,
        pmid: &Pmid,
        chunk: &ChunkName,
        chunk_size: u64,
        iou: Vec<u8>,
        rank_authority: Vec<u8>,
        from: OperationStatus,
        to: OperationStatus,
    ) -> Result<()> {
        if to.advances_from() != Some(from) {
            return Err(VaultError::InvalidStatusTransition);
        }
        validate_fields(chunk_size, &iou, &rank_authority, &[], to)?;

        let now = self.clock.epoch_seconds();
        let mut ops = self.lock();
        let key = match advance_lookup(to) {
            AdvanceLookup::ByChunk => first_key_in_range(&ops, chunk_range(from, chunk)),
            AdvanceLookup::ByChunkAndPmid => {
                first_key_in_range(&ops, pmid_range(from, chunk, pmid))
            }
            AdvanceLookup::FullKey => {
                let key = (from, *chunk, *pmid, chunk_size);
                ops.contains_key(&key).then_some(key)
            }
        };
        let Some(key) = key else {
            debug!(chunk = %chunk, status = ?from, "pending operation not found");
            return Err(VaultError::OperationNotFound);
        };
        let Some(mut op) = ops.remove(&key) else {
            return Err(VaultError::OperationNotFound);
        };
        op.status = to;
        op.iou = iou;
        op.rank_authority = rank_authority;
        op.timestamp = now;
        ops.insert(op.key(), op);
        Ok(())
    }

    /// Exists-check: exactly one row must match.
    pub fn find_operation(
        &self,
        pmid: &Pmid,
        chunk: &ChunkName,
        chunk_size: u64,
        status: OperationStatus,
    ) -> Result<()> {
        if chunk_size == 0 {
            return Err(VaultError::OperationNotFound);
        }
        let ops = self.lock();
        if ops.contains_key(&(status, *chunk, *pmid, chunk_size)) {
            Ok(())
        } else {
            Err(VaultError::OperationNotFound)
        }
    }

    /// Size and IOU of the row a reference holder recorded for
    /// `(pmid, chunk)` in `IouReceived`.
    pub fn get_size_and_iou(&self, pmid: &Pmid, chunk: &ChunkName) -> Result<(u64, Vec<u8>)> {
        let ops = self.lock();
        let range = pmid_range(OperationStatus::IouReceived, chunk, pmid);
        ops.range(range)
            .next()
            .map(|(_, op)| (op.chunk_size, op.iou.clone()))
            .ok_or(VaultError::OperationNotFound)
    }

    /// Erase every row older than `cutoff_epoch` (default: now minus 24 h)
    /// and return how many were erased.
    pub fn prune(&self, cutoff_epoch: Option<u32>) -> usize {
        let cutoff = cutoff_epoch
            .unwrap_or_else(|| self.clock.epoch_seconds().saturating_sub(DEFAULT_PRUNE_AGE_SECS));
        let mut ops = self.lock();
        let before = ops.len();
        ops.retain(|_, op| op.timestamp >= cutoff);
        before - ops.len()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<OpKey, PendingOperation>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn first_key_in_range(
    ops: &BTreeMap<OpKey, PendingOperation>,
    range: (Bound<OpKey>, Bound<OpKey>),
) -> Option<OpKey> {
    ops.range(range).next().map(|(key, _)| *key)
}

fn chunk_range(status: OperationStatus, chunk: &ChunkName) -> (Bound<OpKey>, Bound<OpKey>) {
    let min_pmid = Pmid::new(Id::from_bytes([0x00; ID_SIZE]));
    let max_pmid = Pmid::new(Id::from_bytes([0xff; ID_SIZE]));
    (
        Bound::Included((status, *chunk, min_pmid, 0)),
        Bound::Included((status, *chunk, max_pmid, u64::MAX)),
    )
}

fn pmid_range(
    status: OperationStatus,
    chunk: &ChunkName,
    pmid: &Pmid,
) -> (Bound<OpKey>, Bound<OpKey>) {
    (
        Bound::Included((status, *chunk, *pmid, 0)),
        Bound::Included((status, *chunk, *pmid, u64::MAX)),
    )
}

fn validate(op: &PendingOperation) -> Result<()> {
    validate_fields(op.chunk_size, &op.iou, &op.rank_authority, &op.public_key, op.status)
}

/// The per-status parameter-validity table. Each status family rejects with
/// its own code.
fn validate_fields(
    chunk_size: u64,
    iou: &[u8],
    rank_authority: &[u8],
    public_key: &[u8],
    status: OperationStatus,
) -> Result<()> {
    match status {
        OperationStatus::StoreAccepted => {
            if public_key.is_empty()
                || chunk_size == 0
                || !iou.is_empty()
                || !rank_authority.is_empty()
            {
                return Err(VaultError::InvalidStoreOperation);
            }
        }
        OperationStatus::StoreDone => {
            if chunk_size == 0 || !iou.is_empty() || !rank_authority.is_empty() {
                return Err(VaultError::InvalidStoreOperation);
            }
        }
        OperationStatus::AwaitingIou | OperationStatus::IouReady => {}
        OperationStatus::IouRankRetrieved => {
            if iou.is_empty() || rank_authority.is_empty() {
                return Err(VaultError::InvalidStoreOperation);
            }
        }
        OperationStatus::IouReceived => {
            if chunk_size == 0 || iou.is_empty() || !rank_authority.is_empty() {
                return Err(VaultError::InvalidReferenceOperation);
            }
        }
        OperationStatus::IouCollected => {
            if chunk_size != 0 || !iou.is_empty() || !rank_authority.is_empty() {
                return Err(VaultError::InvalidReferenceOperation);
            }
        }
        OperationStatus::IouRankDelivered | OperationStatus::IouErased => {}
    }
    Ok(())
}
