//! Per-chunk accounting records.
//!
//! Each chunk known to a vault has exactly one [`ChunkInfo`]: the pending
//! would-be watchers (waiting list), the committed watchers (watch list,
//! real slots first then reserve), and the peers claiming to hold a replica
//! (reference list). [`VaultChunkInfo`] is the framed persistence form of
//! one record; [`ChunkInfoMap`] is the whole-store archive.

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};

use crate::ids::{ChunkName, Pmid};

/// Number of mandatory replicas; the first this many watch-list slots are
/// the "real" watchers.
pub const MIN_CHUNK_COPIES: usize = 4;

/// Reserve slots beyond the mandatory copies. Not pinned by the protocol;
/// the watch-list capacity below is the only hard constraint.
pub const MAX_RESERVE_WATCH_LIST_ENTRIES: usize = 4;

/// Upper bound on the watch list: real slots plus reserve.
pub const WATCH_LIST_CAPACITY: usize = MIN_CHUNK_COPIES + MAX_RESERVE_WATCH_LIST_ENTRIES;

/// A client that has asked to watch a chunk but has not completed the
/// store/payment handshake yet.
#[derive(
    Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Archive, RkyvSerialize, RkyvDeserialize,
)]
#[rkyv(derive(Debug))]
pub struct WaitingListEntry {
    pub pmid: Pmid,
    /// Epoch seconds at creation, for staleness pruning.
    pub creation_time: u32,
    pub storing_done: bool,
    pub payments_done: bool,
    /// Payments requested from this client at prepare time; the unconsumed
    /// remainder is refunded on commit.
    pub requested_payments: i32,
}

/// A committed watch-list slot. `can_delete` marks a slot whose occupant is
/// owed a refund; it still counts towards quota but not towards the watcher
/// count.
#[derive(
    Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Archive, RkyvSerialize, RkyvDeserialize,
)]
#[rkyv(derive(Debug))]
pub struct WatchListEntry {
    pub pmid: Pmid,
    pub can_delete: bool,
}

/// A vault peer claiming to hold a replica of the chunk.
#[derive(
    Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Archive, RkyvSerialize, RkyvDeserialize,
)]
#[rkyv(derive(Debug))]
pub struct ReferenceListEntry {
    pub pmid: Pmid,
    /// Epoch seconds of the last liveness signal from this holder.
    pub last_seen: u32,
}

/// The complete accounting state of one chunk.
#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Archive,
    RkyvSerialize,
    RkyvDeserialize,
)]
#[rkyv(derive(Debug))]
pub struct ChunkInfo {
    pub waiting_list: Vec<WaitingListEntry>,
    pub watch_list: Vec<WatchListEntry>,
    pub reference_list: Vec<ReferenceListEntry>,
    /// Successful commits minus confirmed removals; never exceeds the count
    /// of non-deletable watch-list entries.
    pub watcher_count: u64,
    /// Wrapping sum of `id_checksum(pmid)` over current watchers.
    pub watcher_checksum: u64,
    /// Declared size; zero until first set, immutable afterwards.
    pub chunk_size: u64,
}

impl ChunkInfo {
    /// Non-deletable watch-list entries, i.e. the slots that still count
    /// towards quota.
    pub fn occupied_slots(&self) -> usize {
        self.watch_list.iter().filter(|e| !e.can_delete).count()
    }

    /// Whether any client still gives this chunk a reason to exist.
    pub fn has_watchers(&self) -> bool {
        !self.waiting_list.is_empty() || self.watcher_count != 0 || self.watcher_checksum != 0
    }
}

/// One framed persistence record: a chunk name plus its accounting state.
/// Field order fixes the on-wire layout: waiting entries, watch entries,
/// reference entries, then the summary counters.
#[derive(
    Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Archive, RkyvSerialize, RkyvDeserialize,
)]
#[rkyv(derive(Debug))]
pub struct VaultChunkInfo {
    pub chunk_name: ChunkName,
    pub waiting_list: Vec<WaitingListEntry>,
    pub watch_list: Vec<WatchListEntry>,
    pub reference_list: Vec<ReferenceListEntry>,
    pub watcher_count: u64,
    pub watcher_checksum: u64,
    pub chunk_size: u64,
}

impl VaultChunkInfo {
    pub fn new(chunk_name: ChunkName, info: ChunkInfo) -> Self {
        Self {
            chunk_name,
            waiting_list: info.waiting_list,
            watch_list: info.watch_list,
            reference_list: info.reference_list,
            watcher_count: info.watcher_count,
            watcher_checksum: info.watcher_checksum,
            chunk_size: info.chunk_size,
        }
    }

    pub fn into_parts(self) -> (ChunkName, ChunkInfo) {
        (
            self.chunk_name,
            ChunkInfo {
                waiting_list: self.waiting_list,
                watch_list: self.watch_list,
                reference_list: self.reference_list,
                watcher_count: self.watcher_count,
                watcher_checksum: self.watcher_checksum,
                chunk_size: self.chunk_size,
            },
        )
    }
}

/// Archive of a handler's entire chunk-info store, records sorted by chunk
/// name so the encoding is canonical.
#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Archive,
    RkyvSerialize,
    RkyvDeserialize,
)]
#[rkyv(derive(Debug))]
pub struct ChunkInfoMap {
    pub vault_chunk_infos: Vec<VaultChunkInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{ID_SIZE, Id};

    fn pmid(seed: u8) -> Pmid {
        Pmid::new(Id::from_bytes([seed; ID_SIZE]))
    }

    fn sample_info() -> ChunkInfo {
        ChunkInfo {
            waiting_list: vec![WaitingListEntry {
                pmid: pmid(1),
                creation_time: 42,
                storing_done: true,
                payments_done: false,
                requested_payments: 4,
            }],
            watch_list: vec![
                WatchListEntry {
                    pmid: pmid(2),
                    can_delete: false,
                },
                WatchListEntry {
                    pmid: pmid(2),
                    can_delete: true,
                },
            ],
            reference_list: vec![ReferenceListEntry {
                pmid: pmid(3),
                last_seen: 99,
            }],
            watcher_count: 1,
            watcher_checksum: 0x0202_0202_0202_0202,
            chunk_size: 123,
        }
    }

    #[test]
    fn occupied_slots_skip_deletable_entries() {
        assert_eq!(sample_info().occupied_slots(), 1);
    }

    #[test]
    fn has_watchers_tracks_all_liveness_sources() {
        let mut info = ChunkInfo::default();
        assert!(!info.has_watchers());
        info.watcher_checksum = 7;
        assert!(info.has_watchers());
    }

    #[test]
    fn vault_record_round_trips_through_parts() {
        let name = ChunkName::new(Id::from_bytes([9; ID_SIZE]));
        let info = sample_info();
        let record = VaultChunkInfo::new(name, info.clone());
        let (name2, info2) = record.into_parts();
        assert_eq!(name, name2);
        assert_eq!(info, info2);
    }

    #[test]
    fn archive_round_trip_is_byte_exact() {
        let map = ChunkInfoMap {
            vault_chunk_infos: vec![VaultChunkInfo::new(
                ChunkName::new(Id::from_bytes([9; ID_SIZE])),
                sample_info(),
            )],
        };
        let bytes = rkyv::to_bytes::<rancor::Error>(&map).unwrap();
        let restored: ChunkInfoMap = rkyv::from_bytes::<_, rancor::Error>(&bytes).unwrap();
        assert_eq!(map, restored);
        let bytes2 = rkyv::to_bytes::<rancor::Error>(&restored).unwrap();
        assert_eq!(bytes.as_slice(), bytes2.as_slice());
    }
}
