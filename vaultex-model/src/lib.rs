//! Shared domain types for the Vaultex storage network.
//!
//! This crate holds the identifier types, the per-chunk accounting records
//! (waiting/watch/reference lists) and their archived persistence forms.
//! It is deliberately free of I/O and async so every other crate in the
//! workspace can depend on it.

pub mod checksum;
pub mod chunk;
pub mod error;
pub mod ids;

pub use checksum::id_checksum;
pub use chunk::{
    ChunkInfo, ChunkInfoMap, MAX_RESERVE_WATCH_LIST_ENTRIES, MIN_CHUNK_COPIES, ReferenceListEntry,
    VaultChunkInfo, WATCH_LIST_CAPACITY, WaitingListEntry, WatchListEntry,
};
pub use error::ModelError;
pub use ids::{AccountName, ChunkName, ID_SIZE, Id, Pmid, TaskId};
