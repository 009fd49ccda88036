//! Order-independent identifier checksum.
//!
//! The watch-list tamper detector keeps a running sum of per-watcher
//! checksums. Addition commutes, so the fingerprint of a watcher set does
//! not depend on the order entries were added or removed, and it can be
//! maintained incrementally with wrapping arithmetic.

use crate::ids::{ID_SIZE, Id};

/// The 8 least-significant bytes of `id` interpreted as a little-endian u64.
pub fn id_checksum(id: &Id) -> u64 {
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&id.as_bytes()[ID_SIZE - 8..]);
    u64::from_le_bytes(tail)
}
