use vaultex_model::Id;

use super::Contact;

/// Synchronous view of the local routing table.
///
/// Implementations must be safe for concurrent readers and consistent
/// within a single call; the engine never caches across calls.
#[cfg_attr(test, mockall::automock)]
pub trait RoutingTable: Send + Sync {
    /// At most `count` contacts ordered by XOR distance to `target`. The
    /// local node itself is never part of the table.
    fn closest_contacts(&self, target: &Id, count: usize) -> Vec<Contact>;
}
