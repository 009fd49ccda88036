//! Narrow capability interfaces onto the Kademlia overlay.
//!
//! The engine never talks to the wire itself; it consumes a synchronous view
//! of the local routing table and one asynchronous "find the k closest
//! nodes" lookup.

mod contact;
mod kad;
mod routing;

pub use contact::Contact;
pub use kad::{KadOps, contact_within_closest};
pub use routing::RoutingTable;

#[cfg(test)]
pub(crate) use routing::MockRoutingTable;
