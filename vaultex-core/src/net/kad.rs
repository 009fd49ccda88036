use async_trait::async_trait;
use vaultex_model::Id;

use super::Contact;
use crate::error::Result;

/// Asynchronous Kademlia lookup capability.
#[async_trait]
pub trait KadOps: Send + Sync {
    /// Network-wide "find the k closest nodes to `target`" lookup. Failure
    /// kinds map onto the `FindNodes*` error variants.
    async fn find_k_closest(&self, target: &Id) -> Result<Vec<Contact>>;
}

/// Whether `contact` sits within the given closest-contacts set for
/// `target`, i.e. is closer to `target` than at least one member.
///
/// An empty set means the local table had nothing to compare against, which
/// is never grounds for claiming responsibility.
pub fn contact_within_closest(target: &Id, contact: &Contact, closest: &[Contact]) -> bool {
    let own_distance = contact.pmid.id().distance_to(target);
    closest
        .iter()
        .any(|c| own_distance < c.pmid.id().distance_to(target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultex_model::{ID_SIZE, Pmid};

    fn contact(first_byte: u8) -> Contact {
        let mut bytes = [0u8; ID_SIZE];
        bytes[0] = first_byte;
        Contact::new(Pmid::new(Id::from_bytes(bytes)))
    }

    #[test]
    fn closer_contact_is_within() {
        let target = Id::from_bytes([0u8; ID_SIZE]);
        let near = contact(0x01);
        let far = contact(0xf0);
        assert!(contact_within_closest(&target, &near, &[far.clone()]));
        assert!(!contact_within_closest(&target, &far, &[near]));
    }

    #[test]
    fn empty_set_is_never_within() {
        let target = Id::from_bytes([0u8; ID_SIZE]);
        assert!(!contact_within_closest(&target, &contact(1), &[]));
    }
}
