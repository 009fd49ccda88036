//! Fixed 512-bit digest capability.

use std::fmt;

use sha2::{Digest, Sha512};
use vaultex_model::{AccountName, Id, Pmid};

/// Suffix mixed into a pmid to derive the name its account record lives
/// under.
pub const ACCOUNT_SUFFIX: &[u8] = b"account";

pub trait IdHasher: Send + Sync + fmt::Debug {
    fn digest(&self, bytes: &[u8]) -> Id;
}

/// SHA-512 digest, the network's canonical identifier hash.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha512IdHasher;

impl IdHasher for Sha512IdHasher {
    fn digest(&self, bytes: &[u8]) -> Id {
        Id::from_bytes(Sha512::digest(bytes).into())
    }
}

/// Name of the account record for `pmid`: `H(pmid ‖ "account")`.
pub fn account_name(hasher: &dyn IdHasher, pmid: &Pmid) -> AccountName {
    let mut buf = Vec::with_capacity(pmid.as_bytes().len() + ACCOUNT_SUFFIX.len());
    buf.extend_from_slice(pmid.as_bytes());
    buf.extend_from_slice(ACCOUNT_SUFFIX);
    AccountName::new(hasher.digest(&buf))
}
