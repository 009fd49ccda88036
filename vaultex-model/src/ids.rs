//! Strongly typed identifiers for the storage network.
//!
//! Every name in the network - chunk names, vault pmids, account names - is
//! the output of the same fixed 512-bit digest, so they all share the opaque
//! [`Id`] representation. The newtypes exist to keep the call sites honest
//! about which kind of name they are handling.

use std::fmt;

use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ModelError;

/// Width of every network identifier in bytes (512-bit digest).
pub const ID_SIZE: usize = 64;

/// Opaque 64-byte identifier with lexicographic ordering.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Archive, RkyvSerialize, RkyvDeserialize)]
#[rkyv(derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash))]
pub struct Id([u8; ID_SIZE]);

impl Id {
    pub const fn from_bytes(bytes: [u8; ID_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ModelError> {
        let arr: [u8; ID_SIZE] =
            bytes.try_into().map_err(|_| ModelError::InvalidIdLength {
                expected: ID_SIZE,
                actual: bytes.len(),
            })?;
        Ok(Self(arr))
    }

    pub const fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, ModelError> {
        let bytes = hex::decode(s).map_err(|e| ModelError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// XOR metric distance to `other`; compare results lexicographically.
    pub fn distance_to(&self, other: &Id) -> Id {
        let mut out = [0u8; ID_SIZE];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Id(out)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({}..)", hex::encode(&self.0[..4]))
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

struct IdVisitor;

impl Visitor<'_> for IdVisitor {
    type Value = Id;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "a {}-character hex string", ID_SIZE * 2)
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Id, E> {
        Id::from_hex(value).map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Id, D::Error> {
        deserializer.deserialize_str(IdVisitor)
    }
}

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Serialize,
            Deserialize,
            Archive,
            RkyvSerialize,
            RkyvDeserialize,
        )]
        #[rkyv(derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash))]
        pub struct $name(pub Id);

        impl $name {
            pub const fn new(id: Id) -> Self {
                Self(id)
            }

            pub const fn id(&self) -> &Id {
                &self.0
            }

            pub const fn as_bytes(&self) -> &[u8; ID_SIZE] {
                self.0.as_bytes()
            }
        }

        impl From<Id> for $name {
            fn from(id: Id) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({}..)"), hex::encode(&self.0.as_bytes()[..4]))
            }
        }
    };
}

id_newtype!(
    /// Name of a stored chunk (digest of its contents).
    ChunkName
);
id_newtype!(
    /// Permanent identifier of a vault peer.
    Pmid
);
id_newtype!(
    /// Name under which a peer's account record is held.
    AccountName
);

/// Process-local task identifier handed out by the tasks handler.
///
/// Monotonically increasing and never reused within a process lifetime.
/// Callers treat it as opaque; ordering is an implementation detail of the
/// handler.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(u64);

impl TaskId {
    /// Sentinel meaning "no parent".
    pub const ROOT: TaskId = TaskId(0);

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn is_root(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}
