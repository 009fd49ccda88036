//! Core engine for the Vaultex storage network.
//!
//! Vaults here do three jobs: account for which clients want a chunk kept
//! alive and who gets paid for it ([`chunk_info`]), drive multi-stage
//! client operations through a cancellable task tree ([`tasks`]), and keep
//! vault-side ledgers of in-flight store/IOU handshakes ([`pending`]).
//! Around those sit the responsibility arbiter for post-churn info
//! transfer ([`sync`]), the account-holder contact group ([`account`]) and
//! the local replica store ([`store`]).
//!
//! The engine is transport-agnostic: everything it needs from the overlay
//! arrives through the narrow capability traits in [`net`], [`hash`] and
//! [`time`].

pub mod account;
pub mod chunk_info;
pub mod error;
pub mod hash;
pub mod net;
pub mod pending;
pub mod store;
pub mod sync;
pub mod tasks;
pub mod time;

pub use account::{AccountHolderGroup, AccountHolderOptions, GroupCallback};
pub use chunk_info::{
    ChunkInfoHandler, ChunkInfoOptions, CommitOutcome, RemovalOutcome, ResetReason,
    WatchListPrerequisites,
};
pub use error::{Result, ReturnCode, VaultError};
pub use hash::{IdHasher, Sha512IdHasher, account_name};
pub use net::{Contact, KadOps, RoutingTable, contact_within_closest};
pub use pending::{OperationStatus, PendingOperation, PendingOperations};
pub use store::{ChunkStore, ChunkStoreError, ChunkStoreOptions};
pub use sync::{InfoSynchroniser, InfoSynchroniserOptions};
pub use tasks::{TaskCallback, TaskKind, TaskStatus, TasksHandler};
pub use time::{Clock, FrozenClock, SystemClock};
