//! Deserializable configuration models and their conversions into the
//! option structs the core handlers take.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use vaultex_core::account::AccountHolderOptions;
use vaultex_core::chunk_info::ChunkInfoOptions;
use vaultex_core::store::ChunkStoreOptions;
use vaultex_core::sync::InfoSynchroniserOptions;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VaultexConfig {
    pub network: NetworkConfig,
    pub chunk: ChunkConfig,
    pub account: AccountConfig,
    pub sync: SyncConfig,
    pub store: StoreConfig,
}

impl Default for VaultexConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            chunk: ChunkConfig::default(),
            account: AccountConfig::default(),
            sync: SyncConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    /// Kademlia group size used for proximity decisions.
    pub k: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { k: 16 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChunkConfig {
    /// Seconds a replica reference stays "active" after a liveness signal.
    pub ref_active_timeout_secs: u32,
    /// Seconds a waiting-list entry may sit before it is stale.
    pub watcher_pending_timeout_secs: u32,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        let defaults = ChunkInfoOptions::default();
        Self {
            ref_active_timeout_secs: defaults.ref_active_timeout_secs,
            watcher_pending_timeout_secs: defaults.watcher_pending_timeout_secs,
        }
    }
}

impl From<ChunkConfig> for ChunkInfoOptions {
    fn from(config: ChunkConfig) -> Self {
        Self {
            ref_active_timeout_secs: config.ref_active_timeout_secs,
            watcher_pending_timeout_secs: config.watcher_pending_timeout_secs,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AccountConfig {
    pub max_update_interval_secs: u32,
    pub max_failed_nodes: usize,
    pub max_fails_per_node: usize,
}

impl Default for AccountConfig {
    fn default() -> Self {
        let defaults = AccountHolderOptions::default();
        Self {
            max_update_interval_secs: defaults.max_update_interval_secs,
            max_failed_nodes: defaults.max_failed_nodes,
            max_fails_per_node: defaults.max_fails_per_node,
        }
    }
}

impl From<AccountConfig> for AccountHolderOptions {
    fn from(config: AccountConfig) -> Self {
        Self {
            max_update_interval_secs: config.max_update_interval_secs,
            max_failed_nodes: config.max_failed_nodes,
            max_fails_per_node: config.max_fails_per_node,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Seconds an info-synchroniser entry suppresses repeat decisions.
    pub info_entry_lifespan_secs: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            info_entry_lifespan_secs: InfoSynchroniserOptions::default().entry_lifespan_secs,
        }
    }
}

impl SyncConfig {
    pub fn to_options(&self, k: usize) -> InfoSynchroniserOptions {
        InfoSynchroniserOptions {
            k,
            entry_lifespan_secs: self.info_entry_lifespan_secs,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub root_dir: PathBuf,
    pub capacity_bytes: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("chunkstore"),
            capacity_bytes: 10 * 1024 * 1024 * 1024,
        }
    }
}

impl From<StoreConfig> for ChunkStoreOptions {
    fn from(config: StoreConfig) -> Self {
        Self {
            root_dir: config.root_dir,
            capacity_bytes: config.capacity_bytes,
        }
    }
}
