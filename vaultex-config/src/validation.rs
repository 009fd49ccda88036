//! Guard rails over loaded configuration.
//!
//! Hard errors are misconfigurations the handlers cannot operate under;
//! warnings flag values that are legal but probably not what the operator
//! meant.

use thiserror::Error;
use tracing::warn;

use crate::models::VaultexConfig;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigGuardRailError {
    #[error("network.k must be at least 1")]
    ZeroGroupSize,

    #[error("chunk timeouts must be positive")]
    ZeroChunkTimeout,

    #[error("sync.info_entry_lifespan_secs must be positive")]
    ZeroEntryLifespan,

    #[error("account.max_fails_per_node must be at least 1")]
    ZeroFailThreshold,

    #[error("store.capacity_bytes must be positive")]
    ZeroStoreCapacity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// Store capacity below one mebibyte will reject most chunks.
    TinyStoreCapacity,
    /// A reference-liveness window shorter than the waiting-list window
    /// makes replicas expire before their watchers do.
    RefWindowShorterThanPendingWindow,
}

/// Check `config`, returning warnings for odd-but-legal settings.
pub fn validate(config: &VaultexConfig) -> Result<Vec<ConfigWarning>, ConfigGuardRailError> {
    if config.network.k == 0 {
        return Err(ConfigGuardRailError::ZeroGroupSize);
    }
    if config.chunk.ref_active_timeout_secs == 0 || config.chunk.watcher_pending_timeout_secs == 0 {
        return Err(ConfigGuardRailError::ZeroChunkTimeout);
    }
    if config.sync.info_entry_lifespan_secs == 0 {
        return Err(ConfigGuardRailError::ZeroEntryLifespan);
    }
    if config.account.max_fails_per_node == 0 {
        return Err(ConfigGuardRailError::ZeroFailThreshold);
    }
    if config.store.capacity_bytes == 0 {
        return Err(ConfigGuardRailError::ZeroStoreCapacity);
    }

    let mut warnings = Vec::new();
    if config.store.capacity_bytes < 1024 * 1024 {
        warnings.push(ConfigWarning::TinyStoreCapacity);
    }
    if config.chunk.ref_active_timeout_secs < config.chunk.watcher_pending_timeout_secs {
        warnings.push(ConfigWarning::RefWindowShorterThanPendingWindow);
    }
    for warning in &warnings {
        warn!(?warning, "configuration warning");
    }
    Ok(warnings)
}
