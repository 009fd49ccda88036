//! Shared configuration library for Vaultex.
//!
//! Centralizes config loading and validation for vault processes: defaults,
//! an optional TOML file, then `VAULTEX_`-prefixed environment overrides,
//! in that order. The loaded models convert into the option structs the
//! core handlers consume, so there is a single source of truth for every
//! tunable.

pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{ConfigLoadError, load, load_from_file};
pub use models::{
    AccountConfig, ChunkConfig, NetworkConfig, StoreConfig, SyncConfig, VaultexConfig,
};
pub use validation::{ConfigGuardRailError, ConfigWarning, validate};
