//! Layered configuration loading: defaults, optional TOML file, then
//! `VAULTEX_`-prefixed environment overrides.

use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::models::VaultexConfig;

#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("failed to read or parse configuration: {0}")]
    Invalid(#[from] config::ConfigError),
}

/// Load configuration from an optional file plus the environment.
///
/// Environment variables use double underscores as section separators, e.g.
/// `VAULTEX_CHUNK__REF_ACTIVE_TIMEOUT_SECS=7200`.
pub fn load(file: Option<&Path>) -> Result<VaultexConfig, ConfigLoadError> {
    let mut builder = config::Config::builder();
    if let Some(path) = file {
        debug!(path = %path.display(), "loading configuration file");
        builder = builder.add_source(config::File::from(path).required(true));
    }
    let loaded = builder
        .add_source(
            config::Environment::with_prefix("VAULTEX")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    let config = deserialize_config(loaded)?;
    Ok(config)
}

/// Load configuration from a required file, ignoring the environment.
pub fn load_from_file(path: &Path) -> Result<VaultexConfig, ConfigLoadError> {
    let loaded = config::Config::builder()
        .add_source(config::File::from(path).required(true))
        .build()?;
    let config = deserialize_config(loaded)?;
    Ok(config)
}

fn deserialize_config(
    loaded: config::Config,
) -> Result<VaultexConfig, config::ConfigError> {
    // Missing sections fall back to their serde defaults.
    loaded.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_sources_yield_defaults() {
        let config = load(None).unwrap();
        assert_eq!(config, VaultexConfig::default());
    }

    #[test]
    fn file_values_override_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[chunk]\nref_active_timeout_secs = 7200\n\n[network]\nk = 8\n"
        )
        .unwrap();
        let config = load_from_file(file.path()).unwrap();
        assert_eq!(config.chunk.ref_active_timeout_secs, 7200);
        assert_eq!(config.network.k, 8);
        // Untouched sections keep their defaults.
        assert_eq!(config.account, crate::models::AccountConfig::default());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[chunk]\nnot_a_real_knob = 1\n").unwrap();
        assert!(load_from_file(file.path()).is_err());
    }

    #[test]
    fn missing_required_file_is_an_error() {
        assert!(load_from_file(Path::new("/definitely/not/here.toml")).is_err());
    }
}
