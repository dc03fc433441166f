// crates/ledger-core/src/config.rs
// ============================================================================
// Module: Configuration
// Description: Loads and layers the harness's runtime configuration.
// Purpose: Give a single source of truth for vault root, `.irrev` location,
//          default actor/surface, and approval policy overrides, loaded from
//          an optional TOML file with environment and CLI-flag overrides.
// Dependencies: serde, toml
// ============================================================================

//! ## Overview
//! [`Config`] resolves to its final values in three layers, lowest priority
//! first: built-in defaults, an optional TOML file, then environment
//! variables, then explicit overrides supplied by the caller (typically
//! parsed CLI flags). Nothing here touches the ledger or content store —
//! this module only decides where they live and who acts by default.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

use crate::risk::RiskClass;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Environment variable overriding the vault root.
pub const VAULT_ROOT_ENV_VAR: &str = "LEDGERGATE_VAULT_ROOT";
/// Environment variable overriding the `.irrev` directory.
pub const IRREV_DIR_ENV_VAR: &str = "LEDGERGATE_IRREV_DIR";
/// Environment variable overriding the default actor.
pub const DEFAULT_ACTOR_ENV_VAR: &str = "LEDGERGATE_DEFAULT_ACTOR";
/// Environment variable overriding the default surface.
pub const DEFAULT_SURFACE_ENV_VAR: &str = "LEDGERGATE_DEFAULT_SURFACE";
/// Maximum accepted size of a config TOML file, in bytes.
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the configuration file failed.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The configuration file exceeded the accepted size limit.
    #[error("config file {0} exceeds the {MAX_CONFIG_FILE_SIZE}-byte limit")]
    TooLarge(PathBuf),
    /// The configuration file was not valid TOML, or did not match the
    /// expected shape.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: Box<toml::de::Error>,
    },
    /// A risk class name in `require_force_ack_for` was not recognized.
    #[error("unknown risk class '{0}' in approval policy override")]
    UnknownRiskClass(String),
    /// The resolved vault root does not exist or is not a directory.
    #[error("vault root {0} does not exist or is not a directory")]
    InvalidVaultRoot(PathBuf),
}

// ============================================================================
// SECTION: On-disk shape
// ============================================================================

/// Shape of the optional `ledgergate.toml` file. Every field is optional;
/// absent fields fall back to [`Config::default`]'s values.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    vault_root: Option<PathBuf>,
    irrev_dir: Option<PathBuf>,
    default_actor: Option<String>,
    default_surface: Option<String>,
    #[serde(default)]
    require_force_ack_for: Option<Vec<String>>,
}

// ============================================================================
// SECTION: Config
// ============================================================================

/// Resolved runtime configuration for a `ledgergate` process.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory of the vault this process governs.
    pub vault_root: PathBuf,
    /// Directory holding `artifact.jsonl` and `content/`, relative to
    /// `vault_root` unless given as an absolute path.
    pub irrev_dir: PathBuf,
    /// Actor string used when the caller does not supply one explicitly.
    pub default_actor: String,
    /// Surface string used when the caller does not supply one explicitly.
    pub default_surface: String,
    /// Risk classes that require an explicit force-ack at approval time.
    pub require_force_ack_for: BTreeSet<RiskClass>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vault_root: PathBuf::from("."),
            irrev_dir: PathBuf::from(".irrev"),
            default_actor: "agent:harness".to_owned(),
            default_surface: "cli".to_owned(),
            require_force_ack_for: BTreeSet::from([RiskClass::MutationDestructive]),
        }
    }
}

/// Explicit overrides supplied by a caller (typically parsed CLI flags),
/// applied after the file and environment layers.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    /// Overrides [`Config::vault_root`].
    pub vault_root: Option<PathBuf>,
    /// Overrides [`Config::irrev_dir`].
    pub irrev_dir: Option<PathBuf>,
    /// Overrides [`Config::default_actor`].
    pub default_actor: Option<String>,
    /// Overrides [`Config::default_surface`].
    pub default_surface: Option<String>,
}

impl Config {
    /// Loads configuration, layering an optional TOML file, environment
    /// variables, and explicit `overrides`, lowest priority first.
    ///
    /// `config_path` is read if given and exists; a missing path is not an
    /// error (the file layer is entirely optional).
    ///
    /// # Errors
    /// Returns [`ConfigError`] if a given config file cannot be read or
    /// parsed, if `require_force_ack_for` names an unrecognized risk class,
    /// or if the resolved vault root does not exist.
    pub fn load(config_path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(path) = config_path {
            if path.exists() {
                config.apply_file(path)?;
            }
        }

        if let Ok(root) = env::var(VAULT_ROOT_ENV_VAR) {
            config.vault_root = PathBuf::from(root);
        }
        if let Ok(dir) = env::var(IRREV_DIR_ENV_VAR) {
            config.irrev_dir = PathBuf::from(dir);
        }
        if let Ok(actor) = env::var(DEFAULT_ACTOR_ENV_VAR) {
            config.default_actor = actor;
        }
        if let Ok(surface) = env::var(DEFAULT_SURFACE_ENV_VAR) {
            config.default_surface = surface;
        }

        if let Some(vault_root) = overrides.vault_root {
            config.vault_root = vault_root;
        }
        if let Some(irrev_dir) = overrides.irrev_dir {
            config.irrev_dir = irrev_dir;
        }
        if let Some(default_actor) = overrides.default_actor {
            config.default_actor = default_actor;
        }
        if let Some(default_surface) = overrides.default_surface {
            config.default_surface = default_surface;
        }

        Ok(config)
    }

    /// Validates that the resolved vault root exists on disk.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidVaultRoot`] if it does not.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.vault_root.is_dir() {
            return Err(ConfigError::InvalidVaultRoot(self.vault_root.clone()));
        }
        Ok(())
    }

    /// Resolves the `.irrev` directory to an absolute-or-vault-relative path.
    #[must_use]
    pub fn irrev_path(&self) -> PathBuf {
        if self.irrev_dir.is_absolute() { self.irrev_dir.clone() } else { self.vault_root.join(&self.irrev_dir) }
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let metadata = fs::metadata(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::TooLarge(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let file: FileConfig =
            toml::from_str(&raw).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source: Box::new(source) })?;

        if let Some(vault_root) = file.vault_root {
            self.vault_root = vault_root;
        }
        if let Some(irrev_dir) = file.irrev_dir {
            self.irrev_dir = irrev_dir;
        }
        if let Some(default_actor) = file.default_actor {
            self.default_actor = default_actor;
        }
        if let Some(default_surface) = file.default_surface {
            self.default_surface = default_surface;
        }
        if let Some(names) = file.require_force_ack_for {
            let mut parsed = BTreeSet::new();
            for name in names {
                parsed.insert(parse_risk_class(&name)?);
            }
            self.require_force_ack_for = parsed;
        }
        Ok(())
    }
}

fn parse_risk_class(name: &str) -> Result<RiskClass, ConfigError> {
    match name {
        "read_only" => Ok(RiskClass::ReadOnly),
        "append_only" => Ok(RiskClass::AppendOnly),
        "mutation_reversible" => Ok(RiskClass::MutationReversible),
        "mutation_destructive" => Ok(RiskClass::MutationDestructive),
        "external_side_effect" => Ok(RiskClass::ExternalSideEffect),
        other => Err(ConfigError::UnknownRiskClass(other.to_owned())),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, reason = "tests assert against deterministic fixtures")]

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn defaults_require_force_ack_for_destructive_only() {
        let config = Config::default();
        assert!(config.require_force_ack_for.contains(&RiskClass::MutationDestructive));
        assert_eq!(config.require_force_ack_for.len(), 1);
    }

    #[test]
    fn missing_file_path_is_not_an_error() {
        let dir = tempdir().expect("tempdir");
        let missing = dir.path().join("nonexistent.toml");
        let config = Config::load(Some(&missing), ConfigOverrides::default()).expect("load");
        assert_eq!(config.default_actor, "agent:harness");
    }

    #[test]
    fn file_values_are_overridden_by_explicit_overrides() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("ledgergate.toml");
        fs::write(&path, "default_actor = \"from-file\"\n").expect("write");
        let overrides = ConfigOverrides { default_actor: Some("from-override".to_owned()), ..ConfigOverrides::default() };
        let config = Config::load(Some(&path), overrides).expect("load");
        assert_eq!(config.default_actor, "from-override");
    }

    #[test]
    fn unknown_risk_class_name_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("ledgergate.toml");
        fs::write(&path, "require_force_ack_for = [\"not_a_real_class\"]\n").expect("write");
        let err = Config::load(Some(&path), ConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownRiskClass(_)));
    }

    #[test]
    fn irrev_path_is_vault_relative_when_relative() {
        let mut config = Config::default();
        config.vault_root = PathBuf::from("/vault");
        config.irrev_dir = PathBuf::from(".irrev");
        assert_eq!(config.irrev_path(), PathBuf::from("/vault/.irrev"));
    }

    #[test]
    fn validate_rejects_missing_vault_root() {
        let mut config = Config::default();
        config.vault_root = PathBuf::from("/definitely/does/not/exist/ledgergate");
        assert!(matches!(config.validate(), Err(ConfigError::InvalidVaultRoot(_))));
    }
}
