//! Configuration loading and resolution.
//!
//! A `BespokeConfig` is the raw, all-optional shape of
//! `~/.bespoke/config.toml`. A [`Settings`] is the fully-resolved view the
//! engine consumes: file values, then `BESPOKE_*` environment overrides,
//! then built-in defaults.

use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;

pub const DEFAULT_MAX_OPERATIONS: u32 = 25;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

// Default value function for serde (bool::default() is false, so only true needs a fn)
pub(crate) const fn default_true() -> bool {
    true
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

/// Raw on-disk configuration. Every section is optional.
#[derive(Debug, Default, Deserialize)]
pub struct BespokeConfig {
    pub limits: Option<LimitsConfig>,
    pub sandbox: Option<SandboxConfig>,
    pub history: Option<HistoryConfig>,
}

/// Session limit overrides.
///
/// ```toml
/// [limits]
/// max_operations = 25
/// max_attempts = 3
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct LimitsConfig {
    /// Hard ceiling on operation starts per session.
    pub max_operations: Option<u32>,
    /// Maximum attempts per operation, distinct strategies included.
    pub max_attempts: Option<u32>,
}

/// Sandbox configuration for tool path resolution.
#[derive(Debug, Deserialize)]
pub struct SandboxConfig {
    #[serde(default)]
    pub denied_patterns: Vec<String>,
    #[serde(default = "default_true")]
    pub include_default_denies: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            denied_patterns: Vec::new(),
            include_default_denies: true,
        }
    }
}

/// Durable cross-session history configuration.
#[derive(Debug, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Override for the JSONL log location.
    pub path: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl BespokeConfig {
    /// Load from the default path. `Ok(None)` when no config file exists.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let path = match config_path() {
            Some(path) => path,
            None => return Ok(None),
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".bespoke").join("config.toml"))
}

/// Default durable history location under the platform data directory.
#[must_use]
pub fn default_history_path() -> Option<PathBuf> {
    dirs::data_dir().map(|data| data.join("bespoke").join("history.jsonl"))
}

/// Fully-resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub max_operations: u32,
    pub max_attempts: u32,
    pub denied_patterns: Vec<String>,
    pub include_default_denies: bool,
    pub history_enabled: bool,
    pub history_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::resolve(None)
    }
}

impl Settings {
    /// Resolve settings from an optional raw config plus `BESPOKE_*`
    /// environment overrides. Env wins over file, file over defaults.
    #[must_use]
    pub fn resolve(config: Option<BespokeConfig>) -> Self {
        let config = config.unwrap_or_default();
        let limits = config.limits.unwrap_or_default();
        let sandbox = config.sandbox.unwrap_or_default();
        let history = config.history.unwrap_or_default();

        let max_operations = env_u32("BESPOKE_MAX_OPERATIONS")
            .or(limits.max_operations)
            .unwrap_or(DEFAULT_MAX_OPERATIONS);
        let max_attempts = env_u32("BESPOKE_MAX_ATTEMPTS")
            .or(limits.max_attempts)
            .unwrap_or(DEFAULT_MAX_ATTEMPTS)
            .max(1);

        let history_enabled = match env::var("BESPOKE_HISTORY") {
            Ok(v) => !matches!(v.as_str(), "0" | "off" | "false"),
            Err(_) => history.enabled,
        };
        let history_path = env::var_os("BESPOKE_HISTORY_PATH")
            .map(PathBuf::from)
            .or(history.path)
            .or_else(default_history_path);

        Self {
            max_operations: max_operations.max(1),
            max_attempts,
            denied_patterns: sandbox.denied_patterns,
            include_default_denies: sandbox.include_default_denies,
            history_enabled,
            history_path,
        }
    }
}

fn env_u32(name: &str) -> Option<u32> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring non-numeric {name}={raw:?}");
            None
        }
    }
}
