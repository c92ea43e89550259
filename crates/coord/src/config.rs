// Coordination settings loaded from `~/.teamgraph/coord.toml`.
//
// Every field has a default, so a missing file or a partial file is valid.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use teamgraph_common::types::ActivityClass;
use thiserror::Error;

pub const DEFAULT_LOCK_TTL_SEC: u32 = 15 * 60;
pub const DEFAULT_ACTIVE_THRESHOLD_SEC: u64 = 24 * 60 * 60;
pub const DEFAULT_OCCASIONAL_THRESHOLD_SEC: u64 = 7 * 24 * 60 * 60;

/// Root directory for teamgraph state: `~/.teamgraph/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".teamgraph"))
}

/// Path to the coordination config file: `~/.teamgraph/coord.toml`.
pub fn coord_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("coord.toml"))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoordConfig {
    pub locks: LockConfig,
    pub staleness: StalenessConfig,
}

impl CoordConfig {
    /// Load from `~/.teamgraph/coord.toml`, falling back to defaults when the
    /// file does not exist. A file that exists but is invalid is an error.
    pub fn load() -> Result<Self, ConfigError> {
        match coord_config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.locks.ttl_sec == 0 {
            return Err(ConfigError::Invalid("locks.ttl_sec must be > 0".into()));
        }
        if let Some((prefix, _)) = self.locks.ttl_overrides.iter().find(|(_, ttl)| **ttl == 0) {
            return Err(ConfigError::Invalid(format!(
                "locks.ttl_overrides.\"{prefix}\" must be > 0"
            )));
        }
        if self.staleness.active_threshold_sec == 0 || self.staleness.occasional_threshold_sec == 0
        {
            return Err(ConfigError::Invalid("staleness thresholds must be > 0".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LockConfig {
    /// Global lock lifetime in seconds.
    pub ttl_sec: u32,
    /// Whether issued locks may be renewed.
    pub renewable: bool,
    /// Entity-id prefix -> TTL seconds. The longest matching prefix wins.
    pub ttl_overrides: BTreeMap<String, u32>,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self { ttl_sec: DEFAULT_LOCK_TTL_SEC, renewable: true, ttl_overrides: BTreeMap::new() }
    }
}

impl LockConfig {
    pub fn ttl_for(&self, entity_id: &str) -> Duration {
        let seconds = self
            .ttl_overrides
            .iter()
            .filter(|(prefix, _)| entity_id.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, ttl)| *ttl)
            .unwrap_or(self.ttl_sec);
        Duration::seconds(i64::from(seconds))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StalenessConfig {
    pub active_threshold_sec: u64,
    pub occasional_threshold_sec: u64,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            active_threshold_sec: DEFAULT_ACTIVE_THRESHOLD_SEC,
            occasional_threshold_sec: DEFAULT_OCCASIONAL_THRESHOLD_SEC,
        }
    }
}

impl StalenessConfig {
    pub fn threshold_for(&self, activity: ActivityClass) -> u64 {
        match activity {
            ActivityClass::Active => self.active_threshold_sec,
            ActivityClass::Occasional => self.occasional_threshold_sec,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
