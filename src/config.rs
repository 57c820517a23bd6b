use crate::threat::ThreatLevel;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main guard configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct GuardConfig {
    #[serde(default)]
    pub lockout: LockoutConfig,

    #[serde(default)]
    pub time_integrity: TimeIntegrityConfig,

    #[serde(default)]
    pub threat: ThreatConfig,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Failed-attempt lockout
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LockoutConfig {
    /// Consecutive failures before lockout
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Lockout window in seconds
    #[serde(default = "default_lockout_secs")]
    pub duration_secs: u64,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            duration_secs: default_lockout_secs(),
        }
    }
}

impl LockoutConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }
}

fn default_max_attempts() -> u32 {
    crate::lockout::DEFAULT_MAX_ATTEMPTS
}

fn default_lockout_secs() -> u64 {
    crate::lockout::DEFAULT_LOCKOUT_DURATION.as_secs()
}

/// Clock tamper detection
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TimeIntegrityConfig {
    /// Allowed wall/monotonic divergence in seconds
    #[serde(default = "default_tolerance_secs")]
    pub tolerance_secs: u64,
}

impl Default for TimeIntegrityConfig {
    fn default() -> Self {
        Self {
            tolerance_secs: default_tolerance_secs(),
        }
    }
}

impl TimeIntegrityConfig {
    pub fn tolerance(&self) -> Duration {
        Duration::from_secs(self.tolerance_secs)
    }
}

fn default_tolerance_secs() -> u64 {
    crate::integrity::DEFAULT_TOLERANCE.as_secs()
}

/// Environment threat scanning
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ThreatConfig {
    /// How long an assessment is reused, in seconds
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Highest level tolerated by disable/remove
    #[serde(default = "default_max_level_for_sensitive")]
    pub max_level_for_sensitive: ThreatLevel,
}

impl Default for ThreatConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            max_level_for_sensitive: default_max_level_for_sensitive(),
        }
    }
}

impl ThreatConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

fn default_cache_ttl_secs() -> u64 {
    crate::threat::DEFAULT_CACHE_TTL.as_secs()
}

fn default_max_level_for_sensitive() -> ThreatLevel {
    ThreatLevel::Medium
}

/// Kind of build this installation runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildProfile {
    #[default]
    Production,
    Development,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct BuildConfig {
    #[serde(default)]
    pub profile: BuildProfile,

    /// Allow the test-only verification bypass
    ///
    /// Has no effect unless the crate is built with the `developer-bypass`
    /// feature and debug assertions.
    #[serde(default)]
    pub developer_bypass: bool,
}

impl BuildConfig {
    pub fn is_production(&self) -> bool {
        self.profile == BuildProfile::Production
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Get the per-user config file path
pub fn get_config_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "family-guard").ok_or_else(|| {
        Error::InvalidConfig("Could not determine config file location".to_string())
    })?;

    let mut path = dirs.config_dir().to_path_buf();
    path.push("config.yaml");
    Ok(path)
}

/// Load configuration from a YAML file
pub fn load_config(path: &Path) -> Result<GuardConfig> {
    let content = std::fs::read_to_string(path)?;

    // An empty document deserializes to unit, not to an empty mapping
    let config: GuardConfig = if content.trim().is_empty() {
        GuardConfig::default()
    } else {
        serde_yaml::from_str(&content)?
    };

    validate_config(&config)?;

    Ok(config)
}

/// Load configuration, or defaults if the file does not exist
pub fn load_config_or_default(path: &Path) -> Result<GuardConfig> {
    if !path.exists() {
        return Ok(GuardConfig::default());
    }
    load_config(path)
}

/// Save configuration to a YAML file
pub fn save_config(path: &Path, config: &GuardConfig) -> Result<()> {
    validate_config(config)?;

    let content = serde_yaml::to_string(config)?;
    crate::platform::atomic_write(path, content.as_bytes())?;

    Ok(())
}

/// Validate configuration
pub fn validate_config(config: &GuardConfig) -> Result<()> {
    if config.lockout.max_attempts == 0 {
        return Err(Error::InvalidConfig(
            "lockout.max_attempts must be at least 1".to_string(),
        ));
    }

    if config.lockout.duration_secs == 0 {
        return Err(Error::InvalidConfig(
            "lockout.duration_secs must be at least 1".to_string(),
        ));
    }

    if config.time_integrity.tolerance_secs == 0 {
        return Err(Error::InvalidConfig(
            "time_integrity.tolerance_secs must be at least 1".to_string(),
        ));
    }

    if config.build.developer_bypass && config.build.is_production() {
        return Err(Error::InvalidConfig(
            "build.developer_bypass requires build.profile: development".to_string(),
        ));
    }

    Ok(())
}

pub const EXAMPLE_CONFIG: &str = include_str!("../family-guard.example.yaml");
