//! Nixmate Configuration System
//!
//! User preferences and execution limits.
//! Config file: ~/.config/nixmate/config.toml or /etc/nixmate/config.toml

use crate::error::NixmateError;
use crate::progress::PhasePercentTable;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Default per-stream output limit (10 MiB)
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 10 * 1024 * 1024;

// ============================================================================
// Preferences
// ============================================================================

/// Network speed hint, scales download-heavy timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkSpeed {
    Fast,
    Normal,
    Slow,
    VerySlow,
}

impl Default for NetworkSpeed {
    fn default() -> Self {
        Self::Normal
    }
}

impl NetworkSpeed {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkSpeed::Fast => "fast",
            NetworkSpeed::Normal => "normal",
            NetworkSpeed::Slow => "slow",
            NetworkSpeed::VerySlow => "very_slow",
        }
    }

    /// Timeout multiplier for this speed
    pub fn multiplier(&self) -> f64 {
        match self {
            NetworkSpeed::Fast => 0.8,
            NetworkSpeed::Normal => 1.0,
            NetworkSpeed::Slow => 2.0,
            NetworkSpeed::VerySlow => 3.0,
        }
    }
}

/// Read-only user preferences consumed by the timeout estimator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preferences {
    /// Double every timeout
    #[serde(default)]
    pub patient_mode: bool,

    #[serde(default)]
    pub network_speed: NetworkSpeed,

    /// Extra multiplier applied after all others
    #[serde(default = "default_multiplier")]
    pub timeout_multiplier: f64,

    /// Package name -> base timeout in seconds
    #[serde(default)]
    pub custom_timeouts: BTreeMap<String, u64>,
}

fn default_multiplier() -> f64 {
    1.0
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            patient_mode: false,
            network_speed: NetworkSpeed::Normal,
            timeout_multiplier: 1.0,
            custom_timeouts: BTreeMap::new(),
        }
    }
}

// ============================================================================
// Execution
// ============================================================================

/// How elevated commands are wrapped for a non-root user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Elevation {
    Sudo,
    Doas,
    /// Run as-is
    None,
}

impl Default for Elevation {
    fn default() -> Self {
        Self::Sudo
    }
}

impl Elevation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Elevation::Sudo => "sudo",
            Elevation::Doas => "doas",
            Elevation::None => "none",
        }
    }

    /// Wrapper program, if any
    pub fn program(&self) -> Option<&'static str> {
        match self {
            Elevation::Sudo => Some("sudo"),
            Elevation::Doas => Some("doas"),
            Elevation::None => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// No recognised progress for this long flags the process as stuck
    #[serde(default = "default_inactivity")]
    pub inactivity_timeout_secs: u64,

    /// The hard ceiling is only extended if progress was seen this recently
    #[serde(default = "default_grace")]
    pub progress_grace_secs: u64,

    /// Per-stream output limit
    #[serde(default = "default_max_buffer")]
    pub max_buffer_bytes: usize,

    /// Terminate a stuck process instead of only warning
    #[serde(default)]
    pub kill_when_stuck: bool,

    #[serde(default)]
    pub elevation: Elevation,

    /// Describe commands without running them
    #[serde(default)]
    pub dry_run: bool,
}

fn default_inactivity() -> u64 {
    300
}

fn default_grace() -> u64 {
    60
}

fn default_max_buffer() -> usize {
    DEFAULT_MAX_BUFFER_BYTES
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: default_inactivity(),
            progress_grace_secs: default_grace(),
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            kill_when_stuck: false,
            elevation: Elevation::Sudo,
            dry_run: false,
        }
    }
}

// ============================================================================
// Progress, cache, audit, dev
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressConfig {
    #[serde(default)]
    pub phase_percent: PhasePercentTable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,

    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_cache_capacity() -> usize {
    256
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_cache_ttl(),
            capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Defaults to $XDG_STATE_HOME/nixmate/audit.jsonl
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl AuditConfig {
    /// Configured path, or the state-directory default
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path
            .clone()
            .or_else(|| state_dir().map(|d| d.join("audit.jsonl")))
    }
}

/// Developer/debug configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevConfig {
    /// Include raw command output in responses
    /// Can also be enabled via NIXMATE_DEBUG=1
    #[serde(default)]
    pub debug: bool,
}

impl DevConfig {
    /// Check if debug is enabled (config or env)
    pub fn is_debug_enabled(&self) -> bool {
        self.debug || std::env::var("NIXMATE_DEBUG").map(|v| v == "1").unwrap_or(false)
    }
}

/// Per-user state directory: ~/.local/state/nixmate
pub fn state_dir() -> Option<PathBuf> {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .map(|d| d.join("nixmate"))
}

// ============================================================================
// Main configuration
// ============================================================================

/// Main Nixmate configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NixmateConfig {
    #[serde(default)]
    pub preferences: Preferences,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub progress: ProgressConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub dev: DevConfig,
}

impl NixmateConfig {
    /// Get default user config path: ~/.config/nixmate/config.toml
    pub fn user_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Cannot determine config directory")?;
        Ok(config_dir.join("nixmate").join("config.toml"))
    }

    /// Get system config path: /etc/nixmate/config.toml
    pub fn system_config_path() -> PathBuf {
        PathBuf::from("/etc/nixmate/config.toml")
    }

    /// Load configuration
    ///
    /// Priority:
    /// 1. User config (~/.config/nixmate/config.toml)
    /// 2. System config (/etc/nixmate/config.toml)
    /// 3. Defaults
    pub fn load() -> Result<Self> {
        if let Ok(user_path) = Self::user_config_path() {
            if user_path.exists() {
                return Self::load_from(&user_path);
            }
        }

        let system_path = Self::system_config_path();
        if system_path.exists() {
            return Self::load_from(&system_path);
        }

        Ok(Self::default())
    }

    /// Load and validate one file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: NixmateConfig = toml::from_str(&contents)
            .map_err(NixmateError::from)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to user config file
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::user_config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let toml_string =
            toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, toml_string)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(())
    }

    /// Reject values the estimator and engine cannot work with
    pub fn validate(&self) -> Result<()> {
        let m = self.preferences.timeout_multiplier;
        if !m.is_finite() || m <= 0.0 {
            anyhow::bail!(NixmateError::Config(format!(
                "Invalid timeout_multiplier: {}. Must be a positive number",
                m
            )));
        }
        if self.execution.inactivity_timeout_secs == 0 {
            anyhow::bail!(NixmateError::Config(
                "Invalid inactivity_timeout_secs: 0. Must be at least 1".to_string()
            ));
        }
        if self.execution.max_buffer_bytes == 0 {
            anyhow::bail!(NixmateError::Config(
                "Invalid max_buffer_bytes: 0. Must be at least 1".to_string()
            ));
        }
        Ok(())
    }

    /// Set network speed hint
    pub fn set_network_speed(&mut self, speed: &str) -> Result<()> {
        self.preferences.network_speed = match speed.to_lowercase().replace('-', "_").as_str() {
            "fast" => NetworkSpeed::Fast,
            "normal" => NetworkSpeed::Normal,
            "slow" => NetworkSpeed::Slow,
            "very_slow" => NetworkSpeed::VerySlow,
            _ => anyhow::bail!(NixmateError::Config(format!(
                "Invalid network speed: '{}'. Valid values: fast, normal, slow, very_slow",
                speed
            ))),
        };
        Ok(())
    }

    /// Set elevation wrapper
    pub fn set_elevation(&mut self, mode: &str) -> Result<()> {
        self.execution.elevation = match mode.to_lowercase().as_str() {
            "sudo" => Elevation::Sudo,
            "doas" => Elevation::Doas,
            "none" | "off" => Elevation::None,
            _ => anyhow::bail!(NixmateError::Config(format!(
                "Invalid elevation: '{}'. Valid values: sudo, doas, none",
                mode
            ))),
        };
        Ok(())
    }

    /// Set the user timeout multiplier
    pub fn set_timeout_multiplier(&mut self, value: f64) -> Result<()> {
        let previous = self.preferences.timeout_multiplier;
        self.preferences.timeout_multiplier = value;
        if let Err(e) = self.validate() {
            self.preferences.timeout_multiplier = previous;
            return Err(e);
        }
        Ok(())
    }
}
