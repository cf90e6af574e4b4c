//! Configuration file loading and management.
//!
//! Loads configuration from:
//! - Linux: `~/.config/trackcache/config.toml`
//! - macOS: `~/Library/Application Support/org.trackcache.trackcache/config.toml`
//! - Windows: `%APPDATA%/trackcache/config/config.toml`
//!
//! ## Precedence
//!
//! Settings are resolved with the following precedence (highest first):
//! 1. CLI flags
//! 2. Environment variables
//! 3. Config file
//! 4. Built-in defaults
//!
//! ## Environment Variables
//!
//! - `TRACKCACHE_MAX_BYTES`: Storage budget in bytes (0 = unlimited)
//! - `TRACKCACHE_FETCH_MODE`: Background fetch policy (always, wifi-only, never)
//! - `TRACKCACHE_LINK_ENDPOINT`: Base URL of the link resolution service
//! - `TRACKCACHE_TIMEOUT`: Per-fetch timeout in seconds
//! - `TRACKCACHE_CONFIG`: Override config file path

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::core::models::{CacheBudget, FetchMode};
use crate::error::{CacheError, Result};

// =============================================================================
// Environment Variable Names
// =============================================================================

/// Environment variable for the storage budget in bytes.
pub const ENV_MAX_BYTES: &str = "TRACKCACHE_MAX_BYTES";
/// Environment variable for the background fetch mode.
pub const ENV_FETCH_MODE: &str = "TRACKCACHE_FETCH_MODE";
/// Environment variable for the link resolution endpoint.
pub const ENV_LINK_ENDPOINT: &str = "TRACKCACHE_LINK_ENDPOINT";
/// Environment variable for the per-fetch timeout in seconds.
pub const ENV_TIMEOUT: &str = "TRACKCACHE_TIMEOUT";
/// Environment variable to override config file path.
pub const ENV_CONFIG: &str = "TRACKCACHE_CONFIG";

/// Default number of eviction candidates fetched per batch.
pub const DEFAULT_EVICTION_BATCH_SIZE: usize = 100;
/// Default number of downloads between in-pass recalculations.
pub const DEFAULT_RECALC_EVERY_N_TRACKS: usize = 5;
/// Default per-fetch timeout.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 45;
/// Default debounce window for usage recalculation.
pub const DEFAULT_DEBOUNCE_MS: u64 = 1000;

const MAX_FETCH_TIMEOUT_SECS: u64 = 600;

// =============================================================================
// Config File
// =============================================================================

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Storage budget.
    pub budget: CacheBudget,
    /// Download and eviction tuning.
    pub scheduler: SchedulerConfig,
    /// Collaborator endpoints.
    pub network: NetworkConfig,
}

/// Download and eviction tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Cached entries fetched per eviction query.
    pub eviction_batch_size: usize,
    /// Recalculate usage after this many downloads within one pass.
    pub recalc_every_n_tracks: usize,
    /// Keep at least this much disk free. 0 disables the check.
    pub min_free_disk_bytes: u64,
    /// Per-fetch timeout in seconds.
    pub fetch_timeout_secs: u64,
    /// Debounce window for usage recalculation, in milliseconds.
    pub debounce_ms: u64,
    /// Allow background fetching while the device is in power-save mode.
    pub fetch_on_low_power: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            eviction_batch_size: DEFAULT_EVICTION_BATCH_SIZE,
            recalc_every_n_tracks: DEFAULT_RECALC_EVERY_N_TRACKS,
            min_free_disk_bytes: 0,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            fetch_on_low_power: false,
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    #[must_use]
    pub const fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Collaborator endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Base URL of the link resolution service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_endpoint: Option<String>,
}

impl CacheConfig {
    /// Load configuration from the default config file path.
    ///
    /// Returns default config if the file doesn't exist.
    ///
    /// # Errors
    /// Returns an error only if the file exists but is invalid.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific path.
    ///
    /// Returns default config if the file doesn't exist.
    ///
    /// # Errors
    /// Returns an error only if the file exists but is invalid.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(?path, "Config file not found, using defaults");
            return Ok(Self::default());
        }

        tracing::debug!(?path, "Loading config file");
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CacheError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Save configuration to a specific path.
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| CacheError::Config(format!("Failed to serialize config: {e}")))?;

        fs::write(path, content)?;
        tracing::debug!(?path, "Config file saved");
        Ok(())
    }

    /// Get the default config file path.
    #[must_use]
    pub fn config_path() -> PathBuf {
        AppPaths::new().config_file()
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns [`CacheError::ConfigInvalid`] naming the first bad key.
    pub fn validate(&self) -> Result<()> {
        let scheduler = &self.scheduler;

        if scheduler.eviction_batch_size == 0 {
            return Err(invalid(
                "scheduler.eviction_batch_size",
                "0",
                "must be at least 1",
            ));
        }
        if scheduler.recalc_every_n_tracks == 0 {
            return Err(invalid(
                "scheduler.recalc_every_n_tracks",
                "0",
                "must be at least 1",
            ));
        }
        if scheduler.fetch_timeout_secs == 0 || scheduler.fetch_timeout_secs > MAX_FETCH_TIMEOUT_SECS
        {
            return Err(invalid(
                "scheduler.fetch_timeout_secs",
                &scheduler.fetch_timeout_secs.to_string(),
                &format!("must be between 1 and {MAX_FETCH_TIMEOUT_SECS} seconds"),
            ));
        }

        if let Some(endpoint) = &self.network.link_endpoint
            && !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
        {
            return Err(invalid(
                "network.link_endpoint",
                endpoint,
                "must be an http:// or https:// URL",
            ));
        }

        Ok(())
    }
}

// =============================================================================
// Shared Handle
// =============================================================================

/// Live configuration shared by the planner, scheduler and manager.
///
/// Readers take a snapshot; [`replace`](Self::replace) swaps the whole value.
#[derive(Debug, Clone, Default)]
pub struct ConfigHandle(Arc<RwLock<CacheConfig>>);

impl ConfigHandle {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self(Arc::new(RwLock::new(config)))
    }

    /// Current configuration.
    #[must_use]
    pub fn get(&self) -> CacheConfig {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Current budget.
    #[must_use]
    pub fn budget(&self) -> CacheBudget {
        self.0.read().unwrap_or_else(PoisonError::into_inner).budget
    }

    /// Swap in a new configuration, returning the old one.
    pub fn replace(&self, config: CacheConfig) -> CacheConfig {
        let mut guard = self.0.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, config)
    }

    pub fn set_budget(&self, budget: CacheBudget) {
        self.0.write().unwrap_or_else(PoisonError::into_inner).budget = budget;
    }
}

fn invalid(key: &str, value: &str, message: &str) -> CacheError {
    CacheError::ConfigInvalid {
        key: key.to_string(),
        value: value.to_string(),
        message: message.to_string(),
    }
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Values supplied on the command line. `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub max_total_bytes: Option<u64>,
    pub fetch_mode: Option<FetchMode>,
    pub link_endpoint: Option<String>,
    pub fetch_timeout_secs: Option<u64>,
}

/// Where a configuration value came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Value from CLI flag.
    Cli,
    /// Value from environment variable.
    Env,
    /// Value from config file.
    ConfigFile,
    /// Built-in default.
    #[default]
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI flag"),
            Self::Env => write!(f, "environment variable"),
            Self::ConfigFile => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Tracks the source of each overridable value.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub max_total_bytes: ConfigSource,
    pub fetch_mode: ConfigSource,
    pub link_endpoint: ConfigSource,
    pub fetch_timeout: ConfigSource,
}

/// Fully resolved configuration after merging CLI, env vars, and config file.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Effective configuration.
    pub config: CacheConfig,
    /// File the configuration was (or would be) loaded from.
    pub config_path: PathBuf,
    /// Source of each overridable setting, for `config show`.
    pub sources: ConfigSources,
}

impl ResolvedConfig {
    /// Resolve final configuration from CLI overrides, the process environment,
    /// and the config file.
    ///
    /// # Errors
    /// Returns an error if the config file is invalid, an environment value
    /// cannot be parsed, or the merged configuration fails validation.
    pub fn resolve(overrides: &ConfigOverrides) -> Result<Self> {
        Self::resolve_with(overrides, |key| std::env::var(key).ok())
    }

    /// Same as [`resolve`](Self::resolve) with an injectable environment.
    ///
    /// # Errors
    /// See [`resolve`](Self::resolve).
    pub fn resolve_with<F>(overrides: &ConfigOverrides, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_path = overrides
            .config_path
            .clone()
            .or_else(|| env(ENV_CONFIG).map(PathBuf::from))
            .unwrap_or_else(CacheConfig::config_path);
        let file_exists = config_path.exists();
        let mut config = CacheConfig::load_from(&config_path)?;
        let file_source = if file_exists {
            ConfigSource::ConfigFile
        } else {
            ConfigSource::Default
        };

        let mut sources = ConfigSources {
            max_total_bytes: file_source,
            fetch_mode: file_source,
            link_endpoint: file_source,
            fetch_timeout: file_source,
        };

        // Budget bytes
        if let Some(bytes) = overrides.max_total_bytes {
            config.budget.max_total_bytes = bytes;
            sources.max_total_bytes = ConfigSource::Cli;
        } else if let Some(raw) = env(ENV_MAX_BYTES) {
            config.budget.max_total_bytes = parse_env_u64(ENV_MAX_BYTES, &raw)?;
            sources.max_total_bytes = ConfigSource::Env;
        }

        // Fetch mode
        if let Some(mode) = overrides.fetch_mode {
            config.budget.fetch_mode = mode;
            sources.fetch_mode = ConfigSource::Cli;
        } else if let Some(raw) = env(ENV_FETCH_MODE) {
            config.budget.fetch_mode = raw.parse()?;
            sources.fetch_mode = ConfigSource::Env;
        }

        // Link endpoint
        if let Some(endpoint) = &overrides.link_endpoint {
            config.network.link_endpoint = Some(endpoint.clone());
            sources.link_endpoint = ConfigSource::Cli;
        } else if let Some(endpoint) = env(ENV_LINK_ENDPOINT).filter(|v| !v.trim().is_empty()) {
            config.network.link_endpoint = Some(endpoint);
            sources.link_endpoint = ConfigSource::Env;
        }

        // Timeout
        if let Some(secs) = overrides.fetch_timeout_secs {
            config.scheduler.fetch_timeout_secs = secs;
            sources.fetch_timeout = ConfigSource::Cli;
        } else if let Some(raw) = env(ENV_TIMEOUT) {
            config.scheduler.fetch_timeout_secs = parse_env_u64(ENV_TIMEOUT, &raw)?;
            sources.fetch_timeout = ConfigSource::Env;
        }

        config.validate()?;

        Ok(Self {
            config,
            config_path,
            sources,
        })
    }
}

fn parse_env_u64(key: &str, raw: &str) -> Result<u64> {
    raw.trim().parse().map_err(|_| CacheError::ConfigInvalid {
        key: key.to_string(),
        value: raw.to_string(),
        message: "expected a non-negative integer".to_string(),
    })
}
