//! Application paths for config, cache, and data.

use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Application paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Configuration directory.
    pub config: PathBuf,
    /// Cache directory (summary and prompt state).
    pub cache: PathBuf,
    /// Data directory (track index and blobs).
    pub data: PathBuf,
}

impl AppPaths {
    /// Create paths for the trackcache application.
    #[must_use]
    pub fn new() -> Self {
        if let Some(proj_dirs) = ProjectDirs::from("org", "trackcache", "trackcache") {
            Self {
                config: proj_dirs.config_dir().to_path_buf(),
                cache: proj_dirs.cache_dir().to_path_buf(),
                data: proj_dirs.data_dir().to_path_buf(),
            }
        } else {
            // Fallback to home directory
            let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
            Self {
                config: home.join(".config/trackcache"),
                cache: home.join(".cache/trackcache"),
                data: home.join(".local/share/trackcache"),
            }
        }
    }

    /// Put every directory under one root (tests and `--data-dir`).
    #[must_use]
    pub fn rooted(root: &Path) -> Self {
        Self {
            config: root.join("config"),
            cache: root.join("cache"),
            data: root.join("data"),
        }
    }

    /// Path to the config file.
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.toml")
    }

    /// Path to the track index database.
    #[must_use]
    pub fn index_db_file(&self) -> PathBuf {
        self.data.join("track-index.sqlite")
    }

    /// Root of the blob store.
    #[must_use]
    pub fn blob_dir(&self) -> PathBuf {
        self.data.join("blobs")
    }

    /// Path to the persisted usage summary.
    #[must_use]
    pub fn usage_summary_file(&self) -> PathBuf {
        self.cache.join("usage-summary.json")
    }

    /// Path to the one-shot prompt state.
    #[must_use]
    pub fn prompt_state_file(&self) -> PathBuf {
        self.cache.join("prompt-state.json")
    }

    /// Ensure all directories exist.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config)?;
        std::fs::create_dir_all(&self.cache)?;
        std::fs::create_dir_all(&self.data)?;
        std::fs::create_dir_all(self.blob_dir())?;
        Ok(())
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

/// Module-level function for accessing dirs crate.
mod dirs {
    use std::path::PathBuf;

    pub fn home_dir() -> Option<PathBuf> {
        directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf())
    }
}
