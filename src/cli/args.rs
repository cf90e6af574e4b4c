//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::core::models::{Connectivity, FetchMode, RetentionClass};

/// Offline track cache - inspect and drive the on-device audio cache.
#[derive(Parser, Debug)]
#[command(name = "trackcache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    // === Global flags ===
    /// Emit machine-readable JSON on stdout
    #[arg(long, global = true)]
    pub json: bool,

    /// Log level (trace, debug, info, warn, error, critical)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Emit JSONL logs to stderr
    #[arg(long, global = true)]
    pub json_output: bool,

    /// Verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Keep config, index, and blobs under this directory
    #[arg(long, value_name = "DIR", env = "TRACKCACHE_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Config file to use instead of the default location
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Base URL of the link resolution service
    #[arg(long, value_name = "URL", global = true)]
    pub link_endpoint: Option<String>,

    /// Per-fetch timeout in seconds
    #[arg(long, value_name = "SECONDS", global = true)]
    pub timeout: Option<u64>,
}

impl Cli {
    /// Resolve the effective output format.
    #[must_use]
    pub const fn effective_format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show stored usage and the active budget
    Status,

    /// Recalculate usage, repair missing blobs, and evict if over budget
    Recalc,

    /// Run an eviction pass
    Purge,

    /// Download missing always-offline tracks
    Sync(SyncArgs),

    /// Manage the storage budget
    #[command(subcommand)]
    Budget(BudgetCommand),

    /// Library sync hooks
    #[command(subcommand)]
    Track(TrackCommand),

    /// Inspect configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

/// Arguments for the `sync` command.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Connectivity to report to the download policy
    #[arg(long, value_enum, default_value = "wifi")]
    pub network: NetworkArg,

    /// Report the device as being in power-save mode
    #[arg(long)]
    pub power_saving: bool,

    /// Free disk bytes to report (unknown when omitted)
    #[arg(long, value_name = "BYTES")]
    pub free_bytes: Option<u64>,
}

/// Budget subcommands.
#[derive(Subcommand, Debug)]
pub enum BudgetCommand {
    /// Persist a new budget and evict down to it
    Set {
        /// Maximum cache size in bytes (0 = unlimited)
        bytes: u64,

        /// Background fetch policy
        #[arg(long, value_enum)]
        mode: Option<FetchModeArg>,
    },
}

/// Track subcommands.
#[derive(Subcommand, Debug)]
pub enum TrackCommand {
    /// Add or refresh a track's metadata
    Add {
        /// Track identifier
        id: String,

        /// Server-reported audio size in bytes
        #[arg(long)]
        audio_bytes: u64,

        /// Server-reported artwork size in bytes
        #[arg(long, default_value = "0")]
        art_bytes: u64,

        /// Retention class
        #[arg(long, value_enum, default_value = "transient")]
        class: RetentionArg,
    },

    /// Remove a track and delete its cached files
    Remove {
        /// Track identifier
        id: String,
    },
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration and where each value came from
    Show,
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}

/// Connectivity as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NetworkArg {
    Wifi,
    Cellular,
    Offline,
}

impl From<NetworkArg> for Connectivity {
    fn from(value: NetworkArg) -> Self {
        match value {
            NetworkArg::Wifi => Self::Wifi,
            NetworkArg::Cellular => Self::Cellular,
            NetworkArg::Offline => Self::Offline,
        }
    }
}

/// Fetch mode as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FetchModeArg {
    Always,
    WifiOnly,
    Never,
}

impl From<FetchModeArg> for FetchMode {
    fn from(value: FetchModeArg) -> Self {
        match value {
            FetchModeArg::Always => Self::Always,
            FetchModeArg::WifiOnly => Self::WifiOnly,
            FetchModeArg::Never => Self::Never,
        }
    }
}

/// Retention class as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RetentionArg {
    OnlineOnly,
    Transient,
    AlwaysOffline,
}

impl From<RetentionArg> for RetentionClass {
    fn from(value: RetentionArg) -> Self {
        match value {
            RetentionArg::OnlineOnly => Self::OnlineOnly,
            RetentionArg::Transient => Self::Transient,
            RetentionArg::AlwaysOffline => Self::AlwaysOffline,
        }
    }
}
