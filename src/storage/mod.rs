//! Storage for blobs, the track index, configuration, and small state files.

pub mod byte_store;
pub mod config;
pub mod index;
pub mod paths;
pub mod schema;
pub mod state;

pub use byte_store::{ByteStore, DeleteOutcome};
pub use config::{
    CacheConfig, ConfigHandle, ConfigOverrides, ConfigSource, ConfigSources, ENV_CONFIG, ENV_FETCH_MODE,
    ENV_LINK_ENDPOINT, ENV_MAX_BYTES, ENV_TIMEOUT, NetworkConfig, ResolvedConfig, SchedulerConfig,
};
pub use index::CacheMetadataIndex;
pub use paths::AppPaths;
pub use schema::{SCHEMA_VERSION, run_migrations};
pub use state::PromptState;
