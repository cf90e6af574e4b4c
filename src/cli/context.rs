//! Shared setup for command handlers: paths, resolved config, and the
//! manager with its HTTP collaborators.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::cli::args::{Cli, OutputFormat};
use crate::core::device::{DeviceProbe, StaticDeviceProbe};
use crate::core::http;
use crate::core::links::{HttpLinkResolver, LinkResolver, TrackLinks};
use crate::core::manager::{Collaborators, OfflineCacheManager};
use crate::core::models::TrackId;
use crate::core::transport::HttpBlobTransport;
use crate::error::{CacheError, Result};
use crate::storage::{AppPaths, ConfigOverrides, ENV_CONFIG, ResolvedConfig};

/// Everything a command needs before it touches the cache.
#[derive(Debug, Clone)]
pub struct CliContext {
    pub paths: AppPaths,
    pub resolved: ResolvedConfig,
    pub format: OutputFormat,
}

impl CliContext {
    /// Resolve paths and configuration from global flags.
    ///
    /// The config file is taken from `--config`, then `TRACKCACHE_CONFIG`,
    /// then the data directory when `--data-dir` is set, then the platform
    /// default.
    ///
    /// # Errors
    /// Returns an error if the configuration cannot be loaded or is invalid.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let paths = cli
            .data_dir
            .as_deref()
            .map_or_else(AppPaths::new, AppPaths::rooted);

        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var_os(ENV_CONFIG).map(PathBuf::from))
            .or_else(|| cli.data_dir.as_ref().map(|_| paths.config_file()));

        let overrides = ConfigOverrides {
            config_path,
            link_endpoint: cli.link_endpoint.clone(),
            fetch_timeout_secs: cli.timeout,
            ..ConfigOverrides::default()
        };
        let resolved = ResolvedConfig::resolve(&overrides)?;
        tracing::debug!(
            config_path = %resolved.config_path.display(),
            data = %paths.data.display(),
            "Resolved configuration"
        );

        Ok(Self {
            paths,
            resolved,
            format: cli.effective_format(),
        })
    }

    /// Open the cache with HTTP collaborators and the given device state.
    ///
    /// # Errors
    /// Returns an error if the HTTP client, the link endpoint, or the cache
    /// itself cannot be set up.
    pub fn open_manager(&self, device: StaticDeviceProbe) -> Result<OfflineCacheManager> {
        let config = self.resolved.config.clone();
        let timeout = config.scheduler.fetch_timeout();
        let client = http::build_client(timeout)?;

        let links: Arc<dyn LinkResolver> = match config.network.link_endpoint.as_deref() {
            Some(endpoint) => Arc::new(HttpLinkResolver::new(client.clone(), endpoint, timeout)?),
            None => Arc::new(NoLinkEndpoint),
        };
        let device: Arc<dyn DeviceProbe> = Arc::new(device);

        OfflineCacheManager::open(
            &self.paths,
            config,
            Collaborators {
                links,
                transport: Arc::new(HttpBlobTransport::new(client, timeout)),
                device,
            },
        )
    }

    /// Open the cache for commands that never download.
    ///
    /// # Errors
    /// See [`open_manager`](Self::open_manager).
    pub fn open_offline(&self) -> Result<OfflineCacheManager> {
        self.open_manager(StaticDeviceProbe::default())
    }

    /// Fail early when a command needs the link service.
    ///
    /// # Errors
    /// Returns [`CacheError::Config`] when no endpoint is configured.
    pub fn require_link_endpoint(&self) -> Result<&str> {
        self.resolved
            .config
            .network
            .link_endpoint
            .as_deref()
            .ok_or_else(|| CacheError::Config(NO_ENDPOINT.to_string()))
    }
}

const NO_ENDPOINT: &str =
    "no link endpoint configured; set network.link_endpoint, TRACKCACHE_LINK_ENDPOINT, or --link-endpoint";

/// Stand-in resolver when the link service is not configured.
struct NoLinkEndpoint;

impl LinkResolver for NoLinkEndpoint {
    fn fetch_links<'a>(
        &'a self,
        _id: &'a TrackId,
        _want_audio: bool,
        _want_art: bool,
    ) -> BoxFuture<'a, Result<TrackLinks>> {
        Box::pin(async { Err(CacheError::Config(NO_ENDPOINT.to_string())) })
    }
}
