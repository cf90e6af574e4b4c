//! Config command.

use serde_json::json;

use crate::cli::args::{ConfigCommand, OutputFormat};
use crate::cli::context::CliContext;
use crate::cli::output;
use crate::error::Result;
use crate::storage::ConfigSource;

/// Execute a config subcommand.
///
/// # Errors
/// Returns an error if the configuration cannot be serialized.
pub fn execute(cmd: &ConfigCommand, ctx: &CliContext) -> Result<()> {
    match cmd {
        ConfigCommand::Show => show(ctx),
    }
}

fn show(ctx: &CliContext) -> Result<()> {
    let resolved = &ctx.resolved;
    let config = &resolved.config;
    let sources = &resolved.sources;

    match ctx.format {
        OutputFormat::Json => output::print_json(
            "config show",
            json!({
                "configPath": resolved.config_path.display().to_string(),
                "dataDir": ctx.paths.data.display().to_string(),
                "config": config,
                "sources": {
                    "maxTotalBytes": source_key(sources.max_total_bytes),
                    "fetchMode": source_key(sources.fetch_mode),
                    "linkEndpoint": source_key(sources.link_endpoint),
                    "fetchTimeout": source_key(sources.fetch_timeout),
                },
            }),
        ),
        OutputFormat::Human => {
            println!("Config file: {}", resolved.config_path.display());
            println!("Data dir:    {}", ctx.paths.data.display());
            println!();
            println!(
                "max_total_bytes   = {:<24} ({})",
                config.budget.max_total_bytes, sources.max_total_bytes
            );
            println!(
                "fetch_mode        = {:<24} ({})",
                config.budget.fetch_mode, sources.fetch_mode
            );
            println!(
                "link_endpoint     = {:<24} ({})",
                config.network.link_endpoint.as_deref().unwrap_or("-"),
                sources.link_endpoint
            );
            println!(
                "fetch_timeout     = {:<24} ({})",
                format!("{}s", config.scheduler.fetch_timeout_secs),
                sources.fetch_timeout
            );
            println!(
                "debounce          = {}ms",
                config.scheduler.debounce_ms
            );
            println!(
                "min_free_disk     = {}",
                config.scheduler.min_free_disk_bytes
            );
            Ok(())
        }
    }
}

const fn source_key(source: ConfigSource) -> &'static str {
    match source {
        ConfigSource::Cli => "cli",
        ConfigSource::Env => "env",
        ConfigSource::ConfigFile => "file",
        ConfigSource::Default => "default",
    }
}
