//! trackcache - offline track cache
//!
//! CLI entry point.

#![forbid(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use clap::Parser;
use std::process::ExitCode;

use trackcache::cli::{Cli, CliContext, Commands, OutputFormat};
use trackcache::core::logging;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    logging::init(&logging::LogSettings::resolve(
        cli.log_level.as_deref(),
        cli.json_output,
        cli.verbose,
    ));

    let format = cli.effective_format();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(code = e.error_code(), "{}", e);
            let rendered =
                trackcache::cli::output::render_error(&e, format == OutputFormat::Json);
            eprintln!("{rendered}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> trackcache::Result<()> {
    let ctx = CliContext::from_cli(&cli)?;

    match &cli.command {
        Commands::Status => trackcache::cli::status::execute_status(&ctx),
        Commands::Recalc => trackcache::cli::status::execute_recalc(&ctx).await,
        Commands::Purge => trackcache::cli::status::execute_purge(&ctx).await,
        Commands::Sync(args) => trackcache::cli::sync::execute(args, &ctx).await,
        Commands::Budget(cmd) => trackcache::cli::budget::execute(cmd, &ctx).await,
        Commands::Track(cmd) => trackcache::cli::track::execute(cmd, &ctx).await,
        Commands::Config(cmd) => trackcache::cli::config::execute(cmd, &ctx),
    }
}
