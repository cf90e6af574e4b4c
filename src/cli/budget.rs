//! Budget command.

use serde_json::json;

use crate::cli::args::{BudgetCommand, OutputFormat};
use crate::cli::context::CliContext;
use crate::cli::output;
use crate::core::manager::PostRecalc;
use crate::core::models::CacheBudget;
use crate::error::Result;
use crate::storage::CacheConfig;

/// Execute a budget subcommand.
///
/// # Errors
/// Returns an error if the config file cannot be written or eviction fails.
pub async fn execute(cmd: &BudgetCommand, ctx: &CliContext) -> Result<()> {
    match cmd {
        BudgetCommand::Set { bytes, mode } => {
            let budget = CacheBudget {
                max_total_bytes: *bytes,
                fetch_mode: mode.map_or(ctx.resolved.config.budget.fetch_mode, Into::into),
            };
            set_budget(ctx, budget).await
        }
    }
}

async fn set_budget(ctx: &CliContext, budget: CacheBudget) -> Result<()> {
    // Only the budget changes on disk; env and flag overrides stay out of the file.
    let path = &ctx.resolved.config_path;
    let mut file_config = CacheConfig::load_from(path)?;
    file_config.budget = budget;
    file_config.validate()?;
    file_config.save_to(path)?;
    tracing::info!(path = %path.display(), "Saved storage budget");

    let manager = ctx.open_offline()?;
    let log = manager.events().record();
    manager
        .recalculate_usage(PostRecalc::SuppressPurge)
        .await?;
    let report = manager.set_budget(budget).await?;
    let events = log.snapshot();

    match ctx.format {
        OutputFormat::Json => output::print_json(
            "budget set",
            json!({
                "budget": output::budget_json(&budget),
                "configPath": path.display().to_string(),
                "purge": output::purge_json(&report),
                "usage": output::summary_json(&manager.summary()),
                "events": events,
            }),
        ),
        OutputFormat::Human => {
            println!("{}", output::render_summary(&manager.summary(), &budget));
            println!("{}", output::render_purge(&report));
            if let Some(hint) = output::render_storage_hint(&events) {
                println!("{hint}");
            }
            Ok(())
        }
    }
}
