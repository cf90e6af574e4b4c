//! Status, recalc and purge commands.

use serde_json::json;

use crate::cli::args::OutputFormat;
use crate::cli::context::CliContext;
use crate::cli::output;
use crate::core::manager::PostRecalc;
use crate::error::Result;

/// Show the persisted usage summary without recomputing it.
///
/// # Errors
/// Returns an error if the cache cannot be opened.
pub fn execute_status(ctx: &CliContext) -> Result<()> {
    let manager = ctx.open_offline()?;
    let summary = manager.summary();
    let budget = manager.config().budget;
    let tracks = manager.index().track_count()?;

    match ctx.format {
        OutputFormat::Json => output::print_json(
            "status",
            json!({
                "budget": output::budget_json(&budget),
                "usage": output::summary_json(&summary),
                "trackCount": tracks,
            }),
        ),
        OutputFormat::Human => {
            println!("{}", output::render_summary(&summary, &budget));
            println!("Tracks in library: {tracks}");
            Ok(())
        }
    }
}

/// Recalculate usage, then evict if over budget.
///
/// # Errors
/// Returns the recalculation or eviction failure.
pub async fn execute_recalc(ctx: &CliContext) -> Result<()> {
    let manager = ctx.open_offline()?;
    let log = manager.events().record();
    let summary = manager.recalculate_usage(PostRecalc::Purge).await?;
    let budget = manager.config().budget;
    let events = log.snapshot();

    match ctx.format {
        OutputFormat::Json => output::print_json(
            "recalc",
            json!({
                "budget": output::budget_json(&budget),
                "usage": output::summary_json(&summary),
                "events": events,
            }),
        ),
        OutputFormat::Human => {
            println!("{}", output::render_summary(&summary, &budget));
            if let Some(hint) = output::render_storage_hint(&events) {
                println!("{hint}");
            }
            Ok(())
        }
    }
}

/// Refresh usage, then run one eviction pass.
///
/// # Errors
/// Returns the recalculation or eviction failure.
pub async fn execute_purge(ctx: &CliContext) -> Result<()> {
    let manager = ctx.open_offline()?;
    let log = manager.events().record();
    manager.recalculate_usage(PostRecalc::SuppressPurge).await?;
    let report = manager.purge_if_over_budget().await?;
    let events = log.snapshot();

    match ctx.format {
        OutputFormat::Json => output::print_json(
            "purge",
            json!({
                "report": output::purge_json(&report),
                "usage": output::summary_json(&manager.summary()),
                "events": events,
            }),
        ),
        OutputFormat::Human => {
            println!("{}", output::render_purge(&report));
            if let Some(hint) = output::render_storage_hint(&events) {
                println!("{hint}");
            }
            Ok(())
        }
    }
}
