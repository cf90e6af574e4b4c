//! Output helpers shared by command handlers.
//!
//! JSON output is a single envelope per command on stdout:
//! `{"schemaVersion", "command", "generatedAt", "data"}`. Errors use the
//! same envelope with an `error` object instead of `data`.

use chrono::Utc;
use serde_json::{Value, json};

use crate::core::eviction::{PurgeOutcome, PurgeReport};
use crate::core::events::CacheEvent;
use crate::core::models::{CacheBudget, RetentionClass, UsageSummary};
use crate::error::{CacheError, Result};
use crate::util::{format_age, format_bytes, format_percent};

/// Version tag carried by every JSON document.
pub const SCHEMA_VERSION: &str = "trackcache.v1";

/// Print a command's JSON envelope.
///
/// # Errors
/// Returns an error if serialization fails.
pub fn print_json(command: &str, data: Value) -> Result<()> {
    let output = json!({
        "schemaVersion": SCHEMA_VERSION,
        "command": command,
        "generatedAt": Utc::now().to_rfc3339(),
        "data": data,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Render an error for stderr.
#[must_use]
pub fn render_error(error: &CacheError, json_output: bool) -> String {
    if json_output {
        let output = json!({
            "schemaVersion": SCHEMA_VERSION,
            "error": {
                "code": error.error_code(),
                "category": error.category().to_string(),
                "message": error.to_string(),
                "retryable": error.is_retryable(),
            },
        });
        serde_json::to_string_pretty(&output).unwrap_or_else(|_| render_simple(error))
    } else {
        render_simple(error)
    }
}

fn render_simple(error: &CacheError) -> String {
    format!("error[{}]: {error}", error.error_code())
}

#[must_use]
pub fn summary_json(summary: &UsageSummary) -> Value {
    let by_class: serde_json::Map<String, Value> = RetentionClass::ALL
        .iter()
        .map(|&class| {
            let usage = summary.class(class);
            (
                class.as_str().to_string(),
                json!({ "eligible": usage.eligible, "cached": usage.cached }),
            )
        })
        .collect();
    json!({
        "totalBytesStored": summary.total_bytes_stored,
        "byClass": by_class,
        "computedAt": computed_at(summary).map(|at| at.to_rfc3339()),
    })
}

#[must_use]
pub fn budget_json(budget: &CacheBudget) -> Value {
    json!({
        "maxTotalBytes": budget.max_total_bytes,
        "unlimited": budget.is_unlimited(),
        "fetchMode": budget.fetch_mode.as_str(),
    })
}

#[must_use]
pub fn purge_json(report: &PurgeReport) -> Value {
    let (outcome, bytes_over) = match report.outcome {
        PurgeOutcome::NotNeeded => ("not-needed", None),
        PurgeOutcome::WithinBudget => ("within-budget", None),
        PurgeOutcome::NothingToEvict { bytes_over } => ("nothing-to-evict", Some(bytes_over)),
    };
    json!({
        "outcome": outcome,
        "bytesOver": bytes_over,
        "evicted": report.evicted,
        "bytesFreed": report.bytes_freed,
        "alwaysOfflineBytesFreed": report.always_offline_bytes_freed,
    })
}

/// Human usage block used by `status` and `recalc`.
#[must_use]
pub fn render_summary(summary: &UsageSummary, budget: &CacheBudget) -> String {
    let mut out = String::new();
    let used = summary.total_bytes_stored;
    if budget.is_unlimited() {
        out.push_str(&format!("Cache usage: {} (no limit)\n", format_bytes(used)));
    } else {
        #[allow(clippy::cast_precision_loss)]
        let percent = used as f64 / budget.max_total_bytes as f64 * 100.0;
        out.push_str(&format!(
            "Cache usage: {} of {} ({})\n",
            format_bytes(used),
            format_bytes(budget.max_total_bytes),
            format_percent(percent)
        ));
    }
    out.push_str(&format!("Fetch mode:  {}\n", budget.fetch_mode));
    for &class in RetentionClass::ALL {
        let usage = summary.class(class);
        out.push_str(&format!(
            "  {:<15} {:>5} cached / {:>5} tracks\n",
            class.as_str(),
            usage.cached,
            usage.eligible
        ));
    }
    match computed_at(summary) {
        Some(at) => {
            out.push_str(&format!("Last recalculated: {}", format_age(at, Utc::now())));
        }
        None => out.push_str("Last recalculated: never"),
    }
    out
}

#[must_use]
pub fn render_purge(report: &PurgeReport) -> String {
    match report.outcome {
        PurgeOutcome::NotNeeded => "Within budget; nothing evicted.".to_string(),
        PurgeOutcome::WithinBudget => format!(
            "Evicted {} track(s), freed {}.",
            report.evicted.len(),
            format_bytes(report.bytes_freed)
        ),
        PurgeOutcome::NothingToEvict { bytes_over } => format!(
            "Evicted {} track(s), still {} over budget with nothing left to evict.",
            report.evicted.len(),
            format_bytes(bytes_over)
        ),
    }
}

/// Advice line for a storage suggestion raised during the command.
#[must_use]
pub fn render_storage_hint(events: &[CacheEvent]) -> Option<String> {
    events.iter().find_map(|event| match event {
        CacheEvent::StorageIncreaseSuggested { required_bytes, .. } => Some(format!(
            "Not enough storage for your always-offline tracks. \
             Run `trackcache budget set {required_bytes}` to allocate {}.",
            format_bytes(*required_bytes)
        )),
        _ => None,
    })
}

fn computed_at(summary: &UsageSummary) -> Option<chrono::DateTime<Utc>> {
    (summary.computed_at.timestamp_millis() > 0).then_some(summary.computed_at)
}
