//! Background download command.

use serde_json::json;

use crate::cli::args::{OutputFormat, SyncArgs};
use crate::cli::context::CliContext;
use crate::cli::output;
use crate::core::device::StaticDeviceProbe;
use crate::core::manager::PostRecalc;
use crate::core::scheduler::{InterruptFlag, PassReport, PassState};
use crate::error::Result;
use crate::util::format_bytes;

/// Run one always-offline download pass under the reported device state.
///
/// Ctrl-C raises the interrupt flag; the pass stops after the transfer in
/// flight and keeps what it finished.
///
/// # Errors
/// Returns an error if no link endpoint is configured or the index fails.
pub async fn execute(args: &SyncArgs, ctx: &CliContext) -> Result<()> {
    let endpoint = ctx.require_link_endpoint()?;
    tracing::debug!(endpoint, network = ?args.network, "Starting sync");

    let mut device =
        StaticDeviceProbe::new(args.network.into()).with_power_saving(args.power_saving);
    if let Some(bytes) = args.free_bytes {
        device = device.with_free_disk_bytes(bytes);
    }
    let manager = ctx.open_manager(device)?;
    let log = manager.events().record();

    let interrupt = InterruptFlag::new();
    let on_signal = interrupt.clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received; stopping after the current download");
            on_signal.interrupt();
        }
    });

    let report = manager.download_always_offline_music(&interrupt).await;
    signal_task.abort();
    let report = report?;

    if !report.cached.is_empty() {
        manager.recalculate_usage(PostRecalc::Purge).await?;
    }
    let events = log.snapshot();

    match ctx.format {
        OutputFormat::Json => output::print_json(
            "sync",
            json!({
                "pass": report,
                "usage": output::summary_json(&manager.summary()),
                "events": events,
            }),
        ),
        OutputFormat::Human => {
            println!("{}", render_pass(&report));
            if let Some(hint) = output::render_storage_hint(&events) {
                println!("{hint}");
            }
            Ok(())
        }
    }
}

fn render_pass(report: &PassReport) -> String {
    let reason = serde_json::to_value(report.reason)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    match report.state {
        PassState::Skipped => format!("Sync skipped: {reason}."),
        PassState::Completed | PassState::Interrupted => {
            let mut line = format!(
                "Cached {} track(s) ({}), {} failed",
                report.cached.len(),
                format_bytes(report.bytes_downloaded),
                report.failed.len()
            );
            if report.state == PassState::Interrupted {
                line.push_str(&format!("; stopped early: {reason}"));
            }
            if report.unmet_bytes > 0 {
                line.push_str(&format!(
                    "; {} still to download",
                    format_bytes(report.unmet_bytes)
                ));
            }
            line.push('.');
            line
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::TrackId;
    use crate::core::scheduler::StopReason;

    #[test]
    fn skipped_pass_names_reason() {
        let report = PassReport {
            state: PassState::Skipped,
            reason: StopReason::NotOnWifi,
            cached: vec![],
            failed: vec![],
            bytes_downloaded: 0,
            unmet_bytes: 0,
        };
        assert_eq!(render_pass(&report), "Sync skipped: not-on-wifi.");
    }

    #[test]
    fn interrupted_pass_reports_remaining() {
        let report = PassReport {
            state: PassState::Interrupted,
            reason: StopReason::BudgetExhausted,
            cached: vec![TrackId::new("a")],
            failed: vec![],
            bytes_downloaded: 2048,
            unmet_bytes: 1024,
        };
        let line = render_pass(&report);
        assert!(line.contains("Cached 1 track(s) (2.0 KiB)"), "{line}");
        assert!(line.contains("budget-exhausted"));
        assert!(line.contains("1.0 KiB still to download"));
    }
}
