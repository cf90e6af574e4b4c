//! Track commands: the library-sync hooks exposed for scripting.

use serde_json::json;

use crate::cli::args::{OutputFormat, TrackCommand};
use crate::cli::context::CliContext;
use crate::cli::output;
use crate::core::manager::PostRecalc;
use crate::core::models::{TrackId, TrackMeta};
use crate::error::Result;

/// Execute a track subcommand.
///
/// # Errors
/// Returns an error if the index or byte store update fails.
pub async fn execute(cmd: &TrackCommand, ctx: &CliContext) -> Result<()> {
    let manager = ctx.open_offline()?;

    let (command, data, message) = match cmd {
        TrackCommand::Add {
            id,
            audio_bytes,
            art_bytes,
            class,
        } => {
            let meta = TrackMeta::new(id.as_str(), *audio_bytes, *art_bytes)
                .with_class((*class).into());
            manager.sync_track(&meta)?;
            let data = json!({
                "trackId": meta.id,
                "retentionClass": meta.retention_class,
                "audioByteSize": meta.audio_byte_size,
                "artByteSize": meta.art_byte_size,
            });
            let message = format!("Recorded {} as {}.", meta.id, meta.retention_class);
            ("track add", data, message)
        }
        TrackCommand::Remove { id } => {
            let id = TrackId::new(id.as_str());
            let removed = manager.remove_track(&id)?;
            let freed = removed.as_ref().map_or(0, |state| state.cached_bytes());
            let data = json!({
                "trackId": id,
                "removed": removed.is_some(),
                "bytesFreed": freed,
            });
            let message = if removed.is_some() {
                format!("Removed {id}.")
            } else {
                format!("{id} is not in the library.")
            };
            ("track remove", data, message)
        }
    };

    let summary = manager.recalculate_usage(PostRecalc::SuppressPurge).await?;

    match ctx.format {
        OutputFormat::Json => {
            let mut data = data;
            data["usage"] = output::summary_json(&summary);
            output::print_json(command, data)
        }
        OutputFormat::Human => {
            println!("{message}");
            Ok(())
        }
    }
}
