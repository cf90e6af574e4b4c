//! Small persisted state files.
//!
//! The usage summary and the storage-prompt flag live in JSON files next to
//! each other in the cache directory. Writes are atomic (temp file + rename);
//! reads degrade to `None` on a missing or corrupt file so a damaged state file
//! never blocks startup.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::Result;

/// One-shot "increase storage?" prompt bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PromptState {
    /// User said no; never suggest again.
    pub declined_storage_increase: bool,
}

/// Read a state file.
///
/// Returns `Ok(None)` when the file does not exist. A file that exists but
/// does not parse is logged and treated as absent.
///
/// # Errors
/// Returns an I/O error for failures other than "not found".
pub fn read<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_str(&content) {
        Ok(data) => Ok(Some(data)),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Ignoring unreadable state file");
            Ok(None)
        }
    }
}

/// Write a state file atomically, creating its directory if needed.
///
/// # Errors
/// Returns an error if serialization or any filesystem step fails.
pub fn write<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_vec_pretty(data)?;
    write_atomic(path, &content)?;
    tracing::trace!(path = %path.display(), bytes = content.len(), "Wrote state file");
    Ok(())
}

fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("state"),
        std::process::id()
    ));

    {
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }

    std::fs::rename(&temp_path, path)
}
