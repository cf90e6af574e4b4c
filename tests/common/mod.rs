//! Common helpers for integration tests.
//!
//! # Modules
//!
//! - `log_capture`: Thread-local tracing capture with assertions

#![allow(dead_code)]

pub mod log_capture;

use std::path::Path;

use assert_cmd::Command;

/// Environment variables that would leak host configuration into a CLI run.
const HOST_ENV: &[&str] = &[
    "TRACKCACHE_CONFIG",
    "TRACKCACHE_DATA_DIR",
    "TRACKCACHE_MAX_BYTES",
    "TRACKCACHE_FETCH_MODE",
    "TRACKCACHE_LINK_ENDPOINT",
    "TRACKCACHE_TIMEOUT",
    "TRACKCACHE_LOG",
    "TRACKCACHE_LOG_FORMAT",
    "TRACKCACHE_LOG_FILE",
];

/// A `trackcache` command rooted at `data_dir` with host settings cleared.
#[allow(deprecated)]
pub fn trackcache(data_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("trackcache").expect("trackcache binary");
    for key in HOST_ENV {
        cmd.env_remove(key);
    }
    cmd.arg("--data-dir").arg(data_dir);
    cmd
}

/// Parse a command's stdout as JSON.
pub fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout)
        .unwrap_or_else(|e| panic!("stdout is not JSON ({e}):\n{stdout}"))
}
