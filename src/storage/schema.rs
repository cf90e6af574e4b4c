//! Track index schema and migrations.
//!
//! The schema version lives in `PRAGMA user_version`. Each migration script
//! runs once, in order, inside its own transaction together with the version
//! bump, so a crash leaves the index at the last fully applied version.

use rusqlite::Connection;

use crate::error::{CacheError, Result};

/// Migration scripts; entry `n` upgrades from version `n` to `n + 1`.
const MIGRATIONS: &[&str] = &[
    include_str!("../../migrations/001_tracks.sql"),
    include_str!("../../migrations/002_cached_lookup.sql"),
];

/// Latest schema version known to this build.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
pub const SCHEMA_VERSION: i32 = MIGRATIONS.len() as i32;

/// Bring the track index up to [`SCHEMA_VERSION`].
///
/// Returns the version the index is at afterwards.
///
/// # Errors
/// Returns [`CacheError::Index`] if a script fails to apply, or
/// [`CacheError::CorruptValue`] if the index was written by a newer build.
pub fn run_migrations(conn: &mut Connection) -> Result<i32> {
    let current = user_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(CacheError::CorruptValue {
            column: "user_version".to_string(),
            value: current.to_string(),
        });
    }

    let applied = usize::try_from(current).unwrap_or(0);
    for (from, sql) in MIGRATIONS.iter().enumerate().skip(applied) {
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        let to = from as i32 + 1;
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", to)?;
        tx.commit()?;
        tracing::debug!(version = to, "Applied track index migration");
    }

    user_version(conn)
}

fn user_version(conn: &Connection) -> Result<i32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}
