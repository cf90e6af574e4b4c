//! Cache metadata index.
//!
//! Authoritative per-track record of what is cached, when, and how large it
//! is. Built on the local `tracks` table (see [`crate::storage::schema`]).
//! The connection sits behind a mutex so the index can be shared between the
//! scheduler, planner and accountant.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::core::models::{
    ClassUsage, ResourceKind, RetentionClass, TrackCacheState, TrackId, TrackMeta,
};
use crate::error::{CacheError, Result};
use crate::storage::schema::run_migrations;

const SELECT_COLUMNS: &str = "id, retention_class, audio_byte_size, art_byte_size, \
    thumbnail_byte_size, audio_cached_at, art_cached_at, thumbnail_cached_at, \
    last_accessed_on_device";

const ANY_CACHED: &str = "(audio_cached_at IS NOT NULL \
    OR art_cached_at IS NOT NULL OR thumbnail_cached_at IS NOT NULL)";

/// Track index access layer.
pub struct CacheMetadataIndex {
    conn: Mutex<Connection>,
}

impl CacheMetadataIndex {
    /// Create or open an index database at the given path.
    ///
    /// # Errors
    /// Returns an error if the parent directory cannot be created, the database
    /// cannot be opened, or schema migrations fail.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")?;
        run_migrations(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory index (for testing).
    ///
    /// # Errors
    /// Returns an error if the in-memory database cannot be opened or migrations fail.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        run_migrations(&mut conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -------------------------------------------------------------------------
    // Library sync
    // -------------------------------------------------------------------------

    /// Insert or refresh a track from library sync.
    ///
    /// Existing cache flags and access times are preserved.
    ///
    /// # Errors
    /// Returns an error if the statement fails.
    pub fn upsert_track(&self, meta: &TrackMeta) -> Result<()> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO tracks ( \
                id, retention_class, audio_byte_size, art_byte_size, thumbnail_byte_size, synced_at \
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
            ON CONFLICT(id) DO UPDATE SET \
                retention_class = excluded.retention_class, \
                audio_byte_size = excluded.audio_byte_size, \
                art_byte_size = excluded.art_byte_size, \
                thumbnail_byte_size = excluded.thumbnail_byte_size, \
                synced_at = excluded.synced_at",
        )?;
        stmt.execute(params![
            meta.id.as_str(),
            meta.retention_class.as_str(),
            to_sql_size(meta.audio_byte_size),
            to_sql_size(meta.art_byte_size),
            to_sql_size(meta.thumbnail_byte_size),
            Utc::now().timestamp_millis(),
        ])?;
        Ok(())
    }

    /// Delete a track row, returning its last state.
    ///
    /// # Errors
    /// Returns an error if the queries fail.
    pub fn remove_track(&self, id: &TrackId) -> Result<Option<TrackCacheState>> {
        let existing = self.find_by_id(id)?;
        if existing.is_some() {
            self.conn()
                .execute("DELETE FROM tracks WHERE id = ?1", [id.as_str()])?;
        }
        Ok(existing)
    }

    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub fn find_by_id(&self, id: &TrackId) -> Result<Option<TrackCacheState>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare_cached(&format!("SELECT {SELECT_COLUMNS} FROM tracks WHERE id = ?1"))?;
        Ok(stmt.query_row([id.as_str()], map_row).optional()?)
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Set or clear the cached-at timestamp for one resource kind.
    ///
    /// # Errors
    /// Returns [`CacheError::TrackNotFound`] if the track is not indexed.
    pub fn set_cached_at(
        &self,
        id: &TrackId,
        kind: ResourceKind,
        at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let sql = format!("UPDATE tracks SET {} = ?1 WHERE id = ?2", cached_column(kind));
        let updated = self
            .conn()
            .execute(&sql, params![at.map(|t| t.timestamp_millis()), id.as_str()])?;
        ensure_updated(updated, id)
    }

    /// Clear every cached-at flag for a track.
    ///
    /// # Errors
    /// Returns [`CacheError::TrackNotFound`] if the track is not indexed.
    pub fn clear_cached(&self, id: &TrackId) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE tracks SET audio_cached_at = NULL, art_cached_at = NULL, \
             thumbnail_cached_at = NULL WHERE id = ?1",
            [id.as_str()],
        )?;
        ensure_updated(updated, id)
    }

    /// Record the start of playback.
    ///
    /// # Errors
    /// Returns [`CacheError::TrackNotFound`] if the track is not indexed.
    pub fn set_last_accessed(&self, id: &TrackId, at: DateTime<Utc>) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE tracks SET last_accessed_on_device = ?1 WHERE id = ?2",
            params![at.timestamp_millis(), id.as_str()],
        )?;
        ensure_updated(updated, id)
    }

    /// # Errors
    /// Returns [`CacheError::TrackNotFound`] if the track is not indexed.
    pub fn set_retention_class(&self, id: &TrackId, class: RetentionClass) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE tracks SET retention_class = ?1 WHERE id = ?2",
            params![class.as_str(), id.as_str()],
        )?;
        ensure_updated(updated, id)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Tracks of `class` with audio uncached, or art uncached where art exists.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub fn get_tracks_needing_cache(&self, class: RetentionClass) -> Result<Vec<TrackCacheState>> {
        self.query_states(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM tracks WHERE retention_class = ?1 \
                 AND (audio_cached_at IS NULL OR (art_cached_at IS NULL AND art_byte_size > 0)) \
                 ORDER BY id"
            ),
            params![class.as_str()],
        )
    }

    /// Cached tracks of `class`, least recently accessed first.
    ///
    /// Never-accessed tracks sort before any accessed one.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub fn get_cached_tracks(
        &self,
        class: RetentionClass,
        limit: usize,
    ) -> Result<Vec<TrackCacheState>> {
        self.query_states(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM tracks WHERE retention_class = ?1 AND {ANY_CACHED} \
                 ORDER BY last_accessed_on_device ASC NULLS FIRST, id ASC LIMIT ?2"
            ),
            params![class.as_str(), i64::try_from(limit).unwrap_or(i64::MAX)],
        )
    }

    /// Every track holding at least one blob, in any class.
    ///
    /// # Errors
    /// Returns an error if the query fails or a row cannot be decoded.
    pub fn all_cached(&self) -> Result<Vec<TrackCacheState>> {
        self.query_states(
            &format!("SELECT {SELECT_COLUMNS} FROM tracks WHERE {ANY_CACHED} ORDER BY id"),
            [],
        )
    }

    /// Eligible and cached (audio present) counts per retention class.
    ///
    /// Every class is present in the result, zero-filled.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub fn get_usage_counts(&self) -> Result<BTreeMap<RetentionClass, ClassUsage>> {
        let mut counts: BTreeMap<RetentionClass, ClassUsage> = RetentionClass::ALL
            .iter()
            .map(|class| (*class, ClassUsage::default()))
            .collect();

        let conn = self.conn();
        let mut stmt = conn.prepare_cached(
            "SELECT retention_class, COUNT(*), \
                SUM(CASE WHEN audio_cached_at IS NOT NULL THEN 1 ELSE 0 END) \
             FROM tracks GROUP BY retention_class",
        )?;
        let rows = stmt.query_map([], |row| {
            let class: String = row.get(0)?;
            let eligible: i64 = row.get(1)?;
            let cached: Option<i64> = row.get(2)?;
            Ok((class, eligible, cached.unwrap_or(0)))
        })?;

        for row in rows {
            let (class, eligible, cached) = row?;
            let class: RetentionClass = class.parse()?;
            counts.insert(
                class,
                ClassUsage {
                    eligible: from_sql_size(eligible),
                    cached: from_sql_size(cached),
                },
            );
        }

        Ok(counts)
    }

    /// Number of indexed tracks.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub fn track_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))?;
        Ok(from_sql_size(count))
    }

    fn query_states<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<TrackCacheState>> {
        let conn = self.conn();
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params, map_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(CacheError::from)
    }
}

const fn cached_column(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Audio => "audio_cached_at",
        ResourceKind::Art => "art_cached_at",
        ResourceKind::Thumbnail => "thumbnail_cached_at",
    }
}

fn ensure_updated(updated: usize, id: &TrackId) -> Result<()> {
    if updated == 0 {
        Err(CacheError::TrackNotFound(id.to_string()))
    } else {
        Ok(())
    }
}

fn to_sql_size(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_size(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<TrackCacheState> {
    let class: String = row.get(1)?;
    let retention_class = class
        .parse::<RetentionClass>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;

    Ok(TrackCacheState {
        id: TrackId::new(row.get::<_, String>(0)?),
        retention_class,
        audio_byte_size: from_sql_size(row.get(2)?),
        art_byte_size: from_sql_size(row.get(3)?),
        thumbnail_byte_size: from_sql_size(row.get(4)?),
        audio_cached_at: millis_to_datetime(row.get(5)?),
        art_cached_at: millis_to_datetime(row.get(6)?),
        thumbnail_cached_at: millis_to_datetime(row.get(7)?),
        last_accessed_on_device: millis_to_datetime(row.get(8)?),
    })
}

fn millis_to_datetime(value: Option<i64>) -> Option<DateTime<Utc>> {
    value.and_then(DateTime::from_timestamp_millis)
}
