//! Usage accounting.
//!
//! [`UsageAccountant::recalculate`] walks every cached track, clears flags
//! whose blobs have gone missing, and sums what remains. The result is kept in
//! memory for cheap budget checks and persisted so the next start has a
//! starting point before the first recalculation.

use std::cell::Cell;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;

use crate::core::events::{CacheEvent, CacheEvents};
use crate::core::models::{ResourceKind, TrackCacheState, UsageSummary};
use crate::error::Result;
use crate::storage::{ByteStore, CacheMetadataIndex, state};

thread_local! {
    static FOREGROUND: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as foreground-interactive while alive.
///
/// Recalculation walks the whole index and must not run on such a thread.
#[derive(Debug)]
pub struct ForegroundGuard {
    previous: bool,
    _not_send: PhantomData<*const ()>,
}

impl ForegroundGuard {
    #[must_use]
    pub fn enter() -> Self {
        let previous = FOREGROUND.with(|flag| flag.replace(true));
        Self {
            previous,
            _not_send: PhantomData,
        }
    }
}

impl Drop for ForegroundGuard {
    fn drop(&mut self) {
        FOREGROUND.with(|flag| flag.set(self.previous));
    }
}

/// Whether the current thread holds a [`ForegroundGuard`].
#[must_use]
pub fn is_foreground_thread() -> bool {
    FOREGROUND.with(Cell::get)
}

/// Aggregates cached bytes and per-class counts.
pub struct UsageAccountant {
    index: Arc<CacheMetadataIndex>,
    store: Arc<ByteStore>,
    events: CacheEvents,
    summary_path: PathBuf,
    summary: RwLock<UsageSummary>,
}

impl UsageAccountant {
    /// Create an accountant, seeding the in-memory summary from disk.
    #[must_use]
    pub fn new(
        index: Arc<CacheMetadataIndex>,
        store: Arc<ByteStore>,
        events: CacheEvents,
        summary_path: PathBuf,
    ) -> Self {
        let summary = match state::read::<UsageSummary>(&summary_path) {
            Ok(Some(summary)) => summary,
            Ok(None) => UsageSummary::empty(),
            Err(e) => {
                tracing::warn!(error = %e, "Could not load usage summary; starting empty");
                UsageSummary::empty()
            }
        };

        Self {
            index,
            store,
            events,
            summary_path,
            summary: RwLock::new(summary),
        }
    }

    /// Last computed summary. May be stale.
    #[must_use]
    pub fn summary(&self) -> UsageSummary {
        self.summary
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Recompute usage from the index, repairing missing blobs on the way.
    ///
    /// Blocking; do not call from a foreground-interactive thread.
    ///
    /// # Errors
    /// Returns an error if the index cannot be read or a repair cannot be
    /// written back.
    ///
    /// # Panics
    /// In debug builds, panics when called on a thread holding a
    /// [`ForegroundGuard`].
    pub fn recalculate(&self) -> Result<UsageSummary> {
        if is_foreground_thread() {
            if cfg!(debug_assertions) {
                panic!("UsageAccountant::recalculate called on a foreground thread");
            }
            tracing::error!("UsageAccountant::recalculate called on a foreground thread");
        }

        let mut total_bytes_stored = 0u64;
        let mut repaired = 0usize;
        for mut track in self.index.all_cached()? {
            repaired += self.heal_track(&mut track)?;
            total_bytes_stored += track.cached_bytes();
        }

        let summary = UsageSummary {
            total_bytes_stored,
            by_class: self.index.get_usage_counts()?,
            computed_at: Utc::now(),
        };

        if let Err(e) = state::write(&self.summary_path, &summary) {
            tracing::warn!(error = %e, "Failed to persist usage summary");
        }
        *self.summary.write().unwrap_or_else(PoisonError::into_inner) = summary.clone();

        tracing::debug!(total_bytes_stored, repaired, "Usage recalculated");
        self.events.publish(&CacheEvent::UsageRecalculated {
            total_bytes: total_bytes_stored,
        });
        Ok(summary)
    }

    /// Clear cached flags on `track` whose blobs are missing, in the index and
    /// in the passed state. Returns the number of flags cleared.
    ///
    /// # Errors
    /// Returns an error if the index update fails.
    pub fn heal_track(&self, track: &mut TrackCacheState) -> Result<usize> {
        let mut cleared = 0;
        for kind in ResourceKind::ALL {
            if !track.is_cached(*kind) || self.store.contains(&track.id, *kind) {
                continue;
            }

            tracing::error!(
                track_id = %track.id,
                kind = %kind,
                "Cached flag set but blob is missing; clearing flag"
            );
            self.index.set_cached_at(&track.id, *kind, None)?;
            track.set_cached_at(*kind, None);
            cleared += 1;
            self.events.publish(&CacheEvent::InconsistencyRepaired {
                track_id: track.id.clone(),
                kind: *kind,
            });
        }
        Ok(cleared)
    }
}
