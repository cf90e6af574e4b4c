//! Budget-driven eviction.
//!
//! Transient tracks go first, least recently played first. Always-offline
//! tracks are only touched once no transient track holds a blob.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::core::accountant::UsageAccountant;
use crate::core::events::{CacheEvent, CacheEvents};
use crate::core::logging::SEVERITY_CRITICAL;
use crate::core::models::{RetentionClass, TrackCacheState, TrackId};
use crate::error::Result;
use crate::storage::{ByteStore, CacheMetadataIndex, ConfigHandle};

/// How a purge pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeOutcome {
    /// Unlimited budget or already within it; nothing was touched.
    NotNeeded,
    /// Evicted until usage fit the budget.
    WithinBudget,
    /// Still over budget with no cached track left to evict.
    NothingToEvict { bytes_over: u64 },
}

/// What a purge pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeReport {
    pub outcome: PurgeOutcome,
    /// Evicted tracks, in eviction order.
    pub evicted: Vec<TrackId>,
    pub bytes_freed: u64,
    /// Bytes freed from always-offline tracks.
    pub always_offline_bytes_freed: u64,
}

impl PurgeReport {
    const fn new() -> Self {
        Self {
            outcome: PurgeOutcome::NotNeeded,
            evicted: Vec::new(),
            bytes_freed: 0,
            always_offline_bytes_freed: 0,
        }
    }

    /// Whether always-offline selections had to give up space.
    #[must_use]
    pub const fn touched_always_offline(&self) -> bool {
        self.always_offline_bytes_freed > 0
            || matches!(self.outcome, PurgeOutcome::NothingToEvict { .. })
    }
}

/// Exclusive access to blob-and-flag updates.
///
/// Held by the planner for a whole purge, and by every writer around the
/// step that stores or deletes a blob and updates its index flags, so a blob
/// on disk always agrees with its flag.
#[derive(Debug, Clone, Default)]
pub struct CommitLock(Arc<Mutex<()>>);

impl CommitLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lock is free.
    pub fn hold(&self) -> MutexGuard<'_, ()> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Selects and deletes eviction victims.
pub struct EvictionPlanner {
    index: Arc<CacheMetadataIndex>,
    store: Arc<ByteStore>,
    accountant: Arc<UsageAccountant>,
    config: ConfigHandle,
    events: CacheEvents,
    lock: CommitLock,
}

impl EvictionPlanner {
    #[must_use]
    pub fn new(
        index: Arc<CacheMetadataIndex>,
        store: Arc<ByteStore>,
        accountant: Arc<UsageAccountant>,
        config: ConfigHandle,
        events: CacheEvents,
    ) -> Self {
        Self {
            index,
            store,
            accountant,
            config,
            events,
            lock: CommitLock::new(),
        }
    }

    /// The lock this planner holds while purging. Writers that commit blobs
    /// must hold it too.
    #[must_use]
    pub fn commit_lock(&self) -> CommitLock {
        self.lock.clone()
    }

    /// Evict until usage fits the budget, starting with `class`.
    ///
    /// Works from the accountant's last summary and recalculates after each
    /// batch. Blocking; run on the blocking pool from async code.
    ///
    /// # Errors
    /// Returns an error if the index cannot be queried or a blob cannot be
    /// deleted. Tracks evicted before the failure stay evicted.
    pub fn purge_if_over_budget(&self, class: RetentionClass) -> Result<PurgeReport> {
        let _guard = self.lock.hold();
        let config = self.config.get();
        let budget = config.budget;
        let batch_size = config.scheduler.eviction_batch_size.max(1);

        let mut report = PurgeReport::new();
        let mut class = match class {
            RetentionClass::OnlineOnly => RetentionClass::Transient,
            other => other,
        };
        let mut current = self.accountant.summary().total_bytes_stored;

        loop {
            let bytes_to_free = budget.overage(current);
            if bytes_to_free == 0 {
                if !report.evicted.is_empty() {
                    report.outcome = PurgeOutcome::WithinBudget;
                }
                break;
            }

            let batch = self.index.get_cached_tracks(class, batch_size)?;
            if batch.is_empty() {
                if class == RetentionClass::Transient {
                    tracing::info!(
                        bytes_over = bytes_to_free,
                        "No transient tracks left; evicting always-offline tracks"
                    );
                    class = RetentionClass::AlwaysOffline;
                    continue;
                }
                tracing::error!(
                    severity = SEVERITY_CRITICAL,
                    bytes_over = bytes_to_free,
                    max_total_bytes = budget.max_total_bytes,
                    "Over storage budget with nothing left to evict"
                );
                report.outcome = PurgeOutcome::NothingToEvict {
                    bytes_over: bytes_to_free,
                };
                break;
            }

            let mut freed_this_batch = 0u64;
            for victim in batch {
                if freed_this_batch >= bytes_to_free {
                    break;
                }
                let freed = self.evict(&victim)?;
                freed_this_batch += freed;
                report.bytes_freed += freed;
                if class == RetentionClass::AlwaysOffline {
                    report.always_offline_bytes_freed += freed;
                }
                report.evicted.push(victim.id);
            }

            current = self.accountant.recalculate()?.total_bytes_stored;
        }

        if !report.evicted.is_empty() {
            tracing::info!(
                evicted = report.evicted.len(),
                bytes_freed = report.bytes_freed,
                "Eviction pass finished"
            );
        }
        Ok(report)
    }

    fn evict(&self, victim: &TrackCacheState) -> Result<u64> {
        let size = victim.cached_bytes();
        self.store.purge_track(&victim.id)?;
        self.index.clear_cached(&victim.id)?;
        tracing::debug!(
            track_id = %victim.id,
            class = %victim.retention_class,
            bytes = size,
            "Evicted track"
        );
        self.events.publish(&CacheEvent::TrackCacheChanged {
            track_id: victim.id.clone(),
            cached: false,
        });
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{CacheBudget, FetchMode, ResourceKind, TrackMeta};
    use crate::storage::CacheConfig;
    use chrono::{Duration, Utc};
    use tempfile::TempDir;

    struct Fixture {
        _tmp: TempDir,
        index: Arc<CacheMetadataIndex>,
        store: Arc<ByteStore>,
        accountant: Arc<UsageAccountant>,
        planner: EvictionPlanner,
    }

    fn fixture(max_total_bytes: u64) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let index = Arc::new(CacheMetadataIndex::open_in_memory().unwrap());
        let store = Arc::new(ByteStore::open(tmp.path().join("blobs")).unwrap());
        let events = CacheEvents::new();
        let accountant = Arc::new(UsageAccountant::new(
            Arc::clone(&index),
            Arc::clone(&store),
            events.clone(),
            tmp.path().join("usage-summary.json"),
        ));
        let mut config = CacheConfig::default();
        config.budget = CacheBudget {
            max_total_bytes,
            fetch_mode: FetchMode::Always,
        };
        let planner = EvictionPlanner::new(
            Arc::clone(&index),
            Arc::clone(&store),
            Arc::clone(&accountant),
            ConfigHandle::new(config),
            events,
        );
        Fixture {
            _tmp: tmp,
            index,
            store,
            accountant,
            planner,
        }
    }

    fn cache(f: &Fixture, id: &str, class: RetentionClass, bytes: u64, days_ago: i64) {
        let meta = TrackMeta::new(id, bytes, 0).with_class(class);
        f.index.upsert_track(&meta).unwrap();
        f.store.put(&meta.id, ResourceKind::Audio, b"x").unwrap();
        let at = Utc::now() - Duration::days(days_ago);
        f.index
            .set_cached_at(&meta.id, ResourceKind::Audio, Some(at))
            .unwrap();
        f.index.set_last_accessed(&meta.id, at).unwrap();
    }

    fn ids(report: &PurgeReport) -> Vec<&str> {
        report.evicted.iter().map(TrackId::as_str).collect()
    }

    #[test]
    fn unlimited_budget_is_noop() {
        let f = fixture(0);
        cache(&f, "a", RetentionClass::Transient, 10_000, 1);
        f.accountant.recalculate().unwrap();

        let report = f.planner.purge_if_over_budget(RetentionClass::Transient).unwrap();
        assert_eq!(report.outcome, PurgeOutcome::NotNeeded);
        assert!(report.evicted.is_empty());
    }

    #[test]
    fn usage_equal_to_budget_is_within_it() {
        let f = fixture(800);
        cache(&f, "a", RetentionClass::Transient, 400, 2);
        cache(&f, "b", RetentionClass::Transient, 400, 1);
        assert_eq!(f.accountant.recalculate().unwrap().total_bytes_stored, 800);

        let report = f.planner.purge_if_over_budget(RetentionClass::Transient).unwrap();
        assert_eq!(report.outcome, PurgeOutcome::NotNeeded);
        assert!(report.evicted.is_empty());
        assert!(f.store.contains(&TrackId::new("a"), ResourceKind::Audio));
    }

    #[test]
    fn purge_waits_for_commit_lock() {
        let f = Arc::new(fixture(500));
        cache(&f, "a", RetentionClass::Transient, 400, 2);
        cache(&f, "b", RetentionClass::Transient, 400, 1);
        f.accountant.recalculate().unwrap();

        let lock = f.planner.commit_lock();
        let held = lock.hold();
        let purging = {
            let f = Arc::clone(&f);
            std::thread::spawn(move || {
                f.planner
                    .purge_if_over_budget(RetentionClass::Transient)
                    .unwrap()
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(f.store.contains(&TrackId::new("a"), ResourceKind::Audio));

        drop(held);
        let report = purging.join().unwrap();
        assert_eq!(ids(&report), vec!["a"]);
    }

    #[test]
    fn evicts_oldest_until_within_budget() {
        let f = fixture(1000);
        cache(&f, "t1", RetentionClass::Transient, 400, 3);
        cache(&f, "t2", RetentionClass::Transient, 400, 2);
        cache(&f, "new", RetentionClass::Transient, 500, 0);
        assert_eq!(f.accountant.recalculate().unwrap().total_bytes_stored, 1300);

        let report = f.planner.purge_if_over_budget(RetentionClass::Transient).unwrap();
        assert_eq!(report.outcome, PurgeOutcome::WithinBudget);
        assert_eq!(ids(&report), vec!["t1"]);
        assert_eq!(f.accountant.summary().total_bytes_stored, 900);
        assert!(f.store.contains(&TrackId::new("new"), ResourceKind::Audio));
        assert!(!f.store.contains(&TrackId::new("t1"), ResourceKind::Audio));
        assert!(f.store.contains(&TrackId::new("t2"), ResourceKind::Audio));
    }

    #[test]
    fn purge_is_idempotent() {
        let f = fixture(500);
        cache(&f, "a", RetentionClass::Transient, 400, 2);
        cache(&f, "b", RetentionClass::Transient, 400, 1);
        f.accountant.recalculate().unwrap();

        let first = f.planner.purge_if_over_budget(RetentionClass::Transient).unwrap();
        assert_eq!(ids(&first), vec!["a"]);
        let second = f.planner.purge_if_over_budget(RetentionClass::Transient).unwrap();
        assert_eq!(second.outcome, PurgeOutcome::NotNeeded);
        assert!(second.evicted.is_empty());
    }

    #[test]
    fn transient_evicted_before_always_offline() {
        let f = fixture(500);
        cache(&f, "offline-old", RetentionClass::AlwaysOffline, 400, 30);
        cache(&f, "transient-new", RetentionClass::Transient, 400, 0);
        f.accountant.recalculate().unwrap();

        let report = f.planner.purge_if_over_budget(RetentionClass::Transient).unwrap();
        assert_eq!(ids(&report), vec!["transient-new"]);
        assert!(!report.touched_always_offline());
    }

    #[test]
    fn falls_through_to_always_offline() {
        let f = fixture(500);
        cache(&f, "o1", RetentionClass::AlwaysOffline, 400, 2);
        cache(&f, "o2", RetentionClass::AlwaysOffline, 400, 1);
        f.accountant.recalculate().unwrap();

        let report = f.planner.purge_if_over_budget(RetentionClass::Transient).unwrap();
        assert_eq!(ids(&report), vec!["o1"]);
        assert_eq!(report.always_offline_bytes_freed, 400);
        assert!(report.touched_always_offline());
    }

    #[test]
    fn never_accessed_evicted_first() {
        let f = fixture(500);
        cache(&f, "played", RetentionClass::Transient, 400, 5);
        let meta = TrackMeta::new("never", 400, 0);
        f.index.upsert_track(&meta).unwrap();
        f.store.put(&meta.id, ResourceKind::Audio, b"x").unwrap();
        f.index
            .set_cached_at(&meta.id, ResourceKind::Audio, Some(Utc::now()))
            .unwrap();
        f.accountant.recalculate().unwrap();

        let report = f.planner.purge_if_over_budget(RetentionClass::Transient).unwrap();
        assert_eq!(ids(&report), vec!["never"]);
    }

    #[test]
    fn nothing_to_evict_reports_overage() {
        let f = fixture(100);
        cache(&f, "a", RetentionClass::Transient, 400, 1);
        f.accountant.recalculate().unwrap();
        f.index.clear_cached(&TrackId::new("a")).unwrap();

        let report = f.planner.purge_if_over_budget(RetentionClass::Transient).unwrap();
        assert_eq!(
            report.outcome,
            PurgeOutcome::NothingToEvict { bytes_over: 300 }
        );
        assert!(report.touched_always_offline());
    }
}
