//! Manager lifecycle: budget changes, eviction order, the storage prompt,
//! library sync and playback repair.

use std::sync::Arc;
use std::time::Duration;

use trackcache::core::device::StaticDeviceProbe;
use trackcache::core::events::CacheEvent;
use trackcache::core::eviction::PurgeOutcome;
use trackcache::core::links::LinkResolver;
use trackcache::core::models::{CacheBudget, FetchMode, ResourceKind, RetentionClass, TrackId};
use trackcache::core::transport::BlobTransport;
use trackcache::storage::AppPaths;
use trackcache::test_utils::{
    FakeBlobTransport, FakeLinkResolver, TestCache, TestDir, make_test_config, make_test_track,
};
use trackcache::{CacheError, Collaborators, OfflineCacheManager, PostRecalc, PromptResponse};

fn budget(max_total_bytes: u64) -> CacheBudget {
    CacheBudget {
        max_total_bytes,
        fetch_mode: FetchMode::Always,
    }
}

fn ids(list: &[TrackId]) -> Vec<&str> {
    list.iter().map(TrackId::as_str).collect()
}

fn suggestions(events: &[CacheEvent]) -> Vec<(u64, u64)> {
    events
        .iter()
        .filter_map(|event| match event {
            CacheEvent::StorageIncreaseSuggested {
                required_bytes,
                current_budget,
            } => Some((*required_bytes, *current_budget)),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn lowering_budget_evicts_least_recently_played_transient() {
    let cache = TestCache::with_budget(0);
    cache.add_cached("old", RetentionClass::Transient, 300, 10);
    cache.add_cached("mid", RetentionClass::Transient, 300, 5);
    cache.add_cached("new", RetentionClass::Transient, 300, 1);
    cache
        .manager
        .recalculate_usage(PostRecalc::SuppressPurge)
        .await
        .unwrap();
    let log = cache.manager.events().record();

    let report = cache.manager.set_budget(budget(600)).await.unwrap();

    assert_eq!(report.outcome, PurgeOutcome::WithinBudget);
    assert_eq!(ids(&report.evicted), vec!["old"]);
    assert_eq!(report.bytes_freed, 300);
    assert!(!cache.is_cached("old"));
    assert!(cache.is_cached("mid"));
    assert!(cache.is_cached("new"));
    assert_eq!(cache.manager.summary().total_bytes_stored, 600);
    assert_eq!(cache.manager.config().budget.max_total_bytes, 600);
    assert!(log.snapshot().contains(&CacheEvent::TrackCacheChanged {
        track_id: TrackId::new("old"),
        cached: false,
    }));
    assert!(suggestions(&log.snapshot()).is_empty());
}

#[tokio::test]
async fn transient_tracks_go_before_always_offline() {
    let cache = TestCache::with_budget(0);
    cache.add_cached("keep", RetentionClass::AlwaysOffline, 400, 30);
    cache.add_cached("drop", RetentionClass::Transient, 400, 1);
    cache
        .manager
        .recalculate_usage(PostRecalc::SuppressPurge)
        .await
        .unwrap();

    let report = cache.manager.set_budget(budget(500)).await.unwrap();

    assert_eq!(ids(&report.evicted), vec!["drop"]);
    assert_eq!(report.always_offline_bytes_freed, 0);
    assert!(cache.is_cached("keep"));
    assert!(!cache.manager.storage_prompt_pending());
}

#[tokio::test]
async fn evicting_always_offline_suggests_more_storage() {
    let cache = TestCache::with_budget(0);
    cache.add_cached("a", RetentionClass::AlwaysOffline, 400, 9);
    cache.add_cached("b", RetentionClass::AlwaysOffline, 400, 2);
    cache
        .manager
        .recalculate_usage(PostRecalc::SuppressPurge)
        .await
        .unwrap();
    let log = cache.manager.events().record();

    let report = cache.manager.set_budget(budget(500)).await.unwrap();

    assert_eq!(ids(&report.evicted), vec!["a"]);
    assert_eq!(report.always_offline_bytes_freed, 400);
    assert_eq!(suggestions(&log.snapshot()), vec![(900, 500)]);
    assert!(cache.manager.storage_prompt_pending());

    let accepted = budget(1000);
    cache
        .manager
        .respond_to_storage_prompt(PromptResponse::Accept(accepted))
        .await
        .unwrap();
    assert!(!cache.manager.storage_prompt_pending());
    assert_eq!(cache.manager.config().budget, accepted);
}

#[tokio::test]
async fn declined_prompt_stays_declined_after_restart() {
    let cache = TestCache::with_budget(0);
    cache.add_cached("a", RetentionClass::AlwaysOffline, 400, 9);
    cache.add_cached("b", RetentionClass::AlwaysOffline, 400, 2);
    cache
        .manager
        .recalculate_usage(PostRecalc::SuppressPurge)
        .await
        .unwrap();
    cache.manager.set_budget(budget(500)).await.unwrap();
    assert!(cache.manager.storage_prompt_pending());
    cache
        .manager
        .respond_to_storage_prompt(PromptResponse::Decline)
        .await
        .unwrap();

    let TestCache {
        dir,
        paths,
        manager,
        ..
    } = cache;
    drop(manager);
    let cache = TestCache::open_at(dir, paths, make_test_config(0), StaticDeviceProbe::wifi());
    cache.add_cached("c", RetentionClass::AlwaysOffline, 400, 1);
    cache
        .manager
        .recalculate_usage(PostRecalc::SuppressPurge)
        .await
        .unwrap();
    let log = cache.manager.events().record();

    let report = cache.manager.set_budget(budget(500)).await.unwrap();

    assert_eq!(report.always_offline_bytes_freed, 400);
    assert!(suggestions(&log.snapshot()).is_empty());
    assert!(!cache.manager.storage_prompt_pending());
}

#[tokio::test]
async fn removing_a_track_deletes_its_blobs() {
    let cache = TestCache::with_budget(0);
    cache.add_cached("gone", RetentionClass::Transient, 100, 1);
    let log = cache.manager.events().record();

    let removed = cache.manager.remove_track(&TrackId::new("gone")).unwrap();

    assert!(removed.is_some_and(|state| state.is_cached(ResourceKind::Audio)));
    assert!(
        !cache
            .manager
            .store()
            .contains(&TrackId::new("gone"), ResourceKind::Audio)
    );
    assert!(
        cache
            .manager
            .index()
            .find_by_id(&TrackId::new("gone"))
            .unwrap()
            .is_none()
    );
    assert_eq!(
        log.snapshot(),
        vec![CacheEvent::TrackCacheChanged {
            track_id: TrackId::new("gone"),
            cached: false,
        }]
    );

    let again = cache.manager.remove_track(&TrackId::new("gone")).unwrap();
    assert!(again.is_none());
}

#[tokio::test]
async fn moving_to_online_only_drops_blobs() {
    let cache = TestCache::with_budget(0);
    cache.add_cached("a", RetentionClass::Transient, 100, 1);
    cache.add_cached("b", RetentionClass::AlwaysOffline, 100, 1);

    cache
        .manager
        .set_retention_class(&TrackId::new("a"), RetentionClass::OnlineOnly)
        .unwrap();
    cache
        .manager
        .sync_track(&make_test_track("b", RetentionClass::OnlineOnly, 100))
        .unwrap();

    assert!(!cache.is_cached("a"));
    assert!(!cache.is_cached("b"));
    let summary = cache
        .manager
        .recalculate_usage(PostRecalc::SuppressPurge)
        .await
        .unwrap();
    assert_eq!(summary.total_bytes_stored, 0);
    assert_eq!(summary.class(RetentionClass::OnlineOnly).eligible, 2);
}

#[tokio::test]
async fn retention_change_for_unknown_track_fails() {
    let cache = TestCache::with_budget(0);
    let err = cache
        .manager
        .set_retention_class(&TrackId::new("nope"), RetentionClass::AlwaysOffline)
        .unwrap_err();
    assert!(matches!(err, CacheError::TrackNotFound(_)));
}

#[tokio::test]
async fn playback_repairs_missing_blob() {
    let cache = TestCache::with_budget(0);
    cache.add_cached("t", RetentionClass::Transient, 100, 3);
    cache
        .manager
        .store()
        .delete(&TrackId::new("t"), ResourceKind::Audio)
        .unwrap();
    let log = cache.manager.events().record();

    let state = cache
        .manager
        .on_playback_started(&TrackId::new("t"))
        .unwrap();

    assert!(!state.is_cached(ResourceKind::Audio));
    assert!(
        state
            .last_accessed_on_device
            .is_some_and(|at| chrono::Utc::now() - at < chrono::TimeDelta::minutes(1))
    );
    assert_eq!(
        log.snapshot(),
        vec![CacheEvent::InconsistencyRepaired {
            track_id: TrackId::new("t"),
            kind: ResourceKind::Audio,
        }]
    );

    let err = cache
        .manager
        .on_playback_started(&TrackId::new("missing"))
        .unwrap_err();
    assert!(matches!(err, CacheError::TrackNotFound(_)));
}

#[tokio::test]
async fn reloading_config_with_lower_budget_evicts() {
    let cache = TestCache::with_budget(0);
    cache.add_cached("a", RetentionClass::Transient, 400, 5);
    cache.add_cached("b", RetentionClass::Transient, 400, 1);
    cache
        .manager
        .recalculate_usage(PostRecalc::SuppressPurge)
        .await
        .unwrap();

    cache
        .manager
        .reload_config(make_test_config(500))
        .await
        .unwrap();

    assert!(!cache.is_cached("a"));
    assert!(cache.is_cached("b"));
    assert_eq!(cache.manager.summary().total_bytes_stored, 400);
}

#[tokio::test]
async fn summary_survives_restart() {
    let cache = TestCache::with_budget(0);
    cache.add_cached("a", RetentionClass::AlwaysOffline, 250, 1);
    cache.add_cached("b", RetentionClass::Transient, 150, 1);
    let before = cache
        .manager
        .recalculate_usage(PostRecalc::SuppressPurge)
        .await
        .unwrap();

    let TestCache {
        dir,
        paths,
        manager,
        ..
    } = cache;
    drop(manager);
    let cache = TestCache::open_at(dir, paths, make_test_config(0), StaticDeviceProbe::wifi());

    assert_eq!(cache.manager.summary(), before);
    assert_eq!(cache.manager.summary().total_bytes_stored, 400);
}

#[tokio::test(start_paused = true)]
async fn burst_of_triggers_recalculates_once() {
    let cache = TestCache::with_budget(0);
    cache.add_cached("a", RetentionClass::Transient, 100, 1);
    let log = cache.manager.events().record();

    let mut handles = Vec::new();
    for _ in 0..5 {
        handles.push(
            cache
                .manager
                .enqueue_debounced_recalculation(PostRecalc::SuppressPurge),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let mut ran = Vec::new();
    for handle in handles {
        ran.push(handle.await.unwrap());
    }

    assert_eq!(ran, vec![false, false, false, false, true]);
    assert_eq!(
        log.count(|e| matches!(e, CacheEvent::UsageRecalculated { .. })),
        1
    );
    assert_eq!(cache.manager.summary().total_bytes_stored, 100);
}

#[tokio::test(start_paused = true)]
async fn debounced_purge_evicts_over_budget() {
    let cache = TestCache::with_budget(500);
    cache.add_cached("old", RetentionClass::Transient, 400, 4);
    cache.add_cached("new", RetentionClass::Transient, 400, 1);

    let ran = cache
        .manager
        .enqueue_debounced_recalculation(PostRecalc::Purge)
        .await
        .unwrap();

    assert!(ran);
    assert!(!cache.is_cached("old"));
    assert!(cache.is_cached("new"));
    assert_eq!(cache.manager.summary().total_bytes_stored, 400);
}

#[tokio::test(start_paused = true)]
async fn suppressed_request_keeps_pending_purge() {
    let cache = TestCache::with_budget(500);
    cache.add_cached("old", RetentionClass::Transient, 400, 4);
    cache.add_cached("gone", RetentionClass::Transient, 10, 2);
    cache.add_cached("new", RetentionClass::Transient, 400, 1);

    let purge = cache
        .manager
        .enqueue_debounced_recalculation(PostRecalc::Purge);
    cache.manager.remove_track(&TrackId::new("gone")).unwrap();
    let refresh = cache
        .manager
        .enqueue_debounced_recalculation(PostRecalc::SuppressPurge);

    assert!(!purge.await.unwrap());
    assert!(refresh.await.unwrap());
    assert!(!cache.is_cached("old"));
    assert!(cache.is_cached("new"));
    assert_eq!(cache.manager.summary().total_bytes_stored, 400);

    // The purge request was consumed by that run.
    cache.add_cached("late", RetentionClass::Transient, 400, 0);
    let ran = cache
        .manager
        .enqueue_debounced_recalculation(PostRecalc::SuppressPurge)
        .await
        .unwrap();
    assert!(ran);
    assert!(cache.is_cached("new"));
    assert_eq!(cache.manager.summary().total_bytes_stored, 800);
}

#[test]
fn open_requires_a_runtime() {
    let dir = TestDir::new();
    let paths = AppPaths::rooted(dir.path());
    let result = OfflineCacheManager::open(
        &paths,
        make_test_config(0),
        Collaborators {
            links: Arc::new(FakeLinkResolver::new()) as Arc<dyn LinkResolver>,
            transport: Arc::new(FakeBlobTransport::new()) as Arc<dyn BlobTransport>,
            device: Arc::new(StaticDeviceProbe::wifi()),
        },
    );
    let err = result.err().expect("open should fail without a runtime");
    assert!(err.to_string().contains("Tokio runtime"), "{err}");
}

#[tokio::test]
async fn invalid_config_is_rejected_on_open() {
    let dir = TestDir::new();
    let paths = AppPaths::rooted(dir.path());
    let mut config = make_test_config(0);
    config.scheduler.fetch_timeout_secs = 0;

    let result = OfflineCacheManager::open(
        &paths,
        config,
        Collaborators {
            links: Arc::new(FakeLinkResolver::new()),
            transport: Arc::new(FakeBlobTransport::new()),
            device: Arc::new(StaticDeviceProbe::wifi()),
        },
    );
    assert!(matches!(result, Err(CacheError::ConfigInvalid { .. })));
}
