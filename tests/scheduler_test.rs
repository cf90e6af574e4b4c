//! Background download passes driven through the manager with fake
//! collaborators.

use std::time::Duration;

use trackcache::core::device::StaticDeviceProbe;
use trackcache::core::events::CacheEvent;
use trackcache::core::models::{Connectivity, FetchMode, ResourceKind, RetentionClass, TrackId};
use trackcache::core::scheduler::{InterruptFlag, PassState, StopReason};
use trackcache::test_utils::{
    TestCache, fake_url, make_test_config, make_test_track, make_test_track_with_art,
};

fn add_offline(cache: &TestCache, ids: &[&str], bytes: u64) {
    for id in ids {
        cache.add_track(&make_test_track(id, RetentionClass::AlwaysOffline, bytes));
    }
}

fn ids(list: &[TrackId]) -> Vec<&str> {
    list.iter().map(TrackId::as_str).collect()
}

#[tokio::test]
async fn wifi_only_on_cellular_makes_no_attempts() {
    let mut config = make_test_config(0);
    config.budget.fetch_mode = FetchMode::WifiOnly;
    let cache = TestCache::open(config, StaticDeviceProbe::new(Connectivity::Cellular));
    add_offline(&cache, &["a", "b"], 100);

    let report = cache
        .manager
        .download_always_offline_music(&InterruptFlag::new())
        .await
        .unwrap();

    assert_eq!(report.state, PassState::Skipped);
    assert_eq!(report.reason, StopReason::NotOnWifi);
    assert_eq!(cache.links.calls(), 0);
    assert_eq!(cache.transport.attempts(), 0);
}

#[tokio::test]
async fn fetch_mode_never_skips() {
    let mut config = make_test_config(0);
    config.budget.fetch_mode = FetchMode::Never;
    let cache = TestCache::open(config, StaticDeviceProbe::wifi());
    add_offline(&cache, &["a"], 100);

    let report = cache
        .manager
        .download_always_offline_music(&InterruptFlag::new())
        .await
        .unwrap();

    assert_eq!(report.reason, StopReason::FetchModeNever);
    assert_eq!(cache.transport.attempts(), 0);
}

#[tokio::test]
async fn power_saving_skips_unless_allowed() {
    let cache = TestCache::open(
        make_test_config(0),
        StaticDeviceProbe::wifi().with_power_saving(true),
    );
    add_offline(&cache, &["a"], 100);
    let report = cache
        .manager
        .download_always_offline_music(&InterruptFlag::new())
        .await
        .unwrap();
    assert_eq!(report.reason, StopReason::PowerSaving);

    let mut config = make_test_config(0);
    config.scheduler.fetch_on_low_power = true;
    let cache = TestCache::open(config, StaticDeviceProbe::wifi().with_power_saving(true));
    add_offline(&cache, &["a"], 100);
    let report = cache
        .manager
        .download_always_offline_music(&InterruptFlag::new())
        .await
        .unwrap();
    assert_eq!(report.state, PassState::Completed);
    assert_eq!(ids(&report.cached), vec!["a"]);
}

#[tokio::test]
async fn empty_library_has_nothing_to_fetch() {
    let cache = TestCache::with_budget(0);
    cache.add_track(&make_test_track("t", RetentionClass::Transient, 100));

    let report = cache
        .manager
        .download_always_offline_music(&InterruptFlag::new())
        .await
        .unwrap();

    assert_eq!(report.reason, StopReason::NothingToFetch);
}

#[tokio::test]
async fn downloads_every_missing_track_smallest_first() {
    let cache = TestCache::with_budget(0);
    cache.add_track(&make_test_track("big", RetentionClass::AlwaysOffline, 900));
    cache.add_track(&make_test_track("small", RetentionClass::AlwaysOffline, 100));
    cache.add_track(&make_test_track("mid", RetentionClass::AlwaysOffline, 500));
    cache.add_cached("done", RetentionClass::AlwaysOffline, 50, 1);

    let report = cache
        .manager
        .download_always_offline_music(&InterruptFlag::new())
        .await
        .unwrap();

    assert_eq!(report.state, PassState::Completed);
    assert_eq!(report.reason, StopReason::Finished);
    assert_eq!(ids(&report.cached), vec!["small", "mid", "big"]);
    assert_eq!(report.bytes_downloaded, 1500);
    assert!(cache.is_cached("big"));
    assert_eq!(cache.transport.attempts(), 3);
}

#[tokio::test]
async fn interrupt_stops_after_current_track() {
    let cache = TestCache::with_budget(0);
    add_offline(&cache, &["t1", "t2", "t3", "t4", "t5"], 100);
    let interrupt = InterruptFlag::new();
    cache.transport.interrupt_after(2, interrupt.clone());

    let report = cache
        .manager
        .download_always_offline_music(&interrupt)
        .await
        .unwrap();

    assert_eq!(report.state, PassState::Interrupted);
    assert_eq!(report.reason, StopReason::Interrupted);
    assert_eq!(ids(&report.cached), vec!["t1", "t2"]);
    assert_eq!(report.unmet_bytes, 300);
    assert_eq!(cache.transport.attempts(), 2);
    assert!(cache.is_cached("t2"));
    assert!(!cache.is_cached("t3"));

    // Completed work survives; the next pass picks up the rest.
    interrupt.clear();
    let report = cache
        .manager
        .download_always_offline_music(&interrupt)
        .await
        .unwrap();
    assert_eq!(ids(&report.cached), vec!["t3", "t4", "t5"]);
}

#[tokio::test]
async fn failed_track_is_skipped_and_pass_continues() {
    let cache = TestCache::with_budget(0);
    add_offline(&cache, &["t1", "t2", "t3"], 100);
    cache
        .transport
        .fail_url(fake_url(&TrackId::new("t2"), ResourceKind::Audio));
    cache.links.fail_for("t3");

    let report = cache
        .manager
        .download_always_offline_music(&InterruptFlag::new())
        .await
        .unwrap();

    assert_eq!(report.state, PassState::Completed);
    assert_eq!(ids(&report.cached), vec!["t1"]);
    assert_eq!(ids(&report.failed), vec!["t2", "t3"]);
    assert_eq!(report.unmet_bytes, 200);
    assert!(!cache.is_cached("t2"));
    // No partial blob is left behind from the failed transfer.
    assert!(!cache
        .manager
        .store()
        .contains(&TrackId::new("t2"), ResourceKind::Audio));
}

#[tokio::test]
async fn missing_art_link_still_caches_audio() {
    let cache = TestCache::with_budget(0);
    cache.add_track(&make_test_track_with_art(
        "a",
        RetentionClass::AlwaysOffline,
        400,
        100,
    ));
    cache.links.omit_art_for("a");

    let report = cache
        .manager
        .download_always_offline_music(&InterruptFlag::new())
        .await
        .unwrap();

    assert_eq!(ids(&report.cached), vec!["a"]);
    assert_eq!(report.bytes_downloaded, 400);
    let state = cache
        .manager
        .index()
        .find_by_id(&TrackId::new("a"))
        .unwrap()
        .unwrap();
    assert!(state.is_cached(ResourceKind::Audio));
    assert!(!state.is_cached(ResourceKind::Art));
}

#[tokio::test]
async fn missing_audio_link_fails_track() {
    let cache = TestCache::with_budget(0);
    add_offline(&cache, &["a", "b"], 100);
    cache.links.omit_audio_for("a");

    let report = cache
        .manager
        .download_always_offline_music(&InterruptFlag::new())
        .await
        .unwrap();

    assert_eq!(ids(&report.failed), vec!["a"]);
    assert_eq!(ids(&report.cached), vec!["b"]);
}

#[tokio::test]
async fn partly_cached_track_counts_toward_budget() {
    let cache = TestCache::with_budget(250);
    cache.add_track(&make_test_track_with_art(
        "a",
        RetentionClass::AlwaysOffline,
        100,
        50,
    ));
    add_offline(&cache, &["b"], 160);
    cache
        .transport
        .fail_url(fake_url(&TrackId::new("a"), ResourceKind::Art));
    let log = cache.manager.events().record();

    let report = cache
        .manager
        .download_always_offline_music(&InterruptFlag::new())
        .await
        .unwrap();

    assert_eq!(report.state, PassState::Interrupted);
    assert_eq!(report.reason, StopReason::BudgetExhausted);
    assert!(report.cached.is_empty());
    assert_eq!(ids(&report.failed), vec!["a"]);
    assert_eq!(report.bytes_downloaded, 100);
    assert_eq!(report.unmet_bytes, 50 + 160);

    let state = cache
        .manager
        .index()
        .find_by_id(&TrackId::new("a"))
        .unwrap()
        .unwrap();
    assert!(state.is_cached(ResourceKind::Audio));
    assert!(!state.is_cached(ResourceKind::Art));
    assert!(!cache.is_cached("b"));
    assert_eq!(cache.manager.summary().total_bytes_stored, 100);
    assert_eq!(
        log.count(|e| matches!(
            e,
            CacheEvent::TrackCacheChanged { track_id, cached: true } if track_id.as_str() == "a"
        )),
        1
    );
}

#[tokio::test]
async fn commit_waits_for_eviction_lock() {
    let cache = TestCache::with_budget(0);
    add_offline(&cache, &["a"], 100);
    let held = cache.manager.commit_lock().hold();

    let interrupt = InterruptFlag::new();
    let pass = cache.manager.download_always_offline_music(&interrupt);
    let release = async {
        while cache.transport.completed() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        let on_disk = cache
            .manager
            .store()
            .contains(&TrackId::new("a"), ResourceKind::Audio);
        drop(held);
        on_disk
    };

    let (report, on_disk_while_held) = tokio::join!(pass, release);
    assert!(!on_disk_while_held);
    assert_eq!(ids(&report.unwrap().cached), vec!["a"]);
    assert!(cache.is_cached("a"));
}

#[tokio::test]
async fn budget_stop_suggests_more_storage_once() {
    let cache = TestCache::with_budget(1000);
    add_offline(&cache, &["t1", "t2", "t3"], 400);
    let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = std::sync::Arc::clone(&seen);
    let _sub = cache.manager.subscribe(move |event| {
        if let CacheEvent::StorageIncreaseSuggested { .. } = event {
            sink.lock().unwrap().push(event.clone());
        }
    });

    let report = cache
        .manager
        .download_always_offline_music(&InterruptFlag::new())
        .await
        .unwrap();

    assert_eq!(report.state, PassState::Interrupted);
    assert_eq!(report.reason, StopReason::BudgetExhausted);
    assert_eq!(ids(&report.cached), vec!["t1", "t2"]);
    assert_eq!(report.unmet_bytes, 400);
    assert_eq!(
        seen.lock().unwrap().as_slice(),
        &[CacheEvent::StorageIncreaseSuggested {
            required_bytes: 1200,
            current_budget: 1000,
        }]
    );
    assert!(cache.manager.storage_prompt_pending());

    // Unanswered suggestion is not repeated.
    cache
        .manager
        .download_always_offline_music(&InterruptFlag::new())
        .await
        .unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn low_disk_stops_pass() {
    let mut config = make_test_config(0);
    config.scheduler.min_free_disk_bytes = 200;
    let cache = TestCache::open(config, StaticDeviceProbe::wifi().with_free_disk_bytes(500));
    add_offline(&cache, &["a"], 400);

    let report = cache
        .manager
        .download_always_offline_music(&InterruptFlag::new())
        .await
        .unwrap();

    assert_eq!(report.reason, StopReason::DiskSpaceLow);
    assert_eq!(cache.transport.attempts(), 0);
}

#[tokio::test]
async fn only_one_pass_runs_at_a_time() {
    let cache = TestCache::with_budget(0);
    add_offline(&cache, &["a"], 100);
    let gate = cache.transport.gated();
    let interrupt = InterruptFlag::new();

    let first = cache.manager.download_always_offline_music(&interrupt);
    let second = async {
        while cache.transport.attempts() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let report = cache
            .manager
            .download_always_offline_music(&interrupt)
            .await
            .unwrap();
        gate.add_permits(1);
        report
    };

    let (first, second) = tokio::join!(first, second);
    assert_eq!(second.state, PassState::Skipped);
    assert_eq!(second.reason, StopReason::AlreadyRunning);
    assert_eq!(ids(&first.unwrap().cached), vec!["a"]);
    assert_eq!(cache.transport.attempts(), 1);
}

#[tokio::test]
async fn playback_fetch_honours_class_and_mode() {
    let cache = TestCache::with_budget(0);
    cache.add_track(&make_test_track("t", RetentionClass::Transient, 300));
    cache.add_track(&make_test_track("o", RetentionClass::OnlineOnly, 300));

    let outcome = cache
        .manager
        .cache_for_playback(&TrackId::new("t"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        trackcache::core::scheduler::TrackFetchOutcome::Cached { bytes: 300 }
    );
    assert!(cache.is_cached("t"));

    let again = cache
        .manager
        .cache_for_playback(&TrackId::new("t"))
        .await
        .unwrap();
    assert_eq!(
        again,
        trackcache::core::scheduler::TrackFetchOutcome::AlreadyCached
    );

    let online = cache
        .manager
        .cache_for_playback(&TrackId::new("o"))
        .await
        .unwrap();
    assert_eq!(
        online,
        trackcache::core::scheduler::TrackFetchOutcome::NotCacheable
    );
    assert_eq!(cache.transport.attempts(), 1);
}

#[tokio::test]
async fn playback_fetch_keeps_audio_when_art_fails() {
    let cache = TestCache::with_budget(0);
    cache.add_track(&make_test_track_with_art(
        "t",
        RetentionClass::Transient,
        300,
        40,
    ));
    cache
        .transport
        .fail_url(fake_url(&TrackId::new("t"), ResourceKind::Art));

    let outcome = cache
        .manager
        .cache_for_playback(&TrackId::new("t"))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        trackcache::core::scheduler::TrackFetchOutcome::Partial { bytes: 300 }
    );
    assert!(cache.is_cached("t"));
}
