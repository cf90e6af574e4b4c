//! Test utilities for trackcache.
//!
//! Factories, in-memory collaborators and a manager over a scratch
//! directory, shared by unit and integration tests.
//!
//! # Usage
//!
//! ```rust,ignore
//! use trackcache::test_utils::*;
//!
//! let cache = TestCache::with_budget(1000);
//! cache.add_cached("t1", RetentionClass::Transient, 400, 3);
//! cache.manager.recalculate_usage(PostRecalc::Purge).await?;
//! ```

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{TimeDelta, Utc};
use futures::future::BoxFuture;
use tokio::sync::Semaphore;

use crate::core::device::StaticDeviceProbe;
use crate::core::links::{LinkResolver, TrackLinks};
use crate::core::manager::{Collaborators, OfflineCacheManager};
use crate::core::models::{
    CacheBudget, FetchMode, ResourceKind, RetentionClass, TrackId, TrackMeta,
};
use crate::core::scheduler::InterruptFlag;
use crate::core::transport::BlobTransport;
use crate::error::{CacheError, Result};
use crate::storage::{AppPaths, CacheConfig};

// =============================================================================
// Test Data Factories
// =============================================================================

/// Create track metadata with audio only.
#[must_use]
pub fn make_test_track(id: &str, class: RetentionClass, audio_bytes: u64) -> TrackMeta {
    TrackMeta::new(id, audio_bytes, 0).with_class(class)
}

/// Create track metadata with audio and artwork.
#[must_use]
pub fn make_test_track_with_art(
    id: &str,
    class: RetentionClass,
    audio_bytes: u64,
    art_bytes: u64,
) -> TrackMeta {
    TrackMeta::new(id, audio_bytes, art_bytes).with_class(class)
}

/// Configuration with the given budget and `Always` fetch mode.
#[must_use]
pub fn make_test_config(max_total_bytes: u64) -> CacheConfig {
    let mut config = CacheConfig::default();
    config.budget = CacheBudget {
        max_total_bytes,
        fetch_mode: FetchMode::Always,
    };
    config
}

/// A config file for CLI tests.
#[must_use]
pub fn make_test_config_toml(max_total_bytes: u64, link_endpoint: Option<&str>) -> String {
    let mut toml = format!(
        "[budget]\nmax_total_bytes = {max_total_bytes}\nfetch_mode = \"always\"\n"
    );
    if let Some(endpoint) = link_endpoint {
        toml.push_str(&format!("\n[network]\nlink_endpoint = \"{endpoint}\"\n"));
    }
    toml
}

// =============================================================================
// Fake Collaborators
// =============================================================================

/// Link resolver that hands out `fake://` URLs and records every call.
#[derive(Default)]
pub struct FakeLinkResolver {
    calls: AtomicUsize,
    failing: Mutex<HashSet<TrackId>>,
    no_audio: Mutex<HashSet<TrackId>>,
    no_art: Mutex<HashSet<TrackId>>,
}

impl FakeLinkResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make link resolution fail for `id`.
    pub fn fail_for(&self, id: &str) {
        lock(&self.failing).insert(TrackId::new(id));
    }

    /// Return no audio link for `id`.
    pub fn omit_audio_for(&self, id: &str) {
        lock(&self.no_audio).insert(TrackId::new(id));
    }

    /// Return no art link for `id`.
    pub fn omit_art_for(&self, id: &str) {
        lock(&self.no_art).insert(TrackId::new(id));
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LinkResolver for FakeLinkResolver {
    fn fetch_links<'a>(
        &'a self,
        id: &'a TrackId,
        want_audio: bool,
        want_art: bool,
    ) -> BoxFuture<'a, Result<TrackLinks>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if lock(&self.failing).contains(id) {
                return Err(CacheError::Network(format!("link lookup failed for {id}")));
            }
            let audio = want_audio && !lock(&self.no_audio).contains(id);
            let art = want_art && !lock(&self.no_art).contains(id);
            Ok(TrackLinks {
                audio_link: audio.then(|| fake_url(id, ResourceKind::Audio)),
                art_link: art.then(|| fake_url(id, ResourceKind::Art)),
            })
        })
    }
}

/// URL the fake resolver returns for a resource.
#[must_use]
pub fn fake_url(id: &TrackId, kind: ResourceKind) -> String {
    format!("fake://links/{id}/{kind}")
}

/// Transport that writes a fixed payload and counts attempts.
pub struct FakeBlobTransport {
    payload: Vec<u8>,
    attempts: AtomicUsize,
    completed: AtomicUsize,
    failing_urls: Mutex<HashSet<String>>,
    interrupt_after: Mutex<Option<(usize, InterruptFlag)>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl Default for FakeBlobTransport {
    fn default() -> Self {
        Self {
            payload: b"blob".to_vec(),
            attempts: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            failing_urls: Mutex::new(HashSet::new()),
            interrupt_after: Mutex::new(None),
            gate: Mutex::new(None),
        }
    }
}

impl FakeBlobTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every download of `url`.
    pub fn fail_url(&self, url: impl Into<String>) {
        lock(&self.failing_urls).insert(url.into());
    }

    /// Raise `flag` once `n` downloads have completed.
    pub fn interrupt_after(&self, n: usize, flag: InterruptFlag) {
        *lock(&self.interrupt_after) = Some((n, flag));
    }

    /// Block each download until a permit is added to the returned semaphore.
    #[must_use]
    pub fn gated(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *lock(&self.gate) = Some(Arc::clone(&gate));
        gate
    }

    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

impl BlobTransport for FakeBlobTransport {
    fn download_to<'a>(&'a self, url: &'a str, dest: &'a Path) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);

            let gate = lock(&self.gate).clone();
            if let Some(gate) = gate {
                gate.acquire()
                    .await
                    .map_err(|e| CacheError::Network(e.to_string()))?
                    .forget();
            }

            if lock(&self.failing_urls).contains(url) {
                return Err(CacheError::Network(format!("connection reset fetching {url}")));
            }
            tokio::fs::write(dest, &self.payload).await?;

            let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((n, flag)) = lock(&self.interrupt_after).as_ref()
                && done == *n
            {
                flag.interrupt();
            }
            Ok(self.payload.len() as u64)
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Test Cache
// =============================================================================

/// A manager over a temporary directory with fake collaborators.
///
/// Must be created inside a Tokio runtime.
pub struct TestCache {
    pub dir: TestDir,
    pub paths: AppPaths,
    pub manager: OfflineCacheManager,
    pub links: Arc<FakeLinkResolver>,
    pub transport: Arc<FakeBlobTransport>,
}

impl TestCache {
    /// # Panics
    ///
    /// Panics if the cache cannot be opened.
    #[must_use]
    pub fn with_budget(max_total_bytes: u64) -> Self {
        Self::open(make_test_config(max_total_bytes), StaticDeviceProbe::wifi())
    }

    /// # Panics
    ///
    /// Panics if the cache cannot be opened.
    #[must_use]
    pub fn open(config: CacheConfig, device: StaticDeviceProbe) -> Self {
        let dir = TestDir::new();
        let paths = AppPaths::rooted(dir.path());
        Self::open_at(dir, paths, config, device)
    }

    /// Open over an existing directory, e.g. to simulate a restart.
    ///
    /// # Panics
    ///
    /// Panics if the cache cannot be opened.
    #[must_use]
    pub fn open_at(
        dir: TestDir,
        paths: AppPaths,
        config: CacheConfig,
        device: StaticDeviceProbe,
    ) -> Self {
        let links = Arc::new(FakeLinkResolver::new());
        let transport = Arc::new(FakeBlobTransport::new());
        let manager = OfflineCacheManager::open(
            &paths,
            config,
            Collaborators {
                links: Arc::clone(&links) as Arc<dyn LinkResolver>,
                transport: Arc::clone(&transport) as Arc<dyn BlobTransport>,
                device: Arc::new(device),
            },
        )
        .expect("Failed to open test cache");
        Self {
            dir,
            paths,
            manager,
            links,
            transport,
        }
    }

    /// Record a track without caching anything.
    ///
    /// # Panics
    ///
    /// Panics if the index update fails.
    pub fn add_track(&self, meta: &TrackMeta) {
        self.manager.sync_track(meta).expect("Failed to sync track");
    }

    /// Record a track whose audio is already on disk, last played
    /// `days_ago` days ago.
    ///
    /// # Panics
    ///
    /// Panics if the index or store update fails.
    pub fn add_cached(&self, id: &str, class: RetentionClass, audio_bytes: u64, days_ago: i64) {
        let meta = make_test_track(id, class, audio_bytes);
        self.add_track(&meta);
        self.manager
            .store()
            .put(&meta.id, ResourceKind::Audio, b"blob")
            .expect("Failed to write blob");
        let at = Utc::now() - TimeDelta::days(days_ago);
        let index = self.manager.index();
        index
            .set_cached_at(&meta.id, ResourceKind::Audio, Some(at))
            .expect("Failed to mark cached");
        index
            .set_last_accessed(&meta.id, at)
            .expect("Failed to set access time");
    }

    /// Whether the index and the store both hold audio for `id`.
    #[must_use]
    pub fn is_cached(&self, id: &str) -> bool {
        let id = TrackId::new(id);
        let flagged = self
            .manager
            .index()
            .find_by_id(&id)
            .ok()
            .flatten()
            .is_some_and(|state| state.is_cached(ResourceKind::Audio));
        flagged && self.manager.store().contains(&id, ResourceKind::Audio)
    }
}

// =============================================================================
// Scratch Directory
// =============================================================================

/// Scratch directory removed on drop. Names are relative to its root.
pub struct TestDir(tempfile::TempDir);

impl TestDir {
    /// # Panics
    ///
    /// Panics if no temporary directory can be created.
    #[must_use]
    pub fn new() -> Self {
        Self(tempfile::tempdir().expect("Failed to create temp directory"))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.0.path()
    }

    #[must_use]
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.0.path().join(name)
    }

    /// Write `content` to `name`, creating intermediate directories.
    ///
    /// # Panics
    ///
    /// Panics on any filesystem error.
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.file_path(name);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).expect("Failed to create directories");
        }
        fs::write(&path, content).expect("Failed to write file");
    }

    /// # Errors
    ///
    /// Returns the read error, e.g. `NotFound`.
    pub fn read_file(&self, name: &str) -> io::Result<String> {
        fs::read_to_string(self.file_path(name))
    }

    #[must_use]
    pub fn file_exists(&self, name: &str) -> bool {
        self.file_path(name).exists()
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests for Test Utilities
// =============================================================================
