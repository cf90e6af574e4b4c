//! Background download of always-offline tracks.
//!
//! A pass is gated by fetch mode and device state, then walks the
//! always-offline tracks that still need something, smallest first, until it
//! runs out of candidates, budget, disk, or is interrupted by the host.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use serde::Serialize;

use crate::core::accountant::UsageAccountant;
use crate::core::device::DeviceProbe;
use crate::core::events::{CacheEvent, CacheEvents};
use crate::core::eviction::CommitLock;
use crate::core::links::{LinkResolver, TrackLinks};
use crate::core::models::{
    Connectivity, FetchMode, ResourceKind, RetentionClass, TrackCacheState, TrackId,
};
use crate::core::transport::BlobTransport;
use crate::error::{CacheError, Result};
use crate::storage::{ByteStore, CacheConfig, CacheMetadataIndex, ConfigHandle};

/// Cooperative cancellation shared with the host.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Terminal state of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PassState {
    Completed,
    Interrupted,
    Skipped,
}

/// Why a pass ended where it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    /// Every candidate was attempted.
    Finished,
    NothingToFetch,
    FetchModeNever,
    NotOnWifi,
    PowerSaving,
    AlreadyRunning,
    /// The host raised the interrupt flag.
    Interrupted,
    /// The next candidate does not fit the storage budget.
    BudgetExhausted,
    /// The next candidate would eat into the free-disk reserve.
    DiskSpaceLow,
}

/// Result of one scheduler pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub state: PassState,
    pub reason: StopReason,
    /// Tracks completed in this pass.
    pub cached: Vec<TrackId>,
    /// Tracks attempted and not fully cached. Resources stored before the
    /// failure stay cached and count toward `bytes_downloaded`.
    pub failed: Vec<TrackId>,
    pub bytes_downloaded: u64,
    /// Missing bytes of candidates not cached by this pass.
    pub unmet_bytes: u64,
}

impl PassReport {
    const fn skipped(reason: StopReason) -> Self {
        Self {
            state: PassState::Skipped,
            reason,
            cached: Vec::new(),
            failed: Vec::new(),
            bytes_downloaded: 0,
            unmet_bytes: 0,
        }
    }
}

/// Result of a single-track fetch for playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackFetchOutcome {
    Cached { bytes: u64 },
    /// Some resources were stored before another failed.
    Partial { bytes: u64 },
    AlreadyCached,
    NotCacheable,
    Blocked(StopReason),
}

enum FetchResult {
    Done { bytes: u64 },
    Interrupted { bytes: u64 },
    /// A later resource failed after `bytes` were committed.
    Partial { bytes: u64, error: CacheError },
}

/// Clears the active flag when a pass ends, however it ends.
struct ActiveGuard<'a>(&'a AtomicBool);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Policy-gated, interruptible downloader.
pub struct DownloadScheduler {
    index: Arc<CacheMetadataIndex>,
    store: Arc<ByteStore>,
    accountant: Arc<UsageAccountant>,
    config: ConfigHandle,
    links: Arc<dyn LinkResolver>,
    transport: Arc<dyn BlobTransport>,
    device: Arc<dyn DeviceProbe>,
    events: CacheEvents,
    commit_lock: CommitLock,
    active: AtomicBool,
}

impl DownloadScheduler {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: Arc<CacheMetadataIndex>,
        store: Arc<ByteStore>,
        accountant: Arc<UsageAccountant>,
        config: ConfigHandle,
        links: Arc<dyn LinkResolver>,
        transport: Arc<dyn BlobTransport>,
        device: Arc<dyn DeviceProbe>,
        events: CacheEvents,
        commit_lock: CommitLock,
    ) -> Self {
        Self {
            index,
            store,
            accountant,
            config,
            links,
            transport,
            device,
            events,
            commit_lock,
            active: AtomicBool::new(false),
        }
    }

    /// Whether a pass is running right now.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Run one background pass over always-offline tracks.
    ///
    /// Per-track failures are logged and skipped.
    ///
    /// # Errors
    /// Returns an error only for index failures or a failed in-pass
    /// recalculation.
    pub async fn run_pass(&self, interrupt: &InterruptFlag) -> Result<PassReport> {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Download pass already running; skipping");
            return Ok(PassReport::skipped(StopReason::AlreadyRunning));
        }
        let _active = ActiveGuard(&self.active);

        let config = self.config.get();
        if let Some(reason) = self.policy_block(&config).await {
            tracing::debug!(?reason, "Download pass skipped by policy");
            return Ok(PassReport::skipped(reason));
        }

        let mut candidates = self
            .index
            .get_tracks_needing_cache(RetentionClass::AlwaysOffline)?;
        if candidates.is_empty() {
            return Ok(PassReport::skipped(StopReason::NothingToFetch));
        }
        candidates.sort_by(|a, b| {
            a.missing_bytes()
                .cmp(&b.missing_bytes())
                .then_with(|| a.id.cmp(&b.id))
        });

        tracing::info!(candidates = candidates.len(), "Starting download pass");
        self.download_candidates(&config, candidates, interrupt).await
    }

    async fn download_candidates(
        &self,
        config: &CacheConfig,
        candidates: Vec<TrackCacheState>,
        interrupt: &InterruptFlag,
    ) -> Result<PassReport> {
        let budget = config.budget;
        let recalc_every = config.scheduler.recalc_every_n_tracks.max(1);

        let mut report = PassReport {
            state: PassState::Completed,
            reason: StopReason::Finished,
            cached: Vec::new(),
            failed: Vec::new(),
            bytes_downloaded: 0,
            unmet_bytes: 0,
        };
        let mut stored_total = self.accountant.summary().total_bytes_stored;
        let mut since_recalc = 0u64;
        let mut remaining = candidates.into_iter();

        while let Some(track) = remaining.next() {
            let needed = track.missing_bytes();

            let stop = if interrupt.is_interrupted() {
                Some(StopReason::Interrupted)
            } else if budget
                .headroom(stored_total + since_recalc)
                .is_some_and(|headroom| needed > headroom)
            {
                Some(StopReason::BudgetExhausted)
            } else if self.disk_headroom(config).is_some_and(|free| needed > free) {
                Some(StopReason::DiskSpaceLow)
            } else {
                None
            };

            if let Some(reason) = stop {
                tracing::info!(?reason, track_id = %track.id, needed, "Stopping download pass");
                report.state = PassState::Interrupted;
                report.reason = reason;
                report.unmet_bytes =
                    needed + remaining.by_ref().map(|t| t.missing_bytes()).sum::<u64>();
                break;
            }

            match self.fetch_resources(&track, Some(interrupt)).await {
                Ok(FetchResult::Done { bytes }) => {
                    report.bytes_downloaded += bytes;
                    report.cached.push(track.id.clone());
                    since_recalc += bytes;
                    self.events.publish(&CacheEvent::TrackCacheChanged {
                        track_id: track.id,
                        cached: true,
                    });

                    if report.cached.len() % recalc_every == 0 {
                        stored_total = self.recalculate_in_pass().await?;
                        since_recalc = 0;
                    }
                }
                Ok(FetchResult::Interrupted { bytes }) => {
                    report.bytes_downloaded += bytes;
                    report.state = PassState::Interrupted;
                    report.reason = StopReason::Interrupted;
                    report.unmet_bytes = needed.saturating_sub(bytes)
                        + remaining.by_ref().map(|t| t.missing_bytes()).sum::<u64>();
                    break;
                }
                Ok(FetchResult::Partial { bytes, error }) => {
                    tracing::warn!(
                        track_id = %track.id,
                        error = %error,
                        code = error.error_code(),
                        stored = bytes,
                        "Track only partly cached; continuing"
                    );
                    report.bytes_downloaded += bytes;
                    since_recalc += bytes;
                    report.unmet_bytes += needed.saturating_sub(bytes);
                    self.events.publish(&CacheEvent::TrackCacheChanged {
                        track_id: track.id.clone(),
                        cached: true,
                    });
                    report.failed.push(track.id);
                }
                Err(e) => {
                    tracing::warn!(
                        track_id = %track.id,
                        error = %e,
                        code = e.error_code(),
                        "Failed to cache track; continuing"
                    );
                    report.unmet_bytes += needed;
                    report.failed.push(track.id);
                }
            }
        }

        tracing::info!(
            state = ?report.state,
            reason = ?report.reason,
            cached = report.cached.len(),
            failed = report.failed.len(),
            bytes = report.bytes_downloaded,
            "Download pass finished"
        );
        Ok(report)
    }

    /// Cache one track now, for playback.
    ///
    /// Honours retention class and fetch mode; does not wait for or block a
    /// background pass.
    ///
    /// # Errors
    /// Returns [`CacheError::TrackNotFound`] for unknown tracks, or the fetch
    /// failure.
    pub async fn fetch_track(&self, id: &TrackId) -> Result<TrackFetchOutcome> {
        let track = self
            .index
            .find_by_id(id)?
            .ok_or_else(|| CacheError::TrackNotFound(id.to_string()))?;

        if !track.retention_class.is_cacheable() {
            return Ok(TrackFetchOutcome::NotCacheable);
        }
        if track.missing_fetchable().is_empty() {
            return Ok(TrackFetchOutcome::AlreadyCached);
        }
        if let Some(reason) = self.policy_block(&self.config.get()).await {
            return Ok(TrackFetchOutcome::Blocked(reason));
        }

        let outcome = match self.fetch_resources(&track, None).await? {
            FetchResult::Done { bytes } | FetchResult::Interrupted { bytes } => {
                TrackFetchOutcome::Cached { bytes }
            }
            FetchResult::Partial { bytes, error } => {
                tracing::warn!(
                    track_id = %track.id,
                    error = %error,
                    stored = bytes,
                    "Track only partly cached for playback"
                );
                TrackFetchOutcome::Partial { bytes }
            }
        };
        self.events.publish(&CacheEvent::TrackCacheChanged {
            track_id: track.id,
            cached: true,
        });
        Ok(outcome)
    }

    async fn policy_block(&self, config: &CacheConfig) -> Option<StopReason> {
        match config.budget.fetch_mode {
            FetchMode::Never => return Some(StopReason::FetchModeNever),
            FetchMode::WifiOnly => {
                if self.device.connectivity().await != Connectivity::Wifi {
                    return Some(StopReason::NotOnWifi);
                }
            }
            FetchMode::Always => {}
        }

        if self.device.is_power_saving() && !config.scheduler.fetch_on_low_power {
            return Some(StopReason::PowerSaving);
        }
        None
    }

    fn disk_headroom(&self, config: &CacheConfig) -> Option<u64> {
        self.device
            .free_disk_bytes(self.store.root())
            .map(|free| free.saturating_sub(config.scheduler.min_free_disk_bytes))
    }

    async fn recalculate_in_pass(&self) -> Result<u64> {
        let accountant = Arc::clone(&self.accountant);
        let summary = tokio::task::spawn_blocking(move || accountant.recalculate()).await??;
        Ok(summary.total_bytes_stored)
    }

    async fn fetch_resources(
        &self,
        track: &TrackCacheState,
        interrupt: Option<&InterruptFlag>,
    ) -> Result<FetchResult> {
        let kinds = track.missing_fetchable();
        let want_audio = kinds.contains(&ResourceKind::Audio);
        let want_art = kinds.contains(&ResourceKind::Art);

        let links = self
            .links
            .fetch_links(&track.id, want_audio, want_art)
            .await?;

        let mut bytes = 0u64;
        for (position, kind) in kinds.into_iter().enumerate() {
            if position > 0 && interrupt.is_some_and(InterruptFlag::is_interrupted) {
                return Ok(FetchResult::Interrupted { bytes });
            }

            let Some(url) = link_for(&links, kind) else {
                if kind == ResourceKind::Audio {
                    return Err(CacheError::MissingLink {
                        track_id: track.id.to_string(),
                    });
                }
                tracing::warn!(track_id = %track.id, %kind, "No link returned; skipping resource");
                continue;
            };

            if let Err(error) = self.download_resource(&track.id, kind, url).await {
                if bytes == 0 {
                    return Err(error);
                }
                return Ok(FetchResult::Partial { bytes, error });
            }
            bytes += track.byte_size(kind);
        }

        Ok(FetchResult::Done { bytes })
    }

    async fn download_resource(&self, id: &TrackId, kind: ResourceKind, url: &str) -> Result<()> {
        let temp = self.store.temp_path()?;
        let written = self.transport.download_to(url, &temp).await?;

        let store = Arc::clone(&self.store);
        let index = Arc::clone(&self.index);
        let lock = self.commit_lock.clone();
        let track_id = id.clone();
        tokio::task::spawn_blocking(move || {
            let _held = lock.hold();
            store.put_from_temporary_file(&track_id, kind, &temp)?;
            index
                .set_cached_at(&track_id, kind, Some(Utc::now()))
                .inspect_err(|_| {
                    // Track left the index mid-download.
                    if let Err(e) = store.delete(&track_id, kind) {
                        tracing::warn!(
                            track_id = %track_id,
                            %kind,
                            error = %e,
                            "Could not remove orphaned blob"
                        );
                    }
                })
        })
        .await??;
        tracing::debug!(track_id = %id, %kind, bytes = written, "Cached resource");
        Ok(())
    }
}

fn link_for(links: &TrackLinks, kind: ResourceKind) -> Option<&str> {
    match kind {
        ResourceKind::Audio => links.audio_link.as_deref(),
        ResourceKind::Art => links.art_link.as_deref(),
        ResourceKind::Thumbnail => None,
    }
}
