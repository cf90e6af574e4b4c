//! The offline cache service.
//!
//! [`OfflineCacheManager`] owns the store, index, accountant, planner,
//! scheduler and debouncer, and is the only type a host needs to hold.
//! Collaborators are injected through [`Collaborators`].

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::core::accountant::UsageAccountant;
use crate::core::debounce::CacheRecalculationDebouncer;
use crate::core::device::DeviceProbe;
use crate::core::events::{CacheEvent, CacheEvents, Subscription};
use crate::core::eviction::{CommitLock, EvictionPlanner, PurgeOutcome, PurgeReport};
use crate::core::links::LinkResolver;
use crate::core::models::{
    CacheBudget, RetentionClass, TrackCacheState, TrackId, TrackMeta, UsageSummary,
};
use crate::core::scheduler::{
    DownloadScheduler, InterruptFlag, PassReport, StopReason, TrackFetchOutcome,
};
use crate::core::transport::BlobTransport;
use crate::error::{CacheError, Result};
use crate::storage::{
    AppPaths, ByteStore, CacheConfig, CacheMetadataIndex, ConfigHandle, PromptState, state,
};

/// External services the cache depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub links: Arc<dyn LinkResolver>,
    pub transport: Arc<dyn BlobTransport>,
    pub device: Arc<dyn DeviceProbe>,
}

/// What to do once a recalculation has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostRecalc {
    /// Run an eviction pass if over budget.
    Purge,
    /// Only refresh the summary.
    SuppressPurge,
}

/// The user's answer to a storage-increase suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptResponse {
    /// Never suggest again.
    Decline,
    /// Apply this budget.
    Accept(CacheBudget),
}

/// One-shot "allocate more storage" suggestion.
struct StoragePrompt {
    path: PathBuf,
    state: Mutex<PromptState>,
    pending: AtomicBool,
    events: CacheEvents,
}

impl StoragePrompt {
    fn load(path: PathBuf, events: CacheEvents) -> Self {
        let state = state::read::<PromptState>(&path)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Could not load prompt state");
                None
            })
            .unwrap_or_default();
        Self {
            path,
            state: Mutex::new(state),
            pending: AtomicBool::new(false),
            events,
        }
    }

    fn suggest(&self, required_bytes: u64, current_budget: u64) {
        if self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .declined_storage_increase
        {
            tracing::debug!("Storage increase previously declined; not suggesting");
            return;
        }
        if self.pending.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::warn!(
            required_bytes,
            current_budget,
            "Not enough storage allocated for your always-offline selections"
        );
        self.events.publish(&CacheEvent::StorageIncreaseSuggested {
            required_bytes,
            current_budget,
        });
    }

    fn answer(&self, declined: bool) -> Result<()> {
        self.pending.store(false, Ordering::SeqCst);
        if declined {
            let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            guard.declined_storage_increase = true;
            state::write(&self.path, &*guard)?;
        }
        Ok(())
    }

    fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }
}

/// Everything the debounced recalculation needs, cloneable into a task.
#[derive(Clone)]
struct RecalcJob {
    accountant: Arc<UsageAccountant>,
    planner: Arc<EvictionPlanner>,
    prompt: Arc<StoragePrompt>,
    config: ConfigHandle,
    /// Set by any debounced request that asked for a purge; cleared when the
    /// debounced run fires.
    purge_requested: Arc<AtomicBool>,
}

impl RecalcJob {
    fn run(&self, post: PostRecalc) -> Result<UsageSummary> {
        let summary = self.accountant.recalculate()?;
        if post == PostRecalc::Purge {
            self.purge()?;
            return Ok(self.accountant.summary());
        }
        Ok(summary)
    }

    fn purge(&self) -> Result<PurgeReport> {
        let report = self
            .planner
            .purge_if_over_budget(RetentionClass::Transient)?;
        if report.touched_always_offline() {
            let budget = self.config.budget();
            let short = match report.outcome {
                PurgeOutcome::NothingToEvict { bytes_over } => bytes_over,
                _ => 0,
            };
            self.prompt.suggest(
                budget.max_total_bytes + report.always_offline_bytes_freed + short,
                budget.max_total_bytes,
            );
        }
        Ok(report)
    }
}

/// Offline cache service.
pub struct OfflineCacheManager {
    config: ConfigHandle,
    index: Arc<CacheMetadataIndex>,
    store: Arc<ByteStore>,
    events: CacheEvents,
    scheduler: Arc<DownloadScheduler>,
    debouncer: CacheRecalculationDebouncer,
    commit_lock: CommitLock,
    job: RecalcJob,
}

impl OfflineCacheManager {
    /// Open the cache under `paths`.
    ///
    /// Must be called from within a Tokio runtime; background work is
    /// spawned onto it.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid, a directory or the
    /// index cannot be opened, or no runtime is available.
    pub fn open(paths: &AppPaths, config: CacheConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        paths.ensure_dirs()?;

        let runtime = Handle::try_current().map_err(|e| {
            CacheError::Other(anyhow::anyhow!("offline cache needs a Tokio runtime: {e}"))
        })?;

        let store = Arc::new(ByteStore::open(paths.blob_dir())?);
        let swept = store.sweep_temp()?;
        if swept > 0 {
            tracing::debug!(swept, "Removed leftover download files");
        }

        let index = Arc::new(CacheMetadataIndex::open(&paths.index_db_file())?);
        let events = CacheEvents::new();
        let config = ConfigHandle::new(config);

        let accountant = Arc::new(UsageAccountant::new(
            Arc::clone(&index),
            Arc::clone(&store),
            events.clone(),
            paths.usage_summary_file(),
        ));
        let planner = Arc::new(EvictionPlanner::new(
            Arc::clone(&index),
            Arc::clone(&store),
            Arc::clone(&accountant),
            config.clone(),
            events.clone(),
        ));
        let scheduler = Arc::new(DownloadScheduler::new(
            Arc::clone(&index),
            Arc::clone(&store),
            Arc::clone(&accountant),
            config.clone(),
            collaborators.links,
            collaborators.transport,
            collaborators.device,
            events.clone(),
            planner.commit_lock(),
        ));
        let prompt = Arc::new(StoragePrompt::load(
            paths.prompt_state_file(),
            events.clone(),
        ));

        tracing::debug!(root = %paths.data.display(), "Offline cache opened");
        Ok(Self {
            commit_lock: planner.commit_lock(),
            job: RecalcJob {
                accountant,
                planner,
                prompt,
                config: config.clone(),
                purge_requested: Arc::new(AtomicBool::new(false)),
            },
            config,
            index,
            store,
            events,
            scheduler,
            debouncer: CacheRecalculationDebouncer::new(runtime),
        })
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn config(&self) -> CacheConfig {
        self.config.get()
    }

    #[must_use]
    pub fn summary(&self) -> UsageSummary {
        self.job.accountant.summary()
    }

    #[must_use]
    pub const fn events(&self) -> &CacheEvents {
        &self.events
    }

    /// Shorthand for `events().subscribe(..)`.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(callback)
    }

    #[must_use]
    pub fn index(&self) -> &CacheMetadataIndex {
        &self.index
    }

    #[must_use]
    pub fn store(&self) -> &ByteStore {
        &self.store
    }

    /// Lock serializing blob commits with eviction. Hold it around any
    /// out-of-band change to blobs and their index flags.
    #[must_use]
    pub fn commit_lock(&self) -> &CommitLock {
        &self.commit_lock
    }

    /// Whether a storage suggestion is waiting for an answer.
    #[must_use]
    pub fn storage_prompt_pending(&self) -> bool {
        self.job.prompt.is_pending()
    }

    // -------------------------------------------------------------------------
    // Library sync
    // -------------------------------------------------------------------------

    /// Record or refresh a track from library sync.
    ///
    /// A track moved to online-only loses its blobs.
    ///
    /// # Errors
    /// Returns an error if the index or store update fails.
    pub fn sync_track(&self, meta: &TrackMeta) -> Result<()> {
        self.index.upsert_track(meta)?;
        if !meta.retention_class.is_cacheable() {
            self.drop_blobs(&meta.id)?;
        }
        Ok(())
    }

    /// Remove a track that left the library, deleting all its blobs.
    ///
    /// # Errors
    /// Returns an error if the store or index update fails.
    pub fn remove_track(&self, id: &TrackId) -> Result<Option<TrackCacheState>> {
        let removed = {
            let _held = self.commit_lock.hold();
            self.store.purge_track(id)?;
            self.index.remove_track(id)?
        };
        if let Some(state) = &removed
            && state.has_any_cached()
        {
            self.events.publish(&CacheEvent::TrackCacheChanged {
                track_id: id.clone(),
                cached: false,
            });
            self.enqueue_debounced_recalculation(PostRecalc::SuppressPurge);
        }
        Ok(removed)
    }

    /// Change a track's retention class.
    ///
    /// # Errors
    /// Returns [`CacheError::TrackNotFound`] for unknown tracks.
    pub fn set_retention_class(&self, id: &TrackId, class: RetentionClass) -> Result<()> {
        self.index.set_retention_class(id, class)?;
        if !class.is_cacheable() {
            self.drop_blobs(id)?;
        }
        self.enqueue_debounced_recalculation(PostRecalc::Purge);
        Ok(())
    }

    fn drop_blobs(&self, id: &TrackId) -> Result<()> {
        let cached = {
            let _held = self.commit_lock.hold();
            let cached = self
                .index
                .find_by_id(id)?
                .is_some_and(|state| state.has_any_cached());
            self.store.purge_track(id)?;
            if cached {
                self.index.clear_cached(id)?;
            }
            cached
        };
        if cached {
            self.events.publish(&CacheEvent::TrackCacheChanged {
                track_id: id.clone(),
                cached: false,
            });
            self.enqueue_debounced_recalculation(PostRecalc::SuppressPurge);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Playback
    // -------------------------------------------------------------------------

    /// Note that playback of `id` started.
    ///
    /// Updates the recency key and repairs flags whose blobs vanished.
    /// Returns the track's state after repair.
    ///
    /// # Errors
    /// Returns [`CacheError::TrackNotFound`] for unknown tracks.
    pub fn on_playback_started(&self, id: &TrackId) -> Result<TrackCacheState> {
        self.index.set_last_accessed(id, Utc::now())?;
        let mut state = self
            .index
            .find_by_id(id)?
            .ok_or_else(|| CacheError::TrackNotFound(id.to_string()))?;
        if self.job.accountant.heal_track(&mut state)? > 0 {
            self.enqueue_debounced_recalculation(PostRecalc::SuppressPurge);
        }
        Ok(state)
    }

    /// Cache a track for playback right now.
    ///
    /// # Errors
    /// Returns the fetch failure, or [`CacheError::TrackNotFound`].
    pub async fn cache_for_playback(&self, id: &TrackId) -> Result<TrackFetchOutcome> {
        let outcome = self.scheduler.fetch_track(id).await?;
        if matches!(
            outcome,
            TrackFetchOutcome::Cached { .. } | TrackFetchOutcome::Partial { .. }
        ) {
            self.enqueue_debounced_recalculation(PostRecalc::Purge);
        }
        Ok(outcome)
    }

    // -------------------------------------------------------------------------
    // Background download
    // -------------------------------------------------------------------------

    /// Run the always-offline download pass.
    ///
    /// A pass stopped by the budget refreshes usage and suggests allocating
    /// enough storage for the remaining selections.
    ///
    /// # Errors
    /// Returns an error only for index failures or a failed recalculation.
    pub async fn download_always_offline_music(
        &self,
        interrupt: &InterruptFlag,
    ) -> Result<PassReport> {
        let report = self.scheduler.run_pass(interrupt).await?;
        if report.bytes_downloaded > 0 {
            self.enqueue_debounced_recalculation(PostRecalc::Purge);
        }
        if report.reason == StopReason::BudgetExhausted {
            let budget = self.config.budget();
            let summary = self.recalculate_usage(PostRecalc::SuppressPurge).await?;
            self.job.prompt.suggest(
                summary.total_bytes_stored + report.unmet_bytes,
                budget.max_total_bytes,
            );
        }
        Ok(report)
    }

    // -------------------------------------------------------------------------
    // Usage and eviction
    // -------------------------------------------------------------------------

    /// Schedule a recalculation after the configured debounce delay,
    /// superseding any pending one.
    ///
    /// Only the timer is superseded: if any request in the burst asked for
    /// [`PostRecalc::Purge`], the run that fires purges.
    pub fn enqueue_debounced_recalculation(&self, post: PostRecalc) -> JoinHandle<bool> {
        if post == PostRecalc::Purge {
            self.job.purge_requested.store(true, Ordering::SeqCst);
        }
        let job = self.job.clone();
        let delay = self.config.get().scheduler.debounce_delay();
        self.debouncer.enqueue(delay, move || {
            let post = if job.purge_requested.swap(false, Ordering::SeqCst) {
                PostRecalc::Purge
            } else {
                PostRecalc::SuppressPurge
            };
            if let Err(e) = job.run(post) {
                tracing::error!(error = %e, "Debounced recalculation failed");
            }
        })
    }

    /// Recalculate now, on the blocking pool.
    ///
    /// # Errors
    /// Returns the recalculation or eviction failure.
    pub async fn recalculate_usage(&self, post: PostRecalc) -> Result<UsageSummary> {
        let job = self.job.clone();
        tokio::task::spawn_blocking(move || job.run(post)).await?
    }

    /// Run an eviction pass now, on the blocking pool.
    ///
    /// # Errors
    /// Returns the eviction failure.
    pub async fn purge_if_over_budget(&self) -> Result<PurgeReport> {
        let job = self.job.clone();
        tokio::task::spawn_blocking(move || job.purge()).await?
    }

    /// Apply a new budget. Returns once the eviction it triggers has finished.
    ///
    /// # Errors
    /// Returns the eviction failure; the budget stays applied.
    pub async fn set_budget(&self, budget: CacheBudget) -> Result<PurgeReport> {
        tracing::info!(
            max_total_bytes = budget.max_total_bytes,
            fetch_mode = %budget.fetch_mode,
            "Applying storage budget"
        );
        self.config.set_budget(budget);
        self.purge_if_over_budget().await
    }

    /// Answer a pending storage suggestion.
    ///
    /// # Errors
    /// Returns an error if the declined flag cannot be persisted or the new
    /// budget's eviction pass fails.
    pub async fn respond_to_storage_prompt(&self, response: PromptResponse) -> Result<()> {
        match response {
            PromptResponse::Decline => self.job.prompt.answer(true),
            PromptResponse::Accept(budget) => {
                self.job.prompt.answer(false)?;
                self.set_budget(budget).await.map(|_| ())
            }
        }
    }

    /// Replace the configuration. A changed budget is applied like
    /// [`set_budget`](Self::set_budget).
    ///
    /// # Errors
    /// Returns an error if the new configuration is invalid or eviction fails.
    pub async fn reload_config(&self, config: CacheConfig) -> Result<()> {
        config.validate()?;
        let new_budget = config.budget;
        let old = self.config.replace(config);
        tracing::debug!("Configuration reloaded");
        if old.budget != new_budget {
            self.purge_if_over_budget().await?;
        }
        Ok(())
    }
}
