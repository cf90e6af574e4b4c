//! Cache policy: accounting, eviction, scheduling and the collaborators they use.

pub mod accountant;
pub mod debounce;
pub mod device;
pub mod events;
pub mod eviction;
pub mod http;
pub mod links;
pub mod logging;
pub mod manager;
pub mod models;
pub mod scheduler;
pub mod transport;

pub use accountant::{ForegroundGuard, UsageAccountant, is_foreground_thread};
pub use debounce::CacheRecalculationDebouncer;
pub use device::{DeviceProbe, StaticDeviceProbe};
pub use events::{CacheEvent, CacheEvents, EventLog, Subscription};
pub use eviction::{CommitLock, EvictionPlanner, PurgeOutcome, PurgeReport};
pub use links::{HttpLinkResolver, LinkResolver, TrackLinks};
pub use manager::{Collaborators, OfflineCacheManager, PostRecalc, PromptResponse};
pub use models::{
    CacheBudget, ClassUsage, Connectivity, FetchMode, ResourceKind, RetentionClass,
    TrackCacheState, TrackId, TrackMeta, UsageSummary,
};
pub use scheduler::{
    DownloadScheduler, InterruptFlag, PassReport, PassState, StopReason, TrackFetchOutcome,
};
pub use transport::{BlobTransport, HttpBlobTransport};
