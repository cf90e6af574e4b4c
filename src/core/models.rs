//! Core data models for the offline cache.
//!
//! These types are shared across the index, accountant, planner and
//! scheduler. Serialized forms use camelCase to match the link-resolution
//! service and the persisted summary file.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

// =============================================================================
// Identifiers
// =============================================================================

/// Opaque track identifier as issued by the library service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TrackId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// =============================================================================
// Retention Class
// =============================================================================

/// Per-track caching policy controlling eviction priority.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum RetentionClass {
    /// Never cached.
    OnlineOnly,
    /// Cached on playback, evicted first ("Normal").
    #[default]
    Transient,
    /// Downloaded in the background, evicted last.
    AlwaysOffline,
}

impl RetentionClass {
    pub const ALL: &'static [Self] = &[Self::OnlineOnly, Self::Transient, Self::AlwaysOffline];

    /// Stable name used in the index and on the command line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OnlineOnly => "online-only",
            Self::Transient => "transient",
            Self::AlwaysOffline => "always-offline",
        }
    }

    /// Whether tracks of this class may hold cached blobs at all.
    #[must_use]
    pub const fn is_cacheable(self) -> bool {
        !matches!(self, Self::OnlineOnly)
    }
}

impl fmt::Display for RetentionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetentionClass {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "online-only" | "online_only" | "online" => Ok(Self::OnlineOnly),
            "transient" | "normal" => Ok(Self::Transient),
            "always-offline" | "always_offline" | "offline" => Ok(Self::AlwaysOffline),
            other => Err(CacheError::Config(format!(
                "Invalid retention class '{other}'. Valid classes: online-only, transient, always-offline"
            ))),
        }
    }
}

// =============================================================================
// Resource Kind
// =============================================================================

/// The kinds of blob cached per track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Audio,
    Art,
    Thumbnail,
}

impl ResourceKind {
    pub const ALL: &'static [Self] = &[Self::Audio, Self::Art, Self::Thumbnail];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Art => "art",
            Self::Thumbnail => "thumbnail",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Track Metadata
// =============================================================================

/// Track metadata as delivered by library sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackMeta {
    pub id: TrackId,
    pub audio_byte_size: u64,
    pub art_byte_size: u64,
    #[serde(default)]
    pub thumbnail_byte_size: u64,
    #[serde(default)]
    pub retention_class: RetentionClass,
}

impl TrackMeta {
    #[must_use]
    pub fn new(id: impl Into<TrackId>, audio_byte_size: u64, art_byte_size: u64) -> Self {
        Self {
            id: id.into(),
            audio_byte_size,
            art_byte_size,
            thumbnail_byte_size: 0,
            retention_class: RetentionClass::default(),
        }
    }

    #[must_use]
    pub fn with_class(mut self, class: RetentionClass) -> Self {
        self.retention_class = class;
        self
    }
}

/// Cache bookkeeping for one track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackCacheState {
    pub id: TrackId,
    pub audio_cached_at: Option<DateTime<Utc>>,
    pub art_cached_at: Option<DateTime<Utc>>,
    pub thumbnail_cached_at: Option<DateTime<Utc>>,
    pub audio_byte_size: u64,
    pub art_byte_size: u64,
    pub thumbnail_byte_size: u64,
    pub retention_class: RetentionClass,
    pub last_accessed_on_device: Option<DateTime<Utc>>,
}

impl TrackCacheState {
    /// Uncached state for freshly synced metadata.
    #[must_use]
    pub fn from_meta(meta: &TrackMeta) -> Self {
        Self {
            id: meta.id.clone(),
            audio_cached_at: None,
            art_cached_at: None,
            thumbnail_cached_at: None,
            audio_byte_size: meta.audio_byte_size,
            art_byte_size: meta.art_byte_size,
            thumbnail_byte_size: meta.thumbnail_byte_size,
            retention_class: meta.retention_class,
            last_accessed_on_device: None,
        }
    }

    #[must_use]
    pub const fn cached_at(&self, kind: ResourceKind) -> Option<DateTime<Utc>> {
        match kind {
            ResourceKind::Audio => self.audio_cached_at,
            ResourceKind::Art => self.art_cached_at,
            ResourceKind::Thumbnail => self.thumbnail_cached_at,
        }
    }

    pub fn set_cached_at(&mut self, kind: ResourceKind, at: Option<DateTime<Utc>>) {
        match kind {
            ResourceKind::Audio => self.audio_cached_at = at,
            ResourceKind::Art => self.art_cached_at = at,
            ResourceKind::Thumbnail => self.thumbnail_cached_at = at,
        }
    }

    #[must_use]
    pub const fn byte_size(&self, kind: ResourceKind) -> u64 {
        match kind {
            ResourceKind::Audio => self.audio_byte_size,
            ResourceKind::Art => self.art_byte_size,
            ResourceKind::Thumbnail => self.thumbnail_byte_size,
        }
    }

    #[must_use]
    pub const fn is_cached(&self, kind: ResourceKind) -> bool {
        self.cached_at(kind).is_some()
    }

    /// Whether any resource of this track is on disk.
    #[must_use]
    pub fn has_any_cached(&self) -> bool {
        ResourceKind::ALL.iter().any(|kind| self.is_cached(*kind))
    }

    /// Bytes this track currently occupies, by server-reported sizes.
    #[must_use]
    pub fn cached_bytes(&self) -> u64 {
        ResourceKind::ALL
            .iter()
            .filter(|kind| self.is_cached(**kind))
            .map(|kind| self.byte_size(*kind))
            .sum()
    }

    /// Kinds the scheduler still has to fetch. Art with a zero size does not exist.
    #[must_use]
    pub fn missing_fetchable(&self) -> Vec<ResourceKind> {
        let mut missing = Vec::with_capacity(2);
        if !self.is_cached(ResourceKind::Audio) {
            missing.push(ResourceKind::Audio);
        }
        if !self.is_cached(ResourceKind::Art) && self.art_byte_size > 0 {
            missing.push(ResourceKind::Art);
        }
        missing
    }

    /// Bytes a fetch of the missing kinds will add.
    #[must_use]
    pub fn missing_bytes(&self) -> u64 {
        self.missing_fetchable()
            .into_iter()
            .map(|kind| self.byte_size(kind))
            .sum()
    }
}

// =============================================================================
// Usage Summary
// =============================================================================

/// Track counts for one retention class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassUsage {
    /// Tracks of this class in the library.
    pub eligible: u64,
    /// Tracks of this class with audio on disk.
    pub cached: u64,
}

/// Aggregate cache usage, persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub total_bytes_stored: u64,
    #[serde(default)]
    pub by_class: BTreeMap<RetentionClass, ClassUsage>,
    pub computed_at: DateTime<Utc>,
}

impl UsageSummary {
    /// Empty summary; used until the first recalculation has run.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            total_bytes_stored: 0,
            by_class: BTreeMap::new(),
            computed_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    #[must_use]
    pub fn class(&self, class: RetentionClass) -> ClassUsage {
        self.by_class.get(&class).copied().unwrap_or_default()
    }
}

impl Default for UsageSummary {
    fn default() -> Self {
        Self::empty()
    }
}

// =============================================================================
// Budget
// =============================================================================

/// When background fetching is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchMode {
    Always,
    #[default]
    WifiOnly,
    Never,
}

impl FetchMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::WifiOnly => "wifi-only",
            Self::Never => "never",
        }
    }
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FetchMode {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "always" => Ok(Self::Always),
            "wifi-only" | "wifi_only" | "wifi" => Ok(Self::WifiOnly),
            "never" => Ok(Self::Never),
            other => Err(CacheError::Config(format!(
                "Invalid fetch mode '{other}'. Valid modes: always, wifi-only, never"
            ))),
        }
    }
}

/// User-settable storage budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheBudget {
    /// Maximum bytes the cache may hold. 0 means unlimited.
    pub max_total_bytes: u64,
    pub fetch_mode: FetchMode,
}

impl CacheBudget {
    #[must_use]
    pub const fn is_unlimited(&self) -> bool {
        self.max_total_bytes == 0
    }

    /// Bytes over the budget, or 0 when within it.
    #[must_use]
    pub const fn overage(&self, current_total: u64) -> u64 {
        if self.is_unlimited() {
            0
        } else {
            current_total.saturating_sub(self.max_total_bytes)
        }
    }

    /// Bytes that may still be added, `None` when unlimited.
    #[must_use]
    pub const fn headroom(&self, current_total: u64) -> Option<u64> {
        if self.is_unlimited() {
            None
        } else {
            Some(self.max_total_bytes.saturating_sub(current_total))
        }
    }
}

// =============================================================================
// Device Conditions
// =============================================================================

/// Connectivity class as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Wifi,
    Cellular,
    Offline,
}

impl FromStr for Connectivity {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "wifi" => Ok(Self::Wifi),
            "cellular" | "mobile" => Ok(Self::Cellular),
            "offline" | "none" => Ok(Self::Offline),
            other => Err(CacheError::Config(format!(
                "Invalid connectivity '{other}'. Valid values: wifi, cellular, offline"
            ))),
        }
    }
}
