//! trackcache - offline track cache
//!
//! Keeps audio and artwork for a music library on local disk within a byte
//! budget. Transient tracks are cached on playback and evicted least
//! recently played first; always-offline tracks are downloaded in the
//! background and evicted last.

#![deny(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod core;
pub mod error;
pub mod storage;
pub mod util;

/// Test utilities module - included in test builds or when test-utils feature is enabled.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use core::manager::{Collaborators, OfflineCacheManager, PostRecalc, PromptResponse};
pub use error::{CacheError, ExitCode, Result};

// Re-export test utilities for external test crates
#[cfg(any(test, feature = "test-utils"))]
pub use test_utils::*;
