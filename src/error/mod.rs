//! Error types for trackcache.
//!
//! Uses `thiserror` for structured error types that map to exit codes.
//!
//! ## Error Taxonomy
//!
//! Errors are categorized into five main categories:
//! - **Network**: Link resolution, blob transport, timeouts
//! - **Storage**: Byte store and track index I/O
//! - **Configuration**: Config file parsing, validation, or missing values
//! - **Consistency**: Index and disk disagree, or a budget cannot be honoured
//! - **Internal**: Unexpected errors, bugs, or unclassified issues
//!
//! Each error has a stable error code (e.g., `TRC-N001`) for programmatic handling.
//! Almost everything inside the background cache subsystem is contained and
//! logged; these errors surface only from collaborator calls, the CLI, and
//! direct store access.

use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// High-level error categories for classification and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Link resolution and blob transport failures.
    Network,
    /// Byte store and track index failures.
    Storage,
    /// Configuration issues (parse errors, invalid values, missing files).
    Configuration,
    /// Index/disk disagreement or an unsatisfiable budget.
    Consistency,
    /// Internal errors (bugs, unexpected state, unclassified).
    Internal,
}

impl ErrorCategory {
    /// Returns a human-readable description of the category.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Network => "Network error",
            Self::Storage => "Storage error",
            Self::Configuration => "Configuration error",
            Self::Consistency => "Consistency error",
            Self::Internal => "Internal error",
        }
    }

    /// Returns a short code prefix for this category.
    #[must_use]
    pub const fn code_prefix(&self) -> &'static str {
        match self {
            Self::Network => "N",
            Self::Storage => "S",
            Self::Configuration => "C",
            Self::Consistency => "K",
            Self::Internal => "X",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

// =============================================================================
// Exit Codes
// =============================================================================

/// Process exit codes for the `trackcache` binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// Unexpected failure
    GeneralError = 1,
    /// Storage could not be read or written
    StorageError = 2,
    /// Parse/format errors, invalid configuration
    ParseError = 3,
    /// Timeout
    Timeout = 4,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as Self
    }
}

/// Main error type for trackcache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    // ==========================================================================
    // Network errors (Category: Network)
    // ==========================================================================
    /// Request timed out after specified duration.
    #[error("request timeout after {0} seconds")]
    Timeout(u64),

    /// Generic network error.
    #[error("network error: {0}")]
    Network(String),

    /// Server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// Link resolution returned nothing usable for a track.
    #[error("no download link for track {track_id}")]
    MissingLink { track_id: String },

    /// Failed to parse a collaborator response.
    #[error("failed to parse response: {0}")]
    ParseResponse(String),

    // ==========================================================================
    // Storage errors (Category: Storage)
    // ==========================================================================
    /// Track index (SQLite) failure.
    #[error("track index error: {0}")]
    Index(#[from] rusqlite::Error),

    /// Track is not present in the local index.
    #[error("track not found in index: {0}")]
    TrackNotFound(String),

    /// Stored value could not be decoded.
    #[error("corrupt index value in column {column}: {value}")]
    CorruptValue { column: String, value: String },

    // ==========================================================================
    // Configuration errors (Category: Configuration)
    // ==========================================================================
    /// Error parsing configuration file.
    #[error("config parse error at {path}: {message}")]
    ConfigParse { path: String, message: String },

    /// Invalid value in configuration.
    #[error("invalid config value for '{key}': {message}")]
    ConfigInvalid {
        key: String,
        value: String,
        message: String,
    },

    /// Generic configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    // ==========================================================================
    // Consistency errors (Category: Consistency)
    // ==========================================================================
    /// Index says a resource is cached but the blob is gone.
    #[error("cached {kind} blob missing for track {track_id}")]
    BlobMissing { track_id: String, kind: String },

    /// Over budget with nothing left to evict.
    #[error("over budget by {bytes_over} bytes with nothing left to evict")]
    NothingToEvict { bytes_over: u64 },

    // ==========================================================================
    // I/O errors (Category: Storage / Internal)
    // ==========================================================================
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Background task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    // ==========================================================================
    // Generic wrapper (Category: Internal)
    // ==========================================================================
    /// Catch-all for other errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CacheError {
    /// Map error to a process exit code.
    #[must_use]
    pub const fn exit_code(&self) -> ExitCode {
        match self {
            Self::Index(_)
            | Self::TrackNotFound(_)
            | Self::CorruptValue { .. }
            | Self::Io(_)
            | Self::BlobMissing { .. } => ExitCode::StorageError,

            Self::Config(_)
            | Self::ConfigParse { .. }
            | Self::ConfigInvalid { .. }
            | Self::ParseResponse(_)
            | Self::Json(_) => ExitCode::ParseError,

            Self::Timeout(_) => ExitCode::Timeout,

            Self::Network(_)
            | Self::HttpStatus { .. }
            | Self::MissingLink { .. }
            | Self::NothingToEvict { .. }
            | Self::Join(_)
            | Self::Other(_) => ExitCode::GeneralError,
        }
    }

    /// Returns the error category for classification and routing.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Timeout(_)
            | Self::Network(_)
            | Self::HttpStatus { .. }
            | Self::MissingLink { .. }
            | Self::ParseResponse(_) => ErrorCategory::Network,

            Self::Index(_) | Self::TrackNotFound(_) | Self::CorruptValue { .. } | Self::Io(_) => {
                ErrorCategory::Storage
            }

            Self::Config(_) | Self::ConfigParse { .. } | Self::ConfigInvalid { .. } => {
                ErrorCategory::Configuration
            }

            Self::BlobMissing { .. } | Self::NothingToEvict { .. } => ErrorCategory::Consistency,

            Self::Json(_) | Self::Join(_) | Self::Other(_) => ErrorCategory::Internal,
        }
    }

    /// Returns a stable error code for programmatic handling.
    ///
    /// Format: `TRC-{category}{number}`.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "TRC-N001",
            Self::Network(_) => "TRC-N002",
            Self::HttpStatus { .. } => "TRC-N003",
            Self::MissingLink { .. } => "TRC-N004",
            Self::ParseResponse(_) => "TRC-N020",

            Self::Index(_) => "TRC-S001",
            Self::TrackNotFound(_) => "TRC-S002",
            Self::CorruptValue { .. } => "TRC-S003",
            Self::Io(_) => "TRC-S010",

            Self::ConfigParse { .. } => "TRC-C001",
            Self::ConfigInvalid { .. } => "TRC-C002",
            Self::Config(_) => "TRC-C003",

            Self::BlobMissing { .. } => "TRC-K001",
            Self::NothingToEvict { .. } => "TRC-K002",

            Self::Json(_) => "TRC-X001",
            Self::Join(_) => "TRC-X002",
            Self::Other(_) => "TRC-X099",
        }
    }

    /// Returns whether the error is potentially recoverable by retrying.
    ///
    /// Only transient transport problems qualify; a 4xx from the link service
    /// will not change on retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Network(_) => true,
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Convert a transport error, keeping timeouts distinguishable.
    #[must_use]
    pub fn from_reqwest(err: &reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout_secs)
        } else if let Some(status) = err.status() {
            Self::HttpStatus {
                status: status.as_u16(),
                url: err.url().map(ToString::to_string).unwrap_or_default(),
            }
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Result type alias for trackcache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_category_description() {
        assert_eq!(ErrorCategory::Network.description(), "Network error");
        assert_eq!(ErrorCategory::Consistency.description(), "Consistency error");
        assert_eq!(ErrorCategory::Storage.code_prefix(), "S");
    }

    #[test]
    fn error_codes_match_category_prefix() {
        let errors = [
            CacheError::Timeout(30),
            CacheError::TrackNotFound("t1".to_string()),
            CacheError::Config("bad".to_string()),
            CacheError::NothingToEvict { bytes_over: 10 },
            CacheError::Other(anyhow::anyhow!("boom")),
        ];
        for err in &errors {
            let expected = format!("TRC-{}", err.category().code_prefix());
            assert!(
                err.error_code().starts_with(&expected),
                "{} should start with {expected}",
                err.error_code()
            );
        }
    }

    #[test]
    fn retryable_errors() {
        assert!(CacheError::Timeout(45).is_retryable());
        assert!(CacheError::Network("reset".to_string()).is_retryable());
        assert!(
            CacheError::HttpStatus {
                status: 503,
                url: "https://x".to_string()
            }
            .is_retryable()
        );
        assert!(
            !CacheError::HttpStatus {
                status: 404,
                url: "https://x".to_string()
            }
            .is_retryable()
        );
        assert!(
            !CacheError::MissingLink {
                track_id: "t".to_string()
            }
            .is_retryable()
        );
    }

    #[test]
    fn exit_codes() {
        assert_eq!(CacheError::Timeout(1).exit_code(), ExitCode::Timeout);
        assert_eq!(
            CacheError::Config(String::new()).exit_code(),
            ExitCode::ParseError
        );
        assert_eq!(
            CacheError::Io(std::io::Error::other("disk")).exit_code(),
            ExitCode::StorageError
        );
        assert_eq!(i32::from(ExitCode::Success), 0);
    }

    #[test]
    fn display_messages() {
        let err = CacheError::BlobMissing {
            track_id: "abc".to_string(),
            kind: "audio".to_string(),
        };
        assert_eq!(err.to_string(), "cached audio blob missing for track abc");
    }
}
