//! Custom error types for biblio-search.
//!
//! Every fallible operation in the library returns `Result<T, SearchError>`.
//! Each variant maps to a stable machine-readable kind so that callers (and the
//! HTTP layer) never need to inspect messages.

use thiserror::Error;

/// Main error type for biblio-search operations.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Bad caller input (non-numeric year, inverted range, unknown source...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Every configured source failed or timed out
    #[error("All sources unavailable: {0}")]
    SourceUnavailable(String),

    /// The overall request ceiling elapsed
    #[error("Request timed out after {0}s")]
    Timeout(u64),

    /// A single raw row could not be mapped to the canonical shape
    #[error("Malformed row from {source_name}: {message}")]
    Normalization {
        /// Source the row came from
        source_name: String,
        /// What was wrong with it
        message: String,
    },

    /// Requested record does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage layer error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV export error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),
}

impl SearchError {
    /// Stable machine-readable kind, safe to expose to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::SourceUnavailable(_) => "source_unavailable",
            Self::Timeout(_) => "timeout",
            Self::Normalization { .. } => "normalization_error",
            Self::NotFound(_) => "not_found",
            Self::Database(_) | Self::Io(_) | Self::Json(_) | Self::Csv(_) | Self::Config(_) => {
                "internal_error"
            }
        }
    }

    /// Whether the message may carry driver or filesystem details that must
    /// stay in the logs.
    pub fn is_internal(&self) -> bool {
        self.kind() == "internal_error"
    }

    /// Message suitable for a response body.
    pub fn public_message(&self) -> String {
        if self.is_internal() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        }
    }
}

/// Result type alias using `SearchError`
pub type Result<T> = std::result::Result<T, SearchError>;

/// Extension trait for turning missing values into typed errors
pub trait OptionExt<T> {
    /// Convert Option to Result with a not-found message
    fn ok_or_not_found(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| SearchError::NotFound(msg.to_string()))
    }
}
