//! Error types for the weather-grid sync services.

use thiserror::Error;

/// Result type alias using SyncError.
pub type SyncResult<T> = Result<T, SyncError>;

/// Primary error type for sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    // === Input Errors ===
    #[error("Invalid geohash: {0}")]
    InvalidGeohash(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    // === Provider Errors ===
    #[error("Provider fetch failed ({provider}): {message}")]
    ProviderFetch { provider: String, message: String },

    // === Store Errors ===
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Schema violation at '{path}': {message}")]
    SchemaViolation { path: String, message: String },

    #[error("Store request failed: {0}")]
    StoreRequest(String),

    // === Infrastructure Errors ===
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// True for the distinguishable not-found status.
    ///
    /// Expected only when checking the service root at startup and when
    /// loading a resume token for the first time; everywhere else a
    /// `NotFound` is a genuine failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }

    /// Build a provider fetch error with source context.
    pub fn provider_fetch(provider: impl Into<String>, message: impl ToString) -> Self {
        SyncError::ProviderFetch {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    /// Build a schema violation error with path context.
    pub fn schema(path: impl Into<String>, message: impl ToString) -> Self {
        SyncError::SchemaViolation {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

// Conversion from common error types
impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::StoreRequest(format!("JSON error: {}", err))
    }
}
