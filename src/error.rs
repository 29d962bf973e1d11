//! Error types for SyncFlow
//!
//! One error enum covers every failure mode of the sync service. The
//! [`ErrorClass`] classification decides how a failure is handled: a
//! configuration problem stops the worker, a storage problem aborts the
//! cycle, and tracker problems only cost the issue being processed.

use thiserror::Error;

/// Result type alias for SyncFlow operations
pub type Result<T> = std::result::Result<T, SyncFlowError>;

/// Comprehensive error type for SyncFlow operations
#[derive(Error, Debug)]
pub enum SyncFlowError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage errors raised by the mapping/state store
    #[error("Storage error: {0}")]
    Storage(String),

    /// Network errors
    #[error("Network error: {0}")]
    Network(String),

    /// Issue tracker rejected or failed a request
    #[error("Tracker error: {0}")]
    Tracker(String),

    /// Issue or project not found on the tracker
    #[error("Not found: {0}")]
    NotFound(String),

    /// Authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Rate limited (retry-after duration in seconds)
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Worker supervision errors
    #[error("Supervisor error: {0}")]
    Supervisor(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// SQLite database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

/// How a failure is handled by the sync loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Invalid configuration or credentials; fatal at worker start
    Configuration,
    /// Network failure, timeout, 5xx or 429; the next poll retries naturally
    Transient,
    /// The tracker refused the operation; logged and skipped
    Semantic,
    /// Mapping/state store failure; aborts the cycle
    Storage,
    /// Anything else
    Other,
}

impl SyncFlowError {
    /// Classify this error for the abort-vs-continue decision
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncFlowError::Config(_) | SyncFlowError::Auth(_) | SyncFlowError::Yaml(_) => {
                ErrorClass::Configuration
            }
            SyncFlowError::Storage(_) | SyncFlowError::Database(_) => ErrorClass::Storage,
            SyncFlowError::Network(_) | SyncFlowError::RateLimited(_) => ErrorClass::Transient,
            SyncFlowError::Http(e) => {
                if e.is_connect() || e.is_timeout() || e.is_request() {
                    ErrorClass::Transient
                } else if let Some(status) = e.status() {
                    match status.as_u16() {
                        429 | 500..=599 => ErrorClass::Transient,
                        _ => ErrorClass::Semantic,
                    }
                } else if e.is_decode() {
                    ErrorClass::Semantic
                } else {
                    ErrorClass::Transient
                }
            }
            SyncFlowError::Tracker(msg) => {
                let lower = msg.to_lowercase();
                if lower.contains("http 5") || lower.contains("timeout") {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Semantic
                }
            }
            SyncFlowError::NotFound(_) => ErrorClass::Semantic,
            SyncFlowError::Supervisor(_)
            | SyncFlowError::Io(_)
            | SyncFlowError::Json(_)
            | SyncFlowError::Other(_) => ErrorClass::Other,
        }
    }

    /// Whether this error must abort the whole sync cycle
    pub fn aborts_cycle(&self) -> bool {
        self.class() == ErrorClass::Storage
    }

    /// Retry-after hint carried by rate-limit errors
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            SyncFlowError::RateLimited(secs) => Some(*secs),
            SyncFlowError::Tracker(msg) => extract_retry_after(msg),
            _ => None,
        }
    }
}

/// Extract retry-after seconds from an error message
fn extract_retry_after(msg: &str) -> Option<u64> {
    let msg_lower = msg.to_lowercase();
    let pos = msg_lower.find("retry after")?;
    let num_str: String = msg_lower[pos + 11..]
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    num_str.parse().ok()
}
