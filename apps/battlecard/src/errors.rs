use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Invalid or missing process configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Required environment variable '{0}' is not set")]
    Missing(String),

    #[error("Invalid value for '{key}': {message}")]
    Invalid { key: String, message: String },
}

/// The input table itself is unusable. This is the only error that aborts a run.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Failed to read input '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to fetch input object '{location}': {message}")]
    Fetch { location: String, message: String },

    #[error("Input header is unreadable: {0}")]
    Header(#[source] csv::Error),

    #[error("Input header has no '{0}' column")]
    MissingIdColumn(String),
}

/// A single input row could not be turned into a tenant record.
/// Converted into a per-row outcome; never stops iteration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RowError {
    #[error("row {row}: missing tenant identifier in column '{column}'")]
    MissingIdentifier { row: usize, column: String },

    #[error("row {row}: field '{field}' is not a number: {value:?}")]
    InvalidNumber {
        row: usize,
        tenant_id: String,
        field: String,
        value: String,
    },

    #[error("row {row}: duplicate tenant id '{tenant_id}'")]
    DuplicateId { row: usize, tenant_id: String },

    #[error("row {row}: unreadable record: {message}")]
    Malformed { row: usize, message: String },
}

impl RowError {
    /// 1-based data row number (the header is not counted).
    pub fn row(&self) -> usize {
        match self {
            RowError::MissingIdentifier { row, .. }
            | RowError::InvalidNumber { row, .. }
            | RowError::DuplicateId { row, .. }
            | RowError::Malformed { row, .. } => *row,
        }
    }

    /// Tenant id when the row carried one, otherwise `row-<n>`.
    pub fn tenant_label(&self) -> String {
        match self {
            RowError::InvalidNumber { tenant_id, .. } | RowError::DuplicateId { tenant_id, .. } => {
                tenant_id.clone()
            }
            RowError::MissingIdentifier { row, .. } | RowError::Malformed { row, .. } => {
                format!("row-{row}")
            }
        }
    }
}

/// Classification of a failed completion call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmErrorKind {
    Timeout,
    RateLimited,
    InvalidResponse,
    TransportFailure,
}

impl LlmErrorKind {
    /// Whether another attempt can reasonably succeed.
    pub fn is_transient(self) -> bool {
        !matches!(self, LlmErrorKind::InvalidResponse)
    }
}

impl fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LlmErrorKind::Timeout => "timeout",
            LlmErrorKind::RateLimited => "rate limited",
            LlmErrorKind::InvalidResponse => "invalid response",
            LlmErrorKind::TransportFailure => "transport failure",
        };
        f.write_str(s)
    }
}

/// A single failed attempt against a completion backend.
#[derive(Debug, Error, Clone)]
#[error("{kind}: {message}")]
pub struct BackendError {
    pub kind: LlmErrorKind,
    pub message: String,
    /// Server-provided hint (e.g. `Retry-After`), if any.
    pub retry_after: Option<Duration>,
}

impl BackendError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }
}

/// Terminal failure of the LLM client after the retry policy gave up.
#[derive(Debug, Error, Clone)]
#[error("LLM {kind} after {attempts} attempt(s): {message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
    pub attempts: u32,
}

/// A failed address lookup. Recorded on the card, never fails a tenant.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeocodeError {
    #[error("geocoding API returned {status}: {message}")]
    Http { status: u16, message: String },

    #[error("geocoding request failed: {0}")]
    Transport(String),

    #[error("undecodable geocoding response: {0}")]
    Decode(String),

    #[error("no geocoding response within {0}s")]
    Timeout(u64),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProcessError {
    #[error("Unparseable response: {reason}")]
    Unparseable { reason: String },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object '{key}' not found")]
    NotFound { key: String },

    #[error("Storage {operation} on '{key}' failed: {message}")]
    Backend {
        operation: &'static str,
        key: String,
        message: String,
    },

    #[error("Storage {operation} on '{key}' timed out after {seconds}s")]
    Timeout {
        operation: &'static str,
        key: String,
        seconds: u64,
    },

    #[error("Failed to encode battlecard for '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Write verification failed for '{key}': {message}")]
    VerificationFailed { key: String, message: String },
}

impl StorageError {
    pub fn backend(operation: &'static str, key: &str, message: impl Into<String>) -> Self {
        StorageError::Backend {
            operation,
            key: key.to_string(),
            message: message.into(),
        }
    }
}
