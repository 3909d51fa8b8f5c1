use std::fmt;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

use crate::errors::{LlmError, LlmErrorKind, ProcessError, RowError, StorageError};
use crate::models::battlecard::Priority;
use crate::models::geocode::Coordinates;

/// Why a tenant finished without a new write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// Identical content (or an identical generation) is already stored at this key.
    AlreadyExists { storage_key: String },
    /// The input row was malformed; see message.
    InvalidRow { message: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AlreadyExists { storage_key } => {
                write!(f, "already exists at {storage_key}")
            }
            SkipReason::InvalidRow { message } => write!(f, "invalid row: {message}"),
        }
    }
}

/// Which stage a tenant failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Row,
    Llm(LlmErrorKind),
    Unparseable,
    Storage,
    /// The tenant's task panicked.
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Row => f.write_str("row error"),
            FailureKind::Llm(kind) => write!(f, "llm {kind}"),
            FailureKind::Unparseable => f.write_str("unparseable response"),
            FailureKind::Storage => f.write_str("storage error"),
            FailureKind::Internal => f.write_str("internal error"),
        }
    }
}

/// Terminal state of one tenant in one run. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Success { storage_key: String },
    Skipped(SkipReason),
    Failed { kind: FailureKind, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Success,
    Skipped,
    Failed,
}

impl RunOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            RunOutcome::Success { .. } => OutcomeKind::Success,
            RunOutcome::Skipped(_) => OutcomeKind::Skipped,
            RunOutcome::Failed { .. } => OutcomeKind::Failed,
        }
    }

    pub fn already_exists(storage_key: impl Into<String>) -> Self {
        RunOutcome::Skipped(SkipReason::AlreadyExists {
            storage_key: storage_key.into(),
        })
    }
}

impl From<&RowError> for RunOutcome {
    /// A row without an identifier cannot be attributed to any tenant and is a
    /// failure; other malformed rows are skipped.
    fn from(err: &RowError) -> Self {
        match err {
            RowError::MissingIdentifier { .. } => RunOutcome::Failed {
                kind: FailureKind::Row,
                message: err.to_string(),
            },
            _ => RunOutcome::Skipped(SkipReason::InvalidRow {
                message: err.to_string(),
            }),
        }
    }
}

impl From<&LlmError> for RunOutcome {
    fn from(err: &LlmError) -> Self {
        RunOutcome::Failed {
            kind: FailureKind::Llm(err.kind),
            message: err.to_string(),
        }
    }
}

impl From<&ProcessError> for RunOutcome {
    fn from(err: &ProcessError) -> Self {
        RunOutcome::Failed {
            kind: FailureKind::Unparseable,
            message: err.to_string(),
        }
    }
}

impl From<&StorageError> for RunOutcome {
    fn from(err: &StorageError) -> Self {
        RunOutcome::Failed {
            kind: FailureKind::Storage,
            message: err.to_string(),
        }
    }
}

/// Token counts reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, rhs: TokenUsage) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
        }
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: TokenUsage) {
        *self = *self + rhs;
    }
}

/// Per-tenant processing stages. The last one reached is recorded in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStage {
    Fetched,
    Prompted,
    Completed,
    LlmFailed,
    Processed,
    ProcessFailed,
    Stored,
    StoreFailed,
    Skipped,
}

/// Everything the orchestrator learned about one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantReport {
    pub tenant_id: String,
    pub row: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub stage: TenantStage,
    pub outcome: RunOutcome,
    pub usage: TokenUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
}

impl TenantReport {
    pub fn from_row_error(err: &RowError) -> Self {
        let outcome = RunOutcome::from(err);
        let stage = match outcome.kind() {
            OutcomeKind::Skipped => TenantStage::Skipped,
            _ => TenantStage::Fetched,
        };
        Self {
            tenant_id: err.tenant_label(),
            row: err.row(),
            name: None,
            stage,
            outcome,
            usage: TokenUsage::default(),
            overall_score: None,
            priority: None,
            confidence: None,
            address: None,
            coordinates: None,
        }
    }
}
