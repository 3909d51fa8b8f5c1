//! Storage: the blob store seam and the idempotent battlecard writer.
//!
//! Backends only know keys and bytes. Key derivation, hashing and verification
//! live in `writer::StorageWriter`.

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};

use crate::errors::StorageError;

pub mod local;
pub mod s3;
pub mod writer;

pub use writer::{StorageWriter, WriteOutcome};

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Run summary location under the prefix. Tenant keys are a single path
/// segment, so this can never collide with a card.
const SUMMARY_OBJECT: &str = "_summary/latest.json";

/// A key-value blob store with last-writer-wins semantics per key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), StorageError>;

    /// Returns `StorageError::NotFound` when nothing is stored at `key`.
    async fn get(&self, key: &str) -> Result<Bytes, StorageError>;

    /// Human-readable location of `key`, e.g. `s3://bucket/key`.
    fn location(&self, key: &str) -> String;
}

/// Object key for a tenant's battlecard: `{prefix}/{safe_id}.json`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    /// Characters outside `[A-Za-z0-9._-]` become `_`. When anything was
    /// replaced, the first 8 hex digits of the id's SHA-256 are appended so
    /// distinct ids never collapse onto the same key.
    pub fn for_tenant(prefix: &str, tenant_id: &str) -> Self {
        let mut safe: String = tenant_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        // "." and ".." are valid id characters but not valid path segments.
        if safe != tenant_id || safe.chars().all(|c| c == '.') {
            let digest = hex::encode(Sha256::digest(tenant_id.as_bytes()));
            safe.push('-');
            safe.push_str(&digest[..8]);
        }

        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            Self(format!("{safe}.json"))
        } else {
            Self(format!("{prefix}/{safe}.json"))
        }
    }

    /// Object key for the run summary: `{prefix}/_summary/latest.json`.
    pub fn summary(prefix: &str) -> Self {
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            Self(SUMMARY_OBJECT.to_string())
        } else {
            Self(format!("{prefix}/{SUMMARY_OBJECT}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
