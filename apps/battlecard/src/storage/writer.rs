//! Storage Writer: durable, idempotent persistence of one battlecard.
//!
//! Flow per card: read-before-write, skip if the stored content hash matches,
//! otherwise upload and verify by reading the object back. Failures are
//! returned as-is; retrying them is the orchestrator's decision.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::StorageError;
use crate::models::{Battlecard, RunOutcome, StoredBattlecard};
use crate::storage::{BlobStore, StorageKey, JSON_CONTENT_TYPE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written(StorageKey),
    /// Identical content was already stored; nothing was uploaded.
    AlreadyExists(StorageKey),
}

#[derive(Clone)]
pub struct StorageWriter {
    store: Arc<dyn BlobStore>,
    prefix: String,
    timeout: Duration,
}

impl StorageWriter {
    pub fn new(store: Arc<dyn BlobStore>, prefix: impl Into<String>, timeout: Duration) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            timeout,
        }
    }

    pub fn key_for(&self, tenant_id: &str) -> StorageKey {
        StorageKey::for_tenant(&self.prefix, tenant_id)
    }

    /// The card currently stored for `tenant_id`, if any. An object that is
    /// not a readable battlecard is reported as absent so it gets replaced.
    pub async fn find_existing(
        &self,
        tenant_id: &str,
    ) -> Result<Option<StoredBattlecard>, StorageError> {
        let key = self.key_for(tenant_id);
        if !self.timed("head", &key, self.store.exists(key.as_str())).await? {
            return Ok(None);
        }
        let body = match self.timed("get", &key, self.store.get(key.as_str())).await {
            Ok(body) => body,
            // Deleted between the two calls.
            Err(StorageError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        match serde_json::from_slice::<StoredBattlecard>(&body) {
            Ok(stored) => Ok(Some(stored)),
            Err(e) => {
                warn!(key = %key, "Ignoring unreadable stored battlecard: {e}");
                Ok(None)
            }
        }
    }

    pub async fn try_write(&self, card: &Battlecard) -> Result<WriteOutcome, StorageError> {
        let key = self.key_for(card.tenant_id());
        let stored = StoredBattlecard::new(card.clone());

        if let Some(existing) = self.find_existing(card.tenant_id()).await? {
            if existing.content_hash == stored.content_hash {
                debug!(key = %key, "Identical battlecard already stored, skipping upload");
                return Ok(WriteOutcome::AlreadyExists(key));
            }
        }

        let body = serde_json::to_vec_pretty(&stored).map_err(|source| StorageError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.timed(
            "put",
            &key,
            self.store.put(key.as_str(), Bytes::from(body), JSON_CONTENT_TYPE),
        )
        .await?;

        self.verify(&key, &stored.content_hash).await?;
        info!("Stored battlecard at {}", self.store.location(key.as_str()));
        Ok(WriteOutcome::Written(key))
    }

    /// `try_write` folded into a per-tenant outcome.
    pub async fn write(&self, card: &Battlecard) -> RunOutcome {
        match self.try_write(card).await {
            Ok(WriteOutcome::Written(key)) => RunOutcome::Success {
                storage_key: key.to_string(),
            },
            Ok(WriteOutcome::AlreadyExists(key)) => RunOutcome::already_exists(key.to_string()),
            Err(e) => RunOutcome::from(&e),
        }
    }

    /// Uploads the run summary, replacing the previous run's.
    pub async fn write_summary<T: Serialize + Sync>(
        &self,
        summary: &T,
    ) -> Result<StorageKey, StorageError> {
        let key = StorageKey::summary(&self.prefix);
        let body = serde_json::to_vec_pretty(summary).map_err(|source| StorageError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.timed(
            "put",
            &key,
            self.store.put(key.as_str(), Bytes::from(body), JSON_CONTENT_TYPE),
        )
        .await?;
        info!("Stored run summary at {}", self.store.location(key.as_str()));
        Ok(key)
    }

    async fn verify(&self, key: &StorageKey, expected_hash: &str) -> Result<(), StorageError> {
        let verification_failed = |message: String| StorageError::VerificationFailed {
            key: key.to_string(),
            message,
        };

        if !self.timed("head", key, self.store.exists(key.as_str())).await? {
            return Err(verification_failed("object missing after upload".to_string()));
        }
        let body = self.timed("get", key, self.store.get(key.as_str())).await?;
        let readback: StoredBattlecard = serde_json::from_slice(&body)
            .map_err(|e| verification_failed(format!("stored object is unreadable: {e}")))?;
        if readback.content_hash != expected_hash {
            return Err(verification_failed(format!(
                "stored content hash {} does not match {}",
                readback.content_hash, expected_hash
            )));
        }
        Ok(())
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        key: &StorageKey,
        fut: impl Future<Output = Result<T, StorageError>>,
    ) -> Result<T, StorageError> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| StorageError::Timeout {
                operation,
                key: key.to_string(),
                seconds: self.timeout.as_secs(),
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FailureKind, Priority, Provenance, Section, Sections, SkipReason};
    use crate::testing::{FailMode, MemoryBlobStore};

    fn card(tenant_id: &str, summary: &str) -> Battlecard {
        Battlecard {
            provenance: Provenance::new(tenant_id, "test-model", "prompt-hash"),
            sections: Sections::from_fn(|s| (s == Section::Summary).then(|| summary.to_string())),
            overall_score: Some(70),
            priority: Some(Priority::High),
            confidence: None,
            geocode: None,
        }
    }

    fn writer(store: Arc<MemoryBlobStore>) -> StorageWriter {
        StorageWriter::new(store, "battlecards", Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_first_write_succeeds_and_is_readable() {
        let store = Arc::new(MemoryBlobStore::new());
        let outcome = writer(store.clone()).write(&card("t1", "Acme")).await;
        assert_eq!(
            outcome,
            RunOutcome::Success {
                storage_key: "battlecards/t1.json".to_string()
            }
        );
        assert_eq!(store.puts(), 1);

        let stored: StoredBattlecard =
            serde_json::from_slice(&store.object("battlecards/t1.json").unwrap()).unwrap();
        assert_eq!(stored.card.sections.summary, "Acme");
        assert_eq!(stored.content_hash, stored.card.content_hash());
    }

    #[tokio::test]
    async fn test_identical_content_is_not_reuploaded() {
        let store = Arc::new(MemoryBlobStore::new());
        let writer = writer(store.clone());
        let first = card("t1", "Acme");
        writer.write(&first).await;

        // Same content generated later.
        let mut again = first.clone();
        again.provenance.generated_at = first.provenance.generated_at + chrono::Duration::minutes(5);
        let outcome = writer.write(&again).await;

        assert_eq!(
            outcome,
            RunOutcome::Skipped(SkipReason::AlreadyExists {
                storage_key: "battlecards/t1.json".to_string()
            })
        );
        assert_eq!(store.puts(), 1);
    }

    #[tokio::test]
    async fn test_changed_content_overwrites() {
        let store = Arc::new(MemoryBlobStore::new());
        let writer = writer(store.clone());
        writer.write(&card("t1", "Acme")).await;
        let outcome = writer.write(&card("t1", "Acme, now expanding")).await;
        assert!(matches!(outcome, RunOutcome::Success { .. }));
        assert_eq!(store.puts(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_existing_object_is_replaced() {
        let store = Arc::new(MemoryBlobStore::new());
        store.seed("battlecards/t1.json", b"not json".to_vec());
        let writer = writer(store.clone());

        assert_eq!(writer.find_existing("t1").await.unwrap(), None);
        assert!(matches!(
            writer.write(&card("t1", "Acme")).await,
            RunOutcome::Success { .. }
        ));
    }

    #[tokio::test]
    async fn test_upload_failure_is_reported_not_retried() {
        let store = Arc::new(MemoryBlobStore::new());
        store.fail(FailMode::Put);
        let outcome = writer(store.clone()).write(&card("t1", "Acme")).await;
        assert!(matches!(
            outcome,
            RunOutcome::Failed {
                kind: FailureKind::Storage,
                ..
            }
        ));
        assert_eq!(store.put_attempts(), 1);
    }

    #[tokio::test]
    async fn test_lost_write_fails_verification() {
        let store = Arc::new(MemoryBlobStore::new());
        store.fail(FailMode::DropWrites);
        let err = writer(store).try_write(&card("t1", "Acme")).await.unwrap_err();
        assert!(matches!(err, StorageError::VerificationFailed { .. }));
    }

    #[tokio::test]
    async fn test_summary_is_overwritten_each_run() {
        let store = Arc::new(MemoryBlobStore::new());
        let writer = writer(store.clone());

        writer.write_summary(&serde_json::json!({"run": 1})).await.unwrap();
        let key = writer.write_summary(&serde_json::json!({"run": 2})).await.unwrap();

        assert_eq!(key.as_str(), "battlecards/_summary/latest.json");
        let body: serde_json::Value = serde_json::from_slice(&store.object(key.as_str()).unwrap()).unwrap();
        assert_eq!(body["run"], 2);
        assert_eq!(store.puts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_times_out() {
        let store = Arc::new(MemoryBlobStore::new().with_delay(Duration::from_secs(60)));
        let err = writer(store).try_write(&card("t1", "Acme")).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Timeout {
                operation: "head",
                seconds: 5,
                ..
            }
        ));
    }
}
