//! In-memory fakes shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::{BackendError, LlmErrorKind, StorageError};
use crate::llm_client::{Completion, CompletionBackend, CompletionRequest};
use crate::models::TokenUsage;
use crate::storage::BlobStore;

type Responder = dyn Fn(&CompletionRequest) -> Result<String, BackendError> + Send + Sync;

/// A completion backend that answers from a script instead of the network.
pub struct ScriptedBackend {
    respond: Box<Responder>,
    delay: Option<Duration>,
    usage: TokenUsage,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedBackend {
    pub fn responder(
        respond: impl Fn(&CompletionRequest) -> Result<String, BackendError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            delay: None,
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 40,
            },
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(text: &str) -> Self {
        let text = text.to_string();
        Self::responder(move |_| Ok(text.clone()))
    }

    pub fn always_failing(kind: LlmErrorKind) -> Self {
        Self::responder(move |_| Err(BackendError::new(kind, format!("scripted {kind}"))))
    }

    /// Plays `script` in order; once exhausted every call is an invalid response.
    pub fn sequence(script: Vec<Result<String, BackendError>>) -> Self {
        let script = Mutex::new(VecDeque::from(script));
        Self::responder(move |_| {
            script.lock().unwrap().pop_front().unwrap_or_else(|| {
                Err(BackendError::new(
                    LlmErrorKind::InvalidResponse,
                    "script exhausted",
                ))
            })
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most calls that were ever running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    fn model_id(&self) -> &str {
        "scripted-model"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.respond)(request).map(|text| Completion {
            text,
            usage: self.usage,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMode {
    /// Every upload is rejected.
    Put,
    /// Every read is rejected.
    Get,
    /// Uploads report success but store nothing.
    DropWrites,
}

/// A blob store backed by a `HashMap`, with failure injection.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, Bytes>>,
    fail: Mutex<Option<FailMode>>,
    delay: Option<Duration>,
    puts: AtomicUsize,
    put_attempts: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail(&self, mode: FailMode) {
        *self.fail.lock().unwrap() = Some(mode);
    }

    pub fn heal(&self) {
        *self.fail.lock().unwrap() = None;
    }

    pub fn seed(&self, key: &str, body: Vec<u8>) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), Bytes::from(body));
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Uploads that stored an object.
    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn put_attempts(&self) -> usize {
        self.put_attempts.load(Ordering::SeqCst)
    }

    fn mode(&self) -> Option<FailMode> {
        *self.fail.lock().unwrap()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.pause().await;
        if self.mode() == Some(FailMode::Get) {
            return Err(StorageError::backend("head", key, "injected failure"));
        }
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    async fn put(&self, key: &str, body: Bytes, _content_type: &str) -> Result<(), StorageError> {
        self.pause().await;
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        match self.mode() {
            Some(FailMode::Put) => Err(StorageError::backend("put", key, "access denied")),
            Some(FailMode::DropWrites) => Ok(()),
            _ => {
                self.objects.lock().unwrap().insert(key.to_string(), body);
                self.puts.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        self.pause().await;
        if self.mode() == Some(FailMode::Get) {
            return Err(StorageError::backend("get", key, "injected failure"));
        }
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })
    }

    fn location(&self, key: &str) -> String {
        format!("memory://{key}")
    }
}
