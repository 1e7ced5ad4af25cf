//! Mock implementations for testing
//!
//! These mocks enable storage and controller tests without real I/O.

use crate::llm::{CompletionSource, FragmentStream, LlmError};
use crate::storage::{KeyValueBackend, MemoryBackend, StorageFault};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

// ============================================================================
// Failing Backend
// ============================================================================

/// Back-end whose every operation fails
pub struct FailingBackend {
    message: String,
}

impl FailingBackend {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl KeyValueBackend for FailingBackend {
    async fn get(&self, _key: &str) -> Result<Option<String>, StorageFault> {
        Err(StorageFault::unavailable(&self.message))
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<(), StorageFault> {
        Err(StorageFault::unavailable(&self.message))
    }

    async fn remove(&self, _key: &str) -> Result<(), StorageFault> {
        Err(StorageFault::unavailable(&self.message))
    }
}

// ============================================================================
// Recording Backend
// ============================================================================

/// Memory back-end that counts writes, can fail or slow them on demand, and
/// can hold reads until released (to keep hydration in flight).
#[derive(Clone, Default)]
pub struct RecordingBackend {
    inner: MemoryBackend,
    writes: Arc<AtomicUsize>,
    fail_writes: Arc<AtomicBool>,
    read_gate: Option<Arc<Semaphore>>,
    write_delay: Option<Duration>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads block until [`RecordingBackend::release_reads`] is called
    pub fn gated(mut self) -> Self {
        self.read_gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// Each write takes `delay` before it lands
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    pub fn with_entry(mut self, key: &str, value: &str) -> Self {
        self.inner = self.inner.with_entry(key, value);
        self
    }

    pub fn release_reads(&self) {
        if let Some(gate) = &self.read_gate {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueBackend for RecordingBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageFault> {
        if let Some(gate) = &self.read_gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|_| StorageFault::unavailable("read gate closed"))?;
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageFault> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageFault::unavailable("write rejected"));
        }
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageFault> {
        self.inner.remove(key).await
    }
}

// ============================================================================
// Scripted Completion Source
// ============================================================================

/// Completion source that replays queued fragment scripts
pub struct ScriptedSource {
    scripts: Mutex<Vec<Vec<Result<String, LlmError>>>>,
    /// Prompts received, in order
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful response made of `fragments`
    pub fn queue_fragments(self, fragments: &[&str]) -> Self {
        let script = fragments.iter().map(|f| Ok((*f).to_string())).collect();
        self.scripts.lock().unwrap().push(script);
        self
    }

    /// Queue a response that yields `fragments` then fails mid-stream
    pub fn queue_failure_after(self, fragments: &[&str], error: LlmError) -> Self {
        let mut script: Vec<_> = fragments.iter().map(|f| Ok((*f).to_string())).collect();
        script.push(Err(error));
        self.scripts.lock().unwrap().push(script);
        self
    }
}

#[async_trait]
impl CompletionSource for ScriptedSource {
    async fn stream(&self, prompt: &str) -> Result<FragmentStream, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.is_empty() {
            return Err(LlmError::network("No scripted response queued"));
        }
        let script = scripts.remove(0);
        Ok(futures::stream::iter(script).boxed())
    }

    fn model_id(&self) -> &str {
        "scripted"
    }
}
