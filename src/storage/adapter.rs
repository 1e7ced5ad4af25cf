//! Fault-reporting storage adapter
//!
//! Every back-end fault is logged, delivered to subscribers, and then
//! swallowed: reads come back absent, writes and deletes return the fault to
//! the immediate caller without unwinding anything further.

use super::{KeyValueBackend, StorageFault};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Default write limit, 5 MiB
pub const DEFAULT_MAX_SIZE: usize = 5 * 1024 * 1024;

/// Adapter operation that faulted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Read,
    Write,
    Exists,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Read => "read",
            Operation::Write => "write",
            Operation::Exists => "exists",
            Operation::Delete => "delete",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaultContext {
    pub key: String,
    /// Payload size for writes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_size: Option<usize>,
}

/// Report delivered to fault subscribers
#[derive(Debug, Clone, Serialize)]
pub struct FaultEvent {
    pub operation: Operation,
    pub message: String,
    /// True when the fault was the adapter's own size check
    pub quota_exceeded: bool,
    pub context: FaultContext,
    pub timestamp: DateTime<Utc>,
}

type FaultHandler = Arc<dyn Fn(&FaultEvent) + Send + Sync>;
type HandlerList = Mutex<Vec<(u64, FaultHandler)>>;

/// Capability to remove a fault subscriber.
///
/// Dropping the handle leaves the subscription in place.
#[must_use = "keep the handle to be able to unsubscribe"]
pub struct FaultSubscription {
    id: u64,
    handlers: Weak<HandlerList>,
}

impl FaultSubscription {
    pub fn unsubscribe(self) {
        if let Some(handlers) = self.handlers.upgrade() {
            handlers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }
}

/// Adapter over a key/value back-end with a write size limit
#[derive(Clone)]
pub struct StorageAdapter {
    backend: Arc<dyn KeyValueBackend>,
    max_size: usize,
    handlers: Arc<HandlerList>,
    next_id: Arc<AtomicU64>,
}

impl StorageAdapter {
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        Self {
            backend,
            max_size: DEFAULT_MAX_SIZE,
            handlers: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Read a value; faults are reported and read as absent
    pub async fn read(&self, key: &str) -> Option<String> {
        match self.backend.get(key).await {
            Ok(value) => value,
            Err(e) => {
                self.report(Operation::Read, &e, key, None);
                None
            }
        }
    }

    /// Write a value. Payloads over the size limit are rejected with
    /// `QuotaExceeded` before the back-end is touched.
    pub async fn write(&self, key: &str, data: &str) -> Result<(), StorageFault> {
        let size = data.len();
        let result = if size > self.max_size {
            Err(StorageFault::QuotaExceeded {
                size,
                limit: self.max_size,
            })
        } else {
            self.backend.set(key, data).await
        };

        result.inspect_err(|e| self.report(Operation::Write, e, key, Some(size)))
    }

    /// Faults are reported and read as `false`
    pub async fn exists(&self, key: &str) -> bool {
        match self.backend.contains(key).await {
            Ok(found) => found,
            Err(e) => {
                self.report(Operation::Exists, &e, key, None);
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), StorageFault> {
        self.backend
            .remove(key)
            .await
            .inspect_err(|e| self.report(Operation::Delete, e, key, None))
    }

    /// Register a fault subscriber
    pub fn on_fault<F>(&self, handler: F) -> FaultSubscription
    where
        F: Fn(&FaultEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        FaultSubscription {
            id,
            handlers: Arc::downgrade(&self.handlers),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn report(&self, operation: Operation, fault: &StorageFault, key: &str, data_size: Option<usize>) {
        let event = FaultEvent {
            operation,
            message: fault.to_string(),
            quota_exceeded: fault.is_quota(),
            context: FaultContext {
                key: key.to_string(),
                data_size,
            },
            timestamp: Utc::now(),
        };

        tracing::error!(
            operation = %event.operation,
            key = %event.context.key,
            error = %event.message,
            "Storage operation failed"
        );

        // Snapshot so a handler can (un)subscribe without deadlocking
        let handlers: Vec<FaultHandler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                tracing::error!(operation = %event.operation, "Fault subscriber panicked");
            }
        }
    }
}

impl fmt::Debug for StorageAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageAdapter")
            .field("max_size", &self.max_size)
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}
