//! Debounced persistence around the reducer
//!
//! Every transition that produces a new state (re)starts a single debounce
//! timer. When the timer fires, the latest state is written through the
//! storage service. A write that has started is never cancelled; a change
//! arriving during that write only schedules the next one. Writes never
//! overlap, and a failed write stays pending until a newer state or a flush
//! replaces it.

use crate::state_machine::{transition, Action, ChatCollection};
use crate::storage::{PersistError, StorageService};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Default debounce window
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Outcome of a persistence attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistEvent {
    Saved { saved_at: DateTime<Utc> },
    Failed { message: String },
}

struct PendingWrite {
    generation: u64,
    state: Arc<ChatCollection>,
    cancel: CancellationToken,
}

type PendingSlot = Arc<Mutex<Option<PendingWrite>>>;

/// Reducer decorator that schedules debounced writes
pub struct PersistenceMiddleware {
    service: Arc<StorageService>,
    debounce: Duration,
    pending: PendingSlot,
    generation: AtomicU64,
    /// Held for the whole of every write
    writing: Arc<tokio::sync::Mutex<()>>,
    events: broadcast::Sender<PersistEvent>,
}

impl PersistenceMiddleware {
    pub fn new(service: Arc<StorageService>, debounce: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            service,
            debounce,
            pending: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
            writing: Arc::new(tokio::sync::Mutex::new(())),
            events,
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn service(&self) -> &Arc<StorageService> {
        &self.service
    }

    /// Subscribe to write outcomes
    pub fn subscribe(&self) -> broadcast::Receiver<PersistEvent> {
        self.events.subscribe()
    }

    /// Whether a state is waiting to be written
    pub fn has_pending(&self) -> bool {
        lock(&self.pending).is_some()
    }

    /// Run the reducer and schedule persistence if the state changed
    pub fn dispatch(&self, state: &Arc<ChatCollection>, action: Action) -> Arc<ChatCollection> {
        let next = transition(state, action);
        self.observe(state, &next);
        next
    }

    /// Schedule a write when `new` is a different state from `old`
    pub fn observe(&self, old: &Arc<ChatCollection>, new: &Arc<ChatCollection>) {
        if Arc::ptr_eq(old, new) {
            return;
        }
        self.schedule(Arc::clone(new));
    }

    fn schedule(&self, state: Arc<ChatCollection>) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();

        let superseded = lock(&self.pending).replace(PendingWrite {
            generation,
            state: Arc::clone(&state),
            cancel: cancel.clone(),
        });
        if let Some(previous) = superseded {
            previous.cancel.cancel();
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime; state will persist on the next flush");
            return;
        };

        let pending = Arc::clone(&self.pending);
        let writing = Arc::clone(&self.writing);
        let service = Arc::clone(&self.service);
        let events = self.events.clone();
        let debounce = self.debounce;

        handle.spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(debounce) => {}
            }

            let _writing = writing.lock().await;

            // Claim the slot; a flush or a newer change may have taken it.
            {
                let mut slot = lock(&pending);
                match slot.as_ref() {
                    Some(p) if p.generation == generation => {
                        slot.take();
                    }
                    _ => return,
                }
            }

            if persist(&service, &events, &state).await.is_err() {
                requeue(&pending, generation, state);
            }
        });
    }

    /// Write the pending state now instead of waiting for the timer.
    ///
    /// Waits for a write already in progress first, so on return the latest
    /// state is on disk or the error says why not. Returns `Ok` without
    /// writing when nothing is pending.
    pub async fn flush_now(&self) -> Result<(), PersistError> {
        let _writing = self.writing.lock().await;

        let Some(pending) = lock(&self.pending).take() else {
            return Ok(());
        };
        pending.cancel.cancel();

        let result = persist(&self.service, &self.events, &pending.state).await;
        if result.is_err() {
            requeue(&self.pending, pending.generation, pending.state);
        }
        result
    }
}

impl std::fmt::Debug for PersistenceMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceMiddleware")
            .field("debounce", &self.debounce)
            .field("pending", &self.has_pending())
            .finish_non_exhaustive()
    }
}

async fn persist(
    service: &StorageService,
    events: &broadcast::Sender<PersistEvent>,
    state: &ChatCollection,
) -> Result<(), PersistError> {
    match service.save(state).await {
        Ok(()) => {
            tracing::debug!(chats = state.chats.len(), "Persisted chat state");
            let _ = events.send(PersistEvent::Saved { saved_at: Utc::now() });
            Ok(())
        }
        Err(e) => {
            // UI state is kept; only report
            tracing::warn!(error = %e, "Debounced chat save failed");
            let _ = events.send(PersistEvent::Failed { message: e.to_string() });
            Err(e)
        }
    }
}

/// Put back a state whose write failed, unless something newer is pending
fn requeue(slot: &Mutex<Option<PendingWrite>>, generation: u64, state: Arc<ChatCollection>) {
    let mut slot = lock(slot);
    if slot.is_none() {
        *slot = Some(PendingWrite {
            generation,
            state,
            cancel: CancellationToken::new(),
        });
    }
}

fn lock(slot: &Mutex<Option<PendingWrite>>) -> std::sync::MutexGuard<'_, Option<PendingWrite>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}
