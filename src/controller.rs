//! Chat controller
//!
//! Owns the chat state for a session. Hydrates once from storage, rejects
//! intents until hydration completes, and routes every intent through the
//! persistence middleware.

use crate::llm::CompletionSource;
use crate::persistence::{PersistEvent, PersistenceMiddleware};
use crate::state_machine::{Action, ActionKind, ChatCollection, Message, TransitionError};
use crate::storage::{PersistError, StorageService};
use futures::StreamExt;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

/// Reply committed when a completion stream fails
pub const STREAM_FAILURE_REPLY: &str = "Sorry, I encountered an error while processing your request.";

/// Controller lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Hydration in progress; intents are dropped
    Loading,
    Ready,
    /// Torn down; intents are dropped
    Closed,
}

/// Read-only view handed to the rendering layer
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub phase: Phase,
    pub state: Arc<ChatCollection>,
    /// Partial response text while a completion is streaming
    pub streaming: Option<String>,
}

impl Snapshot {
    pub fn is_loading(&self) -> bool {
        self.phase == Phase::Loading
    }

    pub fn active_chat_id(&self) -> Option<&str> {
        self.state.active_chat_id.as_deref()
    }
}

/// One applied dispatch
#[derive(Debug, Clone)]
pub struct Transition {
    pub kind: ActionKind,
    pub state: Arc<ChatCollection>,
}

struct Inner {
    phase: Phase,
    state: Arc<ChatCollection>,
    streaming: Option<String>,
}

struct Shared {
    inner: Mutex<Inner>,
    middleware: PersistenceMiddleware,
    snapshots: watch::Sender<Snapshot>,
    transitions: broadcast::Sender<Transition>,
    shutdown: CancellationToken,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `action` and publish the result. Returns whether the state changed.
    fn apply(&self, inner: &mut Inner, action: Action) -> bool {
        let kind = action.kind();
        let next = self.middleware.dispatch(&inner.state, action);
        let changed = !Arc::ptr_eq(&inner.state, &next);
        inner.state = next;
        tracing::debug!(action = %kind, changed, chats = inner.state.chats.len(), "Applied chat action");

        let _ = self.transitions.send(Transition {
            kind,
            state: Arc::clone(&inner.state),
        });
        self.publish(inner);
        changed
    }

    fn publish(&self, inner: &Inner) {
        self.snapshots.send_replace(Snapshot {
            phase: inner.phase,
            state: Arc::clone(&inner.state),
            streaming: inner.streaming.clone(),
        });
    }
}

/// Handle to the session's chat state. Clones share the same state.
#[derive(Clone)]
pub struct ChatController {
    shared: Arc<Shared>,
}

impl ChatController {
    /// Create the controller and start hydration in the background.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(service: Arc<StorageService>, debounce: Duration) -> Self {
        let initial = Arc::new(ChatCollection::default());
        let (snapshots, _) = watch::channel(Snapshot {
            phase: Phase::Loading,
            state: Arc::clone(&initial),
            streaming: None,
        });
        let (transitions, _) = broadcast::channel(64);

        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                phase: Phase::Loading,
                state: initial,
                streaming: None,
            }),
            middleware: PersistenceMiddleware::new(Arc::clone(&service), debounce),
            snapshots,
            transitions,
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(hydrate(Arc::downgrade(&shared), service, shared.shutdown.clone()));

        Self { shared }
    }

    // ==================== Reads ====================

    pub fn phase(&self) -> Phase {
        self.shared.lock().phase
    }

    pub fn is_loading(&self) -> bool {
        self.phase() == Phase::Loading
    }

    pub fn state(&self) -> Arc<ChatCollection> {
        Arc::clone(&self.shared.lock().state)
    }

    pub fn active_chat_id(&self) -> Option<String> {
        self.shared.lock().state.active_chat_id.clone()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.shared.snapshots.borrow().clone()
    }

    /// Receiver that always holds the latest snapshot
    pub fn watch(&self) -> watch::Receiver<Snapshot> {
        self.shared.snapshots.subscribe()
    }

    /// Every applied dispatch, in order
    pub fn transitions(&self) -> broadcast::Receiver<Transition> {
        self.shared.transitions.subscribe()
    }

    pub fn persist_events(&self) -> broadcast::Receiver<PersistEvent> {
        self.shared.middleware.subscribe()
    }

    /// Wait until hydration has finished (or the controller was closed)
    pub async fn ready(&self) {
        let mut rx = self.watch();
        let _ = rx.wait_for(|s| s.phase != Phase::Loading).await;
    }

    // ==================== Intents ====================
    //
    // Each returns whether the state changed; all are no-ops unless Ready.

    pub fn activate_chat(&self, id: impl Into<String>) -> bool {
        self.dispatch(Action::Activate(id.into()))
    }

    pub fn create_chat(&self, message: Option<Message>) -> bool {
        self.dispatch(Action::create(message))
    }

    pub fn delete_chat(&self, id: impl Into<String>) -> bool {
        self.dispatch(Action::Delete(id.into()))
    }

    /// Append to the active chat, creating a chat first if there are none.
    /// That case is two separate transitions: CREATE, then SEND_MESSAGE.
    pub fn add_message(&self, message: Message) -> bool {
        let mut inner = self.shared.lock();
        if inner.phase != Phase::Ready {
            tracing::debug!(phase = ?inner.phase, "Dropping message outside Ready");
            return false;
        }
        if inner.state.is_empty() {
            self.shared.apply(&mut inner, Action::create(None));
        }
        self.shared.apply(&mut inner, Action::SendMessage(message))
    }

    pub fn dispatch(&self, action: Action) -> bool {
        let mut inner = self.shared.lock();
        if inner.phase != Phase::Ready {
            tracing::debug!(action = %action.kind(), phase = ?inner.phase, "Dropping action outside Ready");
            return false;
        }
        self.shared.apply(&mut inner, action)
    }

    /// Dispatch an action decoded from external JSON.
    ///
    /// Unknown or malformed actions are reported and leave state unchanged.
    pub fn dispatch_value(&self, value: Value) -> Result<bool, TransitionError> {
        match Action::from_value(value) {
            Ok(action) => Ok(self.dispatch(action)),
            Err(e) => {
                tracing::error!(error = %e, "Rejected chat action");
                Err(e)
            }
        }
    }

    // ==================== Completion ====================

    /// Add `prompt` to the active chat, stream a response from `source`, and
    /// commit it as a response message.
    ///
    /// `on_fragment` sees each fragment as it arrives; the accumulated text is
    /// also exposed as [`Snapshot::streaming`]. A failed stream commits
    /// [`STREAM_FAILURE_REPLY`]. Returns the committed response, or `None`
    /// when nothing was stored: not Ready, no valid active chat, or the
    /// controller closed while streaming.
    pub async fn send_prompt<F>(&self, source: &dyn CompletionSource, prompt: &str, mut on_fragment: F) -> Option<Message>
    where
        F: FnMut(&str),
    {
        if !self.add_message(Message::prompt(prompt)) {
            return None;
        }
        self.set_streaming(Some(String::new()));

        let mut accumulated = String::new();
        let outcome = match source.stream(prompt).await {
            Ok(mut stream) => loop {
                match stream.next().await {
                    Some(Ok(fragment)) => {
                        accumulated.push_str(&fragment);
                        on_fragment(&fragment);
                        self.set_streaming(Some(accumulated.clone()));
                    }
                    Some(Err(e)) => break Err(e),
                    None => break Ok(()),
                }
            },
            Err(e) => Err(e),
        };

        self.set_streaming(None);
        let text = match outcome {
            Ok(()) => accumulated,
            Err(e) => {
                tracing::warn!(error = %e, model = %source.model_id(), "Completion stream failed");
                STREAM_FAILURE_REPLY.to_string()
            }
        };

        let response = Message::response(text);
        self.add_message(response.clone()).then_some(response)
    }

    fn set_streaming(&self, streaming: Option<String>) {
        let mut inner = self.shared.lock();
        inner.streaming = streaming;
        self.shared.publish(&inner);
    }

    // ==================== Persistence ====================

    /// Write any pending state now
    pub async fn flush(&self) -> Result<(), PersistError> {
        self.shared.middleware.flush_now().await
    }

    /// Tear down: discard an unfinished hydration, reject further intents,
    /// and flush any pending write.
    pub async fn shutdown(&self) -> Result<(), PersistError> {
        self.shared.shutdown.cancel();
        {
            let mut inner = self.shared.lock();
            inner.phase = Phase::Closed;
            inner.streaming = None;
            self.shared.publish(&inner);
        }
        self.flush().await
    }
}

impl std::fmt::Debug for ChatController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("ChatController")
            .field("phase", &inner.phase)
            .field("chats", &inner.state.chats.len())
            .finish_non_exhaustive()
    }
}

/// Load persisted state once and seed the controller with it
async fn hydrate(shared: Weak<Shared>, service: Arc<StorageService>, shutdown: CancellationToken) {
    let loaded = tokio::select! {
        () = shutdown.cancelled() => {
            tracing::debug!("Controller closed before hydration finished");
            return;
        }
        loaded = service.load() => loaded,
    };

    let Some(shared) = shared.upgrade() else {
        tracing::debug!("Controller dropped during hydration; discarding loaded state");
        return;
    };

    let mut inner = shared.lock();
    if inner.phase != Phase::Loading || shared.shutdown.is_cancelled() {
        tracing::debug!("Discarding hydration for closed controller");
        return;
    }

    let action = match loaded {
        Some(collection) if !collection.is_empty() => {
            tracing::info!(chats = collection.chats.len(), "Hydrated chat state from storage");
            Action::Load(collection)
        }
        _ => {
            tracing::info!("No stored chats; starting a fresh chat");
            Action::create(None)
        }
    };

    // Ready is published together with the hydrated state
    inner.phase = Phase::Ready;
    shared.apply(&mut inner, action);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::persistence::DEFAULT_DEBOUNCE;
    use crate::state_machine::{Chat, MessageKind};
    use crate::storage::{StorageAdapter, DEFAULT_STORAGE_KEY};
    use crate::testing::{RecordingBackend, ScriptedSource};
    use serde_json::json;

    fn service_on(backend: &RecordingBackend) -> Arc<StorageService> {
        let adapter = StorageAdapter::new(Arc::new(backend.clone()));
        Arc::new(StorageService::new(adapter))
    }

    fn stored() -> ChatCollection {
        ChatCollection {
            active_chat_id: Some("chat-2".into()),
            chats: vec![
                Chat {
                    id: "chat-2".into(),
                    display_id: "chat 02/01/2026 10:00:00".into(),
                    messages: vec![Message::prompt("second")],
                },
                Chat {
                    id: "chat-1".into(),
                    display_id: "chat 01/01/2026 10:00:00".into(),
                    messages: vec![],
                },
            ],
        }
    }

    async fn seeded_backend(state: &ChatCollection) -> RecordingBackend {
        let backend = RecordingBackend::new();
        service_on(&backend).save(state).await.unwrap();
        backend
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_storage_seeds_one_empty_active_chat() {
        let backend = RecordingBackend::new();
        let controller = ChatController::start(service_on(&backend), DEFAULT_DEBOUNCE);
        controller.ready().await;

        let state = controller.state();
        assert!(!controller.is_loading());
        assert_eq!(state.chats.len(), 1);
        assert!(state.chats[0].messages.is_empty());
        assert_eq!(state.active_chat_id.as_deref(), Some(state.chats[0].id.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stored_state_is_loaded() {
        let backend = seeded_backend(&stored()).await;
        let controller = ChatController::start(service_on(&backend), DEFAULT_DEBOUNCE);
        controller.ready().await;

        assert_eq!(*controller.state(), stored());
        assert_eq!(controller.active_chat_id().as_deref(), Some("chat-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stored_empty_collection_creates_chat() {
        let backend = seeded_backend(&ChatCollection::default()).await;
        let controller = ChatController::start(service_on(&backend), DEFAULT_DEBOUNCE);
        controller.ready().await;
        assert_eq!(controller.state().chats.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_storage_creates_chat() {
        let backend = RecordingBackend::new().with_entry(DEFAULT_STORAGE_KEY, "invalid json");
        let controller = ChatController::start(service_on(&backend), DEFAULT_DEBOUNCE);
        controller.ready().await;
        assert_eq!(controller.state().chats.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_intents_during_loading_are_dropped() {
        let seeded = seeded_backend(&stored()).await;
        let backend = seeded.clone().gated();
        let controller = ChatController::start(service_on(&backend), DEFAULT_DEBOUNCE);

        tokio::task::yield_now().await;
        assert!(controller.is_loading());
        assert!(controller.snapshot().is_loading());
        assert!(!controller.create_chat(None));
        assert!(!controller.add_message(Message::prompt("too early")));
        assert!(!controller.activate_chat("chat-1"));
        assert!(!controller.delete_chat("chat-2"));

        backend.release_reads();
        controller.ready().await;

        assert_eq!(*controller.state(), stored());
        assert!(controller.create_chat(None));
        assert_eq!(controller.state().chats.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_message_on_empty_collection_is_create_then_send() {
        let backend = RecordingBackend::new();
        let controller = ChatController::start(service_on(&backend), DEFAULT_DEBOUNCE);
        controller.ready().await;

        let only = controller.state().chats[0].id.clone();
        assert!(controller.delete_chat(only));
        assert!(controller.state().is_empty());
        assert_eq!(controller.active_chat_id(), None);

        let mut transitions = controller.transitions();
        let message = Message::prompt("hello");
        assert!(controller.add_message(message.clone()));

        let first = transitions.recv().await.unwrap();
        let second = transitions.recv().await.unwrap();
        assert_eq!(first.kind, ActionKind::Create);
        assert_eq!(first.state.chats.len(), 1);
        assert!(first.state.chats[0].messages.is_empty());
        assert_eq!(second.kind, ActionKind::SendMessage);

        let state = controller.state();
        assert_eq!(state.chats.len(), 1);
        assert_eq!(state.chats[0].messages, vec![message]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_mid_hydration_discards_load() {
        let seeded = seeded_backend(&stored()).await;
        let backend = seeded.clone().gated();
        let writes_before = backend.write_count();
        let controller = ChatController::start(service_on(&backend), DEFAULT_DEBOUNCE);
        tokio::task::yield_now().await;

        controller.shutdown().await.unwrap();
        backend.release_reads();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(controller.phase(), Phase::Closed);
        assert!(controller.state().is_empty());
        assert!(!controller.create_chat(None));
        assert_eq!(backend.write_count(), writes_before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_controller_discards_hydration() {
        let backend = RecordingBackend::new().gated();
        let controller = ChatController::start(service_on(&backend), DEFAULT_DEBOUNCE);
        tokio::task::yield_now().await;
        drop(controller);

        backend.release_reads();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(backend.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_external_action_leaves_state() {
        let backend = RecordingBackend::new();
        let controller = ChatController::start(service_on(&backend), DEFAULT_DEBOUNCE);
        controller.ready().await;

        let before = controller.state();
        let err = controller
            .dispatch_value(json!({"type": "CHAT:ARCHIVE", "payload": "x"}))
            .unwrap_err();
        assert_eq!(err, TransitionError::UnknownAction("CHAT:ARCHIVE".into()));
        assert!(Arc::ptr_eq(&before, &controller.state()));

        let id = before.chats[0].id.clone();
        assert_eq!(
            controller.dispatch_value(json!({"type": "CHAT:DELETE", "payload": id})),
            Ok(true)
        );
        assert!(controller.state().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_changes_are_persisted_after_debounce() {
        let backend = RecordingBackend::new();
        let controller = ChatController::start(service_on(&backend), DEFAULT_DEBOUNCE);
        controller.ready().await;
        let mut persisted = controller.persist_events();

        controller.add_message(Message::prompt("remember me"));
        assert!(matches!(persisted.recv().await.unwrap(), PersistEvent::Saved { .. }));

        let reloaded = service_on(&backend).load().await.unwrap();
        assert_eq!(reloaded, *controller.state());
        assert_eq!(reloaded.chats[0].messages[0].text, "remember me");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_pending_write() {
        let backend = RecordingBackend::new();
        let controller = ChatController::start(service_on(&backend), Duration::from_secs(60));
        controller.ready().await;
        controller.add_message(Message::prompt("last words"));

        controller.shutdown().await.unwrap();
        let reloaded = service_on(&backend).load().await.unwrap();
        assert_eq!(reloaded.chats[0].messages[0].text, "last words");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_prompt_streams_and_commits_response() {
        let backend = RecordingBackend::new();
        let controller = ChatController::start(service_on(&backend), DEFAULT_DEBOUNCE);
        controller.ready().await;

        let source = ScriptedSource::new().queue_fragments(&["Hel", "lo", "!"]);
        let observer = controller.clone();
        let mut partials = Vec::new();
        let response = controller
            .send_prompt(&source, "hi", |fragment| {
                partials.push((fragment.to_string(), observer.snapshot().streaming));
            })
            .await
            .unwrap();

        assert_eq!(response.kind, MessageKind::Response);
        assert_eq!(response.text, "Hello!");
        assert_eq!(partials[0], ("Hel".to_string(), Some(String::new())));
        assert_eq!(partials[2], ("!".to_string(), Some("Hello".to_string())));
        assert_eq!(controller.snapshot().streaming, None);
        assert_eq!(*source.prompts.lock().unwrap(), vec!["hi".to_string()]);

        let state = controller.state();
        let texts: Vec<_> = state.active_chat().unwrap().messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["hi", "Hello!"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_prompt_failure_commits_apology() {
        let backend = RecordingBackend::new();
        let controller = ChatController::start(service_on(&backend), DEFAULT_DEBOUNCE);
        controller.ready().await;

        let source = ScriptedSource::new().queue_failure_after(&["par"], LlmError::network("reset"));
        let response = controller.send_prompt(&source, "hi", |_| {}).await.unwrap();
        assert_eq!(response.text, STREAM_FAILURE_REPLY);

        // Opening failure behaves the same
        let response = controller.send_prompt(&source, "again", |_| {}).await.unwrap();
        assert_eq!(response.text, STREAM_FAILURE_REPLY);
        assert_eq!(controller.state().active_chat().unwrap().messages.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_prompt_while_loading_is_dropped() {
        let backend = RecordingBackend::new().gated();
        let controller = ChatController::start(service_on(&backend), DEFAULT_DEBOUNCE);
        tokio::task::yield_now().await;

        let source = ScriptedSource::new().queue_fragments(&["unused"]);
        assert!(controller.send_prompt(&source, "early", |_| {}).await.is_none());
        assert!(source.prompts.lock().unwrap().is_empty());
        backend.release_reads();
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_to_dangling_active_chat_is_not_stored() {
        let backend = RecordingBackend::new();
        let controller = ChatController::start(service_on(&backend), DEFAULT_DEBOUNCE);
        controller.ready().await;

        assert!(controller.activate_chat("nowhere"));
        let before = controller.state();
        assert!(!controller.add_message(Message::prompt("lost")));
        assert!(Arc::ptr_eq(&before, &controller.state()));

        let source = ScriptedSource::new().queue_fragments(&["unused"]);
        assert!(controller.send_prompt(&source, "lost", |_| {}).await.is_none());
        assert!(source.prompts.lock().unwrap().is_empty());

        // Re-activating the same chat is not a change
        assert!(!controller.activate_chat("nowhere"));
    }
}
