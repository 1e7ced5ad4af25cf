//! Pure state transition function
//!
//! `transition` never mutates its input. A transition that changes nothing
//! hands back the same `Arc`, so callers can detect change by pointer identity.

use super::{Action, Chat, ChatCollection};
use std::sync::Arc;
use thiserror::Error;

/// Errors for actions that cannot be turned into a transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("unknown action {0}")]
    UnknownAction(String),
    #[error("malformed action: {0}")]
    MalformedAction(String),
}

/// Pure transition function
///
/// Given the same inputs it always produces the same output, with no I/O.
pub fn transition(state: &Arc<ChatCollection>, action: Action) -> Arc<ChatCollection> {
    match action {
        Action::Load(loaded) => Arc::new(loaded.normalized()),

        // No existence check here; choosing a valid chat is the caller's concern.
        Action::Activate(id) => {
            if state.active_chat_id.as_deref() == Some(id.as_str()) {
                return Arc::clone(state);
            }
            let mut next = ChatCollection::clone(state);
            next.active_chat_id = Some(id);
            Arc::new(next)
        }

        Action::Create {
            id,
            display_id,
            message,
        } => {
            // Ids are unique; a colliding CREATE changes nothing.
            if state.find(&id).is_some() {
                return Arc::clone(state);
            }
            let mut chat = Chat::new(id, display_id);
            chat.messages.extend(message);

            let mut next = ChatCollection::clone(state);
            next.active_chat_id = Some(chat.id.clone());
            next.chats.insert(0, chat);
            Arc::new(next)
        }

        Action::Delete(id) => {
            let Some(index) = state.chats.iter().position(|c| c.id == id) else {
                return Arc::clone(state);
            };

            let mut next = ChatCollection::clone(state);
            next.chats.remove(index);
            if next.active_chat_id.as_deref() == Some(id.as_str()) {
                next.active_chat_id = next.chats.first().map(|c| c.id.clone());
            }
            Arc::new(next)
        }

        // Without an active chat this is a silent no-op; it is reachable
        // during startup races.
        Action::SendMessage(message) => {
            let Some(active) = state.active_chat_id.as_deref() else {
                return Arc::clone(state);
            };
            let Some(index) = state.chats.iter().position(|c| c.id == active) else {
                return Arc::clone(state);
            };

            let mut next = ChatCollection::clone(state);
            next.chats[index].messages.push(message);
            Arc::new(next)
        }
    }
}
