//! Actions that drive chat state transitions

use super::state::{display_label, ChatCollection, Message};
use super::transition::TransitionError;
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Intents accepted by the reducer.
///
/// Serialises to the `{"type": "CHAT:...", "payload": ...}` wire shape so
/// actions can also be decoded from an external source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Action {
    /// Bulk hydration from storage
    #[serde(rename = "CHAT:LOAD")]
    Load(ChatCollection),

    #[serde(rename = "CHAT:ACTIVATE")]
    Activate(String),

    /// Create a chat. The id and label are minted by [`Action::create`] so the
    /// reducer itself stays deterministic.
    #[serde(rename = "CHAT:CREATE")]
    Create {
        id: String,
        #[serde(rename = "displayId")]
        display_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<Message>,
    },

    #[serde(rename = "CHAT:DELETE")]
    Delete(String),

    #[serde(rename = "CHAT:SEND_MESSAGE")]
    SendMessage(Message),
}

impl Action {
    /// CREATE with a fresh unique id and a label derived from the current time
    pub fn create(message: Option<Message>) -> Self {
        Action::Create {
            id: uuid::Uuid::new_v4().to_string(),
            display_id: display_label(Local::now()),
            message,
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Load(_) => ActionKind::Load,
            Action::Activate(_) => ActionKind::Activate,
            Action::Create { .. } => ActionKind::Create,
            Action::Delete(_) => ActionKind::Delete,
            Action::SendMessage(_) => ActionKind::SendMessage,
        }
    }

    /// Decode an externally constructed action.
    ///
    /// An unrecognised `type` is an [`TransitionError::UnknownAction`]; a known
    /// type with a payload of the wrong shape is [`TransitionError::MalformedAction`].
    pub fn from_value(value: Value) -> Result<Self, TransitionError> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TransitionError::MalformedAction("missing action type".to_string()))?;

        if ActionKind::from_wire(&kind).is_none() {
            return Err(TransitionError::UnknownAction(kind));
        }

        serde_json::from_value(value).map_err(|e| TransitionError::MalformedAction(format!("{kind}: {e}")))
    }
}

/// Payload-free discriminant of an [`Action`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Load,
    Activate,
    Create,
    Delete,
    SendMessage,
}

impl ActionKind {
    pub fn as_wire(self) -> &'static str {
        match self {
            ActionKind::Load => "CHAT:LOAD",
            ActionKind::Activate => "CHAT:ACTIVATE",
            ActionKind::Create => "CHAT:CREATE",
            ActionKind::Delete => "CHAT:DELETE",
            ActionKind::SendMessage => "CHAT:SEND_MESSAGE",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "CHAT:LOAD" => Some(ActionKind::Load),
            "CHAT:ACTIVATE" => Some(ActionKind::Activate),
            "CHAT:CREATE" => Some(ActionKind::Create),
            "CHAT:DELETE" => Some(ActionKind::Delete),
            "CHAT:SEND_MESSAGE" => Some(ActionKind::SendMessage),
            _ => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}
