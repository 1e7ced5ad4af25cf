//! Chat collection state types

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Prompt,
    Response,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Prompt => "prompt",
            MessageKind::Response => "response",
        }
    }
}

/// A single chat message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub text: String,
    /// Wall-clock time of creation, `HH:MM:SS`
    #[serde(default)]
    pub timestamp: String,
}

impl Message {
    pub fn new(kind: MessageKind, text: impl Into<String>) -> Self {
        Self::at(kind, text, Local::now())
    }

    pub fn prompt(text: impl Into<String>) -> Self {
        Self::new(MessageKind::Prompt, text)
    }

    pub fn response(text: impl Into<String>) -> Self {
        Self::new(MessageKind::Response, text)
    }

    /// Create a message stamped with an explicit clock reading
    pub fn at(kind: MessageKind, text: impl Into<String>, now: DateTime<Local>) -> Self {
        Self {
            kind,
            text: text.into(),
            timestamp: now.format("%H:%M:%S").to_string(),
        }
    }
}

/// A conversation and its ordered messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    /// Label derived once from the creation time; never recomputed
    #[serde(rename = "displayId", default)]
    pub display_id: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Chat {
    pub fn new(id: impl Into<String>, display_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_id: display_id.into(),
            messages: Vec::new(),
        }
    }
}

/// Build the display label for a chat created at `now`
pub fn display_label(now: DateTime<Local>) -> String {
    format!("chat {}", now.format("%d/%m/%Y %H:%M:%S"))
}

/// Root state: the active chat and every chat, most recent first
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCollection {
    #[serde(rename = "active", default)]
    pub active_chat_id: Option<String>,
    #[serde(default)]
    pub chats: Vec<Chat>,
}

impl ChatCollection {
    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }

    pub fn find(&self, id: &str) -> Option<&Chat> {
        self.chats.iter().find(|c| c.id == id)
    }

    pub fn active_chat(&self) -> Option<&Chat> {
        self.active_chat_id.as_deref().and_then(|id| self.find(id))
    }

    /// Whether `active_chat_id` points at an existing chat (or is unset)
    pub fn active_is_valid(&self) -> bool {
        match &self.active_chat_id {
            Some(id) => self.find(id).is_some(),
            None => true,
        }
    }

    /// Repair a dangling active id by falling back to the first chat, or none.
    pub fn normalized(mut self) -> Self {
        if !self.active_is_valid() {
            self.active_chat_id = self.chats.first().map(|c| c.id.clone());
        }
        self
    }
}
