//! Versioned persistent chat state
//!
//! A pure reducer over a collection of chats, a debounced persistence layer
//! with schema migration, and a controller that hydrates state once and
//! gates intents until it is ready.

pub mod config;
pub mod controller;
pub mod llm;
pub mod persistence;
pub mod state_machine;
pub mod storage;

#[cfg(test)]
mod testing;

pub use config::{ChatConfig, LogFormat};
pub use controller::{ChatController, Phase, Snapshot, Transition, STREAM_FAILURE_REPLY};
pub use persistence::{PersistEvent, PersistenceMiddleware, DEFAULT_DEBOUNCE};
pub use state_machine::{transition, Action, ActionKind, Chat, ChatCollection, Message, MessageKind, TransitionError};
pub use storage::{PersistError, StorageAdapter, StorageFault, StorageService};
