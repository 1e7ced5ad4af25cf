//! Chat state machine
//!
//! Reducer-style pure transitions over the chat collection.

mod action;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
pub(crate) mod proptests;

pub use action::{Action, ActionKind};
pub use state::{display_label, Chat, ChatCollection, Message, MessageKind};
pub use transition::{transition, TransitionError};
