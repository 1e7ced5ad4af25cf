//! Property-based tests for the chat state machine
//!
//! These tests verify key invariants hold across arbitrary action sequences.

use super::state::*;
use super::transition::*;
use super::*;
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

// ============================================================================
// Arbitrary Generators
// ============================================================================

// A small id pool so DELETE and ACTIVATE regularly hit existing chats.
pub(crate) fn arb_chat_id() -> impl Strategy<Value = String> {
    "c[0-5]".prop_map(String::from)
}

pub(crate) fn arb_message() -> impl Strategy<Value = Message> {
    (
        prop_oneof![Just(MessageKind::Prompt), Just(MessageKind::Response)],
        r#"[a-zA-Z äé漢字😀"\\\n]{0,20}"#,
    )
        .prop_map(|(kind, text)| Message {
            kind,
            text,
            timestamp: "12:00:00".to_string(),
        })
}

pub(crate) fn arb_chat() -> impl Strategy<Value = Chat> {
    (arb_chat_id(), proptest::collection::vec(arb_message(), 0..3)).prop_map(|(id, messages)| Chat {
        display_id: format!("chat {id}"),
        id,
        messages,
    })
}

pub(crate) fn arb_collection() -> impl Strategy<Value = ChatCollection> {
    (
        proptest::option::of(arb_chat_id()),
        proptest::collection::vec(arb_chat(), 0..4),
    )
        .prop_map(|(active_chat_id, chats)| {
            // Keep ids unique, as the reducer would
            let mut seen = HashSet::new();
            let chats = chats.into_iter().filter(|c| seen.insert(c.id.clone())).collect();
            ChatCollection {
                active_chat_id,
                chats,
            }
        })
}

// Ids come from the shared pool so CREATE regularly collides with an
// existing chat.
pub(crate) fn arb_create_action() -> impl Strategy<Value = Action> {
    (arb_chat_id(), proptest::option::of(arb_message())).prop_map(|(id, message)| Action::Create {
        id,
        display_id: "chat 01/01/2026 00:00:00".to_string(),
        message,
    })
}

pub(crate) fn arb_action() -> impl Strategy<Value = Action> {
    prop_oneof![
        arb_collection().prop_map(Action::Load),
        arb_chat_id().prop_map(Action::Activate),
        arb_create_action(),
        arb_chat_id().prop_map(Action::Delete),
        arb_message().prop_map(Action::SendMessage),
    ]
}

fn total_messages(state: &ChatCollection) -> usize {
    state.chats.iter().map(|c| c.messages.len()).sum()
}

fn ids_unique(state: &ChatCollection) -> bool {
    let ids: HashSet<_> = state.chats.iter().map(|c| &c.id).collect();
    ids.len() == state.chats.len()
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // Arbitrary sequences never panic and keep chat ids unique
    #[test]
    fn prop_sequences_never_panic(actions in proptest::collection::vec(arb_action(), 0..30)) {
        let mut state = Arc::new(ChatCollection::default());
        for action in actions {
            state = transition(&state, action);
            prop_assert!(ids_unique(&state), "Duplicate ids: {:?}", state.chats);
        }
    }

    // The input state is never observably mutated
    #[test]
    fn prop_input_unchanged(initial in arb_collection(), action in arb_action()) {
        let state = Arc::new(initial.clone());
        let _ = transition(&state, action);
        prop_assert_eq!(&*state, &initial);
    }

    // Deleting the active chat never leaves a dangling id
    #[test]
    fn prop_delete_active_never_dangles(
        actions in proptest::collection::vec(arb_action(), 0..20)
    ) {
        let mut state = Arc::new(ChatCollection::default());
        for action in actions {
            state = transition(&state, action);
        }

        if let Some(active) = state.active_chat_id.clone() {
            if state.find(&active).is_some() {
                let next = transition(&state, Action::Delete(active));
                match &next.active_chat_id {
                    None => prop_assert!(next.chats.is_empty()),
                    Some(id) => prop_assert_eq!(Some(id), next.chats.first().map(|c| &c.id)),
                }
            }
        }
    }

    // LOAD always yields a valid active id
    #[test]
    fn prop_load_normalizes(collection in arb_collection()) {
        let state = transition(&Arc::new(ChatCollection::default()), Action::Load(collection));
        prop_assert!(state.active_is_valid());
    }

    // CREATE with a new id adds exactly one chat, first, and activates it;
    // an id already in use returns the very same state
    #[test]
    fn prop_create_prepends(initial in arb_collection(), action in arb_create_action()) {
        let state = Arc::new(initial);
        let Action::Create { id, .. } = action.clone() else { unreachable!() };
        let next = transition(&state, action);

        if state.find(&id).is_some() {
            prop_assert!(Arc::ptr_eq(&state, &next));
        } else {
            prop_assert_eq!(next.chats.len(), state.chats.len() + 1);
            prop_assert_eq!(&next.chats[0].id, &id);
            prop_assert_eq!(next.active_chat_id.as_ref(), Some(&id));
        }
    }

    // SEND_MESSAGE adds one message when a valid active chat exists, otherwise
    // returns the very same state
    #[test]
    fn prop_send_message_appends_or_noops(initial in arb_collection(), message in arb_message()) {
        let state = Arc::new(initial);
        let next = transition(&state, Action::SendMessage(message.clone()));

        if state.active_chat().is_some() {
            prop_assert_eq!(total_messages(&next), total_messages(&state) + 1);
            let active = next.active_chat().unwrap();
            prop_assert_eq!(active.messages.last(), Some(&message));
        } else {
            prop_assert!(Arc::ptr_eq(&state, &next));
        }
    }

    // Unknown wire kinds are rejected without touching any state
    #[test]
    fn prop_unknown_action_kind_rejected(kind in "CHAT:[A-Z_]{3,12}") {
        prop_assume!(ActionKind::from_wire(&kind).is_none());
        let value = serde_json::json!({"type": kind, "payload": null});
        prop_assert!(
            matches!(Action::from_value(value), Err(TransitionError::UnknownAction(_))),
            "expected UnknownAction"
        );
    }
}
