//! Session state and the reducer that mutates it.
//!
//! Every in-memory mutation funnels through [`reduce`], applied
//! synchronously while the controller holds the state lock. Async
//! completions never touch the state directly; they dispatch actions,
//! which keeps interleaved completions from observing half-applied
//! updates.

use tracing::debug;
use uuid::Uuid;

use solace_core::types::{Attachment, Message, SourceRef};

/// In-memory state of one chat session.
///
/// Rehydrated from the conversation store on mount and never persisted
/// wholesale; only individual messages are written back.
#[derive(Debug, Clone, Default)]
pub struct ChatState {
    pub messages: Vec<Message>,
    /// Composer input buffer.
    pub input: String,
    /// Attachments staged for the next send.
    pub attachments: Vec<Attachment>,
    /// True while a send is in flight, any branch.
    pub loading: bool,
    /// True only while a streaming exchange is open.
    pub streaming: bool,
    /// Completed guest exchanges so far.
    pub guest_count: u32,
    /// Tappable follow-up prompts derived from the last reply.
    pub suggestions: Vec<String>,
    /// Message the next send quotes, if any.
    pub reply_to: Option<Uuid>,
    /// Message currently being read aloud, if any.
    pub currently_speaking: Option<Uuid>,
}

impl ChatState {
    pub fn message(&self, id: Uuid) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// The streaming placeholder, if one is in flight.
    pub fn loading_message(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.is_loading)
    }
}

/// Partial update applied to one message by [`Action::UpdateMessage`].
///
/// Unset fields leave the message untouched. `append_content` adds to
/// the existing content; `content` replaces it outright.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub append_content: Option<String>,
    pub is_loading: Option<bool>,
    pub thinking: Option<String>,
    pub sources: Option<Vec<SourceRef>>,
    pub agent_used: Option<String>,
    pub intent: Option<String>,
    pub reactions: Option<Vec<String>>,
}

/// Mutations accepted by the session reducer.
#[derive(Debug, Clone)]
pub enum Action {
    /// Replace the whole message log (rehydration, deletion).
    SetMessages(Vec<Message>),
    AddMessage(Message),
    UpdateMessage { id: Uuid, patch: MessagePatch },
    SetInput(String),
    SetLoading(bool),
    SetStreaming(bool),
    SetAttachments(Vec<Attachment>),
    AddAttachments(Vec<Attachment>),
    SetReplyTo(Option<Uuid>),
    SetCurrentlySpeaking(Option<Uuid>),
    IncrementGuestCount,
    SetSuggestions(Vec<String>),
    /// Clears the composer (input, attachments, reply target) and arms
    /// the loading flag at the start of a send.
    ResetSendState,
}

/// Applies one action to the state.
///
/// Adding a message with `is_loading` set clears the flag on every
/// other message first, so at most one streaming placeholder exists at
/// any time.
pub fn reduce(state: &mut ChatState, action: Action) {
    match action {
        Action::SetMessages(messages) => {
            state.messages = messages;
        }
        Action::AddMessage(message) => {
            if message.is_loading {
                for existing in &mut state.messages {
                    existing.is_loading = false;
                }
            }
            state.messages.push(message);
        }
        Action::UpdateMessage { id, patch } => {
            let Some(message) = state.messages.iter_mut().find(|m| m.id == id) else {
                debug!("Update for unknown message {}", id);
                return;
            };
            if let Some(content) = patch.content {
                message.content = content;
            }
            if let Some(chunk) = patch.append_content {
                message.content.push_str(&chunk);
            }
            if let Some(is_loading) = patch.is_loading {
                message.is_loading = is_loading;
            }
            if let Some(thinking) = patch.thinking {
                message.thinking = Some(thinking);
            }
            if let Some(sources) = patch.sources {
                message.sources = sources;
            }
            if let Some(agent_used) = patch.agent_used {
                message.agent_used = Some(agent_used);
            }
            if let Some(intent) = patch.intent {
                message.intent = Some(intent);
            }
            if let Some(reactions) = patch.reactions {
                message.reactions = reactions;
            }
        }
        Action::SetInput(input) => state.input = input,
        Action::SetLoading(loading) => state.loading = loading,
        Action::SetStreaming(streaming) => state.streaming = streaming,
        Action::SetAttachments(attachments) => state.attachments = attachments,
        Action::AddAttachments(mut attachments) => state.attachments.append(&mut attachments),
        Action::SetReplyTo(reply_to) => state.reply_to = reply_to,
        Action::SetCurrentlySpeaking(id) => state.currently_speaking = id,
        Action::IncrementGuestCount => state.guest_count += 1,
        Action::SetSuggestions(suggestions) => state.suggestions = suggestions,
        Action::ResetSendState => {
            state.input.clear();
            state.attachments.clear();
            state.reply_to = None;
            state.loading = true;
            state.streaming = false;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use solace_core::types::Role;

    fn state_with(messages: Vec<Message>) -> ChatState {
        ChatState {
            messages,
            ..ChatState::default()
        }
    }

    // ---- Messages ----

    #[test]
    fn test_set_messages_replaces_log() {
        let mut state = state_with(vec![Message::assistant("old")]);
        reduce(
            &mut state,
            Action::SetMessages(vec![Message::user("new", vec![])]),
        );
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].content, "new");
    }

    #[test]
    fn test_add_message_appends_in_order() {
        let mut state = ChatState::default();
        reduce(&mut state, Action::AddMessage(Message::user("one", vec![])));
        reduce(&mut state, Action::AddMessage(Message::assistant("two")));
        assert_eq!(state.messages[0].content, "one");
        assert_eq!(state.messages[1].content, "two");
    }

    #[test]
    fn test_add_loading_message_clears_other_loading_flags() {
        let mut state = state_with(vec![Message::placeholder()]);
        assert!(state.loading_message().is_some());

        reduce(&mut state, Action::AddMessage(Message::placeholder()));

        let loading: Vec<_> = state.messages.iter().filter(|m| m.is_loading).collect();
        assert_eq!(loading.len(), 1);
        assert_eq!(loading[0].id, state.messages[1].id);
    }

    // ---- UpdateMessage ----

    #[test]
    fn test_update_appends_chunks() {
        let placeholder = Message::placeholder();
        let id = placeholder.id;
        let mut state = state_with(vec![placeholder]);

        for chunk in ["Hel", "lo"] {
            reduce(
                &mut state,
                Action::UpdateMessage {
                    id,
                    patch: MessagePatch {
                        append_content: Some(chunk.to_string()),
                        is_loading: Some(false),
                        ..MessagePatch::default()
                    },
                },
            );
        }

        let message = state.message(id).unwrap();
        assert_eq!(message.content, "Hello");
        assert!(!message.is_loading);
    }

    #[test]
    fn test_update_replaces_content() {
        let message = Message::assistant("draft");
        let id = message.id;
        let mut state = state_with(vec![message]);

        reduce(
            &mut state,
            Action::UpdateMessage {
                id,
                patch: MessagePatch {
                    content: Some("final".to_string()),
                    ..MessagePatch::default()
                },
            },
        );
        assert_eq!(state.message(id).unwrap().content, "final");
    }

    #[test]
    fn test_update_attaches_completion_fields() {
        let placeholder = Message::placeholder();
        let id = placeholder.id;
        let mut state = state_with(vec![placeholder]);

        reduce(
            &mut state,
            Action::UpdateMessage {
                id,
                patch: MessagePatch {
                    thinking: Some("t".to_string()),
                    sources: Some(vec![SourceRef::new("Sleep hygiene")]),
                    agent_used: Some("wellness".to_string()),
                    intent: Some("support".to_string()),
                    is_loading: Some(false),
                    ..MessagePatch::default()
                },
            },
        );

        let message = state.message(id).unwrap();
        assert_eq!(message.thinking.as_deref(), Some("t"));
        assert_eq!(message.sources.len(), 1);
        assert_eq!(message.agent_used.as_deref(), Some("wellness"));
        assert!(!message.is_loading);
    }

    #[test]
    fn test_update_unknown_id_is_noop() {
        let mut state = state_with(vec![Message::assistant("keep me")]);
        reduce(
            &mut state,
            Action::UpdateMessage {
                id: Uuid::new_v4(),
                patch: MessagePatch {
                    content: Some("ignored".to_string()),
                    ..MessagePatch::default()
                },
            },
        );
        assert_eq!(state.messages[0].content, "keep me");
    }

    #[test]
    fn test_update_replaces_reactions() {
        let message = Message::assistant("hi");
        let id = message.id;
        let mut state = state_with(vec![message]);

        reduce(
            &mut state,
            Action::UpdateMessage {
                id,
                patch: MessagePatch {
                    reactions: Some(vec!["👍".to_string()]),
                    ..MessagePatch::default()
                },
            },
        );
        assert_eq!(state.message(id).unwrap().reactions, vec!["👍"]);
    }

    // ---- Composer flags ----

    #[test]
    fn test_set_input_and_flags() {
        let mut state = ChatState::default();
        reduce(&mut state, Action::SetInput("hello there".to_string()));
        reduce(&mut state, Action::SetLoading(true));
        reduce(&mut state, Action::SetStreaming(true));

        assert_eq!(state.input, "hello there");
        assert!(state.loading);
        assert!(state.streaming);
    }

    #[test]
    fn test_attachments_set_and_add() {
        let mut state = ChatState::default();
        reduce(
            &mut state,
            Action::SetAttachments(vec![Attachment::image("content://a")]),
        );
        reduce(
            &mut state,
            Action::AddAttachments(vec![Attachment::file("file://b.pdf", "b.pdf")]),
        );
        assert_eq!(state.attachments.len(), 2);
        assert!(state.attachments[0].is_image());
        assert!(!state.attachments[1].is_image());
    }

    #[test]
    fn test_reply_to_set_and_clear() {
        let mut state = ChatState::default();
        let target = Uuid::new_v4();
        reduce(&mut state, Action::SetReplyTo(Some(target)));
        assert_eq!(state.reply_to, Some(target));
        reduce(&mut state, Action::SetReplyTo(None));
        assert!(state.reply_to.is_none());
    }

    #[test]
    fn test_currently_speaking() {
        let mut state = ChatState::default();
        let id = Uuid::new_v4();
        reduce(&mut state, Action::SetCurrentlySpeaking(Some(id)));
        assert_eq!(state.currently_speaking, Some(id));
        reduce(&mut state, Action::SetCurrentlySpeaking(None));
        assert!(state.currently_speaking.is_none());
    }

    #[test]
    fn test_guest_count_increments() {
        let mut state = ChatState::default();
        reduce(&mut state, Action::IncrementGuestCount);
        reduce(&mut state, Action::IncrementGuestCount);
        assert_eq!(state.guest_count, 2);
    }

    #[test]
    fn test_set_suggestions() {
        let mut state = ChatState::default();
        reduce(
            &mut state,
            Action::SetSuggestions(vec!["Tell me more".to_string()]),
        );
        assert_eq!(state.suggestions, vec!["Tell me more"]);
    }

    // ---- ResetSendState ----

    #[test]
    fn test_reset_send_state_clears_composer_and_arms_loading() {
        let mut state = ChatState {
            input: "half-typed".to_string(),
            attachments: vec![Attachment::image("content://a")],
            reply_to: Some(Uuid::new_v4()),
            streaming: true,
            ..ChatState::default()
        };

        reduce(&mut state, Action::ResetSendState);

        assert!(state.input.is_empty());
        assert!(state.attachments.is_empty());
        assert!(state.reply_to.is_none());
        assert!(state.loading);
        assert!(!state.streaming);
    }

    #[test]
    fn test_reset_send_state_leaves_messages_alone() {
        let mut state = state_with(vec![Message::user("kept", vec![])]);
        reduce(&mut state, Action::ResetSendState);
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].role, Role::User);
    }
}
