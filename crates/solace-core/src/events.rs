use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::Role;

/// Events emitted by the chat session controller for front-end rendering.
///
/// Broadcast on a `tokio::sync::broadcast` channel; a renderer subscribes
/// and reacts instead of polling `ChatState`. Events carry ids rather than
/// whole messages — subscribers read the authoritative state for detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub enum SessionEvent {
    /// A message was appended to the log (user, assistant, or notice).
    MessageAppended {
        id: Uuid,
        role: Role,
        timestamp: DateTime<Utc>,
    },
    /// An existing message changed (reaction toggle, metadata attach).
    MessageUpdated { id: Uuid, timestamp: DateTime<Utc> },
    /// A streamed chunk landed on the in-flight assistant message.
    AssistantChunk {
        id: Uuid,
        text: String,
        timestamp: DateTime<Utc>,
    },
    /// The in-flight assistant message was finalized and persisted.
    MessageFinalized { id: Uuid, timestamp: DateTime<Utc> },
    /// A message was deleted.
    MessageRemoved { id: Uuid, timestamp: DateTime<Utc> },
    StreamingChanged {
        streaming: bool,
        timestamp: DateTime<Utc>,
    },
    LoadingChanged {
        loading: bool,
        timestamp: DateTime<Utc>,
    },
    SuggestionsUpdated {
        suggestions: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    /// Which message is currently being read aloud, if any.
    SpeakingChanged {
        message_id: Option<Uuid>,
        timestamp: DateTime<Utc>,
    },
    /// A guest hit the free-exchange quota.
    GuestLimitReached { timestamp: DateTime<Utc> },
}

impl SessionEvent {
    /// Timestamp of the event, for ordering in a subscriber's log.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            SessionEvent::MessageAppended { timestamp, .. }
            | SessionEvent::MessageUpdated { timestamp, .. }
            | SessionEvent::AssistantChunk { timestamp, .. }
            | SessionEvent::MessageFinalized { timestamp, .. }
            | SessionEvent::MessageRemoved { timestamp, .. }
            | SessionEvent::StreamingChanged { timestamp, .. }
            | SessionEvent::LoadingChanged { timestamp, .. }
            | SessionEvent::SuggestionsUpdated { timestamp, .. }
            | SessionEvent::SpeakingChanged { timestamp, .. }
            | SessionEvent::GuestLimitReached { timestamp } => *timestamp,
        }
    }

    /// Stable snake_case name for logging and wire formats.
    pub fn event_name(&self) -> &'static str {
        match self {
            SessionEvent::MessageAppended { .. } => "message_appended",
            SessionEvent::MessageUpdated { .. } => "message_updated",
            SessionEvent::AssistantChunk { .. } => "assistant_chunk",
            SessionEvent::MessageFinalized { .. } => "message_finalized",
            SessionEvent::MessageRemoved { .. } => "message_removed",
            SessionEvent::StreamingChanged { .. } => "streaming_changed",
            SessionEvent::LoadingChanged { .. } => "loading_changed",
            SessionEvent::SuggestionsUpdated { .. } => "suggestions_updated",
            SessionEvent::SpeakingChanged { .. } => "speaking_changed",
            SessionEvent::GuestLimitReached { .. } => "guest_limit_reached",
        }
    }
}
