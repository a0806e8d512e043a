use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SolaceError;

/// Conversation id used when no multi-thread id is supplied.
pub const DEFAULT_CONVERSATION: &str = "default";

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = SolaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            other => Err(SolaceError::Storage(format!("Unknown role: {}", other))),
        }
    }
}

/// Kind of an attached resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    File,
}

/// Reference to an externally-owned binary resource.
///
/// The engine never owns attachment bytes; `uri` is an opaque handle
/// resolved by whichever collaborator needs the content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub uri: String,
    pub kind: AttachmentKind,
    #[serde(default)]
    pub name: Option<String>,
}

impl Attachment {
    pub fn image(uri: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            uri: uri.into(),
            kind: AttachmentKind::Image,
            name: None,
        }
    }

    pub fn file(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            uri: uri.into(),
            kind: AttachmentKind::File,
            name: Some(name.into()),
        }
    }

    pub fn is_image(&self) -> bool {
        self.kind == AttachmentKind::Image
    }
}

/// Citation attached to an assistant message by the inference service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
}

impl SourceRef {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: None,
            snippet: None,
        }
    }
}

/// A single message in a conversation.
///
/// Immutable once finalized: `content` may only change while `is_loading`
/// is true (the streaming placeholder). At most one message in a
/// conversation has `is_loading == true` at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    #[serde(default)]
    pub thinking: Option<String>,
    #[serde(default)]
    pub agent_used: Option<String>,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub reactions: Vec<String>,
    #[serde(default)]
    pub is_loading: bool,
}

impl Message {
    fn base(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            attachments: Vec::new(),
            sources: Vec::new(),
            thinking: None,
            agent_used: None,
            intent: None,
            reactions: Vec::new(),
            is_loading: false,
        }
    }

    /// A user message carrying the current attachment set.
    pub fn user(content: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            attachments,
            ..Self::base(Role::User, content)
        }
    }

    /// A finalized assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::base(Role::Assistant, content)
    }

    /// An in-flight assistant message that accumulates streamed chunks.
    pub fn placeholder() -> Self {
        Self {
            is_loading: true,
            ..Self::base(Role::Assistant, "")
        }
    }

    /// A system-generated assistant notice (quota limits, soft failures).
    ///
    /// Rendered like any assistant message; the `intent` tag lets callers
    /// tell synthesized notices apart from model output.
    pub fn notice(content: impl Into<String>) -> Self {
        Self {
            intent: Some("notice".to_string()),
            ..Self::base(Role::Assistant, content)
        }
    }

    /// Toggle membership of `emoji` in this message's reaction multiset.
    ///
    /// Present removes every occurrence, absent adds one. Applying the same
    /// toggle twice restores the original state.
    pub fn toggle_reaction(&mut self, emoji: &str) {
        if self.reactions.iter().any(|r| r == emoji) {
            self.reactions.retain(|r| r != emoji);
        } else {
            self.reactions.push(emoji.to_string());
        }
    }

    /// First image attachment, if any. Drives the image-analysis send branch.
    pub fn first_image(&self) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.is_image())
    }

    pub fn is_notice(&self) -> bool {
        self.intent.as_deref() == Some("notice")
    }
}

/// Listing row for a conversation: mutable title plus recency metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
    pub last_message: Option<String>,
    pub unread_count: u32,
}

/// How the session was initiated; voice mode keeps responses shorter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    Text,
    Voice,
}

impl Default for ChatMode {
    fn default() -> Self {
        ChatMode::Text
    }
}

/// Tone requested from the inference service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStyle {
    Supportive,
    Balanced,
    Direct,
}

impl Default for ResponseStyle {
    fn default() -> Self {
        ResponseStyle::Balanced
    }
}
