//! Record types shared across the Parley gateway

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

/// Error returned when a stored or client-supplied string does not name a known variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Authorization class of an account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Expert,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Expert => "expert",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "expert" => Ok(Role::Expert),
            other => Err(ParseEnumError::new("role", other)),
        }
    }
}

/// Author of a transcript message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

impl FromStr for MessageRole {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            other => Err(ParseEnumError::new("message role", other)),
        }
    }
}

/// Content kind of a transcript message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Audio,
    Mindmap,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::Audio => "audio",
            MessageType::Mindmap => "mindmap",
        }
    }
}

impl FromStr for MessageType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            "audio" => Ok(MessageType::Audio),
            "mindmap" => Ok(MessageType::Mindmap),
            other => Err(ParseEnumError::new("message type", other)),
        }
    }
}

/// Lifecycle of an escalation ticket. Only `Open -> Answered` is legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Open,
    Answered,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::Answered => "answered",
        }
    }
}

impl FromStr for TicketStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(TicketStatus::Open),
            "answered" => Ok(TicketStatus::Answered),
            other => Err(ParseEnumError::new("ticket status", other)),
        }
    }
}

// =============================================================================
// Sessions & Messages
// =============================================================================

fn is_false(value: &bool) -> bool {
    !*value
}

/// A single transcript entry. Immutable once appended to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Assigned by the session registry when the message is appended
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub role: MessageRole,
    pub content: String,
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Value>,
    /// Generation was interrupted by a client disconnect
    #[serde(default, skip_serializing_if = "is_false")]
    pub truncated: bool,
    /// Assistant-role notice produced from an upstream failure
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_error: bool,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub created_at: Option<OffsetDateTime>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: None,
            role,
            content: content.into(),
            message_type: MessageType::Text,
            media_url: None,
            citations: None,
            truncated: false,
            is_error: false,
            created_at: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn with_citations(mut self, citations: Value) -> Self {
        self.citations = Some(citations);
        self
    }

    pub fn with_media(mut self, message_type: MessageType, media_url: Option<String>) -> Self {
        self.message_type = message_type;
        self.media_url = media_url;
        self
    }

    pub fn mark_truncated(mut self) -> Self {
        self.truncated = true;
        self
    }

    pub fn mark_error(mut self) -> Self {
        self.is_error = true;
        self
    }
}

/// A persistent conversation and its append-only transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub messages: Vec<Message>,
    /// Derived from `messages`; see [`project_context`]
    pub context: Vec<Message>,
}

impl Session {
    pub fn new(id: Uuid, now: OffsetDateTime) -> Self {
        Self {
            id,
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
            context: Vec::new(),
        }
    }

    /// Append a stamped message and recompute the context projection
    pub fn push(&mut self, message: Message, context_window: usize) {
        if let Some(at) = message.created_at {
            self.updated_at = at;
        }
        self.messages.push(message);
        self.context = project_context(&self.messages, context_window);
    }
}

/// The last `window` transcript messages, in transcript order
pub fn project_context(transcript: &[Message], window: usize) -> Vec<Message> {
    let start = transcript.len().saturating_sub(window);
    transcript[start..].to_vec()
}

// =============================================================================
// Accounts
// =============================================================================

/// A registered credential. Never deleted.
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Feedback, corrections & tickets
// =============================================================================

/// One quality vote on a transcript message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feedback {
    pub id: i64,
    pub message_id: i64,
    pub score: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_by: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// An expert-provided improved answer for a transcript message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Correction {
    pub id: i64,
    pub message_id: i64,
    pub content: String,
    pub expert: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A user escalation awaiting an expert reply
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ticket {
    pub id: i64,
    pub owner: String,
    pub title: String,
    pub description: String,
    pub status: TicketStatus,
    pub expert_reply: Option<String>,
    pub responder: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub answered_at: Option<OffsetDateTime>,
}

/// A canned answer selected by pattern before the upstream assistant is asked
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rule {
    pub id: i64,
    pub patterns: Vec<String>,
    pub answer: String,
    pub source: String,
    pub active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
