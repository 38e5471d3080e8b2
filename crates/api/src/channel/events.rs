//! Frames exchanged over the duplex channel

use parley_shared::{Message, MessageRole, MessageType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// =============================================================================
// Client-to-Server
// =============================================================================

/// One user turn. `context` is what the client believes the conversation looks
/// like; the server's own projection is used instead.
#[derive(Debug, Deserialize)]
pub struct ClientFrame {
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    #[serde(default, alias = "url")]
    pub media_url: Option<String>,
    #[serde(default)]
    pub context: Vec<Message>,
}

// =============================================================================
// Server-to-Client
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Sent once when the channel opens
    Ready {
        session_id: Uuid,
        /// Transcript length at open; the client resumes from this index
        resume_from: usize,
        streaming: bool,
    },

    /// A complete reply
    Message(ReplyPayload),

    /// One piece of a streamed reply
    Chunk { seq: u64, content: String },

    /// End of a streamed reply, carrying the persisted message
    Done(ReplyPayload),

    Error { message: String },
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplyPayload {
    pub role: MessageRole,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citations: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
    #[serde(skip_serializing_if = "is_false")]
    pub truncated: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub is_error: bool,
}

impl From<&Message> for ReplyPayload {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
            message_type: message.message_type,
            media_url: message.media_url.clone(),
            citations: message.citations.clone(),
            message_id: message.id,
            truncated: message.truncated,
            is_error: message.is_error,
        }
    }
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }
}
