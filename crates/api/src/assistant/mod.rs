//! Upstream assistant
//!
//! The gateway treats inference as an opaque service that turns a context
//! projection into an ordered stream of text chunks. [`OpenAiAssistant`] talks to
//! any OpenAI-compatible chat-completions endpoint; [`RuleBook`] answers known
//! questions before the upstream is asked at all.

pub mod openai;
pub mod rules;

use futures::stream::BoxStream;
use parley_shared::Message;

pub use openai::OpenAiAssistant;
pub use rules::{NewRule, RuleBook, RuleError, RuleMatch};

/// Everything the upstream needs to produce one reply
#[derive(Debug, Clone)]
pub struct AssistantRequest {
    pub session_id: uuid::Uuid,
    /// Server-side context projection, oldest first
    pub context: Vec<Message>,
}

pub type ReplyStream = BoxStream<'static, Result<String, UpstreamError>>;

/// Produces a reply as an ordered stream of content chunks.
///
/// Dropping the stream cancels the underlying request.
pub trait Assistant: Send + Sync {
    fn reply(&self, request: AssistantRequest) -> ReplyStream;
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    #[error("assistant did not respond in time")]
    Timeout,
    #[error("assistant request failed: {0}")]
    Http(String),
    #[error("assistant returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("assistant response could not be decoded: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// Whether resending the request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            UpstreamError::Timeout | UpstreamError::Http(_) => true,
            UpstreamError::Status { status, .. } => *status == 429 || *status >= 500,
            UpstreamError::Decode(_) => false,
        }
    }
}

impl From<UpstreamError> for crate::error::ApiError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Timeout => crate::error::ApiError::UpstreamTimeout,
            other => crate::error::ApiError::UpstreamFailure(other.to_string()),
        }
    }
}
