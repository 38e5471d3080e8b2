//! OpenAI-compatible chat-completions client with SSE streaming

use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use parley_shared::Message;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Assistant, AssistantRequest, ReplyStream, UpstreamError};
use crate::config::Config;

/// Maximum number of retry attempts for transient failures
const MAX_RETRIES: usize = 3;

/// Initial backoff duration for retries
const RETRY_BASE_DELAY: Duration = Duration::from_millis(10);

/// Maximum backoff duration for retries
const RETRY_MAX_DELAY: Duration = Duration::from_secs(2);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct OpenAiAssistant {
    http_client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    system_prompt: Option<String>,
    temperature: f32,
    max_tokens: u32,
    chunk_timeout: Duration,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

impl OpenAiAssistant {
    pub fn new(config: &Config) -> Result<Self, UpstreamError> {
        let http_client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| UpstreamError::Http(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: format!(
                "{}/chat/completions",
                config.assistant_base_url.trim_end_matches('/')
            ),
            api_key: config.assistant_api_key.clone(),
            model: config.assistant_model.clone(),
            system_prompt: config.assistant_system_prompt.clone(),
            temperature: config.assistant_temperature,
            max_tokens: config.assistant_max_tokens,
            chunk_timeout: config.upstream_timeout(),
        })
    }

    fn request_body(&self, context: &[Message]) -> Result<String, UpstreamError> {
        let mut messages = Vec::with_capacity(context.len() + 1);
        if let Some(prompt) = &self.system_prompt {
            messages.push(ChatMessage {
                role: "system",
                content: prompt,
            });
        }
        // Error notices are ours, not the model's; keep them out of its history
        messages.extend(context.iter().filter(|m| !m.is_error).map(|m| ChatMessage {
            role: m.role.as_str(),
            content: &m.content,
        }));

        serde_json::to_string(&ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: true,
        })
        .map_err(|e| UpstreamError::Decode(e.to_string()))
    }

    async fn send_once(&self, body: &str) -> Result<reqwest::Response, UpstreamError> {
        let mut request = self
            .http_client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .body(body.to_string());
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = tokio::time::timeout(self.chunk_timeout, request.send())
            .await
            .map_err(|_| UpstreamError::Timeout)?
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamError::Timeout
                } else {
                    UpstreamError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Send with exponential backoff. Only transient failures are retried.
    async fn send(&self, body: String) -> Result<reqwest::Response, UpstreamError> {
        use tokio_retry::strategy::{jitter, ExponentialBackoff};
        use tokio_retry::Retry;

        let retry_strategy = ExponentialBackoff::from_millis(RETRY_BASE_DELAY.as_millis() as u64)
            .max_delay(RETRY_MAX_DELAY)
            .take(MAX_RETRIES)
            .map(jitter);

        Retry::spawn(retry_strategy, || async {
            let result = self.send_once(&body).await;

            match &result {
                Ok(_) => Ok(result),
                Err(e) if e.is_transient() => {
                    tracing::debug!(error = %e, "Transient upstream error - will retry");
                    Err(result)
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Permanent upstream error - will not retry");
                    Ok(result)
                }
            }
        })
        .await
        .unwrap_or_else(|e| e)
    }
}

impl Assistant for OpenAiAssistant {
    fn reply(&self, request: AssistantRequest) -> ReplyStream {
        let body = match self.request_body(&request.context) {
            Ok(body) => body,
            Err(e) => return stream::once(async move { Err(e) }).boxed(),
        };

        let client = self.clone();
        let chunk_timeout = self.chunk_timeout;
        tracing::debug!(
            session_id = %request.session_id,
            context_len = request.context.len(),
            model = %self.model,
            "Requesting assistant reply"
        );

        stream::once(async move { client.send(body).await })
            .map_ok(move |response| decode_body(response, chunk_timeout))
            .try_flatten()
            .boxed()
    }
}

// =============================================================================
// SSE decoding
// =============================================================================

#[derive(Debug, PartialEq, Eq)]
enum SseEvent {
    Delta(String),
    Done,
}

/// Interpret the `data` of one chat-completions event
fn parse_data(data: &str) -> Result<Option<SseEvent>, UpstreamError> {
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(Some(SseEvent::Done));
    }
    if data.is_empty() {
        return Ok(None);
    }

    let chunk: ChatChunk =
        serde_json::from_str(data).map_err(|e| UpstreamError::Decode(e.to_string()))?;
    let content: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .collect();

    Ok((!content.is_empty()).then_some(SseEvent::Delta(content)))
}

fn decode_body(response: reqwest::Response, chunk_timeout: Duration) -> ReplyStream {
    decode_events(response.bytes_stream(), chunk_timeout)
}

/// Turn an event-stream body into content deltas.
///
/// Fails with `Timeout` when no event arrives within `chunk_timeout`, and with
/// `Decode` when the body ends before `[DONE]`.
fn decode_events<S, B, E>(body: S, chunk_timeout: Duration) -> ReplyStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let events = body.eventsource().boxed();

    stream::unfold(Some(events), move |state| async move {
        let Some(mut events) = state else {
            return None;
        };
        loop {
            let Ok(next) = tokio::time::timeout(chunk_timeout, events.next()).await else {
                return Some((Err(UpstreamError::Timeout), None));
            };
            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(e)) => return Some((Err(UpstreamError::Http(e.to_string())), None)),
                None => {
                    let error = UpstreamError::Decode("stream ended before [DONE]".to_string());
                    return Some((Err(error), None));
                }
            };

            match parse_data(&event.data) {
                Ok(Some(SseEvent::Delta(text))) => return Some((Ok(text), Some(events))),
                Ok(Some(SseEvent::Done)) => return None,
                Ok(None) => continue,
                Err(e) => return Some((Err(e), None)),
            }
        }
    })
    .boxed()
}
