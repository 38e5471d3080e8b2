//! One request/response cycle on an open channel

use futures::StreamExt;
use parley_shared::{Message, StoreError};
use tokio::sync::watch;

use super::connection::{Connection, ConnectionPhase};
use super::events::{ClientFrame, ReplyPayload, ServerFrame};
use crate::assistant::AssistantRequest;
use crate::error::ApiError;
use crate::state::AppState;

/// How a turn ended, as far as the connection loop is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Reply (possibly an error notice) delivered; keep reading frames
    Completed,
    /// Client went away mid-generation; partial output was saved
    Disconnected,
    /// The session was deleted while the channel was open
    SessionGone,
    /// The session store failed
    StorageFailed,
}

const TIMEOUT_NOTICE: &str = "The assistant did not respond in time. Please try again.";
const FAILURE_NOTICE: &str = "The assistant is unavailable right now. Please try again.";

pub async fn run_turn(
    state: &AppState,
    conn: &Connection,
    frame: ClientFrame,
    disconnected: &mut watch::Receiver<bool>,
) -> TurnOutcome {
    let session_id = conn.session_id;
    if frame.content.trim().is_empty() && frame.media_url.is_none() {
        conn.send(ServerFrame::error("content cannot be empty"));
        return TurnOutcome::Completed;
    }
    if !frame.context.is_empty() {
        tracing::trace!(
            session_id = %session_id,
            client_context = frame.context.len(),
            "Ignoring client-supplied context"
        );
    }

    let _turn = state.sessions.turn_guard(session_id).await;

    let user_message = match state
        .sessions
        .append_message(
            session_id,
            Message::user(frame.content).with_media(frame.message_type, frame.media_url),
        )
        .await
    {
        Ok(message) => message,
        Err(e) => return storage_outcome(session_id, e),
    };

    if let Some(hit) = state.rules.check(&user_message.content).await {
        tracing::info!(session_id = %session_id, rule_id = hit.rule_id, "Answered by rule");
        let reply = Message::assistant(hit.answer.clone()).with_citations(hit.citations());
        return match state.sessions.append_message(session_id, reply).await {
            Ok(stored) => {
                if conn.streaming {
                    conn.send(ServerFrame::Chunk {
                        seq: 0,
                        content: stored.content.clone(),
                    });
                }
                deliver(conn, &stored);
                TurnOutcome::Completed
            }
            Err(e) => storage_outcome(session_id, e),
        };
    }

    let context = match state.sessions.context(session_id).await {
        Ok(context) => context,
        Err(e) => return storage_outcome(session_id, e),
    };

    conn.set_phase(ConnectionPhase::Streaming).await;
    let mut stream = state.assistant.reply(AssistantRequest { session_id, context });
    let mut content = String::new();
    let mut seq = 0u64;

    let failure = loop {
        tokio::select! {
            biased;

            _ = wait_for_disconnect(disconnected) => {
                // Dropping the stream cancels the in-flight upstream request
                drop(stream);
                conn.set_phase(ConnectionPhase::Open).await;
                tracing::info!(
                    session_id = %session_id,
                    partial_len = content.len(),
                    "Client disconnected mid-generation"
                );
                let partial = Message::assistant(content).mark_truncated();
                return match state.sessions.append_message(session_id, partial).await {
                    Ok(_) => TurnOutcome::Disconnected,
                    Err(e) => storage_outcome(session_id, e),
                };
            }

            next = stream.next() => match next {
                Some(Ok(chunk)) => {
                    if conn.streaming {
                        conn.send(ServerFrame::Chunk { seq, content: chunk.clone() });
                        seq += 1;
                    }
                    content.push_str(&chunk);
                }
                Some(Err(e)) => break Some(e),
                None => break None,
            },
        }
    };
    conn.set_phase(ConnectionPhase::Open).await;

    let reply = match failure {
        None => Message::assistant(content),
        Some(e) => {
            let error = ApiError::from(e);
            tracing::warn!(session_id = %session_id, error = %error, "Upstream assistant failed");
            error_message(content, &error)
        }
    };

    match state.sessions.append_message(session_id, reply).await {
        Ok(stored) => {
            deliver(conn, &stored);
            TurnOutcome::Completed
        }
        Err(e) => storage_outcome(session_id, e),
    }
}

async fn wait_for_disconnect(disconnected: &mut watch::Receiver<bool>) {
    // A dropped sender also means the reader is gone
    let _ = disconnected.wait_for(|gone| *gone).await;
}

fn deliver(conn: &Connection, stored: &Message) {
    let payload = ReplyPayload::from(stored);
    if conn.streaming {
        conn.send(ServerFrame::Done(payload));
    } else {
        conn.send(ServerFrame::Message(payload));
    }
}

/// Keep whatever text already arrived, then the notice
fn error_message(partial: String, error: &ApiError) -> Message {
    let notice = match error {
        ApiError::UpstreamTimeout => TIMEOUT_NOTICE,
        _ => FAILURE_NOTICE,
    };
    let content = if partial.is_empty() {
        notice.to_string()
    } else {
        format!("{partial}\n\n{notice}")
    };
    Message::assistant(content).mark_error()
}

fn storage_outcome(session_id: uuid::Uuid, error: StoreError) -> TurnOutcome {
    match error {
        StoreError::NotFound => {
            tracing::info!(session_id = %session_id, "Session deleted under open channel");
            TurnOutcome::SessionGone
        }
        other => {
            tracing::error!(session_id = %session_id, error = %other, "Session store failed");
            TurnOutcome::StorageFailed
        }
    }
}
