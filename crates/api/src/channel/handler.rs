//! WebSocket handler for Axum
//!
//! Resolves the session before upgrading, then runs three cooperating tasks per
//! connection: a reader feeding a FIFO, a writer draining outgoing frames, and
//! the connection task processing turns strictly in order.

use axum::{
    extract::{
        rejection::QueryRejection,
        ws::{rejection::WebSocketUpgradeRejection, CloseFrame, Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures::{stream::StreamExt, SinkExt};
use parley_shared::StoreError;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

use super::{
    connection::{Connection, ConnectionPhase, Outgoing, CLOSE_INTERNAL, CLOSE_SESSION_GONE},
    events::{ClientFrame, ServerFrame},
    turn::{run_turn, TurnOutcome},
};

#[derive(Debug, Deserialize)]
pub struct ChannelQuery {
    /// Overrides the server's default delivery mode for this connection
    stream: Option<bool>,
}

/// Upgrade to a duplex channel bound to `session_id`.
///
/// Unknown or malformed ids are answered with 404 before any upgrade happens.
pub async fn ws_handler(
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    query: Result<Query<ChannelQuery>, QueryRejection>,
) -> Response {
    let Ok(session_id) = Uuid::parse_str(&raw_id) else {
        return ApiError::SessionNotFound.into_response();
    };

    let session = match state.sessions.get_session(session_id).await {
        Ok(session) => session,
        Err(StoreError::NotFound) => {
            tracing::debug!(session_id = %session_id, "Channel requested for unknown session");
            return ApiError::SessionNotFound.into_response();
        }
        Err(e) => return ApiError::from(e).into_response(),
    };

    let Query(params) = match query {
        Ok(query) => query,
        Err(rejection) => return ApiError::BadRequest(rejection.body_text()).into_response(),
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let streaming = params.stream.unwrap_or(state.config.stream_replies);
    let resume_from = session.messages.len();

    tracing::info!(session_id = %session_id, streaming, resume_from, "Channel upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, resume_from, streaming, state))
}

async fn handle_socket(
    socket: WebSocket,
    session_id: Uuid,
    resume_from: usize,
    streaming: bool,
    state: AppState,
) {
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();
    let conn = state
        .channels
        .add_connection(Connection::new(session_id, streaming, tx))
        .await;
    let connection_id = conn.id;

    conn.set_phase(ConnectionPhase::Open).await;
    let session_connections = state.channels.session_connections(&session_id).await;
    tracing::info!(
        session_id = %session_id,
        connection_id = %connection_id,
        session_connections = session_connections,
        "Channel open"
    );
    conn.send(ServerFrame::Ready {
        session_id,
        resume_from,
        streaming,
    });

    // Writer: serialize outgoing frames in queue order
    let send_task = tokio::spawn(async move {
        while let Some(outgoing) = rx.recv().await {
            match outgoing {
                Outgoing::Frame(frame) => match serde_json::to_string(&frame) {
                    Ok(json) => {
                        if sender.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = ?e, "Failed to serialize channel frame");
                    }
                },
                Outgoing::Close { code, reason } => {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    // Reader: queue inbound text frames; flag the disconnect when the socket ends
    let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<String>();
    let (gone_tx, mut gone_rx) = watch::channel(false);
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if inbound_tx.send(text).is_err() {
                        break;
                    }
                }
                Message::Close(_) => {
                    tracing::debug!(session_id = %session_id, "Close frame received");
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => {
                    // Axum handles ping/pong automatically
                }
                Message::Binary(_) => {}
            }
        }
        let _ = gone_tx.send(true);
    });

    while let Some(text) = inbound_rx.recv().await {
        if *gone_rx.borrow() {
            break;
        }

        let frame = match serde_json::from_str::<ClientFrame>(&text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to parse client frame");
                conn.send(ServerFrame::error("Invalid frame format"));
                continue;
            }
        };

        match run_turn(&state, &conn, frame, &mut gone_rx).await {
            TurnOutcome::Completed => {}
            TurnOutcome::Disconnected => break,
            TurnOutcome::SessionGone => {
                conn.send(ServerFrame::error("Session no longer exists"));
                conn.close(CLOSE_SESSION_GONE, "session deleted");
                break;
            }
            TurnOutcome::StorageFailed => {
                conn.send(ServerFrame::error("Session storage unavailable"));
                conn.close(CLOSE_INTERNAL, "storage failure");
                break;
            }
        }
    }

    tracing::info!(session_id = %session_id, connection_id = %connection_id, "Channel closing");
    conn.set_phase(ConnectionPhase::Closed).await;
    state.channels.remove_connection(&connection_id).await;
    drop(conn);

    // Every sender is gone now, so the writer flushes what is queued and exits
    let _ = send_task.await;
    recv_task.abort();
}
