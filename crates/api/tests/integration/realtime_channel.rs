//! Duplex channel over a real socket

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parley_api::AppState;
use parley_shared::MessageRole;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use uuid::Uuid;

use crate::common::{eventually, spawn_server, test_state};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(addr: SocketAddr, session_id: Uuid, query: &str) -> Client {
    let url = format!("ws://{addr}/ws/{session_id}{query}");
    let (ws, _) = connect_async(url).await.expect("connect");
    ws
}

async fn say(ws: &mut Client, content: &str) {
    ws.send(Message::Text(json!({"content": content}).to_string()))
        .await
        .expect("send");
}

/// Next server message, skipping keepalives
async fn next_message(ws: &mut Client) -> Message {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("frame before timeout")
            .expect("stream open")
            .expect("valid frame");
        match msg {
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return other,
        }
    }
}

async fn next_frame(ws: &mut Client) -> Value {
    match next_message(ws).await {
        Message::Text(text) => serde_json::from_str(&text).expect("json frame"),
        other => panic!("expected text frame, got {other:?}"),
    }
}

async fn open_session(state: &AppState) -> Uuid {
    state.sessions.create_session().await.unwrap().id
}

#[tokio::test]
async fn test_channel_reply_is_persisted_and_resumable() {
    let state = test_state();
    let addr = spawn_server(&state).await;
    let session_id = open_session(&state).await;

    let mut ws = connect(addr, session_id, "").await;
    let ready = next_frame(&mut ws).await;
    assert_eq!(ready["event"], "ready");
    assert_eq!(ready["session_id"], session_id.to_string());
    assert_eq!(ready["resume_from"], 0);
    assert_eq!(ready["streaming"], false);

    say(&mut ws, "hello").await;
    let reply = next_frame(&mut ws).await;
    assert_eq!(reply["event"], "message");
    assert_eq!(reply["role"], "assistant");
    assert_eq!(reply["content"], "echo: hello");
    assert!(reply["message_id"].is_i64());

    let session = state.sessions.get_session(session_id).await.unwrap();
    assert_eq!(session.messages.len(), 2);
    assert_eq!(session.messages[0].role, MessageRole::User);
    assert_eq!(session.messages[0].content, "hello");
    assert_eq!(session.messages[1].content, "echo: hello");

    ws.close(None).await.ok();
    drop(ws);

    let mut again = connect(addr, session_id, "").await;
    let ready = next_frame(&mut again).await;
    assert_eq!(ready["resume_from"], 2);
}

#[tokio::test]
async fn test_frames_are_answered_in_order() {
    let state = test_state();
    let addr = spawn_server(&state).await;
    let session_id = open_session(&state).await;

    let mut ws = connect(addr, session_id, "").await;
    next_frame(&mut ws).await;

    say(&mut ws, "first").await;
    say(&mut ws, "second").await;
    say(&mut ws, "third").await;

    for expected in ["first", "second", "third"] {
        let reply = next_frame(&mut ws).await;
        assert_eq!(reply["content"], format!("echo: {expected}"));
    }

    let session = state.sessions.get_session(session_id).await.unwrap();
    let contents: Vec<_> = session.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents,
        vec![
            "first",
            "echo: first",
            "second",
            "echo: second",
            "third",
            "echo: third"
        ]
    );
}

#[tokio::test]
async fn test_streaming_delivers_chunks_then_done() {
    let state = test_state();
    let addr = spawn_server(&state).await;
    let session_id = open_session(&state).await;

    let mut ws = connect(addr, session_id, "?stream=true").await;
    let ready = next_frame(&mut ws).await;
    assert_eq!(ready["streaming"], true);

    say(&mut ws, "tell me more").await;

    let mut assembled = String::new();
    let mut expected_seq = 0;
    let done = loop {
        let frame = next_frame(&mut ws).await;
        match frame["event"].as_str() {
            Some("chunk") => {
                assert_eq!(frame["seq"], expected_seq);
                expected_seq += 1;
                assembled.push_str(frame["content"].as_str().unwrap());
            }
            Some("done") => break frame,
            other => panic!("unexpected event {other:?}"),
        }
    };

    assert!(expected_seq > 1);
    assert_eq!(assembled, "echo: tell me more");
    assert_eq!(done["content"], assembled);
    assert!(done.get("truncated").is_none());
}

#[tokio::test]
async fn test_disconnect_mid_reply_saves_truncated_partial() {
    let state = test_state();
    let addr = spawn_server(&state).await;
    let session_id = open_session(&state).await;

    let mut ws = connect(addr, session_id, "?stream=true").await;
    next_frame(&mut ws).await;

    say(&mut ws, "please stall").await;
    let chunk = next_frame(&mut ws).await;
    assert_eq!(chunk["event"], "chunk");
    assert_eq!(chunk["content"], "echo: ");

    ws.close(None).await.ok();
    drop(ws);

    let saved = eventually(|| {
        let state = state.clone();
        async move {
            let session = state.sessions.get_session(session_id).await.unwrap();
            session.messages.len() == 2
        }
    })
    .await;
    assert!(saved, "partial reply was not persisted");

    let session = state.sessions.get_session(session_id).await.unwrap();
    let partial = &session.messages[1];
    assert_eq!(partial.role, MessageRole::Assistant);
    assert_eq!(partial.content, "echo: ");
    assert!(partial.truncated);

    assert!(
        eventually(|| {
            let state = state.clone();
            async move { state.channels.stats().await.active_connections == 0 }
        })
        .await
    );
}

#[tokio::test]
async fn test_rule_answers_without_upstream() {
    let state = crate::common::test_state_with_expert().await;
    let addr = spawn_server(&state).await;
    let session_id = open_session(&state).await;

    let expert = state
        .auth
        .validate(&state.auth.login("expert", "expert-pass").await.unwrap().token)
        .await
        .unwrap();
    state
        .rules
        .add(
            &expert,
            serde_json::from_value(json!({
                "patterns": ["opening hours"],
                "answer": "We are open 9 to 5.",
                "source": "faq"
            }))
            .unwrap(),
        )
        .await
        .unwrap();

    let mut ws = connect(addr, session_id, "").await;
    next_frame(&mut ws).await;

    say(&mut ws, "What are your Opening Hours?").await;
    let reply = next_frame(&mut ws).await;
    assert_eq!(reply["event"], "message");
    assert_eq!(reply["content"], "We are open 9 to 5.");
    assert_eq!(reply["citations"], json!([{"source": "faq"}]));
}

#[tokio::test]
async fn test_media_frame_round_trip() {
    let state = test_state();
    let addr = spawn_server(&state).await;
    let session_id = open_session(&state).await;

    let mut ws = connect(addr, session_id, "").await;
    next_frame(&mut ws).await;

    let frame = json!({
        "content": "what is this?",
        "type": "image",
        "url": "https://cdn.example/cat.png"
    });
    ws.send(Message::Text(frame.to_string())).await.unwrap();
    let reply = next_frame(&mut ws).await;
    assert_eq!(reply["content"], "echo: what is this?");

    let session = state.sessions.get_session(session_id).await.unwrap();
    let stored = serde_json::to_value(&session.messages[0]).unwrap();
    assert_eq!(stored["type"], "image");
    assert_eq!(stored["media_url"], "https://cdn.example/cat.png");
}

#[tokio::test]
async fn test_invalid_and_empty_frames_keep_channel_open() {
    let state = test_state();
    let addr = spawn_server(&state).await;
    let session_id = open_session(&state).await;

    let mut ws = connect(addr, session_id, "").await;
    next_frame(&mut ws).await;

    ws.send(Message::Text("not json".to_string())).await.unwrap();
    let error = next_frame(&mut ws).await;
    assert_eq!(error["event"], "error");

    say(&mut ws, "   ").await;
    let error = next_frame(&mut ws).await;
    assert_eq!(error["event"], "error");

    say(&mut ws, "still here").await;
    let reply = next_frame(&mut ws).await;
    assert_eq!(reply["content"], "echo: still here");
}

#[tokio::test]
async fn test_deleted_session_closes_channel() {
    let state = test_state();
    let addr = spawn_server(&state).await;
    let session_id = open_session(&state).await;

    let mut ws = connect(addr, session_id, "").await;
    next_frame(&mut ws).await;

    assert!(state.sessions.delete_session(session_id).await.unwrap());
    say(&mut ws, "anyone there?").await;

    let error = next_frame(&mut ws).await;
    assert_eq!(error["event"], "error");

    match next_message(&mut ws).await {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 4404),
        other => panic!("expected close frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_session_refused_before_upgrade() {
    let state = test_state();
    let addr = spawn_server(&state).await;

    let url = format!("ws://{addr}/ws/{}", Uuid::new_v4());
    match connect_async(url).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 404),
        Err(other) => panic!("unexpected error {other:?}"),
        Ok(_) => panic!("upgrade should have been refused"),
    }
}
