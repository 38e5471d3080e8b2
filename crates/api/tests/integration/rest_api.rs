//! REST surface: sessions, accounts, tickets, feedback and rules

use axum::http::{Method, StatusCode};
use serde_json::json;
use uuid::Uuid;

use crate::common::{
    app, login, register, send, test_state, test_state_with_expert, token_for, EXPERT,
    EXPERT_PASSWORD,
};

// ============================================================================
// Sessions
// ============================================================================

#[tokio::test]
async fn test_session_create_get_delete() {
    let state = test_state();
    let app = app(&state);

    let (status, created) = send(&app, Method::POST, "/sessions", None, None).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["messages"], json!([]));
    assert_eq!(created["context"], json!([]));

    let (status, fetched) = send(&app, Method::GET, &format!("/sessions/{id}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], created["id"]);
    assert_eq!(fetched["messages"], json!([]));

    let (status, _) = send(&app, Method::DELETE, &format!("/sessions/{id}"), None, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, Method::GET, &format!("/sessions/{id}"), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "SESSION_NOT_FOUND");

    // Deleting again is still fine
    let (status, _) = send(&app, Method::DELETE, &format!("/sessions/{id}"), None, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_unknown_and_malformed_session_ids() {
    let state = test_state();
    let app = app(&state);

    let unknown = Uuid::new_v4();
    let (status, body) =
        send(&app, Method::GET, &format!("/sessions/{unknown}"), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "SESSION_NOT_FOUND");

    let (status, _) = send(&app, Method::GET, "/sessions/not-a-uuid", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, Method::DELETE, "/sessions/not-a-uuid", None, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_sessions_get_distinct_ids() {
    let state = test_state();
    let app = app(&state);

    let (_, first) = send(&app, Method::POST, "/sessions", None, None).await;
    let (_, second) = send(&app, Method::POST, "/sessions/", None, None).await;
    assert_ne!(first["id"], second["id"]);
}

// ============================================================================
// Accounts
// ============================================================================

#[tokio::test]
async fn test_register_login_and_me() {
    let state = test_state();
    let app = app(&state);

    let (status, account) = register(&app, "alice", "pw1").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(account["username"], "alice");
    assert_eq!(account["role"], "user");
    assert!(account.get("password_hash").is_none());

    let (status, body) = register(&app, "alice", "pw2").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "USERNAME_TAKEN");

    let (status, issued) = login(&app, "alice", "pw1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(issued["token_type"], "bearer");
    assert!(issued["expires_in"].as_i64().unwrap() > 0);
    let token = issued["access_token"].as_str().unwrap();

    let (status, me) = send(&app, Method::GET, "/me", Some(token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me, json!({"username": "alice", "role": "user"}));
}

#[tokio::test]
async fn test_login_failures_are_indistinguishable() {
    let state = test_state();
    let app = app(&state);
    register(&app, "alice", "pw1").await;

    let (wrong_status, wrong_body) = login(&app, "alice", "nope").await;
    let (unknown_status, unknown_body) = login(&app, "nobody", "nope").await;

    assert_eq!(wrong_status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_body, unknown_body);
}

#[tokio::test]
async fn test_protected_routes_reject_missing_or_bad_tokens() {
    let state = test_state();
    let app = app(&state);

    let (status, _) = send(&app, Method::GET, "/me", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&app, Method::GET, "/tickets", Some("garbage"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_registration_rejects_bad_input() {
    let state = test_state();
    let app = app(&state);

    let (status, _) = register(&app, "alice", "   ").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = register(&app, "a", "pw1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ============================================================================
// Tickets
// ============================================================================

#[tokio::test]
async fn test_ticket_escalation_flow() {
    let state = test_state_with_expert().await;
    let app = app(&state);

    register(&app, "alice", "pw1").await;
    let alice = token_for(&app, "alice", "pw1").await;
    let expert = token_for(&app, EXPERT, EXPERT_PASSWORD).await;

    let (status, ticket) = send(
        &app,
        Method::POST,
        "/tickets",
        Some(&alice),
        Some(json!({"title": "Bill", "description": "Charged twice"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(ticket["status"], "open");
    assert_eq!(ticket["owner"], "alice");
    let ticket_id = ticket["id"].as_i64().unwrap();

    // Users cannot see the expert queue or answer
    let (status, _) = send(&app, Method::GET, "/admin/tickets", Some(&alice), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(
        &app,
        Method::PUT,
        &format!("/admin/tickets/{ticket_id}"),
        Some(&alice),
        Some(json!({"expert_reply": "self-serve"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, queue) = send(&app, Method::GET, "/admin/tickets", Some(&expert), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(queue.as_array().unwrap().len(), 1);

    let (status, answered) = send(
        &app,
        Method::PUT,
        &format!("/admin/tickets/{ticket_id}"),
        Some(&expert),
        Some(json!({"expert_reply": "Refunded", "status": "answered"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(answered["status"], "answered");
    assert_eq!(answered["expert_reply"], "Refunded");
    assert_eq!(answered["responder"], EXPERT);

    let (status, _) = send(
        &app,
        Method::PUT,
        &format!("/admin/tickets/{ticket_id}"),
        Some(&expert),
        Some(json!({"expert_reply": "Again"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, mine) = send(&app, Method::GET, "/tickets", Some(&alice), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine[0]["expert_reply"], "Refunded");

    let (status, single) = send(
        &app,
        Method::GET,
        &format!("/tickets/{ticket_id}"),
        Some(&alice),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(single["status"], "answered");
}

#[tokio::test]
async fn test_other_users_tickets_are_hidden() {
    let state = test_state();
    let app = app(&state);

    register(&app, "alice", "pw1").await;
    register(&app, "bob", "pw2").await;
    let alice = token_for(&app, "alice", "pw1").await;
    let bob = token_for(&app, "bob", "pw2").await;

    let (_, ticket) = send(
        &app,
        Method::POST,
        "/tickets",
        Some(&alice),
        Some(json!({"title": "Private", "description": "Mine"})),
    )
    .await;
    let ticket_id = ticket["id"].as_i64().unwrap();

    let (status, _) = send(
        &app,
        Method::GET,
        &format!("/tickets/{ticket_id}"),
        Some(&bob),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, bobs) = send(&app, Method::GET, "/tickets", Some(&bob), None).await;
    assert_eq!(bobs, json!([]));
}

#[tokio::test]
async fn test_reply_status_must_be_answered() {
    let state = test_state_with_expert().await;
    let app = app(&state);

    register(&app, "alice", "pw1").await;
    let alice = token_for(&app, "alice", "pw1").await;
    let expert = token_for(&app, EXPERT, EXPERT_PASSWORD).await;

    let (_, ticket) = send(
        &app,
        Method::POST,
        "/tickets",
        Some(&alice),
        Some(json!({"title": "Q", "description": "D"})),
    )
    .await;
    let ticket_id = ticket["id"].as_i64().unwrap();

    let (status, _) = send(
        &app,
        Method::PUT,
        &format!("/admin/tickets/{ticket_id}"),
        Some(&expert),
        Some(json!({"expert_reply": "A", "status": "open"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ============================================================================
// Feedback & corrections
// ============================================================================

#[tokio::test]
async fn test_feedback_anonymous_and_authenticated() {
    let state = test_state_with_expert().await;
    let app = app(&state);

    let (status, vote) = send(
        &app,
        Method::POST,
        "/feedback",
        None,
        Some(json!({"message_id": 7, "score": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(vote.get("submitted_by").is_none());

    register(&app, "alice", "pw1").await;
    let alice = token_for(&app, "alice", "pw1").await;
    let (status, vote) = send(
        &app,
        Method::POST,
        "/feedback",
        Some(&alice),
        Some(json!({"message_id": 7, "score": -1})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(vote["submitted_by"], "alice");

    let (status, _) = send(
        &app,
        Method::POST,
        "/feedback",
        Some("not-a-token"),
        Some(json!({"message_id": 7, "score": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        Method::POST,
        "/feedback",
        None,
        Some(json!({"message_id": 7, "score": 5})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, Method::GET, "/admin/feedback/7", Some(&alice), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let expert = token_for(&app, EXPERT, EXPERT_PASSWORD).await;
    let (status, votes) = send(&app, Method::GET, "/admin/feedback/7", Some(&expert), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(votes.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_corrections_are_expert_only() {
    let state = test_state_with_expert().await;
    let app = app(&state);

    register(&app, "alice", "pw1").await;
    let alice = token_for(&app, "alice", "pw1").await;
    let expert = token_for(&app, EXPERT, EXPERT_PASSWORD).await;
    let body = json!({"message_id": 3, "correction_content": "The answer is 4"});

    let (status, _) = send(
        &app,
        Method::POST,
        "/admin/corrections",
        Some(&alice),
        Some(body.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, correction) = send(
        &app,
        Method::POST,
        "/admin/corrections",
        Some(&expert),
        Some(body),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(correction["expert"], EXPERT);
    assert_eq!(correction["content"], "The answer is 4");
}

// ============================================================================
// Rules
// ============================================================================

#[tokio::test]
async fn test_rule_administration() {
    let state = test_state_with_expert().await;
    let app = app(&state);

    register(&app, "alice", "pw1").await;
    let alice = token_for(&app, "alice", "pw1").await;
    let expert = token_for(&app, EXPERT, EXPERT_PASSWORD).await;
    let rule = json!({
        "patterns": ["opening hours"],
        "answer": "We are open 9 to 5.",
        "source": "faq"
    });

    let (status, _) = send(&app, Method::POST, "/admin/rules", Some(&alice), Some(rule.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, created) = send(&app, Method::POST, "/admin/rules", Some(&expert), Some(rule)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["active"], true);
    let rule_id = created["id"].as_i64().unwrap();

    let (status, invalid) = send(
        &app,
        Method::POST,
        "/admin/rules",
        Some(&expert),
        Some(json!({"patterns": ["(unclosed"], "answer": "x", "source": "faq"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{invalid}");

    let (_, rules) = send(&app, Method::GET, "/admin/rules", Some(&expert), None).await;
    assert_eq!(rules.as_array().unwrap().len(), 1);

    let (status, _) = send(
        &app,
        Method::DELETE,
        &format!("/admin/rules/{rule_id}"),
        Some(&expert),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        &app,
        Method::DELETE,
        &format!("/admin/rules/{rule_id}"),
        Some(&expert),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================================
// Health & channel preconditions
// ============================================================================

#[tokio::test]
async fn test_health_reports_store_and_channels() {
    let state = test_state();
    let app = app(&state);
    send(&app, Method::POST, "/sessions", None, None).await;

    let (status, health) = send(&app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["sessions"], 1);
    assert_eq!(health["channels"]["active_connections"], 0);

    let (status, _) = send(&app, Method::GET, "/health/live", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_channel_for_unknown_session_is_not_found() {
    let state = test_state();
    let app = app(&state);

    let (status, body) = send(
        &app,
        Method::GET,
        &format!("/ws/{}", Uuid::new_v4()),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "SESSION_NOT_FOUND");

    let (status, _) = send(&app, Method::GET, "/ws/not-a-uuid", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_security_headers_present() {
    let state = test_state();
    let app = app(&state);

    let request = axum::http::Request::builder()
        .uri("/health/live")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = tower::ServiceExt::oneshot(app, request).await.unwrap();
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(response.headers()["x-frame-options"], "DENY");
}
