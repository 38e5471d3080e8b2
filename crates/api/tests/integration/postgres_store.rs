//! Postgres-backed stores
//!
//! ```bash
//! export DATABASE_URL="postgres://localhost/parley_test"
//! cargo test -p parley-api --test integration postgres -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use parley_api::{
    assistant::{NewRule, RuleBook},
    ApiError, AppState, Config,
};
use parley_shared::{create_pool, run_migrations, Message, StoreError};
use uuid::Uuid;

use crate::common::{EchoAssistant, SECRET};

async fn setup_postgres_state() -> AppState {
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");
    let pool = create_pool(&database_url, 5)
        .await
        .expect("Failed to connect to test database");
    run_migrations(&pool).await.expect("Failed to run migrations");

    AppState::new(Config::in_memory(SECRET), Some(pool), Arc::new(EchoAssistant))
}

fn unique(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

#[tokio::test]
#[ignore] // Requires database
async fn test_postgres_session_transcript() {
    let state = setup_postgres_state().await;
    assert_eq!(state.storage_backend(), "postgres");

    let session = state.sessions.create_session().await.unwrap();
    let fetched = state.sessions.get_session(session.id).await.unwrap();
    assert!(fetched.messages.is_empty());

    let first = state
        .sessions
        .append_message(session.id, Message::user("hello"))
        .await
        .unwrap();
    let second = state
        .sessions
        .append_message(session.id, Message::assistant("hi").mark_truncated())
        .await
        .unwrap();
    assert!(second.id > first.id);

    let fetched = state.sessions.get_session(session.id).await.unwrap();
    assert_eq!(fetched.messages.len(), 2);
    assert!(fetched.messages[1].truncated);
    assert_eq!(state.sessions.context(session.id).await.unwrap().len(), 2);

    assert!(state.sessions.delete_session(session.id).await.unwrap());
    assert!(!state.sessions.delete_session(session.id).await.unwrap());
    assert!(matches!(
        state.sessions.append_message(session.id, Message::user("late")).await,
        Err(StoreError::NotFound)
    ));
}

#[tokio::test]
#[ignore] // Requires database
async fn test_postgres_ticket_answered_once() {
    let state = setup_postgres_state().await;
    let owner_name = unique("owner");
    let expert_name = unique("expert");

    state.auth.register(&owner_name, "pw1").await.unwrap();
    state.auth.ensure_expert(&expert_name, "pw2").await.unwrap();

    let owner = state
        .auth
        .validate(&state.auth.login(&owner_name, "pw1").await.unwrap().token)
        .await
        .unwrap();
    let expert = state
        .auth
        .validate(&state.auth.login(&expert_name, "pw2").await.unwrap().token)
        .await
        .unwrap();

    let ticket = state
        .tickets
        .create_ticket(&owner, "Refund", "Charged twice")
        .await
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let state = state.clone();
            let expert = expert.clone();
            tokio::spawn(async move {
                state
                    .tickets
                    .reply_ticket(&expert, ticket.id, &format!("answer {i}"))
                    .await
            })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(ApiError::Conflict(_)) => {}
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }
    assert_eq!(winners, 1);

    let mine = state.tickets.list_own_tickets(&owner).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert!(mine[0].expert_reply.is_some());
}

#[tokio::test]
#[ignore] // Requires database
async fn test_postgres_rules_survive_restart() {
    let state = setup_postgres_state().await;
    let pool = state.pool.clone().unwrap();
    let expert_name = unique("expert");
    state.auth.ensure_expert(&expert_name, "pw1").await.unwrap();
    let expert = state
        .auth
        .validate(&state.auth.login(&expert_name, "pw1").await.unwrap().token)
        .await
        .unwrap();

    let marker = unique("marker");
    let rule = state
        .rules
        .add(
            &expert,
            NewRule {
                patterns: vec![marker.clone()],
                answer: "From storage".to_string(),
                source: "faq".to_string(),
                active: true,
            },
        )
        .await
        .unwrap();

    // A fresh book sees the rule only after loading it
    let restarted = RuleBook::postgres(pool.clone());
    assert!(restarted.check(&marker).await.is_none());
    assert!(restarted.reload().await.unwrap() >= 1);
    assert_eq!(restarted.check(&marker).await.unwrap().answer, "From storage");

    state.rules.remove(&expert, rule.id).await.unwrap();
    let restarted = RuleBook::postgres(pool);
    restarted.reload().await.unwrap();
    assert!(restarted.check(&marker).await.is_none());
}
