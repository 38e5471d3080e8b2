//! Postgres-backed ticket, feedback and correction storage

use parley_shared::{Correction, Feedback, StoreError, StoreResult, Ticket};
use sqlx::PgPool;
use time::OffsetDateTime;

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: i64,
    owner: String,
    title: String,
    description: String,
    status: String,
    expert_reply: Option<String>,
    responder: Option<String>,
    created_at: OffsetDateTime,
    answered_at: Option<OffsetDateTime>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        Ok(Ticket {
            id: row.id,
            owner: row.owner,
            title: row.title,
            description: row.description,
            status: row.status.parse()?,
            expert_reply: row.expert_reply,
            responder: row.responder,
            created_at: row.created_at,
            answered_at: row.answered_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct FeedbackRow {
    id: i64,
    message_id: i64,
    score: i32,
    submitted_by: Option<String>,
    created_at: OffsetDateTime,
}

impl From<FeedbackRow> for Feedback {
    fn from(row: FeedbackRow) -> Self {
        Feedback {
            id: row.id,
            message_id: row.message_id,
            score: row.score,
            submitted_by: row.submitted_by,
            created_at: row.created_at,
        }
    }
}

const TICKET_COLUMNS: &str =
    "id, owner, title, description, status, expert_reply, responder, created_at, answered_at";

pub async fn insert_feedback(
    pool: &PgPool,
    message_id: i64,
    score: i32,
    submitted_by: Option<&str>,
) -> StoreResult<Feedback> {
    let row = sqlx::query_as::<_, FeedbackRow>(
        r#"
        INSERT INTO message_feedback (message_id, score, submitted_by)
        VALUES ($1, $2, $3)
        RETURNING id, message_id, score, submitted_by, created_at
        "#,
    )
    .bind(message_id)
    .bind(score)
    .bind(submitted_by)
    .fetch_one(pool)
    .await?;

    Ok(row.into())
}

pub async fn feedback_for(pool: &PgPool, message_id: i64) -> StoreResult<Vec<Feedback>> {
    let rows = sqlx::query_as::<_, FeedbackRow>(
        r#"
        SELECT id, message_id, score, submitted_by, created_at
        FROM message_feedback
        WHERE message_id = $1
        ORDER BY id ASC
        "#,
    )
    .bind(message_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Feedback::from).collect())
}

pub async fn insert_correction(
    pool: &PgPool,
    message_id: i64,
    content: &str,
    expert: &str,
) -> StoreResult<Correction> {
    let (id, created_at) = sqlx::query_as::<_, (i64, OffsetDateTime)>(
        r#"
        INSERT INTO message_corrections (message_id, content, expert)
        VALUES ($1, $2, $3)
        RETURNING id, created_at
        "#,
    )
    .bind(message_id)
    .bind(content)
    .bind(expert)
    .fetch_one(pool)
    .await?;

    Ok(Correction {
        id,
        message_id,
        content: content.to_string(),
        expert: expert.to_string(),
        created_at,
    })
}

pub async fn insert_ticket(pool: &PgPool, owner: &str, title: &str, description: &str) -> StoreResult<Ticket> {
    let row = sqlx::query_as::<_, TicketRow>(&format!(
        r#"
        INSERT INTO tickets (owner, title, description)
        VALUES ($1, $2, $3)
        RETURNING {TICKET_COLUMNS}
        "#
    ))
    .bind(owner)
    .bind(title)
    .bind(description)
    .fetch_one(pool)
    .await?;

    row.try_into()
}

pub async fn ticket(pool: &PgPool, id: i64) -> StoreResult<Ticket> {
    let row = sqlx::query_as::<_, TicketRow>(&format!(
        "SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound)?;

    row.try_into()
}

pub async fn tickets(pool: &PgPool, owner: Option<&str>) -> StoreResult<Vec<Ticket>> {
    let rows = sqlx::query_as::<_, TicketRow>(&format!(
        r#"
        SELECT {TICKET_COLUMNS}
        FROM tickets
        WHERE $1::TEXT IS NULL OR owner = $1
        ORDER BY created_at DESC, id DESC
        "#
    ))
    .bind(owner)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Ticket::try_from).collect()
}

/// Compare-and-swap on `status`: only one concurrent reply can win
pub async fn answer(pool: &PgPool, id: i64, reply: &str, responder: &str) -> StoreResult<Ticket> {
    let row = sqlx::query_as::<_, TicketRow>(&format!(
        r#"
        UPDATE tickets
        SET status = 'answered', expert_reply = $2, responder = $3, answered_at = NOW()
        WHERE id = $1 AND status = 'open'
        RETURNING {TICKET_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(reply)
    .bind(responder)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => row.try_into(),
        // Lost the race or never existed; tell the two apart
        None => match ticket(pool, id).await {
            Ok(_) => Err(StoreError::Conflict(format!("ticket {id} already answered"))),
            Err(e) => Err(e),
        },
    }
}
