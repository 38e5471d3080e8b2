//! Postgres-backed session storage

use parley_shared::{project_context, Message, Session, StoreError, StoreResult};
use serde_json::Value;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    role: String,
    content: String,
    message_type: String,
    media_url: Option<String>,
    citations: Option<Value>,
    truncated: bool,
    is_error: bool,
    created_at: OffsetDateTime,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(Message {
            id: Some(row.id),
            role: row.role.parse()?,
            content: row.content,
            message_type: row.message_type.parse()?,
            media_url: row.media_url,
            citations: row.citations,
            truncated: row.truncated,
            is_error: row.is_error,
            created_at: Some(row.created_at),
        })
    }
}

const MESSAGE_COLUMNS: &str =
    "id, role, content, message_type, media_url, citations, truncated, is_error, created_at";

pub async fn create(pool: &PgPool) -> StoreResult<Session> {
    let row = sqlx::query_as::<_, SessionRow>(
        r#"
        INSERT INTO chat_sessions (id)
        VALUES ($1)
        RETURNING id, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .fetch_one(pool)
    .await?;

    Ok(Session {
        id: row.id,
        created_at: row.created_at,
        updated_at: row.updated_at,
        messages: Vec::new(),
        context: Vec::new(),
    })
}

pub async fn get(pool: &PgPool, id: Uuid, context_window: usize) -> StoreResult<Session> {
    let row = sqlx::query_as::<_, SessionRow>(
        "SELECT id, created_at, updated_at FROM chat_sessions WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound)?;

    let messages = sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE session_id = $1 ORDER BY id ASC"
    ))
    .bind(id)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(Message::try_from)
    .collect::<StoreResult<Vec<_>>>()?;

    let context = project_context(&messages, context_window);
    Ok(Session {
        id: row.id,
        created_at: row.created_at,
        updated_at: row.updated_at,
        messages,
        context,
    })
}

pub async fn delete(pool: &PgPool, id: Uuid) -> StoreResult<bool> {
    let result = sqlx::query("DELETE FROM chat_sessions WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Append inside a transaction. The session row update takes a row lock, which
/// serializes concurrent appends to the same session.
pub async fn append(pool: &PgPool, id: Uuid, message: Message) -> StoreResult<Message> {
    let mut tx = pool.begin().await?;
    let now = OffsetDateTime::now_utc();

    let touched = sqlx::query("UPDATE chat_sessions SET updated_at = $2 WHERE id = $1")
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    if touched.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }

    let row = sqlx::query_as::<_, MessageRow>(&format!(
        r#"
        INSERT INTO chat_messages
          (session_id, role, content, message_type, media_url, citations, truncated, is_error, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {MESSAGE_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(message.role.as_str())
    .bind(&message.content)
    .bind(message.message_type.as_str())
    .bind(&message.media_url)
    .bind(&message.citations)
    .bind(message.truncated)
    .bind(message.is_error)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    row.try_into()
}

pub async fn context(pool: &PgPool, id: Uuid, context_window: usize) -> StoreResult<Vec<Message>> {
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM chat_sessions WHERE id = $1)",
    )
    .bind(id)
    .fetch_one(pool)
    .await?;
    if !exists {
        return Err(StoreError::NotFound);
    }

    let limit = i64::try_from(context_window).unwrap_or(i64::MAX);
    let mut messages = sqlx::query_as::<_, MessageRow>(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE session_id = $1 ORDER BY id DESC LIMIT $2"
    ))
    .bind(id)
    .bind(limit)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(Message::try_from)
    .collect::<StoreResult<Vec<_>>>()?;

    messages.reverse();
    Ok(messages)
}

pub async fn count(pool: &PgPool) -> StoreResult<i64> {
    Ok(sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM chat_sessions")
        .fetch_one(pool)
        .await?)
}
