//! Chat session routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use parley_shared::{Session, StoreError};
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

fn parse_session_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::SessionNotFound)
}

fn session_error(err: StoreError) -> ApiError {
    match err {
        StoreError::NotFound => ApiError::SessionNotFound,
        other => other.into(),
    }
}

pub async fn create_session(State(state): State<AppState>) -> ApiResult<(StatusCode, Json<Session>)> {
    let session = state.sessions.create_session().await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<Session>> {
    let session_id = parse_session_id(&session_id)?;
    let session = state
        .sessions
        .get_session(session_id)
        .await
        .map_err(session_error)?;
    Ok(Json(session))
}

/// Idempotent: deleting an unknown session still succeeds
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<StatusCode> {
    // An id that cannot exist is trivially already deleted
    let Ok(session_id) = Uuid::parse_str(&session_id) else {
        return Ok(StatusCode::NO_CONTENT);
    };

    let removed = state.sessions.delete_session(session_id).await?;
    if !removed {
        tracing::debug!(session_id = %session_id, "Delete of absent session");
    }
    Ok(StatusCode::NO_CONTENT)
}
