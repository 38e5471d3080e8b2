//! Message feedback and expert corrections

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use parley_shared::{Correction, Feedback};
use serde::Deserialize;

use crate::{
    auth::{AuthUser, MaybeUser},
    error::ApiResult,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub message_id: i64,
    pub score: i32,
}

#[derive(Debug, Deserialize)]
pub struct CorrectionRequest {
    pub message_id: i64,
    pub correction_content: String,
}

/// Record a vote. A bearer token is optional; when present it must be valid.
pub async fn submit_feedback(
    State(state): State<AppState>,
    user: MaybeUser,
    Json(req): Json<FeedbackRequest>,
) -> ApiResult<(StatusCode, Json<Feedback>)> {
    let submitter = user.as_ref().map(|Extension(u)| u);
    let feedback = state
        .tickets
        .submit_feedback(submitter, req.message_id, req.score)
        .await?;
    Ok((StatusCode::CREATED, Json(feedback)))
}

pub async fn list_feedback(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(message_id): Path<i64>,
) -> ApiResult<Json<Vec<Feedback>>> {
    Ok(Json(state.tickets.list_feedback(&user, message_id).await?))
}

pub async fn record_correction(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CorrectionRequest>,
) -> ApiResult<(StatusCode, Json<Correction>)> {
    let correction = state
        .tickets
        .record_correction(&user, req.message_id, &req.correction_content)
        .await?;
    Ok((StatusCode::CREATED, Json(correction)))
}
