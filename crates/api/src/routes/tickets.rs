//! Escalation ticket routes

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use parley_shared::{Ticket, TicketStatus};
use serde::Deserialize;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct CreateTicketRequest {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct ReplyTicketRequest {
    pub expert_reply: String,
    /// Accepted for client compatibility; the only legal target is `answered`
    pub status: Option<TicketStatus>,
}

pub async fn create_ticket(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateTicketRequest>,
) -> ApiResult<(StatusCode, Json<Ticket>)> {
    let ticket = state
        .tickets
        .create_ticket(&user, req.title.trim(), req.description.trim())
        .await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

pub async fn list_my_tickets(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<Ticket>>> {
    Ok(Json(state.tickets.list_own_tickets(&user).await?))
}

pub async fn get_ticket(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(ticket_id): Path<i64>,
) -> ApiResult<Json<Ticket>> {
    Ok(Json(state.tickets.get_ticket(&user, ticket_id).await?))
}

// =============================================================================
// Expert routes
// =============================================================================

pub async fn list_all_tickets(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<Ticket>>> {
    Ok(Json(state.tickets.list_tickets(&user).await?))
}

pub async fn reply_ticket(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(ticket_id): Path<i64>,
    Json(req): Json<ReplyTicketRequest>,
) -> ApiResult<Json<Ticket>> {
    if matches!(req.status, Some(status) if status != TicketStatus::Answered) {
        return Err(ApiError::Validation(
            "status can only be set to answered".to_string(),
        ));
    }

    let ticket = state
        .tickets
        .reply_ticket(&user, ticket_id, req.expert_reply.trim())
        .await?;
    Ok(Json(ticket))
}
