//! Feedback, corrections and expert escalation tickets
//!
//! The desk re-checks the caller's role with [`rbac::require`] at the point of
//! action, so handlers cannot accidentally expose an expert-only operation.

mod memory;
mod postgres;

use std::sync::Arc;

use parley_shared::{Correction, Feedback, Role, StoreError, Ticket};
use sqlx::PgPool;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::rbac::{self, Operation};

use memory::MemoryDesk;

pub const MAX_TITLE_LENGTH: usize = 200;
pub const MAX_DESCRIPTION_LENGTH: usize = 10_000;
pub const MAX_REPLY_LENGTH: usize = 10_000;

#[derive(Clone)]
enum Backend {
    Memory(Arc<MemoryDesk>),
    Postgres(PgPool),
}

#[derive(Clone)]
pub struct TicketDesk {
    backend: Backend,
}

impl TicketDesk {
    pub fn memory() -> Self {
        Self {
            backend: Backend::Memory(Arc::default()),
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            backend: Backend::Postgres(pool),
        }
    }

    /// Append a vote. Anonymous submissions carry no `submitted_by`.
    pub async fn submit_feedback(
        &self,
        submitter: Option<&AuthUser>,
        message_id: i64,
        score: i32,
    ) -> ApiResult<Feedback> {
        if let Some(user) = submitter {
            rbac::require(Operation::SubmitFeedback, user.role)?;
        }
        if score != 1 && score != -1 {
            return Err(ApiError::Validation("score must be 1 or -1".to_string()));
        }

        let submitted_by = submitter.map(|u| u.username.as_str());
        let feedback = match &self.backend {
            Backend::Memory(desk) => desk.insert_feedback(message_id, score, submitted_by).await,
            Backend::Postgres(pool) => {
                postgres::insert_feedback(pool, message_id, score, submitted_by).await?
            }
        };

        tracing::info!(
            message_id,
            score,
            submitted_by = ?feedback.submitted_by,
            "Feedback recorded"
        );
        Ok(feedback)
    }

    pub async fn list_feedback(&self, user: &AuthUser, message_id: i64) -> ApiResult<Vec<Feedback>> {
        rbac::require(Operation::ReadFeedback, user.role)?;

        Ok(match &self.backend {
            Backend::Memory(desk) => desk.feedback_for(message_id).await,
            Backend::Postgres(pool) => postgres::feedback_for(pool, message_id).await?,
        })
    }

    pub async fn record_correction(
        &self,
        user: &AuthUser,
        message_id: i64,
        content: &str,
    ) -> ApiResult<Correction> {
        rbac::require(Operation::RecordCorrection, user.role)?;
        require_text("correction_content", content, MAX_REPLY_LENGTH)?;

        let correction = match &self.backend {
            Backend::Memory(desk) => desk.insert_correction(message_id, content, &user.username).await,
            Backend::Postgres(pool) => {
                postgres::insert_correction(pool, message_id, content, &user.username).await?
            }
        };

        tracing::info!(message_id, expert = %user.username, "Correction recorded");
        Ok(correction)
    }

    pub async fn create_ticket(&self, owner: &AuthUser, title: &str, description: &str) -> ApiResult<Ticket> {
        rbac::require(Operation::CreateTicket, owner.role)?;
        require_text("title", title, MAX_TITLE_LENGTH)?;
        require_text("description", description, MAX_DESCRIPTION_LENGTH)?;

        let ticket = match &self.backend {
            Backend::Memory(desk) => desk.insert_ticket(&owner.username, title, description).await,
            Backend::Postgres(pool) => {
                postgres::insert_ticket(pool, &owner.username, title, description).await?
            }
        };

        tracing::info!(ticket_id = ticket.id, owner = %ticket.owner, "Ticket created");
        Ok(ticket)
    }

    pub async fn list_own_tickets(&self, owner: &AuthUser) -> ApiResult<Vec<Ticket>> {
        rbac::require(Operation::ReadOwnTickets, owner.role)?;
        self.tickets(Some(&owner.username)).await
    }

    /// Owners see their own tickets and experts see any. Everyone else gets
    /// `NotFound` so ticket ids do not leak.
    pub async fn get_ticket(&self, user: &AuthUser, id: i64) -> ApiResult<Ticket> {
        let ticket = match &self.backend {
            Backend::Memory(desk) => desk.ticket(id).await?,
            Backend::Postgres(pool) => postgres::ticket(pool, id).await?,
        };

        if ticket.owner == user.username || user.role == Role::Expert {
            Ok(ticket)
        } else {
            Err(ApiError::NotFound)
        }
    }

    pub async fn list_tickets(&self, user: &AuthUser) -> ApiResult<Vec<Ticket>> {
        rbac::require(Operation::ListAllTickets, user.role)?;
        self.tickets(None).await
    }

    /// Answer an open ticket. A second reply is a `Conflict` and leaves the
    /// first answer in place.
    pub async fn reply_ticket(&self, user: &AuthUser, id: i64, reply: &str) -> ApiResult<Ticket> {
        rbac::require(Operation::ReplyTicket, user.role)?;
        require_text("expert_reply", reply, MAX_REPLY_LENGTH)?;

        let result = match &self.backend {
            Backend::Memory(desk) => desk.answer(id, reply, &user.username).await,
            Backend::Postgres(pool) => postgres::answer(pool, id, reply, &user.username).await,
        };

        match result {
            Ok(ticket) => {
                tracing::info!(ticket_id = id, responder = %user.username, "Ticket answered");
                Ok(ticket)
            }
            Err(StoreError::Conflict(msg)) => {
                tracing::warn!(ticket_id = id, responder = %user.username, "Ticket already answered");
                Err(ApiError::Conflict(msg))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn tickets(&self, owner: Option<&str>) -> ApiResult<Vec<Ticket>> {
        Ok(match &self.backend {
            Backend::Memory(desk) => desk.tickets(owner).await,
            Backend::Postgres(pool) => postgres::tickets(pool, owner).await?,
        })
    }
}

fn require_text(field: &str, value: &str, max: usize) -> ApiResult<()> {
    if value.trim().is_empty() {
        return Err(ApiError::Validation(format!("{field} cannot be empty")));
    }
    if value.chars().count() > max {
        return Err(ApiError::Validation(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(())
}
