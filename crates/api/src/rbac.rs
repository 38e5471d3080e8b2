//! Role-based access policy
//!
//! The single server-side authority for privileged operations. Handlers and the
//! stores behind them both consult it; client-side role checks are advisory only.

use parley_shared::Role;

use crate::error::{ApiError, ApiResult};

/// Privileged operations guarded by the policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    SubmitFeedback,
    CreateTicket,
    ReadOwnTickets,
    ListAllTickets,
    ReplyTicket,
    ReadFeedback,
    RecordCorrection,
    ManageRules,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

pub fn authorize(operation: Operation, role: Role) -> Decision {
    use Operation::*;

    let allowed = match operation {
        SubmitFeedback | CreateTicket | ReadOwnTickets => true,
        ListAllTickets | ReplyTicket | ReadFeedback | RecordCorrection | ManageRules => {
            role == Role::Expert
        }
    };

    if allowed {
        Decision::Allow
    } else {
        Decision::Deny
    }
}

/// Fail with `Forbidden` unless `role` may perform `operation`
pub fn require(operation: Operation, role: Role) -> ApiResult<()> {
    match authorize(operation, role) {
        Decision::Allow => Ok(()),
        Decision::Deny => {
            tracing::warn!(?operation, role = %role, "Privileged operation denied");
            Err(ApiError::Forbidden)
        }
    }
}
