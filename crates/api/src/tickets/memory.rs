//! In-process ticket, feedback and correction storage

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parley_shared::{Correction, Feedback, StoreError, StoreResult, Ticket, TicketStatus};
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};

#[derive(Default)]
pub struct MemoryDesk {
    tickets: RwLock<BTreeMap<i64, Arc<Mutex<Ticket>>>>,
    feedback: RwLock<Vec<Feedback>>,
    corrections: RwLock<Vec<Correction>>,
    next_ticket_id: AtomicI64,
    next_feedback_id: AtomicI64,
    next_correction_id: AtomicI64,
}

fn next(counter: &AtomicI64) -> i64 {
    counter.fetch_add(1, Ordering::Relaxed) + 1
}

impl MemoryDesk {
    pub async fn insert_feedback(&self, message_id: i64, score: i32, submitted_by: Option<&str>) -> Feedback {
        let entry = Feedback {
            id: next(&self.next_feedback_id),
            message_id,
            score,
            submitted_by: submitted_by.map(str::to_string),
            created_at: OffsetDateTime::now_utc(),
        };
        self.feedback.write().await.push(entry.clone());
        entry
    }

    pub async fn feedback_for(&self, message_id: i64) -> Vec<Feedback> {
        self.feedback
            .read()
            .await
            .iter()
            .filter(|f| f.message_id == message_id)
            .cloned()
            .collect()
    }

    pub async fn insert_correction(&self, message_id: i64, content: &str, expert: &str) -> Correction {
        let entry = Correction {
            id: next(&self.next_correction_id),
            message_id,
            content: content.to_string(),
            expert: expert.to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        self.corrections.write().await.push(entry.clone());
        entry
    }

    pub async fn insert_ticket(&self, owner: &str, title: &str, description: &str) -> Ticket {
        let ticket = Ticket {
            id: next(&self.next_ticket_id),
            owner: owner.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            status: TicketStatus::Open,
            expert_reply: None,
            responder: None,
            created_at: OffsetDateTime::now_utc(),
            answered_at: None,
        };
        self.tickets
            .write()
            .await
            .insert(ticket.id, Arc::new(Mutex::new(ticket.clone())));
        ticket
    }

    pub async fn ticket(&self, id: i64) -> StoreResult<Ticket> {
        let entry = self.tickets.read().await.get(&id).cloned();
        match entry {
            Some(ticket) => Ok(ticket.lock().await.clone()),
            None => Err(StoreError::NotFound),
        }
    }

    /// Newest first, optionally restricted to one owner
    pub async fn tickets(&self, owner: Option<&str>) -> Vec<Ticket> {
        let entries: Vec<_> = self.tickets.read().await.values().cloned().collect();

        let mut tickets = Vec::with_capacity(entries.len());
        for entry in entries.iter().rev() {
            let ticket = entry.lock().await;
            if owner.map_or(true, |o| ticket.owner == o) {
                tickets.push(ticket.clone());
            }
        }
        tickets
    }

    /// The per-ticket lock makes check-and-set atomic
    pub async fn answer(&self, id: i64, reply: &str, responder: &str) -> StoreResult<Ticket> {
        let entry = self
            .tickets
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)?;

        let mut ticket = entry.lock().await;
        if ticket.status != TicketStatus::Open {
            return Err(StoreError::Conflict(format!("ticket {id} already answered")));
        }
        ticket.status = TicketStatus::Answered;
        ticket.expert_reply = Some(reply.to_string());
        ticket.responder = Some(responder.to_string());
        ticket.answered_at = Some(OffsetDateTime::now_utc());
        Ok(ticket.clone())
    }
}
