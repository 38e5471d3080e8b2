//! Session registry
//!
//! Owns chat sessions and their append-only transcripts. Every append recomputes
//! the context projection; nothing else writes to it.

mod memory;
mod postgres;

use std::collections::HashMap;
use std::sync::Arc;

use parley_shared::{Message, Session, StoreResult};
use sqlx::PgPool;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use memory::MemorySessions;

#[derive(Clone)]
enum Backend {
    Memory(Arc<MemorySessions>),
    Postgres(PgPool),
}

#[derive(Clone)]
pub struct SessionRegistry {
    backend: Backend,
    context_window: usize,
    turns: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl SessionRegistry {
    pub fn memory(context_window: usize) -> Self {
        Self::with_backend(Backend::Memory(Arc::default()), context_window)
    }

    pub fn postgres(pool: PgPool, context_window: usize) -> Self {
        Self::with_backend(Backend::Postgres(pool), context_window)
    }

    fn with_backend(backend: Backend, context_window: usize) -> Self {
        Self {
            backend,
            context_window,
            turns: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn create_session(&self) -> StoreResult<Session> {
        let session = match &self.backend {
            Backend::Memory(store) => store.create().await,
            Backend::Postgres(pool) => postgres::create(pool).await?,
        };

        tracing::info!(session_id = %session.id, "Session created");
        Ok(session)
    }

    pub async fn get_session(&self, id: Uuid) -> StoreResult<Session> {
        match &self.backend {
            Backend::Memory(store) => store.get(id).await,
            Backend::Postgres(pool) => postgres::get(pool, id, self.context_window).await,
        }
    }

    /// Remove a session. Returns whether anything was removed; deleting an
    /// absent session is not an error.
    pub async fn delete_session(&self, id: Uuid) -> StoreResult<bool> {
        let removed = match &self.backend {
            Backend::Memory(store) => store.delete(id).await,
            Backend::Postgres(pool) => postgres::delete(pool, id).await?,
        };
        self.turns.lock().await.remove(&id);

        if removed {
            tracing::info!(session_id = %id, "Session deleted");
        }
        Ok(removed)
    }

    /// Append a message, assigning its id and timestamp
    pub async fn append_message(&self, id: Uuid, message: Message) -> StoreResult<Message> {
        let stored = match &self.backend {
            Backend::Memory(store) => store.append(id, message, self.context_window).await?,
            Backend::Postgres(pool) => postgres::append(pool, id, message).await?,
        };

        tracing::debug!(
            session_id = %id,
            message_id = ?stored.id,
            role = stored.role.as_str(),
            truncated = stored.truncated,
            "Message appended"
        );
        Ok(stored)
    }

    pub async fn context(&self, id: Uuid) -> StoreResult<Vec<Message>> {
        match &self.backend {
            Backend::Memory(store) => store.context(id).await,
            Backend::Postgres(pool) => postgres::context(pool, id, self.context_window).await,
        }
    }

    /// Serializes whole request/response cycles on one session. Different
    /// sessions never contend.
    pub async fn turn_guard(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let lock = {
            let mut turns = self.turns.lock().await;
            Arc::clone(turns.entry(id).or_default())
        };
        lock.lock_owned().await
    }

    pub async fn session_count(&self) -> StoreResult<i64> {
        match &self.backend {
            Backend::Memory(store) => Ok(i64::try_from(store.len().await).unwrap_or(i64::MAX)),
            Backend::Postgres(pool) => postgres::count(pool).await,
        }
    }
}
