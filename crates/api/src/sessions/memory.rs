//! In-process session storage

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parley_shared::{Message, Session, StoreError, StoreResult};
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Default)]
pub struct MemorySessions {
    sessions: RwLock<HashMap<Uuid, Arc<Mutex<Session>>>>,
    next_message_id: AtomicI64,
}

impl MemorySessions {
    pub async fn create(&self) -> Session {
        let now = OffsetDateTime::now_utc();
        let mut sessions = self.sessions.write().await;

        // v4 collisions are astronomically unlikely; retry rather than overwrite
        let mut id = Uuid::new_v4();
        while sessions.contains_key(&id) {
            id = Uuid::new_v4();
        }

        let session = Session::new(id, now);
        sessions.insert(id, Arc::new(Mutex::new(session.clone())));
        session
    }

    async fn entry(&self, id: Uuid) -> StoreResult<Arc<Mutex<Session>>> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn is_current(&self, id: Uuid, entry: &Arc<Mutex<Session>>) -> bool {
        self.sessions
            .read()
            .await
            .get(&id)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
    }

    pub async fn get(&self, id: Uuid) -> StoreResult<Session> {
        let entry = self.entry(id).await?;
        let session = entry.lock().await;
        Ok(session.clone())
    }

    pub async fn delete(&self, id: Uuid) -> bool {
        self.sessions.write().await.remove(&id).is_some()
    }

    pub async fn append(&self, id: Uuid, mut message: Message, context_window: usize) -> StoreResult<Message> {
        let entry = self.entry(id).await?;
        let mut session = entry.lock().await;
        // A delete may have landed while we waited for the lock
        if !self.is_current(id, &entry).await {
            return Err(StoreError::NotFound);
        }

        message.id = Some(self.next_message_id.fetch_add(1, Ordering::Relaxed) + 1);
        message.created_at = Some(OffsetDateTime::now_utc());
        session.push(message.clone(), context_window);
        Ok(message)
    }

    pub async fn context(&self, id: Uuid) -> StoreResult<Vec<Message>> {
        let entry = self.entry(id).await?;
        let session = entry.lock().await;
        Ok(session.context.clone())
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
