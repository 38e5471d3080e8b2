//! Live channel bookkeeping

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use serde::Serialize;

use super::connection::{Connection, ConnectionPhase};

/// All open channels, shared across connection tasks
#[derive(Clone, Default)]
pub struct ChannelState {
    connections: Arc<RwLock<HashMap<Uuid, Arc<Connection>>>>,
}

impl ChannelState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_connection(&self, conn: Connection) -> Arc<Connection> {
        let conn = Arc::new(conn);
        let mut connections = self.connections.write().await;
        connections.insert(conn.id, Arc::clone(&conn));

        tracing::info!(
            connection_id = %conn.id,
            session_id = %conn.session_id,
            total_connections = connections.len(),
            "Channel opened"
        );

        conn
    }

    pub async fn remove_connection(&self, connection_id: &Uuid) {
        let mut connections = self.connections.write().await;
        if let Some(conn) = connections.remove(connection_id) {
            tracing::info!(
                connection_id = %connection_id,
                session_id = %conn.session_id,
                remaining_connections = connections.len(),
                "Channel closed"
            );
        }
    }

    /// Number of open channels bound to `session_id`
    pub async fn session_connections(&self, session_id: &Uuid) -> usize {
        let connections = self.connections.read().await;
        connections
            .values()
            .filter(|c| c.session_id == *session_id)
            .count()
    }

    pub async fn stats(&self) -> ChannelStats {
        let connections: Vec<_> = self.connections.read().await.values().cloned().collect();

        let mut sessions = HashMap::<Uuid, usize>::new();
        let mut streaming = 0;
        for conn in &connections {
            *sessions.entry(conn.session_id).or_default() += 1;
            if conn.phase().await == ConnectionPhase::Streaming {
                streaming += 1;
            }
        }

        ChannelStats {
            active_connections: connections.len(),
            active_sessions: sessions.len(),
            generating: streaming,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelStats {
    pub active_connections: usize,
    pub active_sessions: usize,
    /// Connections currently waiting on the upstream assistant
    pub generating: usize,
}
