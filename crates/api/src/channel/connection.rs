//! Duplex channel connection
//!
//! Represents one open channel bound to a chat session.

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::events::ServerFrame;

/// Lifecycle of a connection: `Connecting -> Open -> (Streaming)* -> Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Connecting,
    Open,
    Streaming,
    Closed,
}

/// What the writer task puts on the wire
#[derive(Debug)]
pub enum Outgoing {
    Frame(ServerFrame),
    Close { code: u16, reason: &'static str },
}

/// Close code sent when the session disappears under an open channel
pub const CLOSE_SESSION_GONE: u16 = 4404;
/// Close code sent when the session store fails
pub const CLOSE_INTERNAL: u16 = 1011;

#[derive(Debug)]
pub struct Connection {
    /// Unique id of this connection
    pub id: Uuid,

    /// Chat session the connection is bound to
    pub session_id: Uuid,

    /// Replies are delivered as chunk frames instead of one message frame
    pub streaming: bool,

    sender: mpsc::UnboundedSender<Outgoing>,
    phase: RwLock<ConnectionPhase>,
}

impl Connection {
    pub fn new(session_id: Uuid, streaming: bool, sender: mpsc::UnboundedSender<Outgoing>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            streaming,
            sender,
            phase: RwLock::new(ConnectionPhase::Connecting),
        }
    }

    /// Queue a frame for the writer. Returns false once the writer is gone.
    pub fn send(&self, frame: ServerFrame) -> bool {
        self.sender.send(Outgoing::Frame(frame)).is_ok()
    }

    pub fn close(&self, code: u16, reason: &'static str) {
        let _ = self.sender.send(Outgoing::Close { code, reason });
    }

    pub async fn phase(&self) -> ConnectionPhase {
        *self.phase.read().await
    }

    pub async fn set_phase(&self, phase: ConnectionPhase) {
        let mut current = self.phase.write().await;
        if *current != phase {
            tracing::trace!(
                connection_id = %self.id,
                session_id = %self.session_id,
                from = ?*current,
                to = ?phase,
                "Connection phase changed"
            );
            *current = phase;
        }
    }
}
