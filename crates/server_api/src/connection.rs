use shared::{
    domain::{ConnectionId, UserId},
    protocol::ServerEvent,
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

/// Sending side of one live connection. Cloning yields another handle to the
/// same outbound queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, outbound: mpsc::Sender<ServerEvent>) -> Self {
        Self { id, outbound }
    }

    /// Creates a handle with a fresh id and returns the queue its writer
    /// task drains.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(ConnectionId::new_v4(), tx), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues `event` without waiting. A full queue drops the event so one
    /// slow reader never stalls delivery to everyone else.
    pub fn deliver(&self, event: ServerEvent) -> bool {
        match self.outbound.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(connection_id = %self.id, "outbound queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Process-local record of a registered user.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub user_id: UserId,
    pub handle: ConnectionHandle,
    pub display_name: String,
}
