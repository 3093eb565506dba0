//! Outbound delivery seam between the registry and a client socket.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use super::message::NotificationMessage;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// The client is not draining its queue fast enough.
    #[error("outbound queue full")]
    Backpressure,
    #[error("connection closed")]
    Closed,
}

/// Sink for messages addressed to one connection.
///
/// `send` must not block; it is called while the registry lock is held so
/// that per-channel order is preserved.
pub trait Transport: Send + Sync {
    fn send(&self, message: Arc<NotificationMessage>) -> Result<(), DeliveryError>;
}

/// [`Transport`] backed by a bounded queue drained by the socket writer task.
#[derive(Debug, Clone)]
pub struct QueueTransport {
    sender: mpsc::Sender<Arc<NotificationMessage>>,
}

impl QueueTransport {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Arc<NotificationMessage>>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl Transport for QueueTransport {
    fn send(&self, message: Arc<NotificationMessage>) -> Result<(), DeliveryError> {
        self.sender.try_send(message).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}
