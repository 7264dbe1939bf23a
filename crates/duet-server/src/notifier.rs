//! Push delivery addressed by connection id.
//!
//! Both the conversation broadcasts and the presence surface deliver through a
//! [`Notifier`]. Delivery is fire-and-forget: a push never waits on the peer,
//! and a failed push is reported to the caller only so it can be logged.

use std::sync::Arc;

use dashmap::DashMap;
use duet_core::ConnectionId;
use duet_proto::{Frame, Payload};
use thiserror::Error;
use tokio::sync::mpsc;

/// Why a push did not reach its connection's outbox.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// No outbox registered for this connection
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// The connection's writer has gone away
    #[error("connection {0} closed")]
    Closed(ConnectionId),

    /// Payload could not be framed
    #[error("failed to encode payload: {0}")]
    Encode(String),
}

/// Push a payload to one live connection.
pub trait Notifier: Clone + Send + Sync + 'static {
    /// Queue an encoded frame for `connection_id`. Never blocks.
    fn push_frame(&self, connection_id: ConnectionId, frame: Frame) -> Result<(), DeliveryError>;

    /// Encode `payload` and queue it for `connection_id`.
    fn push(&self, connection_id: ConnectionId, payload: &Payload) -> Result<(), DeliveryError> {
        let frame = payload.to_frame().map_err(|e| DeliveryError::Encode(e.to_string()))?;
        self.push_frame(connection_id, frame)
    }

    /// Push to every connection in `targets`, ignoring individual failures.
    ///
    /// The payload is encoded once. Returns how many pushes were queued.
    fn push_all<I>(&self, targets: I, payload: &Payload) -> usize
    where
        I: IntoIterator<Item = ConnectionId>,
    {
        let frame = match payload.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(opcode = ?payload.opcode(), "broadcast not encodable: {e}");
                return 0;
            },
        };

        let mut delivered = 0;
        for target in targets {
            match self.push_frame(target, frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::debug!(connection = %target, "push dropped: {e}"),
            }
        }
        delivered
    }
}

/// Production notifier: one unbounded outbox channel per connection.
///
/// The runtime registers a connection when it is accepted and drains the
/// returned receiver onto that connection's outbound stream.
#[derive(Clone, Default)]
pub struct ConnectionNotifier {
    outboxes: Arc<DashMap<ConnectionId, mpsc::UnboundedSender<Frame>>>,
}

impl ConnectionNotifier {
    /// Create a notifier with no connections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and return its outbox receiver.
    ///
    /// Registering an id twice replaces the old outbox, which then closes.
    pub fn register(&self, connection_id: ConnectionId) -> mpsc::UnboundedReceiver<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.outboxes.insert(connection_id, tx);
        rx
    }

    /// Drop a connection's outbox.
    pub fn unregister(&self, connection_id: ConnectionId) {
        self.outboxes.remove(&connection_id);
    }

    /// Whether an outbox exists for this connection.
    pub fn is_registered(&self, connection_id: ConnectionId) -> bool {
        self.outboxes.contains_key(&connection_id)
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.outboxes.len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.outboxes.is_empty()
    }
}

impl Notifier for ConnectionNotifier {
    fn push_frame(&self, connection_id: ConnectionId, frame: Frame) -> Result<(), DeliveryError> {
        let outbox = self
            .outboxes
            .get(&connection_id)
            .ok_or(DeliveryError::UnknownConnection(connection_id))?;

        outbox.send(frame).map_err(|_| DeliveryError::Closed(connection_id))
    }
}
