//! Notifier that records pushes for assertions.

#![allow(clippy::disallowed_types, reason = "Synchronous state shared by clones")]

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use duet_core::ConnectionId;
use duet_proto::{Frame, Opcode, Payload};
use duet_server::{DeliveryError, Notifier};

/// One recorded push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Target connection
    pub connection_id: ConnectionId,
    /// Decoded payload
    pub payload: Payload,
}

#[derive(Default)]
struct Recorded {
    deliveries: Vec<Delivery>,
    closed: HashSet<ConnectionId>,
}

/// In-memory [`Notifier`].
///
/// Every connection is reachable unless [`RecordingNotifier::close`] was
/// called for it, in which case pushes fail with `DeliveryError::Closed` the
/// way a dropped outbox would.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    recorded: Arc<Mutex<Recorded>>,
}

impl RecordingNotifier {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make pushes to `connection_id` fail from now on.
    pub fn close(&self, connection_id: ConnectionId) {
        self.recorded().closed.insert(connection_id);
    }

    /// Every push so far, in order.
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.recorded().deliveries.clone()
    }

    /// Payloads pushed to one connection, in order.
    pub fn payloads_for(&self, connection_id: ConnectionId) -> Vec<Payload> {
        self.recorded()
            .deliveries
            .iter()
            .filter(|d| d.connection_id == connection_id)
            .map(|d| d.payload.clone())
            .collect()
    }

    /// Remove and return the payloads pushed to one connection.
    pub fn take(&self, connection_id: ConnectionId) -> Vec<Payload> {
        let mut recorded = self.recorded();
        let (taken, kept) = std::mem::take(&mut recorded.deliveries)
            .into_iter()
            .partition::<Vec<_>, _>(|d| d.connection_id == connection_id);
        recorded.deliveries = kept;
        taken.into_iter().map(|d| d.payload).collect()
    }

    /// Pushes of one kind, to any connection.
    pub fn count(&self, opcode: Opcode) -> usize {
        self.recorded().deliveries.iter().filter(|d| d.payload.opcode() == opcode).count()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.recorded().deliveries.clear();
    }

    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Notifier for RecordingNotifier {
    fn push_frame(&self, connection_id: ConnectionId, frame: Frame) -> Result<(), DeliveryError> {
        let payload =
            Payload::from_frame(&frame).map_err(|e| DeliveryError::Encode(e.to_string()))?;

        let mut recorded = self.recorded();
        if recorded.closed.contains(&connection_id) {
            return Err(DeliveryError::Closed(connection_id));
        }
        recorded.deliveries.push(Delivery { connection_id, payload });
        Ok(())
    }
}
