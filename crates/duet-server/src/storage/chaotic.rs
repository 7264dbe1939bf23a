//! Fault-injecting store wrapper for chaos tests.
//!
//! Delegates to an inner store but fails calls at a configured rate, before
//! they reach the inner store. A failed call therefore commits nothing, which
//! is exactly the all-or-nothing contract the hub relies on.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use duet_core::{Connection, ConnectionId, ConversationGroup, Message, UserName, UserRecord};

use super::{ConversationStore, DeleteOutcome, StorageError};

/// Store wrapper that randomly fails calls.
///
/// The RNG is a seeded LCG, so a failure schedule is reproducible.
#[derive(Clone)]
pub struct ChaoticStore<S: ConversationStore> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    rng: Arc<Mutex<ChaoticRng>>,
    operation_count: Arc<AtomicUsize>,
    injected_failures: Arc<AtomicUsize>,
}

struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // Numerical Recipes LCG
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

impl<S: ConversationStore> ChaoticStore<S> {
    /// Wrap `inner` with the default seed.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Wrap `inner` with an explicit seed for reproducible chaos.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(AtomicUsize::new(0)),
            injected_failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Underlying store, for checking invariants after chaos.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total calls attempted.
    pub fn operation_count(&self) -> usize {
        self.operation_count.load(Ordering::Relaxed)
    }

    /// Calls that were failed on purpose.
    pub fn injected_failures(&self) -> usize {
        self.injected_failures.load(Ordering::Relaxed)
    }

    fn roll(&self, operation: &'static str) -> Result<(), StorageError> {
        self.operation_count.fetch_add(1, Ordering::Relaxed);

        let fail = self.rng.lock().map_err(|_| StorageError::Poisoned)?.next() < self.failure_rate;
        if fail {
            self.injected_failures.fetch_add(1, Ordering::Relaxed);
            return Err(StorageError::Io(format!("chaotic failure injection: {operation}")));
        }
        Ok(())
    }
}

impl<S: ConversationStore> ConversationStore for ChaoticStore<S> {
    fn user(&self, username: &UserName) -> Result<Option<UserRecord>, StorageError> {
        self.roll("user")?;
        self.inner.user(username)
    }

    fn upsert_user(&self, user: &UserRecord) -> Result<(), StorageError> {
        self.roll("upsert_user")?;
        self.inner.upsert_user(user)
    }

    fn group(&self, name: &str) -> Result<Option<ConversationGroup>, StorageError> {
        self.roll("group")?;
        self.inner.group(name)
    }

    fn get_or_create_group(&self, name: &str) -> Result<ConversationGroup, StorageError> {
        self.roll("get_or_create_group")?;
        self.inner.get_or_create_group(name)
    }

    fn join_group(
        &self,
        name: &str,
        connection: &Connection,
    ) -> Result<ConversationGroup, StorageError> {
        self.roll("join_group")?;
        self.inner.join_group(name, connection)
    }

    fn group_for_connection(
        &self,
        connection_id: ConnectionId,
    ) -> Result<Option<ConversationGroup>, StorageError> {
        self.roll("group_for_connection")?;
        self.inner.group_for_connection(connection_id)
    }

    fn leave_group(
        &self,
        name: &str,
        connection_id: ConnectionId,
    ) -> Result<ConversationGroup, StorageError> {
        self.roll("leave_group")?;
        self.inner.leave_group(name, connection_id)
    }

    fn clear_connections(&self) -> Result<usize, StorageError> {
        self.roll("clear_connections")?;
        self.inner.clear_connections()
    }

    fn message_thread(
        &self,
        viewer: &UserName,
        other: &UserName,
    ) -> Result<Vec<Message>, StorageError> {
        self.roll("message_thread")?;
        self.inner.message_thread(viewer, other)
    }

    fn add_message(&self, message: &Message) -> Result<Message, StorageError> {
        self.roll("add_message")?;
        self.inner.add_message(message)
    }

    fn message(&self, id: u64) -> Result<Option<Message>, StorageError> {
        self.roll("message")?;
        self.inner.message(id)
    }

    fn delete_message(&self, id: u64, by: &UserName) -> Result<DeleteOutcome, StorageError> {
        self.roll("delete_message")?;
        self.inner.delete_message(id, by)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn zero_rate_never_fails() {
        let store = ChaoticStore::new(MemoryStore::new(), 0.0);
        for i in 0..100 {
            store.get_or_create_group(&format!("g{i}")).unwrap();
        }
        assert_eq!(store.operation_count(), 100);
        assert_eq!(store.injected_failures(), 0);
    }

    #[test]
    fn full_rate_always_fails_without_touching_inner() {
        let store = ChaoticStore::new(MemoryStore::new(), 1.0);
        assert!(store.get_or_create_group("g").is_err());
        assert_eq!(store.inner().group_count().unwrap(), 0);
    }

    #[test]
    fn same_seed_same_schedule() {
        let a = ChaoticStore::with_seed(MemoryStore::new(), 0.5, 42);
        let b = ChaoticStore::with_seed(MemoryStore::new(), 0.5, 42);

        let run = |s: &ChaoticStore<MemoryStore>| {
            (0..32).map(|i| s.get_or_create_group(&format!("g{i}")).is_ok()).collect::<Vec<_>>()
        };
        assert_eq!(run(&a), run(&b));
    }
}
