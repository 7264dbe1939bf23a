//! Simulated environment: manual clock and seeded RNG.

#![allow(clippy::disallowed_types, reason = "Synchronous state shared by clones")]

use std::{
    ops::Sub,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use duet_core::env::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Wall-clock origin of every simulation: 2024-01-01T00:00:00Z.
pub const SIM_EPOCH_MILLIS: u64 = 1_704_067_200_000;

/// Point on the simulated monotonic clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimInstant(Duration);

impl SimInstant {
    /// Time since the simulation started.
    pub fn elapsed(self) -> Duration {
        self.0
    }
}

impl Sub for SimInstant {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Duration {
        self.0.saturating_sub(rhs.0)
    }
}

struct SimState {
    rng: ChaCha8Rng,
    now: Duration,
}

/// Deterministic [`Environment`].
///
/// Clones share one clock and one RNG stream. Time moves only through
/// [`SimEnv::advance`] or [`Environment::sleep`], which advances instead of
/// waiting.
#[derive(Clone)]
pub struct SimEnv {
    state: Arc<Mutex<SimState>>,
}

impl SimEnv {
    /// Environment seeded with 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Environment with an explicit seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                rng: ChaCha8Rng::seed_from_u64(seed),
                now: Duration::ZERO,
            })),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        self.state().now += by;
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        SimInstant(self.state().now)
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        tokio::task::yield_now()
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.state().rng.fill_bytes(buffer);
    }

    fn wall_clock_millis(&self) -> u64 {
        let elapsed = u64::try_from(self.state().now.as_millis()).unwrap_or(u64::MAX);
        SIM_EPOCH_MILLIS.saturating_add(elapsed)
    }
}
