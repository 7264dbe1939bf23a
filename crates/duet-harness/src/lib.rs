//! Deterministic test harness for the Duet hub.
//!
//! Replaces the two outer edges of the server with in-process doubles:
//!
//! - [`SimEnv`]: seeded ChaCha randomness and a clock that only moves when a
//!   test advances it
//! - [`RecordingNotifier`]: records every push instead of writing to a stream
//!
//! [`HubFixture`] wires both into a real [`duet_server::FrameRouter`] so tests
//! drive the hubs with the same frames a client would send.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixture;
pub mod recording;
pub mod sim_env;

pub use fixture::HubFixture;
pub use recording::{Delivery, RecordingNotifier};
pub use sim_env::{SimEnv, SimInstant};
