//! Core deterministic primitives.
//!
//! Seeded randomness, state hashing and the session clock. Nothing in here
//! knows about bombs or packets.

pub mod rng;
pub mod hash;
pub mod time;

// Re-export core types
pub use rng::DeterministicRng;
pub use hash::{compute_state_hash, StateHash, StateHasher};
pub use time::{Millis, MonotonicClock};
