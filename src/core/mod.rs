//! Core deterministic primitives.
//!
//! Pure functions and exact-arithmetic types with no I/O and no clock.
//! Everything a third party needs to re-derive a round's outcome lives
//! here.

pub mod units;
pub mod fairness;
pub mod curve;

// Re-export core types
pub use units::{Amount, Multiplier, Currency};
pub use fairness::{Stream, derive_crash_point, generate_server_seed, seed_hash};
pub use curve::{multiplier_at, time_to_reach, GROWTH_RATE_PER_MS};
