//! Provably-Fair Verification
//!
//! Commit/reveal plumbing around `core::fairness`. The engine publishes a
//! `RoundCommitment` before betting opens and a `RoundReveal` after the
//! round ends; `RoundReveal::verify` is what an external auditor runs.

pub mod commitment;

// Re-export key types
pub use commitment::{RoundCommitment, RoundReveal, VerifyError};
