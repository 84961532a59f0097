//! Round Commitment Protocol
//!
//! The engine commits to its secret before any bet is taken and reveals it
//! after the round ends. Any third party holding the commitment and the
//! reveal can re-derive both crash points with `core::fairness` and reject
//! a tampered round. This file is the whole externally-auditable contract.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::fairness::{self, Stream};
use crate::core::units::Multiplier;

/// Public data published when a round opens. Cannot be changed afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundCommitment {
    /// `sha256(serverSeed)`, hex.
    pub server_seed_hash: String,
    /// Public derivation input.
    pub client_seed: String,
    /// Public derivation input, increments per round.
    pub nonce: u64,
    /// House edge the round derives with.
    pub house_edge: f64,
}

/// Published after the round ends: the secret plus the claimed outcomes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundReveal {
    /// The previously secret server seed.
    pub server_seed: String,
    /// The commitment this reveal answers.
    pub commitment: RoundCommitment,
    /// Claimed primary crash point.
    pub crash_point: Multiplier,
    /// Claimed dragon crash point.
    pub dragon_crash_point: Multiplier,
}

impl RoundReveal {
    /// Verify the reveal end to end:
    ///
    /// 1. `sha256(server_seed)` must equal the committed hash.
    /// 2. Both crash points must re-derive to the claimed values.
    pub fn verify(&self) -> Result<(), VerifyError> {
        let computed = fairness::seed_hash(&self.server_seed);
        if computed != self.commitment.server_seed_hash {
            return Err(VerifyError::SeedHashMismatch {
                committed: self.commitment.server_seed_hash.clone(),
                computed,
            });
        }

        for (stream, claimed) in [
            (Stream::Primary, self.crash_point),
            (Stream::Dragon, self.dragon_crash_point),
        ] {
            let derived = fairness::derive_crash_point(
                &self.server_seed,
                &self.commitment.client_seed,
                self.commitment.nonce,
                self.commitment.house_edge,
                stream,
            );
            if derived != claimed {
                return Err(VerifyError::CrashPointMismatch {
                    stream,
                    claimed,
                    derived,
                });
            }
        }

        Ok(())
    }
}

/// Ways a reveal can fail verification.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VerifyError {
    /// The revealed seed does not hash to the commitment.
    #[error("seed hash mismatch: committed {committed}, computed {computed}")]
    SeedHashMismatch {
        /// The hash published at round start.
        committed: String,
        /// The hash of the revealed seed.
        computed: String,
    },

    /// A claimed crash point does not re-derive from the revealed inputs.
    #[error("{stream:?} crash point mismatch: claimed {claimed}, derived {derived}")]
    CrashPointMismatch {
        /// Stream that failed.
        stream: Stream,
        /// Value the operator published.
        claimed: Multiplier,
        /// Value the seeds actually produce.
        derived: Multiplier,
    },
}

// =============================================================================
// TESTS
// =============================================================================
