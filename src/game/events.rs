//! Round Events
//!
//! The closed union the engine broadcasts. Fan-out is the transport
//! layer's problem; the engine just publishes to its channel and never
//! blocks on a slow consumer.

use serde::{Serialize, Deserialize};

use crate::core::fairness::Stream;
use crate::core::units::{Amount, Multiplier};
use crate::game::bet::UserId;
use crate::game::round::{RoundId, RoundPhase};
use crate::proof::commitment::RoundCommitment;

/// Events emitted by a round engine, in the order they happened.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RoundEvent {
    /// The round changed phase. `commitment` is present when the phase is
    /// `Waiting` (a new round opened and published its pre-commitment).
    PhaseChanged {
        /// Round affected.
        round_id: RoundId,
        /// New phase.
        phase: RoundPhase,
        /// Milliseconds until the next automatic transition, if timed.
        countdown_ms: Option<u64>,
        /// Pre-commitment data, on round open.
        commitment: Option<RoundCommitment>,
    },

    /// Live multiplier sample while RUNNING.
    Tick {
        /// Round affected.
        round_id: RoundId,
        /// Current multiplier.
        multiplier: Multiplier,
        /// Milliseconds since the round started running.
        elapsed_ms: u64,
    },

    /// A bet was accepted into the round.
    BetPlaced {
        /// Round affected.
        round_id: RoundId,
        /// Bettor.
        user_id: UserId,
        /// Line the bet rides.
        stream: Stream,
        /// Stake.
        amount: Amount,
    },

    /// A bet settled as a win (manual, auto, or crash-boundary auto).
    CashedOut {
        /// Round affected.
        round_id: RoundId,
        /// Winner.
        user_id: UserId,
        /// Line the bet rode.
        stream: Stream,
        /// Locked-in multiplier.
        multiplier: Multiplier,
        /// Amount credited.
        payout: Amount,
    },

    /// One crash line ended. The seed is attached only when this crash
    /// completes the round; revealing earlier would disclose the other
    /// line's crash point.
    StreamCrashed {
        /// Round affected.
        round_id: RoundId,
        /// Line that crashed.
        stream: Stream,
        /// Its revealed crash point.
        crash_point: Multiplier,
        /// Server seed, iff the round is now over.
        server_seed: Option<String>,
        /// Commitment hash republished for convenience.
        server_seed_hash: String,
    },

    /// The round is terminal and fully revealed.
    RoundSettled {
        /// Round affected.
        round_id: RoundId,
        /// Primary crash point.
        crash_point: Multiplier,
        /// Dragon crash point.
        dragon_crash_point: Multiplier,
        /// Revealed server seed.
        server_seed: String,
        /// The commitment this reveal must verify against.
        commitment: RoundCommitment,
    },

    /// The round was aborted; every open stake was refunded exactly once.
    RoundVoided {
        /// Round affected.
        round_id: RoundId,
        /// Operator-facing reason.
        reason: String,
        /// Number of refunded bets.
        refunded: usize,
    },
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_roundtrip() {
        let event = RoundEvent::CashedOut {
            round_id: [7; 16],
            user_id: UserId::new([1; 16]),
            stream: Stream::Dragon,
            multiplier: Multiplier::from_hundredths(216),
            payout: Amount::from_cents(2160),
        };

        let json = serde_json::to_string(&event).unwrap();
        let parsed: RoundEvent = serde_json::from_str(&json).unwrap();

        match parsed {
            RoundEvent::CashedOut { multiplier, payout, stream, .. } => {
                assert_eq!(multiplier.hundredths(), 216);
                assert_eq!(payout.cents(), 2160);
                assert_eq!(stream, Stream::Dragon);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }
}
