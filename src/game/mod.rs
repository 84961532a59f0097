//! Round Logic Module
//!
//! Everything that owns or mutates round state. Single-writer: a round is
//! only ever touched by its table's engine task.
//!
//! ## Module Structure
//!
//! - `round`: Round entity and phase machine
//! - `bet`: Bet entity and the per-round ledger
//! - `engine`: The per-table actor loop (commands in, events out)
//! - `events`: Closed union of broadcast events

pub mod round;
pub mod bet;
pub mod engine;
pub mod events;

// Re-export key types
pub use round::{Round, RoundId, RoundPhase};
pub use bet::{Bet, BetId, BetStatus, BetLedger, UserId, CashoutReceipt};
pub use engine::{RoundEngine, EngineConfig, EngineCommand, EngineHandle, RoundSnapshot};
pub use events::RoundEvent;

use thiserror::Error;

/// Errors returned to a single requesting client.
///
/// Per-command errors never affect other bets or the round's progression;
/// the only round-fatal variant is `FairnessIntegrity`, which voids and
/// replaces the affected round.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GameError {
    /// Malformed command input (non-positive stake, auto-cashout at or
    /// below 1.00x).
    #[error("invalid bet: {0}")]
    Validation(String),

    /// Command issued outside its legal round phase.
    #[error("{action} not allowed while round is {phase}")]
    State {
        /// The rejected operation.
        action: &'static str,
        /// Phase the round was in when the command arrived.
        phase: RoundPhase,
    },

    /// Stake exceeds the user's available balance. No debit was performed.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// The user already holds a bet in this round.
    #[error("already placed a bet in this round")]
    DuplicateBet,

    /// The bet referenced by this command is already terminal.
    #[error("bet is already settled")]
    AlreadySettled,

    /// Cashout with no open bet in this round.
    #[error("no open bet in this round")]
    NoOpenBet,

    /// A core fairness guarantee was violated. Fatal for the affected
    /// round only: it is voided, stakes are refunded, a fresh round opens.
    #[error("fairness integrity violation: {0}")]
    FairnessIntegrity(String),

    /// The wallet backend failed outside the insufficient-funds case.
    #[error("wallet unavailable")]
    WalletUnavailable,

    /// The table's engine task is gone (shutdown).
    #[error("round engine unavailable")]
    EngineUnavailable,
}
