//! Round Entity and Phase Machine
//!
//! A `Round` fixes both crash points at creation from the committed seeds.
//! The seeds stay inside this type: the crash points are crate-visible for
//! the engine, and the server seed is only readable once the round has
//! crashed.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use std::fmt;

use crate::core::fairness::{self, Stream};
use crate::core::units::Multiplier;
use crate::game::GameError;
use crate::proof::commitment::RoundCommitment;

/// Unique round identifier (UUID bytes).
pub type RoundId = [u8; 16];

/// Lifecycle phase of a round.
///
/// Legal transitions: `Waiting -> Starting -> Running -> Crashed`.
/// Nothing else; a voided round is simply replaced by a fresh `Waiting`
/// round after refunds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    /// Betting window open.
    #[default]
    Waiting,
    /// Brief pre-launch window; bets still accepted.
    Starting,
    /// Multiplier climbing; cashouts accepted.
    Running,
    /// Terminal. Seed revealed, all bets settled, round immutable.
    Crashed,
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundPhase::Waiting => write!(f, "waiting"),
            RoundPhase::Starting => write!(f, "starting"),
            RoundPhase::Running => write!(f, "running"),
            RoundPhase::Crashed => write!(f, "crashed"),
        }
    }
}

/// One crash round with its pre-committed, hidden outcome.
#[derive(Clone, Debug)]
pub struct Round {
    /// Round identifier.
    pub id: RoundId,
    /// Secret until reveal.
    server_seed: String,
    /// Published at round start for pre-commitment.
    pub server_seed_hash: String,
    /// Public derivation input.
    pub client_seed: String,
    /// Public derivation input, increments per round.
    pub nonce: u64,
    /// House edge both streams were derived with.
    pub house_edge: f64,
    /// Hidden primary outcome, fixed at creation.
    crash_point: Multiplier,
    /// Hidden dragon outcome, fixed at creation.
    dragon_crash_point: Multiplier,
    /// Which streams have already crashed this round.
    crashed_streams: [bool; 2],
    /// Current phase.
    pub phase: RoundPhase,
    /// When the multiplier started climbing.
    pub started_at: Option<DateTime<Utc>>,
    /// When the round became terminal.
    pub crashed_at: Option<DateTime<Utc>>,
}

impl Round {
    /// Create a round with a fresh random server seed.
    pub fn begin(client_seed: String, nonce: u64, house_edge: f64) -> Result<Self, GameError> {
        Self::with_seed(fairness::generate_server_seed(), client_seed, nonce, house_edge)
    }

    /// Create a round from a known server seed (tests, verification).
    pub fn with_seed(
        server_seed: String,
        client_seed: String,
        nonce: u64,
        house_edge: f64,
    ) -> Result<Self, GameError> {
        if !(0.0..1.0).contains(&house_edge) || house_edge == 0.0 {
            return Err(GameError::FairnessIntegrity(format!(
                "house edge {house_edge} outside (0, 1)"
            )));
        }

        let crash_point =
            fairness::derive_crash_point(&server_seed, &client_seed, nonce, house_edge, Stream::Primary);
        let dragon_crash_point =
            fairness::derive_crash_point(&server_seed, &client_seed, nonce, house_edge, Stream::Dragon);

        for (stream, point) in [(Stream::Primary, crash_point), (Stream::Dragon, dragon_crash_point)] {
            if point < Multiplier::ONE || point > Multiplier::MAX {
                return Err(GameError::FairnessIntegrity(format!(
                    "derived {stream:?} crash point {point} out of range"
                )));
            }
        }

        let server_seed_hash = fairness::seed_hash(&server_seed);

        Ok(Self {
            id: *uuid::Uuid::new_v4().as_bytes(),
            server_seed,
            server_seed_hash,
            client_seed,
            nonce,
            house_edge,
            crash_point,
            dragon_crash_point,
            crashed_streams: [false; 2],
            phase: RoundPhase::Waiting,
            started_at: None,
            crashed_at: None,
        })
    }

    /// The hidden crash point for a stream. Engine-internal: never leaves
    /// the crate before the stream has crashed.
    pub(crate) fn crash_point(&self, stream: Stream) -> Multiplier {
        match stream {
            Stream::Primary => self.crash_point,
            Stream::Dragon => self.dragon_crash_point,
        }
    }

    /// Is this stream still climbing?
    pub fn is_stream_live(&self, stream: Stream) -> bool {
        !self.crashed_streams[stream as usize]
    }

    /// Record that a stream reached its crash point.
    pub(crate) fn mark_stream_crashed(&mut self, stream: Stream) {
        self.crashed_streams[stream as usize] = true;
    }

    /// Have both streams crashed?
    pub fn all_streams_crashed(&self) -> bool {
        self.crashed_streams.iter().all(|&c| c)
    }

    /// Enter the brief pre-launch window.
    pub fn set_starting(&mut self) {
        if self.phase == RoundPhase::Waiting {
            self.phase = RoundPhase::Starting;
        }
    }

    /// Close betting and start the multiplier clock.
    pub fn set_running(&mut self, now: DateTime<Utc>) {
        if self.phase == RoundPhase::Starting {
            self.phase = RoundPhase::Running;
            self.started_at = Some(now);
        }
    }

    /// Terminal transition. After this the seed is revealable and the
    /// round is immutable.
    pub fn set_crashed(&mut self, now: DateTime<Utc>) {
        if self.phase == RoundPhase::Running {
            self.phase = RoundPhase::Crashed;
            self.crashed_at = Some(now);
        }
    }

    /// The server seed, available only after the round crashed.
    pub fn revealed_seed(&self) -> Option<&str> {
        match self.phase {
            RoundPhase::Crashed => Some(&self.server_seed),
            _ => None,
        }
    }

    /// The public commitment published at round start.
    pub fn commitment(&self) -> RoundCommitment {
        RoundCommitment {
            server_seed_hash: self.server_seed_hash.clone(),
            client_seed: self.client_seed.clone(),
            nonce: self.nonce,
            house_edge: self.house_edge,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
