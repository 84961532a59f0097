//! # Crashline Server
//!
//! Provably-fair crash round engine with a second, independently-derived
//! "dragon" crash line per round.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CRASHLINE SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Pure deterministic primitives             │
//! │  ├── units.rs    - Integer-cent money, hundredth multipliers │
//! │  ├── fairness.rs - HMAC-SHA256 crash-point derivation        │
//! │  └── curve.rs    - Published multiplier-vs-time curve        │
//! │                                                              │
//! │  game/           - Round state (single-writer per table)     │
//! │  ├── round.rs    - Round entity and phase machine            │
//! │  ├── bet.rs      - Bet entity and per-round ledger           │
//! │  ├── engine.rs   - Actor loop: commands in, events out       │
//! │  └── events.rs   - Closed broadcast event union              │
//! │                                                              │
//! │  proof/          - Commit/reveal verification                │
//! │  wallet/         - Wallet + reward-pool collaborator seams   │
//! │  network/        - WebSocket edge (non-authoritative)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Fairness Guarantee
//!
//! Before a round opens for betting, the engine derives both crash points
//! from `(serverSeed, clientSeed, nonce)` and publishes
//! `sha256(serverSeed)`. After the round ends it reveals the seed; any
//! third party re-derives the crash points with `core::fairness` and
//! checks them against what was displayed. The multiplier curve is a pure
//! function of elapsed time (`core::curve`), so displayed values are
//! reproducible too.
//!
//! ## Concurrency Discipline
//!
//! Each table's rounds are owned by exactly one engine task. Bet and
//! cashout commands from any number of connections are messages into that
//! task; broadcast fan-out happens outside it. The wallet is the only
//! resource mutated beyond the engine, and it is serializable per
//! account.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod proof;
pub mod wallet;
pub mod network;

// Re-export commonly used types
pub use crate::core::units::{Amount, Multiplier, Currency};
pub use crate::core::fairness::Stream;
pub use crate::game::{Round, RoundPhase, Bet, BetStatus, UserId, GameError};
pub use crate::game::engine::{EngineConfig, EngineHandle, RoundEngine};
pub use crate::proof::{RoundCommitment, RoundReveal};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Tick cadence while a round is running (ms).
pub const TICK_INTERVAL_MS: u64 = 50;

/// Default house edge (4%).
pub const DEFAULT_HOUSE_EDGE: f64 = 0.04;

/// Default public client seed for tables that don't configure one.
pub const DEFAULT_CLIENT_SEED: &str = "crashline-public-client-seed-v1";
