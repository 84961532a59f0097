//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are serialized as JSON for debugging ease, with optional
//! binary (bincode) for flat payloads. Both directions are closed tagged
//! unions: no untyped payload dictionaries.

use serde::{Serialize, Deserialize};

use crate::core::fairness::Stream;
use crate::core::units::{Amount, Multiplier};
use crate::game::engine::RoundSnapshot;
use crate::game::round::RoundPhase;
use crate::game::GameError;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a table (also used to reconnect).
    Join(JoinRequest),

    /// Place a bet in the current round.
    PlaceBet(PlaceBetRequest),

    /// Cash out the caller's open bet.
    Cashout,

    /// Ping for latency measurement.
    Ping {
        /// Echoed back in the pong.
        timestamp: u64,
    },
}

/// Join request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Table to join (hex-encoded 16 bytes).
    pub table_id: String,
    /// Authentication token (JWT), required when auth is configured.
    pub token: Option<String>,
    /// Caller-supplied user id (UUID string), accepted only when auth is
    /// not configured (development setups).
    pub user_id: Option<String>,
}

impl JoinRequest {
    /// Parse table_id from hex string to bytes.
    pub fn table_id_bytes(&self) -> Option<[u8; 16]> {
        let bytes = hex::decode(&self.table_id).ok()?;
        if bytes.len() != 16 {
            return None;
        }
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&bytes);
        Some(arr)
    }
}

/// Bet placement request. Amounts are integer cents, multipliers integer
/// hundredths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceBetRequest {
    /// Stake in cents.
    pub amount: Amount,
    /// Optional auto-cashout in hundredths (must be > 100).
    pub auto_cashout: Option<Multiplier>,
    /// Crash line to ride; defaults to the primary line.
    #[serde(default)]
    pub stream: Stream,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Join accepted: the authoritative state of the table right now.
    Joined {
        /// Current round snapshot (includes the caller's bet, if any).
        snapshot: RoundSnapshot,
    },

    /// The round changed phase. Commitment fields are present on round
    /// open (`waiting`).
    StateChange(StateChangeInfo),

    /// Live multiplier sample.
    Tick {
        /// Current multiplier (hundredths).
        multiplier: Multiplier,
        /// Milliseconds since the round started running.
        elapsed_ms: u64,
    },

    /// A crash line ended. Carries the server seed only when this crash
    /// completes the round.
    Crashed(CrashedInfo),

    /// Round over: full reveal for independent verification.
    RoundSummary(RoundSummaryInfo),

    /// The round was voided; open stakes were refunded.
    RoundVoided {
        /// Round affected (hex).
        round_id: String,
        /// Operator-facing reason.
        reason: String,
    },

    /// The caller's bet was accepted.
    BetAccepted(BetAck),

    /// The caller's bet was rejected.
    BetError(CommandError),

    /// The caller's cashout settled.
    CashedOut(CashoutAck),

    /// The caller's cashout was rejected.
    CashoutError(CommandError),

    /// Another player placed a bet (presentation).
    PlayerBet {
        /// Bettor (UUID string).
        user_id: String,
        /// Line the bet rides.
        stream: Stream,
        /// Stake in cents.
        amount: Amount,
    },

    /// A player's bet settled as a win (presentation; includes the
    /// caller's own auto-cashouts).
    PlayerCashedOut {
        /// Winner (UUID string).
        user_id: String,
        /// Line the bet rode.
        stream: Stream,
        /// Locked-in multiplier.
        multiplier: Multiplier,
        /// Amount credited.
        payout: Amount,
    },

    /// Pong response.
    Pong {
        /// Echo of the ping timestamp.
        timestamp: u64,
        /// Server wall-clock millis.
        server_time: u64,
    },

    /// Error outside the bet/cashout paths (join, parsing).
    Error(CommandError),

    /// Server is shutting down.
    Shutdown {
        /// Reason string.
        reason: String,
    },
}

/// Phase transition payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChangeInfo {
    /// New phase.
    pub state: RoundPhase,
    /// Round affected (hex).
    pub round_id: String,
    /// Milliseconds until the next automatic transition, if timed.
    pub countdown_ms: Option<u64>,
    /// Seed commitment, on round open.
    pub server_seed_hash: Option<String>,
    /// Public derivation input, on round open.
    pub client_seed: Option<String>,
    /// Public derivation input, on round open.
    pub nonce: Option<u64>,
}

/// Stream crash payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashedInfo {
    /// Line that crashed.
    pub stream: Stream,
    /// Its crash point.
    pub crash_point: Multiplier,
    /// Revealed server seed, iff the round is over.
    pub server_seed: Option<String>,
    /// The commitment the reveal answers.
    pub server_seed_hash: String,
}

/// Full round reveal payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSummaryInfo {
    /// Round id (hex).
    pub round_id: String,
    /// Primary crash point.
    pub crash_point: Multiplier,
    /// Dragon crash point.
    pub dragon_crash_point: Multiplier,
    /// Revealed server seed.
    pub server_seed: String,
    /// Commitment hash published at round start.
    pub server_seed_hash: String,
    /// Public derivation input.
    pub client_seed: String,
    /// Public derivation input.
    pub nonce: u64,
}

/// Bet acknowledgement payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetAck {
    /// Created bet id (hex).
    pub bet_id: String,
    /// Accepted stake.
    pub amount: Amount,
    /// Line the bet rides.
    pub stream: Stream,
    /// Registered auto-cashout, if any.
    pub auto_cashout: Option<Multiplier>,
}

/// Cashout acknowledgement payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashoutAck {
    /// Locked-in multiplier.
    pub multiplier: Multiplier,
    /// Amount credited.
    pub payout: Amount,
    /// Winnings beyond the returned stake.
    pub profit: Amount,
}

/// Command rejection payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandError {
    /// Machine-readable code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed command input.
    InvalidInput,
    /// Command issued outside its legal round state.
    WrongState,
    /// Stake exceeds available balance.
    InsufficientFunds,
    /// User already holds a bet in this round.
    DuplicateBet,
    /// Bet already settled.
    AlreadySettled,
    /// No open bet to cash out.
    NoOpenBet,
    /// Must join a table first.
    NotJoined,
    /// Authentication failed.
    AuthFailed,
    /// Unknown table.
    TableNotFound,
    /// Internal error.
    InternalError,
}

impl CommandError {
    /// Map an engine error onto a wire error.
    pub fn from_game_error(error: &GameError) -> Self {
        let code = match error {
            GameError::Validation(_) => ErrorCode::InvalidInput,
            GameError::State { .. } => ErrorCode::WrongState,
            GameError::InsufficientFunds => ErrorCode::InsufficientFunds,
            GameError::DuplicateBet => ErrorCode::DuplicateBet,
            GameError::AlreadySettled => ErrorCode::AlreadySettled,
            GameError::NoOpenBet => ErrorCode::NoOpenBet,
            GameError::FairnessIntegrity(_)
            | GameError::WalletUnavailable
            | GameError::EngineUnavailable => ErrorCode::InternalError,
        };
        Self {
            code,
            message: error.to_string(),
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl PlaceBetRequest {
    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_json_roundtrip() {
        let msg = ClientMessage::PlaceBet(PlaceBetRequest {
            amount: Amount::from_cents(1_000),
            auto_cashout: Some(Multiplier::from_hundredths(200)),
            stream: Stream::Dragon,
        });

        let json = msg.to_json().unwrap();
        let parsed = ClientMessage::from_json(&json).unwrap();

        if let ClientMessage::PlaceBet(bet) = parsed {
            assert_eq!(bet.amount.cents(), 1_000);
            assert_eq!(bet.auto_cashout.map(|m| m.hundredths()), Some(200));
            assert_eq!(bet.stream, Stream::Dragon);
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_stream_defaults_to_primary() {
        let json = r#"{"type":"place_bet","amount":500,"auto_cashout":null}"#;
        let parsed = ClientMessage::from_json(json).unwrap();
        if let ClientMessage::PlaceBet(bet) = parsed {
            assert_eq!(bet.stream, Stream::Primary);
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_join_table_id_parsing() {
        let req = JoinRequest {
            table_id: hex::encode([7u8; 16]),
            token: None,
            user_id: None,
        };
        assert_eq!(req.table_id_bytes(), Some([7u8; 16]));

        let bad = JoinRequest {
            table_id: "zz".into(),
            token: None,
            user_id: None,
        };
        assert_eq!(bad.table_id_bytes(), None);

        let short = JoinRequest {
            table_id: "0011".into(),
            token: None,
            user_id: None,
        };
        assert_eq!(short.table_id_bytes(), None);
    }

    #[test]
    fn test_server_message_json_roundtrip() {
        let msg = ServerMessage::Tick {
            multiplier: Multiplier::from_hundredths(157),
            elapsed_ms: 7_500,
        };

        let json = msg.to_json().unwrap();
        let parsed = ServerMessage::from_json(&json).unwrap();

        if let ServerMessage::Tick { multiplier, elapsed_ms } = parsed {
            assert_eq!(multiplier.hundredths(), 157);
            assert_eq!(elapsed_ms, 7_500);
        } else {
            panic!("Wrong message type");
        }
    }

    #[test]
    fn test_crashed_message_hides_seed_until_final() {
        let msg = ServerMessage::Crashed(CrashedInfo {
            stream: Stream::Dragon,
            crash_point: Multiplier::from_hundredths(384),
            server_seed: None,
            server_seed_hash: "abc123".into(),
        });
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"server_seed\":null"));
        assert!(json.contains("dragon"));
    }

    #[test]
    fn test_error_code_serialization() {
        let msg = ServerMessage::BetError(CommandError {
            code: ErrorCode::InsufficientFunds,
            message: "insufficient funds".into(),
        });
        let json = msg.to_json().unwrap();
        assert!(json.contains("insufficient_funds"));
    }

    #[test]
    fn test_game_error_mapping() {
        let cases = [
            (GameError::Validation("stake must be positive".into()), ErrorCode::InvalidInput),
            (
                GameError::State { action: "cashout", phase: RoundPhase::Waiting },
                ErrorCode::WrongState,
            ),
            (GameError::InsufficientFunds, ErrorCode::InsufficientFunds),
            (GameError::DuplicateBet, ErrorCode::DuplicateBet),
            (GameError::AlreadySettled, ErrorCode::AlreadySettled),
            (GameError::NoOpenBet, ErrorCode::NoOpenBet),
            (GameError::EngineUnavailable, ErrorCode::InternalError),
        ];
        for (error, code) in cases {
            assert_eq!(CommandError::from_game_error(&error).code, code, "{error}");
        }
    }

    #[test]
    fn test_binary_serialization_flat_payload() {
        // Tagged enums don't bincode; flat request structs do.
        let bet = PlaceBetRequest {
            amount: Amount::from_cents(250),
            auto_cashout: None,
            stream: Stream::Primary,
        };
        let bytes = bet.to_bytes().unwrap();
        let parsed = PlaceBetRequest::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.amount.cents(), 250);
    }
}
