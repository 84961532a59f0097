//! Network Layer
//!
//! WebSocket edge for real-time play. This layer is **non-authoritative**:
//! all round and bet state lives behind the engines in `game/`; the
//! network only relays typed commands in and typed events out.

pub mod auth;
pub mod protocol;
pub mod table;
pub mod server;

pub use auth::{AuthConfig, TokenClaims, AuthError, authenticate, validate_token};
pub use protocol::{
    ClientMessage, ServerMessage, JoinRequest, PlaceBetRequest,
    StateChangeInfo, CrashedInfo, RoundSummaryInfo, CommandError, ErrorCode,
};
pub use table::{Table, TableId, TableConfig, TableManager};
pub use server::{CrashServer, ServerConfig, ServerError};
