//! WebSocket Game Server
//!
//! Async WebSocket edge for the round engines. Connections authenticate,
//! join a table, and from then on: inbound commands are funneled into the
//! table's single-writer engine, outbound events fan out from the engine's
//! broadcast channel. Connection state never leaks into round state; a
//! dropped socket changes nothing about any bet.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::game::bet::UserId;
use crate::game::events::RoundEvent;
use crate::game::GameError;
use crate::network::auth::{self, AuthConfig};
use crate::network::protocol::{
    BetAck, ClientMessage, CommandError, CrashedInfo, ErrorCode, JoinRequest, PlaceBetRequest,
    RoundSummaryInfo, ServerMessage, StateChangeInfo,
};
use crate::network::table::{Table, TableManager};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Authentication settings.
    pub auth: AuthConfig,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().expect("static addr"),
            max_connections: 10_000,
            auth: AuthConfig::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),
}

/// Convert an engine event into its wire message.
///
/// This is the only place the two vocabularies meet; the engine never
/// sees protocol types.
fn convert_round_event(event: &RoundEvent) -> ServerMessage {
    match event {
        RoundEvent::PhaseChanged { round_id, phase, countdown_ms, commitment } => {
            ServerMessage::StateChange(StateChangeInfo {
                state: *phase,
                round_id: hex::encode(round_id),
                countdown_ms: *countdown_ms,
                server_seed_hash: commitment.as_ref().map(|c| c.server_seed_hash.clone()),
                client_seed: commitment.as_ref().map(|c| c.client_seed.clone()),
                nonce: commitment.as_ref().map(|c| c.nonce),
            })
        }
        RoundEvent::Tick { multiplier, elapsed_ms, .. } => ServerMessage::Tick {
            multiplier: *multiplier,
            elapsed_ms: *elapsed_ms,
        },
        RoundEvent::BetPlaced { user_id, stream, amount, .. } => ServerMessage::PlayerBet {
            user_id: user_id.to_uuid_string(),
            stream: *stream,
            amount: *amount,
        },
        RoundEvent::CashedOut { user_id, stream, multiplier, payout, .. } => {
            ServerMessage::PlayerCashedOut {
                user_id: user_id.to_uuid_string(),
                stream: *stream,
                multiplier: *multiplier,
                payout: *payout,
            }
        }
        RoundEvent::StreamCrashed { stream, crash_point, server_seed, server_seed_hash, .. } => {
            ServerMessage::Crashed(CrashedInfo {
                stream: *stream,
                crash_point: *crash_point,
                server_seed: server_seed.clone(),
                server_seed_hash: server_seed_hash.clone(),
            })
        }
        RoundEvent::RoundSettled { round_id, crash_point, dragon_crash_point, server_seed, commitment } => {
            ServerMessage::RoundSummary(RoundSummaryInfo {
                round_id: hex::encode(round_id),
                crash_point: *crash_point,
                dragon_crash_point: *dragon_crash_point,
                server_seed: server_seed.clone(),
                server_seed_hash: commitment.server_seed_hash.clone(),
                client_seed: commitment.client_seed.clone(),
                nonce: commitment.nonce,
            })
        }
        RoundEvent::RoundVoided { round_id, reason, .. } => ServerMessage::RoundVoided {
            round_id: hex::encode(round_id),
            reason: reason.clone(),
        },
    }
}

fn server_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Per-connection join state.
struct JoinedTable {
    user_id: UserId,
    table: Arc<Table>,
    relay: tokio::task::JoinHandle<()>,
}

impl Drop for JoinedTable {
    fn drop(&mut self) {
        self.relay.abort();
    }
}

/// The WebSocket server.
pub struct CrashServer {
    config: ServerConfig,
    tables: Arc<TableManager>,
    connections: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
}

impl CrashServer {
    /// Create a server over a table registry.
    pub fn new(config: ServerConfig, tables: Arc<TableManager>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            tables,
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Run the accept loop until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("crash server listening on {}", self.config.bind_addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.connections.load(Ordering::SeqCst) >= self.config.max_connections {
                                warn!("connection limit reached, rejecting {addr}");
                                continue;
                            }
                            debug!("new connection from {addr}");
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("accept error: {e}");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Spawn the per-connection task.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let tables = self.tables.clone();
        let auth_config = self.config.auth.clone();
        let connections = self.connections.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        connections.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    debug!("websocket handshake failed for {addr}: {e}");
                    connections.fetch_sub(1, Ordering::SeqCst);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(256);

            // Outbound writer task: the only place that touches the sink.
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("failed to serialize message: {e}");
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            let mut joined: Option<JoinedTable> = None;

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("invalid message from {addr}: {e}");
                                        let _ = msg_tx.send(ServerMessage::Error(CommandError {
                                            code: ErrorCode::InvalidInput,
                                            message: "invalid message format".to_string(),
                                        })).await;
                                        continue;
                                    }
                                };
                                Self::handle_client_message(
                                    client_msg,
                                    &mut joined,
                                    &tables,
                                    &auth_config,
                                    &msg_tx,
                                ).await;
                            }
                            Some(Ok(Message::Ping(_))) => {
                                let _ = msg_tx.send(ServerMessage::Pong {
                                    timestamp: 0,
                                    server_time: server_time_ms(),
                                }).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("client {addr} disconnected");
                                break;
                            }
                            Some(Err(e)) => {
                                debug!("websocket error for {addr}: {e}");
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Disconnection mutates nothing beyond this connection: bets
            // and rounds live in the engine, reachable again on rejoin.
            drop(joined);
            sender_task.abort();
            connections.fetch_sub(1, Ordering::SeqCst);
            debug!("client {addr} cleaned up");
        });
    }

    /// Handle one inbound message.
    async fn handle_client_message(
        msg: ClientMessage,
        joined: &mut Option<JoinedTable>,
        tables: &Arc<TableManager>,
        auth_config: &AuthConfig,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        match msg {
            ClientMessage::Join(request) => {
                Self::handle_join(request, joined, tables, auth_config, sender).await;
            }
            ClientMessage::PlaceBet(request) => {
                Self::handle_place_bet(request, joined, sender).await;
            }
            ClientMessage::Cashout => {
                Self::handle_cashout(joined, sender).await;
            }
            ClientMessage::Ping { timestamp } => {
                let _ = sender
                    .send(ServerMessage::Pong {
                        timestamp,
                        server_time: server_time_ms(),
                    })
                    .await;
            }
        }
    }

    /// Resolve identity, look up the table, return the authoritative
    /// snapshot, and start relaying events. Rejoining replaces the relay;
    /// it is also the reconnection path, with no recovery logic of its
    /// own.
    async fn handle_join(
        request: JoinRequest,
        joined: &mut Option<JoinedTable>,
        tables: &Arc<TableManager>,
        auth_config: &AuthConfig,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let user_id = match Self::resolve_user(&request, auth_config) {
            Ok(user_id) => user_id,
            Err(message) => {
                let _ = sender
                    .send(ServerMessage::Error(CommandError {
                        code: ErrorCode::AuthFailed,
                        message,
                    }))
                    .await;
                return;
            }
        };

        let Some(table_id) = request.table_id_bytes() else {
            let _ = sender
                .send(ServerMessage::Error(CommandError {
                    code: ErrorCode::TableNotFound,
                    message: "malformed table id".to_string(),
                }))
                .await;
            return;
        };

        let Some(table) = tables.get(&table_id).await else {
            let _ = sender
                .send(ServerMessage::Error(CommandError {
                    code: ErrorCode::TableNotFound,
                    message: "unknown table".to_string(),
                }))
                .await;
            return;
        };

        let snapshot = match table.handle.snapshot(Some(user_id)).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let _ = sender.send(ServerMessage::Error(CommandError::from_game_error(&e))).await;
                return;
            }
        };

        // Fan-out task: engine events -> this connection. Broadcast lag
        // only costs presentation frames; state recovers via snapshots.
        let mut events = table.handle.subscribe();
        let event_sender = sender.clone();
        let relay = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if event_sender.send(convert_round_event(&event)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("event relay lagged; skipped {skipped} events");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        *joined = Some(JoinedTable { user_id, table, relay });

        let _ = sender.send(ServerMessage::Joined { snapshot }).await;
        debug!(user = %user_id.to_uuid_string(), "joined table");
    }

    /// Map join credentials to a user id.
    fn resolve_user(request: &JoinRequest, auth_config: &AuthConfig) -> Result<UserId, String> {
        if auth_config.is_configured() {
            let token = request.token.as_deref().ok_or("token required")?;
            auth::authenticate(token, auth_config).map_err(|e| e.to_string())
        } else {
            // Development mode: the client names its own UUID.
            let user_id = request.user_id.as_deref().ok_or("user_id required")?;
            UserId::from_uuid_str(user_id).ok_or_else(|| "malformed user_id".to_string())
        }
    }

    async fn handle_place_bet(
        request: PlaceBetRequest,
        joined: &Option<JoinedTable>,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        let Some(joined) = joined else {
            let _ = sender
                .send(ServerMessage::BetError(CommandError {
                    code: ErrorCode::NotJoined,
                    message: "join a table first".to_string(),
                }))
                .await;
            return;
        };

        let result = joined
            .table
            .handle
            .place_bet(joined.user_id, request.amount, request.stream, request.auto_cashout)
            .await;

        let reply = match result {
            Ok(bet) => ServerMessage::BetAccepted(BetAck {
                bet_id: hex::encode(bet.id),
                amount: bet.stake,
                stream: bet.stream,
                auto_cashout: bet.auto_cashout,
            }),
            Err(e) => ServerMessage::BetError(CommandError::from_game_error(&e)),
        };
        let _ = sender.send(reply).await;
    }

    async fn handle_cashout(joined: &Option<JoinedTable>, sender: &mpsc::Sender<ServerMessage>) {
        let Some(joined) = joined else {
            let _ = sender
                .send(ServerMessage::CashoutError(CommandError {
                    code: ErrorCode::NotJoined,
                    message: "join a table first".to_string(),
                }))
                .await;
            return;
        };

        let reply = match joined.table.handle.cashout(joined.user_id).await {
            Ok(receipt) => ServerMessage::CashedOut(crate::network::protocol::CashoutAck {
                multiplier: receipt.multiplier,
                payout: receipt.payout,
                profit: receipt.profit(),
            }),
            Err(e) => {
                if e == GameError::EngineUnavailable {
                    warn!("cashout failed: {e}");
                }
                ServerMessage::CashoutError(CommandError::from_game_error(&e))
            }
        };
        let _ = sender.send(reply).await;
    }

    /// Signal every task to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Active connection count.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fairness::Stream;
    use crate::core::units::{Amount, Multiplier};
    use crate::game::round::RoundPhase;
    use crate::proof::commitment::RoundCommitment;
    use crate::wallet::{InMemoryWallet, LoggingRewardPool};

    fn tables() -> Arc<TableManager> {
        Arc::new(TableManager::new(
            Arc::new(InMemoryWallet::new()),
            Arc::new(LoggingRewardPool),
        ))
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 10_000);
        assert!(!config.auth.is_configured());
    }

    #[tokio::test]
    async fn test_server_creation_and_shutdown() {
        let server = CrashServer::new(
            ServerConfig {
                bind_addr: "127.0.0.1:0".parse().unwrap(),
                ..Default::default()
            },
            tables(),
        );
        assert_eq!(server.connection_count(), 0);
        server.shutdown();
        // Should not panic.
    }

    #[test]
    fn test_convert_phase_change_carries_commitment() {
        let event = RoundEvent::PhaseChanged {
            round_id: [3; 16],
            phase: RoundPhase::Waiting,
            countdown_ms: Some(5_000),
            commitment: Some(RoundCommitment {
                server_seed_hash: "hash".into(),
                client_seed: "client".into(),
                nonce: 12,
                house_edge: 0.04,
            }),
        };

        match convert_round_event(&event) {
            ServerMessage::StateChange(info) => {
                assert_eq!(info.state, RoundPhase::Waiting);
                assert_eq!(info.server_seed_hash.as_deref(), Some("hash"));
                assert_eq!(info.nonce, Some(12));
                assert_eq!(info.round_id, hex::encode([3u8; 16]));
            }
            other => panic!("wrong message: {other:?}"),
        }
    }

    #[test]
    fn test_convert_tick() {
        let event = RoundEvent::Tick {
            round_id: [3; 16],
            multiplier: Multiplier::from_hundredths(142),
            elapsed_ms: 6_000,
        };
        match convert_round_event(&event) {
            ServerMessage::Tick { multiplier, elapsed_ms } => {
                assert_eq!(multiplier.hundredths(), 142);
                assert_eq!(elapsed_ms, 6_000);
            }
            other => panic!("wrong message: {other:?}"),
        }
    }

    #[test]
    fn test_convert_settled_exposes_reveal() {
        let event = RoundEvent::RoundSettled {
            round_id: [3; 16],
            crash_point: Multiplier::from_hundredths(216),
            dragon_crash_point: Multiplier::from_hundredths(384),
            server_seed: "the-seed".into(),
            commitment: RoundCommitment {
                server_seed_hash: "hash".into(),
                client_seed: "client".into(),
                nonce: 607,
                house_edge: 0.04,
            },
        };
        match convert_round_event(&event) {
            ServerMessage::RoundSummary(info) => {
                assert_eq!(info.crash_point.hundredths(), 216);
                assert_eq!(info.dragon_crash_point.hundredths(), 384);
                assert_eq!(info.server_seed, "the-seed");
                assert_eq!(info.nonce, 607);
            }
            other => panic!("wrong message: {other:?}"),
        }
    }

    #[test]
    fn test_convert_player_events_use_uuid_strings() {
        let user = UserId::new([9; 16]);
        let event = RoundEvent::BetPlaced {
            round_id: [3; 16],
            user_id: user,
            stream: Stream::Primary,
            amount: Amount::from_cents(1_000),
        };
        match convert_round_event(&event) {
            ServerMessage::PlayerBet { user_id, amount, .. } => {
                assert_eq!(user_id, user.to_uuid_string());
                assert_eq!(amount.cents(), 1_000);
            }
            other => panic!("wrong message: {other:?}"),
        }
    }

    #[test]
    fn test_resolve_user_dev_mode() {
        let request = JoinRequest {
            table_id: hex::encode([1u8; 16]),
            token: None,
            user_id: Some(uuid::Uuid::from_bytes([5; 16]).to_string()),
        };
        let user = CrashServer::resolve_user(&request, &AuthConfig::default()).unwrap();
        assert_eq!(user, UserId::new([5; 16]));

        let missing = JoinRequest {
            table_id: hex::encode([1u8; 16]),
            token: None,
            user_id: None,
        };
        assert!(CrashServer::resolve_user(&missing, &AuthConfig::default()).is_err());
    }

    #[test]
    fn test_resolve_user_requires_token_when_configured() {
        let config = AuthConfig {
            secret: Some("secret".into()),
            ..Default::default()
        };
        let request = JoinRequest {
            table_id: hex::encode([1u8; 16]),
            token: None,
            user_id: Some(uuid::Uuid::from_bytes([5; 16]).to_string()),
        };
        // Without a token the join fails even if a user_id was supplied.
        assert!(CrashServer::resolve_user(&request, &config).is_err());
    }
}
