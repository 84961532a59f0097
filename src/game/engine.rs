//! Round Engine
//!
//! One engine task per table: the single writer for that table's rounds.
//! Commands arrive as messages with reply channels, events leave on a
//! broadcast channel, and nothing else can touch the round or the ledger.
//! The loop never blocks on the transport; the only awaited collaborator
//! is the wallet, and only on the command paths that must confirm money
//! movement before acknowledging.
//!
//! Phase cadence:
//!
//! ```text
//! Waiting (betting open) -> Starting (brief) -> Running (ticks) -> Crashed
//!      ^                                                              |
//!      └────────────────────── pause, nonce += 1 ──────────────────────┘
//! ```

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval, sleep_until, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::core::curve;
use crate::core::fairness::Stream;
use crate::core::units::{Amount, Currency, Multiplier};
use crate::game::bet::{Bet, BetLedger, CashoutReceipt, LossRecord, UserId};
use crate::game::events::RoundEvent;
use crate::game::round::{Round, RoundId, RoundPhase};
use crate::game::GameError;
use crate::proof::commitment::RoundCommitment;
use crate::wallet::{Contribution, RewardPool, WalletAdapter, WalletError};

/// Engine configuration for one table.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Public client seed for this table's derivations.
    pub client_seed: String,
    /// Fixed server seed (nonce still increments per round). `None` draws
    /// a fresh random seed every round.
    pub server_seed: Option<String>,
    /// Nonce of the first round.
    pub initial_nonce: u64,
    /// House edge, fraction in (0, 1).
    pub house_edge: f64,
    /// Settlement currency.
    pub currency: Currency,
    /// Brand this table belongs to (reward-pool attribution).
    pub site_id: String,
    /// Betting window duration (ms).
    pub betting_ms: u64,
    /// Pre-launch window duration (ms); bets still accepted.
    pub starting_ms: u64,
    /// Tick cadence while RUNNING (ms).
    pub tick_ms: u64,
    /// Pause between crash and the next betting window (ms).
    pub pause_ms: u64,
    /// Watchdog: a round still running after this long is voided and
    /// refunded (the curve reaches the 5000.00x clip in ~142 s).
    pub max_round_ms: u64,
    /// Command channel capacity.
    pub command_buffer: usize,
    /// Event channel capacity.
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            client_seed: crate::DEFAULT_CLIENT_SEED.to_string(),
            server_seed: None,
            initial_nonce: 0,
            house_edge: crate::DEFAULT_HOUSE_EDGE,
            currency: Currency::usdt(),
            site_id: "default".to_string(),
            betting_ms: 5_000,
            starting_ms: 1_000,
            tick_ms: crate::TICK_INTERVAL_MS,
            pause_ms: 3_000,
            max_round_ms: 150_000,
            command_buffer: 256,
            event_buffer: 1_024,
        }
    }
}

/// Commands funneled into the engine from any number of connections.
pub enum EngineCommand {
    /// Place a bet in the current round.
    PlaceBet {
        /// Bettor.
        user_id: UserId,
        /// Stake to debit.
        stake: Amount,
        /// Crash line to ride.
        stream: Stream,
        /// Optional auto-cashout above 1.00x.
        auto_cashout: Option<Multiplier>,
        /// Acknowledged with the created bet, or the rejection.
        reply: oneshot::Sender<Result<Bet, GameError>>,
    },
    /// Cash the caller's open bet out at the live multiplier.
    Cashout {
        /// Bettor.
        user_id: UserId,
        /// Acknowledged with the settlement receipt, or the rejection.
        reply: oneshot::Sender<Result<CashoutReceipt, GameError>>,
    },
    /// Authoritative state for join/reconnect. Never mutates anything.
    Snapshot {
        /// Include this user's bet in the snapshot.
        user_id: Option<UserId>,
        /// Reply channel.
        reply: oneshot::Sender<RoundSnapshot>,
    },
}

/// Authoritative view of the current round, used to (re)join a table.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct RoundSnapshot {
    /// Current round.
    pub round_id: RoundId,
    /// Current phase.
    pub phase: RoundPhase,
    /// The round's public commitment.
    pub commitment: RoundCommitment,
    /// Live multiplier, while RUNNING.
    pub multiplier: Option<Multiplier>,
    /// Elapsed RUNNING time (ms).
    pub elapsed_ms: Option<u64>,
    /// Remaining time in a timed phase (ms).
    pub countdown_ms: Option<u64>,
    /// Is the primary line still climbing?
    pub primary_live: bool,
    /// Is the dragon line still climbing?
    pub dragon_live: bool,
    /// The requesting user's bet in this round, if any.
    pub your_bet: Option<Bet>,
}

/// Cloneable handle to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<EngineCommand>,
    events: broadcast::Sender<RoundEvent>,
}

impl EngineHandle {
    /// Place a bet and wait for the engine's acknowledgement.
    pub async fn place_bet(
        &self,
        user_id: UserId,
        stake: Amount,
        stream: Stream,
        auto_cashout: Option<Multiplier>,
    ) -> Result<Bet, GameError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::PlaceBet { user_id, stake, stream, auto_cashout, reply })
            .await
            .map_err(|_| GameError::EngineUnavailable)?;
        rx.await.map_err(|_| GameError::EngineUnavailable)?
    }

    /// Cash out and wait for the engine's acknowledgement.
    pub async fn cashout(&self, user_id: UserId) -> Result<CashoutReceipt, GameError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::Cashout { user_id, reply })
            .await
            .map_err(|_| GameError::EngineUnavailable)?;
        rx.await.map_err(|_| GameError::EngineUnavailable)?
    }

    /// Fetch the authoritative round snapshot.
    pub async fn snapshot(&self, user_id: Option<UserId>) -> Result<RoundSnapshot, GameError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::Snapshot { user_id, reply })
            .await
            .map_err(|_| GameError::EngineUnavailable)?;
        rx.await.map_err(|_| GameError::EngineUnavailable)
    }

    /// Subscribe to the engine's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<RoundEvent> {
        self.events.subscribe()
    }
}

/// Timing context of the phase currently processing commands.
#[derive(Clone, Copy)]
struct PhaseTiming {
    /// RUNNING start instant, when applicable.
    started: Option<Instant>,
    /// End of the current timed phase, when applicable.
    deadline: Option<Instant>,
}

/// Outcome of one betting/pause wait.
#[derive(PartialEq)]
enum PhaseWait {
    Elapsed,
    Shutdown,
}

/// Outcome of one RUNNING phase.
enum RoundOutcome {
    Completed,
    Voided(String),
    Shutdown,
}

/// The per-table single-writer actor. Owns the round and the ledger.
pub struct RoundEngine {
    config: EngineConfig,
    wallet: Arc<dyn WalletAdapter>,
    reward_pool: Arc<dyn RewardPool>,
    events: broadcast::Sender<RoundEvent>,
    commands: mpsc::Receiver<EngineCommand>,
    round: Round,
    ledger: BetLedger,
    nonce: u64,
}

impl RoundEngine {
    /// Validate the config, create the first round, and spawn the engine
    /// task. The returned handle is the only way to reach it.
    pub fn spawn(
        config: EngineConfig,
        wallet: Arc<dyn WalletAdapter>,
        reward_pool: Arc<dyn RewardPool>,
    ) -> Result<EngineHandle, GameError> {
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer);
        let (event_tx, _) = broadcast::channel(config.event_buffer);

        let nonce = config.initial_nonce;
        let round = Self::make_round(&config, nonce)?;
        let ledger = BetLedger::new(round.id);

        let handle = EngineHandle {
            commands: command_tx,
            events: event_tx.clone(),
        };

        let engine = RoundEngine {
            config,
            wallet,
            reward_pool,
            events: event_tx,
            commands: command_rx,
            round,
            ledger,
            nonce,
        };
        tokio::spawn(engine.run());

        Ok(handle)
    }

    fn make_round(config: &EngineConfig, nonce: u64) -> Result<Round, GameError> {
        match &config.server_seed {
            Some(seed) => Round::with_seed(
                seed.clone(),
                config.client_seed.clone(),
                nonce,
                config.house_edge,
            ),
            None => Round::begin(config.client_seed.clone(), nonce, config.house_edge),
        }
    }

    /// The engine loop. Runs until every handle is dropped.
    async fn run(mut self) {
        info!(
            site = %self.config.site_id,
            currency = %self.config.currency,
            house_edge = self.config.house_edge,
            "round engine started"
        );

        loop {
            info!(
                round = %hex::encode(&self.round.id[..4]),
                nonce = self.nonce,
                "round open for betting"
            );
            self.broadcast(RoundEvent::PhaseChanged {
                round_id: self.round.id,
                phase: RoundPhase::Waiting,
                countdown_ms: Some(self.config.betting_ms),
                commitment: Some(self.round.commitment()),
            });
            if self.wait_phase(self.config.betting_ms).await == PhaseWait::Shutdown {
                return;
            }

            self.round.set_starting();
            self.broadcast(RoundEvent::PhaseChanged {
                round_id: self.round.id,
                phase: RoundPhase::Starting,
                countdown_ms: Some(self.config.starting_ms),
                commitment: None,
            });
            if self.wait_phase(self.config.starting_ms).await == PhaseWait::Shutdown {
                return;
            }

            self.round.set_running(Utc::now());
            self.broadcast(RoundEvent::PhaseChanged {
                round_id: self.round.id,
                phase: RoundPhase::Running,
                countdown_ms: None,
                commitment: None,
            });
            debug!(
                round = %hex::encode(&self.round.id[..4]),
                bets = self.ledger.len(),
                "round running"
            );

            match self.run_round().await {
                RoundOutcome::Completed => {
                    info!(
                        round = %hex::encode(&self.round.id[..4]),
                        staked = %self.ledger.total_staked(),
                        paid = %self.ledger.total_paid(),
                        "round settled"
                    );
                }
                RoundOutcome::Voided(reason) => self.void_round(reason).await,
                RoundOutcome::Shutdown => return,
            }

            if self.wait_phase(self.config.pause_ms).await == PhaseWait::Shutdown {
                return;
            }

            // Next round. `make_round` only fails on config-level faults,
            // which spawn already validated; if it fails anyway, keep the
            // table alive and retry rather than killing the process.
            self.nonce += 1;
            loop {
                match Self::make_round(&self.config, self.nonce) {
                    Ok(round) => {
                        self.ledger = BetLedger::new(round.id);
                        self.round = round;
                        break;
                    }
                    Err(e) => {
                        error!("failed to create round: {e}");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }

    /// Serve commands until the phase deadline elapses.
    async fn wait_phase(&mut self, duration_ms: u64) -> PhaseWait {
        let deadline = Instant::now() + Duration::from_millis(duration_ms);
        let timing = PhaseTiming { started: None, deadline: Some(deadline) };

        loop {
            tokio::select! {
                _ = sleep_until(deadline) => return PhaseWait::Elapsed,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command, timing).await,
                    None => return PhaseWait::Shutdown,
                }
            }
        }
    }

    /// The RUNNING phase: tick cadence, crash detection, command serving,
    /// watchdog. Returns once both streams crashed or the round is voided.
    async fn run_round(&mut self) -> RoundOutcome {
        let started = Instant::now();
        let watchdog = started + Duration::from_millis(self.config.max_round_ms);
        let timing = PhaseTiming { started: Some(started), deadline: None };

        let mut ticker = interval(Duration::from_millis(self.config.tick_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = ticker.tick() => {
                    if self.process_tick(started).await {
                        return RoundOutcome::Completed;
                    }
                }
                _ = sleep_until(watchdog) => {
                    return RoundOutcome::Voided(format!(
                        "no crash within {} ms", self.config.max_round_ms
                    ));
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command, timing).await,
                    None => return RoundOutcome::Shutdown,
                }
            }
        }
    }

    /// One tick: crash checks first (so `auto == crash` is a loss), then
    /// due auto-cashouts, then the broadcast sample. Returns true when the
    /// round is over.
    async fn process_tick(&mut self, started: Instant) -> bool {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let multiplier = curve::multiplier_at(elapsed_ms);

        let mut crashed_now: Vec<(Stream, Multiplier)> = Vec::new();
        for stream in [Stream::Primary, Stream::Dragon] {
            if self.round.is_stream_live(stream) && multiplier >= self.round.crash_point(stream) {
                let crash_point = self.crash_stream(stream).await;
                crashed_now.push((stream, crash_point));
            }
        }

        let finished = self.round.all_streams_crashed();
        if finished {
            self.round.set_crashed(Utc::now());
        }

        for (stream, crash_point) in crashed_now {
            self.broadcast(RoundEvent::StreamCrashed {
                round_id: self.round.id,
                stream,
                crash_point,
                server_seed: self.round.revealed_seed().map(str::to_string),
                server_seed_hash: self.round.server_seed_hash.clone(),
            });
        }

        if finished {
            // Reveal is gated on the Crashed phase, so the seed is
            // guaranteed present here.
            if let Some(server_seed) = self.round.revealed_seed() {
                self.broadcast(RoundEvent::RoundSettled {
                    round_id: self.round.id,
                    crash_point: self.round.crash_point(Stream::Primary),
                    dragon_crash_point: self.round.crash_point(Stream::Dragon),
                    server_seed: server_seed.to_string(),
                    commitment: self.round.commitment(),
                });
            }
            return true;
        }

        for stream in [Stream::Primary, Stream::Dragon] {
            if self.round.is_stream_live(stream) {
                for (user_id, locked) in self.ledger.due_auto_cashouts(stream, multiplier) {
                    match self.ledger.cashout(&user_id, locked) {
                        Ok(receipt) => self.credit_win(&receipt).await,
                        // Unreachable for a bet the scan just saw open;
                        // terminal bets are simply skipped.
                        Err(e) => debug!("auto-cashout skipped: {e}"),
                    }
                }
            }
        }

        self.broadcast(RoundEvent::Tick {
            round_id: self.round.id,
            multiplier,
            elapsed_ms,
        });

        false
    }

    /// Settle everything still open on a crashed stream and queue the
    /// reward-pool contributions. Returns the stream's crash point.
    async fn crash_stream(&mut self, stream: Stream) -> Multiplier {
        let crash_point = self.round.crash_point(stream);
        let settlement = self.ledger.settle_stream_crash(stream, crash_point);

        debug!(
            round = %hex::encode(&self.round.id[..4]),
            ?stream,
            %crash_point,
            winners = settlement.winners.len(),
            losers = settlement.losers.len(),
            "stream crashed"
        );

        for receipt in &settlement.winners {
            self.credit_win(receipt).await;
        }
        for loss in &settlement.losers {
            self.contribute_loss(loss);
        }

        self.round.mark_stream_crashed(stream);
        crash_point
    }

    /// Credit a winning receipt and broadcast it.
    async fn credit_win(&mut self, receipt: &CashoutReceipt) {
        if let Err(e) = self
            .wallet
            .credit(receipt.user_id, &self.config.currency, receipt.payout)
            .await
        {
            // The ledger already holds the authoritative payout; a failed
            // credit is an operator incident to reconcile, never a reason
            // to unsettle the bet.
            error!(
                user = %receipt.user_id.to_uuid_string(),
                payout = %receipt.payout,
                "wallet credit failed after settlement: {e}"
            );
        }

        self.broadcast(RoundEvent::CashedOut {
            round_id: self.round.id,
            user_id: receipt.user_id,
            stream: receipt.stream,
            multiplier: receipt.multiplier,
            payout: receipt.payout,
        });
    }

    /// Fire-and-forget reward-pool contribution for a lost stake.
    fn contribute_loss(&self, loss: &LossRecord) {
        let pool = self.reward_pool.clone();
        let contribution = Contribution {
            user_id: loss.user_id,
            bet_id: loss.bet_id,
            stake: loss.stake,
            house_edge: self.config.house_edge,
            game_type: "crash".to_string(),
            site_id: self.config.site_id.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = pool.contribute(contribution).await {
                warn!("{e}");
            }
        });
    }

    /// Abort the current round: refund every open stake exactly once and
    /// broadcast the void. The caller starts a fresh round afterwards.
    async fn void_round(&mut self, reason: String) {
        error!(
            round = %hex::encode(&self.round.id[..4]),
            %reason,
            "voiding round and refunding open stakes"
        );

        let refunds = self.ledger.refund_open();
        for refund in &refunds {
            if let Err(e) = self
                .wallet
                .credit(refund.user_id, &self.config.currency, refund.stake)
                .await
            {
                error!(
                    user = %refund.user_id.to_uuid_string(),
                    stake = %refund.stake,
                    "refund credit failed: {e}"
                );
            }
        }

        self.round.set_crashed(Utc::now());
        self.broadcast(RoundEvent::RoundVoided {
            round_id: self.round.id,
            reason,
            refunded: refunds.len(),
        });
    }

    /// Dispatch one command. Replies are best-effort: a caller that went
    /// away mid-command changes nothing.
    async fn handle_command(&mut self, command: EngineCommand, timing: PhaseTiming) {
        match command {
            EngineCommand::PlaceBet { user_id, stake, stream, auto_cashout, reply } => {
                let result = self.place_bet(user_id, stake, stream, auto_cashout).await;
                let _ = reply.send(result);
            }
            EngineCommand::Cashout { user_id, reply } => {
                let result = self.manual_cashout(user_id, timing.started).await;
                let _ = reply.send(result);
            }
            EngineCommand::Snapshot { user_id, reply } => {
                let _ = reply.send(self.snapshot(user_id, timing));
            }
        }
    }

    /// Validate, debit, record, acknowledge. The duplicate check runs
    /// before the debit so a rejection never moves money.
    async fn place_bet(
        &mut self,
        user_id: UserId,
        stake: Amount,
        stream: Stream,
        auto_cashout: Option<Multiplier>,
    ) -> Result<Bet, GameError> {
        match self.round.phase {
            RoundPhase::Waiting | RoundPhase::Starting => {}
            phase => return Err(GameError::State { action: "place_bet", phase }),
        }

        BetLedger::validate(stake, auto_cashout)?;
        if self.ledger.bet_for(&user_id).is_some() {
            return Err(GameError::DuplicateBet);
        }

        match self.wallet.debit(user_id, &self.config.currency, stake).await {
            Ok(()) => {}
            Err(WalletError::InsufficientFunds) => return Err(GameError::InsufficientFunds),
            Err(WalletError::Unavailable(e)) => {
                warn!("wallet debit failed: {e}");
                return Err(GameError::WalletUnavailable);
            }
        }

        let bet = match self.ledger.place(user_id, stake, stream, auto_cashout, Utc::now()) {
            Ok(bet) => bet.clone(),
            Err(e) => {
                // Undo the debit; the checks above make this unreachable,
                // but a stranded stake would violate conservation.
                let _ = self.wallet.credit(user_id, &self.config.currency, stake).await;
                return Err(e);
            }
        };

        self.broadcast(RoundEvent::BetPlaced {
            round_id: self.round.id,
            user_id,
            stream,
            amount: stake,
        });

        Ok(bet)
    }

    /// Cash out at the multiplier the loop observes right now, clamped to
    /// the stream's crash point (a command racing the crash tick must not
    /// pay beyond what the round could display).
    async fn manual_cashout(
        &mut self,
        user_id: UserId,
        started: Option<Instant>,
    ) -> Result<CashoutReceipt, GameError> {
        let started = match (self.round.phase, started) {
            (RoundPhase::Running, Some(started)) => started,
            (phase, _) => return Err(GameError::State { action: "cashout", phase }),
        };

        let bet = self.ledger.bet_for(&user_id).ok_or(GameError::NoOpenBet)?;
        if !bet.is_open() {
            return Err(GameError::AlreadySettled);
        }
        let stream = bet.stream;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let live = curve::multiplier_at(elapsed_ms).min(self.round.crash_point(stream));

        let receipt = self.ledger.cashout(&user_id, live)?;
        self.credit_win(&receipt).await;
        Ok(receipt)
    }

    /// Read-only view of the current round for join/reconnect.
    fn snapshot(&self, user_id: Option<UserId>, timing: PhaseTiming) -> RoundSnapshot {
        let (multiplier, elapsed_ms) = match (self.round.phase, timing.started) {
            (RoundPhase::Running, Some(started)) => {
                let elapsed = started.elapsed().as_millis() as u64;
                (Some(curve::multiplier_at(elapsed)), Some(elapsed))
            }
            _ => (None, None),
        };

        let countdown_ms = timing
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()).as_millis() as u64);

        RoundSnapshot {
            round_id: self.round.id,
            phase: self.round.phase,
            commitment: self.round.commitment(),
            multiplier,
            elapsed_ms,
            countdown_ms,
            primary_live: self.round.is_stream_live(Stream::Primary),
            dragon_live: self.round.is_stream_live(Stream::Dragon),
            your_bet: user_id.and_then(|u| self.ledger.bet_for(&u).cloned()),
        }
    }

    fn broadcast(&self, event: RoundEvent) {
        // Err means no subscriber is listening right now; state, not the
        // transport, is authoritative.
        let _ = self.events.send(event);
    }
}

// =============================================================================
// TESTS
// =============================================================================
