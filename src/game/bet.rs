//! Bet Entity and Per-Round Ledger
//!
//! The ledger is pure state: no wallet calls, no clock, no I/O. Every
//! transition is one-way (`Placed -> CashedOut | Lost | Refunded`) and
//! happens at most once; the engine layers money movement on top of the
//! receipts returned here.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use std::collections::BTreeMap;

use crate::core::fairness::Stream;
use crate::core::units::{Amount, Multiplier};
use crate::game::round::RoundId;
use crate::game::GameError;

/// Unique bet identifier (UUID bytes).
pub type BetId = [u8; 16];

/// Unique user identifier (UUID-shaped bytes).
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub [u8; 16]);

impl UserId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Create from UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(|u| Self(*u.as_bytes()))
    }

    /// Convert to UUID string.
    pub fn to_uuid_string(&self) -> String {
        uuid::Uuid::from_bytes(self.0).to_string()
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

/// Bet lifecycle status. Transitions are monotonic and never reversed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    /// Open: stake debited, outcome pending.
    Placed,
    /// Won: settled at `cashout_multiplier`, payout credited.
    CashedOut,
    /// Lost: stream crashed before cashout, payout zero.
    Lost,
    /// Round voided: stake returned, bet carries no outcome.
    Refunded,
}

/// A single bet within one round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Bet {
    /// Bet identifier.
    pub id: BetId,
    /// Round this bet belongs to.
    pub round_id: RoundId,
    /// Owner.
    pub user_id: UserId,
    /// Stake debited at placement.
    pub stake: Amount,
    /// Which crash line this bet rides.
    pub stream: Stream,
    /// Optional pre-registered cashout multiplier (> 1.00x).
    pub auto_cashout: Option<Multiplier>,
    /// Current status.
    pub status: BetStatus,
    /// Set iff `CashedOut`.
    pub cashout_multiplier: Option<Multiplier>,
    /// Set iff `CashedOut` (zero for losses).
    pub payout: Option<Amount>,
    /// When the bet was accepted.
    pub placed_at: DateTime<Utc>,
}

impl Bet {
    /// Is the bet still open?
    pub fn is_open(&self) -> bool {
        self.status == BetStatus::Placed
    }
}

/// Settlement record for a winning cashout (manual, auto, or
/// crash-boundary auto).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CashoutReceipt {
    /// Settled bet.
    pub bet_id: BetId,
    /// Owner.
    pub user_id: UserId,
    /// Stream the bet rode.
    pub stream: Stream,
    /// Locked-in multiplier.
    pub multiplier: Multiplier,
    /// Original stake.
    pub stake: Amount,
    /// `stake * multiplier`, to be credited.
    pub payout: Amount,
}

impl CashoutReceipt {
    /// Winnings in excess of the returned stake.
    pub fn profit(&self) -> Amount {
        self.payout.saturating_sub(self.stake)
    }
}

/// Record of a bet lost to a stream crash.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LossRecord {
    /// Settled bet.
    pub bet_id: BetId,
    /// Owner.
    pub user_id: UserId,
    /// Stream that crashed on them.
    pub stream: Stream,
    /// Stake retained by the house.
    pub stake: Amount,
}

/// Outcome of settling one stream's crash.
#[derive(Clone, Debug, Default)]
pub struct StreamSettlement {
    /// Bets rescued by an auto-cashout below the crash point.
    pub winners: Vec<CashoutReceipt>,
    /// Bets settled as losses.
    pub losers: Vec<LossRecord>,
}

/// Record of a refunded stake (voided round).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefundRecord {
    /// Refunded bet.
    pub bet_id: BetId,
    /// Owner.
    pub user_id: UserId,
    /// Stake to credit back.
    pub stake: Amount,
}

/// The authoritative set of bets for one round.
///
/// Keyed by user: at most one bet per user per round. Uses BTreeMap so
/// settlement order is deterministic.
#[derive(Debug)]
pub struct BetLedger {
    round_id: RoundId,
    bets: BTreeMap<UserId, Bet>,
    total_staked: Amount,
    total_paid: Amount,
}

impl BetLedger {
    /// Create an empty ledger for a round.
    pub fn new(round_id: RoundId) -> Self {
        Self {
            round_id,
            bets: BTreeMap::new(),
            total_staked: Amount::ZERO,
            total_paid: Amount::ZERO,
        }
    }

    /// Accept a bet. Validation only; the caller has already debited the
    /// stake.
    pub fn place(
        &mut self,
        user_id: UserId,
        stake: Amount,
        stream: Stream,
        auto_cashout: Option<Multiplier>,
        now: DateTime<Utc>,
    ) -> Result<&Bet, GameError> {
        Self::validate(stake, auto_cashout)?;
        if self.bets.contains_key(&user_id) {
            return Err(GameError::DuplicateBet);
        }

        let bet = Bet {
            id: *uuid::Uuid::new_v4().as_bytes(),
            round_id: self.round_id,
            user_id,
            stake,
            stream,
            auto_cashout,
            status: BetStatus::Placed,
            cashout_multiplier: None,
            payout: None,
            placed_at: now,
        };

        self.total_staked = self.total_staked.saturating_add(stake);
        Ok(self.bets.entry(user_id).or_insert(bet))
    }

    /// Validate bet inputs without touching state. Used by the engine
    /// before it debits the wallet.
    pub fn validate(stake: Amount, auto_cashout: Option<Multiplier>) -> Result<(), GameError> {
        if stake.is_zero() {
            return Err(GameError::Validation("stake must be positive".into()));
        }
        if let Some(auto) = auto_cashout {
            if auto <= Multiplier::ONE {
                return Err(GameError::Validation(
                    "auto-cashout must be above 1.00x".into(),
                ));
            }
        }
        Ok(())
    }

    /// The user's bet in this round, if any.
    pub fn bet_for(&self, user_id: &UserId) -> Option<&Bet> {
        self.bets.get(user_id)
    }

    /// Settle the user's open bet as a win at `multiplier`.
    ///
    /// Idempotency: a terminal bet yields `AlreadySettled`, never a second
    /// payout.
    pub fn cashout(&mut self, user_id: &UserId, multiplier: Multiplier) -> Result<CashoutReceipt, GameError> {
        let bet = self.bets.get_mut(user_id).ok_or(GameError::NoOpenBet)?;
        if !bet.is_open() {
            return Err(GameError::AlreadySettled);
        }

        let payout = multiplier.apply(bet.stake);
        bet.status = BetStatus::CashedOut;
        bet.cashout_multiplier = Some(multiplier);
        bet.payout = Some(payout);
        self.total_paid = self.total_paid.saturating_add(payout);

        Ok(CashoutReceipt {
            bet_id: bet.id,
            user_id: *user_id,
            stream: bet.stream,
            multiplier,
            stake: bet.stake,
            payout,
        })
    }

    /// Open bets on `stream` whose auto-cashout has been reached, with the
    /// locked-in multiplier each will settle at (the registered value, not
    /// the live one, so the payout is independent of tick granularity).
    pub fn due_auto_cashouts(&self, stream: Stream, current: Multiplier) -> Vec<(UserId, Multiplier)> {
        self.bets
            .values()
            .filter(|b| b.is_open() && b.stream == stream)
            .filter_map(|b| b.auto_cashout.filter(|auto| *auto <= current).map(|auto| (b.user_id, auto)))
            .collect()
    }

    /// Settle every remaining open bet on a crashed stream.
    ///
    /// An auto-cashout strictly below the crash point wins at its locked
    /// value even if no tick landed in between; everything else loses.
    /// `auto == crash` is a loss: the cashout must precede the crash.
    pub fn settle_stream_crash(&mut self, stream: Stream, crash_point: Multiplier) -> StreamSettlement {
        let mut settlement = StreamSettlement::default();

        let users: Vec<UserId> = self
            .bets
            .values()
            .filter(|b| b.is_open() && b.stream == stream)
            .map(|b| b.user_id)
            .collect();

        for user_id in users {
            let rescued_at = self
                .bets
                .get(&user_id)
                .and_then(|b| b.auto_cashout.filter(|auto| *auto < crash_point));

            match rescued_at {
                Some(auto) => {
                    // Cannot fail: the bet was just confirmed open.
                    if let Ok(receipt) = self.cashout(&user_id, auto) {
                        settlement.winners.push(receipt);
                    }
                }
                None => {
                    if let Some(bet) = self.bets.get_mut(&user_id) {
                        bet.status = BetStatus::Lost;
                        bet.payout = Some(Amount::ZERO);
                        settlement.losers.push(LossRecord {
                            bet_id: bet.id,
                            user_id,
                            stream,
                            stake: bet.stake,
                        });
                    }
                }
            }
        }

        settlement
    }

    /// Mark every open bet refunded (voided round). Each stake appears
    /// exactly once in the result.
    pub fn refund_open(&mut self) -> Vec<RefundRecord> {
        let mut refunds = Vec::new();
        for bet in self.bets.values_mut() {
            if bet.is_open() {
                bet.status = BetStatus::Refunded;
                refunds.push(RefundRecord {
                    bet_id: bet.id,
                    user_id: bet.user_id,
                    stake: bet.stake,
                });
            }
        }
        refunds
    }

    /// Number of still-open bets.
    pub fn open_count(&self) -> usize {
        self.bets.values().filter(|b| b.is_open()).count()
    }

    /// Total number of bets in the round.
    pub fn len(&self) -> usize {
        self.bets.len()
    }

    /// Is the ledger empty?
    pub fn is_empty(&self) -> bool {
        self.bets.is_empty()
    }

    /// Sum of all accepted stakes.
    pub fn total_staked(&self) -> Amount {
        self.total_staked
    }

    /// Sum of all settled payouts.
    pub fn total_paid(&self) -> Amount {
        self.total_paid
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn user(n: u8) -> UserId {
        UserId::new([n; 16])
    }

    fn stake(cents: u64) -> Amount {
        Amount::from_cents(cents)
    }

    fn mult(h: u32) -> Multiplier {
        Multiplier::from_hundredths(h)
    }

    fn ledger() -> BetLedger {
        BetLedger::new([9; 16])
    }

    #[test]
    fn test_place_and_lookup() {
        let mut ledger = ledger();
        let bet = ledger
            .place(user(1), stake(1000), Stream::Primary, None, Utc::now())
            .unwrap();
        assert_eq!(bet.status, BetStatus::Placed);
        assert_eq!(bet.stake, stake(1000));

        assert!(ledger.bet_for(&user(1)).is_some());
        assert!(ledger.bet_for(&user(2)).is_none());
        assert_eq!(ledger.total_staked(), stake(1000));
    }

    #[test]
    fn test_duplicate_bet_rejected() {
        let mut ledger = ledger();
        ledger.place(user(1), stake(1000), Stream::Primary, None, Utc::now()).unwrap();
        let result = ledger.place(user(1), stake(500), Stream::Dragon, None, Utc::now());
        assert_eq!(result.unwrap_err(), GameError::DuplicateBet);
        // The first bet and its stake are untouched.
        assert_eq!(ledger.total_staked(), stake(1000));
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            BetLedger::validate(Amount::ZERO, None),
            Err(GameError::Validation(_))
        ));
        assert!(matches!(
            BetLedger::validate(stake(100), Some(Multiplier::ONE)),
            Err(GameError::Validation(_))
        ));
        assert!(matches!(
            BetLedger::validate(stake(100), Some(mult(99))),
            Err(GameError::Validation(_))
        ));
        assert!(BetLedger::validate(stake(100), Some(mult(101))).is_ok());
        assert!(BetLedger::validate(stake(100), None).is_ok());
    }

    #[test]
    fn test_cashout_pays_stake_times_multiplier() {
        let mut ledger = ledger();
        ledger.place(user(1), stake(1000), Stream::Primary, None, Utc::now()).unwrap();

        let receipt = ledger.cashout(&user(1), mult(250)).unwrap();
        assert_eq!(receipt.payout, stake(2500));
        assert_eq!(receipt.profit(), stake(1500));

        let bet = ledger.bet_for(&user(1)).unwrap();
        assert_eq!(bet.status, BetStatus::CashedOut);
        assert_eq!(bet.cashout_multiplier, Some(mult(250)));
        assert_eq!(bet.payout, Some(stake(2500)));
    }

    #[test]
    fn test_double_cashout_rejected() {
        let mut ledger = ledger();
        ledger.place(user(1), stake(1000), Stream::Primary, None, Utc::now()).unwrap();

        ledger.cashout(&user(1), mult(200)).unwrap();
        assert_eq!(ledger.cashout(&user(1), mult(300)).unwrap_err(), GameError::AlreadySettled);
        // Exactly one payout recorded.
        assert_eq!(ledger.total_paid(), stake(2000));
    }

    #[test]
    fn test_cashout_without_bet() {
        let mut ledger = ledger();
        assert_eq!(ledger.cashout(&user(1), mult(200)).unwrap_err(), GameError::NoOpenBet);
    }

    #[test]
    fn test_due_auto_cashouts_lock_registered_value() {
        let mut ledger = ledger();
        ledger.place(user(1), stake(1000), Stream::Primary, Some(mult(150)), Utc::now()).unwrap();
        ledger.place(user(2), stake(1000), Stream::Primary, Some(mult(300)), Utc::now()).unwrap();
        ledger.place(user(3), stake(1000), Stream::Dragon, Some(mult(150)), Utc::now()).unwrap();
        ledger.place(user(4), stake(1000), Stream::Primary, None, Utc::now()).unwrap();

        // Live multiplier has overshot 1.50x; only matching-stream autos fire,
        // locked at their registered value.
        let due = ledger.due_auto_cashouts(Stream::Primary, mult(173));
        assert_eq!(due, vec![(user(1), mult(150))]);

        let due = ledger.due_auto_cashouts(Stream::Dragon, mult(173));
        assert_eq!(due, vec![(user(3), mult(150))]);
    }

    #[test]
    fn test_settle_stream_crash_scenario() {
        // The documented scenario: crash at 2.16x; auto 2.00x wins 20.00,
        // auto 3.00x loses.
        let mut ledger = ledger();
        ledger.place(user(1), stake(1000), Stream::Primary, Some(mult(200)), Utc::now()).unwrap();
        ledger.place(user(2), stake(1000), Stream::Primary, Some(mult(300)), Utc::now()).unwrap();

        let settlement = ledger.settle_stream_crash(Stream::Primary, mult(216));

        assert_eq!(settlement.winners.len(), 1);
        assert_eq!(settlement.winners[0].user_id, user(1));
        assert_eq!(settlement.winners[0].multiplier, mult(200));
        assert_eq!(settlement.winners[0].payout, stake(2000));

        assert_eq!(settlement.losers.len(), 1);
        assert_eq!(settlement.losers[0].user_id, user(2));

        let lost = ledger.bet_for(&user(2)).unwrap();
        assert_eq!(lost.status, BetStatus::Lost);
        assert_eq!(lost.payout, Some(Amount::ZERO));
    }

    #[test]
    fn test_auto_equal_to_crash_loses() {
        let mut ledger = ledger();
        ledger.place(user(1), stake(1000), Stream::Primary, Some(mult(216)), Utc::now()).unwrap();

        let settlement = ledger.settle_stream_crash(Stream::Primary, mult(216));
        assert!(settlement.winners.is_empty());
        assert_eq!(settlement.losers.len(), 1);
    }

    #[test]
    fn test_crash_settles_only_its_stream() {
        let mut ledger = ledger();
        ledger.place(user(1), stake(1000), Stream::Primary, None, Utc::now()).unwrap();
        ledger.place(user(2), stake(1000), Stream::Dragon, None, Utc::now()).unwrap();

        let settlement = ledger.settle_stream_crash(Stream::Primary, mult(150));
        assert_eq!(settlement.losers.len(), 1);
        assert_eq!(settlement.losers[0].user_id, user(1));

        // The dragon bet is still open.
        assert!(ledger.bet_for(&user(2)).unwrap().is_open());
        assert_eq!(ledger.open_count(), 1);
    }

    #[test]
    fn test_crash_settlement_idempotent() {
        let mut ledger = ledger();
        ledger.place(user(1), stake(1000), Stream::Primary, None, Utc::now()).unwrap();

        let first = ledger.settle_stream_crash(Stream::Primary, mult(150));
        assert_eq!(first.losers.len(), 1);

        // A second settlement of the same stream finds nothing open.
        let second = ledger.settle_stream_crash(Stream::Primary, mult(150));
        assert!(second.winners.is_empty());
        assert!(second.losers.is_empty());
    }

    #[test]
    fn test_refund_exactly_once() {
        let mut ledger = ledger();
        ledger.place(user(1), stake(1000), Stream::Primary, None, Utc::now()).unwrap();
        ledger.place(user(2), stake(500), Stream::Dragon, None, Utc::now()).unwrap();
        // Already-settled bets are not refunded.
        ledger.cashout(&user(1), mult(120)).unwrap();

        let refunds = ledger.refund_open();
        assert_eq!(refunds.len(), 1);
        assert_eq!(refunds[0].user_id, user(2));
        assert_eq!(refunds[0].stake, stake(500));

        // Second pass refunds nothing.
        assert!(ledger.refund_open().is_empty());
        assert_eq!(ledger.bet_for(&user(2)).unwrap().status, BetStatus::Refunded);
    }

    #[test]
    fn test_conservation_counters() {
        let mut ledger = ledger();
        ledger.place(user(1), stake(1000), Stream::Primary, Some(mult(200)), Utc::now()).unwrap();
        ledger.place(user(2), stake(2000), Stream::Primary, None, Utc::now()).unwrap();
        ledger.place(user(3), stake(500), Stream::Dragon, None, Utc::now()).unwrap();

        ledger.settle_stream_crash(Stream::Primary, mult(216));
        ledger.cashout(&user(3), mult(110)).unwrap();

        // Sum of stakes == payouts + house take.
        let staked = ledger.total_staked().cents() as i128;
        let paid = ledger.total_paid().cents() as i128;
        assert_eq!(staked, 3500);
        assert_eq!(paid, 2000 + 550);
        let house_take = staked - paid;
        assert_eq!(house_take, 950);
    }
}
