//! Wallet and Reward-Pool Collaborators
//!
//! The engine never touches balances directly; it speaks to these seams.
//! The wallet must be transactional per user account (safe under
//! concurrent debit/credit from many tables), which is the only
//! correctness requirement the engine imposes on it. Reward-pool
//! contributions are best-effort and must never affect settlement.

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::core::units::{Amount, Currency};
use crate::game::bet::{BetId, UserId};

/// Wallet operation failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WalletError {
    /// Debit larger than the available balance. Nothing was moved.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// The backing store failed.
    #[error("wallet backend unavailable: {0}")]
    Unavailable(String),
}

/// Atomic balance movement keyed by user and currency.
#[async_trait]
pub trait WalletAdapter: Send + Sync {
    /// Take `amount` from the user's balance, atomically.
    async fn debit(&self, user_id: UserId, currency: &Currency, amount: Amount)
        -> Result<(), WalletError>;

    /// Add `amount` to the user's balance, atomically.
    async fn credit(&self, user_id: UserId, currency: &Currency, amount: Amount)
        -> Result<(), WalletError>;
}

/// A contribution to the shared bonus pool for one settled losing stake.
#[derive(Clone, Debug)]
pub struct Contribution {
    /// Loser.
    pub user_id: UserId,
    /// Settled bet.
    pub bet_id: BetId,
    /// Stake retained by the house.
    pub stake: Amount,
    /// House edge the round ran with.
    pub house_edge: f64,
    /// Game family (always "crash" from this engine).
    pub game_type: String,
    /// Brand the table belongs to.
    pub site_id: String,
}

/// Reward-pool failures. Logged and swallowed by the caller.
#[derive(Debug, Clone, Error)]
#[error("reward pool contribution failed: {0}")]
pub struct RewardPoolError(pub String);

/// Fire-and-forget contribution hook.
#[async_trait]
pub trait RewardPool: Send + Sync {
    /// Record a contribution. Failures never block or unwind settlement.
    async fn contribute(&self, contribution: Contribution) -> Result<(), RewardPoolError>;
}

// =============================================================================
// IN-MEMORY WALLET
// =============================================================================

/// In-memory wallet for the standalone binary and tests.
///
/// A single lock over the balance map makes every debit/credit serializable
/// per account, which is all the engine contract asks for.
#[derive(Default)]
pub struct InMemoryWallet {
    balances: Mutex<BTreeMap<(UserId, Currency), Amount>>,
}

impl InMemoryWallet {
    /// Create an empty wallet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add funds to an account (test/bootstrap helper).
    pub async fn deposit(&self, user_id: UserId, currency: &Currency, amount: Amount) {
        let mut balances = self.balances.lock().await;
        let entry = balances.entry((user_id, currency.clone())).or_insert(Amount::ZERO);
        *entry = entry.saturating_add(amount);
    }

    /// Current balance for an account.
    pub async fn balance(&self, user_id: UserId, currency: &Currency) -> Amount {
        let balances = self.balances.lock().await;
        balances.get(&(user_id, currency.clone())).copied().unwrap_or(Amount::ZERO)
    }

    /// Sum of every balance in `currency` (conservation checks).
    pub async fn total(&self, currency: &Currency) -> Amount {
        let balances = self.balances.lock().await;
        balances
            .iter()
            .filter(|((_, c), _)| c == currency)
            .fold(Amount::ZERO, |acc, (_, amount)| acc.saturating_add(*amount))
    }
}

#[async_trait]
impl WalletAdapter for InMemoryWallet {
    async fn debit(&self, user_id: UserId, currency: &Currency, amount: Amount)
        -> Result<(), WalletError> {
        let mut balances = self.balances.lock().await;
        let entry = balances.entry((user_id, currency.clone())).or_insert(Amount::ZERO);
        match entry.checked_sub(amount) {
            Some(remaining) => {
                *entry = remaining;
                Ok(())
            }
            None => Err(WalletError::InsufficientFunds),
        }
    }

    async fn credit(&self, user_id: UserId, currency: &Currency, amount: Amount)
        -> Result<(), WalletError> {
        let mut balances = self.balances.lock().await;
        let entry = balances.entry((user_id, currency.clone())).or_insert(Amount::ZERO);
        *entry = entry.saturating_add(amount);
        Ok(())
    }
}

// =============================================================================
// REWARD POOL IMPLEMENTATIONS
// =============================================================================

/// Reward pool that only logs contributions. Used by the standalone binary
/// until a real pool service is wired in.
#[derive(Default)]
pub struct LoggingRewardPool;

#[async_trait]
impl RewardPool for LoggingRewardPool {
    async fn contribute(&self, contribution: Contribution) -> Result<(), RewardPoolError> {
        tracing::debug!(
            user = %contribution.user_id.to_uuid_string(),
            stake = %contribution.stake,
            site = %contribution.site_id,
            game = %contribution.game_type,
            "reward pool contribution"
        );
        Ok(())
    }
}

/// Reward pool that always fails. Settlement must shrug it off.
#[cfg(test)]
pub struct FailingRewardPool;

#[cfg(test)]
#[async_trait]
impl RewardPool for FailingRewardPool {
    async fn contribute(&self, _contribution: Contribution) -> Result<(), RewardPoolError> {
        Err(RewardPoolError("pool offline".into()))
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

    #[tokio::test]
    async fn test_debit_credit() {
        let wallet = InMemoryWallet::new();
        let usdt = Currency::usdt();
        wallet.deposit(user(1), &usdt, Amount::from_cents(10_000)).await;

        wallet.debit(user(1), &usdt, Amount::from_cents(1_000)).await.unwrap();
        assert_eq!(wallet.balance(user(1), &usdt).await, Amount::from_cents(9_000));

        wallet.credit(user(1), &usdt, Amount::from_cents(2_160)).await.unwrap();
        assert_eq!(wallet.balance(user(1), &usdt).await, Amount::from_cents(11_160));
    }

    #[tokio::test]
    async fn test_insufficient_funds_moves_nothing() {
        let wallet = InMemoryWallet::new();
        let usdt = Currency::usdt();
        wallet.deposit(user(1), &usdt, Amount::from_cents(500)).await;

        let result = wallet.debit(user(1), &usdt, Amount::from_cents(501)).await;
        assert_eq!(result, Err(WalletError::InsufficientFunds));
        assert_eq!(wallet.balance(user(1), &usdt).await, Amount::from_cents(500));
    }

    #[tokio::test]
    async fn test_currencies_isolated() {
        let wallet = InMemoryWallet::new();
        wallet.deposit(user(1), &Currency::usdt(), Amount::from_cents(100)).await;

        assert_eq!(wallet.balance(user(1), &Currency::usdc()).await, Amount::ZERO);
        let result = wallet.debit(user(1), &Currency::usdc(), Amount::from_cents(1)).await;
        assert_eq!(result, Err(WalletError::InsufficientFunds));
    }

    #[tokio::test]
    async fn test_concurrent_debits_serialize() {
        use std::sync::Arc;

        // 20 tasks race to debit 10.00 from a 100.00 balance: exactly 10
        // succeed, and the account never goes negative.
        let wallet = Arc::new(InMemoryWallet::new());
        let usdt = Currency::usdt();
        wallet.deposit(user(1), &usdt, Amount::from_cents(10_000)).await;

        let mut handles = Vec::new();
        for _ in 0..20 {
            let wallet = wallet.clone();
            let usdt = usdt.clone();
            handles.push(tokio::spawn(async move {
                wallet.debit(user(1), &usdt, Amount::from_cents(1_000)).await.is_ok()
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 10);
        assert_eq!(wallet.balance(user(1), &usdt).await, Amount::ZERO);
    }

    #[tokio::test]
    async fn test_total_sums_currency() {
        let wallet = InMemoryWallet::new();
        let usdt = Currency::usdt();
        wallet.deposit(user(1), &usdt, Amount::from_cents(100)).await;
        wallet.deposit(user(2), &usdt, Amount::from_cents(250)).await;
        wallet.deposit(user(3), &Currency::usdc(), Amount::from_cents(999)).await;

        assert_eq!(wallet.total(&usdt).await, Amount::from_cents(350));
    }
}
