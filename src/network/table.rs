//! Table Registry
//!
//! One engine task per table; the registry hands out handles. Tables are
//! independent: rounds on different tables share nothing but the wallet.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::game::engine::{EngineConfig, EngineHandle, RoundEngine};
use crate::game::GameError;
use crate::wallet::{RewardPool, WalletAdapter};

/// Unique table identifier.
pub type TableId = [u8; 16];

/// Configuration for one table.
#[derive(Clone, Debug)]
pub struct TableConfig {
    /// Table identifier.
    pub table_id: TableId,
    /// Display name.
    pub name: String,
    /// Engine parameters (seeds, edge, cadence, currency, site).
    pub engine: EngineConfig,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            table_id: *uuid::Uuid::new_v4().as_bytes(),
            name: "main".to_string(),
            engine: EngineConfig::default(),
        }
    }
}

/// A running table.
pub struct Table {
    /// Its configuration.
    pub config: TableConfig,
    /// Handle to its engine task.
    pub handle: EngineHandle,
}

/// Registry of all running tables.
pub struct TableManager {
    tables: RwLock<BTreeMap<TableId, Arc<Table>>>,
    wallet: Arc<dyn WalletAdapter>,
    reward_pool: Arc<dyn RewardPool>,
}

impl TableManager {
    /// Create an empty registry over shared collaborators.
    pub fn new(wallet: Arc<dyn WalletAdapter>, reward_pool: Arc<dyn RewardPool>) -> Self {
        Self {
            tables: RwLock::new(BTreeMap::new()),
            wallet,
            reward_pool,
        }
    }

    /// Spawn a table's engine and register it.
    pub async fn create_table(&self, config: TableConfig) -> Result<TableId, GameError> {
        let table_id = config.table_id;
        let handle = RoundEngine::spawn(
            config.engine.clone(),
            self.wallet.clone(),
            self.reward_pool.clone(),
        )?;

        let mut tables = self.tables.write().await;
        tables.insert(table_id, Arc::new(Table { config, handle }));
        Ok(table_id)
    }

    /// Look up a running table.
    pub async fn get(&self, table_id: &TableId) -> Option<Arc<Table>> {
        let tables = self.tables.read().await;
        tables.get(table_id).cloned()
    }

    /// Number of running tables.
    pub async fn count(&self) -> usize {
        self.tables.read().await.len()
    }

    /// Drop a table. Its engine task ends once every handle is gone.
    pub async fn remove(&self, table_id: &TableId) {
        let mut tables = self.tables.write().await;
        tables.remove(table_id);
    }
}

// =============================================================================
// TESTS
// =============================================================================
