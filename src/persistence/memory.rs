//! In-memory store

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::{LifecycleFilter, LifecycleRecord, Store, TokenState, TradeRecord};
use crate::error::{Error, Result};
use crate::position::{Position, PositionUpdate};

/// Store kept entirely in memory
#[derive(Default, Clone)]
pub struct MemoryStore {
    trades: Arc<RwLock<Vec<TradeRecord>>>,
    positions: Arc<RwLock<HashMap<String, Position>>>,
    lifecycle: Arc<RwLock<HashMap<String, LifecycleRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with loaded data
    pub fn from_parts(
        trades: Vec<TradeRecord>,
        positions: HashMap<String, Position>,
        lifecycle: HashMap<String, LifecycleRecord>,
    ) -> Self {
        Self {
            trades: Arc::new(RwLock::new(trades)),
            positions: Arc::new(RwLock::new(positions)),
            lifecycle: Arc::new(RwLock::new(lifecycle)),
        }
    }

    pub(crate) async fn positions_snapshot(&self) -> HashMap<String, Position> {
        self.positions.read().await.clone()
    }

    pub(crate) async fn lifecycle_snapshot(&self) -> HashMap<String, LifecycleRecord> {
        self.lifecycle.read().await.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn append_trade(&self, record: TradeRecord) -> Result<TradeRecord> {
        let mut trades = self.trades.write().await;
        trades.push(record.clone());
        debug!(
            "Ledger: {} {} {} tokens for {:.6} SOL ({})",
            record.side, record.mint, record.token_amount, record.sol_amount, record.reason
        );
        Ok(record)
    }

    async fn trades(&self) -> Result<Vec<TradeRecord>> {
        Ok(self.trades.read().await.clone())
    }

    async fn get_open_positions(&self) -> Result<Vec<Position>> {
        let positions = self.positions.read().await;
        let mut open: Vec<Position> = positions.values().filter(|p| p.is_open()).cloned().collect();
        open.sort_by(|a, b| a.opened_at.cmp(&b.opened_at));
        Ok(open)
    }

    async fn get_position(&self, mint: &str) -> Result<Option<Position>> {
        Ok(self.positions.read().await.get(mint).cloned())
    }

    async fn save_position(&self, position: Position) -> Result<()> {
        self.positions
            .write()
            .await
            .insert(position.mint.clone(), position);
        Ok(())
    }

    async fn update_position_metadata(
        &self,
        mint: &str,
        update: PositionUpdate,
    ) -> Result<Position> {
        let mut positions = self.positions.write().await;
        let position = positions
            .get_mut(mint)
            .ok_or_else(|| Error::PositionNotFound(mint.to_string()))?;

        // Apply to a copy so a rejected update leaves the stored record untouched
        let mut updated = position.clone();
        updated.apply(&update)?;
        *position = updated.clone();
        Ok(updated)
    }

    async fn upsert_lifecycle_state(
        &self,
        mint: &str,
        state: TokenState,
        attributes: Value,
    ) -> Result<LifecycleRecord> {
        let mut lifecycle = self.lifecycle.write().await;
        let record = lifecycle
            .entry(mint.to_string())
            .or_insert_with(|| LifecycleRecord::new(mint, state));

        let mut updated = record.clone();
        updated.advance(state, attributes)?;
        *record = updated.clone();
        Ok(updated)
    }

    async fn get_lifecycle(&self, mint: &str) -> Result<Option<LifecycleRecord>> {
        Ok(self.lifecycle.read().await.get(mint).cloned())
    }

    async fn get_tokens_by_states(
        &self,
        states: &[TokenState],
        filter: &LifecycleFilter,
    ) -> Result<Vec<LifecycleRecord>> {
        let lifecycle = self.lifecycle.read().await;
        let mut records: Vec<LifecycleRecord> = lifecycle
            .values()
            .filter(|r| states.contains(&r.state) && filter.matches(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        if let Some(limit) = filter.limit {
            records.truncate(limit);
        }
        Ok(records)
    }
}
