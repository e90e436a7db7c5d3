//! Persistence - trade ledger, position metadata and token lifecycle
//!
//! The engine only talks to the [`Store`] trait. `MemoryStore` backs tests and
//! dry runs; `JsonStore` keeps the same data on disk.

pub mod json_store;
pub mod ledger;
pub mod lifecycle;
pub mod memory;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::position::{Position, PositionUpdate};

pub use json_store::JsonStore;
pub use ledger::{LedgerSummary, TradeReason, TradeRecord, TradeSide};
pub use lifecycle::{LifecycleFilter, LifecycleRecord, TokenState};
pub use memory::MemoryStore;

/// Storage collaborator
#[async_trait]
pub trait Store: Send + Sync {
    /// Append an immutable trade record
    async fn append_trade(&self, record: TradeRecord) -> Result<TradeRecord>;

    /// Full ledger in insertion order
    async fn trades(&self) -> Result<Vec<TradeRecord>>;

    async fn get_open_positions(&self) -> Result<Vec<Position>>;

    async fn get_position(&self, mint: &str) -> Result<Option<Position>>;

    /// Insert or replace a position
    async fn save_position(&self, position: Position) -> Result<()>;

    /// Apply a partial update and return the new position
    async fn update_position_metadata(&self, mint: &str, update: PositionUpdate)
        -> Result<Position>;

    /// Create or advance a mint's lifecycle record, merging `attributes`
    async fn upsert_lifecycle_state(
        &self,
        mint: &str,
        state: TokenState,
        attributes: Value,
    ) -> Result<LifecycleRecord>;

    async fn get_lifecycle(&self, mint: &str) -> Result<Option<LifecycleRecord>>;

    async fn get_tokens_by_states(
        &self,
        states: &[TokenState],
        filter: &LifecycleFilter,
    ) -> Result<Vec<LifecycleRecord>>;
}
