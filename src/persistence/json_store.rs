//! JSON file store
//!
//! Layout under the data directory:
//! - `trades.jsonl`    one TradeRecord per line, append-only
//! - `positions.json`  map of mint -> Position
//! - `lifecycle.json`  map of mint -> LifecycleRecord
//!
//! Snapshots are written to a temp file and renamed into place.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{LifecycleFilter, LifecycleRecord, MemoryStore, Store, TokenState, TradeRecord};
use crate::error::{Error, Result};
use crate::position::{Position, PositionUpdate};

const TRADES_FILE: &str = "trades.jsonl";
const POSITIONS_FILE: &str = "positions.json";
const LIFECYCLE_FILE: &str = "lifecycle.json";

/// File-backed store with an in-memory working set
pub struct JsonStore {
    dir: PathBuf,
    inner: MemoryStore,
    /// Serializes file writes
    write_lock: Mutex<()>,
}

impl JsonStore {
    /// Open (or create) a store in `dir`, loading any existing data
    pub async fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Persistence(format!("create {}: {}", dir.display(), e)))?;

        let trades = load_trades(&dir.join(TRADES_FILE)).await?;
        let positions: HashMap<String, Position> =
            load_snapshot(&dir.join(POSITIONS_FILE)).await?;
        let lifecycle: HashMap<String, LifecycleRecord> =
            load_snapshot(&dir.join(LIFECYCLE_FILE)).await?;

        info!(
            "Loaded {} trades, {} positions, {} lifecycle records from {}",
            trades.len(),
            positions.len(),
            lifecycle.len(),
            dir.display()
        );

        Ok(Self {
            dir,
            inner: MemoryStore::from_parts(trades, positions, lifecycle),
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn flush_positions(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let snapshot = self.inner.positions_snapshot().await;
        write_snapshot(&self.dir.join(POSITIONS_FILE), &snapshot).await
    }

    async fn flush_lifecycle(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let snapshot = self.inner.lifecycle_snapshot().await;
        write_snapshot(&self.dir.join(LIFECYCLE_FILE), &snapshot).await
    }
}

async fn load_trades(path: &Path) -> Result<Vec<TradeRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::Persistence(format!("read {}: {}", path.display(), e)))?;

    let mut trades = Vec::new();
    for (line_no, line) in data.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TradeRecord>(line) {
            Ok(trade) => trades.push(trade),
            // A torn final line from a crash mid-append is skipped, not fatal
            Err(e) => warn!("Skipping unreadable ledger line {}: {}", line_no + 1, e),
        }
    }
    Ok(trades)
}

async fn load_snapshot<T>(path: &Path) -> Result<HashMap<String, T>>
where
    T: serde::de::DeserializeOwned,
{
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let data = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::Persistence(format!("read {}: {}", path.display(), e)))?;
    serde_json::from_str(&data)
        .map_err(|e| Error::Deserialization(format!("{}: {}", path.display(), e)))
}

async fn write_snapshot<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, data)
        .await
        .map_err(|e| Error::Persistence(format!("write {}: {}", tmp.display(), e)))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| Error::Persistence(format!("rename {}: {}", path.display(), e)))
}

#[async_trait]
impl Store for JsonStore {
    async fn append_trade(&self, record: TradeRecord) -> Result<TradeRecord> {
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        {
            let _guard = self.write_lock.lock().await;
            let path = self.dir.join(TRADES_FILE);
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|e| Error::Persistence(format!("open {}: {}", path.display(), e)))?;
            file.write_all(line.as_bytes())
                .await
                .map_err(|e| Error::Persistence(format!("append {}: {}", path.display(), e)))?;
            file.flush()
                .await
                .map_err(|e| Error::Persistence(format!("flush {}: {}", path.display(), e)))?;
        }

        self.inner.append_trade(record).await
    }

    async fn trades(&self) -> Result<Vec<TradeRecord>> {
        self.inner.trades().await
    }

    async fn get_open_positions(&self) -> Result<Vec<Position>> {
        self.inner.get_open_positions().await
    }

    async fn get_position(&self, mint: &str) -> Result<Option<Position>> {
        self.inner.get_position(mint).await
    }

    async fn save_position(&self, position: Position) -> Result<()> {
        self.inner.save_position(position).await?;
        self.flush_positions().await
    }

    async fn update_position_metadata(
        &self,
        mint: &str,
        update: PositionUpdate,
    ) -> Result<Position> {
        let position = self.inner.update_position_metadata(mint, update).await?;
        self.flush_positions().await?;
        Ok(position)
    }

    async fn upsert_lifecycle_state(
        &self,
        mint: &str,
        state: TokenState,
        attributes: Value,
    ) -> Result<LifecycleRecord> {
        let record = self
            .inner
            .upsert_lifecycle_state(mint, state, attributes)
            .await?;
        self.flush_lifecycle().await?;
        Ok(record)
    }

    async fn get_lifecycle(&self, mint: &str) -> Result<Option<LifecycleRecord>> {
        self.inner.get_lifecycle(mint).await
    }

    async fn get_tokens_by_states(
        &self,
        states: &[TokenState],
        filter: &LifecycleFilter,
    ) -> Result<Vec<LifecycleRecord>> {
        self.inner.get_tokens_by_states(states, filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::TradeReason;
    use serde_json::json;

    #[tokio::test]
    async fn test_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = JsonStore::open(dir.path()).await.unwrap();
            store
                .append_trade(TradeRecord::buy(TradeReason::FirstTranche, "m", 1000, 0.6, "s1", true))
                .await
                .unwrap();
            store
                .save_position(Position::open("m", "pool", 1000, 0.6, true))
                .await
                .unwrap();
            store
                .update_position_metadata("m", PositionUpdate::default().with_tier(0).with_remaining(70.0))
                .await
                .unwrap();
            store
                .upsert_lifecycle_state("m", TokenState::Bought, json!({"pool": "pool"}))
                .await
                .unwrap();
        }

        let store = JsonStore::open(dir.path()).await.unwrap();
        assert_eq!(store.trades().await.unwrap().len(), 1);
        let position = store.get_position("m").await.unwrap().unwrap();
        assert_eq!(position.remaining_pct, 70.0);
        assert!(position.tier_sold[0]);
        let lifecycle = store.get_lifecycle("m").await.unwrap().unwrap();
        assert_eq!(lifecycle.state, TokenState::Bought);
    }

    #[tokio::test]
    async fn test_torn_ledger_line_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let record = TradeRecord::buy(TradeReason::FirstTranche, "m", 10, 0.1, "s1", false);
        let mut data = serde_json::to_string(&record).unwrap();
        data.push('\n');
        data.push_str("{\"id\": \"trunc");
        tokio::fs::write(dir.path().join(TRADES_FILE), data).await.unwrap();

        let store = JsonStore::open(dir.path()).await.unwrap();
        assert_eq!(store.trades().await.unwrap().len(), 1);
    }
}
