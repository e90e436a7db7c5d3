//! Position store handle shared by the tranche engine and the monitor
//!
//! All read-modify-write cycles on a position happen under that mint's lock.
//! Exit bookkeeping that fails to persist is queued and replayed later; the
//! locally applied result shadows the stale stored copy until then.

use dashmap::DashMap;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use super::types::{Position, PositionUpdate};
use crate::error::{Error, Result};
use crate::persistence::{Store, TokenState, TradeRecord};

/// A write that could not be persisted yet
#[derive(Debug, Clone)]
pub enum PendingWrite {
    Trade(TradeRecord),
    Update { mint: String, update: PositionUpdate },
    Lifecycle {
        mint: String,
        state: TokenState,
        attributes: Value,
    },
}

/// Outcome of booking an exit
#[derive(Debug, Clone)]
pub struct BookedExit {
    pub position: Position,
    pub trade: TradeRecord,
    /// False when any part was queued for retry
    pub persisted: bool,
}

pub struct PositionStore {
    store: Arc<dyn Store>,
    locks: DashMap<String, Arc<AsyncMutex<()>>>,
    pending: Mutex<VecDeque<PendingWrite>>,
    shadow: DashMap<String, Position>,
}

impl PositionStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
            pending: Mutex::new(VecDeque::new()),
            shadow: DashMap::new(),
        }
    }

    /// Underlying persistence handle
    pub fn backend(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Acquire the per-mint lock
    ///
    /// Hold the guard across the whole decide-swap-update cycle.
    pub async fn lock(&self, mint: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(mint.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Current view of a position, preferring unflushed local state
    pub async fn get(&self, mint: &str) -> Result<Option<Position>> {
        if let Some(local) = self.shadow.get(mint) {
            return Ok(Some(local.clone()));
        }
        self.store.get_position(mint).await
    }

    /// All open positions, with unflushed local state applied
    pub async fn open_positions(&self) -> Result<Vec<Position>> {
        let mut positions = self.store.get_open_positions().await?;
        for position in positions.iter_mut() {
            if let Some(local) = self.shadow.get(&position.mint) {
                *position = local.clone();
            }
        }
        positions.retain(|p| p.is_open());
        Ok(positions)
    }

    /// Persist a freshly opened position
    pub async fn create(&self, position: Position) -> Result<()> {
        self.shadow.remove(&position.mint);
        self.store.save_position(position).await
    }

    /// Apply an update that must persist (entry-phase bookkeeping)
    pub async fn update(&self, mint: &str, update: PositionUpdate) -> Result<Position> {
        if self.shadow.contains_key(mint) {
            // Keep ordering behind queued writes for this mint
            let position = self.apply_local(mint, &update).await?;
            self.queue(PendingWrite::Update {
                mint: mint.to_string(),
                update,
            });
            return Ok(position);
        }
        self.store.update_position_metadata(mint, update).await
    }

    /// Book an executed sell: ledger append plus position update
    ///
    /// The swap already happened, so storage failures never surface as
    /// errors here. Failed writes are queued and the update is applied
    /// locally so the next monitor pass sees the reduced position.
    pub async fn book_exit(
        &self,
        mint: &str,
        trade: TradeRecord,
        update: PositionUpdate,
    ) -> Result<BookedExit> {
        let mut persisted = true;

        let trade = match self.store.append_trade(trade.clone()).await {
            Ok(saved) => saved,
            Err(e) => {
                error!(mint = %mint, "Ledger write failed, queued for retry: {}", e);
                self.queue(PendingWrite::Trade(trade.clone()));
                persisted = false;
                trade
            }
        };

        let position = if self.shadow.contains_key(mint) {
            persisted = false;
            let position = self.apply_local(mint, &update).await?;
            self.queue(PendingWrite::Update {
                mint: mint.to_string(),
                update,
            });
            position
        } else {
            match self.store.update_position_metadata(mint, update.clone()).await {
                Ok(position) => position,
                Err(Error::Persistence(e)) | Err(Error::Io(e)) => {
                    error!(mint = %mint, "Position write failed, queued for retry: {}", e);
                    persisted = false;
                    let position = self.apply_local(mint, &update).await?;
                    self.queue(PendingWrite::Update {
                        mint: mint.to_string(),
                        update,
                    });
                    position
                }
                Err(e) => return Err(e),
            }
        };

        Ok(BookedExit {
            position,
            trade,
            persisted,
        })
    }

    /// Record a buy fill in the ledger, queueing on failure
    pub async fn record_trade(&self, trade: TradeRecord) -> TradeRecord {
        match self.store.append_trade(trade.clone()).await {
            Ok(saved) => saved,
            Err(e) => {
                error!(mint = %trade.mint, "Ledger write failed, queued for retry: {}", e);
                self.queue(PendingWrite::Trade(trade.clone()));
                trade
            }
        }
    }

    /// Advance lifecycle state, queueing storage failures
    pub async fn set_lifecycle(&self, mint: &str, state: TokenState, attributes: Value) {
        match self
            .store
            .upsert_lifecycle_state(mint, state, attributes.clone())
            .await
        {
            Ok(_) => {}
            Err(Error::InvalidTransition { from, to, .. }) => {
                debug!(mint = %mint, "Lifecycle {} -> {} ignored", from, to);
            }
            Err(e) => {
                warn!(mint = %mint, "Lifecycle write failed, queued for retry: {}", e);
                self.queue(PendingWrite::Lifecycle {
                    mint: mint.to_string(),
                    state,
                    attributes,
                });
            }
        }
    }

    async fn apply_local(&self, mint: &str, update: &PositionUpdate) -> Result<Position> {
        let mut position = match self.shadow.get(mint) {
            Some(local) => local.clone(),
            None => self
                .store
                .get_position(mint)
                .await
                .ok()
                .flatten()
                .ok_or_else(|| Error::PositionNotFound(mint.to_string()))?,
        };
        position.apply(update)?;
        self.shadow.insert(mint.to_string(), position.clone());
        Ok(position)
    }

    fn queue(&self, write: PendingWrite) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(write);
    }

    /// Number of writes waiting for retry
    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Replay queued writes in order
    ///
    /// Stops at the first failure so per-mint ordering is preserved; returns
    /// how many writes landed.
    pub async fn flush_pending(&self) -> usize {
        let mut flushed = 0;

        loop {
            let next = {
                let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
                pending.pop_front()
            };
            let Some(write) = next else { break };

            // Holders of the mint lock see the shadow and the store agree
            let _guard = match &write {
                PendingWrite::Update { mint, .. } => Some(self.lock(mint).await),
                _ => None,
            };

            let result = match &write {
                PendingWrite::Trade(trade) => self.store.append_trade(trade.clone()).await.map(|_| ()),
                PendingWrite::Update { mint, update } => self
                    .store
                    .update_position_metadata(mint, update.clone())
                    .await
                    .map(|_| ()),
                PendingWrite::Lifecycle {
                    mint,
                    state,
                    attributes,
                } => self
                    .store
                    .upsert_lifecycle_state(mint, *state, attributes.clone())
                    .await
                    .map(|_| ()),
            };

            match result {
                Ok(()) => {
                    flushed += 1;
                    if let PendingWrite::Update { mint, .. } = &write {
                        if !self.has_pending_update(mint) {
                            self.shadow.remove(mint);
                        }
                    }
                }
                Err(e @ Error::Persistence(_)) | Err(e @ Error::Io(_)) => {
                    warn!("Pending write still failing: {}", e);
                    self.pending
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push_front(write);
                    break;
                }
                Err(e) => {
                    // Not a storage fault, retrying cannot help
                    error!("Dropping pending write that the store rejected: {}", e);
                    if let PendingWrite::Update { mint, .. } = &write {
                        if !self.has_pending_update(mint) {
                            self.shadow.remove(mint);
                        }
                    }
                }
            }
        }

        if flushed > 0 {
            info!("Flushed {} pending write(s)", flushed);
        }
        flushed
    }

    fn has_pending_update(&self, mint: &str) -> bool {
        self.pending
            .lock()
            .map(|p| {
                p.iter()
                    .any(|w| matches!(w, PendingWrite::Update { mint: m, .. } if m == mint))
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Store wrapper that can be told to fail writes

    use super::*;
    use crate::persistence::{LifecycleFilter, LifecycleRecord, MemoryStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    pub struct FlakyStore {
        pub inner: MemoryStore,
        pub fail_writes: AtomicBool,
    }

    impl FlakyStore {
        fn check(&self) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                Err(Error::Persistence("disk unavailable".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl Store for FlakyStore {
        async fn append_trade(&self, record: TradeRecord) -> Result<TradeRecord> {
            self.check()?;
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
            self.check()?;
            self.inner.save_position(position).await
        }
        async fn update_position_metadata(
            &self,
            mint: &str,
            update: PositionUpdate,
        ) -> Result<Position> {
            self.check()?;
            self.inner.update_position_metadata(mint, update).await
        }
        async fn upsert_lifecycle_state(
            &self,
            mint: &str,
            state: TokenState,
            attributes: Value,
        ) -> Result<LifecycleRecord> {
            self.check()?;
            self.inner.upsert_lifecycle_state(mint, state, attributes).await
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
}

#[cfg(test)]
mod tests {
    use super::testing::FlakyStore;
    use super::*;
    use crate::persistence::{MemoryStore, TradeReason};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_mint_updates_serialize() {
        let store = Arc::new(PositionStore::new(Arc::new(MemoryStore::new())));
        store
            .create(Position::open("m", "p", 1000, 1.0, true))
            .await
            .unwrap();

        let first = store.lock("m").await;
        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let _guard = store.lock("m").await;
                store
                    .update("m", PositionUpdate::default().with_remaining(40.0))
                    .await
                    .unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());
        store
            .update("m", PositionUpdate::default().with_remaining(70.0))
            .await
            .unwrap();
        drop(first);

        let position = contender.await.unwrap();
        assert_eq!(position.remaining_pct, 40.0);
    }

    #[tokio::test]
    async fn test_different_mints_do_not_block() {
        let store = PositionStore::new(Arc::new(MemoryStore::new()));
        let _a = store.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), store.lock("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_failed_exit_write_is_queued_and_shadowed() {
        let backend = Arc::new(FlakyStore::default());
        let store = PositionStore::new(backend.clone());
        store
            .create(Position::open("m", "p", 1000, 1.0, true))
            .await
            .unwrap();

        backend.fail_writes.store(true, Ordering::SeqCst);
        let trade = TradeRecord::sell(TradeReason::StopLoss, "m", 1000, 0.9, -0.1, "sig", true);
        let booked = store
            .book_exit(
                "m",
                trade,
                PositionUpdate::default()
                    .with_sale(1000, 0.9, -0.1)
                    .closing("stop loss"),
            )
            .await
            .unwrap();

        assert!(!booked.persisted);
        assert_eq!(booked.position.remaining_pct, 0.0);
        assert_eq!(store.pending_count(), 2);
        // Stale stored copy is hidden
        assert!(store.open_positions().await.unwrap().is_empty());

        assert_eq!(store.flush_pending().await, 0);
        assert_eq!(store.pending_count(), 2);

        backend.fail_writes.store(false, Ordering::SeqCst);
        assert_eq!(store.flush_pending().await, 2);
        assert_eq!(store.pending_count(), 0);
        assert_eq!(backend.inner.trades().await.unwrap().len(), 1);
        let stored = backend.inner.get_position("m").await.unwrap().unwrap();
        assert_eq!(stored.remaining_pct, 0.0);
    }

    #[tokio::test]
    async fn test_flush_waits_for_mint_lock() {
        let backend = Arc::new(FlakyStore::default());
        let store = Arc::new(PositionStore::new(backend.clone()));
        store
            .create(Position::open("m", "p", 1000, 1.0, true))
            .await
            .unwrap();

        backend.fail_writes.store(true, Ordering::SeqCst);
        let trade = TradeRecord::sell(TradeReason::TierExit(0), "m", 300, 0.4, 0.1, "sig", true);
        store
            .book_exit(
                "m",
                trade,
                PositionUpdate::default()
                    .with_sale(300, 0.4, 0.1)
                    .with_remaining(70.0),
            )
            .await
            .unwrap();
        backend.fail_writes.store(false, Ordering::SeqCst);

        let guard = store.lock("m").await;
        let flush = {
            let store = store.clone();
            tokio::spawn(async move { store.flush_pending().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        // Ledger entry landed, the position update waits for the lock
        assert!(!flush.is_finished());
        assert_eq!(backend.inner.trades().await.unwrap().len(), 1);

        // The lock holder still sees the shadow and queues behind it
        let local = store
            .update("m", PositionUpdate::default().with_remaining(40.0))
            .await
            .unwrap();
        assert_eq!(local.remaining_pct, 40.0);
        drop(guard);

        assert_eq!(flush.await.unwrap(), 3);
        assert_eq!(store.pending_count(), 0);
        let stored = backend.inner.get_position("m").await.unwrap().unwrap();
        assert_eq!(stored.remaining_pct, 40.0);
        assert_eq!(store.get("m").await.unwrap().unwrap().remaining_pct, 40.0);
        assert!(
            tokio::time::timeout(Duration::from_millis(100), store.lock("m"))
                .await
                .is_ok()
        );
    }
}

