//! PumpPortal WebSocket listener for pool discovery
//!
//! New tokens start on a bonding curve; their SOL reserve is cached from the
//! create event. A migration event means a real pool exists: the listener
//! builds a [`PoolCandidate`] with the last cached reserve as its liquidity
//! and enqueues it.
//!
//! WebSocket endpoint: wss://pumpportal.fun/api/data

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::queue::IngestionQueue;
use super::types::PoolCandidate;
use crate::config::ListenerConfig;
use crate::error::{Error, Result};
use crate::notify::{EngineEvent, Notifier};
use crate::persistence::TokenState;
use crate::position::PositionStore;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionMessage {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<String>>,
}

impl SubscriptionMessage {
    pub fn subscribe_new_tokens() -> Self {
        Self {
            method: "subscribeNewToken".to_string(),
            keys: None,
        }
    }

    /// Bonding curve completions that seed a pool
    pub fn subscribe_migrations() -> Self {
        Self {
            method: "subscribeMigration".to_string(),
            keys: None,
        }
    }
}

/// Any PumpPortal data message; fields vary by `txType`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalMessage {
    #[serde(default)]
    pub signature: Option<String>,
    pub mint: String,
    pub tx_type: String,
    #[serde(default)]
    pub bonding_curve_key: Option<String>,
    /// Virtual SOL reserve of the bonding curve, in SOL
    #[serde(default)]
    pub v_sol_in_bonding_curve: Option<f64>,
    #[serde(default)]
    pub pool: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
}

struct CachedReserve {
    sol: f64,
    seen: Instant,
}

/// Bounded TTL cache of bonding-curve SOL reserves per mint
pub struct ReserveCache {
    entries: DashMap<String, CachedReserve>,
    ttl: Duration,
    max_entries: usize,
}

impl ReserveCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn insert(&self, mint: &str, sol: f64) {
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(mint) {
            self.evict();
        }
        self.entries.insert(
            mint.to_string(),
            CachedReserve {
                sol,
                seen: Instant::now(),
            },
        );
    }

    pub fn get(&self, mint: &str) -> Option<f64> {
        let entry = self.entries.get(mint)?;
        if entry.seen.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(mint);
            return None;
        }
        Some(entry.sol)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries, then the oldest if still full
    fn evict(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, v| v.seen.elapsed() <= ttl);
        if self.entries.len() < self.max_entries {
            return;
        }
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.value().seen)
            .map(|e| e.key().clone());
        if let Some(mint) = oldest {
            self.entries.remove(&mint);
        }
    }
}

pub struct PoolListener {
    config: ListenerConfig,
    queue: Arc<IngestionQueue<PoolCandidate>>,
    positions: Arc<PositionStore>,
    notifier: Notifier,
    reserves: ReserveCache,
    connected: AtomicBool,
}

impl PoolListener {
    pub fn new(
        config: ListenerConfig,
        queue: Arc<IngestionQueue<PoolCandidate>>,
        positions: Arc<PositionStore>,
        notifier: Notifier,
    ) -> Self {
        let reserves = ReserveCache::new(
            Duration::from_secs(config.liquidity_cache_ttl_secs),
            config.liquidity_cache_max_entries,
        );
        Self {
            config,
            queue,
            positions,
            notifier,
            reserves,
            connected: AtomicBool::new(false),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn reserves(&self) -> &ReserveCache {
        &self.reserves
    }

    /// Connect, stream and reconnect until cancelled or out of attempts
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!("Starting pool listener: {}", self.config.ws_url);
        let mut reconnect_attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.connect_and_stream(&cancel).await {
                Ok(()) => reconnect_attempts = 0,
                Err(e) => {
                    error!("Listener connection error: {}", e);
                    reconnect_attempts += 1;
                }
            }
            self.set_connected(false, "disconnected");

            if cancel.is_cancelled() {
                break;
            }
            if self.config.max_reconnect_attempts > 0
                && reconnect_attempts >= self.config.max_reconnect_attempts
            {
                return Err(Error::ListenerConnection(format!(
                    "gave up after {} reconnect attempts",
                    reconnect_attempts
                )));
            }

            let delay = Duration::from_millis(self.config.reconnect_delay_ms);
            warn!("Reconnecting in {:?}...", delay);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        info!("Pool listener stopped");
        Ok(())
    }

    fn set_connected(&self, connected: bool, detail: &str) {
        if self.connected.swap(connected, Ordering::AcqRel) != connected {
            self.notifier.emit(EngineEvent::ListenerStatus {
                connected,
                detail: detail.to_string(),
            });
        }
    }

    async fn connect_and_stream(&self, cancel: &CancellationToken) -> Result<()> {
        let url = url::Url::parse(&self.config.ws_url)
            .map_err(|e| Error::Config(format!("Invalid WebSocket URL: {}", e)))?;

        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::ListenerConnection(format!("WebSocket connect failed: {}", e)))?;
        let (mut write, mut read) = ws_stream.split();

        for msg in [
            SubscriptionMessage::subscribe_new_tokens(),
            SubscriptionMessage::subscribe_migrations(),
        ] {
            let text = serde_json::to_string(&msg).map_err(|e| Error::Serialization(e.to_string()))?;
            write
                .send(Message::Text(text))
                .await
                .map_err(|e| Error::ListenerConnection(format!("Failed to subscribe: {}", e)))?;
        }
        self.set_connected(true, &self.config.ws_url);
        info!("Subscribed to new tokens and migrations");

        let mut ping_timer =
            tokio::time::interval(Duration::from_secs(self.config.ping_interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = ping_timer.tick() => {
                    write
                        .send(Message::Ping(vec![]))
                        .await
                        .map_err(|e| Error::ListenerConnection(format!("Ping failed: {}", e)))?;
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        self.handle_message(&text).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("WebSocket closed by server");
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        return Err(Error::ListenerConnection(e.to_string()));
                    }
                    None => {
                        info!("WebSocket stream ended");
                        return Ok(());
                    }
                    _ => {}
                }
            }
        }
    }

    /// Route one text frame; returns the candidate it enqueued, if any
    pub async fn handle_message(&self, text: &str) -> Option<PoolCandidate> {
        let message: PortalMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(_) => {
                debug!("Ignoring message: {}", preview(text, 100));
                return None;
            }
        };

        match message.tx_type.as_str() {
            "create" => {
                self.on_new_token(&message).await;
                None
            }
            "migrate" => self.on_migration(&message).await,
            "buy" | "sell" => {
                // Keep the reserve fresh for mints still on the curve
                if let Some(sol) = message.v_sol_in_bonding_curve {
                    self.reserves.insert(&message.mint, sol);
                }
                None
            }
            other => {
                debug!(mint = %message.mint, "Ignoring txType {}", other);
                None
            }
        }
    }

    async fn on_new_token(&self, message: &PortalMessage) {
        if let Some(sol) = message.v_sol_in_bonding_curve {
            self.reserves.insert(&message.mint, sol);
        }
        debug!(
            mint = %message.mint,
            symbol = message.symbol.as_deref().unwrap_or("?"),
            "New token on bonding curve"
        );
        self.positions
            .set_lifecycle(
                &message.mint,
                TokenState::Detected,
                json!({
                    "name": message.name,
                    "symbol": message.symbol,
                    "bonding_curve": message.bonding_curve_key,
                }),
            )
            .await;
        self.positions
            .set_lifecycle(&message.mint, TokenState::AwaitingGraduation, json!({}))
            .await;
    }

    async fn on_migration(&self, message: &PortalMessage) -> Option<PoolCandidate> {
        let mint = message.mint.as_str();
        if let Ok(Some(record)) = self.positions.backend().get_lifecycle(mint).await {
            if record.state == TokenState::Blacklisted {
                self.notifier.emit(EngineEvent::CandidateSkipped {
                    mint: mint.to_string(),
                    reason: "blacklisted".to_string(),
                });
                return None;
            }
        }

        // Unknown reserve fails the liquidity floor downstream
        let liquidity = self.reserves.get(mint).unwrap_or(0.0);
        let pool = message
            .pool
            .clone()
            .or_else(|| message.bonding_curve_key.clone())
            .unwrap_or_else(|| "unknown".to_string());
        let candidate = PoolCandidate::new(mint, pool, liquidity);

        self.positions
            .set_lifecycle(
                mint,
                TokenState::PoolCreated,
                json!({
                    "pool": candidate.pool,
                    "liquidity_sol": liquidity,
                    "migration_signature": message.signature,
                }),
            )
            .await;

        info!(mint = %mint, liquidity_sol = liquidity, "Pool detected");
        self.notifier.emit(EngineEvent::CandidateDetected {
            mint: mint.to_string(),
            pool: candidate.pool.clone(),
            liquidity_sol: liquidity,
        });
        if let Some(evicted) = self.queue.enqueue(candidate.clone()) {
            self.notifier.emit(EngineEvent::CandidateSkipped {
                mint: evicted.mint,
                reason: "ingestion queue overflow".to_string(),
            });
        }
        Some(candidate)
    }
}

/// At most `max_chars` leading characters of `text`
fn preview(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Open and close one connection to `ws_url`
pub async fn check_reachable(ws_url: &str, timeout: Duration) -> Result<()> {
    let url = url::Url::parse(ws_url)
        .map_err(|e| Error::Config(format!("Invalid WebSocket URL: {}", e)))?;
    let (mut ws, _) = tokio::time::timeout(timeout, connect_async(url))
        .await
        .map_err(|_| Error::ListenerConnection("connect timed out".to_string()))?
        .map_err(|e| Error::ListenerConnection(e.to_string()))?;
    let _ = ws.close(None).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemoryStore, Store};

    struct Harness {
        queue: Arc<IngestionQueue<PoolCandidate>>,
        store: Arc<MemoryStore>,
        listener: PoolListener,
        notifier: Notifier,
    }

    fn harness(capacity: usize) -> Harness {
        let queue = Arc::new(IngestionQueue::new(capacity));
        let store = Arc::new(MemoryStore::new());
        let positions = Arc::new(PositionStore::new(store.clone()));
        let notifier = Notifier::new(64);
        let listener = PoolListener::new(
            ListenerConfig::default(),
            queue.clone(),
            positions,
            notifier.clone(),
        );
        Harness {
            queue,
            store,
            listener,
            notifier,
        }
    }

    fn create(mint: &str, sol: f64) -> String {
        json!({
            "signature": "sig",
            "mint": mint,
            "traderPublicKey": "dev",
            "txType": "create",
            "bondingCurveKey": "curve",
            "vSolInBondingCurve": sol,
            "name": "Test",
            "symbol": "TST",
        })
        .to_string()
    }

    fn migrate(mint: &str) -> String {
        json!({ "signature": "msig", "mint": mint, "txType": "migrate", "pool": "pump-amm" }).to_string()
    }

    #[test]
    fn test_subscription_messages() {
        let json = serde_json::to_string(&SubscriptionMessage::subscribe_migrations()).unwrap();
        assert_eq!(json, r#"{"method":"subscribeMigration"}"#);
    }

    #[tokio::test]
    async fn test_create_then_migrate_enqueues() {
        let h = harness(10);
        assert!(h.listener.handle_message(&create("tok", 84.5)).await.is_none());
        let record = h.store.get_lifecycle("tok").await.unwrap().unwrap();
        assert_eq!(record.state, TokenState::AwaitingGraduation);

        let mut events = h.notifier.subscribe();
        let candidate = h.listener.handle_message(&migrate("tok")).await.unwrap();
        assert_eq!(candidate.liquidity_sol, 84.5);
        assert_eq!(candidate.pool, "pump-amm");
        assert_eq!(h.queue.len(), 1);

        let record = h.store.get_lifecycle("tok").await.unwrap().unwrap();
        assert_eq!(record.state, TokenState::PoolCreated);
        assert!(matches!(
            events.recv().await.unwrap().event,
            EngineEvent::CandidateDetected { .. }
        ));
    }

    #[tokio::test]
    async fn test_unknown_reserve_is_zero_liquidity() {
        let h = harness(10);
        let candidate = h.listener.handle_message(&migrate("tok")).await.unwrap();
        assert_eq!(candidate.liquidity_sol, 0.0);
    }

    #[tokio::test]
    async fn test_blacklisted_never_enqueued() {
        let h = harness(10);
        h.store
            .upsert_lifecycle_state("bad", TokenState::Blacklisted, json!({}))
            .await
            .unwrap();
        assert!(h.listener.handle_message(&migrate("bad")).await.is_none());
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn test_overflow_reports_evicted() {
        let h = harness(1);
        let mut events = h.notifier.subscribe();
        h.listener.handle_message(&migrate("a")).await;
        h.listener.handle_message(&migrate("b")).await;

        assert_eq!(h.queue.len(), 1);
        assert_eq!(h.queue.try_pop().unwrap().mint, "b");

        let mut skipped = None;
        while let Ok(envelope) = events.try_recv() {
            if let EngineEvent::CandidateSkipped { mint, .. } = envelope.event {
                skipped = Some(mint);
            }
        }
        assert_eq!(skipped.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_garbage_ignored() {
        let h = harness(10);
        assert!(h.listener.handle_message("not json").await.is_none());
        assert!(h
            .listener
            .handle_message(r#"{"message":"Successfully subscribed"}"#)
            .await
            .is_none());
    }

    #[test]
    fn test_reserve_cache_bounds() {
        let cache = ReserveCache::new(Duration::from_secs(60), 2);
        cache.insert("a", 1.0);
        cache.insert("b", 2.0);
        cache.insert("c", 3.0);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("c"), Some(3.0));

        let expired = ReserveCache::new(Duration::from_millis(0), 10);
        expired.insert("a", 1.0);
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(expired.get("a"), None);
    }

    #[test]
    fn test_preview_stops_on_char_boundary() {
        // 99 ASCII bytes then a 4-byte emoji spanning bytes 99..103
        let text = format!("{}\u{1F680}tail", "x".repeat(99));
        assert!(!text.is_char_boundary(100));
        let cut = preview(&text, 100);
        assert_eq!(cut.chars().count(), 100);
        assert!(cut.ends_with('\u{1F680}'));
        assert_eq!(preview("short", 100), "short");
    }

    #[tokio::test]
    async fn test_unparseable_multibyte_frame_is_ignored() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        let h = harness(10);
        let frame = format!("{}\u{1F680} not json", "x".repeat(99));
        assert!(h.listener.handle_message(&frame).await.is_none());
        assert!(h.queue.is_empty());
    }
}

