//! Tranche execution
//!
//! An approved buy goes out as two fills. Between them a small test sell
//! proves the token can be sold; if it cannot, everything bought so far is
//! dumped at emergency slippage and the second fill never happens.
//!
//! Once the first buy lands, the engine always reaches either a successful
//! test sell or an emergency exit attempt.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{
    lamports_to_sol, sol_to_lamports, PullbackPolicy, TrancheConfig, LAMPORTS_PER_SOL, WSOL_MINT,
};
use crate::error::{Error, Result};
use crate::notify::{EngineEvent, Notifier};
use crate::persistence::{TokenState, TradeReason, TradeRecord};
use crate::position::{fill_price, Position, PositionStore, PositionUpdate};
use crate::stream::PoolCandidate;
use crate::trading::{buy_tokens, sell_tokens, SwapProvider, SwapResult};

/// How a tranche execution ended
#[derive(Debug, Clone, PartialEq)]
pub enum TrancheOutcome {
    /// First buy never landed; nothing is held
    Aborted { reason: String },
    /// Test sell failed; a full exit was attempted
    EmergencyExit { reason: String, exited: bool },
    /// Position open at full or first-tranche size
    Open { second_filled: bool },
}

/// Result of one tranche execution
#[derive(Debug, Clone)]
pub struct TrancheReport {
    pub mint: String,
    pub outcome: TrancheOutcome,
    /// Ledger entries written, in order
    pub trades: Vec<TradeRecord>,
    /// Position after the last step
    pub position: Option<Position>,
    pub test_sell_attempted: bool,
    pub second_tranche_attempted: bool,
}

impl TrancheReport {
    fn new(mint: &str) -> Self {
        Self {
            mint: mint.to_string(),
            outcome: TrancheOutcome::Aborted {
                reason: String::new(),
            },
            trades: Vec::new(),
            position: None,
            test_sell_attempted: false,
            second_tranche_attempted: false,
        }
    }

    /// Whether the first tranche landed
    pub fn bought(&self) -> bool {
        !matches!(self.outcome, TrancheOutcome::Aborted { .. })
    }

    pub fn is_open(&self) -> bool {
        matches!(self.outcome, TrancheOutcome::Open { .. })
    }
}

/// First fill, before the position is known to be sellable
struct FirstFill {
    tokens: u64,
    price: f64,
    tracked: bool,
}

pub struct TrancheEngine {
    provider: Arc<dyn SwapProvider>,
    positions: Arc<PositionStore>,
    notifier: Notifier,
    config: TrancheConfig,
    slippage_bps: u32,
}

impl TrancheEngine {
    pub fn new(
        provider: Arc<dyn SwapProvider>,
        positions: Arc<PositionStore>,
        notifier: Notifier,
        config: TrancheConfig,
        slippage_bps: u32,
    ) -> Self {
        Self {
            provider,
            positions,
            notifier,
            config,
            slippage_bps,
        }
    }

    /// Execute an approved buy of `notional_sol` for `candidate`
    pub async fn execute(&self, candidate: &PoolCandidate, notional_sol: f64) -> TrancheReport {
        let mint = candidate.mint.as_str();
        let mut report = TrancheReport::new(mint);

        let first_sol = notional_sol * self.config.first_tranche_pct / 100.0;
        let second_sol = notional_sol - first_sol;

        // Steps 1-2 under the mint lock so the monitor never sees a half-tested position
        let fill = {
            let _guard = self.positions.lock(mint).await;

            let fill = match self.buy_first(candidate, first_sol, &mut report).await {
                Ok(fill) => fill,
                Err(e) => {
                    info!(mint = %mint, "First tranche aborted: {}", e);
                    report.outcome = TrancheOutcome::Aborted {
                        reason: e.to_string(),
                    };
                    return report;
                }
            };

            report.test_sell_attempted = true;
            if let Err(reason) = self.test_sell(mint, &fill, &mut report).await {
                warn!(mint = %mint, "Test sell failed, exiting: {}", reason);
                let exited = self.emergency_exit(mint, &fill, &reason, &mut report).await;
                report.outcome = TrancheOutcome::EmergencyExit { reason, exited };
                report.position = self.current(mint).await;
                return report;
            }
            fill
        };

        // Step 3
        if !self.wait_for_pullback(mint, fill.price, second_sol).await
            && self.config.pullback_timeout_policy == PullbackPolicy::SkipSecondTranche
        {
            self.skip_second(mint, "pullback timed out", &mut report).await;
            return report;
        }

        // Step 4
        let _guard = self.positions.lock(mint).await;
        match self.current(mint).await {
            Some(position) if position.is_pristine() => {}
            _ => {
                self.skip_second(mint, "position already exiting", &mut report)
                    .await;
                return report;
            }
        }

        report.second_tranche_attempted = true;
        let second_filled = match self.buy_second(mint, second_sol, &mut report).await {
            Ok(()) => true,
            Err(e) => {
                warn!(mint = %mint, "Second tranche failed, holding first tranche: {}", e);
                self.notifier.emit(EngineEvent::TrancheSkipped {
                    mint: mint.to_string(),
                    reason: e.to_string(),
                });
                false
            }
        };
        report.outcome = TrancheOutcome::Open { second_filled };
        report.position = self.current(mint).await;
        report
    }

    async fn current(&self, mint: &str) -> Option<Position> {
        self.positions.get(mint).await.ok().flatten()
    }

    async fn buy_first(
        &self,
        candidate: &PoolCandidate,
        sol: f64,
        report: &mut TrancheReport,
    ) -> Result<FirstFill> {
        let mint = candidate.mint.as_str();
        let result = buy_tokens(
            self.provider.as_ref(),
            mint,
            sol_to_lamports(sol),
            self.slippage_bps,
            Some(self.config.buy_max_impact_pct),
        )
        .await?;
        if result.out_amount == 0 {
            return Err(Error::ExecutionFailure("buy returned no tokens".to_string()));
        }

        let tokens = result.out_amount;
        let spent = lamports_to_sol(result.in_amount);
        let trade = self
            .positions
            .record_trade(TradeRecord::buy(
                TradeReason::FirstTranche,
                mint,
                tokens,
                spent,
                result.signature_or_default(),
                result.simulated,
            ))
            .await;
        report.trades.push(trade);

        let position = Position::open(mint, candidate.pool.as_str(), tokens, spent, result.simulated);
        let tracked = match self.positions.create(position).await {
            Ok(()) => true,
            Err(e) => {
                error!(mint = %mint, "Position create failed after buy: {}", e);
                self.notifier.emit(EngineEvent::PersistenceError {
                    context: format!("open position {}", mint),
                    error: e.to_string(),
                });
                false
            }
        };

        self.positions
            .set_lifecycle(
                mint,
                TokenState::Bought,
                json!({
                    "first_tranche_sol": spent,
                    "first_tranche_tokens": tokens,
                    "signature": result.signature_or_default(),
                }),
            )
            .await;

        info!(
            mint = %mint,
            tokens,
            sol = spent,
            sig = %result.signature_or_default(),
            "First tranche filled"
        );
        self.notifier.emit(EngineEvent::TrancheFilled {
            mint: mint.to_string(),
            tranche: 1,
            sol_amount: spent,
            token_amount: tokens,
            signature: result.signature_or_default(),
            simulated: result.simulated,
        });

        Ok(FirstFill {
            tokens,
            price: fill_price(spent, tokens),
            tracked,
        })
    }

    /// Sell a sliver back; `Err` carries the emergency reason
    async fn test_sell(
        &self,
        mint: &str,
        fill: &FirstFill,
        report: &mut TrancheReport,
    ) -> std::result::Result<(), String> {
        if !fill.tracked {
            return Err("position could not be recorded".to_string());
        }

        let tokens = ((fill.tokens as f64 * self.config.test_sell_pct / 100.0).floor() as u64).max(1);
        let result = sell_tokens(self.provider.as_ref(), mint, tokens, self.slippage_bps, None)
            .await
            .map_err(|e| format!("test sell failed: {}", e))?;

        let proceeds = lamports_to_sol(result.out_amount);
        // Tokens left the wallet either way
        self.book_sale(mint, TradeReason::TestSell, tokens, &result, fill, report, false)
            .await;

        if result.out_amount == 0 {
            return Err("test sell returned zero proceeds".to_string());
        }
        debug!(mint = %mint, tokens, proceeds, "Test sell passed");
        Ok(())
    }

    /// Dump everything still held at emergency slippage
    async fn emergency_exit(
        &self,
        mint: &str,
        fill: &FirstFill,
        reason: &str,
        report: &mut TrancheReport,
    ) -> bool {
        let held = match self.current(mint).await {
            Some(position) => position.token_amount,
            None => fill.tokens,
        };

        match sell_tokens(
            self.provider.as_ref(),
            mint,
            held,
            self.config.emergency_slippage_bps,
            None,
        )
        .await
        {
            Ok(result) => {
                let sol_received = lamports_to_sol(result.out_amount);
                self.book_sale(mint, TradeReason::EmergencyExit, held, &result, fill, report, true)
                    .await;
                self.positions
                    .set_lifecycle(
                        mint,
                        TokenState::FullyExited,
                        json!({ "exit_reason": reason, "sol_received": sol_received }),
                    )
                    .await;
                self.notifier.emit(EngineEvent::EmergencyExit {
                    mint: mint.to_string(),
                    reason: reason.to_string(),
                    sol_received,
                    success: true,
                });
                true
            }
            Err(e) => {
                error!(mint = %mint, "Emergency exit failed: {}", e);
                self.notifier.emit(EngineEvent::EmergencyExit {
                    mint: mint.to_string(),
                    reason: reason.to_string(),
                    sol_received: 0.0,
                    success: false,
                });
                self.notifier.emit(EngineEvent::ExitFailed {
                    mint: mint.to_string(),
                    reason: "emergency".to_string(),
                    error: e.to_string(),
                });
                false
            }
        }
    }

    /// Ledger entry plus position update for an entry-phase sell
    #[allow(clippy::too_many_arguments)]
    async fn book_sale(
        &self,
        mint: &str,
        reason: TradeReason,
        tokens: u64,
        result: &SwapResult,
        fill: &FirstFill,
        report: &mut TrancheReport,
        closing: bool,
    ) {
        let proceeds = lamports_to_sol(result.out_amount);
        let position = self.current(mint).await;
        let cost = match &position {
            Some(p) => p.cost_basis_sol(tokens),
            None => tokens as f64 * fill.price / LAMPORTS_PER_SOL,
        };
        let pnl = proceeds - cost;
        let trade = TradeRecord::sell(
            reason,
            mint,
            tokens,
            proceeds,
            pnl,
            result.signature_or_default(),
            result.simulated,
        );

        if position.is_none() {
            report.trades.push(self.positions.record_trade(trade).await);
            return;
        }

        let update = if closing {
            PositionUpdate::default()
                .with_sale(tokens, proceeds, pnl)
                .closing(reason.to_string())
        } else {
            // Entry-phase sells shrink the tier base, remaining_pct stays 100
            PositionUpdate {
                shrink_original: Some(tokens),
                ..PositionUpdate::default().with_sale(tokens, proceeds, pnl)
            }
        };

        match self.positions.book_exit(mint, trade.clone(), update).await {
            Ok(booked) => {
                if !booked.persisted {
                    self.notifier.emit(EngineEvent::PersistenceError {
                        context: format!("{} for {}", reason, mint),
                        error: "write queued for retry".to_string(),
                    });
                }
                report.trades.push(booked.trade);
            }
            Err(e) => {
                error!(mint = %mint, "Booking {} failed: {}", reason, e);
                self.notifier.emit(EngineEvent::PersistenceError {
                    context: format!("{} for {}", reason, mint),
                    error: e.to_string(),
                });
                report.trades.push(trade);
            }
        }
    }

    /// Poll the buy price until it dips or the timeout passes
    ///
    /// Returns true when the pullback was observed.
    async fn wait_for_pullback(&self, mint: &str, entry_price: f64, probe_sol: f64) -> bool {
        let target = entry_price * (1.0 - self.config.pullback_pct / 100.0);
        let deadline = Instant::now() + Duration::from_millis(self.config.pullback_timeout_ms);
        let poll = Duration::from_millis(self.config.pullback_poll_ms.max(1));
        let probe_lamports = sol_to_lamports(probe_sol).max(1);

        loop {
            match self
                .provider
                .get_quote(WSOL_MINT, mint, probe_lamports, self.slippage_bps)
                .await
            {
                Ok(Some(quote)) if quote.out_amount > 0 => {
                    let price = fill_price(lamports_to_sol(quote.in_amount), quote.out_amount);
                    if price <= target {
                        info!(mint = %mint, price, target, "Pullback reached");
                        return true;
                    }
                }
                Ok(_) => debug!(mint = %mint, "Pullback probe found no route"),
                Err(e) => debug!(mint = %mint, "Pullback probe failed: {}", e),
            }

            let now = Instant::now();
            if now >= deadline {
                info!(
                    mint = %mint,
                    policy = ?self.config.pullback_timeout_policy,
                    "Pullback wait timed out"
                );
                return false;
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }

    async fn skip_second(&self, mint: &str, reason: &str, report: &mut TrancheReport) {
        info!(mint = %mint, "Second tranche skipped: {}", reason);
        self.notifier.emit(EngineEvent::TrancheSkipped {
            mint: mint.to_string(),
            reason: reason.to_string(),
        });
        report.outcome = TrancheOutcome::Open {
            second_filled: false,
        };
        report.position = self.current(mint).await;
    }

    async fn buy_second(
        &self,
        mint: &str,
        sol: f64,
        report: &mut TrancheReport,
    ) -> Result<()> {
        let result = buy_tokens(
            self.provider.as_ref(),
            mint,
            sol_to_lamports(sol),
            self.slippage_bps,
            Some(self.config.buy_max_impact_pct),
        )
        .await?;
        if result.out_amount == 0 {
            return Err(Error::ExecutionFailure("buy returned no tokens".to_string()));
        }

        let tokens = result.out_amount;
        let spent = lamports_to_sol(result.in_amount);
        let trade = self
            .positions
            .record_trade(TradeRecord::buy(
                TradeReason::SecondTranche,
                mint,
                tokens,
                spent,
                result.signature_or_default(),
                result.simulated,
            ))
            .await;
        report.trades.push(trade);

        if let Err(e) = self
            .positions
            .update(mint, PositionUpdate::default().with_fill(tokens, spent))
            .await
        {
            error!(mint = %mint, "Second fill not applied to position: {}", e);
            self.notifier.emit(EngineEvent::PersistenceError {
                context: format!("second tranche for {}", mint),
                error: e.to_string(),
            });
        }

        info!(mint = %mint, tokens, sol = spent, "Second tranche filled");
        self.notifier.emit(EngineEvent::TrancheFilled {
            mint: mint.to_string(),
            tranche: 2,
            sol_amount: spent,
            token_amount: tokens,
            signature: result.signature_or_default(),
            simulated: result.simulated,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemoryStore, Store, TradeSide};
    use crate::trading::provider::testing::ScriptedSwapProvider;

    struct Harness {
        provider: Arc<ScriptedSwapProvider>,
        store: Arc<MemoryStore>,
        engine: TrancheEngine,
        notifier: Notifier,
    }

    fn harness(config: TrancheConfig) -> Harness {
        let provider = Arc::new(ScriptedSwapProvider::new(10.0));
        let store = Arc::new(MemoryStore::new());
        let positions = Arc::new(PositionStore::new(store.clone()));
        let notifier = Notifier::new(64);
        let engine = TrancheEngine::new(provider.clone(), positions, notifier.clone(), config, 1000);
        Harness {
            provider,
            store,
            engine,
            notifier,
        }
    }

    fn fast_config() -> TrancheConfig {
        TrancheConfig {
            pullback_timeout_ms: 30,
            pullback_poll_ms: 5,
            ..TrancheConfig::default()
        }
    }

    fn candidate() -> PoolCandidate {
        PoolCandidate::new("tok", "pool", 80.0)
    }

    #[tokio::test]
    async fn test_happy_path_two_fills() {
        let h = harness(fast_config());
        h.provider.set_price("tok", 1.0);

        let report = h.engine.execute(&candidate(), 1.0).await;
        assert_eq!(report.outcome, TrancheOutcome::Open { second_filled: true });
        assert!(report.test_sell_attempted);
        assert!(report.second_tranche_attempted);

        let reasons: Vec<TradeReason> = report.trades.iter().map(|t| t.reason).collect();
        assert_eq!(
            reasons,
            vec![
                TradeReason::FirstTranche,
                TradeReason::TestSell,
                TradeReason::SecondTranche
            ]
        );
        assert_eq!(h.provider.buys_of("tok").len(), 2);
        assert_eq!(h.provider.buys_of("tok")[0].amount, 600_000_000);
        assert_eq!(h.provider.buys_of("tok")[1].amount, 400_000_000);

        let position = h.store.get_position("tok").await.unwrap().unwrap();
        assert_eq!(position.remaining_pct, 100.0);
        // 600M bought, 3M test-sold, 400M bought
        assert_eq!(position.token_amount, 997_000_000);
        assert_eq!(position.original_token_amount, 997_000_000);
        assert!((position.avg_entry_price - 1.0).abs() < 1e-9);
        assert!(position.second_tranche_at.is_some());

        let lifecycle = h.store.get_lifecycle("tok").await.unwrap().unwrap();
        assert_eq!(lifecycle.state, TokenState::Bought);
    }

    #[tokio::test]
    async fn test_failed_test_sell_forces_full_exit() {
        let h = harness(fast_config());
        h.provider.set_price("tok", 1.0);
        // Test sell reverts, the emergency sell goes through
        h.provider.fail_next_sells("tok", 1);
        let mut events = h.notifier.subscribe();

        let report = h.engine.execute(&candidate(), 1.0).await;
        assert!(matches!(report.outcome, TrancheOutcome::EmergencyExit { exited: true, .. }));
        assert!(!report.second_tranche_attempted);
        assert_eq!(h.provider.buys_of("tok").len(), 1);

        let sells = h.provider.sells_of("tok");
        assert_eq!(sells.len(), 2);
        assert_eq!(sells[1].amount, 600_000_000);
        assert_eq!(sells[1].max_slippage_bps, 5000);

        let position = h.store.get_position("tok").await.unwrap().unwrap();
        assert!(!position.is_open());
        assert_eq!(position.remaining_pct, 0.0);

        let mut saw_emergency = false;
        while let Ok(envelope) = events.try_recv() {
            if matches!(envelope.event, EngineEvent::EmergencyExit { success: true, .. }) {
                saw_emergency = true;
            }
        }
        assert!(saw_emergency);
    }

    #[tokio::test]
    async fn test_zero_proceeds_test_sell_is_emergency() {
        let h = harness(fast_config());
        h.provider.set_price("tok", 1.0);
        h.provider.zero_sells("tok");

        let report = h.engine.execute(&candidate(), 1.0).await;
        match &report.outcome {
            TrancheOutcome::EmergencyExit { reason, .. } => assert!(reason.contains("zero proceeds")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!report.second_tranche_attempted);
        // Test sell plus the emergency sell of everything left
        let sells = h.provider.sells_of("tok");
        assert_eq!(sells.len(), 2);
        assert_eq!(sells[0].amount + sells[1].amount, 600_000_000);
    }

    #[tokio::test]
    async fn test_no_route_aborts_without_buying() {
        let h = harness(fast_config());
        h.provider.set_no_route("tok");

        let report = h.engine.execute(&candidate(), 1.0).await;
        assert!(!report.bought());
        assert!(h.provider.swaps().is_empty());
        assert!(h.store.trades().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_impact_ceiling_aborts() {
        let h = harness(fast_config());
        h.provider.set_price("tok", 1.0);
        h.provider.set_impact("tok", 16.0);

        let report = h.engine.execute(&candidate(), 1.0).await;
        match report.outcome {
            TrancheOutcome::Aborted { reason } => assert!(reason.contains("exceeds")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(h.provider.swaps().is_empty());
    }

    #[tokio::test]
    async fn test_second_tranche_failure_is_non_fatal() {
        let h = harness(fast_config());
        h.provider.set_price("tok", 1.0);
        // First buy lands, the second reverts
        h.provider.limit_buys("tok", 1);

        let report = h.engine.execute(&candidate(), 1.0).await;

        assert_eq!(report.outcome, TrancheOutcome::Open { second_filled: false });
        assert!(report.second_tranche_attempted);
        let position = h.store.get_position("tok").await.unwrap().unwrap();
        assert!(position.is_open());
        assert_eq!(position.token_amount, 597_000_000);

        let buys: Vec<_> = h
            .store
            .trades()
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.side == TradeSide::Buy)
            .collect();
        assert_eq!(buys.len(), 1);
    }

    #[tokio::test]
    async fn test_skip_policy_on_timeout() {
        let h = harness(TrancheConfig {
            pullback_timeout_policy: PullbackPolicy::SkipSecondTranche,
            ..fast_config()
        });
        h.provider.set_price("tok", 1.0);

        let report = h.engine.execute(&candidate(), 1.0).await;
        assert_eq!(report.outcome, TrancheOutcome::Open { second_filled: false });
        assert!(!report.second_tranche_attempted);
        assert_eq!(h.provider.buys_of("tok").len(), 1);
    }

    #[tokio::test]
    async fn test_pullback_observed_before_timeout() {
        let h = harness(TrancheConfig {
            pullback_timeout_ms: 60_000,
            pullback_poll_ms: 5,
            pullback_timeout_policy: PullbackPolicy::SkipSecondTranche,
            ..TrancheConfig::default()
        });
        h.provider.set_price("tok", 1.0);
        // 3% dip once the buy and test sell are done, deeper than the 2% target
        h.provider.reprice_after_swaps("tok", 2, 0.97);

        let report = tokio::time::timeout(Duration::from_secs(5), h.engine.execute(&candidate(), 1.0))
            .await
            .expect("pullback should resolve before the 60s timeout");

        assert_eq!(report.outcome, TrancheOutcome::Open { second_filled: true });
        let position = report.position.unwrap();
        assert!(position.avg_entry_price < 1.0);
    }
}
