//! Position monitor
//!
//! Every `interval_ms` each open position is checked under its mint lock:
//! emergency triggers first, then tiers, trailing stop and stop loss through
//! the [`ExitManager`]. At most one sell goes out per position per tick.
//!
//! Errors never leave a tick. A failed sell leaves the position untouched
//! and is retried naturally on the next tick.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::price_probe::PriceProbe;
use super::store::PositionStore;
use super::types::{Position, PositionUpdate};
use crate::config::{lamports_to_sol, MonitorConfig};
use crate::error::{Error, Result};
use crate::intel::MarketIntel;
use crate::notify::{EngineEvent, Notifier};
use crate::persistence::{TokenState, TradeReason, TradeRecord};
use crate::strategy::{ExitManager, ExitReason, ExitSignal, Urgency};
use crate::trading::{sell_tokens, SwapProvider};

/// What happened to one position in one tick
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorOutcome {
    /// No exit; `profit_pct` is `None` when the price probe failed
    Hold { profit_pct: Option<f64> },
    /// Position missing or already closed
    Skipped,
    Exited {
        reason: ExitReason,
        tokens_sold: u64,
        sol_received: f64,
        remaining_pct: f64,
    },
    /// Sell attempted and failed, position unchanged
    Failed { reason: ExitReason, error: String },
}

impl MonitorOutcome {
    pub fn is_exit(&self) -> bool {
        matches!(self, MonitorOutcome::Exited { .. })
    }
}

pub struct PositionMonitor {
    provider: Arc<dyn SwapProvider>,
    positions: Arc<PositionStore>,
    intel: Arc<dyn MarketIntel>,
    notifier: Notifier,
    exits: ExitManager,
    probe: PriceProbe,
}

impl PositionMonitor {
    pub fn new(
        provider: Arc<dyn SwapProvider>,
        positions: Arc<PositionStore>,
        intel: Arc<dyn MarketIntel>,
        notifier: Notifier,
        config: MonitorConfig,
    ) -> Self {
        let probe = PriceProbe::new(
            provider.clone(),
            config.probe_fraction_pct,
            config.exit_slippage_bps,
        );
        Self {
            provider,
            positions,
            intel,
            notifier,
            exits: ExitManager::new(config),
            probe,
        }
    }

    fn config(&self) -> &MonitorConfig {
        self.exits.config()
    }

    /// Tick until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        let interval = Duration::from_millis(self.config().interval_ms.max(1));
        info!("Position monitor started (interval {:?})", interval);

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Position monitor stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// One pass over every open position
    pub async fn tick(&self) -> Vec<(String, MonitorOutcome)> {
        let flushed = self.positions.flush_pending().await;
        if flushed > 0 {
            info!("Flushed {} queued write(s)", flushed);
        }

        let open = match self.positions.open_positions().await {
            Ok(open) => open,
            Err(e) => {
                error!("Could not load open positions: {}", e);
                return Vec::new();
            }
        };

        let mut outcomes = Vec::with_capacity(open.len());
        for position in open {
            let outcome = self.check_position(&position.mint).await;
            outcomes.push((position.mint, outcome));
        }
        outcomes
    }

    /// Run the exit checks for one mint
    pub async fn check_position(&self, mint: &str) -> MonitorOutcome {
        let _guard = self.positions.lock(mint).await;

        let position = match self.positions.get(mint).await {
            Ok(Some(p)) if p.is_open() => p,
            Ok(_) => return MonitorOutcome::Skipped,
            Err(e) => {
                warn!(mint = %mint, "Position read failed: {}", e);
                return MonitorOutcome::Skipped;
            }
        };

        let price = match self.probe.price(&position).await {
            Ok(price) => price,
            Err(e) => {
                warn!(mint = %mint, "Price probe failed: {}", e);
                None
            }
        };

        // 1. Emergency
        match self.intel.check_emergency_triggers(mint, price).await {
            Ok(check) if check.should_exit => {
                let reason = check
                    .critical_reason
                    .unwrap_or_else(|| "emergency trigger".to_string());
                warn!(mint = %mint, "Emergency trigger: {}", reason);
                let signal = ExitManager::full_exit(
                    &position,
                    ExitReason::Emergency { reason },
                    Urgency::Immediate,
                );
                let profit_pct = price.map(|p| position.profit_pct(p)).unwrap_or(0.0);
                return self
                    .execute(&position, signal, profit_pct, position.highest_profit_pct)
                    .await;
            }
            Ok(_) => {}
            Err(e) => warn!(mint = %mint, "Emergency check unavailable: {}", e),
        }

        let Some(price) = price else {
            return MonitorOutcome::Hold { profit_pct: None };
        };

        // 2-4. Tiers, trailing, stop loss
        let evaluation = self.exits.evaluate(&position, price);
        debug!(
            mint = %mint,
            price,
            profit = evaluation.profit_pct,
            peak = evaluation.peak_profit_pct,
            remaining = position.remaining_pct,
            "Position checked"
        );

        let mut position = position;
        if evaluation.changes_state(&position) {
            let update = PositionUpdate {
                highest_profit_pct: Some(evaluation.peak_profit_pct),
                trailing_active: Some(evaluation.trailing_active),
                ..PositionUpdate::default()
            };
            match self.positions.update(mint, update).await {
                Ok(updated) => position = updated,
                Err(e) => warn!(mint = %mint, "Trailing state not saved: {}", e),
            }
        }

        match evaluation.signal {
            Some(signal) => {
                self.execute(&position, signal, evaluation.profit_pct, evaluation.peak_profit_pct)
                    .await
            }
            None => MonitorOutcome::Hold {
                profit_pct: Some(evaluation.profit_pct),
            },
        }
    }

    /// Operator-initiated full exit
    pub async fn exit_position(&self, mint: &str) -> Result<MonitorOutcome> {
        let _guard = self.positions.lock(mint).await;

        let position = self
            .positions
            .get(mint)
            .await?
            .filter(|p| p.is_open())
            .ok_or_else(|| Error::PositionNotFound(mint.to_string()))?;

        let profit_pct = match self.probe.price(&position).await {
            Ok(Some(price)) => position.profit_pct(price),
            _ => 0.0,
        };
        let signal = ExitManager::full_exit(&position, ExitReason::Manual, Urgency::Normal);
        Ok(self
            .execute(&position, signal, profit_pct, position.highest_profit_pct)
            .await)
    }

    /// Sell, book, advance lifecycle, notify
    async fn execute(
        &self,
        position: &Position,
        signal: ExitSignal,
        profit_pct: f64,
        peak_profit_pct: f64,
    ) -> MonitorOutcome {
        let mint = position.mint.as_str();
        let (slippage_bps, max_impact) = match (&signal.urgency, &signal.reason) {
            (Urgency::Immediate, _) => (self.config().emergency_slippage_bps, None),
            (_, ExitReason::Tier { .. }) => (
                self.config().exit_slippage_bps,
                Some(self.config().tier_max_impact_pct),
            ),
            _ => (self.config().exit_slippage_bps, None),
        };

        info!(
            mint = %mint,
            reason = %signal.reason,
            tokens = signal.tokens_to_sell,
            profit = profit_pct,
            "Exit signal"
        );

        let result = match sell_tokens(
            self.provider.as_ref(),
            mint,
            signal.tokens_to_sell,
            slippage_bps,
            max_impact,
        )
        .await
        {
            Ok(result) => result,
            Err(e) => return self.exit_failed(mint, signal.reason, e),
        };

        let sol_received = lamports_to_sol(result.out_amount);
        let pnl_sol = sol_received - position.cost_basis_sol(signal.tokens_to_sell);
        let trade = TradeRecord::sell(
            trade_reason(&signal.reason),
            mint,
            signal.tokens_to_sell,
            sol_received,
            pnl_sol,
            result.signature_or_default(),
            result.simulated,
        );

        let sale = PositionUpdate::default().with_sale(signal.tokens_to_sell, sol_received, pnl_sol);
        let update = match &signal.reason {
            ExitReason::Tier { index, .. } if signal.remaining_after_pct > 0.0 => {
                sale.with_remaining(signal.remaining_after_pct).with_tier(*index)
            }
            ExitReason::Tier { index, .. } => sale.with_tier(*index).closing(signal.reason.to_string()),
            reason => sale.closing(reason.to_string()),
        };

        let remaining_pct = match self.positions.book_exit(mint, trade, update).await {
            Ok(booked) => {
                if !booked.persisted {
                    self.notifier.emit(EngineEvent::PersistenceError {
                        context: format!("{} for {}", signal.reason, mint),
                        error: "write queued for retry".to_string(),
                    });
                }
                booked.position.remaining_pct
            }
            Err(e) => {
                error!(mint = %mint, "Exit executed but not booked: {}", e);
                self.notifier.emit(EngineEvent::PersistenceError {
                    context: format!("{} for {}", signal.reason, mint),
                    error: e.to_string(),
                });
                signal.remaining_after_pct
            }
        };

        let state = if remaining_pct > 0.0 {
            TokenState::PartiallySold
        } else {
            TokenState::FullyExited
        };
        self.positions
            .set_lifecycle(
                mint,
                state,
                json!({
                    "exit_reason": signal.reason.to_string(),
                    "remaining_pct": remaining_pct,
                    "sol_received": sol_received,
                }),
            )
            .await;

        info!(
            mint = %mint,
            reason = %signal.reason,
            sol = sol_received,
            pnl = pnl_sol,
            remaining = remaining_pct,
            "Exit filled"
        );
        self.notifier.emit(exit_event(
            mint,
            &signal.reason,
            profit_pct,
            peak_profit_pct,
            remaining_pct,
            sol_received,
            pnl_sol,
        ));

        MonitorOutcome::Exited {
            reason: signal.reason,
            tokens_sold: signal.tokens_to_sell,
            sol_received,
            remaining_pct,
        }
    }

    fn exit_failed(&self, mint: &str, reason: ExitReason, e: Error) -> MonitorOutcome {
        error!(mint = %mint, reason = %reason, "Exit failed: {}", e);
        if let ExitReason::Emergency { reason } = &reason {
            self.notifier.emit(EngineEvent::EmergencyExit {
                mint: mint.to_string(),
                reason: reason.clone(),
                sol_received: 0.0,
                success: false,
            });
        }
        self.notifier.emit(EngineEvent::ExitFailed {
            mint: mint.to_string(),
            reason: reason.to_string(),
            error: e.to_string(),
        });
        MonitorOutcome::Failed {
            reason,
            error: e.to_string(),
        }
    }
}

fn trade_reason(reason: &ExitReason) -> TradeReason {
    match reason {
        ExitReason::Emergency { .. } => TradeReason::EmergencyExit,
        ExitReason::Tier { index, .. } => TradeReason::TierExit(*index),
        ExitReason::TrailingStop { .. } => TradeReason::TrailingStop,
        ExitReason::StopLoss { .. } => TradeReason::StopLoss,
        ExitReason::Manual => TradeReason::Manual,
    }
}

fn exit_event(
    mint: &str,
    reason: &ExitReason,
    profit_pct: f64,
    peak_profit_pct: f64,
    remaining_pct: f64,
    sol_received: f64,
    pnl_sol: f64,
) -> EngineEvent {
    let mint = mint.to_string();
    match reason {
        ExitReason::Emergency { reason } => EngineEvent::EmergencyExit {
            mint,
            reason: reason.clone(),
            sol_received,
            success: true,
        },
        ExitReason::Tier { index, .. } => EngineEvent::TierExit {
            mint,
            tier: *index,
            profit_pct,
            remaining_pct,
            sol_received,
        },
        ExitReason::TrailingStop {
            peak_pnl_pct,
            current_pnl_pct,
        } => EngineEvent::TrailingExit {
            mint,
            peak_profit_pct: peak_pnl_pct.max(peak_profit_pct),
            profit_pct: *current_pnl_pct,
            sol_received,
        },
        ExitReason::StopLoss { .. } => EngineEvent::StopLoss {
            mint,
            profit_pct,
            sol_received,
            pnl_sol,
        },
        ExitReason::Manual => EngineEvent::ManualExit { mint, sol_received },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intel::testing::StaticIntel;
    use crate::persistence::{MemoryStore, Store};
    use crate::trading::provider::testing::ScriptedSwapProvider;

    struct Harness {
        provider: Arc<ScriptedSwapProvider>,
        intel: Arc<StaticIntel>,
        store: Arc<MemoryStore>,
        monitor: PositionMonitor,
        notifier: Notifier,
    }

    async fn harness(config: MonitorConfig) -> Harness {
        let provider = Arc::new(ScriptedSwapProvider::new(10.0));
        let intel = Arc::new(StaticIntel::new());
        let store = Arc::new(MemoryStore::new());
        let positions = Arc::new(PositionStore::new(store.clone()));
        let notifier = Notifier::new(64);

        // 1 SOL for 1e9 raw units: entry price 1.0
        positions
            .create(Position::open("tok", "pool", 1_000_000_000, 1.0, true))
            .await
            .unwrap();
        provider.set_price("tok", 1.0);

        let monitor = PositionMonitor::new(
            provider.clone(),
            positions,
            intel.clone(),
            notifier.clone(),
            config,
        );
        Harness {
            provider,
            intel,
            store,
            monitor,
            notifier,
        }
    }

    #[tokio::test]
    async fn test_hold_in_band() {
        let h = harness(MonitorConfig::default()).await;
        h.provider.set_price("tok", 1.1);
        let outcome = h.monitor.check_position("tok").await;
        assert!(matches!(outcome, MonitorOutcome::Hold { profit_pct: Some(p) } if (p - 10.0).abs() < 1e-6));
        assert!(h.provider.swaps().is_empty());

        // Peak persisted
        let position = h.store.get_position("tok").await.unwrap().unwrap();
        assert!((position.highest_profit_pct - 10.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_stop_loss_closes_position() {
        let h = harness(MonitorConfig {
            stop_loss_pct: 2.0,
            ..MonitorConfig::default()
        })
        .await;
        let mut events = h.notifier.subscribe();
        h.provider.set_price("tok", 0.97);

        let outcome = h.monitor.check_position("tok").await;
        match outcome {
            MonitorOutcome::Exited {
                reason: ExitReason::StopLoss { .. },
                tokens_sold,
                remaining_pct,
                ..
            } => {
                assert_eq!(tokens_sold, 1_000_000_000);
                assert_eq!(remaining_pct, 0.0);
            }
            other => panic!("unexpected {:?}", other),
        }

        let position = h.store.get_position("tok").await.unwrap().unwrap();
        assert!(!position.is_open());
        assert_eq!(position.remaining_pct, 0.0);

        let trades = h.store.trades().await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].reason, TradeReason::StopLoss);
        assert!((trades[0].pnl_sol.unwrap() + 0.03).abs() < 1e-6);

        let event = events.recv().await.unwrap().event;
        assert!(matches!(event, EngineEvent::StopLoss { pnl_sol, .. } if (pnl_sol + 0.03).abs() < 1e-6));

        let lifecycle = h.store.get_lifecycle("tok").await.unwrap().unwrap();
        assert_eq!(lifecycle.state, TokenState::FullyExited);

        // Closed positions are no longer visited
        assert!(h.monitor.tick().await.is_empty());
    }

    #[tokio::test]
    async fn test_tiers_fire_once_each() {
        let h = harness(MonitorConfig::default()).await;

        h.provider.set_price("tok", 1.45);
        let outcome = h.monitor.check_position("tok").await;
        assert!(matches!(outcome, MonitorOutcome::Exited { remaining_pct, .. } if remaining_pct == 70.0));
        assert_eq!(h.provider.sells_of("tok")[0].amount, 300_000_000);

        // Same price again: tier 1 already sold
        assert!(matches!(
            h.monitor.check_position("tok").await,
            MonitorOutcome::Hold { .. }
        ));

        h.provider.set_price("tok", 1.9);
        let outcome = h.monitor.check_position("tok").await;
        assert!(matches!(outcome, MonitorOutcome::Exited { remaining_pct, .. } if remaining_pct == 40.0));

        let position = h.store.get_position("tok").await.unwrap().unwrap();
        assert_eq!(position.tier_sold, [true, true, false]);
        assert_eq!(position.token_amount, 400_000_000);
        assert_eq!(h.provider.sells_of("tok").len(), 2);

        let lifecycle = h.store.get_lifecycle("tok").await.unwrap().unwrap();
        assert_eq!(lifecycle.state, TokenState::PartiallySold);
    }

    #[tokio::test]
    async fn test_residual_trails_then_exits() {
        let h = harness(MonitorConfig::default()).await;

        h.provider.set_price("tok", 1.45);
        h.monitor.check_position("tok").await;
        h.provider.set_price("tok", 1.9);
        h.monitor.check_position("tok").await;
        h.provider.set_price("tok", 2.6);
        let outcome = h.monitor.check_position("tok").await;
        assert!(matches!(outcome, MonitorOutcome::Exited { remaining_pct, .. } if (remaining_pct - 10.0).abs() < 1e-9));

        // At the peak: trailing arms, no exit
        assert!(matches!(
            h.monitor.check_position("tok").await,
            MonitorOutcome::Hold { .. }
        ));
        let position = h.store.get_position("tok").await.unwrap().unwrap();
        assert!(position.trailing_active);

        // 10 points off the peak
        h.provider.set_price("tok", 2.5);
        let outcome = h.monitor.check_position("tok").await;
        match outcome {
            MonitorOutcome::Exited {
                reason: ExitReason::TrailingStop { .. },
                tokens_sold,
                remaining_pct,
                ..
            } => {
                assert_eq!(tokens_sold, 100_000_000);
                assert_eq!(remaining_pct, 0.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_emergency_preempts_tiers() {
        let h = harness(MonitorConfig::default()).await;
        h.provider.set_price("tok", 1.45);
        h.intel.trigger_emergency("tok", "liquidity removed");

        let outcome = h.monitor.check_position("tok").await;
        assert!(matches!(
            outcome,
            MonitorOutcome::Exited {
                reason: ExitReason::Emergency { .. },
                ..
            }
        ));
        let sells = h.provider.sells_of("tok");
        assert_eq!(sells.len(), 1);
        assert_eq!(sells[0].amount, 1_000_000_000);
        assert_eq!(sells[0].max_slippage_bps, 5000);

        let trades = h.store.trades().await.unwrap();
        assert_eq!(trades[0].reason, TradeReason::EmergencyExit);
    }

    #[tokio::test]
    async fn test_probe_failure_still_checks_emergency() {
        let h = harness(MonitorConfig::default()).await;
        h.provider.set_no_route("tok");

        let outcome = h.monitor.check_position("tok").await;
        assert_eq!(outcome, MonitorOutcome::Hold { profit_pct: None });
        assert_eq!(h.intel.emergency_calls(), vec![("tok".to_string(), None)]);
        assert!(h.provider.swaps().is_empty());
    }

    #[tokio::test]
    async fn test_intel_error_does_not_force_exit() {
        let h = harness(MonitorConfig::default()).await;
        h.intel.fail("tok");

        let outcome = h.monitor.check_position("tok").await;
        assert!(matches!(outcome, MonitorOutcome::Hold { profit_pct: Some(_) }));
        assert!(h.provider.swaps().is_empty());
    }

    #[tokio::test]
    async fn test_failed_sell_leaves_position() {
        let h = harness(MonitorConfig {
            stop_loss_pct: 2.0,
            ..MonitorConfig::default()
        })
        .await;
        let mut events = h.notifier.subscribe();
        h.provider.set_price("tok", 0.9);
        h.provider.fail_sells("tok");

        let outcome = h.monitor.check_position("tok").await;
        assert!(matches!(outcome, MonitorOutcome::Failed { .. }));

        let position = h.store.get_position("tok").await.unwrap().unwrap();
        assert!(position.is_open());
        assert_eq!(position.token_amount, 1_000_000_000);
        assert!(h.store.trades().await.unwrap().is_empty());
        assert!(matches!(
            events.recv().await.unwrap().event,
            EngineEvent::ExitFailed { .. }
        ));

        // Next tick retries
        h.provider.allow_sells("tok");
        assert!(h.monitor.check_position("tok").await.is_exit());
    }

    #[tokio::test]
    async fn test_manual_exit() {
        let h = harness(MonitorConfig::default()).await;
        let outcome = h.monitor.exit_position("tok").await.unwrap();
        assert!(matches!(
            outcome,
            MonitorOutcome::Exited {
                reason: ExitReason::Manual,
                remaining_pct,
                ..
            } if remaining_pct == 0.0
        ));

        let err = h.monitor.exit_position("tok").await.unwrap_err();
        assert!(matches!(err, Error::PositionNotFound(_)));
    }

    #[tokio::test]
    async fn test_tick_visits_every_open_position() {
        let h = harness(MonitorConfig::default()).await;
        let outcomes = h.monitor.tick().await;
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].0, "tok");
    }
}
