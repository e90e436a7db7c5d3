//! Risk admission control
//!
//! Gate consulted before every first-tranche buy. The state is folded from
//! the trade ledger on each check, never cached.
//!
//! Candidates validate concurrently, so an admitted candidate holds a
//! [`RiskReservation`] until its pipeline run ends. Reserved mints count as
//! open positions until the ledger shows them or the reservation drops.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::config::RiskConfig;
use crate::error::Result;
use crate::persistence::{LedgerSummary, Store, TradeRecord};

/// Why a buy was refused
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskBlock {
    MaxPositionsReached { current: usize, max: usize },
    DailyLossLimitReached { loss_pct: f64, limit_pct: f64 },
    TradeTooLarge { requested_sol: f64, max_sol: f64 },
    NoCapital { portfolio_sol: f64 },
}

impl RiskBlock {
    pub fn description(&self) -> String {
        match self {
            RiskBlock::MaxPositionsReached { current, max } => {
                format!("Max positions reached: {}/{}", current, max)
            }
            RiskBlock::DailyLossLimitReached {
                loss_pct,
                limit_pct,
            } => format!(
                "Daily loss limit: {:.2}% of portfolio (limit {:.2}%)",
                loss_pct, limit_pct
            ),
            RiskBlock::TradeTooLarge {
                requested_sol,
                max_sol,
            } => format!(
                "Trade too large: {:.4} SOL exceeds per-trade cap {:.4} SOL",
                requested_sol, max_sol
            ),
            RiskBlock::NoCapital { portfolio_sol } => {
                format!("Portfolio value {:.4} SOL leaves nothing to risk", portfolio_sol)
            }
        }
    }
}

/// Risk aggregates derived from the ledger
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    /// Ledger-open positions plus admitted entries not yet in the ledger
    pub open_positions: usize,
    /// Admitted entries still in flight
    #[serde(default)]
    pub reserved_entries: usize,
    /// Today's net realized loss in SOL, zero when today is net positive
    pub realized_loss_today_sol: f64,
    /// Starting capital plus all realized PnL, floored at zero
    pub portfolio_value_sol: f64,
}

impl RiskState {
    pub fn from_summary(summary: &LedgerSummary, starting_capital_sol: f64) -> Self {
        Self {
            open_positions: summary.open_positions,
            reserved_entries: 0,
            realized_loss_today_sol: summary.realized_loss_today.max(0.0),
            portfolio_value_sol: (starting_capital_sol + summary.realized_pnl_total).max(0.0),
        }
    }

    pub fn daily_loss_pct(&self) -> f64 {
        if self.portfolio_value_sol <= 0.0 {
            return 100.0;
        }
        self.realized_loss_today_sol / self.portfolio_value_sol * 100.0
    }
}

/// Allow/deny with the state it was computed from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskDecision {
    pub allowed: bool,
    pub block: Option<RiskBlock>,
    pub state: RiskState,
}

impl RiskDecision {
    pub fn reason(&self) -> Option<String> {
        self.block.as_ref().map(|b| b.description())
    }
}

/// Slot held by an admitted candidate; released on drop
#[derive(Debug)]
pub struct RiskReservation {
    mint: String,
    reserved: Arc<Mutex<HashSet<String>>>,
}

impl RiskReservation {
    pub fn mint(&self) -> &str {
        &self.mint
    }
}

impl Drop for RiskReservation {
    fn drop(&mut self) {
        self.reserved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.mint);
    }
}

pub struct RiskAdmission {
    config: RiskConfig,
    /// Serializes admissions so each sees the reservations before it
    gate: AsyncMutex<()>,
    reserved: Arc<Mutex<HashSet<String>>>,
}

impl RiskAdmission {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            gate: AsyncMutex::new(()),
            reserved: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Largest notional one trade may use at `state`
    pub fn max_trade_sol(&self, state: &RiskState) -> f64 {
        state.portfolio_value_sol * self.config.max_risk_per_trade_pct / 100.0
    }

    /// Evaluate a proposed buy against the ledger
    pub fn evaluate(&self, trades: &[TradeRecord], proposed_size_sol: f64) -> RiskDecision {
        self.evaluate_with(trades, &HashSet::new(), proposed_size_sol)
    }

    /// Evaluate with `reserved` mints counted as open
    pub fn evaluate_with(
        &self,
        trades: &[TradeRecord],
        reserved: &HashSet<String>,
        proposed_size_sol: f64,
    ) -> RiskDecision {
        let summary = LedgerSummary::today(trades);
        let mut state = RiskState::from_summary(&summary, self.config.starting_capital_sol);
        if !reserved.is_empty() {
            let open = LedgerSummary::open_mints(trades);
            state.reserved_entries = reserved.iter().filter(|m| !open.contains(*m)).count();
            state.open_positions = open.len() + state.reserved_entries;
        }
        let block = self.first_block(&state, proposed_size_sol);
        RiskDecision {
            allowed: block.is_none(),
            block,
            state,
        }
    }

    fn reserved_snapshot(&self) -> HashSet<String> {
        self.reserved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Read the ledger fresh and evaluate, counting in-flight entries
    pub async fn check(&self, store: &dyn Store, proposed_size_sol: f64) -> Result<RiskDecision> {
        let reserved = self.reserved_snapshot();
        let trades = store.trades().await?;
        let decision = self.evaluate_with(&trades, &reserved, proposed_size_sol);
        debug!(
            allowed = decision.allowed,
            open = decision.state.open_positions,
            reserved = decision.state.reserved_entries,
            loss_today = decision.state.realized_loss_today_sol,
            portfolio = decision.state.portfolio_value_sol,
            "Risk admission"
        );
        Ok(decision)
    }

    /// Check and, when allowed, reserve a slot for `mint`
    ///
    /// Admissions run one at a time. Reservations are read before the
    /// ledger: a reservation released in between belongs to an entry whose
    /// buy is already in the ledger.
    pub async fn admit(
        &self,
        store: &dyn Store,
        mint: &str,
        proposed_size_sol: f64,
    ) -> Result<(RiskDecision, Option<RiskReservation>)> {
        let _gate = self.gate.lock().await;
        let decision = self.check(store, proposed_size_sol).await?;
        if !decision.allowed {
            return Ok((decision, None));
        }

        self.reserved
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(mint.to_string());
        let reservation = RiskReservation {
            mint: mint.to_string(),
            reserved: self.reserved.clone(),
        };
        Ok((decision, Some(reservation)))
    }

    /// Admitted entries not yet released
    pub fn reserved_count(&self) -> usize {
        self.reserved.lock().map(|r| r.len()).unwrap_or(0)
    }

    fn first_block(&self, state: &RiskState, proposed_size_sol: f64) -> Option<RiskBlock> {
        if state.portfolio_value_sol <= 0.0 {
            return Some(RiskBlock::NoCapital {
                portfolio_sol: state.portfolio_value_sol,
            });
        }

        if state.open_positions >= self.config.max_open_positions {
            return Some(RiskBlock::MaxPositionsReached {
                current: state.open_positions,
                max: self.config.max_open_positions,
            });
        }

        let loss_pct = state.daily_loss_pct();
        if loss_pct >= self.config.max_daily_loss_pct {
            return Some(RiskBlock::DailyLossLimitReached {
                loss_pct,
                limit_pct: self.config.max_daily_loss_pct,
            });
        }

        let max_sol = self.max_trade_sol(state);
        if proposed_size_sol > max_sol {
            return Some(RiskBlock::TradeTooLarge {
                requested_sol: proposed_size_sol,
                max_sol,
            });
        }

        None
    }
}
