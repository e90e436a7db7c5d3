//! Append-only trade ledger
//!
//! Records are never mutated once written. Every aggregate the engine needs
//! (open positions, realized PnL, today's loss) is a fold over the ledger.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "BUY"),
            TradeSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Why a trade happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeReason {
    FirstTranche,
    SecondTranche,
    TestSell,
    EmergencyExit,
    /// Zero-based tier index
    TierExit(usize),
    TrailingStop,
    StopLoss,
    Manual,
}

impl std::fmt::Display for TradeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeReason::FirstTranche => write!(f, "first tranche"),
            TradeReason::SecondTranche => write!(f, "second tranche"),
            TradeReason::TestSell => write!(f, "test sell"),
            TradeReason::EmergencyExit => write!(f, "emergency exit"),
            TradeReason::TierExit(tier) => write!(f, "tier {} exit", tier + 1),
            TradeReason::TrailingStop => write!(f, "trailing stop"),
            TradeReason::StopLoss => write!(f, "stop loss"),
            TradeReason::Manual => write!(f, "manual exit"),
        }
    }
}

/// Immutable ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub side: TradeSide,
    pub reason: TradeReason,
    pub mint: String,
    /// Raw token units bought or sold
    pub token_amount: u64,
    /// SOL spent (buy) or received (sell)
    pub sol_amount: f64,
    /// Lamports per raw token unit
    pub price: f64,
    /// Realized PnL, sells only
    pub pnl_sol: Option<f64>,
    pub signature: String,
    pub simulated: bool,
    pub timestamp: DateTime<Utc>,
}

impl TradeRecord {
    pub fn buy(
        reason: TradeReason,
        mint: impl Into<String>,
        token_amount: u64,
        sol_amount: f64,
        signature: impl Into<String>,
        simulated: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            side: TradeSide::Buy,
            reason,
            mint: mint.into(),
            token_amount,
            sol_amount,
            price: crate::position::fill_price(sol_amount, token_amount),
            pnl_sol: None,
            signature: signature.into(),
            simulated,
            timestamp: Utc::now(),
        }
    }

    pub fn sell(
        reason: TradeReason,
        mint: impl Into<String>,
        token_amount: u64,
        sol_amount: f64,
        pnl_sol: f64,
        signature: impl Into<String>,
        simulated: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            side: TradeSide::Sell,
            reason,
            mint: mint.into(),
            token_amount,
            sol_amount,
            price: crate::position::fill_price(sol_amount, token_amount),
            pnl_sol: Some(pnl_sol),
            signature: signature.into(),
            simulated,
            timestamp: Utc::now(),
        }
    }
}

/// Aggregates folded from the ledger
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerSummary {
    /// Mints with a positive net token balance
    pub open_positions: usize,
    /// Sum of sell PnL over the whole ledger
    pub realized_pnl_total: f64,
    /// Sum of sell PnL dated `day`
    pub realized_pnl_today: f64,
    /// Absolute value of today's net loss, zero when today is net positive
    pub realized_loss_today: f64,
    pub trade_count: usize,
}

impl LedgerSummary {
    /// Fold `trades` relative to the UTC calendar day `day`
    pub fn fold(trades: &[TradeRecord], day: NaiveDate) -> Self {
        let mut net_tokens: HashMap<&str, i128> = HashMap::new();
        let mut summary = LedgerSummary {
            trade_count: trades.len(),
            ..Default::default()
        };

        for trade in trades {
            let entry = net_tokens.entry(trade.mint.as_str()).or_insert(0);
            match trade.side {
                TradeSide::Buy => *entry += trade.token_amount as i128,
                TradeSide::Sell => *entry -= trade.token_amount as i128,
            }

            if let Some(pnl) = trade.pnl_sol {
                summary.realized_pnl_total += pnl;
                if trade.timestamp.date_naive() == day {
                    summary.realized_pnl_today += pnl;
                }
            }
        }

        summary.open_positions = net_tokens.values().filter(|n| **n > 0).count();
        summary.realized_loss_today = (-summary.realized_pnl_today).max(0.0);
        summary
    }

    /// Fold relative to the current UTC day
    pub fn today(trades: &[TradeRecord]) -> Self {
        Self::fold(trades, Utc::now().date_naive())
    }

    /// Mints with a positive net token balance
    pub fn open_mints(trades: &[TradeRecord]) -> HashSet<String> {
        let mut net_tokens: HashMap<&str, i128> = HashMap::new();
        for trade in trades {
            let entry = net_tokens.entry(trade.mint.as_str()).or_insert(0);
            match trade.side {
                TradeSide::Buy => *entry += trade.token_amount as i128,
                TradeSide::Sell => *entry -= trade.token_amount as i128,
            }
        }
        net_tokens
            .into_iter()
            .filter(|(_, n)| *n > 0)
            .map(|(mint, _)| mint.to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_buy_record_price() {
        let trade = TradeRecord::buy(TradeReason::FirstTranche, "m", 1_000_000_000, 0.6, "sig", true);
        assert!((trade.price - 0.6).abs() < 1e-12);
        assert_eq!(trade.side, TradeSide::Buy);
        assert!(trade.pnl_sol.is_none());
    }

    #[test]
    fn test_fold_open_positions_and_pnl() {
        let trades = vec![
            TradeRecord::buy(TradeReason::FirstTranche, "a", 1000, 1.0, "s1", true),
            TradeRecord::buy(TradeReason::FirstTranche, "b", 1000, 1.0, "s2", true),
            TradeRecord::sell(TradeReason::StopLoss, "b", 1000, 0.9, -0.1, "s3", true),
            TradeRecord::buy(TradeReason::FirstTranche, "c", 500, 0.5, "s4", true),
            TradeRecord::sell(TradeReason::TierExit(0), "c", 100, 0.2, 0.1, "s5", true),
        ];

        let summary = LedgerSummary::today(&trades);
        assert_eq!(summary.open_positions, 2);
        assert!((summary.realized_pnl_total - 0.0).abs() < 1e-12);
        assert_eq!(summary.realized_loss_today, 0.0);
        assert_eq!(summary.trade_count, 5);
    }

    #[test]
    fn test_yesterday_losses_excluded() {
        let mut old = TradeRecord::sell(TradeReason::StopLoss, "a", 10, 0.5, -0.5, "s1", false);
        old.timestamp = Utc::now() - Duration::days(1);
        let today = TradeRecord::sell(TradeReason::StopLoss, "b", 10, 0.8, -0.2, "s2", false);

        let summary = LedgerSummary::today(&[old, today]);
        assert!((summary.realized_loss_today - 0.2).abs() < 1e-12);
        assert!((summary.realized_pnl_total + 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_reason_serde() {
        let json = serde_json::to_string(&TradeReason::TierExit(1)).unwrap();
        assert_eq!(json, r#"{"tier_exit":1}"#);
        assert_eq!(TradeReason::TierExit(1).to_string(), "tier 2 exit");
    }
}
