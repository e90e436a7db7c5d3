//! Position model
//!
//! Prices are lamports per raw token unit, so a fill of `sol` for `tokens`
//! has price `sol * 1e9 / tokens` regardless of the mint's decimals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{LAMPORTS_PER_SOL, TIER_COUNT};
use crate::error::{Error, Result};

/// Float slack when comparing percentages
const PCT_EPSILON: f64 = 1e-9;

/// Price of a fill in lamports per raw token unit
pub fn fill_price(sol: f64, tokens: u64) -> f64 {
    if tokens == 0 {
        return 0.0;
    }
    sol * LAMPORTS_PER_SOL / tokens as f64
}

/// Live economic record for a traded token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Token mint address
    pub mint: String,
    /// Pool the entry was routed through
    pub pool: String,
    /// Raw tokens currently held
    pub token_amount: u64,
    /// Raw tokens the tier fractions are measured against
    pub original_token_amount: u64,
    /// Total SOL spent across fills
    pub invested_sol: f64,
    /// Total SOL received from sells
    pub realized_sol: f64,
    /// Sum of realized PnL across sells
    pub realized_pnl_sol: f64,
    /// Fill-weighted average entry price (lamports per raw unit)
    pub avg_entry_price: f64,
    /// 0-100, starts at 100, never increases
    pub remaining_pct: f64,
    /// One-shot flags, one per profit tier
    pub tier_sold: [bool; TIER_COUNT],
    /// Peak unrealized profit % observed by the monitor
    pub highest_profit_pct: f64,
    pub trailing_active: bool,
    pub first_tranche_at: DateTime<Utc>,
    pub second_tranche_at: Option<DateTime<Utc>>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub exit_reason: Option<String>,
    pub simulated: bool,
}

impl Position {
    /// Open a position from the first tranche fill
    pub fn open(
        mint: impl Into<String>,
        pool: impl Into<String>,
        tokens: u64,
        sol_spent: f64,
        simulated: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            mint: mint.into(),
            pool: pool.into(),
            token_amount: tokens,
            original_token_amount: tokens,
            invested_sol: sol_spent,
            realized_sol: 0.0,
            realized_pnl_sol: 0.0,
            avg_entry_price: fill_price(sol_spent, tokens),
            remaining_pct: 100.0,
            tier_sold: [false; TIER_COUNT],
            highest_profit_pct: 0.0,
            trailing_active: false,
            first_tranche_at: now,
            second_tranche_at: None,
            opened_at: now,
            closed_at: None,
            exit_reason: None,
            simulated,
        }
    }

    pub fn is_open(&self) -> bool {
        self.closed_at.is_none() && self.remaining_pct > 0.0
    }

    /// Untouched by any exit so far
    pub fn is_pristine(&self) -> bool {
        self.is_open() && self.remaining_pct >= 100.0 - PCT_EPSILON
    }

    /// Unrealized profit % at `price` (lamports per raw unit)
    pub fn profit_pct(&self, price: f64) -> f64 {
        if self.avg_entry_price <= 0.0 {
            return 0.0;
        }
        (price / self.avg_entry_price - 1.0) * 100.0
    }

    /// SOL cost of `tokens` at the average entry price
    pub fn cost_basis_sol(&self, tokens: u64) -> f64 {
        tokens as f64 * self.avg_entry_price / LAMPORTS_PER_SOL
    }

    /// Raw tokens for `pct` of the original size, capped at what is held
    pub fn tokens_for_original_pct(&self, pct: f64) -> u64 {
        let amount = (self.original_token_amount as f64 * pct / 100.0).floor() as u64;
        amount.min(self.token_amount)
    }

    /// Current value in SOL at `price`
    pub fn value_sol(&self, price: f64) -> f64 {
        self.token_amount as f64 * price / LAMPORTS_PER_SOL
    }

    /// Apply a partial update, enforcing the position invariants
    pub fn apply(&mut self, update: &PositionUpdate) -> Result<()> {
        if let Some(remaining) = update.remaining_pct {
            if !remaining.is_finite() || remaining < 0.0 {
                return Err(Error::Internal(format!(
                    "remaining_pct for {} cannot be {}",
                    self.mint, remaining
                )));
            }
            if remaining > self.remaining_pct + PCT_EPSILON {
                return Err(Error::Internal(format!(
                    "remaining_pct for {} cannot increase ({} -> {})",
                    self.mint, self.remaining_pct, remaining
                )));
            }
        }

        if let Some(fill) = &update.fill {
            if !self.is_pristine() {
                return Err(Error::Internal(format!(
                    "cannot add a fill to {} after exits have started",
                    self.mint
                )));
            }
            self.invested_sol += fill.sol;
            self.token_amount += fill.tokens;
            self.original_token_amount += fill.tokens;
            let held_cost = self.invested_sol - self.realized_sol + self.realized_pnl_sol;
            self.avg_entry_price = fill_price(held_cost, self.token_amount);
            self.second_tranche_at = Some(fill.at);
        }

        if let Some(sale) = &update.sale {
            if sale.tokens > self.token_amount {
                return Err(Error::Internal(format!(
                    "cannot sell {} tokens of {}, holding {}",
                    sale.tokens, self.mint, self.token_amount
                )));
            }
            self.token_amount -= sale.tokens;
            self.realized_sol += sale.proceeds_sol;
            self.realized_pnl_sol += sale.pnl_sol;
        }

        if let Some(shrink) = update.shrink_original {
            self.original_token_amount = self.original_token_amount.saturating_sub(shrink);
        }

        if let Some(tier) = update.tier_sold {
            if tier >= TIER_COUNT {
                return Err(Error::Internal(format!("tier index {} out of range", tier)));
            }
            self.tier_sold[tier] = true;
        }

        if let Some(peak) = update.highest_profit_pct {
            self.highest_profit_pct = self.highest_profit_pct.max(peak);
        }

        if let Some(active) = update.trailing_active {
            // Once armed the trailing stop stays armed
            self.trailing_active = self.trailing_active || active;
        }

        if let Some(remaining) = update.remaining_pct {
            self.remaining_pct = remaining;
        }

        if self.token_amount == 0 {
            self.remaining_pct = 0.0;
        }

        if self.remaining_pct <= 0.0 && self.closed_at.is_none() {
            self.remaining_pct = 0.0;
            self.closed_at = Some(Utc::now());
            self.exit_reason = update.exit_reason.clone();
        }

        Ok(())
    }
}

/// Additional buy fill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub tokens: u64,
    pub sol: f64,
    pub at: DateTime<Utc>,
}

/// Sell booked against the position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sale {
    pub tokens: u64,
    pub proceeds_sol: f64,
    pub pnl_sol: f64,
}

/// Partial update applied atomically under the per-mint lock
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub fill: Option<Fill>,
    pub sale: Option<Sale>,
    /// Tokens removed from the tier base (entry-phase sells)
    pub shrink_original: Option<u64>,
    pub remaining_pct: Option<f64>,
    pub tier_sold: Option<usize>,
    pub highest_profit_pct: Option<f64>,
    pub trailing_active: Option<bool>,
    pub exit_reason: Option<String>,
}

impl PositionUpdate {
    pub fn with_fill(mut self, tokens: u64, sol: f64) -> Self {
        self.fill = Some(Fill {
            tokens,
            sol,
            at: Utc::now(),
        });
        self
    }

    pub fn with_sale(mut self, tokens: u64, proceeds_sol: f64, pnl_sol: f64) -> Self {
        self.sale = Some(Sale {
            tokens,
            proceeds_sol,
            pnl_sol,
        });
        self
    }

    pub fn with_remaining(mut self, remaining_pct: f64) -> Self {
        self.remaining_pct = Some(remaining_pct);
        self
    }

    pub fn with_tier(mut self, tier: usize) -> Self {
        self.tier_sold = Some(tier);
        self
    }

    pub fn with_exit_reason(mut self, reason: impl Into<String>) -> Self {
        self.exit_reason = Some(reason.into());
        self
    }

    /// Full exit: remaining drops to zero
    pub fn closing(self, reason: impl Into<String>) -> Self {
        self.with_remaining(0.0).with_exit_reason(reason)
    }
}
