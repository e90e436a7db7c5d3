//! Exit Manager
//!
//! Pure exit decision for one position at one price. The monitor owns the
//! emergency check and execution; this module only decides what to sell.
//!
//! Priority after the emergency check: tiered profit-taking, trailing stop
//! on the residual, stop loss. At most one signal per evaluation.

use serde::{Deserialize, Serialize};

use crate::config::MonitorConfig;
use crate::position::Position;

/// How fast an exit must go out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    /// Elevated slippage, no impact ceiling
    Immediate,
    /// Normal exit slippage
    Normal,
}

/// Reason for exit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Emergency { reason: String },
    Tier { index: usize, threshold_pct: f64 },
    TrailingStop { peak_pnl_pct: f64, current_pnl_pct: f64 },
    StopLoss { loss_pct: f64 },
    Manual,
}

impl ExitReason {
    pub fn is_full_exit(&self) -> bool {
        !matches!(self, ExitReason::Tier { .. })
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::Emergency { reason } => write!(f, "emergency: {}", reason),
            ExitReason::Tier {
                index,
                threshold_pct,
            } => write!(f, "tier {} (+{:.0}%)", index + 1, threshold_pct),
            ExitReason::TrailingStop {
                peak_pnl_pct,
                current_pnl_pct,
            } => write!(
                f,
                "trailing stop ({:+.1}% from peak {:+.1}%)",
                current_pnl_pct, peak_pnl_pct
            ),
            ExitReason::StopLoss { loss_pct } => write!(f, "stop loss (-{:.1}%)", loss_pct),
            ExitReason::Manual => write!(f, "manual"),
        }
    }
}

/// Sell to execute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitSignal {
    pub mint: String,
    pub reason: ExitReason,
    pub urgency: Urgency,
    /// Raw tokens to sell
    pub tokens_to_sell: u64,
    /// remaining_pct once the sell lands
    pub remaining_after_pct: f64,
}

/// Evaluation of one position at one price
#[derive(Debug, Clone, PartialEq)]
pub struct ExitEvaluation {
    pub profit_pct: f64,
    /// Peak profit including this observation
    pub peak_profit_pct: f64,
    /// Trailing stop armed after this observation
    pub trailing_active: bool,
    pub signal: Option<ExitSignal>,
}

impl ExitEvaluation {
    /// Whether the trailing state moved and should be persisted
    pub fn changes_state(&self, position: &Position) -> bool {
        self.peak_profit_pct > position.highest_profit_pct
            || (self.trailing_active && !position.trailing_active)
    }
}

pub struct ExitManager {
    config: MonitorConfig,
}

impl ExitManager {
    pub fn new(config: MonitorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Full exit of everything still held
    pub fn full_exit(position: &Position, reason: ExitReason, urgency: Urgency) -> ExitSignal {
        ExitSignal {
            mint: position.mint.clone(),
            reason,
            urgency,
            tokens_to_sell: position.token_amount,
            remaining_after_pct: 0.0,
        }
    }

    /// Decide the exit for `position` at `price` (lamports per raw unit)
    pub fn evaluate(&self, position: &Position, price: f64) -> ExitEvaluation {
        let profit_pct = position.profit_pct(price);
        let peak_profit_pct = position.highest_profit_pct.max(profit_pct);
        let trailing_active = position.trailing_active
            || (position.remaining_pct <= self.config.trailing_residual_pct
                && peak_profit_pct >= self.config.trailing_activation_pct);

        let mut evaluation = ExitEvaluation {
            profit_pct,
            peak_profit_pct,
            trailing_active,
            signal: None,
        };

        if !position.is_open() {
            return evaluation;
        }

        evaluation.signal = self
            .check_tiers(position, profit_pct)
            .or_else(|| self.check_trailing(position, profit_pct, peak_profit_pct, trailing_active))
            .or_else(|| self.check_stop_loss(position, profit_pct));
        evaluation
    }

    /// Lowest unsold tier whose threshold has been crossed
    fn check_tiers(&self, position: &Position, profit_pct: f64) -> Option<ExitSignal> {
        for (index, tier) in self.config.tiers.iter().enumerate() {
            if position.tier_sold.get(index).copied().unwrap_or(true) {
                continue;
            }
            if profit_pct < tier.threshold_pct {
                return None;
            }

            let remaining_after_pct = (position.remaining_pct - tier.sell_pct).max(0.0);
            let tokens_to_sell = if remaining_after_pct <= 0.0 {
                position.token_amount
            } else {
                position.tokens_for_original_pct(tier.sell_pct)
            };
            return Some(ExitSignal {
                mint: position.mint.clone(),
                reason: ExitReason::Tier {
                    index,
                    threshold_pct: tier.threshold_pct,
                },
                urgency: Urgency::Normal,
                tokens_to_sell,
                remaining_after_pct,
            });
        }
        None
    }

    fn check_trailing(
        &self,
        position: &Position,
        profit_pct: f64,
        peak_profit_pct: f64,
        trailing_active: bool,
    ) -> Option<ExitSignal> {
        if !trailing_active || position.remaining_pct > self.config.trailing_residual_pct {
            return None;
        }
        if profit_pct > peak_profit_pct - self.config.trailing_drawdown_pct {
            return None;
        }
        Some(Self::full_exit(
            position,
            ExitReason::TrailingStop {
                peak_pnl_pct: peak_profit_pct,
                current_pnl_pct: profit_pct,
            },
            Urgency::Normal,
        ))
    }

    fn check_stop_loss(&self, position: &Position, profit_pct: f64) -> Option<ExitSignal> {
        if profit_pct > -self.config.stop_loss_pct {
            return None;
        }
        Some(Self::full_exit(
            position,
            ExitReason::StopLoss {
                loss_pct: -profit_pct,
            },
            Urgency::Normal,
        ))
    }
}

impl Default for ExitManager {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}
