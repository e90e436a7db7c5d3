//! Engine events

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Structured event published by the engine
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    CandidateDetected {
        mint: String,
        pool: String,
        liquidity_sol: f64,
    },
    /// Candidate dropped before validation (queue overflow, blacklist)
    CandidateSkipped {
        mint: String,
        reason: String,
    },
    StagePassed {
        mint: String,
        stage: usize,
        name: String,
    },
    StageFailed {
        mint: String,
        stage: usize,
        name: String,
        reason: String,
    },
    TrancheFilled {
        mint: String,
        tranche: u8,
        sol_amount: f64,
        token_amount: u64,
        signature: String,
        simulated: bool,
    },
    TrancheSkipped {
        mint: String,
        reason: String,
    },
    EmergencyExit {
        mint: String,
        reason: String,
        sol_received: f64,
        success: bool,
    },
    TierExit {
        mint: String,
        tier: usize,
        profit_pct: f64,
        remaining_pct: f64,
        sol_received: f64,
    },
    TrailingExit {
        mint: String,
        peak_profit_pct: f64,
        profit_pct: f64,
        sol_received: f64,
    },
    StopLoss {
        mint: String,
        profit_pct: f64,
        sol_received: f64,
        pnl_sol: f64,
    },
    ManualExit {
        mint: String,
        sol_received: f64,
    },
    /// A sell was attempted and failed
    ExitFailed {
        mint: String,
        reason: String,
        error: String,
    },
    PersistenceError {
        context: String,
        error: String,
    },
    ListenerStatus {
        connected: bool,
        detail: String,
    },
}

impl EngineEvent {
    /// Mint the event refers to, if any
    pub fn mint(&self) -> Option<&str> {
        match self {
            EngineEvent::CandidateDetected { mint, .. }
            | EngineEvent::CandidateSkipped { mint, .. }
            | EngineEvent::StagePassed { mint, .. }
            | EngineEvent::StageFailed { mint, .. }
            | EngineEvent::TrancheFilled { mint, .. }
            | EngineEvent::TrancheSkipped { mint, .. }
            | EngineEvent::EmergencyExit { mint, .. }
            | EngineEvent::TierExit { mint, .. }
            | EngineEvent::TrailingExit { mint, .. }
            | EngineEvent::StopLoss { mint, .. }
            | EngineEvent::ManualExit { mint, .. }
            | EngineEvent::ExitFailed { mint, .. } => Some(mint),
            EngineEvent::PersistenceError { .. } | EngineEvent::ListenerStatus { .. } => None,
        }
    }

    /// Human-readable one-line description
    pub fn description(&self) -> String {
        match self {
            EngineEvent::CandidateDetected {
                mint,
                liquidity_sol,
                ..
            } => format!("New pool for {} ({:.3} SOL liquidity)", mint, liquidity_sol),
            EngineEvent::CandidateSkipped { mint, reason } => {
                format!("Skipped {}: {}", mint, reason)
            }
            EngineEvent::StagePassed { mint, stage, name } => {
                format!("{} passed stage {} ({})", mint, stage, name)
            }
            EngineEvent::StageFailed {
                mint,
                stage,
                name,
                reason,
            } => format!("{} failed stage {} ({}): {}", mint, stage, name, reason),
            EngineEvent::TrancheFilled {
                mint,
                tranche,
                sol_amount,
                simulated,
                ..
            } => format!(
                "Tranche {} filled for {}: {:.4} SOL{}",
                tranche,
                mint,
                sol_amount,
                if *simulated { " [SIM]" } else { "" }
            ),
            EngineEvent::TrancheSkipped { mint, reason } => {
                format!("Second tranche skipped for {}: {}", mint, reason)
            }
            EngineEvent::EmergencyExit {
                mint,
                reason,
                sol_received,
                success,
            } => format!(
                "EMERGENCY exit {} {}: {} ({:.4} SOL)",
                mint,
                if *success { "done" } else { "FAILED" },
                reason,
                sol_received
            ),
            EngineEvent::TierExit {
                mint,
                tier,
                profit_pct,
                remaining_pct,
                ..
            } => format!(
                "Tier {} exit {} at {:+.1}%, {:.0}% remaining",
                tier + 1,
                mint,
                profit_pct,
                remaining_pct
            ),
            EngineEvent::TrailingExit {
                mint,
                peak_profit_pct,
                profit_pct,
                ..
            } => format!(
                "Trailing stop {} at {:+.1}% (peak {:+.1}%)",
                mint, profit_pct, peak_profit_pct
            ),
            EngineEvent::StopLoss {
                mint,
                profit_pct,
                pnl_sol,
                ..
            } => format!(
                "Stop loss {} at {:+.1}% (PnL {:+.4} SOL)",
                mint, profit_pct, pnl_sol
            ),
            EngineEvent::ManualExit { mint, sol_received } => {
                format!("Manual exit {} ({:.4} SOL)", mint, sol_received)
            }
            EngineEvent::ExitFailed {
                mint,
                reason,
                error,
            } => format!("Exit ({}) failed for {}: {}", reason, mint, error),
            EngineEvent::PersistenceError { context, error } => {
                format!("Persistence error ({}): {}", context, error)
            }
            EngineEvent::ListenerStatus { connected, detail } => format!(
                "Listener {}: {}",
                if *connected { "connected" } else { "disconnected" },
                detail
            ),
        }
    }

    /// Whether this event should be logged at warn level
    pub fn is_alert(&self) -> bool {
        matches!(
            self,
            EngineEvent::EmergencyExit { .. }
                | EngineEvent::ExitFailed { .. }
                | EngineEvent::PersistenceError { .. }
        )
    }
}

/// Event with its publication time, as delivered to subscribers
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: EngineEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_tag() {
        let event = EngineEvent::StopLoss {
            mint: "m".into(),
            profit_pct: -3.0,
            sol_received: 0.97,
            pnl_sol: -0.03,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "stop_loss");
        assert_eq!(json["mint"], "m");
    }

    #[test]
    fn test_description_mentions_reason() {
        let event = EngineEvent::StageFailed {
            mint: "m".into(),
            stage: 1,
            name: "liquidity".into(),
            reason: "Insufficient LP: 0.300 SOL < 0.500 SOL".into(),
        };
        assert!(event.description().contains("Insufficient LP"));
        assert_eq!(event.mint(), Some("m"));
    }

    #[test]
    fn test_envelope_flattens() {
        let envelope = Envelope {
            at: Utc::now(),
            event: EngineEvent::ListenerStatus {
                connected: true,
                detail: "ok".into(),
            },
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "listener_status");
        assert!(json.get("at").is_some());
    }
}
