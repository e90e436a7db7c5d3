//! Validation result types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::persistence::TradeRecord;
use crate::strategy::{RiskReservation, TrancheReport};
use crate::stream::PoolCandidate;

/// Outcome of one validation stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// 1-based position in the pipeline
    pub stage: usize,
    pub name: String,
    pub passed: bool,
    pub reason: Option<String>,
    pub details: Value,
}

/// What a stage reports before the pipeline numbers it
#[derive(Debug, Clone, PartialEq)]
pub struct StageVerdict {
    pub passed: bool,
    pub reason: Option<String>,
    pub details: Value,
}

impl StageVerdict {
    pub fn pass(details: Value) -> Self {
        Self {
            passed: true,
            reason: None,
            details,
        }
    }

    pub fn fail(reason: impl Into<String>, details: Value) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
            details,
        }
    }

    pub fn into_result(self, stage: usize, name: &str) -> StageResult {
        StageResult {
            stage,
            name: name.to_string(),
            passed: self.passed,
            reason: self.reason,
            details: self.details,
        }
    }
}

/// Mutable state threaded through one candidate's stages
#[derive(Debug)]
pub struct StageContext {
    pub candidate: PoolCandidate,
    /// Total SOL the buy will commit across both tranches
    pub notional_sol: f64,
    /// Set by a stage whose failure should blacklist the mint
    pub blacklist: bool,
    /// Position slot held from admission until the run ends
    pub reservation: Option<RiskReservation>,
    pub tranche: Option<TrancheReport>,
}

impl StageContext {
    pub fn new(candidate: PoolCandidate, notional_sol: f64) -> Self {
        Self {
            candidate,
            notional_sol,
            blacklist: false,
            reservation: None,
            tranche: None,
        }
    }

    pub fn mint(&self) -> &str {
        &self.candidate.mint
    }

    pub fn trades(&self) -> &[TradeRecord] {
        self.tranche.as_ref().map(|t| t.trades.as_slice()).unwrap_or(&[])
    }
}

/// Audit trail of one pipeline run
///
/// `results` holds only the stages that ran: a failure at stage k leaves
/// exactly k entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub mint: String,
    pub results: Vec<StageResult>,
    pub success: bool,
    pub failed_stage: Option<usize>,
    pub failed_stage_name: Option<String>,
    /// Ledger entries written by the buy stage
    pub trade_ids: Vec<Uuid>,
}

impl PipelineResult {
    pub fn failure_reason(&self) -> Option<&str> {
        self.results
            .iter()
            .find(|r| !r.passed)
            .and_then(|r| r.reason.as_deref())
    }
}
