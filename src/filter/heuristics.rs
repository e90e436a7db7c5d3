//! Pluggable safety heuristics consulted by the security stage
//!
//! The shipped heuristics have no detection logic yet and always pass.
//! They say so in their verdict so the audit trail never implies a check
//! that did not happen.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::Result;
use crate::stream::PoolCandidate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeuristicVerdict {
    pub heuristic: String,
    pub passed: bool,
    /// True when the heuristic passed without inspecting anything
    pub default_pass: bool,
    pub reason: Option<String>,
}

impl HeuristicVerdict {
    pub fn default_pass(name: &str) -> Self {
        Self {
            heuristic: name.to_string(),
            passed: true,
            default_pass: true,
            reason: None,
        }
    }

    pub fn to_details(&self) -> Value {
        json!({
            "heuristic": self.heuristic,
            "passed": self.passed,
            "default_pass": self.default_pass,
            "reason": self.reason,
        })
    }
}

#[async_trait]
pub trait SafetyHeuristic: Send + Sync {
    fn name(&self) -> &'static str;

    async fn evaluate(&self, candidate: &PoolCandidate) -> Result<HeuristicVerdict>;
}

/// Slow liquidity drain by the deployer
pub struct SoftRugHeuristic;

#[async_trait]
impl SafetyHeuristic for SoftRugHeuristic {
    fn name(&self) -> &'static str {
        "soft_rug"
    }

    async fn evaluate(&self, _candidate: &PoolCandidate) -> Result<HeuristicVerdict> {
        Ok(HeuristicVerdict::default_pass(self.name()))
    }
}

/// Wash trading and bundled launch buys
pub struct BotActivityHeuristic;

#[async_trait]
impl SafetyHeuristic for BotActivityHeuristic {
    fn name(&self) -> &'static str {
        "bot_activity"
    }

    async fn evaluate(&self, _candidate: &PoolCandidate) -> Result<HeuristicVerdict> {
        Ok(HeuristicVerdict::default_pass(self.name()))
    }
}

pub fn default_heuristics() -> Vec<Arc<dyn SafetyHeuristic>> {
    vec![Arc::new(SoftRugHeuristic), Arc::new(BotActivityHeuristic)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_defaults_report_themselves() {
        let candidate = PoolCandidate::new("tok", "pool", 10.0);
        for heuristic in default_heuristics() {
            let verdict = heuristic.evaluate(&candidate).await.unwrap();
            assert!(verdict.passed);
            let details = verdict.to_details();
            assert_eq!(details["default_pass"], true);
            assert_eq!(details["heuristic"], heuristic.name());
        }
    }
}
