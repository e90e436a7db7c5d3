//! Stream types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A newly detected liquidity pool, consumed once by the validation pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolCandidate {
    /// Token mint address
    pub mint: String,
    /// Pool identifier (AMM pool or bonding curve account)
    pub pool: String,
    /// Measured liquidity in SOL
    pub liquidity_sol: f64,
    pub detected_at: DateTime<Utc>,
}

impl PoolCandidate {
    pub fn new(mint: impl Into<String>, pool: impl Into<String>, liquidity_sol: f64) -> Self {
        Self {
            mint: mint.into(),
            pool: pool.into(),
            liquidity_sol,
            detected_at: Utc::now(),
        }
    }

    /// Seconds since detection
    pub fn age_secs(&self) -> i64 {
        (Utc::now() - self.detected_at).num_seconds()
    }
}
