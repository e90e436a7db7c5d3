//! Market intelligence
//!
//! Security, health and emergency signals for a token. Missing data is an
//! explicit `None` in the reports so callers can fail closed on it.

pub mod composite;
pub mod dexscreener;
pub mod onchain;
pub mod rugcheck;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use composite::CompositeIntel;
pub use dexscreener::DexScreenerClient;
pub use onchain::{MintInspector, MintSnapshot, TokenProgram};
pub use rugcheck::RugCheckClient;

/// Security verdict for a mint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityReport {
    pub is_safe: bool,
    /// Buy tax in percent, `None` when unknown
    pub tax_pct_buy: Option<f64>,
    /// Sell tax in percent, `None` when unknown
    pub tax_pct_sell: Option<f64>,
    /// Mint and freeze authorities both revoked, `None` when unknown
    pub authorities_revoked: Option<bool>,
    pub reasons: Vec<String>,
}

impl SecurityReport {
    /// A clean report: no tax, authorities revoked
    pub fn clean() -> Self {
        Self {
            is_safe: true,
            tax_pct_buy: Some(0.0),
            tax_pct_sell: Some(0.0),
            authorities_revoked: Some(true),
            reasons: Vec::new(),
        }
    }

    pub fn unsafe_because(reason: impl Into<String>) -> Self {
        Self {
            is_safe: false,
            reasons: vec![reason.into()],
            ..Self::clean()
        }
    }
}

/// Liquidity and trading-activity verdict for a prospective trade
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub is_healthy: bool,
    /// Projected price impact of the trade in percent
    pub price_impact_pct: Option<f64>,
    pub liquidity_sol: Option<f64>,
    pub reasons: Vec<String>,
}

impl HealthReport {
    pub fn healthy(price_impact_pct: f64, liquidity_sol: f64) -> Self {
        Self {
            is_healthy: true,
            price_impact_pct: Some(price_impact_pct),
            liquidity_sol: Some(liquidity_sol),
            reasons: Vec::new(),
        }
    }

    pub fn unhealthy(reason: impl Into<String>) -> Self {
        Self {
            is_healthy: false,
            price_impact_pct: None,
            liquidity_sol: None,
            reasons: vec![reason.into()],
        }
    }
}

/// Result of the emergency-trigger check on a held token
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmergencyCheck {
    pub should_exit: bool,
    pub critical_reason: Option<String>,
}

impl EmergencyCheck {
    pub fn clear() -> Self {
        Self::default()
    }

    pub fn exit(reason: impl Into<String>) -> Self {
        Self {
            should_exit: true,
            critical_reason: Some(reason.into()),
        }
    }
}

/// Market intelligence collaborator
#[async_trait]
pub trait MarketIntel: Send + Sync {
    async fn check_security(&self, mint: &str) -> Result<SecurityReport>;

    /// Health of the market for a trade of `trade_size_sol`
    async fn check_market_health(&self, mint: &str, trade_size_sol: f64) -> Result<HealthReport>;

    /// Critical triggers for a held token; `current_price` is lamports per
    /// raw unit, `None` when the price probe failed
    async fn check_emergency_triggers(
        &self,
        mint: &str,
        current_price: Option<f64>,
    ) -> Result<EmergencyCheck>;
}

pub mod testing {
    //! Static intel double: clean reports unless scripted otherwise

    use super::*;
    use crate::error::Error;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct StaticIntel {
        security: Mutex<HashMap<String, SecurityReport>>,
        health: Mutex<HashMap<String, HealthReport>>,
        emergencies: Mutex<HashMap<String, String>>,
        failing: Mutex<HashSet<String>>,
        emergency_calls: Mutex<Vec<(String, Option<f64>)>>,
    }

    impl StaticIntel {
        pub fn new() -> Self {
            Self::default()
        }

        fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
            m.lock().unwrap_or_else(|e| e.into_inner())
        }

        pub fn set_security(&self, mint: &str, report: SecurityReport) {
            Self::lock(&self.security).insert(mint.to_string(), report);
        }

        pub fn set_health(&self, mint: &str, report: HealthReport) {
            Self::lock(&self.health).insert(mint.to_string(), report);
        }

        /// Fire an emergency trigger for `mint` on every check
        pub fn trigger_emergency(&self, mint: &str, reason: &str) {
            Self::lock(&self.emergencies).insert(mint.to_string(), reason.to_string());
        }

        pub fn clear_emergency(&self, mint: &str) {
            Self::lock(&self.emergencies).remove(mint);
        }

        /// Every call for `mint` returns a provider error
        pub fn fail(&self, mint: &str) {
            Self::lock(&self.failing).insert(mint.to_string());
        }

        /// Arguments of every emergency check so far
        pub fn emergency_calls(&self) -> Vec<(String, Option<f64>)> {
            Self::lock(&self.emergency_calls).clone()
        }

        fn check_failing(&self, mint: &str) -> Result<()> {
            if Self::lock(&self.failing).contains(mint) {
                return Err(Error::Rpc(format!("intel unavailable for {}", mint)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl MarketIntel for StaticIntel {
        async fn check_security(&self, mint: &str) -> Result<SecurityReport> {
            self.check_failing(mint)?;
            Ok(Self::lock(&self.security)
                .get(mint)
                .cloned()
                .unwrap_or_else(SecurityReport::clean))
        }

        async fn check_market_health(&self, mint: &str, _trade_size_sol: f64) -> Result<HealthReport> {
            self.check_failing(mint)?;
            Ok(Self::lock(&self.health)
                .get(mint)
                .cloned()
                .unwrap_or_else(|| HealthReport::healthy(1.0, 100.0)))
        }

        async fn check_emergency_triggers(
            &self,
            mint: &str,
            current_price: Option<f64>,
        ) -> Result<EmergencyCheck> {
            Self::lock(&self.emergency_calls).push((mint.to_string(), current_price));
            self.check_failing(mint)?;
            Ok(match Self::lock(&self.emergencies).get(mint) {
                Some(reason) => EmergencyCheck::exit(reason.clone()),
                None => EmergencyCheck::clear(),
            })
        }
    }
}
