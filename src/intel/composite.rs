//! Composite intel provider
//!
//! Combines the mint account, RugCheck and DexScreener. The first reading
//! taken for a mint becomes its baseline; emergency triggers compare later
//! readings against it.

use async_trait::async_trait;
use dashmap::DashMap;
use solana_client::nonblocking::rpc_client::RpcClient;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::dexscreener::{DexPair, DexScreenerClient};
use super::onchain::{MintInspector, MintSnapshot};
use super::rugcheck::RugCheckClient;
use super::{EmergencyCheck, HealthReport, MarketIntel, SecurityReport};
use crate::config::IntelConfig;
use crate::error::Result;

/// What a mint looked like when first checked
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Baseline {
    pub liquidity_sol: Option<f64>,
    pub authorities_revoked: Option<bool>,
    pub danger_risks: BTreeSet<String>,
}

pub struct CompositeIntel {
    config: IntelConfig,
    mints: MintInspector,
    rugcheck: RugCheckClient,
    dexscreener: DexScreenerClient,
    baselines: DashMap<String, Baseline>,
}

impl CompositeIntel {
    pub fn new(config: IntelConfig, rpc: Arc<RpcClient>) -> Self {
        let timeout = Duration::from_millis(config.timeout_ms);
        Self {
            mints: MintInspector::new(rpc),
            rugcheck: RugCheckClient::new(config.rugcheck_url.clone(), timeout),
            dexscreener: DexScreenerClient::new(config.dexscreener_url.clone(), timeout),
            baselines: DashMap::new(),
            config,
        }
    }

    pub fn baseline(&self, mint: &str) -> Option<Baseline> {
        self.baselines.get(mint).map(|b| b.clone())
    }

    fn record(&self, mint: &str, apply: impl FnOnce(&mut Baseline)) {
        let mut entry = self.baselines.entry(mint.to_string()).or_default();
        apply(&mut entry);
    }
}

/// Security verdict from the mint account and RugCheck danger risks
pub fn security_report(snapshot: &MintSnapshot, danger_risks: &[String]) -> SecurityReport {
    let mut reasons = Vec::new();
    for ext in &snapshot.dangerous_extensions {
        reasons.push(format!("dangerous extension: {}", ext));
    }
    for risk in danger_risks {
        reasons.push(format!("rugcheck: {}", risk));
    }
    if snapshot.mint_authority.is_some() {
        reasons.push("mint authority not revoked".to_string());
    }
    if snapshot.freeze_authority.is_some() {
        reasons.push("freeze authority not revoked".to_string());
    }

    let tax = snapshot.transfer_tax_pct();
    SecurityReport {
        is_safe: snapshot.dangerous_extensions.is_empty() && danger_risks.is_empty(),
        tax_pct_buy: Some(tax),
        tax_pct_sell: Some(tax),
        authorities_revoked: Some(snapshot.authorities_revoked()),
        reasons,
    }
}

/// Constant-product estimate of the impact of spending `trade_size_sol`
pub fn estimate_impact_pct(trade_size_sol: f64, liquidity_sol: f64) -> f64 {
    if liquidity_sol <= 0.0 {
        return 100.0;
    }
    trade_size_sol / (liquidity_sol + trade_size_sol) * 100.0
}

/// Health verdict from DexScreener pair data
pub fn health_report(pair: Option<&DexPair>, trade_size_sol: f64, min_sells_5m: u32) -> HealthReport {
    let Some(pair) = pair else {
        return HealthReport::unhealthy("no indexed SOL pool");
    };
    let Some(liquidity) = pair.liquidity_sol() else {
        return HealthReport::unhealthy("pool liquidity unknown");
    };

    let mut report = HealthReport::healthy(estimate_impact_pct(trade_size_sol, liquidity), liquidity);
    match pair.txns_5m() {
        Some((_, sells)) if sells >= min_sells_5m => {}
        Some((buys, sells)) => {
            report.is_healthy = false;
            report
                .reasons
                .push(format!("{} sells vs {} buys in last 5m", sells, buys));
        }
        None => {
            report.is_healthy = false;
            report.reasons.push("recent trade counts unknown".to_string());
        }
    }
    report
}

/// Compare a fresh reading against the baseline
pub fn emergency_check(
    baseline: &Baseline,
    liquidity_sol: Option<f64>,
    authorities_revoked: Option<bool>,
    danger_risks: &[String],
    liquidity_drop_exit_pct: f64,
) -> EmergencyCheck {
    if let (Some(base), Some(now)) = (baseline.liquidity_sol, liquidity_sol) {
        if base > 0.0 {
            let drop_pct = (1.0 - now / base) * 100.0;
            if drop_pct >= liquidity_drop_exit_pct {
                return EmergencyCheck::exit(format!(
                    "liquidity removed: {:.3} -> {:.3} SOL ({:.0}% drop)",
                    base, now, drop_pct
                ));
            }
        }
    }

    if baseline.authorities_revoked == Some(true) && authorities_revoked == Some(false) {
        return EmergencyCheck::exit("mint or freeze authority re-enabled");
    }

    let fresh: Vec<&String> = danger_risks
        .iter()
        .filter(|r| !baseline.danger_risks.contains(*r))
        .collect();
    if !fresh.is_empty() {
        let names: Vec<&str> = fresh.iter().map(|s| s.as_str()).collect();
        return EmergencyCheck::exit(format!("new danger risks: {}", names.join(", ")));
    }

    EmergencyCheck::clear()
}

#[async_trait]
impl MarketIntel for CompositeIntel {
    async fn check_security(&self, mint: &str) -> Result<SecurityReport> {
        let (snapshot, summary) = tokio::join!(self.mints.inspect(mint), self.rugcheck.summary(mint));
        let snapshot = snapshot?;
        let danger = summary?.danger_risks();

        let report = security_report(&snapshot, &danger);
        self.record(mint, |b| {
            b.authorities_revoked.get_or_insert(snapshot.authorities_revoked());
            if b.danger_risks.is_empty() {
                b.danger_risks = danger.iter().cloned().collect();
            }
        });
        debug!(mint = %mint, safe = report.is_safe, reasons = ?report.reasons, "Security checked");
        Ok(report)
    }

    async fn check_market_health(&self, mint: &str, trade_size_sol: f64) -> Result<HealthReport> {
        let pair = self.dexscreener.get_token_pair(mint).await?;
        let report = health_report(pair.as_ref(), trade_size_sol, self.config.min_sells_5m);
        if let Some(liquidity) = report.liquidity_sol {
            self.record(mint, |b| {
                b.liquidity_sol.get_or_insert(liquidity);
            });
        }
        Ok(report)
    }

    async fn check_emergency_triggers(
        &self,
        mint: &str,
        current_price: Option<f64>,
    ) -> Result<EmergencyCheck> {
        if current_price == Some(0.0) {
            return Ok(EmergencyCheck::exit("price probe returned zero proceeds"));
        }

        let (pair, snapshot, summary) = tokio::join!(
            self.dexscreener.get_token_pair(mint),
            self.mints.inspect(mint),
            self.rugcheck.summary(mint)
        );

        // Partial readings still count; only a total outage is an error
        let liquidity = match &pair {
            Ok(pair) => pair.as_ref().and_then(|p| p.liquidity_sol()),
            Err(e) => {
                warn!(mint = %mint, "Emergency liquidity read failed: {}", e);
                None
            }
        };
        let revoked = match &snapshot {
            Ok(s) => Some(s.authorities_revoked()),
            Err(e) => {
                warn!(mint = %mint, "Emergency mint read failed: {}", e);
                None
            }
        };
        let danger = match &summary {
            Ok(s) => s.danger_risks(),
            Err(e) => {
                warn!(mint = %mint, "Emergency rugcheck read failed: {}", e);
                Vec::new()
            }
        };
        if let (Err(e), Err(_), Err(_)) = (pair, snapshot, summary) {
            return Err(e);
        }

        let Some(baseline) = self.baseline(mint) else {
            // First reading after a restart becomes the baseline
            self.record(mint, |b| {
                b.liquidity_sol = liquidity;
                b.authorities_revoked = revoked;
                b.danger_risks = danger.iter().cloned().collect();
            });
            return Ok(EmergencyCheck::clear());
        };

        let check = emergency_check(
            &baseline,
            liquidity,
            revoked,
            &danger,
            self.config.liquidity_drop_exit_pct,
        );
        if !check.should_exit {
            self.record(mint, |b| {
                if b.liquidity_sol.is_none() {
                    b.liquidity_sol = liquidity;
                }
            });
        }
        Ok(check)
    }
}
