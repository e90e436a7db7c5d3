//! Validation stages
//!
//! Stages 1-5 only read from the quote provider, intel and the ledger.
//! Stage 6 is the only one that sends a transaction.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use super::heuristics::SafetyHeuristic;
use super::types::{StageContext, StageVerdict};
use crate::config::{lamports_to_sol, sol_to_lamports, ValidationConfig, WSOL_MINT};
use crate::error::Result;
use crate::intel::MarketIntel;
use crate::persistence::TokenState;
use crate::position::PositionStore;
use crate::strategy::{RiskAdmission, TrancheEngine, TrancheOutcome};
use crate::trading::SwapProvider;

/// One admission gate
#[async_trait]
pub trait ValidationStage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Lifecycle state the mint reaches once this stage passes
    fn advances_to(&self) -> Option<TokenState> {
        None
    }

    /// `Err` counts as a failure; it never passes a candidate
    async fn run(&self, ctx: &mut StageContext) -> Result<StageVerdict>;
}

/// Stage 1: pool depth floor
pub struct LiquidityStage {
    min_liquidity_sol: f64,
}

impl LiquidityStage {
    pub fn new(min_liquidity_sol: f64) -> Self {
        Self { min_liquidity_sol }
    }
}

#[async_trait]
impl ValidationStage for LiquidityStage {
    fn name(&self) -> &'static str {
        "liquidity"
    }

    async fn run(&self, ctx: &mut StageContext) -> Result<StageVerdict> {
        let liquidity = ctx.candidate.liquidity_sol;
        let details = json!({
            "liquidity_sol": liquidity,
            "min_liquidity_sol": self.min_liquidity_sol,
        });
        if !liquidity.is_finite() || liquidity < self.min_liquidity_sol {
            return Ok(StageVerdict::fail(
                format!(
                    "Insufficient LP: {:.3} SOL < {:.3} SOL",
                    liquidity, self.min_liquidity_sol
                ),
                details,
            ));
        }
        Ok(StageVerdict::pass(details))
    }
}

/// Stage 2: buy and sell routes both exist and a round trip keeps its value
pub struct RouteStage {
    provider: Arc<dyn SwapProvider>,
    test_amount_sol: f64,
    max_impact_pct: f64,
    min_return_pct: f64,
    slippage_bps: u32,
}

impl RouteStage {
    pub fn new(provider: Arc<dyn SwapProvider>, config: &ValidationConfig, slippage_bps: u32) -> Self {
        Self {
            provider,
            test_amount_sol: config.route_test_amount_sol,
            max_impact_pct: config.route_max_impact_pct,
            min_return_pct: config.route_min_return_pct,
            slippage_bps,
        }
    }
}

#[async_trait]
impl ValidationStage for RouteStage {
    fn name(&self) -> &'static str {
        "route"
    }

    async fn run(&self, ctx: &mut StageContext) -> Result<StageVerdict> {
        let mint = ctx.mint();
        let lamports = sol_to_lamports(self.test_amount_sol).max(1);

        let Some(buy) = self
            .provider
            .get_quote(WSOL_MINT, mint, lamports, self.slippage_bps)
            .await?
        else {
            return Ok(StageVerdict::fail("No buy route", json!({ "side": "buy" })));
        };
        if buy.out_amount == 0 {
            return Ok(StageVerdict::fail("Buy route returns no tokens", json!({ "side": "buy" })));
        }

        let Some(sell) = self
            .provider
            .get_quote(mint, WSOL_MINT, buy.out_amount, self.slippage_bps)
            .await?
        else {
            return Ok(StageVerdict::fail("No sell route", json!({ "side": "sell" })));
        };

        let return_pct = sell.out_amount as f64 / lamports as f64 * 100.0;
        let details = json!({
            "test_amount_sol": lamports_to_sol(lamports),
            "tokens_quoted": buy.out_amount,
            "sol_returned": lamports_to_sol(sell.out_amount),
            "buy_impact_pct": buy.price_impact_pct,
            "sell_impact_pct": sell.price_impact_pct,
            "return_pct": return_pct,
        });
        debug!(mint = %mint, return_pct, "Route round trip quoted");

        let worst_impact = buy.price_impact_pct.max(sell.price_impact_pct);
        if worst_impact > self.max_impact_pct {
            return Ok(StageVerdict::fail(
                format!(
                    "Route impact {:.2}% > {:.2}%",
                    worst_impact, self.max_impact_pct
                ),
                details,
            ));
        }
        if return_pct < self.min_return_pct {
            return Ok(StageVerdict::fail(
                format!(
                    "Round trip returns {:.1}% < {:.1}%",
                    return_pct, self.min_return_pct
                ),
                details,
            ));
        }
        Ok(StageVerdict::pass(details))
    }
}

/// Stage 3: honeypot, tax and authority checks plus safety heuristics
///
/// Missing data rejects. Definite findings also blacklist the mint.
pub struct SecurityStage {
    intel: Arc<dyn MarketIntel>,
    heuristics: Vec<Arc<dyn SafetyHeuristic>>,
    max_buy_tax_pct: f64,
    max_sell_tax_pct: f64,
    require_authorities_revoked: bool,
}

impl SecurityStage {
    pub fn new(
        intel: Arc<dyn MarketIntel>,
        heuristics: Vec<Arc<dyn SafetyHeuristic>>,
        config: &ValidationConfig,
    ) -> Self {
        Self {
            intel,
            heuristics,
            max_buy_tax_pct: config.max_buy_tax_pct,
            max_sell_tax_pct: config.max_sell_tax_pct,
            require_authorities_revoked: config.require_authorities_revoked,
        }
    }
}

fn check_tax(side: &str, tax: Option<f64>, max_pct: f64, failures: &mut Vec<String>) -> bool {
    match tax {
        None => {
            failures.push(format!("{} tax unknown", side));
            false
        }
        Some(pct) if pct > max_pct => {
            failures.push(format!("{} tax {:.1}% > {:.1}%", side, pct, max_pct));
            true
        }
        Some(_) => false,
    }
}

#[async_trait]
impl ValidationStage for SecurityStage {
    fn name(&self) -> &'static str {
        "security"
    }

    fn advances_to(&self) -> Option<TokenState> {
        Some(TokenState::SecurityVerified)
    }

    async fn run(&self, ctx: &mut StageContext) -> Result<StageVerdict> {
        let report = self.intel.check_security(ctx.mint()).await?;

        let mut failures = Vec::new();
        let mut definite = false;

        if !report.is_safe {
            definite = true;
            if report.reasons.is_empty() {
                failures.push("flagged unsafe".to_string());
            } else {
                failures.extend(report.reasons.iter().cloned());
            }
        }
        definite |= check_tax("buy", report.tax_pct_buy, self.max_buy_tax_pct, &mut failures);
        definite |= check_tax("sell", report.tax_pct_sell, self.max_sell_tax_pct, &mut failures);

        if self.require_authorities_revoked {
            match report.authorities_revoked {
                None => failures.push("authority status unknown".to_string()),
                Some(false) => {
                    definite = true;
                    failures.push("mint or freeze authority not revoked".to_string());
                }
                Some(true) => {}
            }
        }

        let mut heuristics: Vec<Value> = Vec::with_capacity(self.heuristics.len());
        for heuristic in &self.heuristics {
            match heuristic.evaluate(&ctx.candidate).await {
                Ok(verdict) => {
                    if !verdict.passed {
                        definite = true;
                        failures.push(
                            verdict
                                .reason
                                .clone()
                                .unwrap_or_else(|| format!("{} heuristic rejected", verdict.heuristic)),
                        );
                    }
                    heuristics.push(verdict.to_details());
                }
                Err(e) => {
                    failures.push(format!("{} heuristic errored: {}", heuristic.name(), e));
                    heuristics.push(json!({ "heuristic": heuristic.name(), "error": e.to_string() }));
                }
            }
        }

        let details = json!({
            "is_safe": report.is_safe,
            "tax_pct_buy": report.tax_pct_buy,
            "tax_pct_sell": report.tax_pct_sell,
            "authorities_revoked": report.authorities_revoked,
            "reasons": report.reasons,
            "heuristics": heuristics,
        });

        if failures.is_empty() {
            return Ok(StageVerdict::pass(details));
        }
        ctx.blacklist = definite;
        Ok(StageVerdict::fail(failures.join("; "), details))
    }
}

/// Stage 4: market health and price impact at the intended size
pub struct HealthStage {
    intel: Arc<dyn MarketIntel>,
    max_impact_pct: f64,
}

impl HealthStage {
    pub fn new(intel: Arc<dyn MarketIntel>, max_impact_pct: f64) -> Self {
        Self {
            intel,
            max_impact_pct,
        }
    }
}

#[async_trait]
impl ValidationStage for HealthStage {
    fn name(&self) -> &'static str {
        "health"
    }

    async fn run(&self, ctx: &mut StageContext) -> Result<StageVerdict> {
        let report = self
            .intel
            .check_market_health(ctx.mint(), ctx.notional_sol)
            .await?;
        let details = json!({
            "is_healthy": report.is_healthy,
            "price_impact_pct": report.price_impact_pct,
            "liquidity_sol": report.liquidity_sol,
            "reasons": report.reasons,
        });

        if !report.is_healthy {
            let reason = if report.reasons.is_empty() {
                "market unhealthy".to_string()
            } else {
                report.reasons.join("; ")
            };
            return Ok(StageVerdict::fail(reason, details));
        }
        match report.price_impact_pct {
            None => Ok(StageVerdict::fail("price impact unknown", details)),
            Some(impact) if impact > self.max_impact_pct => Ok(StageVerdict::fail(
                format!("Price impact {:.2}% > {:.2}%", impact, self.max_impact_pct),
                details,
            )),
            Some(_) => Ok(StageVerdict::pass(details)),
        }
    }
}

/// Stage 5: wallet balance, no duplicate position, risk admission
pub struct FeasibilityStage {
    provider: Arc<dyn SwapProvider>,
    positions: Arc<PositionStore>,
    risk: RiskAdmission,
    min_sol_reserve: f64,
}

impl FeasibilityStage {
    pub fn new(
        provider: Arc<dyn SwapProvider>,
        positions: Arc<PositionStore>,
        risk: RiskAdmission,
        min_sol_reserve: f64,
    ) -> Self {
        Self {
            provider,
            positions,
            risk,
            min_sol_reserve,
        }
    }
}

#[async_trait]
impl ValidationStage for FeasibilityStage {
    fn name(&self) -> &'static str {
        "feasibility"
    }

    async fn run(&self, ctx: &mut StageContext) -> Result<StageVerdict> {
        if let Some(existing) = self.positions.get(ctx.mint()).await? {
            if existing.is_open() {
                return Ok(StageVerdict::fail(
                    "Position already open",
                    json!({ "remaining_pct": existing.remaining_pct }),
                ));
            }
        }

        let balance = self.provider.sol_balance().await?;
        let required = ctx.notional_sol + self.min_sol_reserve;
        if balance < required {
            return Ok(StageVerdict::fail(
                format!("Insufficient balance: {:.4} SOL < {:.4} SOL", balance, required),
                json!({ "balance_sol": balance, "required_sol": required }),
            ));
        }

        let (decision, reservation) = self
            .risk
            .admit(self.positions.backend().as_ref(), ctx.mint(), ctx.notional_sol)
            .await?;
        ctx.reservation = reservation;
        let details = json!({
            "balance_sol": balance,
            "required_sol": required,
            "notional_sol": ctx.notional_sol,
            "risk": decision.state,
        });
        match decision.reason() {
            Some(reason) => Ok(StageVerdict::fail(reason, details)),
            None => Ok(StageVerdict::pass(details)),
        }
    }
}

/// Stage 6: tranche execution
pub struct BuyStage {
    engine: Arc<TrancheEngine>,
}

impl BuyStage {
    pub fn new(engine: Arc<TrancheEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl ValidationStage for BuyStage {
    fn name(&self) -> &'static str {
        "buy"
    }

    async fn run(&self, ctx: &mut StageContext) -> Result<StageVerdict> {
        let report = self.engine.execute(&ctx.candidate, ctx.notional_sol).await;
        let trade_ids: Vec<String> = report.trades.iter().map(|t| t.id.to_string()).collect();
        let verdict = match &report.outcome {
            TrancheOutcome::Open { second_filled } => StageVerdict::pass(json!({
                "second_filled": second_filled,
                "token_amount": report.position.as_ref().map(|p| p.token_amount),
                "trades": trade_ids,
            })),
            TrancheOutcome::Aborted { reason } => {
                StageVerdict::fail(format!("Buy aborted: {}", reason), json!({ "trades": trade_ids }))
            }
            TrancheOutcome::EmergencyExit { reason, exited } => StageVerdict::fail(
                format!("Emergency exit after buy: {}", reason),
                json!({ "exited": exited, "trades": trade_ids }),
            ),
        };
        ctx.tranche = Some(report);
        Ok(verdict)
    }
}

/// The six stages in order
#[allow(clippy::too_many_arguments)]
pub fn standard_stages(
    config: &ValidationConfig,
    slippage_bps: u32,
    provider: Arc<dyn SwapProvider>,
    intel: Arc<dyn MarketIntel>,
    heuristics: Vec<Arc<dyn SafetyHeuristic>>,
    positions: Arc<PositionStore>,
    risk: RiskAdmission,
    engine: Arc<TrancheEngine>,
) -> Vec<Arc<dyn ValidationStage>> {
    vec![
        Arc::new(LiquidityStage::new(config.min_liquidity_sol)),
        Arc::new(RouteStage::new(provider.clone(), config, slippage_bps)),
        Arc::new(SecurityStage::new(intel.clone(), heuristics, config)),
        Arc::new(HealthStage::new(intel, config.health_max_impact_pct)),
        Arc::new(FeasibilityStage::new(
            provider,
            positions,
            risk,
            config.min_sol_reserve,
        )),
        Arc::new(BuyStage::new(engine)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::heuristics::default_heuristics;
    use crate::intel::testing::StaticIntel;
    use crate::intel::{HealthReport, SecurityReport};
    use crate::stream::PoolCandidate;
    use crate::trading::provider::testing::ScriptedSwapProvider;

    fn ctx(liquidity: f64) -> StageContext {
        StageContext::new(PoolCandidate::new("tok", "pool", liquidity), 0.1)
    }

    #[tokio::test]
    async fn test_liquidity_floor() {
        let stage = LiquidityStage::new(0.5);
        let verdict = stage.run(&mut ctx(0.3)).await.unwrap();
        assert!(!verdict.passed);
        assert!(verdict.reason.unwrap().contains("Insufficient LP"));
        assert!(stage.run(&mut ctx(0.5)).await.unwrap().passed);
    }

    #[tokio::test]
    async fn test_route_round_trip() {
        let provider = Arc::new(ScriptedSwapProvider::new(10.0));
        provider.set_price("tok", 1.0);
        let stage = RouteStage::new(provider.clone(), &ValidationConfig::default(), 1000);

        let verdict = stage.run(&mut ctx(10.0)).await.unwrap();
        assert!(verdict.passed);
        assert_eq!(verdict.details["return_pct"], 100.0);
        // Quotes only
        assert!(provider.swaps().is_empty());

        provider.set_no_route("tok");
        let verdict = stage.run(&mut ctx(10.0)).await.unwrap();
        assert_eq!(verdict.reason.as_deref(), Some("No buy route"));
    }

    #[tokio::test]
    async fn test_route_impact_ceiling() {
        let provider = Arc::new(ScriptedSwapProvider::new(10.0));
        provider.set_price("tok", 1.0);
        provider.set_sell_impact("tok", 25.0);
        let stage = RouteStage::new(provider, &ValidationConfig::default(), 1000);
        let verdict = stage.run(&mut ctx(10.0)).await.unwrap();
        assert!(!verdict.passed);
        assert!(verdict.reason.unwrap().contains("Route impact"));
    }

    fn security_stage(intel: Arc<StaticIntel>) -> SecurityStage {
        SecurityStage::new(intel, default_heuristics(), &ValidationConfig::default())
    }

    #[tokio::test]
    async fn test_security_clean_reports_heuristics() {
        let intel = Arc::new(StaticIntel::new());
        let verdict = security_stage(intel).run(&mut ctx(10.0)).await.unwrap();
        assert!(verdict.passed);
        let heuristics = verdict.details["heuristics"].as_array().unwrap();
        assert_eq!(heuristics.len(), 2);
        assert!(heuristics.iter().all(|h| h["default_pass"] == true));
    }

    #[tokio::test]
    async fn test_security_unsafe_blacklists() {
        let intel = Arc::new(StaticIntel::new());
        intel.set_security("tok", SecurityReport::unsafe_because("honeypot"));
        let mut c = ctx(10.0);
        let verdict = security_stage(intel).run(&mut c).await.unwrap();
        assert!(!verdict.passed);
        assert!(verdict.reason.unwrap().contains("honeypot"));
        assert!(c.blacklist);
    }

    #[tokio::test]
    async fn test_security_unknown_tax_rejects_without_blacklist() {
        let intel = Arc::new(StaticIntel::new());
        intel.set_security(
            "tok",
            SecurityReport {
                tax_pct_sell: None,
                ..SecurityReport::clean()
            },
        );
        let mut c = ctx(10.0);
        let verdict = security_stage(intel).run(&mut c).await.unwrap();
        assert!(!verdict.passed);
        assert!(verdict.reason.unwrap().contains("sell tax unknown"));
        assert!(!c.blacklist);
    }

    #[tokio::test]
    async fn test_security_high_tax() {
        let intel = Arc::new(StaticIntel::new());
        intel.set_security(
            "tok",
            SecurityReport {
                tax_pct_buy: Some(12.0),
                ..SecurityReport::clean()
            },
        );
        let mut c = ctx(10.0);
        let verdict = security_stage(intel).run(&mut c).await.unwrap();
        assert!(verdict.reason.unwrap().contains("buy tax 12.0%"));
        assert!(c.blacklist);
    }

    #[tokio::test]
    async fn test_health_impact_ceiling() {
        let intel = Arc::new(StaticIntel::new());
        intel.set_health("tok", HealthReport::healthy(18.0, 5.0));
        let stage = HealthStage::new(intel.clone(), 15.0);
        let verdict = stage.run(&mut ctx(10.0)).await.unwrap();
        assert!(!verdict.passed);
        assert!(verdict.reason.unwrap().contains("Price impact"));

        intel.set_health("tok", HealthReport::unhealthy("no indexed SOL pool"));
        let verdict = stage.run(&mut ctx(10.0)).await.unwrap();
        assert_eq!(verdict.reason.as_deref(), Some("no indexed SOL pool"));
    }

    #[tokio::test]
    async fn test_intel_error_surfaces() {
        let intel = Arc::new(StaticIntel::new());
        intel.fail("tok");
        assert!(HealthStage::new(intel, 15.0).run(&mut ctx(10.0)).await.is_err());
    }

    #[tokio::test]
    async fn test_feasibility_holds_slot_until_context_drops() {
        use crate::config::RiskConfig;
        use crate::persistence::MemoryStore;

        let provider = Arc::new(ScriptedSwapProvider::new(10.0));
        let positions = Arc::new(PositionStore::new(Arc::new(MemoryStore::new())));
        let stage = FeasibilityStage::new(
            provider,
            positions,
            RiskAdmission::new(RiskConfig {
                max_open_positions: 1,
                ..RiskConfig::default()
            }),
            0.05,
        );

        let mut first = StageContext::new(PoolCandidate::new("a", "pool-a", 10.0), 0.1);
        assert!(stage.run(&mut first).await.unwrap().passed);
        assert_eq!(first.reservation.as_ref().map(|r| r.mint()), Some("a"));

        // Nothing in the ledger yet, but the slot is taken
        let mut second = StageContext::new(PoolCandidate::new("b", "pool-b", 10.0), 0.1);
        let verdict = stage.run(&mut second).await.unwrap();
        assert!(!verdict.passed);
        assert!(verdict.reason.unwrap().contains("Max positions"));
        assert_eq!(verdict.details["risk"]["reserved_entries"], 1);
        assert!(second.reservation.is_none());

        drop(first);
        assert!(stage.run(&mut second).await.unwrap().passed);
    }
}
