//! Configuration loading and validation
//!
//! Loaded once at process start. Any validation failure is fatal: the engine
//! refuses to run with undefined limits.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Wrapped SOL mint, the base asset every candidate is priced against
pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Lamports per SOL
pub const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

/// Number of profit tiers tracked per position
pub const TIER_COUNT: usize = 3;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub tranche: TrancheConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub intel: IntelConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Attempts per provider call, including the first
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoint: default_rpc_endpoint(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_pumpportal_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// 0 = reconnect forever
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// How long a bonding-curve reserve reading stays usable as pool liquidity
    #[serde(default = "default_liquidity_cache_ttl_secs")]
    pub liquidity_cache_ttl_secs: u64,
    #[serde(default = "default_liquidity_cache_max_entries")]
    pub liquidity_cache_max_entries: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ws_url: default_pumpportal_ws_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            ping_interval_secs: default_ping_interval_secs(),
            liquidity_cache_ttl_secs: default_liquidity_cache_ttl_secs(),
            liquidity_cache_max_entries: default_liquidity_cache_max_entries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestionConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    #[serde(default = "default_dispatch_interval_ms")]
    pub dispatch_interval_ms: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            concurrency_limit: default_concurrency_limit(),
            dispatch_interval_ms: default_dispatch_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    /// Liquidity floor in SOL
    #[serde(default = "default_min_liquidity_sol")]
    pub min_liquidity_sol: f64,
    /// Size of the buy/sell round trip used to probe the route
    #[serde(default = "default_route_test_amount_sol")]
    pub route_test_amount_sol: f64,
    #[serde(default = "default_route_max_impact_pct")]
    pub route_max_impact_pct: f64,
    /// Minimum share of the test input the round trip must return
    #[serde(default = "default_route_min_return_pct")]
    pub route_min_return_pct: f64,
    #[serde(default = "default_max_tax_pct")]
    pub max_buy_tax_pct: f64,
    #[serde(default = "default_max_tax_pct")]
    pub max_sell_tax_pct: f64,
    #[serde(default = "default_true")]
    pub require_authorities_revoked: bool,
    #[serde(default = "default_health_max_impact_pct")]
    pub health_max_impact_pct: f64,
    /// SOL kept in the wallet after the buy (fees, exits)
    #[serde(default = "default_min_sol_reserve")]
    pub min_sol_reserve: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_liquidity_sol: default_min_liquidity_sol(),
            route_test_amount_sol: default_route_test_amount_sol(),
            route_max_impact_pct: default_route_max_impact_pct(),
            route_min_return_pct: default_route_min_return_pct(),
            max_buy_tax_pct: default_max_tax_pct(),
            max_sell_tax_pct: default_max_tax_pct(),
            require_authorities_revoked: true,
            health_max_impact_pct: default_health_max_impact_pct(),
            min_sol_reserve: default_min_sol_reserve(),
        }
    }
}

/// What to do when the pullback wait times out
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PullbackPolicy {
    /// Buy the second tranche at market anyway
    Proceed,
    /// Keep the position at first-tranche size
    SkipSecondTranche,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrancheConfig {
    /// Share of the approved notional spent on the first fill
    #[serde(default = "default_first_tranche_pct")]
    pub first_tranche_pct: f64,
    #[serde(default = "default_buy_max_impact_pct")]
    pub buy_max_impact_pct: f64,
    /// Share of first-tranche tokens sold back as the exit-liquidity test
    #[serde(default = "default_test_sell_pct")]
    pub test_sell_pct: f64,
    #[serde(default = "default_pullback_pct")]
    pub pullback_pct: f64,
    #[serde(default = "default_pullback_timeout_ms")]
    pub pullback_timeout_ms: u64,
    #[serde(default = "default_pullback_poll_ms")]
    pub pullback_poll_ms: u64,
    #[serde(default = "default_pullback_policy")]
    pub pullback_timeout_policy: PullbackPolicy,
    #[serde(default = "default_emergency_slippage_bps")]
    pub emergency_slippage_bps: u32,
}

impl Default for TrancheConfig {
    fn default() -> Self {
        Self {
            first_tranche_pct: default_first_tranche_pct(),
            buy_max_impact_pct: default_buy_max_impact_pct(),
            test_sell_pct: default_test_sell_pct(),
            pullback_pct: default_pullback_pct(),
            pullback_timeout_ms: default_pullback_timeout_ms(),
            pullback_poll_ms: default_pullback_poll_ms(),
            pullback_timeout_policy: default_pullback_policy(),
            emergency_slippage_bps: default_emergency_slippage_bps(),
        }
    }
}

/// One profit-taking tier
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct TierLevel {
    /// Unrealized profit % that arms the tier
    pub threshold_pct: f64,
    /// Share of the original position sold when it fires
    pub sell_pct: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_interval_ms")]
    pub interval_ms: u64,
    /// Share of the held tokens quoted to read the current price
    #[serde(default = "default_probe_fraction_pct")]
    pub probe_fraction_pct: f64,
    #[serde(default = "default_tiers")]
    pub tiers: Vec<TierLevel>,
    #[serde(default = "default_tier_max_impact_pct")]
    pub tier_max_impact_pct: f64,
    /// Trailing stop only applies once remaining_pct is at or below this
    #[serde(default = "default_trailing_residual_pct")]
    pub trailing_residual_pct: f64,
    #[serde(default = "default_trailing_activation_pct")]
    pub trailing_activation_pct: f64,
    /// Profit points below the peak that end the residual
    #[serde(default = "default_trailing_drawdown_pct")]
    pub trailing_drawdown_pct: f64,
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
    #[serde(default = "default_exit_slippage_bps")]
    pub exit_slippage_bps: u32,
    #[serde(default = "default_emergency_slippage_bps")]
    pub emergency_slippage_bps: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_monitor_interval_ms(),
            probe_fraction_pct: default_probe_fraction_pct(),
            tiers: default_tiers(),
            tier_max_impact_pct: default_tier_max_impact_pct(),
            trailing_residual_pct: default_trailing_residual_pct(),
            trailing_activation_pct: default_trailing_activation_pct(),
            trailing_drawdown_pct: default_trailing_drawdown_pct(),
            stop_loss_pct: default_stop_loss_pct(),
            exit_slippage_bps: default_exit_slippage_bps(),
            emergency_slippage_bps: default_emergency_slippage_bps(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,
    /// Realized loss today, as % of portfolio value, that blocks new buys
    #[serde(default = "default_max_daily_loss_pct")]
    pub max_daily_loss_pct: f64,
    /// Largest single notional, as % of portfolio value
    #[serde(default = "default_max_risk_per_trade_pct")]
    pub max_risk_per_trade_pct: f64,
    /// Capital the ledger's realized PnL is added to
    #[serde(default = "default_starting_capital_sol")]
    pub starting_capital_sol: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_open_positions: default_max_open_positions(),
            max_daily_loss_pct: default_max_daily_loss_pct(),
            max_risk_per_trade_pct: default_max_risk_per_trade_pct(),
            starting_capital_sol: default_starting_capital_sol(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    #[serde(default = "default_buy_amount_sol")]
    pub buy_amount_sol: f64,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u32,
    #[serde(default = "default_priority_fee")]
    pub priority_fee_lamports: u64,
    /// Quote for real, never submit swaps
    #[serde(default)]
    pub simulation: bool,
    #[serde(default = "default_simulated_balance_sol")]
    pub simulated_balance_sol: f64,
    #[serde(default = "default_base_mint")]
    pub base_mint: String,
    #[serde(default = "default_jupiter_api_url")]
    pub jupiter_api_url: String,
    /// Falls back to SNIPER_PRIVATE_KEY when unset
    #[serde(default)]
    pub keypair_path: Option<String>,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            buy_amount_sol: default_buy_amount_sol(),
            slippage_bps: default_slippage_bps(),
            priority_fee_lamports: default_priority_fee(),
            simulation: false,
            simulated_balance_sol: default_simulated_balance_sol(),
            base_mint: default_base_mint(),
            jupiter_api_url: default_jupiter_api_url(),
            keypair_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntelConfig {
    #[serde(default = "default_rugcheck_url")]
    pub rugcheck_url: String,
    #[serde(default = "default_dexscreener_url")]
    pub dexscreener_url: String,
    #[serde(default = "default_intel_timeout_ms")]
    pub timeout_ms: u64,
    /// Liquidity drop from the recorded baseline that forces an exit
    #[serde(default = "default_liquidity_drop_exit_pct")]
    pub liquidity_drop_exit_pct: f64,
    /// Sells required in the last 5 minutes for a pool to count as healthy
    #[serde(default = "default_min_sells_5m")]
    pub min_sells_5m: u32,
}

impl Default for IntelConfig {
    fn default() -> Self {
        Self {
            rugcheck_url: default_rugcheck_url(),
            dexscreener_url: default_dexscreener_url(),
            timeout_ms: default_intel_timeout_ms(),
            liquidity_drop_exit_pct: default_liquidity_drop_exit_pct(),
            min_sells_5m: default_min_sells_5m(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_notify_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_notify_capacity(),
            webhook_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

// Default value functions
fn default_rpc_endpoint() -> String {
    std::env::var("RPC_ENDPOINT").unwrap_or_else(|_| "https://api.mainnet-beta.solana.com".into())
}

fn default_timeout_ms() -> u64 {
    30000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    200
}

fn default_retry_max_delay_ms() -> u64 {
    2000
}

fn default_pumpportal_ws_url() -> String {
    "wss://pumpportal.fun/api/data".into()
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_max_reconnect_attempts() -> u32 {
    0
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_liquidity_cache_ttl_secs() -> u64 {
    6 * 3600
}

fn default_liquidity_cache_max_entries() -> usize {
    50_000
}

fn default_queue_capacity() -> usize {
    200
}

fn default_concurrency_limit() -> usize {
    5
}

fn default_dispatch_interval_ms() -> u64 {
    500
}

fn default_min_liquidity_sol() -> f64 {
    0.5
}

fn default_route_test_amount_sol() -> f64 {
    0.01
}

fn default_route_max_impact_pct() -> f64 {
    10.0
}

fn default_route_min_return_pct() -> f64 {
    80.0
}

fn default_max_tax_pct() -> f64 {
    10.0
}

fn default_health_max_impact_pct() -> f64 {
    15.0
}

fn default_min_sol_reserve() -> f64 {
    0.02
}

fn default_first_tranche_pct() -> f64 {
    60.0
}

fn default_buy_max_impact_pct() -> f64 {
    15.0
}

fn default_test_sell_pct() -> f64 {
    0.5
}

fn default_pullback_pct() -> f64 {
    2.0
}

fn default_pullback_timeout_ms() -> u64 {
    5 * 60 * 1000
}

fn default_pullback_poll_ms() -> u64 {
    2000
}

fn default_pullback_policy() -> PullbackPolicy {
    PullbackPolicy::Proceed
}

fn default_emergency_slippage_bps() -> u32 {
    5000
}

fn default_monitor_interval_ms() -> u64 {
    5000
}

fn default_probe_fraction_pct() -> f64 {
    10.0
}

fn default_tiers() -> Vec<TierLevel> {
    vec![
        TierLevel { threshold_pct: 40.0, sell_pct: 30.0 },
        TierLevel { threshold_pct: 80.0, sell_pct: 30.0 },
        TierLevel { threshold_pct: 150.0, sell_pct: 30.0 },
    ]
}

fn default_tier_max_impact_pct() -> f64 {
    20.0
}

fn default_trailing_residual_pct() -> f64 {
    10.0
}

fn default_trailing_activation_pct() -> f64 {
    15.0
}

fn default_trailing_drawdown_pct() -> f64 {
    5.0
}

fn default_stop_loss_pct() -> f64 {
    15.0
}

fn default_exit_slippage_bps() -> u32 {
    1500
}

fn default_max_open_positions() -> usize {
    3
}

fn default_max_daily_loss_pct() -> f64 {
    6.0
}

fn default_max_risk_per_trade_pct() -> f64 {
    2.0
}

fn default_starting_capital_sol() -> f64 {
    10.0
}

fn default_buy_amount_sol() -> f64 {
    0.1
}

fn default_slippage_bps() -> u32 {
    1000
}

fn default_priority_fee() -> u64 {
    100000
}

fn default_simulated_balance_sol() -> f64 {
    10.0
}

fn default_base_mint() -> String {
    WSOL_MINT.to_string()
}

fn default_jupiter_api_url() -> String {
    "https://lite-api.jup.ag/swap/v1".into()
}

fn default_rugcheck_url() -> String {
    "https://api.rugcheck.xyz/v1".into()
}

fn default_dexscreener_url() -> String {
    "https://api.dexscreener.com".into()
}

fn default_intel_timeout_ms() -> u64 {
    5000
}

fn default_liquidity_drop_exit_pct() -> f64 {
    50.0
}

fn default_min_sells_5m() -> u32 {
    1
}

fn default_notify_capacity() -> usize {
    1024
}

fn default_data_dir() -> String {
    "data".into()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            .set_default("rpc.endpoint", default_rpc_endpoint())?
            .set_default("rpc.timeout_ms", default_timeout_ms() as i64)?
            .set_default("rpc.max_retries", default_max_retries() as i64)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix SNIPER_)
            .add_source(
                config::Environment::with_prefix("SNIPER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.rpc.max_retries == 0 {
            anyhow::bail!("rpc.max_retries must be at least 1");
        }

        // Ingestion
        if self.ingestion.queue_capacity == 0 {
            anyhow::bail!("ingestion.queue_capacity must be positive");
        }
        if self.ingestion.concurrency_limit == 0 {
            anyhow::bail!("ingestion.concurrency_limit must be at least 1");
        }
        if self.ingestion.dispatch_interval_ms == 0 {
            anyhow::bail!("ingestion.dispatch_interval_ms must be positive");
        }

        // Validation gates
        if self.validation.min_liquidity_sol < 0.0 {
            anyhow::bail!("validation.min_liquidity_sol cannot be negative");
        }
        if self.validation.route_test_amount_sol <= 0.0 {
            anyhow::bail!("validation.route_test_amount_sol must be positive");
        }
        check_pct("validation.route_max_impact_pct", self.validation.route_max_impact_pct)?;
        check_pct("validation.route_min_return_pct", self.validation.route_min_return_pct)?;
        check_pct("validation.health_max_impact_pct", self.validation.health_max_impact_pct)?;

        // Tranche
        let first = self.tranche.first_tranche_pct;
        if first <= 0.0 || first >= 100.0 {
            anyhow::bail!("tranche.first_tranche_pct must be between 0 and 100 (exclusive)");
        }
        check_pct("tranche.buy_max_impact_pct", self.tranche.buy_max_impact_pct)?;
        check_pct("tranche.test_sell_pct", self.tranche.test_sell_pct)?;
        if self.tranche.pullback_pct < 0.0 || self.tranche.pullback_pct >= 100.0 {
            anyhow::bail!("tranche.pullback_pct must be in [0, 100)");
        }
        if self.tranche.pullback_poll_ms == 0 {
            anyhow::bail!("tranche.pullback_poll_ms must be positive");
        }

        // Monitor
        if self.monitor.interval_ms == 0 {
            anyhow::bail!("monitor.interval_ms must be positive");
        }
        check_pct("monitor.probe_fraction_pct", self.monitor.probe_fraction_pct)?;
        if self.monitor.tiers.len() != TIER_COUNT {
            anyhow::bail!(
                "monitor.tiers must define exactly {} tiers, got {}",
                TIER_COUNT,
                self.monitor.tiers.len()
            );
        }
        let mut last_threshold = 0.0;
        let mut total_sell = 0.0;
        for (i, tier) in self.monitor.tiers.iter().enumerate() {
            if tier.threshold_pct <= last_threshold {
                anyhow::bail!(
                    "monitor.tiers[{}].threshold_pct must be positive and above the previous tier",
                    i
                );
            }
            if tier.sell_pct <= 0.0 {
                anyhow::bail!("monitor.tiers[{}].sell_pct must be positive", i);
            }
            last_threshold = tier.threshold_pct;
            total_sell += tier.sell_pct;
        }
        if total_sell >= 100.0 {
            anyhow::bail!(
                "monitor.tiers sell_pct total {}% must leave a residual below 100%",
                total_sell
            );
        }
        if self.monitor.stop_loss_pct <= 0.0 || self.monitor.stop_loss_pct >= 100.0 {
            anyhow::bail!("monitor.stop_loss_pct must be between 0 and 100");
        }
        check_pct("monitor.trailing_residual_pct", self.monitor.trailing_residual_pct)?;
        if self.monitor.trailing_drawdown_pct <= 0.0 {
            anyhow::bail!("monitor.trailing_drawdown_pct must be positive");
        }

        // Risk
        if self.risk.max_open_positions == 0 {
            anyhow::bail!("risk.max_open_positions must be at least 1");
        }
        check_pct("risk.max_daily_loss_pct", self.risk.max_daily_loss_pct)?;
        check_pct("risk.max_risk_per_trade_pct", self.risk.max_risk_per_trade_pct)?;
        if self.risk.starting_capital_sol <= 0.0 {
            anyhow::bail!("risk.starting_capital_sol must be positive");
        }

        // Trading
        if self.trading.buy_amount_sol <= 0.0 {
            anyhow::bail!("buy_amount_sol must be positive");
        }
        for (name, bps) in [
            ("trading.slippage_bps", self.trading.slippage_bps),
            ("tranche.emergency_slippage_bps", self.tranche.emergency_slippage_bps),
            ("monitor.exit_slippage_bps", self.monitor.exit_slippage_bps),
            ("monitor.emergency_slippage_bps", self.monitor.emergency_slippage_bps),
        ] {
            if bps > 10000 {
                anyhow::bail!("{} cannot exceed 10000 (100%)", name);
            }
        }
        bs58::decode(&self.trading.base_mint)
            .into_vec()
            .with_context(|| format!("Invalid base_mint: {}", self.trading.base_mint))?;

        if self.notify.channel_capacity == 0 {
            anyhow::bail!("notify.channel_capacity must be positive");
        }

        if self.tranche.pullback_timeout_policy == PullbackPolicy::SkipSecondTranche {
            tracing::warn!(
                "Pullback timeout policy is 'skip_second_tranche' - positions may stay at first-tranche size"
            );
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        let tiers: Vec<String> = self
            .monitor
            .tiers
            .iter()
            .map(|t| format!("{:.0}%@+{:.0}%", t.sell_pct, t.threshold_pct))
            .collect();

        format!(
            r#"Configuration:
  RPC:
    endpoint: {}
    timeout: {}ms
    retries: {}
  Listener:
    enabled: {}
    ws_url: {}
  Ingestion:
    queue_capacity: {}
    concurrency_limit: {}
    dispatch_interval: {}ms
  Validation:
    min_liquidity: {} SOL
    route_max_impact: {}%
    health_max_impact: {}%
  Tranche:
    first_tranche: {}%
    buy_max_impact: {}%
    test_sell: {}%
    pullback: {}% within {}ms (on timeout: {:?})
  Monitor:
    interval: {}ms
    tiers: {}
    trailing: activate +{}%, drawdown {}pts, residual <= {}%
    stop_loss: -{}%
  Risk:
    max_open_positions: {}
    max_daily_loss: {}%
    max_risk_per_trade: {}%
    starting_capital: {} SOL
  Trading:
    buy_amount: {} SOL
    slippage: {}bps
    simulation: {}
    keypair: {}
  Notify:
    webhook: {}
  Persistence:
    data_dir: {}
"#,
            mask_url(&self.rpc.endpoint),
            self.rpc.timeout_ms,
            self.rpc.max_retries,
            self.listener.enabled,
            self.listener.ws_url,
            self.ingestion.queue_capacity,
            self.ingestion.concurrency_limit,
            self.ingestion.dispatch_interval_ms,
            self.validation.min_liquidity_sol,
            self.validation.route_max_impact_pct,
            self.validation.health_max_impact_pct,
            self.tranche.first_tranche_pct,
            self.tranche.buy_max_impact_pct,
            self.tranche.test_sell_pct,
            self.tranche.pullback_pct,
            self.tranche.pullback_timeout_ms,
            self.tranche.pullback_timeout_policy,
            self.monitor.interval_ms,
            tiers.join(", "),
            self.monitor.trailing_activation_pct,
            self.monitor.trailing_drawdown_pct,
            self.monitor.trailing_residual_pct,
            self.monitor.stop_loss_pct,
            self.risk.max_open_positions,
            self.risk.max_daily_loss_pct,
            self.risk.max_risk_per_trade_pct,
            self.risk.starting_capital_sol,
            self.trading.buy_amount_sol,
            self.trading.slippage_bps,
            self.trading.simulation,
            if self.trading.keypair_path.is_some() {
                "***"
            } else {
                "(from env)"
            },
            self.notify
                .webhook_url
                .as_deref()
                .map(mask_url)
                .unwrap_or_else(|| "(not set)".to_string()),
            self.persistence.data_dir,
        )
    }
}

fn check_pct(name: &str, value: f64) -> Result<()> {
    if !(value > 0.0 && value <= 100.0) {
        anyhow::bail!("{} must be in (0, 100], got {}", name, value);
    }
    Ok(())
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

/// Convert a SOL amount to lamports
pub fn sol_to_lamports(sol: f64) -> u64 {
    (sol.max(0.0) * LAMPORTS_PER_SOL).round() as u64
}

/// Convert lamports to SOL
pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            listener: ListenerConfig::default(),
            ingestion: IngestionConfig::default(),
            validation: ValidationConfig::default(),
            tranche: TrancheConfig::default(),
            monitor: MonitorConfig::default(),
            risk: RiskConfig::default(),
            trading: TradingConfig::default(),
            intel: IntelConfig::default(),
            notify: NotifyConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}
