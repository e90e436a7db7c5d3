//! CLI command implementations

use anyhow::{Context, Result};
use dialoguer::Confirm;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::signature::{Keypair, Signer};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{lamports_to_sol, sol_to_lamports, Config, WSOL_MINT};
use crate::filter::{default_heuristics, standard_stages, PipelineRunner, ValidationPipeline};
use crate::intel::{CompositeIntel, MarketIntel};
use crate::notify::{spawn_log_subscriber, spawn_webhook_forwarder, Notifier};
use crate::persistence::{JsonStore, LedgerSummary, Store};
use crate::position::{MonitorOutcome, PositionMonitor, PositionStore};
use crate::strategy::{RiskAdmission, RiskState, TrancheEngine};
use crate::stream::{check_reachable, Dispatcher, IngestionQueue, PoolListener};
use crate::trading::{
    load_keypair, JupiterProvider, RetryPolicy, Retrying, SimulatedSwapProvider, SwapProvider,
};

/// Output mint for the health-check quote
const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

/// Collaborators shared by the long-running and one-shot commands
struct Engine {
    provider: Arc<dyn SwapProvider>,
    intel: Arc<dyn MarketIntel>,
    positions: Arc<PositionStore>,
    notifier: Notifier,
}

impl Engine {
    async fn build(config: &Config, simulate: bool) -> Result<Self> {
        let keypair = match load_keypair(config.trading.keypair_path.as_deref()) {
            Ok(keypair) => keypair,
            Err(e) if simulate => {
                warn!("No wallet keypair ({}), simulating with an ephemeral one", e);
                Keypair::new()
            }
            Err(e) => return Err(e).context("Failed to load wallet keypair"),
        };
        info!("Wallet: {}", keypair.pubkey());

        let jupiter = JupiterProvider::new(config, Arc::new(keypair))
            .context("Failed to create swap provider")?;
        let rpc = jupiter.rpc().clone();
        let policy = RetryPolicy::from_config(&config.rpc);

        let provider: Arc<dyn SwapProvider> = if simulate {
            Arc::new(SimulatedSwapProvider::new(
                Retrying::new(jupiter, policy.clone()),
                config.trading.base_mint.clone(),
                config.trading.simulated_balance_sol,
            ))
        } else {
            Arc::new(Retrying::new(jupiter, policy.clone()))
        };
        let intel: Arc<dyn MarketIntel> = Arc::new(Retrying::new(
            CompositeIntel::new(config.intel.clone(), rpc),
            policy,
        ));

        let store = open_store(config).await?;
        Ok(Self {
            provider,
            intel,
            positions: Arc::new(PositionStore::new(store)),
            notifier: Notifier::new(config.notify.channel_capacity),
        })
    }

    fn monitor(&self, config: &Config) -> PositionMonitor {
        PositionMonitor::new(
            self.provider.clone(),
            self.positions.clone(),
            self.intel.clone(),
            self.notifier.clone(),
            config.monitor.clone(),
        )
    }
}

async fn open_store(config: &Config) -> Result<Arc<dyn Store>> {
    let store = JsonStore::open(&config.persistence.data_dir)
        .await
        .with_context(|| format!("Failed to open data dir {}", config.persistence.data_dir))?;
    Ok(Arc::new(store))
}

/// Run listener, dispatcher and monitor until Ctrl-C
pub async fn start(config: &Config, simulate: bool) -> Result<()> {
    let simulate = simulate || config.trading.simulation;
    if simulate {
        warn!("Running in SIMULATION mode - swaps are not submitted");
    }

    info!("Starting tranche sniper...");
    info!(
        "Buy amount: {} SOL, Slippage: {}bps, Max positions: {}",
        config.trading.buy_amount_sol, config.trading.slippage_bps, config.risk.max_open_positions
    );

    let engine = Engine::build(config, simulate).await?;
    let cancel = CancellationToken::new();
    let mut handles: Vec<JoinHandle<()>> = Vec::new();

    handles.push(spawn_log_subscriber(&engine.notifier, cancel.clone()));
    if let Some(url) = &config.notify.webhook_url {
        info!("Forwarding events to webhook");
        handles.push(spawn_webhook_forwarder(
            &engine.notifier,
            url.clone(),
            Duration::from_millis(config.intel.timeout_ms),
            cancel.clone(),
        ));
    }

    match engine.provider.sol_balance().await {
        Ok(balance) => info!("Wallet balance: {:.4} SOL", balance),
        Err(e) => warn!("Could not read wallet balance: {}", e),
    }
    match engine.positions.open_positions().await {
        Ok(open) if !open.is_empty() => info!("Resuming {} open position(s)", open.len()),
        Ok(_) => {}
        Err(e) => warn!("Could not load open positions: {}", e),
    }

    let tranche = Arc::new(TrancheEngine::new(
        engine.provider.clone(),
        engine.positions.clone(),
        engine.notifier.clone(),
        config.tranche.clone(),
        config.trading.slippage_bps,
    ));
    let stages = standard_stages(
        &config.validation,
        config.trading.slippage_bps,
        engine.provider.clone(),
        engine.intel.clone(),
        default_heuristics(),
        engine.positions.clone(),
        RiskAdmission::new(config.risk.clone()),
        tranche,
    );
    let pipeline = ValidationPipeline::new(stages, engine.positions.clone(), engine.notifier.clone());
    info!("Validation stages: {}", pipeline.stage_names().join(" -> "));
    let runner = Arc::new(PipelineRunner::new(
        pipeline,
        engine.positions.clone(),
        engine.notifier.clone(),
        config.trading.buy_amount_sol,
    ));

    let queue = Arc::new(IngestionQueue::new(config.ingestion.queue_capacity));
    let dispatcher = Arc::new(Dispatcher::new(&config.ingestion, queue.clone(), runner));
    {
        let dispatcher = dispatcher.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move { dispatcher.run(cancel).await }));
    }

    let monitor = Arc::new(engine.monitor(config));
    {
        let monitor = monitor.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move { monitor.run(cancel).await }));
    }

    if config.listener.enabled {
        let listener = PoolListener::new(
            config.listener.clone(),
            queue.clone(),
            engine.positions.clone(),
            engine.notifier.clone(),
        );
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = listener.run(cancel.clone()).await {
                error!("Pool listener stopped: {}", e);
                // No new candidates can arrive; shut the engine down
                cancel.cancel();
            }
        }));
    } else {
        warn!("Pool listener disabled - no candidates will be ingested");
    }

    info!("Engine running. Press Ctrl+C to stop.");
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("Shutdown requested");
        }
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();

    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Task ended abnormally: {}", e);
        }
    }

    let flushed = engine.positions.flush_pending().await;
    if engine.positions.pending_count() > 0 {
        warn!(
            "{} ledger write(s) still pending at shutdown",
            engine.positions.pending_count()
        );
    } else if flushed > 0 {
        info!("Flushed {} pending write(s)", flushed);
    }
    info!(
        "Stopped. Dispatched {} candidate(s), {} dropped by the queue",
        dispatcher.dispatched_count(),
        queue.dropped_count()
    );
    Ok(())
}

/// Show open positions and today's risk state
pub async fn status(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    let positions = store.get_open_positions().await?;
    let trades = store.trades().await?;
    let summary = LedgerSummary::today(&trades);
    let risk = RiskState::from_summary(&summary, config.risk.starting_capital_sol);
    let max_trade = RiskAdmission::new(config.risk.clone()).max_trade_sol(&risk);

    println!("\n=== TRANCHE SNIPER STATUS ===\n");
    println!(
        "Open positions: {} / {}",
        risk.open_positions, config.risk.max_open_positions
    );
    println!("Portfolio value: {:.4} SOL", risk.portfolio_value_sol);
    println!(
        "Realized PnL (all time): {:+.4} SOL",
        summary.realized_pnl_total
    );
    println!(
        "Daily loss: {:.4} SOL ({:.2}% of {:.2}% allowed)",
        risk.realized_loss_today_sol,
        risk.daily_loss_pct(),
        config.risk.max_daily_loss_pct
    );
    println!(
        "Per-trade cap: {:.4} SOL (configured buy {:.4} SOL)",
        max_trade, config.trading.buy_amount_sol
    );

    println!("\n=== OPEN POSITIONS ===\n");
    if positions.is_empty() {
        println!("No open positions.");
        return Ok(());
    }

    for p in positions {
        let tiers: Vec<&str> = p
            .tier_sold
            .iter()
            .map(|sold| if *sold { "x" } else { "-" })
            .collect();
        println!("{}", p.mint);
        println!(
            "  Held: {} raw ({:.1}% of original){}",
            p.token_amount,
            p.remaining_pct,
            if p.simulated { " [SIM]" } else { "" }
        );
        println!(
            "  Invested: {:.4} SOL  Realized: {:.4} SOL  PnL: {:+.4} SOL",
            p.invested_sol, p.realized_sol, p.realized_pnl_sol
        );
        println!(
            "  Entry: {:.6} lamports/unit  Peak: {:+.1}%  Tiers: [{}]  Trailing: {}",
            p.avg_entry_price,
            p.highest_profit_pct,
            tiers.join(""),
            if p.trailing_active { "on" } else { "off" }
        );
        println!("  Opened: {}", p.opened_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    Ok(())
}

/// Print the most recent ledger entries, newest last
pub async fn ledger(config: &Config, limit: usize) -> Result<()> {
    let store = open_store(config).await?;
    let trades = store.trades().await?;
    let skip = trades.len().saturating_sub(limit);

    println!("\n=== TRADE LEDGER ({} of {}) ===\n", trades.len() - skip, trades.len());
    if trades.is_empty() {
        println!("No trades recorded.");
        return Ok(());
    }

    for t in &trades[skip..] {
        let pnl = t
            .pnl_sol
            .map(|p| format!("{:+.4}", p))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<4}  {:<15}  {}  {:>14} raw  {:>9.4} SOL  pnl {:>8}{}",
            t.timestamp.format("%Y-%m-%d %H:%M:%S"),
            t.side,
            t.reason.to_string(),
            t.mint,
            t.token_amount,
            t.sol_amount,
            pnl,
            if t.simulated { "  [SIM]" } else { "" }
        );
        println!("    sig: {}", t.signature);
    }

    Ok(())
}

/// Fully exit one position at market
pub async fn exit(config: &Config, mint: &str, force: bool) -> Result<()> {
    let engine = Engine::build(config, config.trading.simulation).await?;
    let position = engine
        .positions
        .get(mint)
        .await?
        .filter(|p| p.is_open())
        .with_context(|| format!("No open position for {}", mint))?;

    println!("\n=== MANUAL EXIT ===\n");
    println!("Token: {}", mint);
    println!(
        "Held: {} raw ({:.1}% of original), invested {:.4} SOL",
        position.token_amount, position.remaining_pct, position.invested_sol
    );
    if position.simulated {
        println!("Position was opened in simulation mode");
    }

    if !force {
        let confirmed = Confirm::new()
            .with_prompt("Sell the entire position?")
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let _log = spawn_log_subscriber(&engine.notifier, CancellationToken::new());
    match engine.monitor(config).exit_position(mint).await? {
        MonitorOutcome::Exited {
            tokens_sold,
            sol_received,
            ..
        } => {
            println!(
                "Sold {} raw for {:.4} SOL",
                tokens_sold, sol_received
            );
        }
        MonitorOutcome::Failed { error, .. } => {
            anyhow::bail!("Exit failed: {}", error);
        }
        other => println!("Nothing sold: {:?}", other),
    }

    if engine.positions.pending_count() > 0 {
        warn!(
            "Sale executed but {} ledger write(s) could not be persisted",
            engine.positions.pending_count()
        );
    }
    Ok(())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Check system health
pub async fn health(config: &Config) -> Result<()> {
    println!("\n=== SYSTEM HEALTH CHECK ===\n");

    let mut all_healthy = true;

    print!("RPC Endpoint... ");
    match check_rpc(config).await {
        Ok(latency) => println!("OK ({}ms)", latency),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    print!("Jupiter Quote API... ");
    match check_jupiter(config).await {
        Ok(latency) => println!("OK ({}ms)", latency),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    if config.listener.enabled {
        print!("PumpPortal WebSocket... ");
        match check_reachable(&config.listener.ws_url, Duration::from_secs(5)).await {
            Ok(_) => println!("OK"),
            Err(e) => {
                println!("FAILED: {}", e);
                all_healthy = false;
            }
        }
    } else {
        println!("PumpPortal... DISABLED");
    }

    print!("Keypair... ");
    match check_keypair(config).await {
        Ok(balance) => println!("OK (balance: {:.4} SOL)", balance),
        Err(e) if config.trading.simulation => println!("MISSING ({}), simulation only", e),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    print!("Data directory... ");
    match open_store(config).await {
        Ok(store) => match store.get_open_positions().await {
            Ok(open) => println!("OK ({} open position(s))", open.len()),
            Err(e) => {
                println!("FAILED: {}", e);
                all_healthy = false;
            }
        },
        Err(e) => {
            println!("FAILED: {:#}", e);
            all_healthy = false;
        }
    }

    println!();
    if all_healthy {
        println!("All systems healthy!");
    } else {
        println!("Some systems are unhealthy. Check the errors above.");
    }

    Ok(())
}

fn rpc_client(config: &Config) -> RpcClient {
    RpcClient::new_with_timeout(
        config.rpc.endpoint.clone(),
        Duration::from_millis(config.rpc.timeout_ms),
    )
}

async fn check_rpc(config: &Config) -> Result<u64> {
    let client = rpc_client(config);
    let start = Instant::now();
    client.get_slot().await?;
    Ok(start.elapsed().as_millis() as u64)
}

async fn check_jupiter(config: &Config) -> Result<u64> {
    // Quotes never sign, so any key will do
    let provider = JupiterProvider::new(config, Arc::new(Keypair::new()))?;
    let start = Instant::now();
    provider
        .get_quote(
            WSOL_MINT,
            USDC_MINT,
            sol_to_lamports(config.validation.route_test_amount_sol),
            config.trading.slippage_bps,
        )
        .await?
        .context("No SOL/USDC route returned")?;
    Ok(start.elapsed().as_millis() as u64)
}

async fn check_keypair(config: &Config) -> Result<f64> {
    let keypair = load_keypair(config.trading.keypair_path.as_deref())?;
    let lamports = rpc_client(config).get_balance(&keypair.pubkey()).await?;
    Ok(lamports_to_sol(lamports))
}
