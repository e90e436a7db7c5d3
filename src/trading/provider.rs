//! Quote/swap provider interface
//!
//! Amounts are raw base units: lamports when the side is SOL, raw token
//! units otherwise.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Priced route for a prospective swap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: u64,
    pub out_amount: u64,
    /// Projected price impact in percent
    pub price_impact_pct: f64,
    /// Provider-specific route payload handed back to `execute_swap`
    pub route_reference: serde_json::Value,
}

/// Swap to execute
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwapRequest {
    pub input_mint: String,
    pub output_mint: String,
    pub amount: u64,
    pub max_slippage_bps: u32,
    /// Reuse an already fetched route instead of quoting again
    pub quote: Option<Quote>,
}

impl SwapRequest {
    pub fn new(
        input_mint: impl Into<String>,
        output_mint: impl Into<String>,
        amount: u64,
        max_slippage_bps: u32,
    ) -> Self {
        Self {
            input_mint: input_mint.into(),
            output_mint: output_mint.into(),
            amount,
            max_slippage_bps,
            quote: None,
        }
    }

    /// Build a request that executes `quote` as priced
    pub fn from_quote(quote: &Quote, max_slippage_bps: u32) -> Self {
        Self {
            input_mint: quote.input_mint.clone(),
            output_mint: quote.output_mint.clone(),
            amount: quote.in_amount,
            max_slippage_bps,
            quote: Some(quote.clone()),
        }
    }
}

/// Result of a swap attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapResult {
    pub success: bool,
    pub signature: Option<String>,
    pub simulated: bool,
    pub error: Option<String>,
    pub in_amount: u64,
    /// Output received (quoted output when the fill is not parsed)
    pub out_amount: u64,
}

impl SwapResult {
    pub fn failed(error: impl Into<String>, simulated: bool) -> Self {
        Self {
            success: false,
            signature: None,
            simulated,
            error: Some(error.into()),
            in_amount: 0,
            out_amount: 0,
        }
    }

    /// Signature or a placeholder for logs and records
    pub fn signature_or_default(&self) -> String {
        self.signature.clone().unwrap_or_else(|| "-".to_string())
    }
}

/// Quote/swap collaborator
#[async_trait]
pub trait SwapProvider: Send + Sync {
    /// Price a swap; `Ok(None)` means no route exists
    async fn get_quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        max_slippage_bps: u32,
    ) -> Result<Option<Quote>>;

    /// Execute a swap
    ///
    /// `Ok` with `success = false` means the swap was attempted and failed;
    /// `Err` means it could not be attempted at all.
    async fn execute_swap(&self, request: &SwapRequest) -> Result<SwapResult>;

    /// Spendable SOL in the trading wallet
    async fn sol_balance(&self) -> Result<f64>;

    /// Whether swaps are synthetic
    fn is_simulated(&self) -> bool {
        false
    }
}

pub mod testing {
    //! Scripted provider for tests and dry runs without network access

    use super::*;
    use crate::config::{LAMPORTS_PER_SOL, WSOL_MINT};
    use crate::error::Error;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
    use std::sync::Mutex;

    /// In-memory market: one price per mint, in lamports per raw token unit
    #[derive(Default)]
    pub struct ScriptedSwapProvider {
        prices: Mutex<HashMap<String, f64>>,
        impacts: Mutex<HashMap<String, f64>>,
        /// Per-mint override for sell-side impact
        sell_impacts: Mutex<HashMap<String, f64>>,
        no_route: Mutex<HashSet<String>>,
        failing_buys: Mutex<HashSet<String>>,
        failing_sells: Mutex<HashSet<String>>,
        zero_sells: Mutex<HashSet<String>>,
        /// Sells after this many successes fail (per mint)
        sell_budget: Mutex<HashMap<String, u32>>,
        /// Buys after this many successes fail (per mint)
        buy_budget: Mutex<HashMap<String, u32>>,
        /// Sells that fail before sells start succeeding (per mint)
        failing_sells_ahead: Mutex<HashMap<String, u32>>,
        /// (mint, swap count, new price)
        repricings: Mutex<Vec<(String, usize, f64)>>,
        transient_quote_failures: AtomicU32,
        balance_lamports: AtomicU64,
        swaps: Mutex<Vec<SwapRequest>>,
        seq: AtomicU64,
    }

    impl ScriptedSwapProvider {
        pub fn new(balance_sol: f64) -> Self {
            let provider = Self::default();
            provider
                .balance_lamports
                .store((balance_sol * LAMPORTS_PER_SOL) as u64, Ordering::SeqCst);
            provider
        }

        fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
            m.lock().unwrap_or_else(|e| e.into_inner())
        }

        pub fn set_price(&self, mint: &str, lamports_per_unit: f64) {
            Self::lock(&self.prices).insert(mint.to_string(), lamports_per_unit);
        }

        pub fn price(&self, mint: &str) -> Option<f64> {
            Self::lock(&self.prices).get(mint).copied()
        }

        pub fn set_impact(&self, mint: &str, pct: f64) {
            Self::lock(&self.impacts).insert(mint.to_string(), pct);
        }

        pub fn set_sell_impact(&self, mint: &str, pct: f64) {
            Self::lock(&self.sell_impacts).insert(mint.to_string(), pct);
        }

        pub fn set_no_route(&self, mint: &str) {
            Self::lock(&self.no_route).insert(mint.to_string());
        }

        pub fn fail_buys(&self, mint: &str) {
            Self::lock(&self.failing_buys).insert(mint.to_string());
        }

        pub fn fail_sells(&self, mint: &str) {
            Self::lock(&self.failing_sells).insert(mint.to_string());
        }

        pub fn allow_sells(&self, mint: &str) {
            Self::lock(&self.failing_sells).remove(mint);
        }

        /// Sells succeed but return nothing
        pub fn zero_sells(&self, mint: &str) {
            Self::lock(&self.zero_sells).insert(mint.to_string());
        }

        /// Let `n` more sells of `mint` succeed, then fail the rest
        pub fn limit_sells(&self, mint: &str, n: u32) {
            Self::lock(&self.sell_budget).insert(mint.to_string(), n);
        }

        /// Let `n` more buys of `mint` succeed, then fail the rest
        pub fn limit_buys(&self, mint: &str, n: u32) {
            Self::lock(&self.buy_budget).insert(mint.to_string(), n);
        }

        /// Fail the next `n` sells of `mint`, then let sells through
        pub fn fail_next_sells(&self, mint: &str, n: u32) {
            Self::lock(&self.failing_sells_ahead).insert(mint.to_string(), n);
        }

        /// Move the price of `mint` once `swaps` swaps of it have been attempted
        pub fn reprice_after_swaps(&self, mint: &str, swaps: usize, lamports_per_unit: f64) {
            Self::lock(&self.repricings).push((mint.to_string(), swaps, lamports_per_unit));
        }

        fn apply_repricings(&self, mint: &str) {
            let attempted = Self::lock(&self.swaps)
                .iter()
                .filter(|s| s.input_mint == mint || s.output_mint == mint)
                .count();
            let mut due = Vec::new();
            Self::lock(&self.repricings).retain(|(m, after, price)| {
                if m == mint && *after <= attempted {
                    due.push(*price);
                    false
                } else {
                    true
                }
            });
            for price in due {
                self.set_price(mint, price);
            }
        }

        /// Fail the next `n` quotes with a transient RPC error
        pub fn fail_next_quotes(&self, n: u32) {
            self.transient_quote_failures.store(n, Ordering::SeqCst);
        }

        pub fn swaps(&self) -> Vec<SwapRequest> {
            Self::lock(&self.swaps).clone()
        }

        pub fn sells_of(&self, mint: &str) -> Vec<SwapRequest> {
            self.swaps()
                .into_iter()
                .filter(|s| s.input_mint == mint)
                .collect()
        }

        pub fn buys_of(&self, mint: &str) -> Vec<SwapRequest> {
            self.swaps()
                .into_iter()
                .filter(|s| s.output_mint == mint)
                .collect()
        }

        /// Price the swap; `None` when there is no route
        fn price_swap(&self, input: &str, output: &str, amount: u64) -> Option<(u64, f64)> {
            let (mint, is_buy) = if input == WSOL_MINT {
                (output, true)
            } else {
                (input, false)
            };
            if Self::lock(&self.no_route).contains(mint) {
                return None;
            }
            self.apply_repricings(mint);
            let price = self.price(mint)?;
            if price <= 0.0 {
                return None;
            }

            let base_impact = Self::lock(&self.impacts).get(mint).copied();
            let sell_impact = Self::lock(&self.sell_impacts).get(mint).copied();
            let impact = if is_buy {
                base_impact.unwrap_or(0.0)
            } else {
                sell_impact.or(base_impact).unwrap_or(0.0)
            };

            let out = if is_buy {
                (amount as f64 / price).floor() as u64
            } else if Self::lock(&self.zero_sells).contains(mint) {
                0
            } else {
                (amount as f64 * price).floor() as u64
            };
            Some((out, impact))
        }
    }

    #[async_trait]
    impl SwapProvider for ScriptedSwapProvider {
        async fn get_quote(
            &self,
            input_mint: &str,
            output_mint: &str,
            amount: u64,
            _max_slippage_bps: u32,
        ) -> Result<Option<Quote>> {
            let remaining = self.transient_quote_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.transient_quote_failures
                    .store(remaining - 1, Ordering::SeqCst);
                return Err(Error::RpcTimeout(100));
            }

            Ok(self
                .price_swap(input_mint, output_mint, amount)
                .map(|(out, impact)| Quote {
                    input_mint: input_mint.to_string(),
                    output_mint: output_mint.to_string(),
                    in_amount: amount,
                    out_amount: out,
                    price_impact_pct: impact,
                    route_reference: serde_json::json!({"scripted": true}),
                }))
        }

        async fn execute_swap(&self, request: &SwapRequest) -> Result<SwapResult> {
            Self::lock(&self.swaps).push(request.clone());
            let seq = self.seq.fetch_add(1, Ordering::SeqCst);

            let is_buy = request.input_mint == WSOL_MINT;
            let mint = if is_buy {
                &request.output_mint
            } else {
                &request.input_mint
            };

            if is_buy {
                if Self::lock(&self.failing_buys).contains(mint) {
                    return Ok(SwapResult::failed("buy reverted", true));
                }
                let mut budget = Self::lock(&self.buy_budget);
                if let Some(left) = budget.get_mut(mint.as_str()) {
                    if *left == 0 {
                        return Ok(SwapResult::failed("buy reverted", true));
                    }
                    *left -= 1;
                }
            }
            if !is_buy {
                let mut ahead = Self::lock(&self.failing_sells_ahead);
                if let Some(left) = ahead.get_mut(mint.as_str()) {
                    if *left > 0 {
                        *left -= 1;
                        return Ok(SwapResult::failed("sell reverted", true));
                    }
                }
                drop(ahead);
                if Self::lock(&self.failing_sells).contains(mint) {
                    return Ok(SwapResult::failed("sell reverted", true));
                }
                let mut budget = Self::lock(&self.sell_budget);
                if let Some(left) = budget.get_mut(mint.as_str()) {
                    if *left == 0 {
                        return Ok(SwapResult::failed("sell reverted", true));
                    }
                    *left -= 1;
                }
            }

            let Some((out, _)) = self.price_swap(&request.input_mint, &request.output_mint, request.amount)
            else {
                return Ok(SwapResult::failed("no route", true));
            };

            if is_buy {
                let _ = self.balance_lamports.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |b| {
                    Some(b.saturating_sub(request.amount))
                });
            } else {
                self.balance_lamports.fetch_add(out, Ordering::SeqCst);
            }

            Ok(SwapResult {
                success: true,
                signature: Some(format!("scripted-{}", seq)),
                simulated: true,
                error: None,
                in_amount: request.amount,
                out_amount: out,
            })
        }

        async fn sol_balance(&self) -> Result<f64> {
            Ok(self.balance_lamports.load(Ordering::SeqCst) as f64 / LAMPORTS_PER_SOL)
        }

        fn is_simulated(&self) -> bool {
            true
        }
    }
}
