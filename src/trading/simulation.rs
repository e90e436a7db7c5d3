//! Simulation mode
//!
//! Quotes come from the wrapped provider, so routes and impacts are real.
//! Swaps are never submitted: each returns a deterministic synthetic
//! signature and moves a virtual SOL balance.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::info;

use super::provider::{Quote, SwapProvider, SwapRequest, SwapResult};
use crate::config::{lamports_to_sol, sol_to_lamports};
use crate::error::Result;

/// Prefix marking synthetic signatures
pub const SIM_SIGNATURE_PREFIX: &str = "SIM";

pub struct SimulatedSwapProvider<P> {
    inner: P,
    base_mint: String,
    balance_lamports: Mutex<u64>,
    seq: AtomicU64,
}

impl<P: SwapProvider> SimulatedSwapProvider<P> {
    pub fn new(inner: P, base_mint: impl Into<String>, starting_balance_sol: f64) -> Self {
        Self {
            inner,
            base_mint: base_mint.into(),
            balance_lamports: Mutex::new(sol_to_lamports(starting_balance_sol)),
            seq: AtomicU64::new(0),
        }
    }

    fn adjust_balance(&self, request: &SwapRequest, out_amount: u64) {
        let mut balance = self
            .balance_lamports
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if request.input_mint == self.base_mint {
            *balance = balance.saturating_sub(request.amount);
        } else if request.output_mint == self.base_mint {
            *balance = balance.saturating_add(out_amount);
        }
    }
}

/// Deterministic signature for the `seq`-th simulated swap of `request`
pub fn synthetic_signature(request: &SwapRequest, seq: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.input_mint.as_bytes());
    hasher.update(b"|");
    hasher.update(request.output_mint.as_bytes());
    hasher.update(b"|");
    hasher.update(request.amount.to_le_bytes());
    hasher.update(request.max_slippage_bps.to_le_bytes());
    hasher.update(seq.to_le_bytes());
    let digest = hasher.finalize();
    format!("{}{}", SIM_SIGNATURE_PREFIX, bs58::encode(digest).into_string())
}

#[async_trait]
impl<P: SwapProvider> SwapProvider for SimulatedSwapProvider<P> {
    async fn get_quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        max_slippage_bps: u32,
    ) -> Result<Option<Quote>> {
        self.inner
            .get_quote(input_mint, output_mint, amount, max_slippage_bps)
            .await
    }

    async fn execute_swap(&self, request: &SwapRequest) -> Result<SwapResult> {
        let quote = match &request.quote {
            Some(quote) => Some(quote.clone()),
            None => {
                self.inner
                    .get_quote(
                        &request.input_mint,
                        &request.output_mint,
                        request.amount,
                        request.max_slippage_bps,
                    )
                    .await?
            }
        };

        let Some(quote) = quote else {
            return Ok(SwapResult::failed("no route", true));
        };

        if request.input_mint == self.base_mint {
            let balance = *self
                .balance_lamports
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if request.amount > balance {
                return Ok(SwapResult::failed(
                    format!(
                        "insufficient simulated balance: {:.4} SOL",
                        lamports_to_sol(balance)
                    ),
                    true,
                ));
            }
        }

        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let signature = synthetic_signature(request, seq);
        self.adjust_balance(request, quote.out_amount);

        info!(
            "[SIM] {} {} -> {} {} ({})",
            request.amount, request.input_mint, quote.out_amount, request.output_mint, signature
        );

        Ok(SwapResult {
            success: true,
            signature: Some(signature),
            simulated: true,
            error: None,
            in_amount: request.amount,
            out_amount: quote.out_amount,
        })
    }

    async fn sol_balance(&self) -> Result<f64> {
        let balance = *self
            .balance_lamports
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        Ok(lamports_to_sol(balance))
    }

    fn is_simulated(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WSOL_MINT;
    use crate::trading::provider::testing::ScriptedSwapProvider;

    fn provider() -> SimulatedSwapProvider<ScriptedSwapProvider> {
        let scripted = ScriptedSwapProvider::new(0.0);
        scripted.set_price("tok", 1.0);
        SimulatedSwapProvider::new(scripted, WSOL_MINT, 1.0)
    }

    #[test]
    fn test_signature_is_deterministic() {
        let request = SwapRequest::new(WSOL_MINT, "tok", 1000, 100);
        assert_eq!(synthetic_signature(&request, 3), synthetic_signature(&request, 3));
        assert_ne!(synthetic_signature(&request, 3), synthetic_signature(&request, 4));
        assert!(synthetic_signature(&request, 0).starts_with(SIM_SIGNATURE_PREFIX));
    }

    #[tokio::test]
    async fn test_swaps_never_reach_inner() {
        let sim = provider();
        let result = sim
            .execute_swap(&SwapRequest::new(WSOL_MINT, "tok", 100_000_000, 100))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.simulated);
        assert_eq!(result.out_amount, 100_000_000);
        assert!(sim.inner.swaps().is_empty());
        assert!((sim.sol_balance().await.unwrap() - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_sell_credits_balance() {
        let sim = provider();
        sim.execute_swap(&SwapRequest::new("tok", WSOL_MINT, 500_000_000, 100))
            .await
            .unwrap();
        assert!((sim.sol_balance().await.unwrap() - 1.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_insufficient_balance_fails() {
        let sim = provider();
        let result = sim
            .execute_swap(&SwapRequest::new(WSOL_MINT, "tok", 2_000_000_000, 100))
            .await
            .unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_no_route_fails() {
        let sim = provider();
        let result = sim
            .execute_swap(&SwapRequest::new(WSOL_MINT, "unknown", 1000, 100))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("no route"));
    }
}
