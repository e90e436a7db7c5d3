//! Quote-then-swap helpers shared by the tranche engine and the monitor
//!
//! Failures come back as typed errors: `RouteUnavailable` and
//! `PriceImpactExceeded` before anything was sent, `ExecutionFailure` when
//! the swap was attempted and did not land.

use tracing::debug;

use super::provider::{SwapProvider, SwapRequest, SwapResult};
use crate::config::WSOL_MINT;
use crate::error::{Error, Result};

async fn quote_and_swap(
    provider: &dyn SwapProvider,
    input_mint: &str,
    output_mint: &str,
    amount: u64,
    slippage_bps: u32,
    max_impact_pct: Option<f64>,
) -> Result<SwapResult> {
    if amount == 0 {
        return Err(Error::ExecutionFailure("zero swap amount".to_string()));
    }

    let quote = provider
        .get_quote(input_mint, output_mint, amount, slippage_bps)
        .await?
        .ok_or_else(|| Error::RouteUnavailable {
            input: input_mint.to_string(),
            output: output_mint.to_string(),
        })?;

    if let Some(max_pct) = max_impact_pct {
        if quote.price_impact_pct > max_pct {
            return Err(Error::PriceImpactExceeded {
                impact_pct: quote.price_impact_pct,
                max_pct,
            });
        }
    }

    debug!(
        input = %input_mint,
        output = %output_mint,
        amount,
        out = quote.out_amount,
        impact = quote.price_impact_pct,
        "Executing quoted swap"
    );

    let result = provider
        .execute_swap(&SwapRequest::from_quote(&quote, slippage_bps))
        .await?;
    if !result.success {
        return Err(Error::ExecutionFailure(
            result.error.unwrap_or_else(|| "swap failed".to_string()),
        ));
    }
    Ok(result)
}

/// Spend `lamports` of SOL on `mint`
pub async fn buy_tokens(
    provider: &dyn SwapProvider,
    mint: &str,
    lamports: u64,
    slippage_bps: u32,
    max_impact_pct: Option<f64>,
) -> Result<SwapResult> {
    quote_and_swap(provider, WSOL_MINT, mint, lamports, slippage_bps, max_impact_pct).await
}

/// Sell `tokens` raw units of `mint` for SOL
pub async fn sell_tokens(
    provider: &dyn SwapProvider,
    mint: &str,
    tokens: u64,
    slippage_bps: u32,
    max_impact_pct: Option<f64>,
) -> Result<SwapResult> {
    quote_and_swap(provider, mint, WSOL_MINT, tokens, slippage_bps, max_impact_pct).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trading::provider::testing::ScriptedSwapProvider;

    #[tokio::test]
    async fn test_buy_respects_impact_ceiling() {
        let provider = ScriptedSwapProvider::new(10.0);
        provider.set_price("tok", 1.0);
        provider.set_impact("tok", 20.0);

        let err = buy_tokens(&provider, "tok", 100_000_000, 1000, Some(15.0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PriceImpactExceeded { .. }));
        assert!(provider.swaps().is_empty());

        // Without a ceiling the swap goes out
        let result = buy_tokens(&provider, "tok", 100_000_000, 1000, None).await.unwrap();
        assert_eq!(result.out_amount, 100_000_000);
    }

    #[tokio::test]
    async fn test_no_route_is_typed() {
        let provider = ScriptedSwapProvider::new(10.0);
        provider.set_no_route("tok");
        let err = sell_tokens(&provider, "tok", 1000, 1000, None).await.unwrap_err();
        assert!(err.is_route_failure());
    }

    #[tokio::test]
    async fn test_failed_swap_is_execution_failure() {
        let provider = ScriptedSwapProvider::new(10.0);
        provider.set_price("tok", 1.0);
        provider.fail_sells("tok");
        let err = sell_tokens(&provider, "tok", 1000, 1000, None).await.unwrap_err();
        assert!(matches!(err, Error::ExecutionFailure(_)));
        assert_eq!(provider.sells_of("tok").len(), 1);
    }

    #[tokio::test]
    async fn test_zero_amount_rejected() {
        let provider = ScriptedSwapProvider::new(10.0);
        assert!(sell_tokens(&provider, "tok", 0, 1000, None).await.is_err());
    }
}
