//! Price probe for open positions
//!
//! Quotes a small slice of the held tokens back to SOL instead of the full
//! size, so reading the price does not move it.

use std::sync::Arc;
use tracing::debug;

use super::types::{fill_price, Position};
use crate::config::{lamports_to_sol, WSOL_MINT};
use crate::error::Result;
use crate::trading::SwapProvider;

pub struct PriceProbe {
    provider: Arc<dyn SwapProvider>,
    fraction_pct: f64,
    slippage_bps: u32,
}

impl PriceProbe {
    pub fn new(provider: Arc<dyn SwapProvider>, fraction_pct: f64, slippage_bps: u32) -> Self {
        Self {
            provider,
            fraction_pct: fraction_pct.clamp(0.0, 100.0),
            slippage_bps,
        }
    }

    /// Raw tokens quoted for `position`
    pub fn probe_size(&self, position: &Position) -> u64 {
        let size = (position.token_amount as f64 * self.fraction_pct / 100.0).floor() as u64;
        size.max(1).min(position.token_amount)
    }

    /// Current sell price in lamports per raw unit
    ///
    /// `Ok(None)` when nothing is held or no route exists. A route that
    /// returns zero SOL yields `Some(0.0)`.
    pub async fn price(&self, position: &Position) -> Result<Option<f64>> {
        if position.token_amount == 0 {
            return Ok(None);
        }
        let tokens = self.probe_size(position);
        let Some(quote) = self
            .provider
            .get_quote(&position.mint, WSOL_MINT, tokens, self.slippage_bps)
            .await?
        else {
            debug!(mint = %position.mint, "Price probe found no route");
            return Ok(None);
        };

        let price = fill_price(lamports_to_sol(quote.out_amount), tokens);
        debug!(mint = %position.mint, tokens, out = quote.out_amount, price, "Price probed");
        Ok(Some(price))
    }
}
