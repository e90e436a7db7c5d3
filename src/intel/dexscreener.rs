//! DexScreener pair data: pool liquidity and recent trade counts

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::WSOL_MINT;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Txns {
    pub m5: Option<TxnCount>,
    pub h1: Option<TxnCount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxnCount {
    pub buys: u32,
    pub sells: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Liquidity {
    pub usd: Option<f64>,
    pub base: Option<f64>,
    pub quote: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairToken {
    pub address: String,
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DexPair {
    #[serde(rename = "chainId")]
    pub chain_id: String,
    #[serde(rename = "dexId")]
    pub dex_id: String,
    #[serde(rename = "pairAddress")]
    pub pair_address: String,
    #[serde(rename = "baseToken")]
    pub base_token: PairToken,
    #[serde(rename = "quoteToken")]
    pub quote_token: PairToken,
    #[serde(rename = "priceNative")]
    pub price_native: Option<String>,
    pub txns: Option<Txns>,
    pub liquidity: Option<Liquidity>,
}

impl DexPair {
    /// SOL side of the pool, `None` unless the pair is quoted in SOL
    pub fn liquidity_sol(&self) -> Option<f64> {
        if self.quote_token.address != WSOL_MINT {
            return None;
        }
        self.liquidity.as_ref().and_then(|l| l.quote)
    }

    /// (buys, sells) in the last 5 minutes
    pub fn txns_5m(&self) -> Option<(u32, u32)> {
        self.txns
            .as_ref()
            .and_then(|t| t.m5.as_ref())
            .map(|m5| (m5.buys, m5.sells))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPairsResponse {
    pub pairs: Option<Vec<DexPair>>,
}

impl TokenPairsResponse {
    /// Deepest SOL-quoted Solana pair, preferring pump pools
    pub fn best_sol_pair(self) -> Option<DexPair> {
        let mut pairs: Vec<DexPair> = self
            .pairs
            .unwrap_or_default()
            .into_iter()
            .filter(|p| p.chain_id == "solana" && p.liquidity_sol().is_some())
            .collect();
        pairs.sort_by(|a, b| {
            let pump_a = a.dex_id == "pumpswap";
            let pump_b = b.dex_id == "pumpswap";
            pump_b.cmp(&pump_a).then_with(|| {
                b.liquidity_sol()
                    .partial_cmp(&a.liquidity_sol())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        });
        pairs.into_iter().next()
    }
}

pub struct DexScreenerClient {
    client: reqwest::Client,
    base_url: String,
}

impl DexScreenerClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Best SOL pair for a mint, `None` when DexScreener has not indexed it
    pub async fn get_token_pair(&self, mint: &str) -> Result<Option<DexPair>> {
        let url = format!("{}/latest/dex/tokens/{}", self.base_url, mint);
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(Error::RateLimited(format!("dexscreener {}", mint)));
        }
        if !status.is_success() {
            return Err(Error::Rpc(format!("dexscreener returned {} for {}", status, mint)));
        }
        let data: TokenPairsResponse = resp
            .json()
            .await
            .map_err(|e| Error::Deserialization(format!("dexscreener pairs: {}", e)))?;
        let pair = data.best_sol_pair();
        debug!(
            mint = %mint,
            liquidity_sol = ?pair.as_ref().and_then(|p| p.liquidity_sol()),
            "DexScreener pair fetched"
        );
        Ok(pair)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair_json(dex: &str, quote: &str, liq: f64, sells: u32) -> String {
        format!(
            r#"{{"chainId":"solana","dexId":"{}","pairAddress":"P{}","baseToken":{{"address":"MINT"}},
               "quoteToken":{{"address":"{}"}},"priceNative":"0.0000001",
               "txns":{{"m5":{{"buys":12,"sells":{}}}}},"liquidity":{{"usd":1000,"base":1,"quote":{}}}}}"#,
            dex, liq, quote, sells, liq
        )
    }

    #[test]
    fn test_best_pair_prefers_sol_quoted() {
        let body = format!(
            r#"{{"pairs":[{},{},{}]}}"#,
            pair_json("raydium", "USDC", 900.0, 1),
            pair_json("raydium", WSOL_MINT, 40.0, 3),
            pair_json("meteora", WSOL_MINT, 80.0, 4)
        );
        let resp: TokenPairsResponse = serde_json::from_str(&body).unwrap();
        let pair = resp.best_sol_pair().unwrap();
        assert_eq!(pair.dex_id, "meteora");
        assert_eq!(pair.liquidity_sol(), Some(80.0));
        assert_eq!(pair.txns_5m(), Some((12, 4)));
    }

    #[test]
    fn test_pumpswap_wins_over_depth() {
        let body = format!(
            r#"{{"pairs":[{},{}]}}"#,
            pair_json("raydium", WSOL_MINT, 400.0, 3),
            pair_json("pumpswap", WSOL_MINT, 85.0, 2)
        );
        let resp: TokenPairsResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(resp.best_sol_pair().unwrap().dex_id, "pumpswap");
    }

    #[test]
    fn test_no_pairs() {
        let resp: TokenPairsResponse = serde_json::from_str(r#"{"pairs":null}"#).unwrap();
        assert!(resp.best_sol_pair().is_none());
    }
}
