//! Jupiter swap API adapter
//!
//! Quotes via `GET /quote`, builds swaps via `POST /swap`, signs the returned
//! versioned transaction locally and submits it through RPC.

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::transaction::VersionedTransaction;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::provider::{Quote, SwapProvider, SwapRequest, SwapResult};
use crate::config::{lamports_to_sol, Config};
use crate::error::{Error, Result};

/// Quote response, amounts are decimal strings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: String,
    pub out_amount: String,
    #[serde(default)]
    pub other_amount_threshold: String,
    /// Impact as a fraction string ("0.0125" = 1.25%)
    #[serde(default)]
    pub price_impact_pct: String,
    #[serde(default)]
    pub slippage_bps: u32,
}

impl QuoteResponse {
    pub fn out_amount(&self) -> Option<u64> {
        self.out_amount.parse().ok()
    }

    pub fn in_amount(&self) -> Option<u64> {
        self.in_amount.parse().ok()
    }

    /// Impact in percent; `None` when the field is missing or malformed
    pub fn price_impact_pct(&self) -> Option<f64> {
        self.price_impact_pct
            .parse::<f64>()
            .ok()
            .map(|fraction| fraction * 100.0)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SwapBuildRequest<'a> {
    user_public_key: String,
    quote_response: &'a serde_json::Value,
    wrap_and_unwrap_sol: bool,
    dynamic_compute_unit_limit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    prioritization_fee_lamports: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapBuildResponse {
    swap_transaction: String,
    #[serde(default)]
    last_valid_block_height: u64,
}

/// Error body returned with 4xx responses
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiError {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_code: String,
}

impl ApiError {
    fn is_no_route(&self) -> bool {
        let text = format!("{} {}", self.error, self.error_code).to_lowercase();
        text.contains("route") || text.contains("not_tradable") || text.contains("not tradable")
    }
}

pub struct JupiterProvider {
    http: Client,
    base_url: String,
    rpc: Arc<RpcClient>,
    keypair: Arc<Keypair>,
    priority_fee_lamports: u64,
}

impl JupiterProvider {
    pub fn new(config: &Config, keypair: Arc<Keypair>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.rpc.timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        let rpc = Arc::new(RpcClient::new_with_timeout_and_commitment(
            config.rpc.endpoint.clone(),
            Duration::from_millis(config.rpc.timeout_ms),
            CommitmentConfig::confirmed(),
        ));

        info!(
            "Jupiter provider initialized ({}), wallet {}",
            config.trading.jupiter_api_url,
            keypair.pubkey()
        );

        Ok(Self {
            http,
            base_url: config.trading.jupiter_api_url.trim_end_matches('/').to_string(),
            rpc,
            keypair,
            priority_fee_lamports: config.trading.priority_fee_lamports,
        })
    }

    pub fn rpc(&self) -> &Arc<RpcClient> {
        &self.rpc
    }

    /// Consume a non-success response: `Ok(())` when it means "no route"
    async fn no_route_or_error(response: reqwest::Response) -> Result<()> {
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited(format!("Jupiter returned {}", status)));
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_server_error() {
            return Err(Error::Rpc(format!("Jupiter {}: {}", status, body)));
        }

        let api_error: ApiError = serde_json::from_str(&body).unwrap_or_default();
        if matches!(status, StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND) && api_error.is_no_route()
        {
            return Ok(());
        }
        Err(Error::Deserialization(format!(
            "Jupiter {}: {}",
            status,
            body.chars().take(200).collect::<String>()
        )))
    }

    async fn fetch_quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        max_slippage_bps: u32,
    ) -> Result<Option<(QuoteResponse, serde_json::Value)>> {
        let url = format!("{}/quote", self.base_url);
        let amount = amount.to_string();
        let slippage = max_slippage_bps.to_string();
        let response = self
            .http
            .get(&url)
            .query(&[
                ("inputMint", input_mint),
                ("outputMint", output_mint),
                ("amount", amount.as_str()),
                ("slippageBps", slippage.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            Self::no_route_or_error(response).await?;
            return Ok(None);
        }

        let raw: serde_json::Value = response.json().await?;
        let parsed: QuoteResponse = serde_json::from_value(raw.clone())
            .map_err(|e| Error::Deserialization(format!("quote: {}", e)))?;
        Ok(Some((parsed, raw)))
    }

    async fn sign_and_send(&self, swap_transaction: &str) -> Result<String> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(swap_transaction)
            .map_err(|e| Error::TransactionBuild(format!("base64: {}", e)))?;
        let unsigned: VersionedTransaction = bincode::deserialize(&bytes)
            .map_err(|e| Error::TransactionBuild(format!("decode: {}", e)))?;
        let signed = VersionedTransaction::try_new(unsigned.message, &[self.keypair.as_ref()])
            .map_err(|e| Error::TransactionBuild(format!("sign: {}", e)))?;

        let signature = self
            .rpc
            .send_and_confirm_transaction(&signed)
            .await
            .map_err(|e| Error::TransactionSend(e.to_string()))?;
        Ok(signature.to_string())
    }
}

#[async_trait]
impl SwapProvider for JupiterProvider {
    async fn get_quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        max_slippage_bps: u32,
    ) -> Result<Option<Quote>> {
        let Some((parsed, raw)) = self
            .fetch_quote(input_mint, output_mint, amount, max_slippage_bps)
            .await?
        else {
            debug!("No route {} -> {}", input_mint, output_mint);
            return Ok(None);
        };

        let out_amount = parsed
            .out_amount()
            .ok_or_else(|| Error::Deserialization(format!("outAmount {:?}", parsed.out_amount)))?;
        // Missing impact is unknown, not zero
        let price_impact_pct = parsed.price_impact_pct().ok_or_else(|| {
            Error::Deserialization(format!("priceImpactPct {:?}", parsed.price_impact_pct))
        })?;

        Ok(Some(Quote {
            input_mint: input_mint.to_string(),
            output_mint: output_mint.to_string(),
            in_amount: parsed.in_amount().unwrap_or(amount),
            out_amount,
            price_impact_pct,
            route_reference: raw,
        }))
    }

    async fn execute_swap(&self, request: &SwapRequest) -> Result<SwapResult> {
        let quote = match &request.quote {
            Some(quote) => quote.clone(),
            None => match self
                .get_quote(
                    &request.input_mint,
                    &request.output_mint,
                    request.amount,
                    request.max_slippage_bps,
                )
                .await?
            {
                Some(quote) => quote,
                None => return Ok(SwapResult::failed("no route", false)),
            },
        };

        let body = SwapBuildRequest {
            user_public_key: self.keypair.pubkey().to_string(),
            quote_response: &quote.route_reference,
            wrap_and_unwrap_sol: true,
            dynamic_compute_unit_limit: true,
            prioritization_fee_lamports: Some(self.priority_fee_lamports),
        };

        let response = self
            .http
            .post(format!("{}/swap", self.base_url))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Ok(SwapResult::failed(
                format!(
                    "swap build {}: {}",
                    status,
                    text.chars().take(200).collect::<String>()
                ),
                false,
            ));
        }
        let built: SwapBuildResponse = response.json().await?;
        debug!(
            "Swap built, valid until block {}",
            built.last_valid_block_height
        );

        match self.sign_and_send(&built.swap_transaction).await {
            Ok(signature) => {
                info!(
                    "Swap confirmed {} -> {}: {}",
                    request.input_mint, request.output_mint, signature
                );
                Ok(SwapResult {
                    success: true,
                    signature: Some(signature),
                    simulated: false,
                    error: None,
                    in_amount: quote.in_amount,
                    out_amount: quote.out_amount,
                })
            }
            Err(e) => {
                warn!("Swap failed {} -> {}: {}", request.input_mint, request.output_mint, e);
                Ok(SwapResult::failed(e.to_string(), false))
            }
        }
    }

    async fn sol_balance(&self) -> Result<f64> {
        let lamports = self.rpc.get_balance(&self.keypair.pubkey()).await?;
        Ok(lamports_to_sol(lamports))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quote_response() {
        let json = r#"{
            "inputMint": "So11111111111111111111111111111111111111112",
            "outputMint": "tok",
            "inAmount": "100000000",
            "outAmount": "3500000000",
            "otherAmountThreshold": "3400000000",
            "swapMode": "ExactIn",
            "slippageBps": 100,
            "priceImpactPct": "0.0125",
            "routePlan": []
        }"#;
        let quote: QuoteResponse = serde_json::from_str(json).unwrap();
        assert_eq!(quote.out_amount(), Some(3_500_000_000));
        assert!((quote.price_impact_pct().unwrap() - 1.25).abs() < 1e-9);
    }

    #[test]
    fn test_missing_impact_is_unknown() {
        let json = r#"{"inputMint":"a","outputMint":"b","inAmount":"1","outAmount":"2"}"#;
        let quote: QuoteResponse = serde_json::from_str(json).unwrap();
        assert!(quote.price_impact_pct().is_none());
    }

    #[test]
    fn test_no_route_error_detection() {
        let err: ApiError = serde_json::from_str(
            r#"{"error":"Could not find any route","errorCode":"COULD_NOT_FIND_ANY_ROUTE"}"#,
        )
        .unwrap();
        assert!(err.is_no_route());

        let err: ApiError =
            serde_json::from_str(r#"{"error":"Invalid amount","errorCode":"INVALID_AMOUNT"}"#).unwrap();
        assert!(!err.is_no_route());
    }
}
