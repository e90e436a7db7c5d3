//! RugCheck summary report client

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Risk {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub level: Option<String>,
}

impl Risk {
    pub fn is_danger(&self) -> bool {
        self.level.as_deref() == Some("danger")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryReport {
    #[serde(rename = "tokenProgram", default)]
    pub token_program: Option<String>,
    #[serde(default)]
    pub risks: Vec<Risk>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(rename = "score_normalised", default)]
    pub score_normalised: Option<f64>,
}

impl SummaryReport {
    /// Names of danger-level risks
    pub fn danger_risks(&self) -> Vec<String> {
        self.risks
            .iter()
            .filter(|r| r.is_danger())
            .map(|r| r.name.clone())
            .collect()
    }
}

pub struct RugCheckClient {
    client: reqwest::Client,
    base_url: String,
}

impl RugCheckClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Fetch the summary report for a mint
    pub async fn summary(&self, mint: &str) -> Result<SummaryReport> {
        let url = format!("{}/tokens/{}/report/summary", self.base_url, mint);
        let resp = self.client.get(&url).send().await?;
        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(Error::RateLimited(format!("rugcheck {}", mint)));
        }
        if !status.is_success() {
            return Err(Error::Rpc(format!("rugcheck returned {} for {}", status, mint)));
        }
        let report: SummaryReport = resp
            .json()
            .await
            .map_err(|e| Error::Deserialization(format!("rugcheck report: {}", e)))?;
        debug!(mint = %mint, risks = report.risks.len(), "RugCheck report fetched");
        Ok(report)
    }
}
