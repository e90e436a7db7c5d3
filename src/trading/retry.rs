//! Bounded retry with exponential backoff
//!
//! One policy shared by every read-only provider call. Only errors for which
//! [`Error::is_retryable`] holds are retried; after `max_attempts` the last
//! error is surfaced as [`Error::RetriesExhausted`].

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{error, warn};

use super::provider::{Quote, SwapProvider, SwapRequest, SwapResult};
use crate::config::RpcConfig;
use crate::error::{Error, Result};
use crate::intel::{EmergencyCheck, HealthReport, MarketIntel, SecurityReport};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    pub fn from_config(config: &RpcConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.retry_base_delay_ms),
            Duration::from_millis(config.retry_max_delay_ms),
        )
    }

    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.base_delay,
            max_interval: self.max_delay,
            randomization_factor: 0.2,
            multiplier: 2.0,
            // Attempts bound the loop, not wall time
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    /// Run `op` until it succeeds, fails permanently or runs out of attempts
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = AtomicU32::new(0);
        let max_attempts = self.max_attempts;

        retry(self.backoff(), || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let fut = op();
            async move {
                match fut.await {
                    Ok(value) => Ok(value),
                    Err(e) if e.is_retryable() && attempt < max_attempts => {
                        warn!(
                            "{} failed (attempt {}/{}), retrying: {}",
                            operation, attempt, max_attempts, e
                        );
                        Err(backoff::Error::transient(e))
                    }
                    Err(e) if e.is_retryable() => {
                        error!("{} failed after {} attempts: {}", operation, attempt, e);
                        Err(backoff::Error::permanent(Error::RetriesExhausted {
                            operation: operation.to_string(),
                            attempts: attempt,
                            last_error: e.to_string(),
                        }))
                    }
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            }
        })
        .await
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RpcConfig::default())
    }
}

/// Decorator retrying read-only provider calls
///
/// Swaps pass straight through: a failed submission may still land.
pub struct Retrying<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P> Retrying<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: SwapProvider> SwapProvider for Retrying<P> {
    async fn get_quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        max_slippage_bps: u32,
    ) -> Result<Option<Quote>> {
        self.policy
            .run("get_quote", || {
                self.inner
                    .get_quote(input_mint, output_mint, amount, max_slippage_bps)
            })
            .await
    }

    async fn execute_swap(&self, request: &SwapRequest) -> Result<SwapResult> {
        self.inner.execute_swap(request).await
    }

    async fn sol_balance(&self) -> Result<f64> {
        self.policy
            .run("sol_balance", || self.inner.sol_balance())
            .await
    }

    fn is_simulated(&self) -> bool {
        self.inner.is_simulated()
    }
}

#[async_trait]
impl<P: MarketIntel> MarketIntel for Retrying<P> {
    async fn check_security(&self, mint: &str) -> Result<SecurityReport> {
        self.policy
            .run("check_security", || self.inner.check_security(mint))
            .await
    }

    async fn check_market_health(&self, mint: &str, trade_size_sol: f64) -> Result<HealthReport> {
        self.policy
            .run("check_market_health", || {
                self.inner.check_market_health(mint, trade_size_sol)
            })
            .await
    }

    async fn check_emergency_triggers(
        &self,
        mint: &str,
        current_price: Option<f64>,
    ) -> Result<EmergencyCheck> {
        self.policy
            .run("check_emergency_triggers", || {
                self.inner.check_emergency_triggers(mint, current_price)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WSOL_MINT;
    use crate::intel::testing::StaticIntel;
    use crate::trading::provider::testing::ScriptedSwapProvider;
    use tokio_test::{assert_err, assert_ok};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = fast(3)
            .run("op", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Error::RpcTimeout(10))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_is_typed() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = fast(3)
            .run("get_quote", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::RateLimited("429".into())) }
            })
            .await;
        match result {
            Err(Error::RetriesExhausted {
                operation,
                attempts,
                ..
            }) => {
                assert_eq!(operation, "get_quote");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = fast(5)
            .run("op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::ExecutionFailure("reverted".into())) }
            })
            .await;
        assert!(matches!(result, Err(Error::ExecutionFailure(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retrying_provider_recovers_quote() {
        let scripted = ScriptedSwapProvider::new(1.0);
        scripted.set_price("tok", 1.0);
        scripted.fail_next_quotes(2);
        let provider = Retrying::new(scripted, fast(3));

        let quote = provider
            .get_quote(WSOL_MINT, "tok", 1000, 100)
            .await
            .unwrap();
        assert!(quote.is_some());
    }

    #[tokio::test]
    async fn test_retrying_provider_never_retries_swaps() {
        let scripted = ScriptedSwapProvider::new(1.0);
        scripted.set_price("tok", 1.0);
        scripted.fail_sells("tok");
        let provider = Retrying::new(scripted, fast(3));

        let result = provider
            .execute_swap(&SwapRequest::new("tok", WSOL_MINT, 10, 100))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(provider.inner().swaps().len(), 1);
    }

    #[tokio::test]
    async fn test_retrying_intel_surfaces_exhaustion() {
        let intel = Retrying::new(StaticIntel::new(), fast(2));
        intel.inner().fail("tok");

        let err = assert_err!(intel.check_security("tok").await);
        assert!(matches!(err, Error::RetriesExhausted { attempts: 2, .. }));

        let report = assert_ok!(intel.check_security("other").await);
        assert!(report.is_safe);
    }
}
