//! Validation pipeline
//!
//! Runs the stages in order and stops at the first failure. The returned
//! [`PipelineResult`] lists every stage that ran, so a failure at stage k
//! has exactly k results.

use async_trait::async_trait;
use dashmap::DashSet;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::stages::ValidationStage;
use super::types::{PipelineResult, StageContext, StageResult, StageVerdict};
use crate::notify::{EngineEvent, Notifier};
use crate::persistence::TokenState;
use crate::position::PositionStore;
use crate::stream::{CandidateProcessor, PoolCandidate};

pub struct ValidationPipeline {
    stages: Vec<Arc<dyn ValidationStage>>,
    positions: Arc<PositionStore>,
    notifier: Notifier,
}

impl ValidationPipeline {
    pub fn new(
        stages: Vec<Arc<dyn ValidationStage>>,
        positions: Arc<PositionStore>,
        notifier: Notifier,
    ) -> Self {
        Self {
            stages,
            positions,
            notifier,
        }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage until one fails
    pub async fn run(&self, ctx: &mut StageContext) -> PipelineResult {
        let mint = ctx.mint().to_string();
        let mut results: Vec<StageResult> = Vec::with_capacity(self.stages.len());

        for (i, stage) in self.stages.iter().enumerate() {
            let index = i + 1;
            let verdict = match stage.run(ctx).await {
                Ok(verdict) => verdict,
                Err(e) => StageVerdict::fail(
                    format!("{} check failed: {}", stage.name(), e),
                    json!({ "error": e.to_string(), "retryable": e.is_retryable() }),
                ),
            };
            let result = verdict.into_result(index, stage.name());

            if !result.passed {
                let reason = result.reason.clone().unwrap_or_default();
                info!(mint = %mint, stage = index, name = stage.name(), "Rejected: {}", reason);
                self.notifier.emit(EngineEvent::StageFailed {
                    mint: mint.clone(),
                    stage: index,
                    name: stage.name().to_string(),
                    reason,
                });
                results.push(result);
                return PipelineResult {
                    mint,
                    results,
                    success: false,
                    failed_stage: Some(index),
                    failed_stage_name: Some(stage.name().to_string()),
                    trade_ids: ctx.trades().iter().map(|t| t.id).collect(),
                };
            }

            debug!(mint = %mint, stage = index, name = stage.name(), "Stage passed");
            self.notifier.emit(EngineEvent::StagePassed {
                mint: mint.clone(),
                stage: index,
                name: stage.name().to_string(),
            });
            if let Some(state) = stage.advances_to() {
                self.positions
                    .set_lifecycle(&mint, state, result.details.clone())
                    .await;
            }
            results.push(result);
        }

        PipelineResult {
            mint,
            results,
            success: true,
            failed_stage: None,
            failed_stage_name: None,
            trade_ids: ctx.trades().iter().map(|t| t.id).collect(),
        }
    }
}

/// Dispatcher-facing wrapper: dedupe, lifecycle bookkeeping, pipeline run
pub struct PipelineRunner {
    pipeline: ValidationPipeline,
    positions: Arc<PositionStore>,
    notifier: Notifier,
    notional_sol: f64,
    in_flight: DashSet<String>,
}

impl PipelineRunner {
    pub fn new(
        pipeline: ValidationPipeline,
        positions: Arc<PositionStore>,
        notifier: Notifier,
        notional_sol: f64,
    ) -> Self {
        Self {
            pipeline,
            positions,
            notifier,
            notional_sol,
            in_flight: DashSet::new(),
        }
    }

    fn skip(&self, mint: &str, reason: &str) {
        debug!(mint = %mint, "Candidate skipped: {}", reason);
        self.notifier.emit(EngineEvent::CandidateSkipped {
            mint: mint.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Why `mint` should not be validated again, if anything
    async fn already_handled(&self, mint: &str) -> Option<&'static str> {
        match self.positions.backend().get_lifecycle(mint).await {
            Ok(Some(record)) => match record.state {
                TokenState::Blacklisted => Some("blacklisted"),
                TokenState::Bought | TokenState::PartiallySold | TokenState::FullyExited => {
                    Some("already traded")
                }
                _ => None,
            },
            Ok(None) => None,
            Err(e) => {
                warn!(mint = %mint, "Lifecycle read failed: {}", e);
                None
            }
        }
    }

    /// Validate one candidate; `None` when it was skipped
    pub async fn run_candidate(&self, candidate: PoolCandidate) -> Option<PipelineResult> {
        let mint = candidate.mint.clone();
        if !self.in_flight.insert(mint.clone()) {
            self.skip(&mint, "already in flight");
            return None;
        }

        let result = self.validate(candidate).await;
        self.in_flight.remove(&mint);
        result
    }

    async fn validate(&self, candidate: PoolCandidate) -> Option<PipelineResult> {
        let mint = candidate.mint.clone();
        if let Some(reason) = self.already_handled(&mint).await {
            self.skip(&mint, reason);
            return None;
        }

        self.positions
            .set_lifecycle(
                &mint,
                TokenState::PoolCreated,
                json!({ "pool": candidate.pool, "liquidity_sol": candidate.liquidity_sol }),
            )
            .await;

        let mut ctx = StageContext::new(candidate, self.notional_sol);
        let result = self.pipeline.run(&mut ctx).await;

        if result.success {
            info!(mint = %mint, trades = result.trade_ids.len(), "Candidate admitted and bought");
            return Some(result);
        }

        let failure = json!({
            "stage": result.failed_stage,
            "name": result.failed_stage_name,
            "reason": result.failure_reason(),
        });
        if ctx.blacklist {
            warn!(mint = %mint, "Blacklisting: {}", result.failure_reason().unwrap_or_default());
            self.positions
                .set_lifecycle(&mint, TokenState::Blacklisted, json!({ "blacklist": failure }))
                .await;
        } else {
            // Stay where the passed stages left the mint
            let current = match self.positions.backend().get_lifecycle(&mint).await {
                Ok(Some(record)) => record.state,
                _ => TokenState::PoolCreated,
            };
            self.positions
                .set_lifecycle(&mint, current, json!({ "last_failure": failure }))
                .await;
        }
        Some(result)
    }
}

#[async_trait]
impl CandidateProcessor for PipelineRunner {
    async fn process(&self, candidate: PoolCandidate) {
        self.run_candidate(candidate).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::persistence::{MemoryStore, Store};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Passes or fails on cue, counting its runs
    struct Scripted {
        name: &'static str,
        outcome: std::result::Result<bool, ()>,
        runs: AtomicUsize,
        blacklist: bool,
        advances: Option<TokenState>,
    }

    impl Scripted {
        fn new(name: &'static str, outcome: std::result::Result<bool, ()>) -> Arc<Self> {
            Arc::new(Self {
                name,
                outcome,
                runs: AtomicUsize::new(0),
                blacklist: false,
                advances: None,
            })
        }

        fn advancing(name: &'static str, state: TokenState) -> Arc<Self> {
            Arc::new(Self {
                name,
                outcome: Ok(true),
                runs: AtomicUsize::new(0),
                blacklist: false,
                advances: Some(state),
            })
        }
    }

    #[async_trait]
    impl ValidationStage for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }

        fn advances_to(&self) -> Option<TokenState> {
            self.advances
        }

        async fn run(&self, ctx: &mut StageContext) -> Result<StageVerdict> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            ctx.blacklist = self.blacklist;
            match self.outcome {
                Ok(true) => Ok(StageVerdict::pass(json!({}))),
                Ok(false) => Ok(StageVerdict::fail("scripted failure", json!({}))),
                Err(()) => Err(Error::RpcTimeout(500)),
            }
        }
    }

    fn positions() -> (Arc<MemoryStore>, Arc<PositionStore>) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), Arc::new(PositionStore::new(store)))
    }

    #[tokio::test]
    async fn test_short_circuits_on_failure() {
        let (_, positions) = positions();
        let a = Scripted::new("a", Ok(true));
        let b = Scripted::new("b", Ok(false));
        let c = Scripted::new("c", Ok(true));
        let pipeline = ValidationPipeline::new(
            vec![a.clone(), b.clone(), c.clone()],
            positions,
            Notifier::new(16),
        );

        let mut ctx = StageContext::new(PoolCandidate::new("tok", "pool", 1.0), 0.1);
        let result = pipeline.run(&mut ctx).await;
        assert!(!result.success);
        assert_eq!(result.results.len(), 2);
        assert_eq!(result.failed_stage, Some(2));
        assert_eq!(result.failed_stage_name.as_deref(), Some("b"));
        assert_eq!(c.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stage_error_fails_closed() {
        let (_, positions) = positions();
        let pipeline = ValidationPipeline::new(
            vec![Scripted::new("a", Err(())), Scripted::new("b", Ok(true))],
            positions,
            Notifier::new(16),
        );
        let mut ctx = StageContext::new(PoolCandidate::new("tok", "pool", 1.0), 0.1);
        let result = pipeline.run(&mut ctx).await;
        assert!(!result.success);
        assert_eq!(result.results.len(), 1);
        assert!(result.failure_reason().unwrap().contains("timeout"));
        assert_eq!(result.results[0].details["retryable"], true);
    }

    #[tokio::test]
    async fn test_all_pass() {
        let (_, positions) = positions();
        let notifier = Notifier::new(16);
        let mut events = notifier.subscribe();
        let pipeline = ValidationPipeline::new(
            vec![Scripted::new("a", Ok(true)), Scripted::new("b", Ok(true))],
            positions,
            notifier,
        );
        let mut ctx = StageContext::new(PoolCandidate::new("tok", "pool", 1.0), 0.1);
        let result = pipeline.run(&mut ctx).await;
        assert!(result.success);
        assert_eq!(result.results.len(), 2);
        assert!(result.failed_stage.is_none());
        assert!(matches!(
            events.recv().await.unwrap().event,
            EngineEvent::StagePassed { stage: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_runner_records_failure_and_blacklist() {
        let (store, positions) = positions();
        let pipeline = ValidationPipeline::new(
            vec![Scripted::new("a", Ok(false))],
            positions.clone(),
            Notifier::new(16),
        );
        let runner = PipelineRunner::new(pipeline, positions.clone(), Notifier::new(16), 0.1);
        runner
            .run_candidate(PoolCandidate::new("tok", "pool", 1.0))
            .await
            .unwrap();
        let record = store.get_lifecycle("tok").await.unwrap().unwrap();
        assert_eq!(record.state, TokenState::PoolCreated);
        assert_eq!(record.attributes["last_failure"]["stage"], 1);

        let blacklisting = Arc::new(Scripted {
            name: "security",
            outcome: Ok(false),
            runs: AtomicUsize::new(0),
            blacklist: true,
            advances: None,
        });
        let pipeline = ValidationPipeline::new(vec![blacklisting], positions.clone(), Notifier::new(16));
        let runner = PipelineRunner::new(pipeline, positions, Notifier::new(16), 0.1);
        runner
            .run_candidate(PoolCandidate::new("bad", "pool", 1.0))
            .await
            .unwrap();
        let record = store.get_lifecycle("bad").await.unwrap().unwrap();
        assert_eq!(record.state, TokenState::Blacklisted);

        // Blacklisted mints are never validated again
        assert!(runner
            .run_candidate(PoolCandidate::new("bad", "pool", 1.0))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_late_failure_keeps_reached_state() {
        let (store, positions) = positions();
        let pipeline = ValidationPipeline::new(
            vec![
                Scripted::advancing("security", TokenState::SecurityVerified),
                Scripted::new("health", Ok(false)),
            ],
            positions.clone(),
            Notifier::new(16),
        );
        let runner = PipelineRunner::new(pipeline, positions, Notifier::new(16), 0.1);
        let result = runner
            .run_candidate(PoolCandidate::new("tok", "pool", 1.0))
            .await
            .unwrap();
        assert_eq!(result.failed_stage, Some(2));

        let record = store.get_lifecycle("tok").await.unwrap().unwrap();
        assert_eq!(record.state, TokenState::SecurityVerified);
        assert_eq!(record.attributes["last_failure"]["stage"], 2);
        assert_eq!(record.attributes["last_failure"]["name"], "health");
    }
}

