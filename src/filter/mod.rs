//! Candidate validation
//!
//! - `stages` - the six admission gates
//! - `pipeline` - ordered, fail-fast execution and the dispatcher adapter
//! - `heuristics` - pluggable safety heuristics for the security stage
//! - `types` - stage and pipeline results

pub mod heuristics;
pub mod pipeline;
pub mod stages;
pub mod types;

pub use heuristics::{
    default_heuristics, BotActivityHeuristic, HeuristicVerdict, SafetyHeuristic, SoftRugHeuristic,
};
pub use pipeline::{PipelineRunner, ValidationPipeline};
pub use stages::{
    standard_stages, BuyStage, FeasibilityStage, HealthStage, LiquidityStage, RouteStage,
    SecurityStage, ValidationStage,
};
pub use types::{PipelineResult, StageContext, StageResult, StageVerdict};
