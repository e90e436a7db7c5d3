//! Trading strategy
//!
//! - `exit_manager` - exit decision per position and price
//! - `risk` - admission control before a first-tranche buy
//! - `tranche` - the two-tranche entry sequence

pub mod exit_manager;
pub mod risk;
pub mod tranche;

pub use exit_manager::{ExitEvaluation, ExitManager, ExitReason, ExitSignal, Urgency};
pub use risk::{RiskAdmission, RiskBlock, RiskDecision, RiskReservation, RiskState};
pub use tranche::{TrancheEngine, TrancheOutcome, TrancheReport};
