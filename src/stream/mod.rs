//! Stream module - pool discovery and bounded ingestion
//!
//! - `listener`: PumpPortal WebSocket, turns migrations into candidates
//! - `queue`: bounded drop-oldest ingestion queue
//! - `dispatcher`: tick-driven, concurrency-capped candidate dispatch

pub mod dispatcher;
pub mod listener;
pub mod queue;
pub mod types;

pub use dispatcher::{CandidateProcessor, Dispatcher};
pub use listener::{check_reachable, PoolListener, ReserveCache};
pub use queue::IngestionQueue;
pub use types::PoolCandidate;
