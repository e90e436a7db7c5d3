//! Position tracking and the exit monitor

pub mod monitor;
pub mod price_probe;
pub mod store;
pub mod types;

pub use monitor::{MonitorOutcome, PositionMonitor};
pub use price_probe::PriceProbe;
pub use store::PositionStore;
pub use types::{fill_price, Fill, Position, PositionUpdate, Sale};
