//! Tranche Sniper Library
//!
//! Event-driven execution engine for newly listed Solana pools: bounded
//! ingestion, a fail-fast validation pipeline, two-tranche entries and a
//! position monitor with tiered, trailing and emergency exits.

pub mod cli;
pub mod config;
pub mod error;
pub mod filter;
pub mod intel;
pub mod notify;
pub mod persistence;
pub mod position;
pub mod strategy;
pub mod stream;
pub mod trading;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
