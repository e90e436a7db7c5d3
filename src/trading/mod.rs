//! Trading - quote/swap providers
//!
//! - `provider`: the [`SwapProvider`] interface and a scripted test double
//! - `jupiter`: live quotes and swaps through the Jupiter API
//! - `simulation`: real quotes, synthetic swaps
//! - `retry`: bounded exponential backoff for read-only calls
//! - `execution`: quote-then-swap with route and impact checks

pub mod execution;
pub mod jupiter;
pub mod provider;
pub mod retry;
pub mod simulation;
pub mod wallet;

pub use execution::{buy_tokens, sell_tokens};
pub use jupiter::JupiterProvider;
pub use provider::{Quote, SwapProvider, SwapRequest, SwapResult};
pub use retry::{RetryPolicy, Retrying};
pub use simulation::SimulatedSwapProvider;
pub use wallet::load_keypair;
