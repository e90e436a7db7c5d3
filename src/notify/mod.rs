//! Notification stream
//!
//! Components publish typed [`EngineEvent`]s into a single [`Notifier`].
//! Consumers subscribe; delivery is best effort and never blocks a publisher.

pub mod events;
pub mod sink;

pub use events::EngineEvent;
pub use sink::{spawn_log_subscriber, spawn_webhook_forwarder, Notifier};
