//! Notifier and subscribers

use chrono::Utc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{EngineEvent, Envelope};

/// Broadcast publisher for engine events
///
/// Publishing never blocks and never fails the caller. Slow subscribers
/// lose the oldest events.
#[derive(Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Envelope>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event
    pub fn emit(&self, event: EngineEvent) {
        let envelope = Envelope {
            at: Utc::now(),
            event,
        };
        // No subscribers is fine
        let _ = self.tx.send(envelope);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Log every event through tracing
pub fn spawn_log_subscriber(notifier: &Notifier, cancel: CancellationToken) -> JoinHandle<()> {
    let mut rx = notifier.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Ok(envelope) => {
                        let event = &envelope.event;
                        if event.is_alert() {
                            warn!(mint = event.mint().unwrap_or("-"), "{}", event.description());
                        } else {
                            info!(mint = event.mint().unwrap_or("-"), "{}", event.description());
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Event log lagged, {} event(s) dropped", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}

/// POST every event as JSON to `url`
///
/// Failures are logged at debug level and otherwise ignored.
pub fn spawn_webhook_forwarder(
    notifier: &Notifier,
    url: String,
    timeout: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut rx = notifier.subscribe();
    tokio::spawn(async move {
        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(e) => {
                warn!("Webhook forwarder disabled, client build failed: {}", e);
                return;
            }
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Ok(envelope) => {
                        match client.post(&url).json(&envelope).send().await {
                            Ok(resp) if !resp.status().is_success() => {
                                debug!("Webhook returned {}", resp.status());
                            }
                            Ok(_) => {}
                            Err(e) => debug!("Webhook delivery failed: {}", e),
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("Webhook forwarder lagged, {} event(s) dropped", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}
