//! Dispatch tick for the ingestion queue
//!
//! Every `dispatch_interval_ms` the dispatcher drains as many candidates as
//! there are free slots under the concurrency ceiling and spawns one task per
//! candidate. A slot is reserved before the candidate is popped and released
//! by a drop guard, so a finished or panicked task always returns capacity.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::queue::IngestionQueue;
use super::types::PoolCandidate;
use crate::config::IngestionConfig;

/// Consumer of dispatched candidates
///
/// Implementations own their error handling: whatever happens inside
/// `process`, the dispatcher only sees completion.
#[async_trait]
pub trait CandidateProcessor: Send + Sync {
    async fn process(&self, candidate: PoolCandidate);
}

/// Releases one active slot when dropped
struct ActiveGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Bounded-concurrency dispatcher over an [`IngestionQueue`]
pub struct Dispatcher {
    queue: Arc<IngestionQueue<PoolCandidate>>,
    processor: Arc<dyn CandidateProcessor>,
    concurrency_limit: usize,
    interval: Duration,
    active: Arc<AtomicUsize>,
    peak_active: Arc<AtomicUsize>,
    dispatched: AtomicU64,
}

impl Dispatcher {
    pub fn new(
        config: &IngestionConfig,
        queue: Arc<IngestionQueue<PoolCandidate>>,
        processor: Arc<dyn CandidateProcessor>,
    ) -> Self {
        Self {
            queue,
            processor,
            concurrency_limit: config.concurrency_limit.max(1),
            interval: Duration::from_millis(config.dispatch_interval_ms.max(1)),
            active: Arc::new(AtomicUsize::new(0)),
            peak_active: Arc::new(AtomicUsize::new(0)),
            dispatched: AtomicU64::new(0),
        }
    }

    /// Reserve one slot if the ceiling allows it
    fn try_acquire(&self) -> Option<ActiveGuard> {
        let mut current = self.active.load(Ordering::Acquire);
        loop {
            if current >= self.concurrency_limit {
                return None;
            }
            match self.active.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.peak_active.fetch_max(current + 1, Ordering::AcqRel);
                    return Some(ActiveGuard {
                        active: self.active.clone(),
                    });
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Run one dispatch pass, returning how many candidates were spawned
    pub fn tick(&self) -> usize {
        let mut spawned = 0;

        loop {
            let Some(guard) = self.try_acquire() else {
                break;
            };
            let Some(candidate) = self.queue.try_pop() else {
                // Nothing queued, guard drop releases the slot
                break;
            };

            let processor = self.processor.clone();
            debug!(mint = %candidate.mint, "Dispatching candidate");
            tokio::spawn(async move {
                let _guard = guard;
                processor.process(candidate).await;
            });
            spawned += 1;
        }

        if spawned > 0 {
            self.dispatched.fetch_add(spawned as u64, Ordering::Relaxed);
            debug!(
                "Dispatched {} candidate(s), active {}/{}, queued {}",
                spawned,
                self.active_count(),
                self.concurrency_limit,
                self.queue.len()
            );
        }

        spawned
    }

    /// Tick until cancelled
    ///
    /// Cancellation stops new dispatches only; spawned candidates finish.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "Dispatcher started (interval {:?}, concurrency {})",
            self.interval, self.concurrency_limit
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Dispatcher stopping, {} candidate(s) still in flight", self.active_count());
                    break;
                }
                _ = ticker.tick() => {
                    self.tick();
                }
            }
        }
    }

    /// Number of candidates currently being processed
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Highest concurrent count observed
    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::Acquire)
    }

    /// Total candidates handed to the processor
    pub fn dispatched_count(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Holds every candidate until released, tracking the concurrent maximum
    struct GatedProcessor {
        in_flight: AtomicUsize,
        max_seen: AtomicUsize,
        completed: AtomicUsize,
        release: Notify,
    }

    impl GatedProcessor {
        fn new() -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                max_seen: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                release: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl CandidateProcessor for GatedProcessor {
        async fn process(&self, _candidate: PoolCandidate) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            self.release.notified().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct PanickingProcessor;

    #[async_trait]
    impl CandidateProcessor for PanickingProcessor {
        async fn process(&self, _candidate: PoolCandidate) {
            panic!("processor blew up");
        }
    }

    fn config(limit: usize) -> IngestionConfig {
        IngestionConfig {
            queue_capacity: 200,
            concurrency_limit: limit,
            dispatch_interval_ms: 10,
        }
    }

    fn fill(queue: &IngestionQueue<PoolCandidate>, n: usize) {
        for i in 0..n {
            queue.enqueue(PoolCandidate::new(format!("mint{}", i), format!("pool{}", i), 1.0));
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_tick_respects_ceiling() {
        let queue = Arc::new(IngestionQueue::new(200));
        fill(&queue, 12);
        let processor = Arc::new(GatedProcessor::new());
        let dispatcher = Dispatcher::new(&config(5), queue.clone(), processor.clone());

        assert_eq!(dispatcher.tick(), 5);
        assert_eq!(dispatcher.active_count(), 5);
        assert_eq!(queue.len(), 7);

        // Saturated: nothing more goes out
        assert_eq!(dispatcher.tick(), 0);
        assert_eq!(queue.len(), 7);

        settle().await;
        processor.release.notify_waiters();
        settle().await;

        assert_eq!(dispatcher.active_count(), 0);
        assert_eq!(processor.completed.load(Ordering::SeqCst), 5);
        assert_eq!(dispatcher.tick(), 5);
        assert!(dispatcher.peak_active() <= 5);
        assert!(processor.max_seen.load(Ordering::SeqCst) <= 5);

        settle().await;
        processor.release.notify_waiters();
        settle().await;
    }

    #[tokio::test]
    async fn test_empty_queue_releases_reservation() {
        let queue = Arc::new(IngestionQueue::new(10));
        let dispatcher = Dispatcher::new(&config(3), queue, Arc::new(GatedProcessor::new()));

        assert_eq!(dispatcher.tick(), 0);
        assert_eq!(dispatcher.active_count(), 0);
    }

    #[tokio::test]
    async fn test_panicking_task_returns_slot() {
        let queue = Arc::new(IngestionQueue::new(10));
        fill(&queue, 2);
        let dispatcher = Dispatcher::new(&config(1), queue.clone(), Arc::new(PanickingProcessor));

        assert_eq!(dispatcher.tick(), 1);
        settle().await;
        assert_eq!(dispatcher.active_count(), 0);
        assert_eq!(dispatcher.tick(), 1);
        settle().await;
        assert!(queue.is_empty());
        assert_eq!(dispatcher.dispatched_count(), 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let queue = Arc::new(IngestionQueue::new(10));
        let dispatcher = Arc::new(Dispatcher::new(
            &config(2),
            queue,
            Arc::new(GatedProcessor::new()),
        ));
        let cancel = CancellationToken::new();

        let handle = {
            let dispatcher = dispatcher.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { dispatcher.run(cancel).await })
        };

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
