//! Bounded ingestion queue with drop-oldest backpressure
//!
//! Pool discovery arrives in bursts. The queue keeps the newest `capacity`
//! candidates and evicts from the front when full, so a burst can never grow
//! memory or push stale pools ahead of fresh ones.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// Bounded FIFO that evicts its oldest entry on overflow
///
/// `enqueue` never blocks on I/O; the lock is held only for the push/pop.
pub struct IngestionQueue<T> {
    capacity: usize,
    buffer: Mutex<VecDeque<T>>,
    dropped_count: AtomicU64,
    enqueued_count: AtomicU64,
}

impl<T> IngestionQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            buffer: Mutex::new(VecDeque::with_capacity(capacity)),
            dropped_count: AtomicU64::new(0),
            enqueued_count: AtomicU64::new(0),
        }
    }

    /// Append an item, returning the evicted oldest item if the queue was full
    pub fn enqueue(&self, item: T) -> Option<T> {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());

        let evicted = if buffer.len() >= self.capacity {
            self.dropped_count.fetch_add(1, Ordering::Relaxed);
            debug!("Ingestion queue full, dropping oldest candidate");
            buffer.pop_front()
        } else {
            None
        };

        buffer.push_back(item);
        self.enqueued_count.fetch_add(1, Ordering::Relaxed);
        evicted
    }

    /// Remove up to `max` items from the front, in insertion order
    pub fn drain(&self, max: usize) -> Vec<T> {
        if max == 0 {
            return Vec::new();
        }
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        let take = max.min(buffer.len());
        buffer.drain(..take).collect()
    }

    /// Pop a single item
    pub fn try_pop(&self) -> Option<T> {
        self.buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    /// Get current queue length
    pub fn len(&self) -> usize {
        self.buffer.lock().map(|b| b.len()).unwrap_or(0)
    }

    /// Check if queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of items evicted by overflow since creation
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    /// Number of items ever enqueued
    pub fn enqueued_count(&self) -> u64 {
        self.enqueued_count.load(Ordering::Relaxed)
    }

    /// Get utilization percentage
    pub fn utilization(&self) -> f64 {
        (self.len() as f64 / self.capacity as f64) * 100.0
    }
}
