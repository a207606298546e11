use std::cmp::Ordering;
use std::collections::BinaryHeap;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::models::QueueItem;
use crate::{AdmissionError, AdmissionResult};

/// Priority admission queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum depth before arrivals are shed
    pub hard_limit: usize,
    /// Fraction of `hard_limit` enforced while emergency mode is active
    pub emergency_fraction: f64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            hard_limit: 10_000,
            emergency_fraction: 0.8,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> AdmissionResult<()> {
        if self.hard_limit == 0 {
            return Err(AdmissionError::config_error("queue.hard_limit must be > 0"));
        }
        if !(self.emergency_fraction > 0.0 && self.emergency_fraction <= 1.0) {
            return Err(AdmissionError::config_error(
                "queue.emergency_fraction must be in (0, 1]",
            ));
        }
        Ok(())
    }
}

/// Depth limit in effect for the given mode.
pub fn effective_limit(hard_limit: usize, emergency_mode: bool, emergency_fraction: f64) -> usize {
    if emergency_mode {
        (hard_limit as f64 * emergency_fraction.clamp(0.0, 1.0)).floor() as usize
    } else {
        hard_limit
    }
}

/// Decide whether an arrival is rejected.
///
/// `depth` is the depth the queue would reach if the arrival were accepted.
pub fn should_shed(
    depth: usize,
    hard_limit: usize,
    emergency_mode: bool,
    emergency_fraction: f64,
) -> bool {
    depth > effective_limit(hard_limit, emergency_mode, emergency_fraction)
}

/// Result of an atomic shed-check-and-insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted { depth: usize },
    Shed { depth: usize, limit: usize },
}

/// Heap entry. Ordering: higher priority first, then smaller id, then earlier insertion.
#[derive(Debug)]
struct QueuedEntry {
    item: QueueItem,
    seq: u64,
}

impl Ord for QueuedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.item
            .priority
            .cmp(&other.item.priority)
            .then_with(|| other.item.id.cmp(&self.item.id))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedEntry {}

#[derive(Debug, Default)]
struct QueueInner {
    heap: BinaryHeap<QueuedEntry>,
    next_seq: u64,
    emergency_mode: bool,
}

impl QueueInner {
    fn push(&mut self, item: QueueItem) -> usize {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(QueuedEntry { item, seq });
        self.heap.len()
    }
}

/// Priority admission queue - ordered holding area with load shedding
///
/// Every operation runs under a single lock, so sizes and snapshots are
/// always consistent with the contents.
#[derive(Debug)]
pub struct PriorityAdmissionQueue {
    config: QueueConfig,
    inner: Mutex<QueueInner>,
}

impl Default for PriorityAdmissionQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl PriorityAdmissionQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(QueueInner::default()),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Insert without shedding, returns the new depth
    pub async fn enqueue(&self, item: QueueItem) -> usize {
        self.inner.lock().await.push(item)
    }

    /// Shed check and insert under one lock acquisition
    pub async fn try_enqueue(&self, item: QueueItem) -> EnqueueOutcome {
        let mut inner = self.inner.lock().await;
        let depth = inner.heap.len() + 1;
        let limit = effective_limit(
            self.config.hard_limit,
            inner.emergency_mode,
            self.config.emergency_fraction,
        );
        if should_shed(
            depth,
            self.config.hard_limit,
            inner.emergency_mode,
            self.config.emergency_fraction,
        ) {
            warn!(
                "Shedding item {} (priority {}): depth {} exceeds limit {}",
                item.id, item.priority, depth, limit
            );
            counter!("queue_shed_total").increment(1);
            return EnqueueOutcome::Shed { depth, limit };
        }
        let depth = inner.push(item);
        EnqueueOutcome::Accepted { depth }
    }

    pub async fn dequeue(&self) -> Option<QueueItem> {
        self.inner.lock().await.heap.pop().map(|entry| entry.item)
    }

    pub async fn peek(&self) -> Option<QueueItem> {
        self.inner
            .lock()
            .await
            .heap
            .peek()
            .map(|entry| entry.item.clone())
    }

    /// Remove up to `n` items in priority order
    pub async fn drain(&self, n: usize) -> Vec<QueueItem> {
        let mut inner = self.inner.lock().await;
        let count = n.min(inner.heap.len());
        let mut drained = Vec::with_capacity(count);
        for _ in 0..count {
            if let Some(entry) = inner.heap.pop() {
                drained.push(entry.item);
            }
        }
        debug!("Drained {} items from admission queue", drained.len());
        drained
    }

    pub async fn size(&self) -> usize {
        self.inner.lock().await.heap.len()
    }

    pub async fn set_emergency_mode(&self, enabled: bool) {
        let mut inner = self.inner.lock().await;
        if inner.emergency_mode != enabled {
            warn!("Admission queue emergency mode set to {}", enabled);
        }
        inner.emergency_mode = enabled;
    }

    pub async fn emergency_mode(&self) -> bool {
        self.inner.lock().await.emergency_mode
    }

    /// Fraction of the active limit currently in use
    pub async fn saturation(&self) -> f64 {
        let inner = self.inner.lock().await;
        let limit = effective_limit(
            self.config.hard_limit,
            inner.emergency_mode,
            self.config.emergency_fraction,
        );
        if limit == 0 {
            1.0
        } else {
            inner.heap.len() as f64 / limit as f64
        }
    }
}
