//! Per-executor priority backlog and its drainer loop.
//!
//! A deferred task sits in a min-heap ordered by [`PriorityKey`] until the
//! gate admits it; the drainer is a long-running cooperative worker, in the
//! same async-service-seam style as `ob-workflow`'s `async-trait` tasks,
//! that keeps re-trying the heap head whenever capacity might have freed.

use crate::context::TaskContext;
use crate::error::{RejectReason, RejectedSubmission};
use crate::gate::TpsGate;
use crate::hierarchy::ExecutorHierarchy;
use crate::priority::key::PriorityKey;
use crate::substrate::{track_active, BoxedRunnable, ExecutionSubstrate};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Drainer poll timeout — short enough to stay responsive to shutdown.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);
/// Back-off after a failed re-acquire attempt, to avoid spinning.
const RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// One deferred task. The captured context is retained so the drainer can
/// re-run admission using the executor's `identifierField`.
pub struct BacklogEntry {
    pub task_id: String,
    pub executor_id: String,
    pub priority_key: PriorityKey,
    pub captured_context: TaskContext,
    pub runnable: BoxedRunnable,
}

struct HeapEntry(BacklogEntry);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.priority_key == other.0.priority_key
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.priority_key.cmp(&other.0.priority_key)
    }
}

/// Per-executor min-heap of deferred tasks, bounded by `queueCapacity`
/// (`0` means unbounded).
pub struct Backlog {
    executor_id: String,
    capacity: u64,
    heap: Mutex<BinaryHeap<Reverse<HeapEntry>>>,
}

impl Backlog {
    pub fn new(executor_id: impl Into<String>, capacity: u64) -> Self {
        Self {
            executor_id: executor_id.into(),
            capacity,
            heap: Mutex::new(BinaryHeap::new()),
        }
    }

    pub fn enqueue(&self, entry: BacklogEntry) -> Result<(), RejectedSubmission> {
        let mut heap = self.heap.lock();
        if self.capacity > 0 && heap.len() as u64 >= self.capacity {
            return Err(RejectedSubmission::new(RejectReason::BacklogFull));
        }
        heap.push(Reverse(HeapEntry(entry)));
        Ok(())
    }

    /// Pop the current highest-priority entry (lowest `PriorityKey`).
    fn pop(&self) -> Option<BacklogEntry> {
        self.heap.lock().pop().map(|Reverse(HeapEntry(e))| e)
    }

    fn push_back(&self, entry: BacklogEntry) {
        self.heap.lock().push(Reverse(HeapEntry(entry)));
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn executor_id(&self) -> &str {
        &self.executor_id
    }

    /// Drop every entry, used by `shutdown_now`.
    pub fn clear(&self) -> usize {
        let mut heap = self.heap.lock();
        let dropped = heap.len();
        heap.clear();
        dropped
    }
}

/// Counters a drainer reports back to the dispatch façade's stats.
#[derive(Default)]
pub struct DrainerStats {
    pub executed: AtomicU64,
    pub requeued: AtomicU64,
}

/// Spawns the long-running drainer loop for one executor. Returns a
/// `JoinHandle` plus the shutdown flag the façade flips at `shutdown`/
/// `shutdown_now`.
pub fn spawn_drainer(
    backlog: Arc<Backlog>,
    hierarchy: Arc<ExecutorHierarchy>,
    gate: Arc<TpsGate>,
    substrate: Arc<dyn ExecutionSubstrate>,
    stats: Arc<DrainerStats>,
    active: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(executor = backlog.executor_id(), "drainer started");
        loop {
            if shutdown.load(Ordering::Acquire) && backlog.is_empty() {
                break;
            }

            let Some(entry) = backlog.pop() else {
                tokio::time::sleep(POLL_TIMEOUT).await;
                continue;
            };

            if gate.try_acquire(&hierarchy, &entry.captured_context, &entry.executor_id) {
                debug!(task_id = %entry.task_id, executor = %entry.executor_id, "drained task admitted");
                stats.executed.fetch_add(1, Ordering::Relaxed);
                let runnable = track_active(active.clone(), entry.runnable);
                substrate.dispatch(runnable).await;
            } else {
                stats.requeued.fetch_add(1, Ordering::Relaxed);
                backlog.push_back(entry);
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
        }
        warn!(executor = backlog.executor_id(), "drainer stopped");
    })
}
