//! Dispatch façade: the single entry point a caller submits tasks through.
//!
//! Wires together priority routing, the hierarchical TPS gate, and the
//! per-executor backlog, in the same "one coordinating struct owns the
//! worker lifecycle" shape `ob-workflow::task_queue` uses for its queue
//! manager.

use crate::backlog::{Backlog, BacklogEntry, DrainerStats};
use crate::context::TaskContext;
use crate::error::{AdmissionError, RejectReason, RejectedSubmission};
use crate::gate::TpsGate;
use crate::hierarchy::ExecutorHierarchy;
use crate::priority::key::PriorityKey;
use crate::priority::{compute_priority_key, traverse_flat, traverse_tree, FlatRule, PriorityNode};
use crate::substrate::{track_active, BoxedRunnable, ExecutionSubstrate};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// The two mutually exclusive routing-rule shapes a pool can be configured
/// with; mixing them within one pool is rejected at construction.
pub enum RoutingRules {
    Tree(Vec<PriorityNode>),
    Flat(Vec<FlatRule>),
}

impl RoutingRules {
    fn traverse(&self, ctx: &TaskContext) -> Option<crate::priority::TraversalOutcome> {
        match self {
            RoutingRules::Tree(roots) => traverse_tree(roots, ctx),
            RoutingRules::Flat(rules) => traverse_flat(rules, ctx),
        }
    }
}

#[derive(Default)]
struct ExecutorCounters {
    submitted: AtomicU64,
    executed: AtomicU64,
    rejected: AtomicU64,
    active: Arc<AtomicU64>,
}

/// Point-in-time counters for one executor, as surfaced by [`DispatchFacade::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorStats {
    pub submitted: u64,
    pub executed: u64,
    pub rejected: u64,
    pub queue_size: u64,
    pub active: u64,
    pub max_tps: u64,
    pub current_tps: u64,
}

/// A handle to the eventual result of a callable submission.
pub struct FutureHandle<T> {
    rx: tokio::sync::oneshot::Receiver<std::thread::Result<T>>,
}

impl<T> FutureHandle<T> {
    /// Waits for the callable to finish. Returns `Err` if the callable
    /// panicked or the pool shut down before it ran.
    pub async fn await_result(self) -> Result<T, AdmissionError> {
        match self.rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_panic)) => Err(AdmissionError::Rejected(RejectedSubmission::new(
                RejectReason::Shutdown,
            ))),
            Err(_recv_error) => Err(AdmissionError::Rejected(RejectedSubmission::new(
                RejectReason::Shutdown,
            ))),
        }
    }
}

/// The configured, running admission pool. Owns the hierarchy, the gate,
/// one backlog plus drainer per executor, and the execution substrate.
pub struct DispatchFacade {
    name: String,
    hierarchy: Arc<ExecutorHierarchy>,
    gate: Arc<TpsGate>,
    rules: RoutingRules,
    backlogs: HashMap<String, Arc<Backlog>>,
    drainer_stats: HashMap<String, Arc<DrainerStats>>,
    drainer_handles: Vec<tokio::task::JoinHandle<()>>,
    counters: HashMap<String, ExecutorCounters>,
    substrate: Arc<dyn ExecutionSubstrate>,
    shutdown: Arc<AtomicBool>,
    accepting: AtomicBool,
}

impl std::fmt::Debug for DispatchFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchFacade")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl DispatchFacade {
    pub fn new(
        name: impl Into<String>,
        hierarchy: ExecutorHierarchy,
        rules: RoutingRules,
        window_ms: i64,
        substrate: Arc<dyn ExecutionSubstrate>,
    ) -> Self {
        let hierarchy = Arc::new(hierarchy);
        let gate = Arc::new(TpsGate::new(&hierarchy, window_ms));
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut backlogs = HashMap::new();
        let mut drainer_stats = HashMap::new();
        let mut counters = HashMap::new();
        let mut drainer_handles = Vec::new();

        for id in hierarchy.all_ids() {
            let capacity = hierarchy.queue_capacity(id).unwrap_or(0);
            let backlog = Arc::new(Backlog::new(id.clone(), capacity));
            let stats = Arc::new(DrainerStats::default());
            let active = Arc::new(AtomicU64::new(0));

            drainer_handles.push(crate::backlog::spawn_drainer(
                backlog.clone(),
                hierarchy.clone(),
                gate.clone(),
                substrate.clone(),
                stats.clone(),
                active.clone(),
                shutdown.clone(),
            ));

            backlogs.insert(id.clone(), backlog);
            drainer_stats.insert(id.clone(), stats);
            counters.insert(
                id.clone(),
                ExecutorCounters {
                    active,
                    ..Default::default()
                },
            );
        }

        Self {
            name: name.into(),
            hierarchy,
            gate,
            rules,
            backlogs,
            drainer_stats,
            drainer_handles,
            counters,
            substrate,
            shutdown,
            accepting: AtomicBool::new(true),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn route(&self, ctx: &TaskContext) -> (String, PriorityKey) {
        let outcome = self.rules.traverse(ctx);
        let key = compute_priority_key(outcome.as_ref(), ctx);
        let executor = outcome
            .and_then(|o| o.executor)
            .unwrap_or_else(|| self.hierarchy.root_id().to_string());
        (executor, key)
    }

    fn record_submitted(&self, executor: &str) {
        if let Some(c) = self.counters.get(executor) {
            c.submitted.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_rejected(&self, executor: &str) {
        if let Some(c) = self.counters.get(executor) {
            c.rejected.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_executed(&self, executor: &str) {
        if let Some(c) = self.counters.get(executor) {
            c.executed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Fire-and-forget submission: run `runnable` once admitted, dropped
    /// silently on completion. Returns immediately after routing.
    #[instrument(level = "debug", skip(self, ctx, runnable), fields(pool = %self.name))]
    pub async fn submit(
        &self,
        ctx: TaskContext,
        runnable: BoxedRunnable,
    ) -> Result<(), RejectedSubmission> {
        if self.shutdown.load(Ordering::Acquire) || !self.accepting.load(Ordering::Acquire) {
            return Err(RejectedSubmission::new(RejectReason::Shutdown));
        }

        let (executor, priority_key) = self.route(&ctx);
        if !self.hierarchy.contains(&executor) {
            return Err(RejectedSubmission::new(RejectReason::UnknownExecutor));
        }
        self.record_submitted(&executor);

        if self.gate.try_acquire(&self.hierarchy, &ctx, &executor) {
            self.record_executed(&executor);
            let active = self
                .counters
                .get(&executor)
                .map(|c| c.active.clone())
                .unwrap_or_default();
            self.substrate.dispatch(track_active(active, runnable)).await;
            return Ok(());
        }

        let backlog = self.backlogs.get(&executor).ok_or_else(|| {
            RejectedSubmission::new(RejectReason::UnknownExecutor)
        })?;
        let entry = BacklogEntry {
            task_id: ctx.task_id.clone(),
            executor_id: executor.clone(),
            priority_key,
            captured_context: ctx,
            runnable,
        };
        match backlog.enqueue(entry) {
            Ok(()) => {
                info!(executor = %executor, "task queued past immediate tps capacity");
                Ok(())
            }
            Err(rejection) => {
                self.record_rejected(&executor);
                warn!(executor = %executor, "backlog full, rejecting submission");
                Err(rejection)
            }
        }
    }

    /// Submit a value-returning callable. The returned handle resolves once
    /// the callable has actually run (immediately or after queuing).
    pub async fn submit_callable<F, T>(
        &self,
        ctx: TaskContext,
        callable: F,
    ) -> Result<FutureHandle<T>, RejectedSubmission>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let runnable: BoxedRunnable = Box::new(move || {
            let result = std::panic::catch_unwind(AssertUnwindSafe(callable));
            let _ = tx.send(result);
        });
        self.submit(ctx, runnable).await?;
        Ok(FutureHandle { rx })
    }

    /// Stop accepting new submissions; queued and in-flight work still
    /// drains normally.
    pub fn shutdown(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    /// Stop accepting new submissions and discard everything still queued.
    pub fn shutdown_now(&self) -> usize {
        self.accepting.store(false, Ordering::Release);
        self.shutdown.store(true, Ordering::Release);
        self.backlogs.values().map(|b| b.clear()).sum()
    }

    pub fn is_shutdown(&self) -> bool {
        !self.accepting.load(Ordering::Acquire)
    }

    pub fn is_terminated(&self) -> bool {
        self.is_shutdown() && self.backlogs.values().all(|b| b.is_empty())
    }

    /// Blocks (async) until every backlog drains or `deadline` elapses.
    /// Returns `true` if termination was observed within the deadline.
    pub async fn await_termination(&self, deadline: Duration) -> bool {
        let start = tokio::time::Instant::now();
        loop {
            if self.is_terminated() {
                return true;
            }
            if start.elapsed() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    pub fn stats(&self, executor_id: &str) -> Option<ExecutorStats> {
        let counters = self.counters.get(executor_id)?;
        let backlog = self.backlogs.get(executor_id)?;
        Some(ExecutorStats {
            submitted: counters.submitted.load(Ordering::Relaxed),
            executed: counters.executed.load(Ordering::Relaxed)
                + self
                    .drainer_stats
                    .get(executor_id)
                    .map(|s| s.executed.load(Ordering::Relaxed))
                    .unwrap_or(0),
            rejected: counters.rejected.load(Ordering::Relaxed),
            queue_size: backlog.len() as u64,
            active: counters.active.load(Ordering::Relaxed),
            max_tps: self.hierarchy.tps(executor_id).unwrap_or(0),
            current_tps: self.gate.current_tps(executor_id),
        })
    }

    /// In-flight runnable count for one executor: admitted but not yet
    /// finished (or still unwinding from a panic).
    pub fn active_count(&self, executor_id: &str) -> Option<u64> {
        self.counters
            .get(executor_id)
            .map(|c| c.active.load(Ordering::Relaxed))
    }

    /// In-flight runnable count across every executor.
    pub fn aggregate_active_count(&self) -> u64 {
        self.counters
            .values()
            .map(|c| c.active.load(Ordering::Relaxed))
            .sum()
    }

    pub fn aggregate_stats(&self) -> ExecutorStats {
        let mut total = ExecutorStats {
            submitted: 0,
            executed: 0,
            rejected: 0,
            queue_size: 0,
            active: 0,
            max_tps: 0,
            current_tps: 0,
        };
        for id in self.hierarchy.all_ids() {
            if let Some(s) = self.stats(id) {
                total.submitted += s.submitted;
                total.executed += s.executed;
                total.rejected += s.rejected;
                total.queue_size += s.queue_size;
                total.active += s.active;
                total.current_tps += s.current_tps;
            }
        }
        total
    }
}

impl Drop for DispatchFacade {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        for handle in &self.drainer_handles {
            handle.abort();
        }
    }
}
