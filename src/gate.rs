//! Hierarchical TPS admission gate: one sliding-window counter per
//! executor, admission enforced along the entire leaf-to-root chain with
//! the two-phase resolve-then-commit protocol.

use crate::context::TaskContext;
use crate::hierarchy::ExecutorHierarchy;
use crate::resolver;
use crate::window::SlidingWindowCounter;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Default sliding window duration used when a pool doesn't override it.
pub const DEFAULT_WINDOW_MS: i64 = 1000;

pub struct TpsGate {
    counters: HashMap<String, SlidingWindowCounter>,
    window_ms: i64,
}

impl TpsGate {
    pub fn new(hierarchy: &ExecutorHierarchy, window_ms: i64) -> Self {
        let counters = hierarchy
            .all_ids()
            .map(|id| (id.clone(), SlidingWindowCounter::new(window_ms)))
            .collect();
        Self { counters, window_ms }
    }

    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    /// Resolve the identifier an executor counts by: its configured
    /// `identifierField`, falling back to `ctx.taskId` when unconfigured or
    /// unresolvable.
    fn resolve_identifier(
        &self,
        hierarchy: &ExecutorHierarchy,
        exec_id: &str,
        ctx: &TaskContext,
    ) -> String {
        hierarchy
            .identifier_field(exec_id)
            .and_then(|field| resolver::resolve_as_string(field, ctx))
            .unwrap_or_else(|| ctx.task_id.clone())
    }

    /// Two-phase admission across the whole leaf-to-root chain: resolve and
    /// check capacity everywhere first (a level whose identifier is already
    /// live there is "already paid for" and skipped), then commit by
    /// inserting into every level. Unbounded executors (`tps == 0`) always
    /// pass the check but still record the identifier so descendants stay
    /// consistent.
    #[tracing::instrument(level = "debug", skip(self, hierarchy, ctx))]
    pub fn try_acquire(&self, hierarchy: &ExecutorHierarchy, ctx: &TaskContext, exec_id: &str) -> bool {
        let chain = hierarchy.chain(exec_id);
        if chain.is_empty() {
            return false;
        }

        let mut resolved = Vec::with_capacity(chain.len());
        for level in &chain {
            let identifier = self.resolve_identifier(hierarchy, level, ctx);
            let counter = match self.counters.get(level) {
                Some(c) => c,
                None => return false,
            };

            if counter.contains(&identifier) {
                trace!(level, %identifier, "already live, skipping capacity check");
                resolved.push((level.clone(), identifier));
                continue;
            }

            let limit = hierarchy.tps(level).unwrap_or(0);
            if limit > 0 && counter.count() as u64 >= limit {
                debug!(level, limit, "tps capacity exhausted, rejecting acquire");
                return false;
            }
            resolved.push((level.clone(), identifier));
        }

        for (level, identifier) in resolved {
            if let Some(counter) = self.counters.get(&level) {
                counter.try_add(&identifier);
            }
        }
        true
    }

    pub fn has_capacity(&self, hierarchy: &ExecutorHierarchy, exec_id: &str) -> bool {
        let Some(counter) = self.counters.get(exec_id) else {
            return false;
        };
        match hierarchy.tps(exec_id) {
            Some(0) | None => true,
            Some(limit) => (counter.count() as u64) < limit,
        }
    }

    /// `None` means unbounded.
    pub fn available_capacity(&self, hierarchy: &ExecutorHierarchy, exec_id: &str) -> Option<u64> {
        let counter = self.counters.get(exec_id)?;
        match hierarchy.tps(exec_id)? {
            0 => None,
            limit => Some(limit.saturating_sub(counter.count() as u64)),
        }
    }

    pub fn current_tps(&self, exec_id: &str) -> u64 {
        self.counters
            .get(exec_id)
            .map(|c| c.count() as u64)
            .unwrap_or(0)
    }

    /// Explicitly frees `identifier` from one executor's window. Rarely
    /// needed in practice: the window expires autonomously, so this exists
    /// mainly for tests and manual operator intervention.
    pub fn release(&self, exec_id: &str, identifier: &str) {
        if let Some(counter) = self.counters.get(exec_id) {
            counter.remove(identifier);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::{ExecutorHierarchy, ExecutorSpec};
    use crate::value::Value;
    use std::collections::BTreeMap;

    fn ctx_with_request_id(id: &str) -> TaskContext {
        let mut req = BTreeMap::new();
        req.insert("requestId".to_string(), Value::String(id.to_string()));
        TaskContext::new(req, BTreeMap::new(), None, None)
    }

    fn sample_hierarchy() -> ExecutorHierarchy {
        ExecutorHierarchy::build(vec![
            ExecutorSpec::root("main", 1000, 5000).with_identifier_field("$req.requestId"),
            ExecutorSpec::child("vip", "main", 400).with_identifier_field("$req.requestId"),
            ExecutorSpec::child("bulk", "main", 200).with_identifier_field("$req.requestId"),
        ])
        .unwrap()
    }

    #[test]
    fn same_identifier_retries_keep_succeeding_without_consuming_extra_slots() {
        let hierarchy = sample_hierarchy();
        let gate = TpsGate::new(&hierarchy, 1000);

        for _ in 0..5 {
            assert!(gate.try_acquire(&hierarchy, &ctx_with_request_id("X"), "vip"));
        }
        assert_eq!(gate.current_tps("vip"), 1);
    }

    #[test]
    fn distinct_identifiers_are_rejected_past_the_tps_cap() {
        let hierarchy = sample_hierarchy();
        let gate = TpsGate::new(&hierarchy, 1000);

        let mut accepted = 0;
        for i in 0..401 {
            let ctx = ctx_with_request_id(&format!("req-{i}"));
            if gate.try_acquire(&hierarchy, &ctx, "vip") {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 400);

        // same-identifier retries of an already-admitted id keep succeeding
        assert!(gate.try_acquire(&hierarchy, &ctx_with_request_id("req-0"), "vip"));
    }

    #[test]
    fn successful_acquire_records_identifier_at_every_ancestor() {
        let hierarchy = sample_hierarchy();
        let gate = TpsGate::new(&hierarchy, 1000);
        assert!(gate.try_acquire(&hierarchy, &ctx_with_request_id("R"), "vip"));
        assert_eq!(gate.current_tps("main"), 1);
        assert_eq!(gate.current_tps("vip"), 1);
    }

    #[test]
    fn unbounded_executor_always_admits() {
        let hierarchy = ExecutorHierarchy::build(vec![ExecutorSpec::root("main", 0, 0)]).unwrap();
        let gate = TpsGate::new(&hierarchy, 1000);
        for i in 0..10_000 {
            assert!(gate.try_acquire(&hierarchy, &ctx_with_request_id(&i.to_string()), "main"));
        }
    }
}
