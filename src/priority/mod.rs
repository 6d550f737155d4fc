//! Priority tree: declarative routing rules plus the traversal that matches
//! a task against them using a recursive-with-backtracking algorithm.

pub mod key;

use crate::condition::{evaluate, ConditionNode};
use crate::context::TaskContext;
use crate::error::ConfigError;
use crate::resolver;
use key::{PathVector, PriorityKey, SortBy, SortDirection, MAX_DEPTH};

/// One node of the priority tree. `sort_by`/`executor` are only meaningful
/// on leaves (`children.is_empty()`); non-leaves ignore them.
#[derive(Debug, Clone)]
pub struct PriorityNode {
    pub name: String,
    pub condition: ConditionNode,
    pub children: Vec<PriorityNode>,
    pub sort_by: Option<SortBy>,
    pub executor: Option<String>,
}

impl PriorityNode {
    pub fn leaf(
        name: impl Into<String>,
        condition: ConditionNode,
        sort_by: Option<SortBy>,
        executor: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            condition,
            children: Vec::new(),
            sort_by,
            executor,
        }
    }

    pub fn branch(
        name: impl Into<String>,
        condition: ConditionNode,
        children: Vec<PriorityNode>,
    ) -> Self {
        Self {
            name: name.into(),
            condition,
            children,
            sort_by: None,
            executor: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Validate depth and pre-compile every condition's regexes, recursively.
    /// Called once at pool construction.
    pub fn validate_and_compile(&self, depth: usize) -> Result<(), ConfigError> {
        if depth > MAX_DEPTH {
            return Err(ConfigError::TreeTooDeep {
                max: MAX_DEPTH,
                actual: depth,
            });
        }
        self.condition
            .precompile()
            .map_err(|e| ConfigError::InvalidRegex {
                pattern: format!("{:?}", e),
                message: e.to_string(),
            })?;
        for child in &self.children {
            child.validate_and_compile(depth + 1)?;
        }
        Ok(())
    }
}

/// A flat rule for `CONDITION_EXPR` mode: the rule list is a flat top-level
/// sequence, first true expression wins.
#[derive(Debug, Clone)]
pub struct FlatRule {
    pub name: String,
    pub condition: ConditionNode,
    pub sort_by: Option<SortBy>,
    pub executor: Option<String>,
}

/// Root-to-leaf matched path: `(node name, 1-based branch index)` pairs.
pub type MatchedPath = Vec<(String, usize)>;

/// What the dispatch façade needs after a traversal: the path (for
/// diagnostics/logging) and the leaf directives that feed the priority key
/// and routing decision.
#[derive(Debug, Clone)]
pub struct TraversalOutcome {
    pub matched_path: MatchedPath,
    pub sort_by: Option<SortBy>,
    pub executor: Option<String>,
}

/// Traverse a tree-mode rule set. Returns `None` on no match anywhere,
/// which the caller turns into `PathVector::unmatched()`.
pub fn traverse_tree(roots: &[PriorityNode], ctx: &TaskContext) -> Option<TraversalOutcome> {
    for (i, root) in roots.iter().enumerate() {
        if let Some(mut outcome) = traverse_node(root, i + 1, ctx, 0) {
            outcome.matched_path.insert(0, (root.name.clone(), i + 1));
            return Some(outcome);
        }
    }
    None
}

/// Recursive step. `branch_index` is this node's 1-based position among its
/// siblings (already evaluated true by the caller for everything except the
/// root call above — see `traverse_tree`). Returns a path *not including*
/// this node (the caller prepends it) so prepend cost is paid once per
/// level, on the way back out of a successful return.
fn traverse_node(
    node: &PriorityNode,
    _branch_index: usize,
    ctx: &TaskContext,
    depth: usize,
) -> Option<TraversalOutcome> {
    if depth > MAX_DEPTH {
        return None;
    }
    if !evaluate(&node.condition, ctx) {
        return None;
    }
    if node.is_leaf() {
        return Some(TraversalOutcome {
            matched_path: Vec::new(),
            sort_by: node.sort_by.clone(),
            executor: node.executor.clone(),
        });
    }
    // Backtracking: try each child in declared order; a child that matches
    // but whose subtree yields no leaf does not count as a match — continue
    // to the next sibling.
    for (i, child) in node.children.iter().enumerate() {
        let child_branch = i + 1;
        if !evaluate(&child.condition, ctx) {
            continue;
        }
        if child.is_leaf() {
            return Some(TraversalOutcome {
                matched_path: vec![(child.name.clone(), child_branch)],
                sort_by: child.sort_by.clone(),
                executor: child.executor.clone(),
            });
        }
        if let Some(mut outcome) = traverse_node(child, child_branch, ctx, depth + 1) {
            outcome
                .matched_path
                .insert(0, (child.name.clone(), child_branch));
            return Some(outcome);
        }
        // no descendant matched under this child — backtrack to next sibling
    }
    None
}

/// Traverse a flat `CONDITION_EXPR` rule list: first true entry wins, and
/// its path vector has exactly one entry (its 1-based index).
pub fn traverse_flat(rules: &[FlatRule], ctx: &TaskContext) -> Option<TraversalOutcome> {
    for (i, rule) in rules.iter().enumerate() {
        if evaluate(&rule.condition, ctx) {
            return Some(TraversalOutcome {
                matched_path: vec![(rule.name.clone(), i + 1)],
                sort_by: rule.sort_by.clone(),
                executor: rule.executor.clone(),
            });
        }
    }
    None
}

/// Build the [`PriorityKey`] for a traversal outcome (or its absence).
/// `submitted_at` always breaks ties; `sort_value` falls back to it when
/// `sortBy.field` doesn't resolve, and is negated for `DESC` so "smaller is
/// higher priority" holds uniformly.
pub fn compute_priority_key(
    outcome: Option<&TraversalOutcome>,
    ctx: &TaskContext,
) -> PriorityKey {
    let path = match outcome {
        Some(o) => {
            let indices: Vec<usize> = o.matched_path.iter().map(|(_, idx)| *idx).collect();
            PathVector::from_indices(&indices)
        }
        None => PathVector::unmatched(),
    };

    let sort_by = outcome.and_then(|o| o.sort_by.as_ref());
    let raw = sort_by
        .and_then(|s| resolver::resolve_as_i64(&s.field, ctx))
        .unwrap_or(ctx.submitted_at);
    let sort_value = match sort_by.map(|s| s.direction) {
        Some(SortDirection::Desc) => -raw,
        _ => raw,
    };

    PriorityKey::new(path, sort_value, ctx.submitted_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn ctx_for(region: &str, tier: &str, amount: i64, priority: i64) -> TaskContext {
        let mut req = BTreeMap::new();
        req.insert("region".to_string(), Value::String(region.to_string()));
        req.insert("customerTier".to_string(), Value::String(tier.to_string()));
        req.insert("transactionAmount".to_string(), Value::Int(amount));
        req.insert("priority".to_string(), Value::Int(priority));
        TaskContext::new(req, BTreeMap::new(), None, None)
    }

    fn eq(field: &str, value: Value) -> ConditionNode {
        ConditionNode::Equals {
            field: field.to_string(),
            value,
        }
    }

    fn sample_tree() -> Vec<PriorityNode> {
        let high_value = PriorityNode::leaf(
            "HIGH_VALUE",
            eq("$req.transactionAmount", Value::Int(500000)),
            Some(SortBy {
                field: "$req.priority".into(),
                direction: SortDirection::Desc,
            }),
            Some("vip".to_string()),
        );
        let platinum = PriorityNode::branch(
            "PLATINUM",
            eq("$req.customerTier", Value::String("PLATINUM".into())),
            vec![high_value],
        );
        let gold_leaf = PriorityNode::leaf(
            "GOLD",
            eq("$req.customerTier", Value::String("GOLD".into())),
            None,
            Some("vip".to_string()),
        );
        let gold = PriorityNode::branch(
            "GOLD",
            eq("$req.customerTier", Value::String("GOLD".into())),
            vec![gold_leaf],
        );
        let na = PriorityNode::branch(
            "NORTH_AMERICA",
            eq("$req.region", Value::String("NORTH_AMERICA".into())),
            vec![platinum, gold],
        );

        let eu_leaf = PriorityNode::leaf("EU_DEFAULT", ConditionNode::AlwaysTrue, None, Some("bulk".into()));
        let eu = PriorityNode::branch(
            "EUROPE",
            eq("$req.region", Value::String("EUROPE".into())),
            vec![eu_leaf],
        );

        let default_leaf =
            PriorityNode::leaf("DEFAULT", ConditionNode::AlwaysTrue, None, Some("bulk".to_string()));
        let default_branch = PriorityNode::branch("DEFAULT", ConditionNode::AlwaysTrue, vec![default_leaf]);

        vec![na, eu, default_branch]
    }

    #[test]
    fn scenario_1_na_platinum_high_value() {
        let tree = sample_tree();
        let ctx = ctx_for("NORTH_AMERICA", "PLATINUM", 500000, 95);
        let outcome = traverse_tree(&tree, &ctx).unwrap();
        assert_eq!(outcome.executor.as_deref(), Some("vip"));
        assert_eq!(
            outcome.matched_path,
            vec![
                ("NORTH_AMERICA".to_string(), 1),
                ("PLATINUM".to_string(), 1),
                ("HIGH_VALUE".to_string(), 1),
            ]
        );
        let key = compute_priority_key(Some(&outcome), &ctx);
        assert_eq!(key.path.slots()[0], 1);
        assert_eq!(key.path.slots()[1], 1);
        assert_eq!(key.sort_value, -95);
    }

    #[test]
    fn scenario_4_asia_pacific_falls_to_default() {
        let tree = sample_tree();
        let ctx = ctx_for("ASIA_PACIFIC", "", 0, 0);
        let outcome = traverse_tree(&tree, &ctx).unwrap();
        assert_eq!(outcome.executor.as_deref(), Some("bulk"));
        assert_eq!(outcome.matched_path[0].1, 3);
    }

    #[test]
    fn backtracks_past_matching_branch_with_no_leaf_match() {
        // A branch whose condition matches but whose only child never does
        // must not "win" — traversal backtracks to the next sibling.
        let dead_end_child = PriorityNode::leaf(
            "NEVER",
            eq("$req.region", Value::String("NOWHERE".into())),
            None,
            Some("dead".to_string()),
        );
        let dead_end_branch =
            PriorityNode::branch("MATCHES_BUT_EMPTY", ConditionNode::AlwaysTrue, vec![dead_end_child]);
        let fallback_leaf =
            PriorityNode::leaf("FALLBACK", ConditionNode::AlwaysTrue, None, Some("bulk".to_string()));

        let tree = vec![dead_end_branch, fallback_leaf];
        let ctx = TaskContext::empty();
        let outcome = traverse_tree(&tree, &ctx).unwrap();
        assert_eq!(outcome.executor.as_deref(), Some("bulk"));
    }

    #[test]
    fn no_match_yields_none() {
        let tree = vec![PriorityNode::branch(
            "ONLY",
            eq("$req.region", Value::String("NOWHERE".into())),
            vec![],
        )];
        let ctx = TaskContext::empty();
        assert!(traverse_tree(&tree, &ctx).is_none());
    }

    #[test]
    fn unmatched_priority_key_uses_sentinel_path() {
        let ctx = TaskContext::empty();
        let key = compute_priority_key(None, &ctx);
        assert!(key.path.is_unmatched());
    }
}
