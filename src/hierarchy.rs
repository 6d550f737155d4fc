//! Executor hierarchy: validates the parent/child DAG described by a set of
//! [`ExecutorSpec`]s and produces leaf-to-root chains for the TPS gate.

use crate::error::ConfigError;
use std::collections::HashMap;

/// Declared configuration for one executor.
#[derive(Debug, Clone)]
pub struct ExecutorSpec {
    pub id: String,
    pub parent: Option<String>,
    /// 0 means unbounded.
    pub tps_limit: u64,
    /// 0 means unbounded.
    pub queue_capacity: u64,
    pub identifier_field: Option<String>,
}

impl ExecutorSpec {
    pub fn root(id: impl Into<String>, tps_limit: u64, queue_capacity: u64) -> Self {
        Self {
            id: id.into(),
            parent: None,
            tps_limit,
            queue_capacity,
            identifier_field: None,
        }
    }

    pub fn child(
        id: impl Into<String>,
        parent: impl Into<String>,
        tps_limit: u64,
    ) -> Self {
        Self {
            id: id.into(),
            parent: Some(parent.into()),
            tps_limit,
            queue_capacity: 0,
            identifier_field: None,
        }
    }

    pub fn with_identifier_field(mut self, field: impl Into<String>) -> Self {
        self.identifier_field = Some(field.into());
        self
    }

    pub fn with_queue_capacity(mut self, cap: u64) -> Self {
        self.queue_capacity = cap;
        self
    }
}

/// Validated executor DAG: unique ids, exactly one root, every parent
/// exists, no cycles, and `child.tps <= parent.tps` whenever both are
/// bounded.
#[derive(Debug)]
pub struct ExecutorHierarchy {
    specs: HashMap<String, ExecutorSpec>,
    children_of: HashMap<String, Vec<String>>,
    root_id: String,
}

impl ExecutorHierarchy {
    pub fn build(specs: Vec<ExecutorSpec>) -> Result<Self, ConfigError> {
        let mut by_id = HashMap::new();
        for spec in specs {
            if by_id.contains_key(&spec.id) {
                return Err(ConfigError::InvalidHierarchy(format!(
                    "duplicate executor id {}",
                    spec.id
                )));
            }
            by_id.insert(spec.id.clone(), spec);
        }

        let roots: Vec<&String> = by_id
            .values()
            .filter(|s| s.parent.is_none())
            .map(|s| &s.id)
            .collect();
        if roots.len() != 1 {
            return Err(ConfigError::InvalidHierarchy(format!(
                "expected exactly one root executor, found {}",
                roots.len()
            )));
        }
        let root_id = roots[0].clone();

        let mut children_of: HashMap<String, Vec<String>> = HashMap::new();
        for spec in by_id.values() {
            if let Some(parent) = &spec.parent {
                if !by_id.contains_key(parent) {
                    return Err(ConfigError::InvalidHierarchy(format!(
                        "executor {} references unknown parent {}",
                        spec.id, parent
                    )));
                }
                children_of
                    .entry(parent.clone())
                    .or_default()
                    .push(spec.id.clone());
            }
        }

        detect_cycle(&by_id)?;

        for spec in by_id.values() {
            if let Some(parent_id) = &spec.parent {
                let parent = &by_id[parent_id];
                if spec.tps_limit > 0 && parent.tps_limit > 0 && spec.tps_limit > parent.tps_limit
                {
                    return Err(ConfigError::ChildTpsExceedsParent {
                        child: spec.id.clone(),
                        child_tps: spec.tps_limit,
                        parent: parent.id.clone(),
                        parent_tps: parent.tps_limit,
                    });
                }
            }
        }

        Ok(Self {
            specs: by_id,
            children_of,
            root_id,
        })
    }

    /// Leaf-to-root chain inclusive of `exec_id` itself.
    pub fn chain(&self, exec_id: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = Some(exec_id.to_string());
        while let Some(id) = current {
            let Some(spec) = self.specs.get(&id) else {
                break;
            };
            chain.push(id.clone());
            current = spec.parent.clone();
        }
        chain
    }

    pub fn children(&self, exec_id: &str) -> &[String] {
        self.children_of
            .get(exec_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn tps(&self, exec_id: &str) -> Option<u64> {
        self.specs.get(exec_id).map(|s| s.tps_limit)
    }

    pub fn queue_capacity(&self, exec_id: &str) -> Option<u64> {
        self.specs.get(exec_id).map(|s| s.queue_capacity)
    }

    pub fn identifier_field(&self, exec_id: &str) -> Option<&str> {
        self.specs
            .get(exec_id)
            .and_then(|s| s.identifier_field.as_deref())
    }

    pub fn leaf_ids(&self) -> Vec<String> {
        self.specs
            .keys()
            .filter(|id| !self.children_of.contains_key(id.as_str()))
            .cloned()
            .collect()
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn contains(&self, exec_id: &str) -> bool {
        self.specs.contains_key(exec_id)
    }

    pub fn all_ids(&self) -> impl Iterator<Item = &String> {
        self.specs.keys()
    }
}

#[derive(PartialEq, Eq, Clone, Copy)]
enum Color {
    White,
    Gray,
    Black,
}

fn detect_cycle(by_id: &HashMap<String, ExecutorSpec>) -> Result<(), ConfigError> {
    let mut colors: HashMap<&str, Color> = by_id.keys().map(|k| (k.as_str(), Color::White)).collect();
    let mut stack_trace = Vec::new();

    for id in by_id.keys() {
        if colors[id.as_str()] == Color::White {
            visit(id, by_id, &mut colors, &mut stack_trace)?;
        }
    }
    Ok(())
}

fn visit<'a>(
    id: &'a str,
    by_id: &'a HashMap<String, ExecutorSpec>,
    colors: &mut HashMap<&'a str, Color>,
    stack_trace: &mut Vec<&'a str>,
) -> Result<(), ConfigError> {
    colors.insert(id, Color::Gray);
    stack_trace.push(id);

    // Parent edges form the DAG we validate (child -> parent); walking
    // "upward" and checking for a gray ancestor catches any cycle.
    if let Some(parent) = by_id[id].parent.as_deref() {
        match colors.get(parent).copied().unwrap_or(Color::White) {
            Color::Gray => {
                return Err(ConfigError::CycleDetected(format!(
                    "{} -> {}",
                    stack_trace.join(" -> "),
                    parent
                )))
            }
            Color::White => visit(parent, by_id, colors, stack_trace)?,
            Color::Black => {}
        }
    }

    stack_trace.pop();
    colors.insert(id, Color::Black);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_valid_three_level_hierarchy() {
        let hierarchy = ExecutorHierarchy::build(vec![
            ExecutorSpec::root("main", 1000, 5000),
            ExecutorSpec::child("vip", "main", 400).with_identifier_field("$req.requestId"),
            ExecutorSpec::child("bulk", "main", 200).with_identifier_field("$req.requestId"),
        ])
        .unwrap();

        assert_eq!(hierarchy.chain("vip"), vec!["vip".to_string(), "main".to_string()]);
        assert_eq!(hierarchy.root_id(), "main");
        assert_eq!(hierarchy.tps("bulk"), Some(200));
    }

    #[test]
    fn rejects_two_roots() {
        let err = ExecutorHierarchy::build(vec![
            ExecutorSpec::root("main", 1000, 5000),
            ExecutorSpec::root("other", 1000, 5000),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHierarchy(_)));
    }

    #[test]
    fn rejects_unknown_parent() {
        let err =
            ExecutorHierarchy::build(vec![ExecutorSpec::child("orphan", "ghost", 10)]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHierarchy(_)));
    }

    #[test]
    fn rejects_cycle() {
        // `main` is the sole root so the count check passes; `a`/`b` form a
        // disconnected two-node cycle that only the DFS below catches.
        let main = ExecutorSpec::root("main", 1000, 0);
        let a = ExecutorSpec::child("a", "b", 10);
        let b = ExecutorSpec::child("b", "a", 10);
        let err = ExecutorHierarchy::build(vec![main, a, b]).unwrap_err();
        assert!(matches!(err, ConfigError::CycleDetected(_)));
    }

    #[test]
    fn rejects_child_tps_exceeding_parent() {
        let err = ExecutorHierarchy::build(vec![
            ExecutorSpec::root("main", 100, 0),
            ExecutorSpec::child("vip", "main", 500),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::ChildTpsExceedsParent { .. }));
    }

    #[test]
    fn unbounded_child_under_bounded_parent_is_allowed() {
        ExecutorHierarchy::build(vec![
            ExecutorSpec::root("main", 100, 0),
            ExecutorSpec::child("vip", "main", 0),
        ])
        .unwrap();
    }
}
