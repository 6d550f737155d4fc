//! Configuration document loading: deserializes the pool document and
//! builds a running [`DispatchFacade`] from it, in the same
//! "deserialize, then validate-and-wire" two-step `ConfigLoader::from_env`
//! uses.

use crate::condition::{CompiledPattern, ConditionNode};
use crate::dispatch::{DispatchFacade, RoutingRules};
use crate::error::ConfigError;
use crate::expr::parse_expr;
use crate::gate::DEFAULT_WINDOW_MS;
use crate::hierarchy::{ExecutorHierarchy, ExecutorSpec};
use crate::priority::key::{SortBy, SortDirection};
use crate::priority::{FlatRule, PriorityNode};
use crate::substrate::{ExecutionSubstrate, TokioExecutionSubstrate};
use crate::value::Value;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyntaxUsed {
    ConditionTree,
    ConditionExpr,
}

impl Default for SyntaxUsed {
    fn default() -> Self {
        SyntaxUsed::ConditionTree
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum SortDirectionDoc {
    Asc,
    Desc,
}

impl From<SortDirectionDoc> for SortDirection {
    fn from(d: SortDirectionDoc) -> Self {
        match d {
            SortDirectionDoc::Asc => SortDirection::Asc,
            SortDirectionDoc::Desc => SortDirection::Desc,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SortByDoc {
    field: String,
    direction: SortDirectionDoc,
}

/// Structured-map condition shape for `CONDITION_TREE` mode. A tree node's
/// `condition` field may be this, or (per the config doc, §6) a bare
/// string, which is parsed with the same infix grammar as expression mode.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
enum ConditionDoc {
    AlwaysTrue,
    Equals { field: String, value: Value },
    NotEquals { field: String, value: Value },
    Gt { field: String, value: Value },
    Gte { field: String, value: Value },
    Lt { field: String, value: Value },
    Lte { field: String, value: Value },
    Between { field: String, lo: Value, hi: Value },
    In { field: String, values: Vec<Value> },
    NotIn { field: String, values: Vec<Value> },
    Contains { field: String, value: Value },
    Regex { field: String, pattern: String },
    StartsWith { field: String, prefix: String },
    EndsWith { field: String, suffix: String },
    Exists { field: String },
    IsNull { field: String },
    And { children: Vec<ConditionDoc> },
    Or { children: Vec<ConditionDoc> },
    Not { child: Box<ConditionDoc> },
}

impl ConditionDoc {
    fn into_node(self) -> ConditionNode {
        match self {
            ConditionDoc::AlwaysTrue => ConditionNode::AlwaysTrue,
            ConditionDoc::Equals { field, value } => ConditionNode::Equals { field, value },
            ConditionDoc::NotEquals { field, value } => ConditionNode::NotEquals { field, value },
            ConditionDoc::Gt { field, value } => ConditionNode::Gt { field, value },
            ConditionDoc::Gte { field, value } => ConditionNode::Gte { field, value },
            ConditionDoc::Lt { field, value } => ConditionNode::Lt { field, value },
            ConditionDoc::Lte { field, value } => ConditionNode::Lte { field, value },
            ConditionDoc::Between { field, lo, hi } => ConditionNode::Between { field, lo, hi },
            ConditionDoc::In { field, values } => ConditionNode::In { field, values },
            ConditionDoc::NotIn { field, values } => ConditionNode::NotIn { field, values },
            ConditionDoc::Contains { field, value } => ConditionNode::Contains { field, value },
            ConditionDoc::Regex { field, pattern } => ConditionNode::Regex {
                field,
                pattern: CompiledPattern::new(pattern),
            },
            ConditionDoc::StartsWith { field, prefix } => {
                ConditionNode::StartsWith { field, prefix }
            }
            ConditionDoc::EndsWith { field, suffix } => ConditionNode::EndsWith { field, suffix },
            ConditionDoc::Exists { field } => ConditionNode::Exists { field },
            ConditionDoc::IsNull { field } => ConditionNode::IsNull { field },
            ConditionDoc::And { children } => {
                ConditionNode::and(children.into_iter().map(ConditionDoc::into_node).collect())
            }
            ConditionDoc::Or { children } => {
                ConditionNode::or(children.into_iter().map(ConditionDoc::into_node).collect())
            }
            ConditionDoc::Not { child } => ConditionNode::not(child.into_node()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ConditionSource {
    Expr(String),
    Structured(ConditionDoc),
}

impl ConditionSource {
    fn into_node(self) -> Result<ConditionNode, ConfigError> {
        match self {
            ConditionSource::Expr(s) => parse_expr(&s),
            ConditionSource::Structured(doc) => Ok(doc.into_node()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PriorityNodeDoc {
    name: String,
    condition: Option<ConditionSource>,
    #[serde(rename = "condition-expr")]
    condition_expr: Option<String>,
    #[serde(rename = "nested-levels")]
    nested_levels: Option<Vec<PriorityNodeDoc>>,
    #[serde(rename = "sort-by")]
    sort_by: Option<SortByDoc>,
    executor: Option<String>,
}

impl PriorityNodeDoc {
    fn sort_by(&self) -> Option<SortBy> {
        self.sort_by.as_ref().map(|s| SortBy {
            field: s.field.clone(),
            direction: s.direction.into(),
        })
    }

    fn into_tree_node(self) -> Result<PriorityNode, ConfigError> {
        if self.condition_expr.is_some() {
            return Err(ConfigError::SyntaxMismatch);
        }
        let sort_by = self.sort_by();
        let condition = self
            .condition
            .ok_or_else(|| ConfigError::Other(format!("node {} is missing `condition`", self.name)))?
            .into_node()?;
        let children = self
            .nested_levels
            .unwrap_or_default()
            .into_iter()
            .map(PriorityNodeDoc::into_tree_node)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(if children.is_empty() {
            PriorityNode::leaf(self.name, condition, sort_by, self.executor)
        } else {
            PriorityNode::branch(self.name, condition, children)
        })
    }

    fn into_flat_rule(self) -> Result<FlatRule, ConfigError> {
        if self.condition.is_some() || self.nested_levels.is_some() {
            return Err(ConfigError::SyntaxMismatch);
        }
        let sort_by = self.sort_by();
        let expr = self
            .condition_expr
            .ok_or_else(|| ConfigError::Other(format!("rule {} is missing `condition-expr`", self.name)))?;
        Ok(FlatRule {
            name: self.name,
            condition: parse_expr(&expr)?,
            sort_by,
            executor: self.executor,
        })
    }
}

#[derive(Debug, Deserialize)]
struct QueueDoc {
    name: String,
    index: u32,
    #[serde(default)]
    capacity: u64,
}

#[derive(Debug, Deserialize, Default)]
struct SchedulerDoc {
    #[serde(default)]
    queues: Vec<QueueDoc>,
}

#[derive(Debug, Deserialize)]
struct ExecutorDoc {
    id: String,
    parent: Option<String>,
    #[serde(default)]
    tps: u64,
    #[serde(default, rename = "queue_capacity")]
    queue_capacity: u64,
    #[serde(default, rename = "identifier_field")]
    identifier_field: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct AdaptersDoc {
    #[serde(default)]
    executors: Vec<ExecutorDoc>,
}

#[derive(Debug, Deserialize)]
struct PriorityStrategyDoc {
    #[serde(rename = "type")]
    strategy_type: String,
}

/// The full deserialized pool document, with or without the optional
/// top-level `pool:` wrapper already stripped (see [`PoolConfig::from_str`]).
#[derive(Debug, Deserialize)]
pub struct PoolConfig {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, rename = "syntax-used")]
    syntax_used: SyntaxUsed,
    #[serde(default)]
    scheduler: SchedulerDoc,
    #[serde(default)]
    adapters: AdaptersDoc,
    #[serde(rename = "priority-strategy")]
    priority_strategy: PriorityStrategyDoc,
    #[serde(default, rename = "priority-tree")]
    priority_tree: Vec<PriorityNodeDoc>,
}

#[derive(Debug, Deserialize)]
struct PoolWrapper {
    pool: PoolConfig,
}

impl PoolConfig {
    /// Parses a YAML document, transparently unwrapping an optional
    /// top-level `pool:` key.
    pub fn from_yaml_str(source: &str) -> Result<Self, ConfigError> {
        if let Ok(wrapper) = serde_yaml::from_str::<PoolWrapper>(source) {
            return Ok(wrapper.pool);
        }
        serde_yaml::from_str::<PoolConfig>(source)
            .map_err(|e| ConfigError::Other(format!("malformed pool document: {e}")))
    }

    pub fn from_json_str(source: &str) -> Result<Self, ConfigError> {
        if let Ok(wrapper) = serde_json::from_str::<PoolWrapper>(source) {
            return Ok(wrapper.pool);
        }
        serde_json::from_str::<PoolConfig>(source)
            .map_err(|e| ConfigError::Other(format!("malformed pool document: {e}")))
    }

    fn validate_queues(&self) -> Result<(), ConfigError> {
        let mut seen_names = HashSet::new();
        let mut seen_indices = HashSet::new();
        for queue in &self.scheduler.queues {
            if !seen_names.insert(queue.name.as_str()) {
                return Err(ConfigError::Other(format!(
                    "duplicate scheduler queue name {}",
                    queue.name
                )));
            }
            if !seen_indices.insert(queue.index) {
                return Err(ConfigError::Other(format!(
                    "duplicate scheduler queue index {}",
                    queue.index
                )));
            }
        }
        Ok(())
    }

    fn build_hierarchy(&self) -> Result<ExecutorHierarchy, ConfigError> {
        let specs = self
            .adapters
            .executors
            .iter()
            .map(|e| ExecutorSpec {
                id: e.id.clone(),
                parent: e.parent.clone(),
                tps_limit: e.tps,
                queue_capacity: e.queue_capacity,
                identifier_field: e.identifier_field.clone(),
            })
            .collect();
        ExecutorHierarchy::build(specs)
    }

    fn build_routing_rules(self) -> Result<RoutingRules, ConfigError> {
        match self.syntax_used {
            SyntaxUsed::ConditionTree => {
                let roots = self
                    .priority_tree
                    .into_iter()
                    .map(PriorityNodeDoc::into_tree_node)
                    .collect::<Result<Vec<_>, _>>()?;
                for root in &roots {
                    root.validate_and_compile(0)?;
                }
                Ok(RoutingRules::Tree(roots))
            }
            SyntaxUsed::ConditionExpr => {
                let rules = self
                    .priority_tree
                    .into_iter()
                    .map(PriorityNodeDoc::into_flat_rule)
                    .collect::<Result<Vec<_>, _>>()?;
                for rule in &rules {
                    rule.condition
                        .precompile()
                        .map_err(|e| ConfigError::InvalidRegex {
                            pattern: format!("{:?}", e),
                            message: e.to_string(),
                        })?;
                }
                Ok(RoutingRules::Flat(rules))
            }
        }
    }

    /// Builds a running pool from this document, using the default
    /// `tokio`-backed execution substrate.
    pub fn build(self) -> Result<DispatchFacade, ConfigError> {
        self.build_with_substrate(Arc::new(TokioExecutionSubstrate))
    }

    pub fn build_with_substrate(
        self,
        substrate: Arc<dyn ExecutionSubstrate>,
    ) -> Result<DispatchFacade, ConfigError> {
        if self.priority_strategy.strategy_type != "FIFO" {
            return Err(ConfigError::UnimplementedStrategy(
                self.priority_strategy.strategy_type.clone(),
            ));
        }
        self.validate_queues()?;
        let hierarchy = self.build_hierarchy()?;
        let name = self.name.clone();
        let rules = self.build_routing_rules()?;
        Ok(DispatchFacade::new(
            name,
            hierarchy,
            rules,
            DEFAULT_WINDOW_MS,
            substrate,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
pool:
  name: payments
  version: "1"
  syntax-used: CONDITION_TREE
  adapters:
    executors:
      - id: main
        tps: 1000
        queue_capacity: 5000
      - id: vip
        parent: main
        tps: 400
        identifier_field: "$req.requestId"
      - id: bulk
        parent: main
        tps: 200
        identifier_field: "$req.requestId"
  priority-strategy:
    type: FIFO
  priority-tree:
    - name: PLATINUM
      condition:
        op: EQUALS
        field: "$req.customerTier"
        value: PLATINUM
      sort-by:
        field: "$req.priority"
        direction: DESC
      executor: vip
    - name: DEFAULT
      condition:
        op: ALWAYS_TRUE
      executor: bulk
"#;

    #[test]
    fn parses_wrapped_pool_document() {
        let config = PoolConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.name, "payments");
        assert_eq!(config.adapters.executors.len(), 3);
        assert_eq!(config.priority_tree.len(), 2);
    }

    #[tokio::test]
    async fn builds_a_running_facade() {
        let config = PoolConfig::from_yaml_str(SAMPLE).unwrap();
        let facade = config.build().unwrap();
        assert_eq!(facade.name(), "payments");
    }

    #[test]
    fn reserved_strategy_fails_at_construction_not_parse() {
        let source = SAMPLE.replace("type: FIFO", "type: TIME_BASED");
        let config = PoolConfig::from_yaml_str(&source).unwrap();
        let err = config.build().unwrap_err();
        assert!(matches!(err, ConfigError::UnimplementedStrategy(_)));
    }

    #[test]
    fn two_roots_are_rejected_at_load() {
        let source = SAMPLE.replace(
            "- id: bulk\n        parent: main",
            "- id: bulk",
        );
        let config = PoolConfig::from_yaml_str(&source).unwrap();
        let err = config.build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHierarchy(_)));
    }

    #[tokio::test]
    async fn loads_a_pool_document_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let source = std::fs::read_to_string(file.path()).unwrap();
        let config = PoolConfig::from_yaml_str(&source).unwrap();
        let facade = config.build().unwrap();
        assert_eq!(facade.name(), "payments");
    }

    #[test]
    fn mixing_condition_expr_into_a_tree_node_is_a_syntax_mismatch() {
        let bad = SAMPLE.replacen(
            "condition:\n        op: EQUALS\n        field: \"$req.customerTier\"\n        value: PLATINUM",
            "condition-expr: \"customerTier == 'PLATINUM'\"",
            1,
        );
        let config = PoolConfig::from_yaml_str(&bad).unwrap();
        let err = config.build().unwrap_err();
        assert!(matches!(err, ConfigError::SyntaxMismatch));
    }
}
