//! Condition model: a tagged variant over the boolean predicate kinds rules
//! are built from, plus the evaluator that walks it against a task context.
//!
//! Mirrors `dsl-core::ast`'s "fold per-kind classes into one sum type, match
//! on the tag" shape.

use crate::context::TaskContext;
use crate::resolver;
use crate::value::Value;
use once_cell::sync::OnceCell;
use regex::Regex;
use std::sync::Arc;

/// A boolean predicate over a resolved task-context field.
///
/// Value-carrying variants hold the field reference they compare
/// (`$req.amount`, etc.); logical variants hold their children. `Regex`
/// carries a lazily-compiled, cached pattern so the same `ConditionNode` can
/// be evaluated many times without recompiling.
#[derive(Debug, Clone)]
pub enum ConditionNode {
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
    Regex { field: String, pattern: CompiledPattern },
    StartsWith { field: String, prefix: String },
    EndsWith { field: String, suffix: String },
    Exists { field: String },
    IsNull { field: String },
    And(Vec<ConditionNode>),
    Or(Vec<ConditionNode>),
    Not(Box<ConditionNode>),
}

/// A regex pattern compiled once and shared by clones of the node that owns
/// it.
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub source: String,
    compiled: Arc<OnceCell<Regex>>,
}

impl CompiledPattern {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            compiled: Arc::new(OnceCell::new()),
        }
    }

    pub fn compile(&self) -> Result<(), regex::Error> {
        self.get_or_compile().map(|_| ())
    }

    fn get_or_compile(&self) -> Result<&Regex, regex::Error> {
        self.compiled.get_or_try_init(|| Regex::new(&self.source))
    }

    fn is_full_match(&self, text: &str) -> bool {
        match self.get_or_compile() {
            Ok(re) => re
                .find(text)
                .map(|m| m.start() == 0 && m.end() == text.len())
                .unwrap_or(false),
            Err(_) => false,
        }
    }
}

impl ConditionNode {
    pub fn and(children: Vec<ConditionNode>) -> Self {
        ConditionNode::And(children)
    }

    pub fn or(children: Vec<ConditionNode>) -> Self {
        ConditionNode::Or(children)
    }

    pub fn not(child: ConditionNode) -> Self {
        ConditionNode::Not(Box::new(child))
    }

    /// Pre-compile every regex in the tree. Called once at load time so
    /// traversal never pays compilation cost.
    pub fn precompile(&self) -> Result<(), regex::Error> {
        match self {
            ConditionNode::Regex { pattern, .. } => pattern.compile(),
            ConditionNode::And(children) | ConditionNode::Or(children) => {
                for child in children {
                    child.precompile()?;
                }
                Ok(())
            }
            ConditionNode::Not(child) => child.precompile(),
            _ => Ok(()),
        }
    }

    /// Render back to the flat infix syntax, mirroring `dsl-core::ast`'s
    /// `to_dsl_string` convention.
    pub fn to_expr_string(&self) -> String {
        match self {
            ConditionNode::AlwaysTrue => "true".to_string(),
            ConditionNode::Equals { field, value } => format!("{field} == {}", literal(value)),
            ConditionNode::NotEquals { field, value } => format!("{field} != {}", literal(value)),
            ConditionNode::Gt { field, value } => format!("{field} > {}", literal(value)),
            ConditionNode::Gte { field, value } => format!("{field} >= {}", literal(value)),
            ConditionNode::Lt { field, value } => format!("{field} < {}", literal(value)),
            ConditionNode::Lte { field, value } => format!("{field} <= {}", literal(value)),
            ConditionNode::Between { field, lo, hi } => {
                format!("{field} BETWEEN {} AND {}", literal(lo), literal(hi))
            }
            ConditionNode::In { field, values } => format!("{field} IN {}", list(values)),
            ConditionNode::NotIn { field, values } => {
                format!("{field} NOT IN {}", list(values))
            }
            ConditionNode::Contains { field, value } => {
                format!("{field} CONTAINS {}", literal(value))
            }
            ConditionNode::Regex { field, pattern } => {
                format!("{field} REGEX \"{}\"", pattern.source)
            }
            ConditionNode::StartsWith { field, prefix } => {
                format!("{field} STARTS_WITH \"{prefix}\"")
            }
            ConditionNode::EndsWith { field, suffix } => {
                format!("{field} ENDS_WITH \"{suffix}\"")
            }
            ConditionNode::Exists { field } => format!("{field} EXISTS"),
            ConditionNode::IsNull { field } => format!("{field} IS_NULL"),
            ConditionNode::And(children) => join(children, "AND"),
            ConditionNode::Or(children) => join(children, "OR"),
            ConditionNode::Not(child) => format!("NOT ({})", child.to_expr_string()),
        }
    }
}

fn literal(v: &Value) -> String {
    match v {
        Value::String(s) => format!("\"{s}\""),
        other => other.as_string_form(),
    }
}

fn list(values: &[Value]) -> String {
    let parts: Vec<String> = values.iter().map(literal).collect();
    format!("[{}]", parts.join(", "))
}

fn join(children: &[ConditionNode], op: &str) -> String {
    let parts: Vec<String> = children
        .iter()
        .map(|c| format!("({})", c.to_expr_string()))
        .collect();
    parts.join(&format!(" {op} "))
}

/// Equality rule shared by `Equals`/`In`: structural equality first, then
/// numeric comparison if both sides are numeric, then string-form
/// comparison — the one coercion rule that load-bearing rules actually rely on.
fn values_equal(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    if a.is_numeric() && b.is_numeric() {
        if let (Some(af), Some(bf)) = (a.as_f64(), b.as_f64()) {
            return af == bf;
        }
    }
    a.as_string_form() == b.as_string_form()
}

/// Evaluate a condition node against a context. Missing fields evaluate to
/// `false` everywhere a comparison needs a value.
pub fn evaluate(node: &ConditionNode, ctx: &TaskContext) -> bool {
    match node {
        ConditionNode::AlwaysTrue => true,

        ConditionNode::Equals { field, value } => match resolver::resolve(field, ctx) {
            Some(resolved) => values_equal(resolved, value),
            None => false,
        },
        ConditionNode::NotEquals { field, value } => match resolver::resolve(field, ctx) {
            Some(resolved) => !values_equal(resolved, value),
            None => false,
        },

        ConditionNode::Gt { field, value } => numeric_compare(field, value, ctx, |a, b| a > b),
        ConditionNode::Gte { field, value } => numeric_compare(field, value, ctx, |a, b| a >= b),
        ConditionNode::Lt { field, value } => numeric_compare(field, value, ctx, |a, b| a < b),
        ConditionNode::Lte { field, value } => numeric_compare(field, value, ctx, |a, b| a <= b),

        ConditionNode::Between { field, lo, hi } => {
            let (Some(v), Some(lo), Some(hi)) = (
                resolver::resolve_as_f64(field, ctx),
                lo.as_f64(),
                hi.as_f64(),
            ) else {
                return false;
            };
            v >= lo && v <= hi
        }

        ConditionNode::In { field, values } => match resolver::resolve(field, ctx) {
            Some(resolved) => values.iter().any(|v| values_equal(resolved, v)),
            None => false,
        },
        ConditionNode::NotIn { field, values } => match resolver::resolve(field, ctx) {
            Some(resolved) => !values.iter().any(|v| values_equal(resolved, v)),
            // Missing field returns false here too, not the logically
            // tempting `true` — consistent with every other comparison.
            None => false,
        },

        ConditionNode::Contains { field, value } => match resolver::resolve(field, ctx) {
            Some(Value::Seq(items)) => items.iter().any(|item| values_equal(item, value)),
            Some(resolved @ Value::String(_)) => {
                resolved.as_string_form().contains(&value.as_string_form())
            }
            _ => false,
        },

        ConditionNode::Regex { field, pattern } => match resolver::resolve(field, ctx) {
            Some(resolved) => pattern.is_full_match(&resolved.as_string_form()),
            None => false,
        },

        ConditionNode::StartsWith { field, prefix } => match resolver::resolve(field, ctx) {
            Some(resolved) => resolved.as_string_form().starts_with(prefix.as_str()),
            None => false,
        },
        ConditionNode::EndsWith { field, suffix } => match resolver::resolve(field, ctx) {
            Some(resolved) => resolved.as_string_form().ends_with(suffix.as_str()),
            None => false,
        },

        ConditionNode::Exists { field } => resolver::resolve(field, ctx).is_some(),
        ConditionNode::IsNull { field } => resolver::resolve(field, ctx).is_none(),

        ConditionNode::And(children) => children.iter().all(|c| evaluate(c, ctx)),
        ConditionNode::Or(children) => children.iter().any(|c| evaluate(c, ctx)),
        ConditionNode::Not(child) => !evaluate(child, ctx),
    }
}

fn numeric_compare(
    field: &str,
    value: &Value,
    ctx: &TaskContext,
    op: impl Fn(f64, f64) -> bool,
) -> bool {
    let (Some(lhs), Some(rhs)) = (resolver::resolve_as_f64(field, ctx), value.as_f64()) else {
        return false;
    };
    op(lhs, rhs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn ctx_with(field: &str, value: Value) -> TaskContext {
        let mut req = BTreeMap::new();
        req.insert(field.to_string(), value);
        TaskContext::new(req, BTreeMap::new(), None, None)
    }

    #[test]
    fn missing_field_is_always_false() {
        let ctx = TaskContext::empty();
        let node = ConditionNode::Equals {
            field: "$req.amount".into(),
            value: Value::Int(1),
        };
        assert!(!evaluate(&node, &ctx));

        let node = ConditionNode::NotIn {
            field: "$req.tier".into(),
            values: vec![Value::String("GOLD".into())],
        };
        assert!(!evaluate(&node, &ctx));
    }

    #[test]
    fn between_is_inclusive() {
        let ctx = ctx_with("$req.amount", Value::Int(100));
        let node = ConditionNode::Between {
            field: "$req.amount".into(),
            lo: Value::Int(100),
            hi: Value::Int(200),
        };
        assert!(evaluate(&node, &ctx));

        let ctx = ctx_with("$req.amount", Value::Int(200));
        assert!(evaluate(&node, &ctx));

        let ctx = ctx_with("$req.amount", Value::Int(201));
        assert!(!evaluate(&node, &ctx));
    }

    #[test]
    fn numeric_equals_crosses_string_number_boundary() {
        let ctx = ctx_with("$req.amount", Value::String("500".into()));
        let node = ConditionNode::Equals {
            field: "$req.amount".into(),
            value: Value::Int(500),
        };
        assert!(evaluate(&node, &ctx));
    }

    #[test]
    fn regex_is_full_match_not_search() {
        let ctx = ctx_with("$req.code", Value::String("AB123".into()));
        let node = ConditionNode::Regex {
            field: "$req.code".into(),
            pattern: CompiledPattern::new(r"AB\d+"),
        };
        assert!(evaluate(&node, &ctx));

        let ctx = ctx_with("$req.code", Value::String("xxAB123".into()));
        assert!(!evaluate(&node, &ctx));
    }

    #[test]
    fn and_or_not_identities() {
        let ctx = TaskContext::empty();
        assert!(evaluate(&ConditionNode::And(vec![]), &ctx));
        assert!(!evaluate(&ConditionNode::Or(vec![]), &ctx));
        assert!(!evaluate(
            &ConditionNode::not(ConditionNode::AlwaysTrue),
            &ctx
        ));
    }

    #[test]
    fn contains_checks_sequence_and_substring() {
        let ctx = ctx_with(
            "$req.tags",
            Value::Seq(vec![Value::String("vip".into())]),
        );
        let node = ConditionNode::Contains {
            field: "$req.tags".into(),
            value: Value::String("vip".into()),
        };
        assert!(evaluate(&node, &ctx));

        let ctx = ctx_with("$req.name", Value::String("hello world".into()));
        let node = ConditionNode::Contains {
            field: "$req.name".into(),
            value: Value::String("wor".into()),
        };
        assert!(evaluate(&node, &ctx));
    }

    #[test]
    fn round_trips_through_expr_string() {
        let node = ConditionNode::Equals {
            field: "$req.amount".into(),
            value: Value::Int(500),
        };
        assert_eq!(node.to_expr_string(), "$req.amount == 500");
    }
}
