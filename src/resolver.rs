//! Variable resolver: `$req.*` / `$ctx.*` / `$sys.*` lookups against a
//! [`TaskContext`].

use crate::context::TaskContext;
use crate::value::Value;

const REQ_PREFIX: &str = "$req.";
const CTX_PREFIX: &str = "$ctx.";
const SYS_PREFIX: &str = "$sys.";

/// Resolve a `$req.`/`$ctx.`/`$sys.` reference against a context. Returns
/// `None` both when the reference has no recognized prefix and when the key
/// is simply absent from the selected map — callers that need to distinguish
/// "bad reference" from "missing field" should validate prefixes ahead of
/// time (the expression front-end and priority tree loader do this at
/// compile time).
pub fn resolve<'a>(reference: &str, ctx: &'a TaskContext) -> Option<&'a Value> {
    if let Some(key) = reference.strip_prefix(REQ_PREFIX) {
        ctx.request().get(key)
    } else if let Some(key) = reference.strip_prefix(CTX_PREFIX) {
        ctx.context_map().get(key)
    } else if let Some(key) = reference.strip_prefix(SYS_PREFIX) {
        ctx.system().get(key)
    } else {
        None
    }
}

/// `true` iff `reference` starts with a recognized prefix — used at
/// configuration-load time to reject malformed field references early
/// rather than silently always resolving to "missing".
pub fn has_known_prefix(reference: &str) -> bool {
    reference.starts_with(REQ_PREFIX)
        || reference.starts_with(CTX_PREFIX)
        || reference.starts_with(SYS_PREFIX)
}

pub fn resolve_as_i64(reference: &str, ctx: &TaskContext) -> Option<i64> {
    resolve(reference, ctx).and_then(Value::as_i64)
}

pub fn resolve_as_f64(reference: &str, ctx: &TaskContext) -> Option<f64> {
    resolve(reference, ctx).and_then(Value::as_f64)
}

pub fn resolve_as_string(reference: &str, ctx: &TaskContext) -> Option<String> {
    resolve(reference, ctx).map(Value::as_string_form)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn ctx_with_amount(amount: i64) -> TaskContext {
        let mut req = BTreeMap::new();
        req.insert("amount".to_string(), Value::Int(amount));
        TaskContext::new(req, BTreeMap::new(), None, None)
    }

    #[test]
    fn resolves_request_field() {
        let ctx = ctx_with_amount(42);
        assert_eq!(resolve_as_i64("$req.amount", &ctx), Some(42));
    }

    #[test]
    fn missing_field_resolves_to_none() {
        let ctx = ctx_with_amount(42);
        assert_eq!(resolve("$req.missing", &ctx), None);
        assert_eq!(resolve_as_i64("$req.missing", &ctx), None);
    }

    #[test]
    fn unrecognized_prefix_resolves_to_none() {
        let ctx = ctx_with_amount(42);
        assert_eq!(resolve("amount", &ctx), None);
    }

    #[test]
    fn sys_time_now_resolves() {
        let ctx = TaskContext::empty();
        assert!(resolve_as_i64("$sys.time.now", &ctx).is_some());
    }
}
