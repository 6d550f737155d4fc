//! Task context: the immutable value captured at submission time.

use crate::value::{flatten_map, Value};
use chrono::Utc;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Immutable snapshot of everything a rule might need to look at for one
/// submitted task. Built once at `submit` and discarded after the runnable
/// completes.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: String,
    pub submitted_at: i64,
    pub correlation_id: Option<String>,
    request: BTreeMap<String, Value>,
    context: BTreeMap<String, Value>,
    system: BTreeMap<String, Value>,
}

impl TaskContext {
    /// Build a context from the user-supplied request payload plus an opaque
    /// side-channel context map. `task_id` and `correlation_id` are
    /// auto-generated/omitted as needed; nested maps in `request` and
    /// `context` are flattened to dot-joined keys.
    pub fn new(
        request: BTreeMap<String, Value>,
        context: BTreeMap<String, Value>,
        task_id: Option<String>,
        correlation_id: Option<String>,
    ) -> Self {
        let task_id = task_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let submitted_at = Utc::now().timestamp_millis();

        let mut system = BTreeMap::new();
        system.insert("taskId".to_string(), Value::String(task_id.clone()));
        system.insert("submittedAt".to_string(), Value::Int(submitted_at));
        system.insert("time.now".to_string(), Value::Int(submitted_at));
        if let Some(ref cid) = correlation_id {
            system.insert("correlationId".to_string(), Value::String(cid.clone()));
        }

        Self {
            task_id,
            submitted_at,
            correlation_id,
            request: flatten_map(request),
            context: flatten_map(context),
            system,
        }
    }

    /// Builder-style convenience for tests and the CLI harness: an empty
    /// context with only system fields populated.
    pub fn empty() -> Self {
        Self::new(BTreeMap::new(), BTreeMap::new(), None, None)
    }

    pub fn request(&self) -> &BTreeMap<String, Value> {
        &self.request
    }

    pub fn context_map(&self) -> &BTreeMap<String, Value> {
        &self.context
    }

    pub fn system(&self) -> &BTreeMap<String, Value> {
        &self.system
    }
}
