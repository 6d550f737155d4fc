//! Policy-driven task admission and prioritization core.
//!
//! A caller submits a task (a context plus a unit of work); this crate
//! decides which executor it routes to, whether it admits immediately or
//! waits for hierarchical TPS capacity, and in what order queued tasks
//! drain. It does not run user code itself — that's the execution
//! substrate's job, narrowed to one injected `dispatch` operation so a
//! caller can swap in their own worker model.

pub mod backlog;
pub mod condition;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod expr;
pub mod gate;
pub mod hierarchy;
pub mod priority;
pub mod resolver;
pub mod substrate;
pub mod value;
pub mod window;

pub use condition::{CompiledPattern, ConditionNode};
pub use config::PoolConfig;
pub use context::TaskContext;
pub use dispatch::{DispatchFacade, ExecutorStats, FutureHandle, RoutingRules};
pub use error::{AdmissionError, ConfigError, RejectReason, RejectedSubmission};
pub use gate::TpsGate;
pub use hierarchy::{ExecutorHierarchy, ExecutorSpec};
pub use priority::key::{PathVector, PriorityKey, SortBy, SortDirection};
pub use priority::{FlatRule, PriorityNode, TraversalOutcome};
pub use substrate::{BoxedRunnable, ExecutionSubstrate, TokioExecutionSubstrate};
pub use value::Value;
pub use window::SlidingWindowCounter;
