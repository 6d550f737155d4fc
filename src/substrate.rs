//! Execution substrate: the thread or task primitive that actually invokes
//! user code, kept out of the admission core's own concerns and narrowed to
//! the one operation the design calls for — `dispatch(runnable)` — with a
//! default tokio-backed implementation supplied so the façade is runnable
//! out of the box.

use async_trait::async_trait;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::error;

/// A unit of work submitted fire-and-forget. User-code failures inside a
/// runnable are isolated per task: the substrate catches panics and logs
/// them rather than propagating.
pub type BoxedRunnable = Box<dyn FnOnce() + Send + 'static>;

/// Narrow injected dependency: given a runnable, run it. Implementations
/// decide the concurrency model (thread pool, tokio tasks, inline for
/// tests).
#[async_trait]
pub trait ExecutionSubstrate: Send + Sync {
    async fn dispatch(&self, runnable: BoxedRunnable);
}

/// Default substrate: one `tokio::spawn`'d task per runnable, backed by an
/// unbounded pool of execution workers. `spawn_blocking` is used so a
/// runnable that blocks doesn't starve the tokio reactor driving submitters
/// and drainers.
#[derive(Default, Clone, Copy)]
pub struct TokioExecutionSubstrate;

#[async_trait]
impl ExecutionSubstrate for TokioExecutionSubstrate {
    async fn dispatch(&self, runnable: BoxedRunnable) {
        let handle = tokio::task::spawn_blocking(move || {
            let result = std::panic::catch_unwind(AssertUnwindSafe(runnable));
            if let Err(panic) = result {
                let message = panic_message(&panic);
                error!(%message, "user-code runnable panicked");
            }
        });
        // Fire-and-forget: don't await the join handle here, or every
        // submitter and drainer would block for the runnable's full runtime.
        // A detached task still observes the join so a failure to even
        // schedule it (executor shutting down) gets logged somewhere.
        tokio::spawn(async move {
            if let Err(join_err) = handle.await {
                error!(error = %join_err, "execution task failed to join");
            }
        });
    }
}

/// Wraps `runnable` so `active` is incremented the moment it's handed off
/// and decremented once it (or a panic unwinding through it) finishes,
/// regardless of which admission path dispatched it.
pub(crate) fn track_active(active: Arc<AtomicU64>, runnable: BoxedRunnable) -> BoxedRunnable {
    active.fetch_add(1, Ordering::AcqRel);
    Box::new(move || {
        struct Guard(Arc<AtomicU64>);
        impl Drop for Guard {
            fn drop(&mut self) {
                self.0.fetch_sub(1, Ordering::AcqRel);
            }
        }
        let _guard = Guard(active);
        runnable();
    })
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
