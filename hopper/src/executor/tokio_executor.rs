use std::fmt;
use std::sync::{Arc, Weak};

use tokio::runtime::Handle;

use hopper_api::executor::TaskExecutor;
use hopper_api::job::JobRef;

use super::TaskExecutorRef;
use crate::runtime::{Runtime, RuntimeShared};
use crate::switch;

/// A task executor backed by a tokio runtime's blocking pool.
///
/// Tasks that prefer this executor run their generic (non-actor) work on
/// tokio blocking threads instead of the global pool. Jobs are blocking
/// from tokio's point of view, which is why they never go on the async
/// worker threads.
pub struct TokioTaskExecutor {
    handle: Handle,
    runtime: Weak<RuntimeShared>,
    this: Weak<TokioTaskExecutor>,
}

impl TokioTaskExecutor {
    pub fn new(runtime: &Runtime, handle: Handle) -> Arc<Self> {
        let shared = Arc::downgrade(runtime.shared());
        Arc::new_cyclic(|this| TokioTaskExecutor {
            handle,
            runtime: shared,
            this: this.clone(),
        })
    }

    /// Uses the tokio runtime the caller is running in.
    ///
    /// # Panics
    /// Outside of a tokio runtime context.
    pub fn current(runtime: &Runtime) -> Arc<Self> {
        Self::new(runtime, Handle::current())
    }

    pub fn as_task_executor(self: &Arc<Self>) -> TaskExecutorRef {
        TaskExecutorRef::Defined(self.clone())
    }
}

impl TaskExecutor for TokioTaskExecutor {
    fn enqueue(&self, job: JobRef) {
        let (Some(runtime), Some(this)) = (self.runtime.upgrade(), self.this.upgrade()) else {
            tracing::warn!(priority = %job.priority(), "runtime gone, dropping job for tokio executor");
            return;
        };
        crate::log_scheduler!("tokio", "job_queued", priority = %job.priority());
        self.handle.spawn_blocking(move || {
            switch::run_job_on_task_executor(&runtime, job, TaskExecutorRef::Defined(this));
        });
    }
}

impl fmt::Debug for TokioTaskExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioTaskExecutor")
            .field("runtime_alive", &(self.runtime.strong_count() > 0))
            .finish()
    }
}
