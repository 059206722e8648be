//! Executor references and the bundled executors.
//!
//! [`SerialExecutorRef`] names the serial executor a job runs on: the
//! generic pool, one of the runtime's own default actors, or an embedder's
//! [`SerialExecutor`]. [`TaskExecutorRef`] is a task's optional preference
//! for where generic work should run instead of the global pool.
//!
//! The bundled executors are [`ThreadPoolExecutor`] (the default global
//! pool), [`ManualExecutor`] (deterministic, driven by the caller) and
//! [`TokioTaskExecutor`].

mod manual;
mod pool;
pub(crate) mod queue;
mod timer;
mod tokio_executor;

use std::fmt;
use std::sync::Arc;

use hopper_api::executor::{IsolationDecision, SerialExecutor, TaskExecutor};
use hopper_api::job::JobRef;

use crate::actor::DefaultActor;
use crate::runtime::RuntimeShared;

pub use manual::ManualExecutor;
pub use pool::{PoolMetrics, PoolStatus, ThreadPoolExecutor};
pub use queue::RunQueue;
pub use tokio_executor::TokioTaskExecutor;

/// Reference to a serial executor.
///
/// Holding a `DefaultActor` reference keeps the actor's storage alive but
/// does not count as a retain of the actor.
#[derive(Clone, Default)]
pub enum SerialExecutorRef {
    /// The global concurrent pool
    #[default]
    Generic,
    /// The generic pool while a task is being started synchronously on the
    /// caller's thread. Refuses to give up its thread.
    GenericSynchronousStart,
    /// One of the runtime's default actors
    DefaultActor(Arc<DefaultActor>),
    /// An embedder-supplied serial executor
    Custom(Arc<dyn SerialExecutor>),
}

impl SerialExecutorRef {
    pub fn custom(executor: Arc<dyn SerialExecutor>) -> Self {
        SerialExecutorRef::Custom(executor)
    }

    /// Zero for both generic forms, otherwise the executor's address.
    pub fn identity(&self) -> usize {
        match self {
            SerialExecutorRef::Generic | SerialExecutorRef::GenericSynchronousStart => 0,
            SerialExecutorRef::DefaultActor(actor) => Arc::as_ptr(actor) as usize,
            SerialExecutorRef::Custom(executor) => executor.identity(),
        }
    }

    pub fn is_generic(&self) -> bool {
        matches!(
            self,
            SerialExecutorRef::Generic | SerialExecutorRef::GenericSynchronousStart
        )
    }

    pub fn is_for_synchronous_start(&self) -> bool {
        matches!(self, SerialExecutorRef::GenericSynchronousStart)
    }

    pub fn is_default_actor(&self) -> bool {
        matches!(self, SerialExecutorRef::DefaultActor(_))
    }

    pub fn as_default_actor(&self) -> Option<&Arc<DefaultActor>> {
        match self {
            SerialExecutorRef::DefaultActor(actor) => Some(actor),
            _ => None,
        }
    }

    pub fn is_main_executor(&self) -> bool {
        match self {
            SerialExecutorRef::Custom(executor) => executor.is_main_executor(),
            _ => false,
        }
    }

    pub fn is_complex_equality(&self) -> bool {
        match self {
            SerialExecutorRef::Custom(executor) => executor.is_complex_equality(),
            _ => false,
        }
    }

    /// Custom equality between two executors of distinct identity.
    pub fn is_same_exclusive_execution_context(&self, other: &SerialExecutorRef) -> bool {
        match (self, other) {
            (SerialExecutorRef::Custom(this), SerialExecutorRef::Custom(other)) => {
                this.is_same_exclusive_execution_context(other.as_ref())
            }
            _ => false,
        }
    }

    pub fn is_isolating_current_context(&self) -> IsolationDecision {
        match self {
            SerialExecutorRef::Custom(executor) => executor.is_isolating_current_context(),
            _ => IsolationDecision::Unknown,
        }
    }

    /// Whether this executor can verify isolation at all.
    pub(crate) fn can_check_isolated(&self) -> bool {
        matches!(self, SerialExecutorRef::Custom(_))
    }

    /// Asks a custom executor to verify the caller is isolated to it.
    ///
    /// Only custom executors can answer; for the others this is a no-op and
    /// callers decide on their own.
    pub fn check_isolated(&self) {
        if let SerialExecutorRef::Custom(executor) = self {
            executor.check_isolated();
        }
    }

    /// Enqueues `job` on this executor.
    pub(crate) fn enqueue(&self, runtime: &RuntimeShared, job: JobRef) {
        match self {
            SerialExecutorRef::Generic | SerialExecutorRef::GenericSynchronousStart => {
                match crate::task::task_executor_preference(&job) {
                    TaskExecutorRef::Defined(executor) => executor.enqueue(job),
                    TaskExecutorRef::Undefined => runtime.global.enqueue_global(job),
                }
            }
            SerialExecutorRef::DefaultActor(actor) => {
                let priority = job.priority();
                actor.enqueue(job, priority);
            }
            SerialExecutorRef::Custom(executor) => executor.enqueue(job),
        }
    }

    /// Short human-readable kind, used in diagnostics.
    pub fn describe(&self) -> &'static str {
        match self {
            SerialExecutorRef::Generic => "generic executor",
            SerialExecutorRef::GenericSynchronousStart => "generic executor (synchronous start)",
            SerialExecutorRef::DefaultActor(_) => "default actor",
            SerialExecutorRef::Custom(executor) if executor.is_main_executor() => "main executor",
            SerialExecutorRef::Custom(_) => "custom executor",
        }
    }
}

impl PartialEq for SerialExecutorRef {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for SerialExecutorRef {}

impl fmt::Debug for SerialExecutorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerialExecutorRef::DefaultActor(actor) => {
                f.debug_tuple("DefaultActor").field(&actor.id()).finish()
            }
            SerialExecutorRef::Custom(executor) => f.debug_tuple("Custom").field(executor).finish(),
            other => f.write_str(other.describe()),
        }
    }
}

impl From<Arc<dyn SerialExecutor>> for SerialExecutorRef {
    fn from(executor: Arc<dyn SerialExecutor>) -> Self {
        SerialExecutorRef::Custom(executor)
    }
}

/// A task's preferred task executor, if any.
#[derive(Clone, Default)]
pub enum TaskExecutorRef {
    #[default]
    Undefined,
    Defined(Arc<dyn TaskExecutor>),
}

impl TaskExecutorRef {
    pub fn new(executor: Arc<dyn TaskExecutor>) -> Self {
        TaskExecutorRef::Defined(executor)
    }

    /// Zero when undefined.
    pub fn identity(&self) -> usize {
        match self {
            TaskExecutorRef::Undefined => 0,
            TaskExecutorRef::Defined(executor) => executor.identity(),
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self, TaskExecutorRef::Defined(_))
    }

    pub fn is_undefined(&self) -> bool {
        !self.is_defined()
    }
}

impl PartialEq for TaskExecutorRef {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for TaskExecutorRef {}

impl fmt::Debug for TaskExecutorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskExecutorRef::Undefined => f.write_str("Undefined"),
            TaskExecutorRef::Defined(executor) => f.debug_tuple("Defined").field(executor).finish(),
        }
    }
}
