// Hopper: an actor scheduler core
//
// Default actors serialize their jobs through a single atomic status word,
// drain in priority order on borrowed threads, and escalate priority by
// dispatching extra "stealer" processing jobs. Tasks hop between executors
// with `task_switch`, donating the current thread when both sides allow it.

pub mod actor;
pub mod config;
pub mod error;
pub mod executor;
pub mod isolation;
pub mod logging;
pub mod runtime;
pub mod switch;
pub mod task;
pub mod tracking;

// Re-export commonly used types
pub use actor::{ActorOptions, ActorRef, ActorStatus, DefaultActor};
pub use config::{ExecutorCheckMode, FatalPolicy, RuntimeConfig, UnexpectedExecutorLogLevel};
pub use error::SystemError;
pub use executor::{ManualExecutor, SerialExecutorRef, TaskExecutorRef, ThreadPoolExecutor, TokioTaskExecutor};
pub use runtime::{Runtime, RuntimeBuilder};
pub use switch::task_switch;
pub use task::{Task, TaskBuilder, TaskHandle, TaskStatus};
pub use tracking::{current_executor, current_task, current_task_executor, ActiveTask, ExecutorTrackingInfo};

#[doc(hidden)]
pub use tracing as __tracing;

pub use hopper_api::{
    ActorId, ActorState, ClosureJob, IsolationDecision, Job, JobKind, JobPriority, JobRef, RuntimeHooks,
    RuntimeViolation, SerialExecutor, TaskError, TaskExecutor, TaskId,
};
