//! # Executor capabilities
//!
//! An executor is anything a job can be enqueued onto. The scheduler knows
//! three shapes of executor:
//!
//! - the generic global pool ([`GlobalExecutor`]),
//! - its own built-in actors, and
//! - external serial executors supplied by embedders ([`SerialExecutor`]).
//!
//! A [`TaskExecutor`] is a secondary executor preference carried by a task:
//! when the task runs on the generic pool it runs on the task executor
//! instead.

use std::fmt;
use std::time::Duration;

use crate::job::JobRef;

/// Answer of an executor asked whether the calling context is isolated to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationDecision {
    /// The current context is known to be isolated to the executor
    Isolated,
    /// The current context is known not to be isolated to the executor
    NotIsolated,
    /// The executor cannot tell; fall back to `check_isolated`
    Unknown,
}

/// A serial executor that runs at most one job at a time.
///
/// Implementations provided by embedders are consulted by the isolation
/// checks when the runtime's own bookkeeping cannot prove isolation.
pub trait SerialExecutor: fmt::Debug + Send + Sync {
    /// Schedules a job. The executor takes ownership.
    fn enqueue(&self, job: JobRef);

    /// Verifies that the caller is isolated to this executor.
    ///
    /// Returning means the check passed. Implementations are expected to
    /// abort the process when it fails.
    fn check_isolated(&self) {
        panic!("incorrect executor assumption: {:?} cannot verify isolation", self);
    }

    /// Non-crashing variant of [`SerialExecutor::check_isolated`].
    fn is_isolating_current_context(&self) -> IsolationDecision {
        IsolationDecision::Unknown
    }

    /// Whether this executor represents the process main thread.
    fn is_main_executor(&self) -> bool {
        false
    }

    /// Whether this executor implements a custom equality with other executors.
    fn is_complex_equality(&self) -> bool {
        false
    }

    /// Custom equality used when two executors with different identities may
    /// still share an execution context.
    fn is_same_exclusive_execution_context(&self, _other: &dyn SerialExecutor) -> bool {
        false
    }

    /// Stable identity of the executor object.
    fn identity(&self) -> usize {
        self as *const Self as *const () as usize
    }
}

/// A secondary executor a task prefers to run on.
pub trait TaskExecutor: fmt::Debug + Send + Sync {
    /// Schedules a job. The executor takes ownership.
    fn enqueue(&self, job: JobRef);

    /// Stable identity of the executor object.
    fn identity(&self) -> usize {
        self as *const Self as *const () as usize
    }
}

/// The process-wide generic pool.
pub trait GlobalExecutor: fmt::Debug + Send + Sync {
    /// Schedules a job at its own priority.
    fn enqueue_global(&self, job: JobRef);

    /// Schedules a job once `delay` has elapsed.
    fn enqueue_global_with_delay(&self, delay: Duration, job: JobRef);
}
