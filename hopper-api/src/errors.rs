//! # Error types
//!
//! Two families of errors cross the API boundary:
//!
//! - [`RuntimeViolation`]: a broken programming contract. The scheduler never
//!   recovers from these; they are reported and the process stops.
//! - [`TaskError`]: what a waiter observes when a task cannot report completion.
//!
//! Benign races inside the scheduler (a stealer losing the actor, an actor
//! observed in an already-transitioned state) are not errors and never
//! surface here.

use thiserror::Error;

use crate::types::{ActorId, ActorState};

/// A violated invariant of the scheduler.
///
/// Each variant's message names the invariant so that the diagnostic printed
/// before the process stops is actionable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeViolation {
    /// An actor was torn down while jobs were still linked into it.
    #[error("{actor} destroyed with queued jobs")]
    DestroyedWithQueuedJobs { actor: ActorId },

    /// An actor was torn down while something still held it.
    #[error("{actor} deallocated with non-zero retain count {count}")]
    NonZeroRetainCount { actor: ActorId, count: usize },

    /// An actor was used after its last reference was released.
    #[error("{actor} used by {operation} after deallocation")]
    UseAfterDeallocation { actor: ActorId, operation: &'static str },

    /// An actor was released more times than it was retained.
    #[error("{actor} over-released")]
    OverRelease { actor: ActorId },

    /// An actor's status word was found in a state the operation forbids.
    #[error("{actor} in unexpected state {state} during {operation}")]
    UnexpectedState {
        actor: ActorId,
        state: ActorState,
        operation: &'static str,
    },

    /// A task-only operation was invoked outside of a running task.
    #[error("{operation} called with no current task")]
    NoCurrentTask { operation: &'static str },

    /// Code ran on an executor it is not isolated to.
    #[error("data race detected: {function} at {file}:{line} was not called on {expected}")]
    UnexpectedExecutor {
        function: &'static str,
        file: String,
        line: u32,
        expected: &'static str,
    },

    /// Isolation to a target executor could not be established.
    #[error("incorrect actor executor assumption: {0}")]
    IsolationAssumption(String),

    /// The scheduler could not create a job it needs to make progress.
    #[error("unable to schedule: {0}")]
    SchedulingFailed(String),
}

/// Failure observed when waiting on a task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task record was dropped before it ran to completion, for example
    /// because its executor shut down.
    #[error("task dropped before completion")]
    Dropped,
}
