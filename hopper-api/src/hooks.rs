//! # Runtime hooks
//!
//! The scheduler reports reference-count traffic, processing-job lifetimes
//! and state transitions through [`RuntimeHooks`], and asks it for the
//! platform services it does not implement itself: OS-level priority
//! overrides of drainer threads, ambient context ("voucher") adoption, and
//! cooperative yield requests.
//!
//! Every method has a no-op default so embedders override only what they
//! need. [`NoopHooks`] is the default implementation.

use std::fmt;

use crate::job::Job;
use crate::priority::JobPriority;
use crate::types::{ActorId, ActorState, DrainerId, TaskId};

pub trait RuntimeHooks: Send + Sync {
    // --- Reference counting ---

    /// An ownership unit was added to an actor. `count` is the new count.
    fn actor_retained(&self, _actor: ActorId, _count: usize) {}

    /// An ownership unit was removed from an actor. `count` is the new count.
    fn actor_released(&self, _actor: ActorId, _count: usize) {}

    /// The actor's storage was logically freed.
    fn actor_deallocated(&self, _actor: ActorId) {}

    // --- Scheduling ---

    /// A compare-and-swap on the actor status word changed its state.
    fn actor_state_changed(&self, _actor: ActorId, _old: ActorState, _new: ActorState) {}

    /// A processing job was created for an actor.
    fn processing_job_created(&self, _actor: ActorId, _priority: JobPriority, _stealer: bool) {}

    /// A processing job finished, whether it won the actor or not.
    fn processing_job_finished(&self, _actor: ActorId) {}

    /// Asked after each job of a drain; returning true hands the actor to a
    /// fresh processing job.
    fn should_yield_thread(&self) -> bool {
        false
    }

    // --- Priority overrides ---

    /// Boost the thread identified by `drainer` to at least `priority`.
    fn override_start(&self, _drainer: DrainerId, _priority: JobPriority) {}

    /// End a boost previously started on the current thread.
    fn override_end(&self, _priority: JobPriority) {}

    /// Priority floor of the current thread, or `None` if it cannot be overridden.
    fn thread_override_floor(&self) -> Option<JobPriority> {
        None
    }

    /// Raise the current thread to `priority`.
    fn self_override(&self, _priority: JobPriority) {}

    // --- Ambient context ---

    /// Adopt the ambient context carried by a job about to run.
    fn swap_to_job(&self, _job: &Job) {}

    /// Restore the ambient context saved by a task.
    fn restore_voucher(&self, _task: TaskId) {}

    /// Restore the ambient context that was current before the frame was entered.
    fn leave_voucher(&self) {}
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl RuntimeHooks for NoopHooks {}

impl fmt::Debug for dyn RuntimeHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RuntimeHooks")
    }
}
