//! Moving tasks between executors, and the entry points executors use to
//! run jobs.
//!
//! [`task_switch`] is how a running task continues on another executor.
//! Three outcomes, cheapest first:
//!
//! 1. **Inline**: the thread already acts for the target, the continuation
//!    runs right away.
//! 2. **Donation**: the current executor can give up the thread and the
//!    target can take it without waiting (a generic executor, or an idle
//!    default actor). The thread unlocks what it held and runs the
//!    continuation for the target.
//! 3. **Async**: the task is parked and enqueued on the target; the
//!    current thread returns to whatever it was draining.

use std::sync::Arc;

use hopper_api::errors::RuntimeViolation;
use hopper_api::job::{ClosureJob, JobKind, JobRef};
use hopper_api::priority::JobPriority;

use crate::actor::{DeinitWork, UnlockOnUnwind};
use crate::error::fatal_error;
use crate::executor::{SerialExecutorRef, TaskExecutorRef};
use crate::isolation;
use crate::runtime::RuntimeShared;
use crate::task::{self, Task};
use crate::tracking::{current_task, run_job_in_established_executor_context, ActiveTask, ExecutorTrackingInfo};
use crate::config::ExecutorCheckMode;

/// Continues the current task on `target` by calling `resume`.
///
/// Must be the last thing a continuation does: once this returns, the task
/// may already be running `resume` on another thread.
///
/// # Panics
/// Fatal if called outside of a task.
pub fn task_switch<F>(target: SerialExecutorRef, resume: F)
where
    F: FnOnce(&Task) + Send + 'static,
{
    let Some(task) = ActiveTask::get() else {
        fatal_error(
            crate::config::RuntimeConfig::process_default().fatal_policy,
            RuntimeViolation::NoCurrentTask { operation: "task_switch" },
        );
    };
    let runtime = task.runtime().clone();

    let (current_executor, current_task_executor, allows_switching, tracking) =
        ExecutorTrackingInfo::with_current(|frame| match frame {
            Some(frame) => (frame.active_executor(), frame.task_executor(), frame.allows_switching(), true),
            None => (SerialExecutorRef::Generic, TaskExecutorRef::Undefined, true, false),
        });
    let new_task_executor = task.preferred_task_executor().clone();

    if !must_switch_to_run(&current_executor, &target, &current_task_executor, &new_task_executor) {
        tracing::trace!(task = %task.id(), executor = ?target, "switch runs inline");
        resume(&task);
        return;
    }

    task.park(Box::new(resume));

    if current_task_executor.is_undefined()
        && can_give_up_thread_for_switch(allows_switching, &current_executor)
        && !runtime.hooks.should_yield_thread()
        && try_assume_thread_for_switch(&target, &new_task_executor)
    {
        tracing::trace!(task = %task.id(), from = ?current_executor, to = ?target, "switch assumed thread");
        give_up_thread_for_switch(&current_executor);
        run_on_assumed_thread(&runtime, &task, target, tracking);
        return;
    }

    tracing::trace!(task = %task.id(), to = ?target, "switch enqueues task");
    ActiveTask::set(None);
    task.flag_as_and_enqueue_on_executor(&target);
}

/// A switch is needed when the serial executor or the task executor differ.
pub(crate) fn must_switch_to_run(
    current: &SerialExecutorRef,
    target: &SerialExecutorRef,
    current_task_executor: &TaskExecutorRef,
    new_task_executor: &TaskExecutorRef,
) -> bool {
    current != target || current_task_executor != new_task_executor
}

pub(crate) fn can_give_up_thread_for_switch(allows_switching: bool, current: &SerialExecutorRef) -> bool {
    if !allows_switching {
        return false;
    }
    match current {
        SerialExecutorRef::Generic => true,
        SerialExecutorRef::GenericSynchronousStart => false,
        SerialExecutorRef::DefaultActor(_) => true,
        SerialExecutorRef::Custom(_) => false,
    }
}

pub(crate) fn try_assume_thread_for_switch(target: &SerialExecutorRef, new_task_executor: &TaskExecutorRef) -> bool {
    match target {
        SerialExecutorRef::Generic | SerialExecutorRef::GenericSynchronousStart => new_task_executor.is_undefined(),
        SerialExecutorRef::DefaultActor(actor) => actor.try_lock(false),
        SerialExecutorRef::Custom(_) => false,
    }
}

/// Only called after `can_give_up_thread_for_switch` said yes.
pub(crate) fn give_up_thread_for_switch(current: &SerialExecutorRef) {
    if let SerialExecutorRef::DefaultActor(actor) = current {
        // SAFETY: the current frame names this actor, so this thread holds it.
        unsafe { actor.unlock(true) };
    }
}

/// Continues `task` on the executor this thread has just assumed.
///
/// Reuses the current frame when there is one. Otherwise a frame is set up
/// for the duration, and an actor still held afterwards is given up.
pub(crate) fn run_on_assumed_thread(runtime: &Arc<RuntimeShared>, task: &Task, executor: SerialExecutorRef, has_frame: bool) {
    if has_frame {
        ExecutorTrackingInfo::with_current(|frame| {
            if let Some(frame) = frame {
                frame.set_active_executor(executor);
                frame.set_task_executor(task.preferred_task_executor().clone());
            }
        });
        task.run_continuation();
        return;
    }

    let frame = ExecutorTrackingInfo::new(Some(runtime.hooks.clone()));
    let ended_on = frame.enter_and_shadow(executor, task.preferred_task_executor().clone(), |frame| {
        let _unwind = UnlockOnUnwind::new(frame);
        task.run_continuation();
        frame.active_executor()
    });
    tracing::trace!(executor = ?ended_on, "leaving assumed thread");
    if let SerialExecutorRef::DefaultActor(actor) = ended_on {
        // SAFETY: the frame ended on this actor, which this thread still holds.
        unsafe { actor.unlock(true) };
    }
}

/// Hands `job` to `executor`. Generic work goes to the job's preferred task
/// executor if it is a task that has one.
pub(crate) fn enqueue(runtime: &RuntimeShared, job: JobRef, executor: &SerialExecutorRef) {
    job.clear_scheduler_private();
    executor.enqueue(runtime, job);
}

/// Runs `job` on behalf of `executor`.
///
/// Switching off the executor is only allowed when it is generic; if the
/// job then leaves the thread on a default actor, that actor is given up.
pub(crate) fn run_job(runtime: &Arc<RuntimeShared>, job: JobRef, executor: SerialExecutorRef) {
    let frame = ExecutorTrackingInfo::new(Some(runtime.hooks.clone()));
    if !executor.is_generic() {
        frame.disallow_switching();
    }
    let task_executor = if executor.is_generic() {
        task::task_executor_preference(&job)
    } else {
        TaskExecutorRef::Undefined
    };

    let ended_on = frame.enter_and_shadow(executor, task_executor, |frame| {
        let _unwind = frame.allows_switching().then(|| UnlockOnUnwind::new(frame));
        run_job_in_established_executor_context(job);
        frame.active_executor()
    });

    if frame.allows_switching() {
        if let SerialExecutorRef::DefaultActor(actor) = ended_on {
            // SAFETY: the thread switched onto this actor and still holds it.
            unsafe { actor.unlock(true) };
        }
    }
}

pub(crate) fn run_job_on_task_executor(runtime: &Arc<RuntimeShared>, job: JobRef, task_executor: TaskExecutorRef) {
    run_job_on_serial_and_task_executor(runtime, job, SerialExecutorRef::Generic, task_executor);
}

/// Runs `job` for both executors. Switching is never allowed.
pub(crate) fn run_job_on_serial_and_task_executor(
    runtime: &Arc<RuntimeShared>,
    job: JobRef,
    serial: SerialExecutorRef,
    task_executor: TaskExecutorRef,
) {
    let frame = ExecutorTrackingInfo::new(Some(runtime.hooks.clone()));
    frame.disallow_switching();
    frame.enter_and_shadow(serial, task_executor, |_| run_job_in_established_executor_context(job));
}

/// Starts `task` on the calling thread.
///
/// A generic target runs it right here under an executor that refuses to
/// give up the thread. Any other target must already be the current
/// executor.
pub(crate) fn start_synchronously(runtime: &Arc<RuntimeShared>, task: Task, target: SerialExecutorRef) {
    if target.is_generic() {
        let _scope = ActiveTask::scope(Some(task.clone()));
        run_job(runtime, task.into_job(), SerialExecutorRef::GenericSynchronousStart);
        return;
    }

    if !isolation::is_current_executor(runtime, &target) {
        fatal_error(
            runtime.config.fatal_policy,
            RuntimeViolation::IsolationAssumption(format!(
                "start_synchronously must be called on {:?}",
                target
            )),
        );
    }
    let _scope = ActiveTask::scope(None);
    run_job(runtime, task.into_job(), target);
}

/// Runs `work` isolated to `executor`, inline if possible.
pub(crate) fn deinit_on_executor(runtime: &Arc<RuntimeShared>, executor: SerialExecutorRef, work: DeinitWork) {
    if isolation::is_current_executor_with_mode(runtime, &executor, ExecutorCheckMode::Legacy) {
        work();
        return;
    }

    if let SerialExecutorRef::DefaultActor(actor) = &executor {
        // Keep whatever this thread holds; taking a second actor without
        // waiting cannot deadlock.
        if actor.try_lock(false) {
            let frame = ExecutorTrackingInfo::new(Some(runtime.hooks.clone()));
            frame.enter_and_shadow(executor.clone(), TaskExecutorRef::Undefined, |frame| {
                let _unwind = UnlockOnUnwind::new(frame);
                work()
            });
            // SAFETY: locked above.
            unsafe { actor.unlock(true) };
            return;
        }
    }

    let priority = current_task()
        .map(|task| task.priority())
        .unwrap_or(JobPriority::Default);
    tracing::debug!(executor = ?executor, %priority, "deferring isolated deinit");
    let job = ClosureJob::with_kind(JobKind::IsolatedDeinit, priority, work);
    enqueue(runtime, job, &executor);
}

/// Raises `task` to `priority` and lets `executor` know.
pub(crate) fn escalate(executor: &SerialExecutorRef, task: &Task, priority: JobPriority) {
    let previous = task.raise_priority(priority);
    if previous >= priority {
        return;
    }
    tracing::debug!(task = %task.id(), from = %previous, to = %priority, "escalating task");
    if let SerialExecutorRef::DefaultActor(actor) = executor {
        actor.enqueue_stealer(task.preferred_task_executor().clone(), priority);
    }
}
