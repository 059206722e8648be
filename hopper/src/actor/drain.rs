use std::ptr::NonNull;
use std::sync::Arc;

use hopper_api::job::{Job, JobKind, JobRef, JobVtable};
use hopper_api::priority::JobPriority;

use super::DefaultActor;
use crate::executor::{SerialExecutorRef, TaskExecutorRef};
use crate::task;
use crate::tracking::{run_job_in_established_executor_context, ExecutorTrackingInfo};

/// "Go drain this actor", dispatched to the global or a task executor.
#[repr(C)]
struct ProcessActorJob {
    header: Job,
    actor: Arc<DefaultActor>,
}

impl ProcessActorJob {
    const VTABLE: JobVtable = JobVtable {
        run: Self::run_raw,
        drop: Self::drop_raw,
    };

    fn new(actor: Arc<DefaultActor>, priority: JobPriority) -> JobRef {
        let job = Box::new(ProcessActorJob {
            header: Job::new(JobKind::ProcessActor, priority, &Self::VTABLE),
            actor,
        });
        // SAFETY: `header` is the first field of a `#[repr(C)]` box we leak here.
        unsafe { JobRef::from_raw(NonNull::from(Box::leak(job)).cast()) }
    }

    unsafe fn run_raw(job: NonNull<Job>) {
        // SAFETY: created by `new`, consumed exactly once.
        let job = unsafe { Box::from_raw(job.cast::<ProcessActorJob>().as_ptr()) };
        let actor = job.actor.clone();
        drop(job);
        default_actor_drain(&actor);
        actor.runtime.hooks.processing_job_finished(actor.id);
    }

    unsafe fn drop_raw(job: NonNull<Job>) {
        // SAFETY: created by `new`, dropped without running exactly once.
        let job = unsafe { Box::from_raw(job.cast::<ProcessActorJob>().as_ptr()) };
        tracing::trace!(actor = %job.actor.id, "processing job dropped unrun");
        job.actor.runtime.hooks.processing_job_finished(job.actor.id);
    }
}

/// Dispatches a processing job for `actor`.
///
/// Goes to `task_executor` when it is defined, otherwise to the global
/// executor.
pub(crate) fn schedule_processing_job(
    actor: &Arc<DefaultActor>,
    priority: JobPriority,
    task_executor: TaskExecutorRef,
    stealer: bool,
) {
    actor.runtime.hooks.processing_job_created(actor.id, priority, stealer);
    let job = ProcessActorJob::new(actor.clone(), priority);
    match task_executor {
        TaskExecutorRef::Defined(executor) => {
            crate::log_scheduler!("task_executor", "processing_job_queued", actor = %actor.id, %priority, stealer);
            executor.enqueue(job);
        }
        TaskExecutorRef::Undefined => {
            crate::log_scheduler!("global", "processing_job_queued", actor = %actor.id, %priority, stealer);
            actor.runtime.global.enqueue_global(job);
        }
    }
}

/// Gives up whatever actor the frame still holds if a job unwinds.
pub(crate) struct UnlockOnUnwind<'a> {
    tracking: &'a ExecutorTrackingInfo,
}

impl<'a> UnlockOnUnwind<'a> {
    pub(crate) fn new(tracking: &'a ExecutorTrackingInfo) -> Self {
        UnlockOnUnwind { tracking }
    }
}

impl Drop for UnlockOnUnwind<'_> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        if let SerialExecutorRef::DefaultActor(actor) = self.tracking.active_executor() {
            tracing::warn!(actor = %actor.id, "job panicked while holding the actor, releasing it");
            // SAFETY: the frame only names an actor while this thread holds it.
            unsafe { actor.unlock(true) };
        }
    }
}

/// Runs the jobs of `actor` on the current thread until it runs dry, the
/// thread follows a task elsewhere, or the thread is asked to yield.
pub(crate) fn default_actor_drain(actor: &Arc<DefaultActor>) {
    if !actor.try_lock(true) {
        tracing::trace!(actor = %actor.id, "lost the race for the actor");
        return;
    }

    let span = crate::actor_span!(actor.id);
    let _entered = span.enter();

    let runtime = actor.runtime.clone();
    let max_jobs = runtime.config.max_jobs_per_drain;
    let tracking = ExecutorTrackingInfo::new(Some(runtime.hooks.clone()));

    tracking.enter_and_shadow(
        SerialExecutorRef::DefaultActor(actor.clone()),
        TaskExecutorRef::Undefined,
        |tracking| {
            let _unwind = UnlockOnUnwind::new(tracking);
            let mut current = actor.clone();
            let mut jobs_run = 0usize;

            loop {
                // SAFETY: this thread holds `current`'s lock throughout the loop.
                match unsafe { current.drain_one() } {
                    None => {
                        if unsafe { current.unlock(false) } {
                            tracking.set_active_executor(SerialExecutorRef::Generic);
                            break;
                        }
                    }
                    Some(job) => {
                        tracking.set_task_executor(task::task_executor_preference(&job));

                        run_job_in_established_executor_context(job);
                        jobs_run += 1;

                        match tracking.active_executor() {
                            SerialExecutorRef::DefaultActor(next) => current = next,
                            _ => {
                                tracing::trace!(jobs_run, "thread left the actor");
                                break;
                            }
                        }
                    }
                }

                let limit_reached = max_jobs.is_some_and(|max| jobs_run >= max);
                if limit_reached || runtime.hooks.should_yield_thread() {
                    tracing::debug!(actor = %current.id, jobs_run, "yielding drainer thread");
                    tracking.set_active_executor(SerialExecutorRef::Generic);
                    // SAFETY: still the lock holder.
                    unsafe { current.unlock(true) };
                    break;
                }

                // SAFETY: still the lock holder.
                unsafe { current.process_incoming_queue() };
            }
        },
    );
}
