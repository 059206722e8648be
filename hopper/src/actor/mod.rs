//! # Default actors
//!
//! A default actor serializes the jobs enqueued on it. All of its shared
//! state lives in one atomic [`ActorStatus`] word; the jobs it has already
//! claimed live in a [`PriorityQueue`] that only the lock holder touches.
//!
//! ## Key Concepts
//! - **Incoming list**: a lock-free LIFO stack whose head is stored in the
//!   status word. `enqueue` pushes onto it with a single CAS.
//! - **Prioritized jobs**: the lock holder periodically claims the incoming
//!   list, reverses it into FIFO order and buckets it by priority.
//! - **Processing jobs**: "go drain this actor" jobs dispatched to the global
//!   executor. Extra ones ("stealers") carry priority escalations.
//!
//! ## Ownership
//!
//! Let R = 1 if the actor has queued or running work, and N the number of
//! live processing jobs for it. The scheduler keeps `N >= R`, and each of the
//! `N - R` extra processing jobs holds one retain on the actor:
//!
//! 1. `enqueue` that moves Idle → Scheduled dispatches the owning job, no retain.
//! 2. `enqueue`/`enqueue_stealer` that escalates a Scheduled actor retains
//!    and dispatches a stealer.
//! 3. A drainer that wins `try_lock` becomes the owning job.
//! 4. A drainer that loses `try_lock` releases its retain.
//! 5. `unlock` to Idle drops R to 0 together with the owning job.
//! 6. A forced `unlock` with work left dispatches a replacement owning job.
//!
//! The retain count is a logical count driving destruction. Storage is kept
//! alive separately by `Arc`, so a zombie is only freed once the thread that
//! still runs it lets go.

mod drain;
pub mod queue;
pub mod status;

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{self, AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use hopper_api::errors::RuntimeViolation;
use hopper_api::job::{Job, JobRef};
use hopper_api::priority::JobPriority;
use hopper_api::types::{ActorId, DrainerId};

use crate::executor::{SerialExecutorRef, TaskExecutorRef};
use crate::runtime::RuntimeShared;
use crate::task;
use crate::tracking::current_thread_token;

pub(crate) use drain::{default_actor_drain, schedule_processing_job, UnlockOnUnwind};
use queue::{reverse_chain, PriorityQueue};
pub use status::ActorStatus;
use status::AtomicActorStatus;

pub type DeinitWork = Box<dyn FnOnce() + Send>;

/// Options accepted by [`Runtime::new_actor_with`](crate::runtime::Runtime::new_actor_with).
#[derive(Default)]
pub struct ActorOptions {
    /// Marks the actor as a local proxy for a remote distributed actor.
    pub distributed_remote: bool,
    /// Runs once when the last [`ActorRef`] is dropped, before teardown.
    pub deinit: Option<DeinitWork>,
}

impl fmt::Debug for ActorOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorOptions")
            .field("distributed_remote", &self.distributed_remote)
            .field("deinit", &self.deinit.is_some())
            .finish()
    }
}

/// The built-in serial executor.
pub struct DefaultActor {
    status: AtomicActorStatus,
    prioritized_jobs: UnsafeCell<PriorityQueue>,
    retain_count: AtomicUsize,
    deallocated: AtomicBool,
    id: ActorId,
    distributed_remote: bool,
    deinit: Mutex<Option<DeinitWork>>,
    runtime: Arc<RuntimeShared>,
}

// `prioritized_jobs` is only reached through `jobs()`, whose callers hold the
// actor lock; everything else is atomic or behind a mutex.
unsafe impl Sync for DefaultActor {}

impl DefaultActor {
    /// Creates an idle actor with a retain count of one.
    pub(crate) fn initialize(runtime: Arc<RuntimeShared>, options: ActorOptions) -> Arc<DefaultActor> {
        let actor = Arc::new(DefaultActor {
            status: AtomicActorStatus::new(ActorStatus::idle()),
            prioritized_jobs: UnsafeCell::new(PriorityQueue::new()),
            retain_count: AtomicUsize::new(1),
            deallocated: AtomicBool::new(false),
            id: ActorId::new(),
            distributed_remote: options.distributed_remote,
            deinit: Mutex::new(options.deinit),
            runtime,
        });
        actor.runtime.hooks.actor_retained(actor.id, 1);
        tracing::trace!(actor = %actor.id, remote = actor.distributed_remote, "actor initialized");
        actor
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    /// Passthrough marker for distributed actors; never consulted by the scheduler.
    pub fn is_distributed_remote(&self) -> bool {
        self.distributed_remote
    }

    /// Snapshot of the status word.
    pub fn status(&self) -> ActorStatus {
        self.status.load(Ordering::Relaxed)
    }

    /// Current logical retain count.
    pub fn retain_count(&self) -> usize {
        self.retain_count.load(Ordering::Relaxed)
    }

    pub fn is_deallocated(&self) -> bool {
        self.deallocated.load(Ordering::Acquire)
    }

    pub(crate) fn runtime(&self) -> &Arc<RuntimeShared> {
        &self.runtime
    }

    /// # Safety
    /// The caller must hold the actor lock.
    #[allow(clippy::mut_from_ref)]
    unsafe fn jobs(&self) -> &mut PriorityQueue {
        // SAFETY: exclusive access is guaranteed by the lock per the contract.
        unsafe { &mut *self.prioritized_jobs.get() }
    }

    fn fatal(&self, violation: RuntimeViolation) -> ! {
        crate::error::fatal_error(self.runtime.config.fatal_policy, violation)
    }

    fn unexpected_state(&self, status: ActorStatus, operation: &'static str) -> ! {
        self.fatal(RuntimeViolation::UnexpectedState {
            actor: self.id,
            state: status.state(),
            operation,
        })
    }

    /// Fatal once the last reference is gone, whether or not the storage
    /// has been freed yet.
    fn ensure_alive(&self, operation: &'static str) {
        if self.is_deallocated() || self.status.load(Ordering::Acquire).is_zombie() {
            self.fatal(RuntimeViolation::UseAfterDeallocation { actor: self.id, operation });
        }
    }

    fn trace_transition(&self, operation: &'static str, old: ActorStatus, new: ActorStatus) {
        if old.state() != new.state() {
            self.runtime.hooks.actor_state_changed(self.id, old.state(), new.state());
        }
        crate::log_transition!(
            self.id,
            operation,
            old.state(),
            new.state(),
            max_priority = %new.max_priority(),
            escalated = new.is_max_priority_escalated()
        );
    }

    fn drainer_token(&self) -> DrainerId {
        if self.runtime.escalation {
            current_thread_token()
        } else {
            0
        }
    }

    // --- Reference counting ---

    pub(crate) fn retain(&self) {
        let count = self.retain_count.fetch_add(1, Ordering::Relaxed) + 1;
        self.runtime.hooks.actor_retained(self.id, count);
    }

    pub(crate) fn release(self: &Arc<Self>) {
        let previous = self.retain_count.fetch_sub(1, Ordering::Release);
        if previous == 0 {
            self.fatal(RuntimeViolation::OverRelease { actor: self.id });
        }
        self.runtime.hooks.actor_released(self.id, previous - 1);
        if previous == 1 {
            atomic::fence(Ordering::Acquire);
            self.tear_down();
        }
    }

    fn tear_down(self: &Arc<Self>) {
        let deinit = self
            .deinit
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(work) = deinit {
            work();
        }
        self.destroy();
        self.deallocate();
    }

    /// Checks that the actor can be torn down.
    ///
    /// Fatal if anything still holds a retain or jobs are linked into the
    /// incoming list. A running actor is allowed; its drainer finishes the
    /// teardown through the zombie state.
    pub(crate) fn destroy(&self) {
        let count = self.retain_count.load(Ordering::Acquire);
        if count > 0 {
            self.fatal(RuntimeViolation::NonZeroRetainCount { actor: self.id, count });
        }

        let status = self.status.load(Ordering::Acquire);
        if !status.first_unprioritized_job().is_null() {
            self.fatal(RuntimeViolation::DestroyedWithQueuedJobs { actor: self.id });
        }
        if status.is_idle() {
            return;
        }
        if !status.is_running() {
            self.unexpected_state(status, "destroy");
        }
    }

    /// Frees the actor now if idle, or marks it a zombie if still running.
    pub(crate) fn deallocate(&self) {
        let mut old = self.status.load(Ordering::Relaxed);
        while old.is_running() {
            let new = old.with_zombie();
            if self
                .status
                .compare_exchange_weak(&mut old, new, Ordering::Relaxed, Ordering::Relaxed)
            {
                self.trace_transition("deallocate", old, new);
                return;
            }
        }
        if !old.is_idle() {
            self.unexpected_state(old, "deallocate");
        }
        self.deallocate_unconditional();
    }

    fn deallocate_unconditional(&self) {
        if self.deallocated.swap(true, Ordering::AcqRel) {
            return;
        }
        self.runtime.hooks.actor_deallocated(self.id);
        tracing::trace!(actor = %self.id, "actor deallocated");
    }

    // --- Job intake ---

    /// Links `job` onto the incoming list and schedules the actor if needed.
    pub(crate) fn enqueue(self: &Arc<Self>, job: JobRef, priority: JobPriority) {
        self.ensure_alive("enqueue");
        let job = job.into_raw().as_ptr();
        let escalation = self.runtime.escalation;
        let mut task_executor: Option<TaskExecutorRef> = None;

        let mut old = self.status.load(Ordering::Relaxed);
        loop {
            // SAFETY: the job is ours until the CAS below publishes it.
            unsafe { (*job).set_next_link(old.first_unprioritized_job()) };
            let mut new = old.with_first_unprioritized_job(job);

            if old.is_idle() {
                new = new.with_scheduled().with_new_priority(priority);
            } else if escalation
                && (old.is_scheduled() || old.is_running())
                && priority > old.max_priority()
            {
                new = new.with_escalated_priority(priority);
            }

            let needs_scheduling = !old.is_scheduled() && new.is_scheduled();
            let needs_stealer = old.max_priority() != new.max_priority() && new.is_scheduled();
            if (needs_scheduling || needs_stealer) && task_executor.is_none() {
                // SAFETY: still unpublished, see above.
                task_executor = Some(task::task_executor_preference(unsafe { &*job }));
            }

            // Release publishes the job body to the drainer that claims it.
            if self
                .status
                .compare_exchange_weak(&mut old, new, Ordering::Release, Ordering::Relaxed)
            {
                // The job may be running elsewhere from here on.
                self.trace_transition("enqueue", old, new);
                let task_executor = task_executor.unwrap_or_default();

                if !old.is_scheduled() && new.is_scheduled() {
                    // Ownership rule 1.
                    schedule_processing_job(self, new.max_priority(), task_executor, false);
                    return;
                }

                if old.max_priority() != new.max_priority() {
                    if new.is_running() {
                        if let Some(drainer) = new.current_drainer() {
                            tracing::debug!(actor = %self.id, drainer, %priority, "boosting drainer");
                            self.runtime.hooks.override_start(drainer, priority);
                        }
                    } else {
                        // Ownership rule 2.
                        self.retain();
                        tracing::debug!(actor = %self.id, priority = %new.max_priority(), "scheduling stealer");
                        schedule_processing_job(self, new.max_priority(), task_executor, true);
                    }
                }
                return;
            }
        }
    }

    /// Propagates a priority raise of a job already on this actor.
    ///
    /// `task_executor` is the preference of the escalated task, used if a
    /// stealer has to be dispatched.
    pub(crate) fn enqueue_stealer(self: &Arc<Self>, task_executor: TaskExecutorRef, priority: JobPriority) {
        if !self.runtime.escalation {
            return;
        }
        let mut old = self.status.load(Ordering::Relaxed);
        loop {
            if old.is_idle() {
                // Either the job already ran, and its thread will notice the
                // escalation itself, or it is mid-enqueue and the enqueuer will
                // see the new priority.
                return;
            }
            if !(old.is_scheduled() || old.is_running()) || priority <= old.max_priority() {
                return;
            }
            let new = old.with_escalated_priority(priority);

            if self
                .status
                .compare_exchange_weak(&mut old, new, Ordering::Relaxed, Ordering::Relaxed)
            {
                self.trace_transition("enqueue_stealer", old, new);
                if new.is_running() {
                    if let Some(drainer) = new.current_drainer() {
                        tracing::debug!(actor = %self.id, drainer, %priority, "boosting drainer");
                        self.runtime.hooks.override_start(drainer, priority);
                    }
                } else if new.is_scheduled() {
                    // Ownership rule 2.
                    self.retain();
                    tracing::debug!(actor = %self.id, priority = %new.max_priority(), "scheduling stealer");
                    schedule_processing_job(self, new.max_priority(), task_executor, true);
                }
                return;
            }
        }
    }

    /// Moves newly arrived jobs from the incoming list into the priority queue.
    ///
    /// # Safety
    /// The caller must hold the actor lock.
    pub(crate) unsafe fn process_incoming_queue(&self) {
        // Acquire pairs with the release in `enqueue`.
        let mut old = self.status.load(Ordering::Acquire);
        loop {
            if old.first_unprioritized_job().is_null() {
                return;
            }
            debug_assert!(old.is_any_running());
            let new = old.with_first_unprioritized_job(std::ptr::null_mut());
            if self
                .status
                .compare_exchange_weak(&mut old, new, Ordering::Acquire, Ordering::Acquire)
            {
                break;
            }
        }
        // SAFETY: the chain was detached by the CAS and the lock is held.
        unsafe { self.handle_unprioritized_jobs(old.first_unprioritized_job()) };
    }

    /// # Safety
    /// Lock held, `head` a detached incoming chain.
    unsafe fn handle_unprioritized_jobs(&self, head: *mut Job) {
        if head.is_null() {
            return;
        }
        // SAFETY: per contract.
        unsafe {
            let fifo = reverse_chain(head);
            self.jobs().enqueue_contents_of(fifo);
        }
    }

    /// Pops the next job to run.
    ///
    /// # Safety
    /// The caller must hold the actor lock.
    pub(crate) unsafe fn drain_one(&self) -> Option<JobRef> {
        // SAFETY: lock held per contract.
        let job = unsafe { self.jobs().dequeue() };
        match &job {
            Some(job) => tracing::trace!(actor = %self.id, priority = %job.priority(), "drained job"),
            None => tracing::trace!(actor = %self.id, "no jobs to drain"),
        }
        job
    }

    // --- Locking ---

    /// Tries to make the current thread the actor's drainer.
    ///
    /// As a drainer (a processing job), succeeds only on a Scheduled actor and
    /// claims the incoming list. A losing drainer gives back its ownership
    /// unit. Otherwise (thread donation) succeeds only on an Idle actor.
    pub(crate) fn try_lock(self: &Arc<Self>, as_drainer: bool) -> bool {
        self.ensure_alive("try_lock");
        let escalation = self.runtime.escalation;
        let hooks = &self.runtime.hooks;
        let mut override_floor = if escalation { hooks.thread_override_floor() } else { None };

        'retry: loop {
            let mut old = self.status.load(Ordering::Relaxed);
            loop {
                let mut expect_no_jobs = false;
                if as_drainer {
                    if !old.is_scheduled() {
                        if escalation {
                            // Ownership rule 4.
                            self.release();
                            return false;
                        }
                        self.unexpected_state(old, "try_lock");
                    }
                    if let Some(floor) = override_floor {
                        let max = old.max_priority();
                        if max > floor {
                            tracing::debug!(actor = %self.id, %max, %floor, "self-overriding drainer thread");
                            hooks.self_override(max);
                            override_floor = Some(max);
                            continue 'retry;
                        }
                    }
                } else {
                    if !old.is_idle() {
                        return false;
                    }
                    debug_assert_eq!(old.max_priority(), JobPriority::Unspecified);
                    debug_assert!(old.first_unprioritized_job().is_null());
                    expect_no_jobs = true;
                }

                let mut new = old.with_running(self.drainer_token()).without_escalated_priority();
                if as_drainer {
                    new = new.with_first_unprioritized_job(std::ptr::null_mut());
                }

                if self
                    .status
                    .compare_exchange_weak(&mut old, new, Ordering::Acquire, Ordering::Relaxed)
                {
                    if expect_no_jobs {
                        // SAFETY: we hold the lock now.
                        debug_assert!(unsafe { self.jobs().is_empty() });
                    }
                    self.trace_transition("try_lock", old, new);
                    if as_drainer {
                        // SAFETY: the chain was claimed by the CAS, lock held.
                        unsafe { self.handle_unprioritized_jobs(old.first_unprioritized_job()) };
                    }
                    return true;
                }
            }
        }
    }

    /// Gives up the actor lock.
    ///
    /// With work left, fails unless `force`, in which case the actor goes back
    /// to Scheduled and a replacement processing job is dispatched. A zombie
    /// is freed instead.
    ///
    /// # Safety
    /// The caller must hold the actor lock.
    pub(crate) unsafe fn unlock(self: &Arc<Self>, force: bool) -> bool {
        let mut old = self.status.load(Ordering::Relaxed);
        loop {
            debug_assert!(old.is_any_running());

            if old.is_zombie() {
                if old.is_max_priority_escalated() {
                    self.runtime.hooks.override_end(old.max_priority());
                }
                self.deallocate_unconditional();
                return true;
            }

            // SAFETY: lock held per contract.
            let has_work = unsafe { !self.jobs().is_empty() } || !old.first_unprioritized_job().is_null();
            let new = if has_work {
                if !force {
                    return false;
                }
                old.with_scheduled().without_escalated_priority()
            } else {
                old.with_idle().reset_priority()
            };

            if self
                .status
                .compare_exchange_weak(&mut old, new, Ordering::Release, Ordering::Relaxed)
            {
                self.trace_transition("unlock", old, new);
                if new.is_scheduled() {
                    // Ownership rule 6.
                    schedule_processing_job(self, new.max_priority(), TaskExecutorRef::Undefined, false);
                }
                // Only after re-enqueueing, so the boost is not lost in between.
                if old.is_max_priority_escalated() {
                    self.runtime.hooks.override_end(old.max_priority());
                }
                return true;
            }
        }
    }
}

impl Drop for DefaultActor {
    fn drop(&mut self) {
        // Jobs still on the incoming list are dropped with the prioritized ones.
        let head = self.status.load(Ordering::Acquire).first_unprioritized_job();
        if !head.is_null() {
            // SAFETY: exclusive access, and nothing else owns the chain anymore.
            unsafe { self.prioritized_jobs.get_mut().enqueue_contents_of(head) };
        }
    }
}

impl fmt::Debug for DefaultActor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultActor")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("retain_count", &self.retain_count())
            .field("distributed_remote", &self.distributed_remote)
            .finish()
    }
}

/// Retaining handle to a default actor.
///
/// Cloning retains, dropping releases. Dropping the last handle runs the
/// actor's deinit work and tears it down; if the actor is still running at
/// that point, teardown completes when its drainer unlocks it.
pub struct ActorRef {
    actor: Arc<DefaultActor>,
}

impl ActorRef {
    pub(crate) fn from_initialized(actor: Arc<DefaultActor>) -> Self {
        ActorRef { actor }
    }

    /// Enqueues a job at its own priority.
    pub fn enqueue(&self, job: JobRef) {
        let priority = job.priority();
        self.actor.enqueue(job, priority);
    }

    /// The actor as an executor for switches, spawns and isolation checks.
    pub fn executor(&self) -> SerialExecutorRef {
        SerialExecutorRef::DefaultActor(self.actor.clone())
    }
}

impl Clone for ActorRef {
    fn clone(&self) -> Self {
        self.actor.retain();
        ActorRef {
            actor: self.actor.clone(),
        }
    }
}

impl Drop for ActorRef {
    fn drop(&mut self) {
        self.actor.release();
    }
}

impl Deref for ActorRef {
    type Target = DefaultActor;

    fn deref(&self) -> &DefaultActor {
        &self.actor
    }
}

impl fmt::Debug for ActorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ActorRef").field(&self.actor).finish()
    }
}

impl PartialEq for ActorRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.actor, &other.actor)
    }
}

impl Eq for ActorRef {}
