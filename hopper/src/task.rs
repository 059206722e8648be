//! Tasks: self-owning job records with a resumable continuation.
//!
//! A [`Task`] is scheduled like any other job, but instead of a one-shot
//! body it carries a parked continuation. Running the task takes the
//! continuation and calls it with the task itself; the continuation may
//! hop to another executor with [`task_switch`](crate::switch::task_switch),
//! which parks a new continuation. The task completes when a continuation
//! returns without having parked another one.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use futures::channel::oneshot;

use hopper_api::errors::{RuntimeViolation, TaskError};
use hopper_api::job::{Job, JobKind, JobRef, JobVtable};
use hopper_api::priority::JobPriority;
use hopper_api::types::TaskId;

use crate::executor::{SerialExecutorRef, TaskExecutorRef};
use crate::runtime::{Runtime, RuntimeShared};
use crate::switch;

/// A continuation of a task. Receives the task it runs for.
pub type Continuation = Box<dyn FnOnce(&Task) + Send>;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskStatus {
    /// Created or parked, not on any executor
    Suspended = 0,
    /// Handed to an executor, waiting to run
    Enqueued = 1,
    /// Running on some thread
    Running = 2,
    /// Finished; the continuation will not be called again
    Completed = 3,
}

impl TaskStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => TaskStatus::Suspended,
            1 => TaskStatus::Enqueued,
            2 => TaskStatus::Running,
            _ => TaskStatus::Completed,
        }
    }
}

#[repr(C)]
struct TaskInner {
    header: Job,
    id: TaskId,
    name: Option<String>,
    base_priority: JobPriority,
    preferred_task_executor: TaskExecutorRef,
    runtime: Arc<RuntimeShared>,
    continuation: Mutex<Option<Continuation>>,
    status: AtomicU8,
    completion: Mutex<Option<oneshot::Sender<()>>>,
}

const TASK_VTABLE: JobVtable = JobVtable {
    run: run_task_job,
    drop: drop_task_job,
};

/// Runs a task handed over by an executor that did not set up any context,
/// as if the generic executor ran it.
unsafe fn run_task_job(job: NonNull<Job>) {
    // SAFETY: only task records carry this vtable.
    let task = Task(unsafe { Arc::from_raw(job.cast::<TaskInner>().as_ptr()) });
    let runtime = task.0.runtime.clone();
    switch::run_job(&runtime, task.into_job(), SerialExecutorRef::Generic);
}

unsafe fn drop_task_job(job: NonNull<Job>) {
    // SAFETY: only task records carry this vtable.
    drop(unsafe { Arc::from_raw(job.cast::<TaskInner>().as_ptr()) });
}

/// Shared handle to a task record.
#[derive(Clone)]
pub struct Task(Arc<TaskInner>);

impl Task {
    pub(crate) fn new(
        runtime: Arc<RuntimeShared>,
        priority: JobPriority,
        preferred_task_executor: TaskExecutorRef,
        name: Option<String>,
        continuation: Continuation,
    ) -> (Task, TaskHandle) {
        let (tx, rx) = oneshot::channel();
        let id = TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed));
        let task = Task(Arc::new(TaskInner {
            header: Job::new(JobKind::Task, priority, &TASK_VTABLE),
            id,
            name,
            base_priority: priority,
            preferred_task_executor,
            runtime,
            continuation: Mutex::new(Some(continuation)),
            status: AtomicU8::new(TaskStatus::Suspended as u8),
            completion: Mutex::new(Some(tx)),
        }));
        tracing::trace!(task = %id, %priority, "task created");
        (task, TaskHandle { id, rx, finished: false })
    }

    /// Reclaims the task owned by a task job.
    ///
    /// # Safety
    /// `job` must have been produced by [`Task::into_job`].
    pub(crate) unsafe fn from_job(job: JobRef) -> Task {
        debug_assert!(job.is_task());
        // SAFETY: per contract the header is the first field of a `TaskInner`
        // whose `Arc` reference the job owns.
        Task(unsafe { Arc::from_raw(job.into_raw().cast::<TaskInner>().as_ptr()) })
    }

    /// Turns this reference into a schedulable job.
    pub(crate) fn into_job(self) -> JobRef {
        let raw = Arc::into_raw(self.0) as *mut TaskInner;
        // SAFETY: `Arc::into_raw` is never null and the header is the first
        // field of the `#[repr(C)]` record.
        unsafe { JobRef::from_raw(NonNull::new_unchecked(raw).cast::<Job>()) }
    }

    pub fn id(&self) -> TaskId {
        self.0.id
    }

    pub fn name(&self) -> Option<&str> {
        self.0.name.as_deref()
    }

    /// Current, possibly escalated, priority.
    pub fn priority(&self) -> JobPriority {
        self.0.header.priority()
    }

    /// Priority the task was created with.
    pub fn base_priority(&self) -> JobPriority {
        self.0.base_priority
    }

    pub fn preferred_task_executor(&self) -> &TaskExecutorRef {
        &self.0.preferred_task_executor
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus::from_u8(self.0.status.load(Ordering::Acquire))
    }

    pub fn is_completed(&self) -> bool {
        self.status() == TaskStatus::Completed
    }

    pub fn ptr_eq(&self, other: &Task) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn runtime(&self) -> &Arc<RuntimeShared> {
        &self.0.runtime
    }

    /// Raises the task's priority, returning the previous one.
    pub(crate) fn raise_priority(&self, priority: JobPriority) -> JobPriority {
        self.0.header.raise_priority(priority)
    }

    /// Stores the continuation to run when the task is next resumed.
    pub(crate) fn park(&self, continuation: Continuation) {
        let previous = self
            .0
            .continuation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(continuation);
        debug_assert!(previous.is_none(), "task parked twice");
    }

    pub(crate) fn flag_as_running(&self) {
        self.0.status.store(TaskStatus::Running as u8, Ordering::Release);
    }

    /// Hands the task to `executor`.
    ///
    /// A task can be on at most one executor at a time, and a completed task
    /// never runs again; both are fatal.
    pub(crate) fn flag_as_and_enqueue_on_executor(self, executor: &SerialExecutorRef) {
        let previous = self.0.status.swap(TaskStatus::Enqueued as u8, Ordering::AcqRel);
        match TaskStatus::from_u8(previous) {
            TaskStatus::Suspended | TaskStatus::Running => {}
            status => {
                self.0.status.store(previous, Ordering::Release);
                crate::error::fatal_error(
                    self.0.runtime.config.fatal_policy,
                    RuntimeViolation::SchedulingFailed(format!("{} is already {:?}", self.0.id, status)),
                );
            }
        }
        tracing::trace!(task = %self.0.id, executor = ?executor, "task enqueued");
        let runtime = self.0.runtime.clone();
        switch::enqueue(&runtime, self.into_job(), executor);
    }

    /// Takes the parked continuation and calls it.
    pub(crate) fn run_continuation(&self) {
        let continuation = self
            .0
            .continuation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match continuation {
            Some(continuation) => continuation(self),
            None => tracing::warn!(task = %self.0.id, "task resumed without a continuation"),
        }
    }

    /// Marks the task completed and wakes its handle.
    pub(crate) fn complete(&self) {
        self.0.status.store(TaskStatus::Completed as u8, Ordering::Release);
        let sender = self
            .0
            .completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            // The handle may have been dropped; nobody is waiting then.
            let _ = sender.send(());
        }
        tracing::trace!(task = %self.0.id, "task completed");
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("priority", &self.priority())
            .field("status", &self.status())
            .finish()
    }
}

/// The preferred task executor of `job` if it is a task, undefined otherwise.
pub(crate) fn task_executor_preference(job: &Job) -> TaskExecutorRef {
    if !job.is_task() {
        return TaskExecutorRef::Undefined;
    }
    // SAFETY: task headers are always the first field of a `TaskInner`.
    let inner = unsafe { &*(job as *const Job).cast::<TaskInner>() };
    inner.preferred_task_executor.clone()
}

/// Completion handle returned when a task is spawned.
///
/// Resolves once the task completes, or with [`TaskError::Dropped`] if the
/// task record is dropped first (for example by an executor shutting down).
#[must_use = "dropping the handle does not cancel the task"]
pub struct TaskHandle {
    id: TaskId,
    rx: oneshot::Receiver<()>,
    finished: bool,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Blocks the calling thread until the task completes.
    ///
    /// Must not be called from a job running on the executor the task needs.
    pub fn wait(self) -> Result<(), TaskError> {
        futures::executor::block_on(self)
    }

    /// Whether the task has completed, without waiting.
    pub fn is_finished(&mut self) -> bool {
        if !self.finished {
            self.finished = matches!(self.rx.try_recv(), Ok(Some(())));
        }
        self.finished
    }
}

impl Future for TaskHandle {
    type Output = Result<(), TaskError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.finished {
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| TaskError::Dropped))
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle").field("id", &self.id).finish()
    }
}

/// Configures a task before it is created.
///
/// ```rust,ignore
/// let handle = runtime
///     .task_builder()
///     .priority(JobPriority::HIGH)
///     .name("refresh")
///     .spawn_on(&actor.executor(), |task| { /* ... */ });
/// ```
pub struct TaskBuilder<'a> {
    runtime: &'a Runtime,
    priority: JobPriority,
    name: Option<String>,
    task_executor: TaskExecutorRef,
}

impl<'a> TaskBuilder<'a> {
    pub(crate) fn new(runtime: &'a Runtime) -> Self {
        TaskBuilder {
            runtime,
            priority: JobPriority::Default,
            name: None,
            task_executor: TaskExecutorRef::Undefined,
        }
    }

    pub fn priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Generic work of the task runs on `executor` instead of the global pool.
    pub fn task_executor(mut self, executor: TaskExecutorRef) -> Self {
        self.task_executor = executor;
        self
    }

    /// Creates the task without scheduling it.
    pub fn build<F>(self, body: F) -> (Task, TaskHandle)
    where
        F: FnOnce(&Task) + Send + 'static,
    {
        Task::new(
            self.runtime.shared().clone(),
            self.priority,
            self.task_executor,
            self.name,
            Box::new(body),
        )
    }

    /// Creates the task and enqueues it on `executor`.
    pub fn spawn_on<F>(self, executor: &SerialExecutorRef, body: F) -> TaskHandle
    where
        F: FnOnce(&Task) + Send + 'static,
    {
        let (task, handle) = self.build(body);
        task.flag_as_and_enqueue_on_executor(executor);
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::executor::ManualExecutor;

    fn manual_runtime() -> (Runtime, Arc<ManualExecutor>) {
        let executor = Arc::new(ManualExecutor::new());
        let runtime = Runtime::builder()
            .config(RuntimeConfig::for_tests())
            .global_executor(executor.clone())
            .build()
            .unwrap();
        (runtime, executor)
    }

    #[test]
    fn test_task_job_roundtrip_keeps_identity() {
        let (runtime, _executor) = manual_runtime();
        let (task, _handle) = runtime.task_builder().name("roundtrip").build(|_| {});
        let copy = task.clone();
        let job = task.into_job();
        assert!(job.is_task());
        assert_eq!(job.priority(), JobPriority::Default);
        let back = unsafe { Task::from_job(job) };
        assert!(back.ptr_eq(&copy));
        assert_eq!(back.name(), Some("roundtrip"));
    }

    #[test]
    fn test_spawned_task_completes_on_global() {
        let (runtime, executor) = manual_runtime();
        let mut handle = runtime.spawn(&SerialExecutorRef::Generic, JobPriority::Utility, |task| {
            assert_eq!(task.status(), TaskStatus::Running);
        });
        assert!(!handle.is_finished());
        assert_eq!(executor.run_until_idle(), 1);
        assert!(handle.wait().is_ok());
    }

    #[test]
    fn test_dropped_task_reports_dropped() {
        let (runtime, _executor) = manual_runtime();
        let (task, handle) = runtime.task_builder().build(|_| {});
        drop(task);
        assert_eq!(handle.wait(), Err(TaskError::Dropped));
    }

    #[test]
    fn test_preference_of_plain_job_is_undefined() {
        let job = hopper_api::job::ClosureJob::new(JobPriority::Default, || {});
        assert!(task_executor_preference(&job).is_undefined());
    }
}
