//! Per-thread execution context.
//!
//! Every entry point that runs jobs pushes an [`ExecutorTrackingInfo`] frame
//! naming the serial executor and task executor the thread currently acts
//! for. Frames nest: entering one shadows the previous, leaving restores it.
//! A thread with no frame is running generic code on no executor at all.
//!
//! The active task is tracked separately by [`ActiveTask`].

use std::cell::{Cell, RefCell};
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use hopper_api::hooks::RuntimeHooks;
use hopper_api::job::{Job, JobRef};
use hopper_api::types::DrainerId;

use crate::executor::{SerialExecutorRef, TaskExecutorRef};
use crate::task::Task;

thread_local! {
    static CURRENT_FRAME: Cell<*const ExecutorTrackingInfo> = const { Cell::new(ptr::null()) };
    static ACTIVE_TASK: RefCell<Option<Task>> = const { RefCell::new(None) };
    static THREAD_TOKEN: Cell<DrainerId> = const { Cell::new(0) };
}

static NEXT_THREAD_TOKEN: AtomicU32 = AtomicU32::new(1);

/// Nonzero identity of the calling thread, recorded as an actor's drainer.
pub fn current_thread_token() -> DrainerId {
    THREAD_TOKEN.with(|token| {
        if token.get() == 0 {
            let mut next = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
            if next == 0 {
                next = NEXT_THREAD_TOKEN.fetch_add(1, Ordering::Relaxed);
            }
            token.set(next);
        }
        token.get()
    })
}

/// Swaps per-job context in through the runtime hooks and undoes it when
/// the frame is left.
struct VoucherManager {
    hooks: Option<Arc<dyn RuntimeHooks>>,
    swapped: Cell<bool>,
}

impl VoucherManager {
    fn swap_to_job(&self, job: &Job) {
        if let Some(hooks) = &self.hooks {
            hooks.swap_to_job(job);
            self.swapped.set(true);
        }
    }

    fn restore_voucher(&self, task: &Task) {
        if let Some(hooks) = &self.hooks {
            hooks.restore_voucher(task.id());
            self.swapped.set(true);
        }
    }

    fn leave(&self) {
        if self.swapped.replace(false) {
            if let Some(hooks) = &self.hooks {
                hooks.leave_voucher();
            }
        }
    }
}

/// One frame of the thread's execution context.
pub struct ExecutorTrackingInfo {
    active_executor: RefCell<SerialExecutorRef>,
    task_executor: RefCell<TaskExecutorRef>,
    allows_switching: Cell<bool>,
    voucher: VoucherManager,
    saved: Cell<*const ExecutorTrackingInfo>,
}

/// Leaves the frame when dropped, including on unwind.
struct FrameGuard<'a> {
    frame: &'a ExecutorTrackingInfo,
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.frame.leave();
    }
}

impl ExecutorTrackingInfo {
    /// A frame that is not entered yet. Switching is allowed by default.
    pub fn new(hooks: Option<Arc<dyn RuntimeHooks>>) -> Self {
        ExecutorTrackingInfo {
            active_executor: RefCell::new(SerialExecutorRef::Generic),
            task_executor: RefCell::new(TaskExecutorRef::Undefined),
            allows_switching: Cell::new(true),
            voucher: VoucherManager {
                hooks,
                swapped: Cell::new(false),
            },
            saved: Cell::new(ptr::null()),
        }
    }

    /// Makes this frame current for the duration of `body`.
    ///
    /// The previously current frame is shadowed and restored when `body`
    /// returns or unwinds, after the voucher state is left.
    pub fn enter_and_shadow<R>(
        &self,
        executor: SerialExecutorRef,
        task_executor: TaskExecutorRef,
        body: impl FnOnce(&ExecutorTrackingInfo) -> R,
    ) -> R {
        self.active_executor.replace(executor);
        self.task_executor.replace(task_executor);
        self.saved.set(CURRENT_FRAME.with(|current| current.replace(self as *const _)));
        let guard = FrameGuard { frame: self };
        body(guard.frame)
    }

    fn leave(&self) {
        self.voucher.leave();
        CURRENT_FRAME.with(|current| current.set(self.saved.replace(ptr::null())));
    }

    /// Calls `f` with the thread's current frame, if any.
    pub fn with_current<R>(f: impl FnOnce(Option<&ExecutorTrackingInfo>) -> R) -> R {
        let current = CURRENT_FRAME.with(Cell::get);
        // SAFETY: a pointer is only installed by `enter_and_shadow` and
        // removed before the frame it points to can go away.
        f(unsafe { current.as_ref() })
    }

    /// Whether the thread is inside any frame.
    pub fn is_tracking() -> bool {
        !CURRENT_FRAME.with(Cell::get).is_null()
    }

    pub fn active_executor(&self) -> SerialExecutorRef {
        self.active_executor.borrow().clone()
    }

    pub fn set_active_executor(&self, executor: SerialExecutorRef) {
        self.active_executor.replace(executor);
    }

    pub fn task_executor(&self) -> TaskExecutorRef {
        self.task_executor.borrow().clone()
    }

    pub fn set_task_executor(&self, executor: TaskExecutorRef) {
        self.task_executor.replace(executor);
    }

    pub fn allows_switching(&self) -> bool {
        self.allows_switching.get()
    }

    pub fn disallow_switching(&self) {
        self.allows_switching.set(false);
    }

    pub fn swap_to_job(&self, job: &Job) {
        self.voucher.swap_to_job(job);
    }

    pub fn restore_voucher(&self, task: &Task) {
        self.voucher.restore_voucher(task);
    }
}

/// The task running on the current thread.
pub struct ActiveTask;

impl ActiveTask {
    pub fn get() -> Option<Task> {
        ACTIVE_TASK.with(|task| task.borrow().clone())
    }

    pub fn set(task: Option<Task>) {
        ACTIVE_TASK.with(|current| *current.borrow_mut() = task);
    }

    /// Installs `task` and returns the previous one.
    pub fn swap(task: Option<Task>) -> Option<Task> {
        ACTIVE_TASK.with(|current| current.replace(task))
    }

    /// Installs `task` until the returned scope is dropped.
    pub(crate) fn scope(task: Option<Task>) -> ActiveTaskScope {
        ActiveTaskScope {
            previous: ActiveTask::swap(task),
        }
    }

    pub(crate) fn is(task: &Task) -> bool {
        ACTIVE_TASK.with(|current| current.borrow().as_ref().is_some_and(|active| active.ptr_eq(task)))
    }
}

/// Puts the previous active task back when dropped, including on unwind.
#[must_use]
pub(crate) struct ActiveTaskScope {
    previous: Option<Task>,
}

impl Drop for ActiveTaskScope {
    fn drop(&mut self) {
        // Dropped outside the thread-local borrow; it may be the last reference.
        let ended = ActiveTask::swap(self.previous.take());
        drop(ended);
    }
}

/// The serial executor the current thread acts for; generic outside any frame.
pub fn current_executor() -> SerialExecutorRef {
    ExecutorTrackingInfo::with_current(|frame| frame.map(|f| f.active_executor()).unwrap_or_default())
}

/// The task executor of the current frame, undefined outside any frame.
pub fn current_task_executor() -> TaskExecutorRef {
    ExecutorTrackingInfo::with_current(|frame| frame.map(|f| f.task_executor()).unwrap_or_default())
}

pub fn current_task() -> Option<Task> {
    ActiveTask::get()
}

/// Runs `job` under the frame the caller has already entered.
///
/// A task becomes the active task for the duration and is flagged running;
/// if it is still the active task when its continuation returns, it has
/// completed. A continuation that unwinds leaves the task incomplete and
/// restores the previous active task. Other jobs run after the frame swaps
/// to their voucher.
pub fn run_job_in_established_executor_context(job: JobRef) {
    if !job.is_task() {
        ExecutorTrackingInfo::with_current(|frame| {
            if let Some(frame) = frame {
                frame.swap_to_job(&job);
            }
        });
        job.run();
        return;
    }

    // SAFETY: the job header belongs to a task record.
    let task = unsafe { Task::from_job(job) };
    let _scope = ActiveTask::scope(Some(task.clone()));
    task.flag_as_running();
    ExecutorTrackingInfo::with_current(|frame| {
        if let Some(frame) = frame {
            frame.restore_voucher(&task);
        }
    });

    task.run_continuation();

    if ActiveTask::is(&task) {
        task.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::executor::ManualExecutor;
    use crate::runtime::Runtime;

    #[test]
    fn test_frames_nest_and_restore() {
        assert!(!ExecutorTrackingInfo::is_tracking());
        assert!(current_executor().is_generic());

        let outer = ExecutorTrackingInfo::new(None);
        outer.enter_and_shadow(SerialExecutorRef::GenericSynchronousStart, TaskExecutorRef::Undefined, |_| {
            assert!(current_executor().is_for_synchronous_start());

            let inner = ExecutorTrackingInfo::new(None);
            inner.enter_and_shadow(SerialExecutorRef::Generic, TaskExecutorRef::Undefined, |frame| {
                frame.disallow_switching();
                ExecutorTrackingInfo::with_current(|current| {
                    assert!(!current.map(|f| f.allows_switching()).unwrap_or(true));
                });
            });

            ExecutorTrackingInfo::with_current(|current| {
                let current = current.map(|f| f as *const ExecutorTrackingInfo);
                assert_eq!(current, Some(&outer as *const ExecutorTrackingInfo));
            });
        });

        assert!(!ExecutorTrackingInfo::is_tracking());
    }

    #[test]
    fn test_frame_left_on_unwind() {
        let result = std::panic::catch_unwind(|| {
            let frame = ExecutorTrackingInfo::new(None);
            frame.enter_and_shadow(SerialExecutorRef::Generic, TaskExecutorRef::Undefined, |_| {
                panic!("boom");
            });
        });
        assert!(result.is_err());
        assert!(!ExecutorTrackingInfo::is_tracking());
    }

    #[test]
    fn test_active_task_scope_restores_on_unwind() {
        let runtime = Runtime::builder()
            .config(RuntimeConfig::for_tests())
            .global_executor(Arc::new(ManualExecutor::new()))
            .build()
            .unwrap();
        let (outer, _outer_handle) = runtime.task_builder().build(|_| {});
        let (inner, _inner_handle) = runtime.task_builder().build(|_| {});

        let _outer_scope = ActiveTask::scope(Some(outer.clone()));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _scope = ActiveTask::scope(Some(inner));
            panic!("boom");
        }));
        assert!(result.is_err());
        assert!(current_task().is_some_and(|task| task.ptr_eq(&outer)));
    }

    #[test]
    fn test_thread_tokens_are_distinct() {
        let here = current_thread_token();
        assert_ne!(here, 0);
        assert_eq!(here, current_thread_token());
        let there = std::thread::spawn(current_thread_token).join().unwrap();
        assert_ne!(here, there);
    }
}
