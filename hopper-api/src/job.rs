//! # Jobs
//!
//! A job is the smallest schedulable unit. Every schedulable record starts
//! with a [`Job`] header so that queues can link records together without
//! allocating, and so that executors can run or discard a record through its
//! vtable without knowing the concrete type.
//!
//! ## Layout
//!
//! ```text
//! #[repr(C)]
//! struct MyJob {
//!     header: Job,      // must be the first field
//!     ...payload...
//! }
//! ```
//!
//! Ownership of a record travels with its [`JobRef`]. Running the job consumes
//! the reference; dropping an unrun reference releases the record without
//! running it.

use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use crate::priority::JobPriority;

const KIND_MASK: u32 = 0xff;
const PRIORITY_SHIFT: u32 = 8;
const PRIORITY_MASK: u32 = 0xff << PRIORITY_SHIFT;

/// Kinds at or above this value are reserved for the scheduler itself.
pub const FIRST_RESERVED_JOB_KIND: u8 = 192;

/// Discriminates what a job record contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum JobKind {
    /// A resumable task; the record is the task itself
    Task = 0,
    /// Deferred destruction of an object that must run on its executor
    IsolatedDeinit = 1,
    /// A boxed closure
    Closure = 2,
    /// Scheduler-internal "go drain this actor" job, including stealers
    ProcessActor = FIRST_RESERVED_JOB_KIND,
}

impl JobKind {
    /// Decodes a raw kind byte.
    pub fn from_raw(raw: u8) -> Option<JobKind> {
        match raw {
            0 => Some(JobKind::Task),
            1 => Some(JobKind::IsolatedDeinit),
            2 => Some(JobKind::Closure),
            FIRST_RESERVED_JOB_KIND => Some(JobKind::ProcessActor),
            _ => None,
        }
    }

    /// Whether this kind is private to the scheduler.
    pub fn is_reserved(self) -> bool {
        self as u8 >= FIRST_RESERVED_JOB_KIND
    }
}

/// Entry points used to run or discard a job record.
///
/// Both functions receive ownership of the record and must release it.
pub struct JobVtable {
    /// Runs the job body and releases the record
    pub run: unsafe fn(NonNull<Job>),
    /// Releases the record without running it
    pub drop: unsafe fn(NonNull<Job>),
}

/// Header shared by all schedulable records.
///
/// # Scheduler-private words
///
/// `scheduler_private[0]` is the intrusive "next" link used by actor queues
/// and `scheduler_private[1]` is reserved for executors. Only two parties may
/// touch these words:
///
/// - the enqueuing thread, before the job is published to an actor's
///   incoming list, and
/// - the thread currently holding the owning actor's lock (the drainer).
///
/// The words are atomics so that the header stays `Sync`, but they are
/// accessed with relaxed ordering: publication happens through the actor's
/// status word, which carries the necessary release/acquire edges.
#[repr(C)]
pub struct Job {
    flags: AtomicU32,
    scheduler_private: [AtomicPtr<Job>; 2],
    vtable: &'static JobVtable,
}

impl Job {
    /// Creates a header for a record of the given kind and priority.
    pub const fn new(kind: JobKind, priority: JobPriority, vtable: &'static JobVtable) -> Job {
        Job {
            flags: AtomicU32::new(
                (kind as u32) | ((priority.value() as u32) << PRIORITY_SHIFT),
            ),
            scheduler_private: [
                AtomicPtr::new(ptr::null_mut()),
                AtomicPtr::new(ptr::null_mut()),
            ],
            vtable,
        }
    }

    /// Raw kind byte.
    pub fn kind_raw(&self) -> u8 {
        (self.flags.load(Ordering::Relaxed) & KIND_MASK) as u8
    }

    pub fn kind(&self) -> Option<JobKind> {
        JobKind::from_raw(self.kind_raw())
    }

    pub fn is_task(&self) -> bool {
        self.kind_raw() == JobKind::Task as u8
    }

    /// Current priority of the job.
    pub fn priority(&self) -> JobPriority {
        let raw = (self.flags.load(Ordering::Relaxed) & PRIORITY_MASK) >> PRIORITY_SHIFT;
        JobPriority::from_raw(raw as u8)
    }

    /// Raises the stored priority to at least `priority`.
    ///
    /// Returns the previous priority. Never lowers the priority.
    pub fn raise_priority(&self, priority: JobPriority) -> JobPriority {
        let previous = self
            .flags
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |flags| {
                let current = JobPriority::from_raw(((flags & PRIORITY_MASK) >> PRIORITY_SHIFT) as u8);
                if priority > current {
                    Some((flags & !PRIORITY_MASK) | ((priority.value() as u32) << PRIORITY_SHIFT))
                } else {
                    None
                }
            })
            .unwrap_or_else(|flags| flags);
        JobPriority::from_raw(((previous & PRIORITY_MASK) >> PRIORITY_SHIFT) as u8)
    }

    /// Next job in an intrusive list.
    pub fn next_link(&self) -> *mut Job {
        self.scheduler_private[0].load(Ordering::Relaxed)
    }

    pub fn set_next_link(&self, next: *mut Job) {
        self.scheduler_private[0].store(next, Ordering::Relaxed);
    }

    /// Resets both scheduler-private words before the job is handed to an executor.
    pub fn clear_scheduler_private(&self) {
        for word in &self.scheduler_private {
            word.store(ptr::null_mut(), Ordering::Relaxed);
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("kind", &self.kind_raw())
            .field("priority", &self.priority())
            .finish()
    }
}

/// Owning handle to a job record.
pub struct JobRef(NonNull<Job>);

// A job record is handed between threads by design; its payload is required
// to be `Send` by every constructor.
unsafe impl Send for JobRef {}

impl JobRef {
    /// Takes ownership of a raw record.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live record whose first field is a [`Job`]
    /// header, and no other `JobRef` may own it.
    pub unsafe fn from_raw(ptr: NonNull<Job>) -> JobRef {
        JobRef(ptr)
    }

    /// Gives up ownership without running or dropping the record.
    pub fn into_raw(self) -> NonNull<Job> {
        let ptr = self.0;
        std::mem::forget(self);
        ptr
    }

    pub fn as_ptr(&self) -> *mut Job {
        self.0.as_ptr()
    }

    pub fn header(&self) -> &Job {
        // SAFETY: the record lives at least as long as its owning reference.
        unsafe { self.0.as_ref() }
    }

    /// Runs the job, consuming the record.
    pub fn run(self) {
        let ptr = self.into_raw();
        // SAFETY: ownership of the record is passed to the vtable entry.
        unsafe {
            let run = ptr.as_ref().vtable.run;
            run(ptr);
        }
    }
}

impl Drop for JobRef {
    fn drop(&mut self) {
        // SAFETY: we own the record and it has not been run.
        unsafe {
            let drop_fn = self.0.as_ref().vtable.drop;
            drop_fn(self.0);
        }
    }
}

impl std::ops::Deref for JobRef {
    type Target = Job;

    fn deref(&self) -> &Job {
        self.header()
    }
}

impl fmt::Debug for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("JobRef").field(self.header()).finish()
    }
}

/// A heap-allocated job that runs a closure.
#[repr(C)]
pub struct ClosureJob<F> {
    header: Job,
    work: F,
}

impl<F> ClosureJob<F>
where
    F: FnOnce() + Send + 'static,
{
    const VTABLE: JobVtable = JobVtable {
        run: Self::run_raw,
        drop: Self::drop_raw,
    };

    /// Boxes `work` into a job of kind [`JobKind::Closure`].
    pub fn new(priority: JobPriority, work: F) -> JobRef {
        Self::with_kind(JobKind::Closure, priority, work)
    }

    /// Boxes `work` into a job of an explicit kind.
    ///
    /// [`JobKind::Task`] is rejected and replaced by [`JobKind::Closure`]:
    /// task records have their own layout.
    pub fn with_kind(kind: JobKind, priority: JobPriority, work: F) -> JobRef {
        let kind = if kind == JobKind::Task { JobKind::Closure } else { kind };
        let boxed = Box::new(ClosureJob {
            header: Job::new(kind, priority, &Self::VTABLE),
            work,
        });
        let ptr = NonNull::from(Box::leak(boxed)).cast::<Job>();
        // SAFETY: freshly leaked box with the header as its first field.
        unsafe { JobRef::from_raw(ptr) }
    }

    unsafe fn run_raw(ptr: NonNull<Job>) {
        // SAFETY: the record was created by `with_kind` as a `ClosureJob<F>`.
        let boxed = unsafe { Box::from_raw(ptr.cast::<ClosureJob<F>>().as_ptr()) };
        let ClosureJob { work, .. } = *boxed;
        work();
    }

    unsafe fn drop_raw(ptr: NonNull<Job>) {
        // SAFETY: see `run_raw`.
        drop(unsafe { Box::from_raw(ptr.cast::<ClosureJob<F>>().as_ptr()) });
    }
}
