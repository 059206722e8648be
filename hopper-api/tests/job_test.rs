// Integration tests for job records defined outside the crate

use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hopper_api::job::{ClosureJob, Job, JobKind, JobRef, JobVtable, FIRST_RESERVED_JOB_KIND};
use hopper_api::priority::JobPriority;

/// A job record with its own layout, as an embedder would define one.
#[repr(C)]
struct CountingJob {
    header: Job,
    runs: Arc<AtomicUsize>,
    drops: Arc<AtomicUsize>,
}

const COUNTING_VTABLE: JobVtable = JobVtable {
    run: run_counting,
    drop: drop_counting,
};

unsafe fn run_counting(ptr: NonNull<Job>) {
    let job = Box::from_raw(ptr.cast::<CountingJob>().as_ptr());
    job.runs.fetch_add(1, Ordering::SeqCst);
}

unsafe fn drop_counting(ptr: NonNull<Job>) {
    let job = Box::from_raw(ptr.cast::<CountingJob>().as_ptr());
    job.drops.fetch_add(1, Ordering::SeqCst);
}

fn counting_job(runs: &Arc<AtomicUsize>, drops: &Arc<AtomicUsize>) -> JobRef {
    let boxed = Box::new(CountingJob {
        header: Job::new(JobKind::Closure, JobPriority::Utility, &COUNTING_VTABLE),
        runs: runs.clone(),
        drops: drops.clone(),
    });
    let ptr = NonNull::from(Box::leak(boxed)).cast::<Job>();
    unsafe { JobRef::from_raw(ptr) }
}

#[test]
fn test_custom_record_runs_through_vtable() {
    let runs = Arc::new(AtomicUsize::new(0));
    let drops = Arc::new(AtomicUsize::new(0));

    let job = counting_job(&runs, &drops);
    assert_eq!(job.priority(), JobPriority::Utility);
    job.run();

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(drops.load(Ordering::SeqCst), 0);
}

#[test]
fn test_unrun_record_is_dropped_through_vtable() {
    let runs = Arc::new(AtomicUsize::new(0));
    let drops = Arc::new(AtomicUsize::new(0));

    drop(counting_job(&runs, &drops));

    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_links_are_cleared_before_scheduling() {
    let first = ClosureJob::new(JobPriority::Default, || {});
    let second = ClosureJob::new(JobPriority::Default, || {});

    first.set_next_link(second.as_ptr());
    assert_eq!(first.next_link(), second.as_ptr());
    first.clear_scheduler_private();
    assert!(first.next_link().is_null());
}

#[test]
fn test_job_kinds() {
    assert_eq!(JobKind::from_raw(0), Some(JobKind::Task));
    assert_eq!(JobKind::from_raw(FIRST_RESERVED_JOB_KIND), Some(JobKind::ProcessActor));
    assert_eq!(JobKind::from_raw(77), None);
    assert!(JobKind::ProcessActor.is_reserved());
    assert!(!JobKind::IsolatedDeinit.is_reserved());

    let deinit = ClosureJob::with_kind(JobKind::IsolatedDeinit, JobPriority::Default, || {});
    assert_eq!(deinit.kind(), Some(JobKind::IsolatedDeinit));
    let not_a_task = ClosureJob::with_kind(JobKind::Task, JobPriority::Default, || {});
    assert!(!not_a_task.is_task());
}
