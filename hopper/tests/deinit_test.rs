
use hopper::{current_executor, ClosureJob, JobPriority, SerialExecutorRef};
use test_helpers::{entries, manual_runtime, new_log, recording_job};

#[test]
fn test_deinit_runs_inline_on_current_actor() {
    let setup = manual_runtime();
    let actor = setup.runtime.new_actor();
    let log = new_log();

    let runtime = setup.runtime.clone();
    let own = actor.executor();
    let job_log = log.clone();
    actor.enqueue(ClosureJob::new(JobPriority::Default, move || {
        job_log.lock().unwrap().push("job-start");
        let deinit_log = job_log.clone();
        runtime.deinit_on_executor(own, Box::new(move || deinit_log.lock().unwrap().push("deinit")));
        job_log.lock().unwrap().push("job-end");
    }));
    setup.executor.run_until_idle();

    assert_eq!(entries(&log), vec!["job-start", "deinit", "job-end"]);
    assert_eq!(setup.executor.enqueue_count(), 1);
}

#[test]
fn test_deinit_takes_idle_actor_inline() {
    let setup = manual_runtime();
    let actor = setup.runtime.new_actor();
    let log = new_log();

    let expected = actor.executor();
    let deinit_log = log.clone();
    setup.runtime.deinit_on_executor(
        actor.executor(),
        Box::new(move || {
            assert_eq!(current_executor(), expected);
            deinit_log.lock().unwrap().push("deinit");
        }),
    );

    assert_eq!(entries(&log), vec!["deinit"]);
    assert_eq!(setup.executor.enqueue_count(), 0);
    assert!(actor.status().is_idle());
    assert!(current_executor().is_generic());
}

#[test]
fn test_deinit_waits_behind_queued_work() {
    let setup = manual_runtime();
    let actor = setup.runtime.new_actor();
    let log = new_log();

    actor.enqueue(recording_job(&log, "queued", JobPriority::Default));
    let deinit_log = log.clone();
    setup
        .runtime
        .deinit_on_executor(actor.executor(), Box::new(move || deinit_log.lock().unwrap().push("deinit")));

    assert!(entries(&log).is_empty());
    assert_eq!(setup.executor.enqueue_count(), 1);

    setup.executor.run_until_idle();
    assert_eq!(entries(&log), vec!["queued", "deinit"]);
    assert!(actor.status().is_idle());
}

#[test]
fn test_deinit_for_generic_goes_to_global() {
    let setup = manual_runtime();
    let log = new_log();

    let deinit_log = log.clone();
    setup.runtime.deinit_on_executor(
        SerialExecutorRef::Generic,
        Box::new(move || deinit_log.lock().unwrap().push("deinit")),
    );

    assert!(entries(&log).is_empty());
    assert_eq!(setup.executor.enqueue_count(), 1);
    setup.executor.run_until_idle();
    assert_eq!(entries(&log), vec!["deinit"]);
}

#[test]
fn test_panicking_deinit_releases_actor() {
    let setup = manual_runtime();
    let actor = setup.runtime.new_actor();

    let runtime = setup.runtime.clone();
    let executor = actor.executor();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        runtime.deinit_on_executor(executor, Box::new(|| panic!("deinit failure")));
    }));
    assert!(result.is_err());
    assert!(actor.status().is_idle());
    assert!(current_executor().is_generic());

    let log = new_log();
    actor.enqueue(recording_job(&log, "after", JobPriority::Default));
    setup.executor.run_until_idle();
    assert_eq!(entries(&log), vec!["after"]);
    assert!(actor.status().is_idle());
}
