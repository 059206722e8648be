
use std::sync::atomic::Ordering;

use hopper::{JobPriority, RuntimeConfig};
use test_helpers::{entries, manual_runtime, manual_runtime_with, new_log, recording_job};

#[test]
fn test_urgent_job_on_scheduled_actor_dispatches_stealer() {
    let setup = manual_runtime();
    let actor = setup.runtime.new_actor();
    let log = new_log();

    actor.enqueue(recording_job(&log, "low", JobPriority::Utility));
    assert_eq!(setup.hooks.created(), 1);
    actor.enqueue(recording_job(&log, "urgent", JobPriority::UserInteractive));

    if setup.runtime.escalation_enabled() {
        assert_eq!(setup.hooks.stealers(), 1);
        assert_eq!(actor.retain_count(), 2);
        assert!(actor.status().is_max_priority_escalated());
        assert_eq!(actor.status().max_priority(), JobPriority::UserInteractive);
    }

    setup.executor.run_until_idle();

    assert_eq!(entries(&log), vec!["urgent", "low"]);
    assert_eq!(actor.retain_count(), 1);
    assert_eq!(setup.hooks.created(), setup.hooks.finished());
    assert!(actor.status().is_idle());
}

#[test]
fn test_escalating_waiting_task_raises_actor() {
    let setup = manual_runtime();
    let actor = setup.runtime.new_actor();
    let log = new_log();

    actor.enqueue(recording_job(&log, "queued", JobPriority::Default));
    let (task, handle) = setup.runtime.task_builder().priority(JobPriority::Default).build(|_| {});

    setup.runtime.escalate(&actor.executor(), &task, JobPriority::HIGH);

    assert_eq!(task.priority(), JobPriority::HIGH);
    assert_eq!(task.base_priority(), JobPriority::Default);
    if setup.runtime.escalation_enabled() {
        assert_eq!(setup.hooks.stealers(), 1);
        assert_eq!(actor.status().max_priority(), JobPriority::HIGH);
    }

    setup.executor.run_until_idle();
    assert_eq!(entries(&log), vec!["queued"]);
    assert_eq!(actor.retain_count(), 1);
    drop(task);
    assert!(handle.wait().is_err());
}

#[test]
fn test_escalation_never_lowers_priority() {
    let setup = manual_runtime();
    let actor = setup.runtime.new_actor();
    let log = new_log();

    actor.enqueue(recording_job(&log, "queued", JobPriority::Default));
    let (task, _handle) = setup.runtime.task_builder().priority(JobPriority::HIGH).build(|_| {});

    setup.runtime.escalate(&actor.executor(), &task, JobPriority::Utility);

    assert_eq!(task.priority(), JobPriority::HIGH);
    assert_eq!(setup.hooks.stealers(), 0);
    setup.executor.run_until_idle();
}

#[test]
fn test_disabled_escalation_keeps_single_processing_job() {
    let mut config = RuntimeConfig::for_tests();
    config.priority_escalation = false;
    let setup = manual_runtime_with(config);
    let actor = setup.runtime.new_actor();
    let log = new_log();

    actor.enqueue(recording_job(&log, "low", JobPriority::Utility));
    actor.enqueue(recording_job(&log, "urgent", JobPriority::UserInteractive));

    assert!(!setup.runtime.escalation_enabled());
    assert_eq!(setup.hooks.created(), 1);
    assert_eq!(actor.status().max_priority(), JobPriority::Utility);
    assert!(!actor.status().is_max_priority_escalated());

    assert_eq!(setup.executor.run_until_idle(), 1);
    assert_eq!(entries(&log), vec!["urgent", "low"]);
    assert_eq!(setup.hooks.override_starts.load(Ordering::SeqCst), 0);
}

#[test]
fn test_escalating_running_task_boosts_drainer_once() {
    let setup = manual_runtime();
    let actor = setup.runtime.new_actor();
    let observed = std::sync::Arc::new(std::sync::Mutex::new(None));

    let runtime = setup.runtime.clone();
    let own = actor.executor();
    let watched = actor.clone();
    let seen = observed.clone();
    let handle = setup.runtime.spawn(&actor.executor(), JobPriority::Default, move |task| {
        runtime.escalate(&own, task, JobPriority::HIGH);
        *seen.lock().unwrap() = Some((watched.status().max_priority(), watched.status().is_max_priority_escalated()));
    });
    setup.executor.run_until_idle();
    assert!(handle.wait().is_ok());

    let (max_priority, escalated) = observed.lock().unwrap().take().expect("task ran");
    if setup.runtime.escalation_enabled() {
        assert_eq!(max_priority, JobPriority::HIGH);
        assert!(escalated);
        assert_eq!(setup.hooks.override_starts.load(Ordering::SeqCst), 1);
        assert_eq!(setup.hooks.override_ends.load(Ordering::SeqCst), 1);
        assert_eq!(setup.hooks.stealers(), 0);
    } else {
        assert_eq!(max_priority, JobPriority::Default);
    }
    assert!(actor.status().is_idle());
}
