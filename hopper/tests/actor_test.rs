
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use hopper::{current_executor, ActorOptions, ActorState, ClosureJob, JobPriority, RuntimeConfig};
use test_helpers::{entries, manual_runtime, manual_runtime_with, new_log, recording_job};

#[test]
fn test_jobs_run_in_priority_then_fifo_order() {
    let setup = manual_runtime();
    let actor = setup.runtime.new_actor();
    let log = new_log();

    actor.enqueue(recording_job(&log, "default-1", JobPriority::Default));
    actor.enqueue(recording_job(&log, "background", JobPriority::Background));
    actor.enqueue(recording_job(&log, "interactive", JobPriority::UserInteractive));
    actor.enqueue(recording_job(&log, "default-2", JobPriority::Default));

    setup.executor.run_until_idle();

    assert_eq!(entries(&log), vec!["interactive", "default-1", "default-2", "background"]);
    assert_eq!(actor.status().state(), ActorState::Idle);
    assert_eq!(setup.hooks.created(), setup.hooks.finished());
}

#[test]
fn test_jobs_observe_actor_as_current_executor() {
    let setup = manual_runtime();
    let actor = setup.runtime.new_actor();
    let expected = actor.executor();
    let runtime = setup.runtime.clone();
    let checks = Arc::new(AtomicUsize::new(0));

    let seen = checks.clone();
    actor.enqueue(ClosureJob::new(JobPriority::Default, move || {
        assert_eq!(current_executor(), expected);
        assert!(runtime.is_current_executor(&expected));
        seen.fetch_add(1, Ordering::SeqCst);
    }));

    assert!(!setup.runtime.is_current_executor(&actor.executor()));
    setup.executor.run_until_idle();
    assert_eq!(checks.load(Ordering::SeqCst), 1);
}

#[test]
fn test_jobs_enqueued_while_draining_run_in_same_drain() {
    let setup = manual_runtime();
    let actor = setup.runtime.new_actor();
    let log = new_log();

    let inner = actor.clone();
    let inner_log = log.clone();
    actor.enqueue(ClosureJob::new(JobPriority::Default, move || {
        inner_log.lock().unwrap().push("outer");
        inner.enqueue(recording_job(&inner_log, "inner", JobPriority::Default));
    }));

    assert_eq!(setup.executor.run_until_idle(), 1);
    assert_eq!(entries(&log), vec!["outer", "inner"]);
    assert_eq!(actor.retain_count(), 1);
}

#[test]
fn test_separate_actors_get_separate_processing_jobs() {
    let setup = manual_runtime();
    let first = setup.runtime.new_actor();
    let second = setup.runtime.new_actor();
    let log = new_log();

    first.enqueue(recording_job(&log, "first", JobPriority::Default));
    second.enqueue(recording_job(&log, "second", JobPriority::Default));

    assert_eq!(setup.hooks.created(), 2);
    assert_eq!(setup.executor.run_until_idle(), 2);
    assert_eq!(entries(&log), vec!["first", "second"]);
    assert_ne!(first.id(), second.id());
}

#[test]
fn test_yield_limit_hands_actor_to_new_processing_job() {
    let mut config = RuntimeConfig::for_tests();
    config.max_jobs_per_drain = Some(2);
    let setup = manual_runtime_with(config);
    let actor = setup.runtime.new_actor();
    let log = new_log();

    for label in ["a", "b", "c", "d", "e"] {
        actor.enqueue(recording_job(&log, label, JobPriority::Default));
    }

    assert_eq!(setup.executor.run_until_idle(), 3);
    assert_eq!(entries(&log), vec!["a", "b", "c", "d", "e"]);
    assert!(actor.status().is_idle());
}

#[test]
fn test_deinit_runs_when_last_reference_dropped() {
    let setup = manual_runtime();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let actor = setup.runtime.new_actor_with(ActorOptions {
        distributed_remote: false,
        deinit: Some(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })),
    });
    let copy = actor.clone();
    assert_eq!(actor.retain_count(), 2);

    drop(copy);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    drop(actor);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(setup.hooks.deallocated(), 1);
}

#[test]
fn test_distributed_remote_flag() {
    let setup = manual_runtime();
    let remote = setup.runtime.new_actor_with(ActorOptions {
        distributed_remote: true,
        deinit: None,
    });
    let local = setup.runtime.new_actor();
    assert!(remote.is_distributed_remote());
    assert!(!local.is_distributed_remote());
}

#[test]
#[should_panic(expected = "after deallocation")]
fn test_enqueue_through_stale_executor_is_fatal() {
    let setup = manual_runtime();
    let actor = setup.runtime.new_actor();
    let executor = actor.executor();
    drop(actor);
    assert_eq!(setup.hooks.deallocated(), 1);

    let log = new_log();
    setup.runtime.enqueue(recording_job(&log, "late", JobPriority::Default), &executor);
    setup.executor.run_until_idle();
}
