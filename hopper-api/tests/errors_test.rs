// Integration tests for hopper_api::errors

use hopper_api::errors::{RuntimeViolation, TaskError};
use hopper_api::types::{ActorId, ActorState};

#[test]
fn test_violation_messages_name_the_actor() {
    let actor = ActorId::new();
    let message = RuntimeViolation::NonZeroRetainCount { actor, count: 3 }.to_string();
    assert!(message.starts_with(&actor.to_string()));
    assert!(message.ends_with("non-zero retain count 3"));
}

#[test]
fn test_use_after_deallocation_message() {
    let actor = ActorId::new();
    let message = RuntimeViolation::UseAfterDeallocation { actor, operation: "enqueue" }.to_string();
    assert_eq!(message, format!("{} used by enqueue after deallocation", actor));
}

#[test]
fn test_unexpected_executor_message() {
    let violation = RuntimeViolation::UnexpectedExecutor {
        function: "@MainActor function",
        file: "main.rs".to_string(),
        line: 3,
        expected: "the main thread",
    };
    assert_eq!(
        violation.to_string(),
        "data race detected: @MainActor function at main.rs:3 was not called on the main thread"
    );
}

#[test]
fn test_isolation_and_scheduling_messages() {
    assert_eq!(
        RuntimeViolation::IsolationAssumption("not on actor".to_string()).to_string(),
        "incorrect actor executor assumption: not on actor"
    );
    assert_eq!(
        RuntimeViolation::SchedulingFailed("no memory".to_string()).to_string(),
        "unable to schedule: no memory"
    );
    assert_eq!(ActorState::ZombieReadyForDeallocation.to_string(), "zombie");
}

#[test]
fn test_task_error() {
    let err = TaskError::Dropped;
    assert_eq!(err.clone(), TaskError::Dropped);
    let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(err);
    assert_eq!(boxed.to_string(), "task dropped before completion");
}
