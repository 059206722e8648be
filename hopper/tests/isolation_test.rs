
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use hopper::config::{ExecutorCheckMode, UnexpectedExecutorLogLevel};
use hopper::isolation::is_executing_on_main_thread;
use hopper::{
    ClosureJob, IsolationDecision, JobPriority, JobRef, RuntimeConfig, SerialExecutor, SerialExecutorRef,
    TaskExecutorRef,
};
use test_helpers::{manual_runtime, manual_runtime_with};

/// An embedder executor with scripted answers to isolation queries.
#[derive(Debug)]
struct ScriptedExecutor {
    main: bool,
    decision: IsolationDecision,
    complex: bool,
    checks: AtomicUsize,
    jobs: Mutex<Vec<JobRef>>,
}

impl ScriptedExecutor {
    fn new(main: bool, decision: IsolationDecision) -> Arc<Self> {
        Arc::new(ScriptedExecutor {
            main,
            decision,
            complex: false,
            checks: AtomicUsize::new(0),
            jobs: Mutex::new(Vec::new()),
        })
    }

    fn complex() -> Arc<Self> {
        Arc::new(ScriptedExecutor {
            main: false,
            decision: IsolationDecision::NotIsolated,
            complex: true,
            checks: AtomicUsize::new(0),
            jobs: Mutex::new(Vec::new()),
        })
    }

    fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

impl SerialExecutor for ScriptedExecutor {
    fn enqueue(&self, job: JobRef) {
        self.jobs.lock().unwrap().push(job);
    }

    fn check_isolated(&self) {
        self.checks.fetch_add(1, Ordering::SeqCst);
    }

    fn is_isolating_current_context(&self) -> IsolationDecision {
        self.decision
    }

    fn is_main_executor(&self) -> bool {
        self.main
    }

    fn is_complex_equality(&self) -> bool {
        self.complex
    }

    fn is_same_exclusive_execution_context(&self, other: &dyn SerialExecutor) -> bool {
        self.complex && other.is_complex_equality()
    }
}

fn strict_config() -> RuntimeConfig {
    let mut config = RuntimeConfig::for_tests();
    config.executor_check_mode = ExecutorCheckMode::Strict;
    config
}

#[test]
fn test_legacy_mode_never_asks_check_isolated() {
    let setup = manual_runtime();
    let custom = ScriptedExecutor::new(false, IsolationDecision::Unknown);
    let expected = SerialExecutorRef::custom(custom.clone());

    assert!(!setup.runtime.is_current_executor(&expected));
    assert_eq!(custom.checks(), 0);
}

#[test]
fn test_strict_mode_defers_to_check_isolated() {
    let setup = manual_runtime_with(strict_config());
    let custom = ScriptedExecutor::new(false, IsolationDecision::Unknown);
    let expected = SerialExecutorRef::custom(custom.clone());

    assert!(setup.runtime.is_current_executor(&expected));
    assert_eq!(custom.checks(), 1);
}

#[test]
fn test_known_decisions_skip_check_isolated() {
    let setup = manual_runtime_with(strict_config());
    let isolated = ScriptedExecutor::new(false, IsolationDecision::Isolated);
    let not_isolated = ScriptedExecutor::new(false, IsolationDecision::NotIsolated);

    assert!(setup.runtime.is_current_executor(&SerialExecutorRef::custom(isolated.clone())));
    assert!(!setup.runtime.is_current_executor(&SerialExecutorRef::custom(not_isolated.clone())));
    assert_eq!(isolated.checks() + not_isolated.checks(), 0);
}

#[test]
#[should_panic(expected = "incorrect actor executor assumption")]
fn test_strict_mode_fails_for_unverifiable_actor() {
    let setup = manual_runtime_with(strict_config());
    let actor = setup.runtime.new_actor();
    setup.runtime.is_current_executor(&actor.executor());
}

#[test]
fn test_main_executor_passes_on_main_thread() {
    let setup = manual_runtime();
    let main = SerialExecutorRef::custom(ScriptedExecutor::new(true, IsolationDecision::NotIsolated));

    let on_thread = |name: &str| {
        let runtime = setup.runtime.clone();
        let main = main.clone();
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || is_executing_on_main_thread() && runtime.is_current_executor(&main))
            .unwrap()
            .join()
            .unwrap()
    };
    assert!(!on_thread("worker"));
    let on_main = on_thread("main");
    assert!(on_main);
}

#[test]
fn test_legacy_mode_rejects_main_mismatch_inside_actor() {
    let setup = manual_runtime();
    let actor = setup.runtime.new_actor();
    let main = ScriptedExecutor::new(true, IsolationDecision::Isolated);
    let answers = Arc::new(Mutex::new(Vec::new()));

    let runtime = setup.runtime.clone();
    let expected_main = SerialExecutorRef::custom(main.clone());
    let own = actor.executor();
    let seen = answers.clone();
    actor.enqueue(ClosureJob::new(JobPriority::Default, move || {
        let mut seen = seen.lock().unwrap();
        seen.push(runtime.is_current_executor(&own));
        seen.push(runtime.is_current_executor(&expected_main));
    }));
    setup.executor.run_until_idle();

    assert_eq!(*answers.lock().unwrap(), vec![true, false]);
    assert_eq!(main.checks(), 0);
}

#[test]
fn test_complex_equality_matches_distinct_executors() {
    let setup = manual_runtime();
    let first = SerialExecutorRef::custom(ScriptedExecutor::complex());
    let second = SerialExecutorRef::custom(ScriptedExecutor::complex());
    let plain = SerialExecutorRef::custom(ScriptedExecutor::new(false, IsolationDecision::NotIsolated));
    assert_ne!(first, second);

    let answers = Arc::new(Mutex::new(Vec::new()));
    let runtime = setup.runtime.clone();
    let seen = answers.clone();
    let job = ClosureJob::new(JobPriority::Default, move || {
        let mut seen = seen.lock().unwrap();
        seen.push(runtime.is_current_executor(&second));
        seen.push(runtime.is_current_executor(&plain));
    });
    setup
        .runtime
        .run_job_on_serial_and_task_executor(job, first, TaskExecutorRef::Undefined);

    assert_eq!(*answers.lock().unwrap(), vec![true, false]);
}

#[test]
fn test_unexpected_executor_warns_in_legacy_mode() {
    let setup = manual_runtime();
    let actor = setup.runtime.new_actor();
    setup.runtime.report_unexpected_executor("view.rs", 12, &actor.executor());
}

#[test]
fn test_unexpected_executor_can_be_ignored() {
    let mut config = RuntimeConfig::for_tests();
    config.unexpected_executor_log_level = Some(UnexpectedExecutorLogLevel::Ignore);
    let setup = manual_runtime_with(config);
    setup
        .runtime
        .report_unexpected_executor("view.rs", 12, &SerialExecutorRef::Generic);
}

#[test]
#[should_panic(expected = "@MainActor function at view.rs:12 was not called on the main thread")]
fn test_unexpected_executor_fatal_for_main() {
    let mut config = RuntimeConfig::for_tests();
    config.unexpected_executor_log_level = Some(UnexpectedExecutorLogLevel::Fatal);
    let setup = manual_runtime_with(config);
    let main = SerialExecutorRef::custom(ScriptedExecutor::new(true, IsolationDecision::Unknown));
    setup.runtime.report_unexpected_executor("view.rs", 12, &main);
}

#[test]
#[should_panic(expected = "actor-isolated function at model.rs:40 was not called on the same actor")]
fn test_unexpected_executor_always_fatal_in_strict_mode() {
    let setup = manual_runtime_with(strict_config());
    let actor = setup.runtime.new_actor();
    setup.runtime.report_unexpected_executor("model.rs", 40, &actor.executor());
}
