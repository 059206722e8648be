//! Checks whether the caller is isolated to an executor.
//!
//! The decision table depends on [`ExecutorCheckMode`]:
//!
//! - Without a tracking frame the thread is outside the runtime. The main
//!   executor passes on the main thread; otherwise the expected executor's
//!   `is_isolating_current_context` decides, and in strict mode
//!   `check_isolated` gets the last word.
//! - With a frame: equal identities pass, two main executors pass, legacy
//!   mode fails a main/non-main mismatch outright, complex equality may
//!   pass, then `is_isolating_current_context`, then strict `check_isolated`.
//!
//! Strict mode never returns `false` for an executor it cannot verify; it
//! fails through `check_isolated` instead.

use hopper_api::errors::RuntimeViolation;
use hopper_api::executor::IsolationDecision;

use crate::config::{ExecutorCheckMode, UnexpectedExecutorLogLevel};
use crate::error::fatal_error;
use crate::executor::SerialExecutorRef;
use crate::runtime::RuntimeShared;
use crate::tracking::ExecutorTrackingInfo;

/// Whether the calling thread is the process main thread.
pub fn is_executing_on_main_thread() -> bool {
    std::thread::current().name() == Some("main")
}

pub(crate) fn is_current_executor(runtime: &RuntimeShared, expected: &SerialExecutorRef) -> bool {
    is_current_executor_with_mode(runtime, expected, runtime.config.executor_check_mode)
}

pub(crate) fn is_current_executor_with_mode(
    runtime: &RuntimeShared,
    expected: &SerialExecutorRef,
    mode: ExecutorCheckMode,
) -> bool {
    let current = ExecutorTrackingInfo::with_current(|frame| frame.map(|f| f.active_executor()));

    let Some(current) = current else {
        if expected.is_main_executor() && is_executing_on_main_thread() {
            return true;
        }
        return match expected.is_isolating_current_context() {
            IsolationDecision::Isolated => true,
            IsolationDecision::NotIsolated => false,
            IsolationDecision::Unknown => check_isolated_last_resort(runtime, expected, mode),
        };
    };

    if current == *expected {
        return true;
    }
    if current.is_main_executor() && expected.is_main_executor() {
        return true;
    }
    if mode == ExecutorCheckMode::Legacy && expected.is_main_executor() != current.is_main_executor() {
        tracing::debug!(?current, ?expected, "main executor mismatch");
        return false;
    }
    if expected.is_complex_equality()
        && current.is_complex_equality()
        && current.is_same_exclusive_execution_context(expected)
    {
        return true;
    }

    match expected.is_isolating_current_context() {
        IsolationDecision::Isolated => true,
        IsolationDecision::NotIsolated => false,
        IsolationDecision::Unknown => check_isolated_last_resort(runtime, expected, mode),
    }
}

fn check_isolated_last_resort(runtime: &RuntimeShared, expected: &SerialExecutorRef, mode: ExecutorCheckMode) -> bool {
    if mode == ExecutorCheckMode::Legacy {
        return false;
    }
    if !expected.can_check_isolated() {
        fatal_error(
            runtime.config.fatal_policy,
            RuntimeViolation::IsolationAssumption(format!(
                "not running on {:?}, which cannot verify isolation",
                expected
            )),
        );
    }
    // Returns only if the executor confirms isolation.
    expected.check_isolated();
    true
}

/// Reports a call into isolated code from the wrong executor.
pub(crate) fn report_unexpected_executor(runtime: &RuntimeShared, file: &str, line: u32, executor: &SerialExecutorRef) {
    let level = runtime.config.effective_unexpected_executor_log_level();
    if level == UnexpectedExecutorLogLevel::Ignore {
        return;
    }

    let (function, expected) = if executor.is_main_executor() {
        ("@MainActor function", "the main thread")
    } else {
        ("actor-isolated function", "the same actor")
    };
    let violation = RuntimeViolation::UnexpectedExecutor {
        function,
        file: file.to_string(),
        line,
        expected,
    };

    match level {
        UnexpectedExecutorLogLevel::Fatal => fatal_error(runtime.config.fatal_policy, violation),
        _ => tracing::warn!(error = %violation, "unexpected executor"),
    }
}
