use std::env;
use std::time::Duration;

use lazy_static::lazy_static;

/// Environment variable selecting the isolation checking mode.
pub const EXECUTOR_CHECK_MODE_ENV: &str = "HOPPER_IS_CURRENT_EXECUTOR_MODE";

/// Environment variable selecting how unexpected-executor reports are handled.
pub const UNEXPECTED_EXECUTOR_LOG_LEVEL_ENV: &str = "HOPPER_UNEXPECTED_EXECUTOR_LOG_LEVEL";

// --- Configuration Enums ---

/// How `is_current_executor` treats contexts it cannot prove are isolated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutorCheckMode {
    /// Never crash; return `false` when isolation cannot be established, and
    /// treat any main/non-main mismatch as not isolated.
    Legacy,
    /// Defer to the executor's `check_isolated`, which crashes on failure.
    Strict,
}

impl ExecutorCheckMode {
    /// Parses the values accepted in [`EXECUTOR_CHECK_MODE_ENV`].
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "legacy" | "nocrash" => Some(ExecutorCheckMode::Legacy),
            "strict" | "swift6" | "crash" => Some(ExecutorCheckMode::Strict),
            _ => None,
        }
    }
}

/// What to do when code is found running on an unexpected executor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum UnexpectedExecutorLogLevel {
    /// Say nothing
    Ignore = 0,
    /// Log a warning and continue
    Warn = 1,
    /// Log an error and stop the process
    Fatal = 2,
}

impl UnexpectedExecutorLogLevel {
    /// Parses the numeric values accepted in [`UNEXPECTED_EXECUTOR_LOG_LEVEL_ENV`].
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "0" => Some(UnexpectedExecutorLogLevel::Ignore),
            "1" => Some(UnexpectedExecutorLogLevel::Warn),
            "2" => Some(UnexpectedExecutorLogLevel::Fatal),
            _ => None,
        }
    }
}

/// How a broken scheduler invariant stops the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FatalPolicy {
    /// Abort the process after logging the diagnostic.
    Abort,
    /// Panic with the diagnostic; lets tests observe violations.
    Panic,
}

// --- Runtime Configuration ---

/// Configuration for a [`Runtime`](crate::runtime::Runtime).
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Number of worker threads in the default global pool.
    pub pool_size: usize,

    /// Prefix for worker thread names.
    pub thread_name_prefix: String,

    /// How long an idle worker waits for a wakeup before re-checking shutdown.
    pub idle_wait: Duration,

    /// Whether priority escalation (stealers, drainer boosts) is enabled.
    ///
    /// When disabled the status word never records the drainer identity.
    pub priority_escalation: bool,

    /// Isolation checking mode.
    pub executor_check_mode: ExecutorCheckMode,

    /// Handling of unexpected-executor reports; derived from the mode when `None`.
    pub unexpected_executor_log_level: Option<UnexpectedExecutorLogLevel>,

    /// Maximum number of jobs drained from one actor before handing it to a
    /// fresh processing job. `None` drains until empty.
    pub max_jobs_per_drain: Option<usize>,

    /// How broken invariants stop the process.
    pub fatal_policy: FatalPolicy,

    /// Upper bound on waiting for worker threads during shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            pool_size: num_cpus::get(),
            thread_name_prefix: "hopper-worker-".to_string(),
            idle_wait: Duration::from_millis(50),
            priority_escalation: true,
            executor_check_mode: ExecutorCheckMode::Strict,
            unexpected_executor_log_level: None,
            max_jobs_per_drain: None,
            fatal_policy: FatalPolicy::Abort,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

lazy_static! {
    static ref PROCESS_DEFAULT: RuntimeConfig = RuntimeConfig::from_env();
}

impl RuntimeConfig {
    /// The process-wide default, read from the environment on first use.
    pub fn process_default() -> &'static RuntimeConfig {
        &PROCESS_DEFAULT
    }

    /// Defaults overridden by the recognized environment variables.
    ///
    /// Unrecognized values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = env::var(EXECUTOR_CHECK_MODE_ENV) {
            match ExecutorCheckMode::parse(&value) {
                Some(mode) => config.executor_check_mode = mode,
                None => tracing::warn!("Ignoring unknown {}={}", EXECUTOR_CHECK_MODE_ENV, value),
            }
        }
        if let Ok(value) = env::var(UNEXPECTED_EXECUTOR_LOG_LEVEL_ENV) {
            match UnexpectedExecutorLogLevel::parse(&value) {
                Some(level) => config.unexpected_executor_log_level = Some(level),
                None => tracing::warn!("Ignoring unknown {}={}", UNEXPECTED_EXECUTOR_LOG_LEVEL_ENV, value),
            }
        }
        config
    }

    /// Effective handling of unexpected-executor reports.
    ///
    /// Strict mode always stops the process. Otherwise an explicit level
    /// wins, falling back to a warning.
    pub fn effective_unexpected_executor_log_level(&self) -> UnexpectedExecutorLogLevel {
        match self.executor_check_mode {
            ExecutorCheckMode::Strict => UnexpectedExecutorLogLevel::Fatal,
            ExecutorCheckMode::Legacy => self
                .unexpected_executor_log_level
                .unwrap_or(UnexpectedExecutorLogLevel::Warn),
        }
    }

    /// A configuration suited to deterministic tests: one worker, panicking
    /// on violations, legacy isolation checks.
    pub fn for_tests() -> Self {
        Self {
            pool_size: 1,
            executor_check_mode: ExecutorCheckMode::Legacy,
            fatal_policy: FatalPolicy::Panic,
            shutdown_timeout: Duration::from_secs(5),
            ..Self::default()
        }
    }
}
