use thiserror::Error;

use hopper_api::errors::RuntimeViolation;

use crate::config::FatalPolicy;

/// Errors related to the runtime and its global pool.
#[derive(Error, Debug)]
pub enum SystemError {
    #[error("Thread setup error: {0}")]
    ThreadSetupError(String),
    #[error("Runtime is not running")]
    NotRunning,
    #[error("Runtime is already shutting down")]
    ShuttingDown,
    #[error("Failed during shutdown: {0}")]
    ShutdownError(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Worker state error: {0}")]
    WorkerStateError(String),
    #[error("Internal system error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Reports a broken invariant and stops.
///
/// The violation is always logged at error level first. With
/// [`FatalPolicy::Abort`] the process aborts; with [`FatalPolicy::Panic`] the
/// current thread panics with the violation as its message.
#[cold]
pub fn fatal_error(policy: FatalPolicy, violation: RuntimeViolation) -> ! {
    crate::log_error!(violation, fatal = true);
    match policy {
        FatalPolicy::Abort => {
            eprintln!("hopper: fatal error: {}", violation);
            std::process::abort()
        }
        FatalPolicy::Panic => panic!("{}", violation),
    }
}
