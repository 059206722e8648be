// Logging for the hopper scheduler
//
// Built on `tracing`. The scheduler itself only emits events; a binary or a
// test chooses how they are rendered by calling one of the `init_*`
// functions below once at startup.
//
// ```rust
// use hopper::logging;
//
// logging::init_development();
// logging::info!("runtime starting");
//
// let span = hopper::actor_span!("actor-1234");
// let _guard = span.enter();
// hopper::log_scheduler!("global_pool", "job_queued", bucket = 2);
// ```
//
// Worker threads started by the global pool inherit the dispatcher that was
// current on the thread that built the pool (see `current_subscriber`).

use std::io;
use std::sync::Once;
use tracing::{Level, Subscriber};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: Level,
    /// Whether to use JSON format for logs
    pub json_format: bool,
    /// Whether to include file and line information
    pub show_file_line: bool,
    /// Whether to include thread name/id
    pub show_thread_info: bool,
    /// Whether to include timestamps
    pub show_time: bool,
    /// Target filter expressions (format: "target=level,target2=level2,...")
    pub target_filters: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            show_file_line: true,
            show_thread_info: true,
            show_time: true,
            target_filters: None,
        }
    }
}

static INIT: Once = Once::new();

fn env_filter(config: &LogConfig) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env().add_directive(config.level.into());
    if let Some(filters) = &config.target_filters {
        for directive in filters.split(',') {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
    }
    filter
}

/// Initialize the logging system with the given configuration
///
/// Only the first call of any `init*` function takes effect.
pub fn init(config: LogConfig) {
    INIT.call_once(|| {
        let registry = tracing_subscriber::registry().with(env_filter(&config));

        let subscriber: Box<dyn Subscriber + Send + Sync> = if config.json_format {
            Box::new(registry.with(fmt::layer().json().flatten_event(true)))
        } else if config.show_time {
            Box::new(registry.with(
                fmt::layer()
                    .with_ansi(atty::is(atty::Stream::Stdout))
                    .with_file(config.show_file_line)
                    .with_line_number(config.show_file_line)
                    .with_thread_names(config.show_thread_info)
                    .with_thread_ids(config.show_thread_info),
            ))
        } else {
            Box::new(registry.with(
                fmt::layer()
                    .without_time()
                    .with_ansi(atty::is(atty::Stream::Stdout))
                    .with_file(config.show_file_line)
                    .with_line_number(config.show_file_line)
                    .with_thread_names(config.show_thread_info)
                    .with_thread_ids(config.show_thread_info),
            ))
        };

        set_global_subscriber(subscriber);
    });
}

fn set_global_subscriber<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error setting global tracing subscriber: {}", err);
    }
}

/// Opens `path` for appending, creating it if needed.
pub fn file_writer(path: &str) -> io::Result<Box<dyn io::Write + Send + Sync + 'static>> {
    use std::fs::OpenOptions;

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Box::new(file))
}

/// Initialize logging with both console and file output
///
/// The file is opened eagerly so that a bad path is reported to the caller.
/// Console output respects terminal color support; file output is plain.
pub fn init_with_file(config: LogConfig, log_file: &str) -> io::Result<()> {
    file_writer(log_file)?;

    INIT.call_once(|| {
        let console_layer = fmt::layer()
            .with_ansi(atty::is(atty::Stream::Stdout))
            .with_file(config.show_file_line)
            .with_line_number(config.show_file_line)
            .with_thread_names(config.show_thread_info)
            .with_thread_ids(config.show_thread_info);

        let log_file_path = log_file.to_string();
        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_writer(move || match file_writer(&log_file_path) {
                Ok(writer) => writer,
                Err(_) => Box::new(io::stderr()),
            })
            .with_file(true)
            .with_line_number(true)
            .with_thread_names(true)
            .with_thread_ids(true);

        let subscriber = tracing_subscriber::registry()
            .with(env_filter(&config))
            .with(console_layer)
            .with(file_layer);

        set_global_subscriber(subscriber);
    });

    Ok(())
}

/// INFO level, human-readable console output.
pub fn init_default() {
    init(LogConfig::default());
}

/// DEBUG everywhere, TRACE for actor state transitions.
pub fn init_development() {
    init(LogConfig {
        level: Level::DEBUG,
        target_filters: Some("hopper=debug,hopper::actor=trace".to_string()),
        ..LogConfig::default()
    });
}

/// INFO level JSON without file/line information.
pub fn init_production() {
    init(LogConfig {
        level: Level::INFO,
        json_format: true,
        show_file_line: false,
        show_thread_info: true,
        show_time: true,
        target_filters: None,
    });
}

/// Warnings and errors only, compact, for test binaries.
pub fn init_test() {
    init(LogConfig {
        level: Level::WARN,
        json_format: false,
        show_file_line: true,
        show_thread_info: false,
        show_time: false,
        target_filters: None,
    });
}

/// Create a span covering work done on behalf of an actor
///
/// ```rust
/// let span = hopper::actor_span!("actor-42");
/// let _guard = span.enter();
///
/// let span = hopper::actor_span!("actor-42", priority = "default");
/// ```
#[macro_export]
macro_rules! actor_span {
    ($actor_id:expr) => {
        $crate::__tracing::debug_span!("actor", id = %$actor_id)
    };
    ($actor_id:expr, $($fields:tt)*) => {
        $crate::__tracing::debug_span!("actor", id = %$actor_id, $($fields)*)
    };
}

/// Log an actor status transition at TRACE level
///
/// ```rust
/// hopper::log_transition!("actor-42", "enqueue", "idle", "scheduled");
/// ```
#[macro_export]
macro_rules! log_transition {
    ($actor_id:expr, $operation:expr, $old:expr, $new:expr) => {
        $crate::__tracing::trace!(actor = %$actor_id, operation = $operation, old = %$old, new = %$new);
    };
    ($actor_id:expr, $operation:expr, $old:expr, $new:expr, $($fields:tt)*) => {
        $crate::__tracing::trace!(actor = %$actor_id, operation = $operation, old = %$old, new = %$new, $($fields)*);
    };
}

/// Log error events
///
/// ```rust
/// let error = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
/// hopper::log_error!(error);
/// hopper::log_error!(error, component = "global_pool");
/// ```
#[macro_export]
macro_rules! log_error {
    ($error:expr) => {
        $crate::__tracing::error!(error = %$error);
    };
    ($error:expr, $($fields:tt)*) => {
        $crate::__tracing::error!(error = %$error, $($fields)*);
    };
}

/// Log scheduling events
///
/// ```rust
/// hopper::log_scheduler!("global_pool", "worker_started");
/// hopper::log_scheduler!("global_pool", "job_queued", bucket = 1);
/// ```
#[macro_export]
macro_rules! log_scheduler {
    ($scheduler:expr, $event:expr) => {
        $crate::__tracing::debug!(scheduler = $scheduler, event = $event);
    };
    ($scheduler:expr, $event:expr, $($fields:tt)*) => {
        $crate::__tracing::debug!(scheduler = $scheduler, event = $event, $($fields)*);
    };
}

/// Get the current tracing dispatcher
///
/// Captured when the global pool starts so its worker threads log through
/// the same subscriber as the thread that created them.
#[inline]
pub fn current_subscriber() -> tracing::Dispatch {
    tracing::dispatcher::get_default(|d| d.clone())
}

// Re-export the most commonly used tracing macros for convenience
pub use tracing::{debug, error, info, trace, warn};
