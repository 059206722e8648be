use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hopper_api::executor::GlobalExecutor;
use hopper_api::hooks::{NoopHooks, RuntimeHooks};
use hopper_api::job::JobRef;
use hopper_api::priority::JobPriority;

use crate::actor::status::AtomicActorStatus;
use crate::actor::{ActorOptions, ActorRef, DefaultActor, DeinitWork};
use crate::config::RuntimeConfig;
use crate::error::SystemError;
use crate::executor::{SerialExecutorRef, TaskExecutorRef, ThreadPoolExecutor};
use crate::isolation;
use crate::switch;
use crate::task::{Task, TaskBuilder, TaskHandle};

/// State shared by everything a runtime creates.
pub struct RuntimeShared {
    pub(crate) config: RuntimeConfig,
    pub(crate) global: Arc<dyn GlobalExecutor>,
    pub(crate) hooks: Arc<dyn RuntimeHooks>,
    /// Priority escalation is on: configured and the status word has a
    /// native CAS.
    pub(crate) escalation: bool,
    pool: Option<Arc<ThreadPoolExecutor>>,
    shut_down: AtomicBool,
}

impl fmt::Debug for RuntimeShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeShared")
            .field("global", &self.global)
            .field("escalation", &self.escalation)
            .field("shut_down", &self.shut_down.load(Ordering::Relaxed))
            .finish()
    }
}

/// Builds a [`Runtime`].
///
/// Without an explicit global executor a [`ThreadPoolExecutor`] is started
/// from the configuration.
#[derive(Default)]
pub struct RuntimeBuilder {
    config: Option<RuntimeConfig>,
    global: Option<Arc<dyn GlobalExecutor>>,
    hooks: Option<Arc<dyn RuntimeHooks>>,
}

impl RuntimeBuilder {
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn global_executor<E: GlobalExecutor + 'static>(mut self, executor: Arc<E>) -> Self {
        self.global = Some(executor);
        self
    }

    pub fn hooks<H: RuntimeHooks + 'static>(mut self, hooks: Arc<H>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn build(self) -> Result<Runtime, SystemError> {
        let config = self
            .config
            .unwrap_or_else(|| RuntimeConfig::process_default().clone());
        if config.max_jobs_per_drain == Some(0) {
            return Err(SystemError::ConfigError(
                "max_jobs_per_drain must be at least 1".to_string(),
            ));
        }

        let (global, pool): (Arc<dyn GlobalExecutor>, _) = match self.global {
            Some(global) => (global, None),
            None => {
                let pool = ThreadPoolExecutor::start(&config)?;
                (pool.clone(), Some(pool))
            }
        };

        let lock_free = AtomicActorStatus::is_lock_free();
        if config.priority_escalation && !lock_free {
            tracing::warn!("no native 128-bit CAS on this target, priority escalation disabled");
        }
        let escalation = config.priority_escalation && lock_free;

        tracing::debug!(
            escalation,
            check_mode = ?config.executor_check_mode,
            custom_global = pool.is_none(),
            "runtime built"
        );

        Ok(Runtime {
            shared: Arc::new(RuntimeShared {
                config,
                global,
                hooks: self.hooks.unwrap_or_else(|| Arc::new(NoopHooks)),
                escalation,
                pool,
                shut_down: AtomicBool::new(false),
            }),
        })
    }
}

/// A scheduler instance: configuration, global executor and hooks.
///
/// Actors and tasks keep the shared state alive, so dropping the `Runtime`
/// handle does not stop work already scheduled. Call
/// [`shutdown`](Runtime::shutdown) to stop the bundled pool.
///
/// ```rust,ignore
/// let runtime = Runtime::new(RuntimeConfig::default())?;
/// let actor = runtime.new_actor();
/// let handle = runtime.spawn(&actor.executor(), JobPriority::Default, |_task| {
///     // runs isolated to `actor`
/// });
/// handle.wait()?;
/// runtime.shutdown()?;
/// ```
#[derive(Clone)]
pub struct Runtime {
    shared: Arc<RuntimeShared>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Result<Self, SystemError> {
        Self::builder().config(config).build()
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    pub(crate) fn shared(&self) -> &Arc<RuntimeShared> {
        &self.shared
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    pub fn escalation_enabled(&self) -> bool {
        self.shared.escalation
    }

    pub fn global_executor(&self) -> &Arc<dyn GlobalExecutor> {
        &self.shared.global
    }

    /// The bundled pool, if this runtime started one.
    pub fn thread_pool(&self) -> Option<&Arc<ThreadPoolExecutor>> {
        self.shared.pool.as_ref()
    }

    // --- Actors ---

    pub fn new_actor(&self) -> ActorRef {
        self.new_actor_with(ActorOptions::default())
    }

    pub fn new_actor_with(&self, options: ActorOptions) -> ActorRef {
        ActorRef::from_initialized(DefaultActor::initialize(self.shared.clone(), options))
    }

    // --- Tasks ---

    pub fn task_builder(&self) -> TaskBuilder<'_> {
        TaskBuilder::new(self)
    }

    /// Creates a task at `priority` and enqueues it on `executor`.
    pub fn spawn<F>(&self, executor: &SerialExecutorRef, priority: JobPriority, body: F) -> TaskHandle
    where
        F: FnOnce(&Task) + Send + 'static,
    {
        self.task_builder().priority(priority).spawn_on(executor, body)
    }

    /// Runs a task on the calling thread instead of enqueueing it.
    ///
    /// With a generic `target` the task starts right here and any switch it
    /// makes goes through the target's queue. Otherwise the caller must
    /// already be isolated to `target`; anything else is fatal.
    pub fn start_synchronously(&self, task: Task, target: SerialExecutorRef) {
        switch::start_synchronously(&self.shared, task, target);
    }

    /// Raises a task's priority, propagating it to the actor it waits on.
    pub fn escalate(&self, executor: &SerialExecutorRef, task: &Task, priority: JobPriority) {
        switch::escalate(executor, task, priority);
    }

    // --- Jobs ---

    /// Hands `job` to `executor`.
    pub fn enqueue(&self, job: JobRef, executor: &SerialExecutorRef) {
        switch::enqueue(&self.shared, job, executor);
    }

    pub fn enqueue_global_with_delay(&self, delay: Duration, job: JobRef) {
        self.shared.global.enqueue_global_with_delay(delay, job);
    }

    /// Entry point for executors running a job they were given.
    pub fn run_job(&self, job: JobRef, executor: SerialExecutorRef) {
        switch::run_job(&self.shared, job, executor);
    }

    pub fn run_job_on_task_executor(&self, job: JobRef, task_executor: TaskExecutorRef) {
        switch::run_job_on_task_executor(&self.shared, job, task_executor);
    }

    pub fn run_job_on_serial_and_task_executor(
        &self,
        job: JobRef,
        serial: SerialExecutorRef,
        task_executor: TaskExecutorRef,
    ) {
        switch::run_job_on_serial_and_task_executor(&self.shared, job, serial, task_executor);
    }

    /// Runs `work` isolated to `executor`: inline when already isolated or
    /// when the target actor is idle, enqueued otherwise.
    pub fn deinit_on_executor(&self, executor: SerialExecutorRef, work: DeinitWork) {
        switch::deinit_on_executor(&self.shared, executor, work);
    }

    // --- Isolation ---

    /// Whether the caller is isolated to `expected`, per the configured
    /// check mode. May be fatal in strict mode.
    pub fn is_current_executor(&self, expected: &SerialExecutorRef) -> bool {
        isolation::is_current_executor(&self.shared, expected)
    }

    pub fn report_unexpected_executor(&self, file: &str, line: u32, executor: &SerialExecutorRef) {
        isolation::report_unexpected_executor(&self.shared, file, line, executor);
    }

    // --- Lifecycle ---

    /// Stops the bundled pool. Jobs still queued are dropped.
    pub fn shutdown(&self) -> Result<(), SystemError> {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return Err(SystemError::ShuttingDown);
        }
        match &self.shared.pool {
            Some(pool) => pool.shutdown(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Runtime").field(&self.shared).finish()
    }
}
