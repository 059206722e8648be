use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use hopper_api::executor::GlobalExecutor;
use hopper_api::job::JobRef;

use super::queue::RunQueue;
use super::timer::DelayTimer;
use crate::config::RuntimeConfig;
use crate::error::SystemError;
use crate::logging;

/// Status codes for the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    /// Workers are being started
    Initializing = 0,
    /// Accepting and running jobs
    Running = 1,
    /// `shutdown` is in progress
    ShuttingDown = 2,
    /// All workers have stopped
    Shutdown = 3,
}

impl PoolStatus {
    fn from_usize(value: usize) -> Self {
        match value {
            0 => PoolStatus::Initializing,
            1 => PoolStatus::Running,
            2 => PoolStatus::ShuttingDown,
            _ => PoolStatus::Shutdown,
        }
    }
}

/// Status codes for a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerStatus {
    Idle = 0,
    Processing = 1,
    Stopped = 2,
}

/// Snapshot of the pool state
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Number of worker threads
    pub pool_size: usize,
    /// Jobs waiting for a worker
    pub queue_length: usize,
    /// Workers currently running a job
    pub busy_workers: usize,
    /// Jobs that panicked since the pool started
    pub panicked_jobs: usize,
    pub status: PoolStatus,
}

/// One OS worker thread pulling jobs from the shared run queue.
///
/// Holds only the queue and flags, never the pool itself, so that dropping
/// the pool is enough to stop it.
struct Worker {
    id: usize,
    queue: Arc<RunQueue>,
    shutdown_flag: Arc<AtomicBool>,
    status: Arc<AtomicUsize>,
    panicked: Arc<AtomicUsize>,
    idle_wait: Duration,
}

impl Worker {
    fn run_loop(&self) {
        crate::log_scheduler!("global_pool", "worker_started", worker = self.id);
        while !self.shutdown_flag.load(Ordering::Acquire) {
            let Some(job) = self.queue.pop_timeout(self.idle_wait) else {
                continue;
            };
            self.status.store(WorkerStatus::Processing as usize, Ordering::Relaxed);
            let kind = job.kind_raw();
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job.run())) {
                self.panicked.fetch_add(1, Ordering::Relaxed);
                let message = panic_message(payload.as_ref());
                tracing::error!(worker = self.id, job_kind = kind, panic = %message, "job panicked");
            }
            self.status.store(WorkerStatus::Idle as usize, Ordering::Relaxed);
        }
        self.status.store(WorkerStatus::Stopped as usize, Ordering::Relaxed);
        crate::log_scheduler!("global_pool", "worker_stopped", worker = self.id);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// The default global executor: a fixed pool of named OS threads.
///
/// Jobs are served most urgent priority first. Delayed jobs are held by a
/// timer thread until due. Worker threads log through the dispatcher that
/// was current when the pool was started.
///
/// # Shutdown
/// [`ThreadPoolExecutor::shutdown`] stops the timer and the workers, waits
/// for running jobs to return, and drops any job still queued. Jobs enqueued
/// afterwards are dropped immediately.
pub struct ThreadPoolExecutor {
    queue: Arc<RunQueue>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_status: Vec<Arc<AtomicUsize>>,
    shutdown_flag: Arc<AtomicBool>,
    panicked: Arc<AtomicUsize>,
    status: AtomicUsize,
    timer: DelayTimer,
    pool_size: usize,
    shutdown_timeout: Duration,
}

impl ThreadPoolExecutor {
    /// Starts `config.pool_size` workers named `{thread_name_prefix}{id}`.
    pub fn start(config: &RuntimeConfig) -> Result<Arc<Self>, SystemError> {
        if config.pool_size == 0 {
            return Err(SystemError::ConfigError("pool_size must be at least 1".to_string()));
        }

        let dispatch = logging::current_subscriber();
        let queue = Arc::new(RunQueue::new());
        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let panicked = Arc::new(AtomicUsize::new(0));
        let timer = DelayTimer::start(
            format!("{}timer", config.thread_name_prefix),
            queue.clone(),
            dispatch.clone(),
        )?;

        let pool = ThreadPoolExecutor {
            queue: queue.clone(),
            workers: Mutex::new(Vec::with_capacity(config.pool_size)),
            worker_status: (0..config.pool_size)
                .map(|_| Arc::new(AtomicUsize::new(WorkerStatus::Idle as usize)))
                .collect(),
            shutdown_flag: shutdown_flag.clone(),
            panicked: panicked.clone(),
            status: AtomicUsize::new(PoolStatus::Initializing as usize),
            timer,
            pool_size: config.pool_size,
            shutdown_timeout: config.shutdown_timeout,
        };

        for id in 0..config.pool_size {
            let worker = Worker {
                id,
                queue: queue.clone(),
                shutdown_flag: shutdown_flag.clone(),
                status: pool.worker_status[id].clone(),
                panicked: panicked.clone(),
                idle_wait: config.idle_wait,
            };
            let dispatch = dispatch.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}{}", config.thread_name_prefix, id))
                .spawn(move || tracing::dispatcher::with_default(&dispatch, || worker.run_loop()));
            match spawned {
                Ok(handle) => pool.lock_workers().push(handle),
                Err(e) => {
                    let _ = pool.shutdown();
                    return Err(SystemError::ThreadSetupError(format!(
                        "failed to spawn worker {}: {}",
                        id, e
                    )));
                }
            }
        }

        pool.status.store(PoolStatus::Running as usize, Ordering::Release);
        tracing::info!(pool_size = config.pool_size, "global pool started");
        Ok(Arc::new(pool))
    }

    fn lock_workers(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus::from_usize(self.status.load(Ordering::Acquire))
    }

    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            pool_size: self.pool_size,
            queue_length: self.queue.len(),
            busy_workers: self
                .worker_status
                .iter()
                .filter(|s| s.load(Ordering::Relaxed) == WorkerStatus::Processing as usize)
                .count(),
            panicked_jobs: self.panicked.load(Ordering::Relaxed),
            status: self.status(),
        }
    }

    /// Stops the pool.
    ///
    /// Fails with [`SystemError::ShuttingDown`] if a shutdown already ran,
    /// and with [`SystemError::ShutdownError`] if a worker does not stop
    /// within the configured timeout.
    pub fn shutdown(&self) -> Result<(), SystemError> {
        let previous = self.status.swap(PoolStatus::ShuttingDown as usize, Ordering::AcqRel);
        if matches!(
            PoolStatus::from_usize(previous),
            PoolStatus::ShuttingDown | PoolStatus::Shutdown
        ) {
            self.status.store(previous, Ordering::Release);
            return Err(SystemError::ShuttingDown);
        }
        tracing::info!("global pool shutting down");

        self.timer.shutdown();
        self.shutdown_flag.store(true, Ordering::Release);
        self.queue.wake(self.pool_size);

        let deadline = Instant::now() + self.shutdown_timeout;
        let handles: Vec<JoinHandle<()>> = self.lock_workers().drain(..).collect();
        let mut stuck = Vec::new();
        for handle in handles {
            // The last runtime handle can be dropped by a job on a worker.
            if handle.thread().id() == thread::current().id() {
                continue;
            }
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            if !handle.is_finished() {
                stuck.push(handle.thread().name().unwrap_or("<unnamed>").to_string());
                continue;
            }
            if handle.join().is_err() {
                tracing::error!("worker thread terminated by a panic");
            }
        }

        let dropped = self.queue.clear();
        if dropped > 0 {
            tracing::warn!(dropped, "dropped jobs still queued at shutdown");
        }
        self.status.store(PoolStatus::Shutdown as usize, Ordering::Release);

        if !stuck.is_empty() {
            return Err(SystemError::ShutdownError(format!(
                "workers did not stop within {:?}: {}",
                self.shutdown_timeout,
                stuck.join(", ")
            )));
        }
        tracing::info!("global pool stopped");
        Ok(())
    }

    fn accepting(&self) -> bool {
        matches!(self.status(), PoolStatus::Initializing | PoolStatus::Running)
    }
}

impl GlobalExecutor for ThreadPoolExecutor {
    fn enqueue_global(&self, job: JobRef) {
        if !self.accepting() {
            tracing::warn!(priority = %job.priority(), "global pool stopped, dropping job");
            return;
        }
        crate::log_scheduler!("global_pool", "job_queued", bucket = job.priority().bucket_index());
        self.queue.push(job);
    }

    fn enqueue_global_with_delay(&self, delay: Duration, job: JobRef) {
        if !self.accepting() {
            tracing::warn!(priority = %job.priority(), "global pool stopped, dropping delayed job");
            return;
        }
        if let Err(job) = self.timer.schedule(delay, job) {
            tracing::warn!(priority = %job.priority(), "delay timer stopped, dropping job");
        }
    }
}

impl fmt::Debug for ThreadPoolExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPoolExecutor")
            .field("pool_size", &self.pool_size)
            .field("queue", &self.queue)
            .field("status", &self.status())
            .finish()
    }
}

impl Drop for ThreadPoolExecutor {
    fn drop(&mut self) {
        if self.accepting() {
            let _ = self.shutdown();
        }
    }
}
