use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use hopper_api::executor::GlobalExecutor;
use hopper_api::job::JobRef;

use super::queue::RunQueue;

/// A global executor that only runs jobs when told to.
///
/// Jobs are ordered exactly like on the thread pool, but run on the thread
/// calling [`run_next`](ManualExecutor::run_next) or
/// [`run_until_idle`](ManualExecutor::run_until_idle). Delayed jobs are held
/// until [`fire_delayed`](ManualExecutor::fire_delayed), regardless of their
/// delay.
///
/// ```rust,ignore
/// let executor = Arc::new(ManualExecutor::new());
/// let runtime = Runtime::builder().global_executor(executor.clone()).build()?;
/// // ... enqueue work ...
/// executor.run_until_idle();
/// ```
#[derive(Default)]
pub struct ManualExecutor {
    queue: RunQueue,
    delayed: Mutex<Vec<(Duration, JobRef)>>,
    enqueued: AtomicUsize,
    delayed_enqueued: AtomicUsize,
    executed: AtomicUsize,
}

impl ManualExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the most urgent queued job. Returns false if there was none.
    pub fn run_next(&self) -> bool {
        match self.queue.try_pop() {
            Some(job) => {
                job.run();
                self.executed.fetch_add(1, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Runs jobs until the queue is empty, including jobs enqueued by the
    /// jobs it runs. Returns the number of jobs run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }

    /// Moves every delayed job into the queue, shortest delay first.
    pub fn fire_delayed(&self) -> usize {
        let mut delayed = std::mem::take(&mut *self.delayed.lock().unwrap_or_else(PoisonError::into_inner));
        delayed.sort_by_key(|(delay, _)| *delay);
        let count = delayed.len();
        for (_, job) in delayed {
            self.queue.push(job);
        }
        count
    }

    /// Jobs waiting to run.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Delayed jobs not yet fired.
    pub fn pending_delayed(&self) -> usize {
        self.delayed.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Total `enqueue_global` calls.
    pub fn enqueue_count(&self) -> usize {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Total `enqueue_global_with_delay` calls.
    pub fn delayed_enqueue_count(&self) -> usize {
        self.delayed_enqueued.load(Ordering::Relaxed)
    }

    /// Total jobs run.
    pub fn executed_count(&self) -> usize {
        self.executed.load(Ordering::Relaxed)
    }
}

impl GlobalExecutor for ManualExecutor {
    fn enqueue_global(&self, job: JobRef) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.queue.push(job);
    }

    fn enqueue_global_with_delay(&self, delay: Duration, job: JobRef) {
        self.delayed_enqueued.fetch_add(1, Ordering::Relaxed);
        self.delayed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((delay, job));
    }
}

impl fmt::Debug for ManualExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualExecutor")
            .field("pending", &self.pending())
            .field("pending_delayed", &self.pending_delayed())
            .field("enqueued", &self.enqueue_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopper_api::job::ClosureJob;
    use hopper_api::priority::JobPriority;
    use std::sync::Arc;

    #[test]
    fn test_delayed_jobs_wait_for_fire() {
        let executor = ManualExecutor::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for (name, delay) in [("later", 20), ("sooner", 10)] {
            let log = log.clone();
            executor.enqueue_global_with_delay(
                Duration::from_millis(delay),
                ClosureJob::new(JobPriority::Default, move || log.lock().unwrap().push(name)),
            );
        }
        assert_eq!(executor.run_until_idle(), 0);
        assert_eq!(executor.pending_delayed(), 2);

        assert_eq!(executor.fire_delayed(), 2);
        assert_eq!(executor.run_until_idle(), 2);
        assert_eq!(*log.lock().unwrap(), vec!["sooner", "later"]);
        assert_eq!(executor.delayed_enqueue_count(), 2);
        assert_eq!(executor.enqueue_count(), 0);
    }
}
