use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_queue::SegQueue;
use flume::{Receiver, RecvTimeoutError, Sender};

use hopper_api::job::JobRef;
use hopper_api::priority::BUCKET_COUNT;

/// A queue of jobs waiting for a worker thread, bucketed by priority.
///
/// Used by both bundled global executors. Each bucket is a lock-free
/// `SegQueue`; pops always serve the most urgent nonempty bucket first and
/// are FIFO within a bucket.
///
/// # Thread Safety
/// - Safe for concurrent producers and consumers
/// - Every push sends one wake token through a flume channel, which idle
///   workers block on with a timeout
pub struct RunQueue {
    buckets: [SegQueue<JobRef>; BUCKET_COUNT],
    len: AtomicUsize,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl RunQueue {
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = flume::unbounded();
        Self {
            buckets: std::array::from_fn(|_| SegQueue::new()),
            len: AtomicUsize::new(0),
            wake_tx,
            wake_rx,
        }
    }

    /// Pushes a job into its priority bucket and wakes one waiting worker.
    pub fn push(&self, job: JobRef) {
        let bucket = job.priority().bucket_index();
        self.buckets[bucket].push(job);
        self.len.fetch_add(1, Ordering::Release);
        // Both ends live in `self`, so this cannot fail.
        let _ = self.wake_tx.send(());
    }

    /// Pops the oldest job of the most urgent nonempty bucket.
    pub fn try_pop(&self) -> Option<JobRef> {
        for bucket in &self.buckets {
            if let Some(job) = bucket.pop() {
                self.len.fetch_sub(1, Ordering::AcqRel);
                // Consume the token paid for this job if it is still pending.
                let _ = self.wake_rx.try_recv();
                return Some(job);
            }
        }
        None
    }

    /// Pops a job, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<JobRef> {
        loop {
            if let Some(job) = self.try_pop() {
                return Some(job);
            }
            match self.wake_rx.recv_timeout(timeout) {
                Ok(()) => continue,
                Err(RecvTimeoutError::Timeout) => return self.try_pop(),
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Wakes up to `count` waiting workers without giving them a job.
    pub fn wake(&self, count: usize) {
        for _ in 0..count {
            let _ = self.wake_tx.send(());
        }
    }

    /// Snapshot of the number of queued jobs.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every queued job without running it, returning how many there were.
    pub fn clear(&self) -> usize {
        let mut dropped = 0;
        while let Some(job) = self.try_pop() {
            drop(job);
            dropped += 1;
        }
        dropped
    }
}

impl Default for RunQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RunQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunQueue").field("len", &self.len()).finish()
    }
}
