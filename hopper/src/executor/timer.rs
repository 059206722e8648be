use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::cmp::Reverse;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flume::{RecvTimeoutError, Sender};

use hopper_api::job::JobRef;

use super::queue::RunQueue;
use crate::error::SystemError;

enum TimerCommand {
    Schedule(Instant, JobRef),
    Shutdown,
}

struct DelayedJob {
    deadline: Instant,
    seq: u64,
    job: JobRef,
}

impl PartialEq for DelayedJob {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for DelayedJob {}

impl PartialOrd for DelayedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline.cmp(&other.deadline).then(self.seq.cmp(&other.seq))
    }
}

/// Background thread moving delayed jobs into a run queue once due.
///
/// Jobs with equal deadlines are released in submission order. Jobs still
/// pending at shutdown are dropped without running.
pub(crate) struct DelayTimer {
    commands: Sender<TimerCommand>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DelayTimer {
    pub(crate) fn start(name: String, queue: Arc<RunQueue>, dispatch: tracing::Dispatch) -> Result<Self, SystemError> {
        let (commands, rx) = flume::unbounded::<TimerCommand>();
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || {
                tracing::dispatcher::with_default(&dispatch, || {
                    let mut pending: BinaryHeap<Reverse<DelayedJob>> = BinaryHeap::new();
                    let mut seq = 0u64;
                    loop {
                        let command = match pending.peek() {
                            Some(Reverse(next)) => rx.recv_deadline(next.deadline),
                            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
                        };
                        match command {
                            Ok(TimerCommand::Schedule(deadline, job)) => {
                                pending.push(Reverse(DelayedJob { deadline, seq, job }));
                                seq += 1;
                            }
                            Ok(TimerCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                            Err(RecvTimeoutError::Timeout) => {}
                        }

                        let now = Instant::now();
                        while pending.peek().is_some_and(|Reverse(next)| next.deadline <= now) {
                            if let Some(Reverse(due)) = pending.pop() {
                                queue.push(due.job);
                            }
                        }
                    }
                    if !pending.is_empty() {
                        tracing::debug!(dropped = pending.len(), "delay timer stopped with pending jobs");
                    }
                });
            })
            .map_err(|e| SystemError::ThreadSetupError(format!("failed to spawn delay timer: {}", e)))?;

        Ok(Self {
            commands,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Schedules `job` to be pushed after `delay`.
    ///
    /// Returns the job back if the timer has already stopped.
    pub(crate) fn schedule(&self, delay: Duration, job: JobRef) -> Result<(), JobRef> {
        let deadline = Instant::now() + delay;
        self.commands
            .send(TimerCommand::Schedule(deadline, job))
            .map_err(|flume::SendError(command)| match command {
                TimerCommand::Schedule(_, job) => job,
                TimerCommand::Shutdown => unreachable!("only schedule commands are returned here"),
            })
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.commands.send(TimerCommand::Shutdown);
        let handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("delay timer thread panicked");
            }
        }
    }
}
