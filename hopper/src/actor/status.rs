//! The actor status word.
//!
//! All shared mutable state of an actor lives in one [`ActorStatus`] value,
//! stored in a single 128-bit atomic and only ever replaced as a whole by
//! compare-and-swap:
//!
//! ```text
//! bits   0..32   flags: state (0..3), escalated (8), max priority (24..32)
//! bits  32..64   drainer identity (0 = none recorded)
//! bits  64..128  head of the incoming job list
//! ```
//!
//! On targets without a native double-word CAS `portable_atomic` falls back
//! to a lock-based implementation; the runtime then disables escalation,
//! which also stops recording the drainer identity.

use std::fmt;
use std::ptr;
use std::sync::atomic::Ordering;

use portable_atomic::AtomicU128;

use hopper_api::job::Job;
use hopper_api::priority::JobPriority;
use hopper_api::types::{ActorState, DrainerId};

const STATE_MASK: u32 = 0x7;
const STATE_IDLE: u32 = 0x0;
const STATE_SCHEDULED: u32 = 0x1;
const STATE_RUNNING: u32 = 0x2;
const STATE_ZOMBIE: u32 = 0x3;

const IS_PRIORITY_ESCALATED: u32 = 0x100;

const PRIORITY_SHIFT: u32 = 24;
const PRIORITY_MASK: u32 = 0xff << PRIORITY_SHIFT;

/// Decoded value of an actor's status word.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ActorStatus {
    flags: u32,
    drainer: DrainerId,
    first_job: *mut Job,
}

// A snapshot; the job pointer is never dereferenced through it.
unsafe impl Send for ActorStatus {}
unsafe impl Sync for ActorStatus {}

impl ActorStatus {
    /// The status of a freshly initialized actor.
    pub const fn idle() -> Self {
        ActorStatus {
            flags: STATE_IDLE,
            drainer: 0,
            first_job: ptr::null_mut(),
        }
    }

    fn from_bits(bits: u128) -> Self {
        ActorStatus {
            flags: bits as u32,
            drainer: (bits >> 32) as u32,
            first_job: ((bits >> 64) as u64 as usize) as *mut Job,
        }
    }

    fn into_bits(self) -> u128 {
        (self.flags as u128)
            | ((self.drainer as u128) << 32)
            | ((self.first_job as usize as u64 as u128) << 64)
    }

    pub fn state(&self) -> ActorState {
        match self.flags & STATE_MASK {
            STATE_IDLE => ActorState::Idle,
            STATE_SCHEDULED => ActorState::Scheduled,
            STATE_RUNNING => ActorState::Running,
            _ => ActorState::ZombieReadyForDeallocation,
        }
    }

    fn with_state(self, state: u32) -> Self {
        ActorStatus {
            flags: (self.flags & !STATE_MASK) | state,
            ..self
        }
    }

    pub fn is_idle(&self) -> bool {
        self.flags & STATE_MASK == STATE_IDLE
    }

    /// Idle with no drainer. Callers are responsible for the priority and
    /// the job list.
    pub fn with_idle(self) -> Self {
        ActorStatus {
            drainer: 0,
            ..self.with_state(STATE_IDLE)
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.flags & STATE_MASK == STATE_SCHEDULED
    }

    pub fn with_scheduled(self) -> Self {
        ActorStatus {
            drainer: 0,
            ..self.with_state(STATE_SCHEDULED)
        }
    }

    pub fn is_running(&self) -> bool {
        self.flags & STATE_MASK == STATE_RUNNING
    }

    /// Running or zombie: some thread is the drainer.
    pub fn is_any_running(&self) -> bool {
        matches!(self.flags & STATE_MASK, STATE_RUNNING | STATE_ZOMBIE)
    }

    pub fn with_running(self, drainer: DrainerId) -> Self {
        ActorStatus {
            drainer,
            ..self.with_state(STATE_RUNNING)
        }
    }

    pub fn is_zombie(&self) -> bool {
        self.flags & STATE_MASK == STATE_ZOMBIE
    }

    /// Zombie keeps the drainer, which is still running.
    pub fn with_zombie(self) -> Self {
        self.with_state(STATE_ZOMBIE)
    }

    /// Identity of the draining thread, if one was recorded.
    pub fn current_drainer(&self) -> Option<DrainerId> {
        if self.is_any_running() && self.drainer != 0 {
            Some(self.drainer)
        } else {
            None
        }
    }

    pub fn max_priority(&self) -> JobPriority {
        JobPriority::from_raw(((self.flags & PRIORITY_MASK) >> PRIORITY_SHIFT) as u8)
    }

    pub fn with_new_priority(self, priority: JobPriority) -> Self {
        ActorStatus {
            flags: (self.flags & !PRIORITY_MASK) | ((priority.value() as u32) << PRIORITY_SHIFT),
            ..self
        }
    }

    pub fn reset_priority(self) -> Self {
        self.with_new_priority(JobPriority::Unspecified)
    }

    pub fn is_max_priority_escalated(&self) -> bool {
        self.flags & IS_PRIORITY_ESCALATED != 0
    }

    /// Raises the max priority and marks it escalated.
    ///
    /// Only valid on a scheduled or running actor whose priority is below
    /// `priority`.
    pub fn with_escalated_priority(self, priority: JobPriority) -> Self {
        debug_assert!(self.is_scheduled() || self.is_running());
        debug_assert!(priority > self.max_priority());
        ActorStatus {
            flags: self.flags | IS_PRIORITY_ESCALATED,
            ..self
        }
        .with_new_priority(priority)
    }

    pub fn without_escalated_priority(self) -> Self {
        ActorStatus {
            flags: self.flags & !IS_PRIORITY_ESCALATED,
            ..self
        }
    }

    /// Head of the incoming LIFO list.
    pub fn first_unprioritized_job(&self) -> *mut Job {
        self.first_job
    }

    pub fn with_first_unprioritized_job(self, job: *mut Job) -> Self {
        ActorStatus {
            first_job: job,
            ..self
        }
    }
}

impl Default for ActorStatus {
    fn default() -> Self {
        Self::idle()
    }
}

impl fmt::Debug for ActorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorStatus")
            .field("state", &self.state())
            .field("max_priority", &self.max_priority())
            .field("escalated", &self.is_max_priority_escalated())
            .field("drainer", &self.drainer)
            .field("first_job", &self.first_job)
            .finish()
    }
}

/// Atomic cell holding an [`ActorStatus`].
pub(crate) struct AtomicActorStatus(AtomicU128);

impl AtomicActorStatus {
    pub(crate) fn new(status: ActorStatus) -> Self {
        AtomicActorStatus(AtomicU128::new(status.into_bits()))
    }

    /// Whether the platform offers a native CAS of this width.
    pub(crate) fn is_lock_free() -> bool {
        AtomicU128::is_lock_free()
    }

    pub(crate) fn load(&self, order: Ordering) -> ActorStatus {
        ActorStatus::from_bits(self.0.load(order))
    }

    /// Weak CAS. On failure `current` is refreshed with the observed value.
    pub(crate) fn compare_exchange_weak(
        &self,
        current: &mut ActorStatus,
        new: ActorStatus,
        success: Ordering,
        failure: Ordering,
    ) -> bool {
        match self
            .0
            .compare_exchange_weak(current.into_bits(), new.into_bits(), success, failure)
        {
            Ok(_) => true,
            Err(observed) => {
                *current = ActorStatus::from_bits(observed);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_status() {
        let status = ActorStatus::idle();
        assert!(status.is_idle());
        assert_eq!(status.max_priority(), JobPriority::Unspecified);
        assert!(status.first_unprioritized_job().is_null());
        assert_eq!(status.current_drainer(), None);
    }

    #[test]
    fn test_bits_preserve_every_field() {
        let fake_job = 0x7fff_1234_5670usize as *mut Job;
        let status = ActorStatus::idle()
            .with_scheduled()
            .with_new_priority(JobPriority::Default)
            .with_running(42)
            .with_escalated_priority(JobPriority::UserInteractive)
            .with_first_unprioritized_job(fake_job);

        let decoded = ActorStatus::from_bits(status.into_bits());
        assert_eq!(decoded, status);
        assert_eq!(decoded.state(), ActorState::Running);
        assert_eq!(decoded.current_drainer(), Some(42));
        assert_eq!(decoded.max_priority(), JobPriority::UserInteractive);
        assert!(decoded.is_max_priority_escalated());
        assert_eq!(decoded.first_unprioritized_job(), fake_job);
    }

    #[test]
    fn test_transitions_clear_drainer() {
        let running = ActorStatus::idle().with_running(7);
        assert_eq!(running.with_scheduled().current_drainer(), None);
        assert_eq!(running.with_idle().current_drainer(), None);
        let zombie = running.with_zombie();
        assert!(zombie.is_zombie());
        assert!(zombie.is_any_running());
        assert_eq!(zombie.current_drainer(), Some(7));
    }

    #[test]
    fn test_escalation_flag() {
        let status = ActorStatus::idle()
            .with_scheduled()
            .with_new_priority(JobPriority::Utility)
            .with_escalated_priority(JobPriority::UserInitiated);
        assert!(status.is_max_priority_escalated());
        let cleared = status.without_escalated_priority();
        assert!(!cleared.is_max_priority_escalated());
        assert_eq!(cleared.max_priority(), JobPriority::UserInitiated);
        assert_eq!(cleared.reset_priority().max_priority(), JobPriority::Unspecified);
    }

    #[test]
    fn test_atomic_cas_refreshes_expected() {
        let cell = AtomicActorStatus::new(ActorStatus::idle());
        let mut expected = ActorStatus::idle().with_scheduled();
        let swapped = cell.compare_exchange_weak(
            &mut expected,
            ActorStatus::idle().with_running(1),
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
        assert!(!swapped);
        assert!(expected.is_idle());

        let mut expected = ActorStatus::idle();
        let target = ActorStatus::idle().with_scheduled();
        while !cell.compare_exchange_weak(&mut expected, target, Ordering::Release, Ordering::Relaxed) {
            assert!(expected.is_idle());
        }
        assert!(cell.load(Ordering::Acquire).is_scheduled());
    }
}
