use std::fmt;

use uuid::Uuid;

/// Identity of an actor, stable for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(pub Uuid);

impl ActorId {
    pub fn new() -> Self {
        ActorId(Uuid::new_v4())
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "actor-{}", self.0)
    }
}

/// Identity of a task, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Opaque per-thread token naming the thread currently draining an actor.
///
/// Zero means "no drainer recorded".
pub type DrainerId = u32;

/// Coarse lifecycle state of an actor's status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActorState {
    /// No work queued and no thread draining
    Idle,
    /// Work queued and a processing job dispatched, not yet running
    Scheduled,
    /// A thread holds the actor and is draining it
    Running,
    /// The last reference was dropped while running; freed on unlock
    ZombieReadyForDeallocation,
}

impl fmt::Display for ActorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActorState::Idle => "idle",
            ActorState::Scheduled => "scheduled",
            ActorState::Running => "running",
            ActorState::ZombieReadyForDeallocation => "zombie",
        };
        f.write_str(name)
    }
}
