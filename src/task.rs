//! # Task Control Block
//!
//! Defines the task model for RRTOS: the lifecycle state machine, the
//! per-task control record, the handle handed back to applications, and
//! the creation errors.

use core::fmt;

use heapless::String;

use crate::config::TASK_NAME_LEN;
use crate::stack::StackRegion;

/// Task entry point. Tasks never return; a task that does anyway lands in
/// the `task_exit` trap installed as its return address.
pub type TaskEntry = extern "C" fn() -> !;

/// Bounded task name.
pub type TaskName = String<TASK_NAME_LEN>;

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Execution state of a task.
///
/// ```text
///                 Dispatch
///   ┌─────────┐ ──────────► ┌─────────┐
///   │  Ready  │             │ Running │
///   └─────────┘ ◄────────── └─────────┘
///     ▲     ▲     Preempt        │
///     │     │ Wake               │ Delay
///     │     │               ┌─────────┐
///     │     └────────────── │ Blocked │
///     │                     └─────────┘
///     │ Resume (expired)         ▲ Resume (pending)
///     │                          │
///   ┌────────────────────────────────┐
///   │           Suspended            │ ◄── Suspend (from any live state)
///   └────────────────────────────────┘
///
///   Delete (from any state) ──► Deleted (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskState {
    /// Task is currently executing on the CPU.
    Running,
    /// Task is ready to run and waiting for the scheduler.
    Ready,
    /// Task is sleeping until its wake tick.
    Blocked,
    /// Task is suspended and not schedulable until resumed.
    Suspended,
    /// Task is deleted for good. Its slot and stack stay allocated.
    Deleted,
}

/// Inputs that drive the task state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskEvent {
    /// The scheduler picked this task.
    Dispatch,
    /// The task was switched out while still runnable.
    Preempt,
    /// The running task went to sleep.
    Delay,
    /// The tick counter reached the task's wake tick.
    Wake,
    /// `suspend()` was called on the task.
    Suspend,
    /// `resume()` was called; `expired` tells whether the wake tick has
    /// already been reached.
    Resume { expired: bool },
    /// `delete()` was called on the task.
    Delete,
}

impl TaskState {
    /// Apply `event` and return the resulting state.
    ///
    /// Events that don't apply to the current state leave it unchanged.
    /// Suspend is forced from every live state; Deleted absorbs everything.
    pub const fn on(self, event: TaskEvent) -> TaskState {
        use TaskEvent as E;
        use TaskState as S;

        match (self, event) {
            (S::Deleted, _) => S::Deleted,
            (_, E::Delete) => S::Deleted,
            (_, E::Suspend) => S::Suspended,
            (S::Suspended, E::Resume { expired: true }) => S::Ready,
            (S::Suspended, E::Resume { expired: false }) => S::Blocked,
            (S::Ready, E::Dispatch) => S::Running,
            (S::Running, E::Preempt) => S::Ready,
            (S::Running, E::Delay) => S::Blocked,
            (S::Blocked, E::Wake) => S::Ready,
            (state, _) => state,
        }
    }
}

// ---------------------------------------------------------------------------
// Handles and errors
// ---------------------------------------------------------------------------

/// Stable reference to a task slot.
///
/// Handles are plain slot indices. Slots are never reused, so a handle
/// keeps naming the same task for the lifetime of the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskHandle(usize);

impl TaskHandle {
    /// Handle of the idle task.
    pub const IDLE: TaskHandle = TaskHandle(0);

    pub(crate) const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Slot index in the task table.
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Reasons `create_task` can fail. A failed creation changes nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CreateError {
    /// No entry point was given.
    NullEntryPoint,
    /// The name is longer than `TASK_NAME_LEN` bytes.
    NameTooLong,
    /// Every task slot is already in use.
    CapacityExceeded,
    /// The stack request doesn't fit the remaining budget.
    StackOverflow,
    /// The stack can't hold the initial register frame.
    StackTooSmall,
}

impl fmt::Display for CreateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreateError::NullEntryPoint => f.write_str("task entry point is null"),
            CreateError::NameTooLong => {
                write!(f, "task name exceeds {} bytes", TASK_NAME_LEN)
            }
            CreateError::CapacityExceeded => f.write_str("task table is full"),
            CreateError::StackOverflow => f.write_str("not enough stack budget left"),
            CreateError::StackTooSmall => {
                f.write_str("stack too small for the initial register frame")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Task Control Block (TCB) — per-task metadata and saved execution state.
///
/// TCBs live in a fixed array inside the registry. The saved stack pointer
/// is a word index into the shared stack arena and always stays inside
/// `stack`, the region carved for this task at creation.
#[derive(Debug, Clone)]
pub struct TaskControlBlock {
    /// Unique task identifier, equal to the slot index.
    pub id: usize,

    /// Task name.
    pub name: TaskName,

    /// Entry point. `None` only for unallocated slots.
    pub entry: Option<TaskEntry>,

    /// Priority. Stored, not consulted by the round-robin policy.
    pub priority: u32,

    /// Current execution state.
    pub state: TaskState,

    /// Saved stack pointer (arena word index). Updated on every switch.
    pub stack_pointer: usize,

    /// Stack region carved for this task.
    pub stack: StackRegion,

    /// Absolute tick at which a blocked task becomes ready.
    pub wake_tick: u32,
}

impl TaskControlBlock {
    /// An unallocated slot. Used to initialize the static table.
    pub const EMPTY: Self = Self {
        id: 0,
        name: String::new(),
        entry: None,
        priority: 0,
        state: TaskState::Deleted,
        stack_pointer: 0,
        stack: StackRegion::EMPTY,
        wake_tick: 0,
    };

    /// Feed `event` to the state machine and store the result.
    #[inline]
    pub fn apply(&mut self, event: TaskEvent) -> TaskState {
        self.state = self.state.on(event);
        self.state
    }

    /// Check if this task can be picked by the scheduler.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.state == TaskState::Ready
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use TaskEvent as E;
    use TaskState as S;

    const ALL_STATES: [TaskState; 5] =
        [S::Running, S::Ready, S::Blocked, S::Suspended, S::Deleted];

    #[test]
    fn test_transition_table() {
        // (from, event, to) for every transition that changes state
        let table = [
            (S::Ready, E::Dispatch, S::Running),
            (S::Running, E::Preempt, S::Ready),
            (S::Running, E::Delay, S::Blocked),
            (S::Blocked, E::Wake, S::Ready),
            (S::Suspended, E::Resume { expired: true }, S::Ready),
            (S::Suspended, E::Resume { expired: false }, S::Blocked),
            (S::Running, E::Suspend, S::Suspended),
            (S::Ready, E::Suspend, S::Suspended),
            (S::Blocked, E::Suspend, S::Suspended),
            (S::Running, E::Delete, S::Deleted),
            (S::Ready, E::Delete, S::Deleted),
            (S::Blocked, E::Delete, S::Deleted),
            (S::Suspended, E::Delete, S::Deleted),
        ];
        for (from, event, to) in table {
            assert_eq!(from.on(event), to, "{:?} --{:?}-->", from, event);
        }
    }

    #[test]
    fn test_deleted_is_terminal() {
        let events = [
            E::Dispatch,
            E::Preempt,
            E::Delay,
            E::Wake,
            E::Suspend,
            E::Resume { expired: true },
            E::Resume { expired: false },
            E::Delete,
        ];
        for event in events {
            assert_eq!(S::Deleted.on(event), S::Deleted);
        }
    }

    #[test]
    fn test_suspend_is_idempotent() {
        assert_eq!(S::Suspended.on(E::Suspend), S::Suspended);
    }

    #[test]
    fn test_resume_only_applies_to_suspended() {
        for state in ALL_STATES {
            if state == S::Suspended {
                continue;
            }
            assert_eq!(state.on(E::Resume { expired: true }), state);
            assert_eq!(state.on(E::Resume { expired: false }), state);
        }
    }

    #[test]
    fn test_inapplicable_events_are_ignored() {
        assert_eq!(S::Blocked.on(E::Dispatch), S::Blocked);
        assert_eq!(S::Suspended.on(E::Dispatch), S::Suspended);
        assert_eq!(S::Ready.on(E::Wake), S::Ready);
        assert_eq!(S::Suspended.on(E::Wake), S::Suspended);
        assert_eq!(S::Ready.on(E::Preempt), S::Ready);
        assert_eq!(S::Blocked.on(E::Delay), S::Blocked);
    }

    #[test]
    fn test_empty_tcb() {
        let mut tcb = TaskControlBlock::EMPTY;
        assert!(tcb.entry.is_none());
        assert!(!tcb.is_ready());
        assert_eq!(tcb.apply(E::Dispatch), S::Deleted);
    }

    #[test]
    fn test_error_messages() {
        use std::string::ToString;

        assert_eq!(
            CreateError::NameTooLong.to_string(),
            "task name exceeds 12 bytes"
        );
        assert_eq!(
            CreateError::NullEntryPoint.to_string(),
            "task entry point is null"
        );
    }
}
