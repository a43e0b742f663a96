//! # Scheduler
//!
//! Round-robin policy with an idle fallback. Both functions here are pure
//! over the task table so they can be exercised without hardware.
//!
//! ## Scheduling Algorithm
//!
//! Starting right after the current task, walk the table once (wrapping),
//! skipping the idle task in slot 0, and pick the first Ready task. If there
//! is none, pick the idle task. Priority is stored per task but not
//! consulted.
//!
//! The idle task is created before anything else and never leaves the
//! Ready/Running pair, so the fallback is always valid.

use crate::task::{TaskControlBlock, TaskEvent, TaskState};

/// Select the next task to run.
///
/// `tasks` holds the allocated slots (idle first) and `current` is the
/// index of the task being switched out. Returns the index of the next task.
///
/// Every slot, whatever its state, costs one step of the scan, so the scan
/// always ends after `tasks.len()` steps.
pub fn select_next(tasks: &[TaskControlBlock], current: usize) -> usize {
    let count = tasks.len();
    if count == 0 {
        return 0;
    }

    let mut next = (current + 1) % count;
    for _ in 0..count {
        // Skip the idle task while others may still be ready
        if next != 0 && tasks[next].is_ready() {
            return next;
        }
        next = (next + 1) % count;
    }

    0
}

/// Whether tick `now` is at or after `wake` on the wrapping tick counter.
///
/// Valid while the two are less than 2^31 ticks apart.
#[inline]
pub fn tick_reached(now: u32, wake: u32) -> bool {
    (now.wrapping_sub(wake) as i32) >= 0
}

/// Wake every blocked task whose wake tick is exactly `now`.
///
/// Runs once per tick, before the scheduling decision that tick triggers.
/// Returns the number of tasks woken.
pub fn expire_blocked(tasks: &mut [TaskControlBlock], now: u32) -> usize {
    let mut woken = 0;
    for tcb in tasks.iter_mut() {
        if tcb.state == TaskState::Blocked && tcb.wake_tick == now {
            tcb.apply(TaskEvent::Wake);
            woken += 1;
        }
    }
    woken
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
