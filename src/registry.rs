//! # Task Registry
//!
//! Fixed-capacity table of task control blocks plus the stack arena their
//! stacks are carved from. Slot 0 always holds the idle task.
//!
//! The table is append-only. A deleted task keeps its slot and its stack
//! region forever, so a `TaskHandle` can never end up naming another task.
//! Control requests that make no sense (an unallocated slot, the idle task,
//! an already deleted task) are silently ignored: the caller has no way to
//! act on a rejection.

use crate::arch::frame::{self, MIN_STACK_SIZE};
use crate::config::TASK_SLOTS;
use crate::scheduler::tick_reached;
use crate::stack::StackArena;
use crate::task::{
    CreateError, TaskControlBlock, TaskEntry, TaskEvent, TaskHandle, TaskName, TaskState,
};

pub struct TaskRegistry<const WORDS: usize> {
    /// Task slots. `tasks[..count]` are allocated.
    tasks: [TaskControlBlock; TASK_SLOTS],

    /// Number of allocated slots (idle task included).
    count: usize,

    /// Backing memory for every task stack.
    arena: StackArena<WORDS>,
}

impl<const WORDS: usize> TaskRegistry<WORDS> {
    pub const fn new() -> Self {
        Self {
            tasks: [TaskControlBlock::EMPTY; TASK_SLOTS],
            count: 0,
            arena: StackArena::new(),
        }
    }

    /// Register a new task.
    ///
    /// Checks run in order and a failure leaves the registry untouched:
    /// entry point, name length, free slot, stack budget, minimum stack.
    /// On success the task is Ready with a synthesized initial frame, and
    /// the handle of the slot just written is returned.
    pub fn create(
        &mut self,
        entry: Option<TaskEntry>,
        name: &str,
        priority: u32,
        stack_size: usize,
    ) -> Result<TaskHandle, CreateError> {
        let entry = entry.ok_or(CreateError::NullEntryPoint)?;

        let mut task_name = TaskName::new();
        task_name
            .push_str(name)
            .map_err(|_| CreateError::NameTooLong)?;

        if self.count >= TASK_SLOTS {
            return Err(CreateError::CapacityExceeded);
        }
        if !self.arena.fits(stack_size) {
            return Err(CreateError::StackOverflow);
        }
        if stack_size < MIN_STACK_SIZE {
            return Err(CreateError::StackTooSmall);
        }

        let index = self.count;
        let region = self.arena.carve(stack_size);
        let offset = frame::build_initial_frame(
            self.arena.region_mut(&region),
            entry as usize as u32,
            task_exit as usize as u32,
        );

        let tcb = &mut self.tasks[index];
        tcb.id = index;
        tcb.name = task_name;
        tcb.entry = Some(entry);
        tcb.priority = priority;
        tcb.state = TaskState::Ready;
        tcb.stack = region;
        tcb.stack_pointer = region.base + offset;
        tcb.wake_tick = 0;

        self.count += 1;
        Ok(TaskHandle::new(index))
    }

    /// Force a task into Suspended. Deleted tasks stay deleted.
    ///
    /// A task that wasn't sleeping gets its wake tick set to `now`, so a
    /// later resume sees it as due however far the counter has moved.
    pub fn suspend(&mut self, handle: TaskHandle, now: u32) {
        if let Some(tcb) = self.controllable(handle) {
            if matches!(tcb.state, TaskState::Ready | TaskState::Running) {
                tcb.wake_tick = now;
            }
            tcb.apply(TaskEvent::Suspend);
        }
    }

    /// Resume a suspended task: Ready if its wake tick has been reached by
    /// `now`, Blocked (waiting for the wake tick) otherwise. No-op for any
    /// task that isn't Suspended.
    ///
    /// Returns whether the task left Suspended.
    pub fn resume(&mut self, handle: TaskHandle, now: u32) -> bool {
        match self.controllable(handle) {
            Some(tcb) if tcb.state == TaskState::Suspended => {
                let expired = tick_reached(now, tcb.wake_tick);
                tcb.apply(TaskEvent::Resume { expired });
                true
            }
            _ => false,
        }
    }

    /// Delete a task for good. Its slot and stack are not reclaimed.
    pub fn delete(&mut self, handle: TaskHandle) {
        if let Some(tcb) = self.controllable(handle) {
            tcb.apply(TaskEvent::Delete);
        }
    }

    /// Put the running task at `index` to sleep until tick `wake`.
    pub fn block(&mut self, index: usize, wake: u32) {
        let tcb = &mut self.tasks[index];
        if tcb.state == TaskState::Running {
            tcb.wake_tick = wake;
            tcb.apply(TaskEvent::Delay);
        }
    }

    /// Look up an allocated task.
    pub fn get(&self, handle: TaskHandle) -> Option<&TaskControlBlock> {
        self.live().get(handle.index())
    }

    /// Allocated slots, idle task first.
    #[inline]
    pub fn live(&self) -> &[TaskControlBlock] {
        &self.tasks[..self.count]
    }

    #[inline]
    pub fn live_mut(&mut self) -> &mut [TaskControlBlock] {
        &mut self.tasks[..self.count]
    }

    /// Number of allocated slots, idle task included.
    #[inline]
    pub fn task_count(&self) -> usize {
        self.count
    }

    /// Stack bytes handed out so far.
    #[inline]
    pub fn consumed_stack(&self) -> usize {
        self.arena.consumed()
    }

    #[inline]
    pub(crate) fn arena(&self) -> &StackArena<WORDS> {
        &self.arena
    }

    #[inline]
    pub(crate) fn arena_mut(&mut self) -> &mut StackArena<WORDS> {
        &mut self.arena
    }

    /// Slot that accepts suspend/resume/delete: allocated and not idle.
    fn controllable(&mut self, handle: TaskHandle) -> Option<&mut TaskControlBlock> {
        match handle.index() {
            0 => None,
            i if i < self.count => Some(&mut self.tasks[i]),
            _ => None,
        }
    }
}

impl<const WORDS: usize> Default for TaskRegistry<WORDS> {
    fn default() -> Self {
        Self::new()
    }
}

/// Return address installed in every initial frame. Task entry points
/// never return; if one does, stop here instead of running off into
/// whatever follows on the stack.
extern "C" fn task_exit() -> ! {
    error!("task returned from its entry point");
    panic!("task returned from its entry point");
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
