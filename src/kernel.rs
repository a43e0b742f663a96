//! # Kernel
//!
//! The kernel context (task registry, tick counter, current task, pending
//! switch request) plus the global instance and the public API.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::init()        ← Enable faults, create idle task
//!         ├─► kernel::create_task() ← Register tasks (×N)
//!         └─► kernel::start()       ← Launch scheduler (no return)
//!               ├─► Set exception priorities
//!               ├─► Arm the periodic tick
//!               └─► First decision, jump to the task on PSP
//! ```
//!
//! ## Deferred switching
//!
//! Nothing switches tasks synchronously. The tick handler and the API calls
//! only *request* a switch (`switch_requested()`); the port turns that into
//! a pended PendSV, and PendSV runs the single dispatch step,
//! [`Kernel::context_switch`]: save, decide, restore.

use core::ptr::addr_of_mut;

use crate::arch::port;
use crate::config::{ARENA_WORDS, IDLE_STACK_SIZE, SYSTEM_FAULTS, TICK_PERIOD_US};
use crate::registry::TaskRegistry;
use crate::scheduler;
use crate::stack::StackArena;
use crate::sync;
use crate::task::{CreateError, TaskControlBlock, TaskEntry, TaskEvent, TaskHandle, TaskState};
use crate::timer::TickTimer;

/// Name of the idle task.
pub const IDLE_TASK_NAME: &str = "IDLE_TASK";

/// The kernel context. One instance lives in a `static`; tests build their
/// own with smaller arenas.
pub struct Kernel<const WORDS: usize = ARENA_WORDS> {
    /// Task table and stack arena.
    registry: TaskRegistry<WORDS>,

    /// Index of the task the processor is executing.
    current: usize,

    /// Monotonic tick counter. Wraps.
    ticks: u32,

    /// Set by `tick()`, `delay()` and self-targeted control calls; cleared
    /// by the dispatch step.
    switch_pending: bool,

    /// Whether the first task has been launched.
    started: bool,
}

impl<const WORDS: usize> Kernel<WORDS> {
    pub const fn new() -> Self {
        Self {
            registry: TaskRegistry::new(),
            current: 0,
            ticks: 0,
            switch_pending: false,
            started: false,
        }
    }

    /// Create the idle task in slot 0 if it doesn't exist yet.
    pub fn init(&mut self) -> Result<TaskHandle, CreateError> {
        if self.registry.task_count() > 0 {
            return Ok(TaskHandle::IDLE);
        }
        let idle = self
            .registry
            .create(Some(idle_task), IDLE_TASK_NAME, 0, IDLE_STACK_SIZE)?;
        debug_assert_eq!(idle, TaskHandle::IDLE);
        debug!("idle task created");
        Ok(idle)
    }

    /// Register a new task. The idle task is created first if `init` hasn't
    /// run yet, so application tasks never land in slot 0.
    pub fn create_task(
        &mut self,
        entry: Option<TaskEntry>,
        name: &str,
        priority: u32,
        stack_size: usize,
    ) -> Result<TaskHandle, CreateError> {
        self.init()?;
        match self.registry.create(entry, name, priority, stack_size) {
            Ok(handle) => {
                info!(
                    "task {} '{}' created, stack {} bytes",
                    handle.index(),
                    name,
                    stack_size
                );
                Ok(handle)
            }
            Err(err) => {
                warn!("task '{}' rejected: {}", name, err);
                Err(err)
            }
        }
    }

    /// Block the running task for `ticks` ticks and request a switch.
    ///
    /// The task becomes Ready on the tick where the counter equals
    /// `now + ticks`. `delay(0)` only yields: the task stays runnable.
    pub fn delay(&mut self, ticks: u32) {
        if ticks > 0 {
            let wake = self.ticks.wrapping_add(ticks);
            self.registry.block(self.current, wake);
            trace!("task {} sleeps until tick {}", self.current, wake);
        }
        self.switch_pending = true;
    }

    /// Suspend a task. Suspending the running task also requests a switch.
    pub fn suspend(&mut self, handle: TaskHandle) {
        self.registry.suspend(handle, self.ticks);
        debug!("task {} suspended", handle.index());
        self.switch_if_current(handle);
    }

    /// Resume a suspended task, into Ready or back into Blocked depending
    /// on whether its wake tick has been reached.
    pub fn resume(&mut self, handle: TaskHandle) {
        if self.registry.resume(handle, self.ticks) {
            debug!("task {} resumed", handle.index());
        }
    }

    /// Delete a task. Deleting the running task also requests a switch.
    pub fn delete(&mut self, handle: TaskHandle) {
        self.registry.delete(handle);
        debug!("task {} deleted", handle.index());
        self.switch_if_current(handle);
    }

    /// Tick service: advance time, wake expired sleepers, request a switch.
    pub fn tick(&mut self) {
        self.ticks = self.ticks.wrapping_add(1);
        scheduler::expire_blocked(self.registry.live_mut(), self.ticks);
        self.switch_pending = true;
    }

    /// Whether a switch has been requested since the last dispatch.
    #[inline]
    pub fn switch_requested(&self) -> bool {
        self.switch_pending
    }

    // -----------------------------------------------------------------------
    // Context switch protocol
    // -----------------------------------------------------------------------

    /// Make the first scheduling decision and return the stack pointer of
    /// the task to launch. Nothing is saved: no task was running.
    pub fn start_first(&mut self) -> usize {
        debug_assert!(self.registry.task_count() > 0, "idle task missing");
        self.started = true;
        self.decide();
        self.restore_context()
    }

    /// The dispatch step run by the switch exception.
    ///
    /// `sp` is the running task's stack pointer after its callee-saved
    /// registers were pushed. Returns the stack pointer to pop the next
    /// task's callee-saved registers from.
    pub fn context_switch(&mut self, sp: usize) -> usize {
        self.save_context(sp);
        self.decide();
        self.restore_context()
    }

    /// [`context_switch`](Self::context_switch) on machine addresses, for
    /// ports that hand over the raw process stack pointer.
    pub fn context_switch_at(&mut self, psp: *mut u32) -> *mut u32 {
        let sp = match self.registry.arena().index_of(psp) {
            Some(sp) => sp,
            None => self.stack_overflow(psp as usize),
        };
        let next = self.context_switch(sp);
        self.registry.arena_mut().address_of(next)
    }

    /// Save phase: persist the stack pointer of whichever task is running
    /// now, which need not be the task that asked for the switch.
    fn save_context(&mut self, sp: usize) {
        let current = self.current;
        if !self.registry.live()[current].stack.contains(sp) {
            self.stack_overflow(sp);
        }
        self.registry.live_mut()[current].stack_pointer = sp;
    }

    /// Decide phase: hand the processor to the next Ready task.
    fn decide(&mut self) {
        let tasks = self.registry.live_mut();
        let prev = self.current;
        if tasks[prev].state == TaskState::Running {
            tasks[prev].apply(TaskEvent::Preempt);
        }

        let next = scheduler::select_next(tasks, prev);
        tasks[next].apply(TaskEvent::Dispatch);
        debug_assert_eq!(tasks[next].state, TaskState::Running);

        if next != prev {
            trace!("switch {} -> {}", prev, next);
        }
        self.current = next;
        self.switch_pending = false;
    }

    /// Restore phase: where the next task's saved registers start.
    fn restore_context(&self) -> usize {
        self.registry.live()[self.current].stack_pointer
    }

    /// A task's stack pointer left its region. Nothing on that stack can be
    /// trusted any more.
    fn stack_overflow(&self, sp: usize) -> ! {
        error!("stack overflow in task {} (sp {})", self.current, sp);
        panic!("stack overflow in task {}", self.current);
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Current tick count.
    #[inline]
    pub fn now(&self) -> u32 {
        self.ticks
    }

    /// Handle of the task the processor is executing.
    #[inline]
    pub fn current_task(&self) -> TaskHandle {
        TaskHandle::new(self.current)
    }

    /// Look up a task.
    pub fn task(&self, handle: TaskHandle) -> Option<&TaskControlBlock> {
        self.registry.get(handle)
    }

    /// Number of allocated task slots, idle task included.
    pub fn task_count(&self) -> usize {
        self.registry.task_count()
    }

    /// Stack bytes handed out so far.
    pub fn consumed_stack(&self) -> usize {
        self.registry.consumed_stack()
    }

    /// Whether the first task has been launched.
    pub fn is_started(&self) -> bool {
        self.started
    }

    pub(crate) fn arena_mut(&mut self) -> &mut StackArena<WORDS> {
        self.registry.arena_mut()
    }

    fn switch_if_current(&mut self, handle: TaskHandle) {
        if self.started && handle.index() == self.current {
            self.switch_pending = true;
        }
    }
}

impl<const WORDS: usize> Default for Kernel<WORDS> {
    fn default() -> Self {
        Self::new()
    }
}

/// Idle task: runs whenever nothing else is Ready.
extern "C" fn idle_task() -> ! {
    loop {
        port::wait_for_interrupt();
    }
}

// ---------------------------------------------------------------------------
// Global kernel instance
// ---------------------------------------------------------------------------

/// Global kernel instance.
///
/// # Safety
/// Task code reaches it through [`with_kernel`] (interrupts masked). The
/// SysTick and PendSV handlers reach it through [`kernel_mut`]; PendSV
/// masks interrupts around its dispatch step and SysTick is never
/// preempted by either of the other two.
static mut KERNEL: Kernel = Kernel::new();

/// Run `f` on the global kernel inside a critical section.
fn with_kernel<R>(f: impl FnOnce(&mut Kernel) -> R) -> R {
    sync::critical_section(|_cs| {
        // SAFETY: interrupts are masked, so neither handler can touch the
        // kernel while the closure runs.
        unsafe { f(&mut *addr_of_mut!(KERNEL)) }
    })
}

/// The global kernel, for exception handlers.
///
/// # Safety
/// Only call from the SysTick or PendSV handlers, which are serialized
/// with task code and with each other as described on `KERNEL`.
#[cfg(target_arch = "arm")]
pub(crate) unsafe fn kernel_mut<'a>() -> &'a mut Kernel {
    &mut *addr_of_mut!(KERNEL)
}

// ---------------------------------------------------------------------------
// Kernel API
// ---------------------------------------------------------------------------

/// Initialize the kernel: enable the configurable fault handlers and
/// create the idle task.
///
/// Must be called once, from `main`, before `start()`.
pub fn init() {
    if SYSTEM_FAULTS {
        port::enable_faults();
    }
    if let Err(err) = with_kernel(|k| k.init()) {
        error!("idle task creation failed: {}", err);
    }
    info!("kernel initialized");
}

/// Create a new task.
///
/// # Parameters
/// - `entry`: Task entry function. `None` is rejected with `NullEntryPoint`.
/// - `name`: At most `TASK_NAME_LEN` bytes.
/// - `priority`: Stored with the task; the round-robin policy ignores it.
/// - `stack_size`: Stack bytes to carve from the arena.
///
/// # Example
/// ```ignore
/// let blinky = kernel::create_task(Some(blinky), "BLINKY", 1, 512)?;
/// ```
pub fn create_task(
    entry: Option<TaskEntry>,
    name: &str,
    priority: u32,
    stack_size: usize,
) -> Result<TaskHandle, CreateError> {
    with_kernel(|k| k.create_task(entry, name, priority, stack_size))
}

/// Sleep the calling task for at least `ticks` tick periods. `delay(0)`
/// yields the processor.
pub fn delay(ticks: u32) {
    with_kernel(|k| k.delay(ticks));
    port::trigger_pendsv();
}

/// Suspend a task until `resume()`. No-op for deleted tasks.
pub fn suspend(handle: TaskHandle) {
    if with_kernel(|k| {
        k.suspend(handle);
        k.switch_requested()
    }) {
        port::trigger_pendsv();
    }
}

/// Resume a suspended task. No-op unless the task is suspended.
pub fn resume(handle: TaskHandle) {
    with_kernel(|k| k.resume(handle));
}

/// Delete a task permanently.
pub fn delete(handle: TaskHandle) {
    if with_kernel(|k| {
        k.delete(handle);
        k.switch_requested()
    }) {
        port::trigger_pendsv();
    }
}

/// Current tick count.
pub fn now() -> u32 {
    with_kernel(|k| k.now())
}

/// Handle of the calling task.
pub fn current_task() -> TaskHandle {
    with_kernel(|k| k.current_task())
}

/// State of a task, `None` for a handle that names no task.
pub fn task_state(handle: TaskHandle) -> Option<TaskState> {
    with_kernel(|k| k.task(handle).map(|t| t.state))
}

/// Start the scheduler. **Does not return.**
///
/// Masks interrupts, sets the exception priorities, arms `timer` at the
/// tick period, makes the first scheduling decision and jumps into the
/// selected task on its own stack. Interrupts come back on only once the
/// task is running on PSP, so no tick can pend a switch before there is a
/// task to switch out.
pub fn start(mut timer: impl TickTimer) -> ! {
    port::disable_interrupts();
    port::set_interrupt_priorities();
    timer.arm_periodic(TICK_PERIOD_US);

    let psp = with_kernel(|k| {
        if let Err(err) = k.init() {
            error!("idle task creation failed: {}", err);
        }
        let sp = k.start_first();
        info!("starting task {}", k.current_task().index());
        k.arena_mut().address_of(sp)
    });

    // SAFETY: `psp` points at the synthesized frame of a task that has
    // never run, inside the static arena.
    unsafe { port::start_first_task(psp) }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn task_a() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    extern "C" fn task_b() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    /// Kernel with a 4 KiB arena, idle created, tasks A and B.
    fn kernel_ab() -> (Kernel<1024>, TaskHandle, TaskHandle) {
        let mut k = Kernel::<1024>::new();
        k.init().unwrap();
        let a = k.create_task(Some(task_a), "A", 1, 256).unwrap();
        let b = k.create_task(Some(task_b), "B", 1, 256).unwrap();
        (k, a, b)
    }

    /// Simulate PendSV without touching any registers.
    fn dispatch<const W: usize>(k: &mut Kernel<W>) -> TaskHandle {
        let sp = k.task(k.current_task()).unwrap().stack_pointer;
        k.context_switch(sp);
        k.current_task()
    }

    fn state<const W: usize>(k: &Kernel<W>, h: TaskHandle) -> TaskState {
        k.task(h).unwrap().state
    }

    #[test]
    fn test_init_creates_idle_once() {
        let mut k = Kernel::<256>::new();
        assert_eq!(k.init(), Ok(TaskHandle::IDLE));
        assert_eq!(k.init(), Ok(TaskHandle::IDLE));
        assert_eq!(k.task_count(), 1);
        assert_eq!(k.consumed_stack(), IDLE_STACK_SIZE);
        assert_eq!(k.task(TaskHandle::IDLE).unwrap().name.as_str(), IDLE_TASK_NAME);
    }

    #[test]
    fn test_create_before_init_keeps_idle_in_slot_zero() {
        let mut k = Kernel::<256>::new();
        let a = k.create_task(Some(task_a), "A", 0, 200).unwrap();
        assert_eq!(a.index(), 1);
        assert_eq!(k.task(TaskHandle::IDLE).unwrap().name.as_str(), IDLE_TASK_NAME);
    }

    #[test]
    fn test_start_picks_first_application_task() {
        let (mut k, a, b) = kernel_ab();
        k.start_first();
        assert!(k.is_started());
        assert_eq!(k.current_task(), a);
        assert_eq!(state(&k, a), TaskState::Running);
        assert_eq!(state(&k, b), TaskState::Ready);
    }

    #[test]
    fn test_start_with_only_idle() {
        let mut k = Kernel::<256>::new();
        k.init().unwrap();
        k.start_first();
        assert_eq!(k.current_task(), TaskHandle::IDLE);
    }

    #[test]
    fn test_round_robin_alternates() {
        let (mut k, a, b) = kernel_ab();
        k.start_first();
        assert_eq!(dispatch(&mut k), b);
        assert_eq!(dispatch(&mut k), a);
        assert_eq!(dispatch(&mut k), b);
        // Exactly one task running at a time
        let running = (0..k.task_count())
            .filter(|&i| state(&k, TaskHandle::new(i)) == TaskState::Running)
            .count();
        assert_eq!(running, 1);
    }

    #[test]
    fn test_single_task_keeps_running() {
        let mut k = Kernel::<256>::new();
        let a = k.create_task(Some(task_a), "A", 0, 200).unwrap();
        k.start_first();
        for _ in 0..3 {
            k.tick();
            assert_eq!(dispatch(&mut k), a);
        }
    }

    #[test]
    fn test_tick_requests_switch() {
        let (mut k, _, _) = kernel_ab();
        k.start_first();
        assert!(!k.switch_requested());
        k.tick();
        assert!(k.switch_requested());
        assert_eq!(k.now(), 1);
        dispatch(&mut k);
        assert!(!k.switch_requested());
    }

    #[test]
    fn test_delay_blocks_until_exact_tick() {
        let (mut k, a, b) = kernel_ab();
        k.start_first();
        k.tick();
        k.tick();

        k.delay(3);
        assert_eq!(state(&k, a), TaskState::Blocked);
        assert_eq!(k.task(a).unwrap().wake_tick, 5);
        assert!(k.switch_requested());
        assert_eq!(dispatch(&mut k), b);

        k.tick();
        k.tick();
        assert_eq!(state(&k, a), TaskState::Blocked);
        k.tick();
        assert_eq!(k.now(), 5);
        assert_eq!(state(&k, a), TaskState::Ready);
    }

    #[test]
    fn test_all_blocked_runs_idle() {
        let (mut k, a, b) = kernel_ab();
        k.start_first();
        k.delay(2);
        assert_eq!(dispatch(&mut k), b);
        k.delay(2);
        assert_eq!(dispatch(&mut k), TaskHandle::IDLE);

        k.tick();
        assert_eq!(dispatch(&mut k), TaskHandle::IDLE);
        k.tick();
        assert_eq!(dispatch(&mut k), a);
        assert_eq!(state(&k, TaskHandle::IDLE), TaskState::Ready);
    }

    #[test]
    fn test_delay_zero_yields_without_blocking() {
        let (mut k, a, b) = kernel_ab();
        k.start_first();
        k.delay(0);
        assert_eq!(state(&k, a), TaskState::Running);
        assert!(k.switch_requested());
        assert_eq!(dispatch(&mut k), b);
        assert_eq!(state(&k, a), TaskState::Ready);
    }

    #[test]
    fn test_delay_wraps_tick_counter() {
        let (mut k, a, _) = kernel_ab();
        k.ticks = u32::MAX - 1;
        k.start_first();
        k.delay(3);
        assert_eq!(k.task(a).unwrap().wake_tick, 1);
        dispatch(&mut k);
        for _ in 0..3 {
            k.tick();
        }
        assert_eq!(state(&k, a), TaskState::Ready);
    }

    #[test]
    fn test_suspend_self_requests_switch() {
        let (mut k, a, b) = kernel_ab();
        k.start_first();
        k.suspend(a);
        assert!(k.switch_requested());
        assert_eq!(dispatch(&mut k), b);
        assert_eq!(state(&k, a), TaskState::Suspended);

        // Skipped while suspended
        assert_eq!(dispatch(&mut k), b);

        k.tick();
        k.resume(a);
        assert_eq!(state(&k, a), TaskState::Ready);
        assert_eq!(dispatch(&mut k), a);
    }

    #[test]
    fn test_suspend_other_does_not_request_switch() {
        let (mut k, _, b) = kernel_ab();
        k.start_first();
        k.suspend(b);
        assert!(!k.switch_requested());
    }

    #[test]
    fn test_resume_blocked_task_waits_for_wake_tick() {
        let (mut k, a, b) = kernel_ab();
        k.start_first();
        k.delay(4);
        dispatch(&mut k);
        k.suspend(a);

        k.tick();
        k.resume(a);
        assert_eq!(state(&k, a), TaskState::Blocked);

        for _ in 0..3 {
            k.tick();
        }
        assert_eq!(state(&k, a), TaskState::Ready);
        assert_eq!(state(&k, b), TaskState::Running);
    }

    #[test]
    fn test_resume_before_wake_tick_past_wrap_stays_blocked() {
        let (mut k, a, _) = kernel_ab();
        k.ticks = u32::MAX - 10;
        k.start_first();
        k.delay(100);
        dispatch(&mut k);
        k.suspend(a);

        k.tick();
        k.tick();
        k.resume(a);
        assert_eq!(k.task(a).unwrap().wake_tick, 89);
        assert_eq!(state(&k, a), TaskState::Blocked);

        // Woken by the tick service once the counter gets there
        while k.now() != 89 {
            k.tick();
        }
        assert_eq!(state(&k, a), TaskState::Ready);
    }

    #[test]
    fn test_resume_after_wrap_past_wake_tick_is_ready() {
        let (mut k, a, _) = kernel_ab();
        k.ticks = u32::MAX - 10;
        k.start_first();
        k.delay(2);
        dispatch(&mut k);
        k.suspend(a);

        for _ in 0..20 {
            k.tick();
        }
        assert_eq!(k.now(), 9);
        k.resume(a);
        assert_eq!(state(&k, a), TaskState::Ready);
    }

    #[test]
    fn test_resume_of_never_delayed_task_late_in_counter() {
        let (mut k, _, b) = kernel_ab();
        k.ticks = 0x8000_0000;
        k.start_first();
        k.suspend(b);
        k.tick();
        k.resume(b);
        assert_eq!(state(&k, b), TaskState::Ready);
    }

    #[test]
    fn test_delete_self_is_never_scheduled_again() {
        let (mut k, a, b) = kernel_ab();
        k.start_first();
        k.delete(a);
        assert!(k.switch_requested());
        for _ in 0..4 {
            assert_eq!(dispatch(&mut k), b);
        }
        assert_eq!(state(&k, a), TaskState::Deleted);
        assert_eq!(k.task_count(), 3);
    }

    #[test]
    fn test_concrete_scenario() {
        let mut k = Kernel::<256>::new();
        k.init().unwrap();
        let a = k.create_task(Some(task_a), "A", 0, 200).unwrap();
        k.create_task(Some(task_b), "B", 0, 200).unwrap();
        assert_eq!(k.consumed_stack(), 500);

        assert_eq!(
            k.create_task(Some(task_a), "C", 0, 1000),
            Err(CreateError::StackOverflow)
        );

        k.tick();
        k.suspend(a);
        k.resume(a);
        assert_eq!(state(&k, a), TaskState::Ready);
    }

    /// Tick source that checks the interrupt mask when armed.
    struct MaskCheckingTimer;

    impl TickTimer for MaskCheckingTimer {
        fn arm_periodic(&mut self, _interval_us: u32) {
            assert!(port::interrupts_masked(), "tick armed with interrupts enabled");
        }
        fn disarm(&mut self) {}
        fn elapsed_us(&self) -> u32 {
            0
        }
        fn remaining_us(&self) -> u32 {
            0
        }
    }

    // The host port cannot jump into a task, so reaching that point is the
    // expected end of `start`.
    #[test]
    #[should_panic(expected = "start_first_task needs a Cortex-M target")]
    fn test_start_arms_tick_with_interrupts_masked() {
        init();
        create_task(Some(task_a), "A", 0, 256).unwrap();
        start(MaskCheckingTimer);
    }

    #[test]
    #[should_panic(expected = "stack overflow")]
    fn test_stack_pointer_outside_region_traps() {
        let (mut k, a, _) = kernel_ab();
        k.start_first();
        let below = k.task(a).unwrap().stack.base - 1;
        k.context_switch(below);
    }

    #[test]
    fn test_context_switch_at_addresses() {
        let (mut k, a, b) = kernel_ab();
        k.start_first();
        let sp_a = k.task(a).unwrap().stack_pointer;
        let psp = k.arena_mut().address_of(sp_a);

        let next = k.context_switch_at(psp);
        let sp_b = k.task(b).unwrap().stack_pointer;
        assert_eq!(next, k.arena_mut().address_of(sp_b));
    }

    #[test]
    #[should_panic(expected = "stack overflow")]
    fn test_context_switch_at_foreign_address_traps() {
        let (mut k, _, _) = kernel_ab();
        k.start_first();
        k.context_switch_at(core::ptr::null_mut());
    }
}
