//! # RRTOS Configuration
//!
//! Compile-time constants governing the kernel. All limits are fixed at
//! compile time — no dynamic allocation.

use crate::timer::ClockSource;

/// Maximum number of application tasks. The task table holds one more
/// slot than this for the idle task at index 0.
pub const MAX_TASKS: usize = 10;

/// Total number of task slots, idle task included.
pub const TASK_SLOTS: usize = MAX_TASKS + 1;

/// Length of one scheduler tick in milliseconds.
pub const TICK_PERIOD_MS: u32 = 1;

/// Length of one scheduler tick in microseconds, as handed to the timer.
pub const TICK_PERIOD_US: u32 = TICK_PERIOD_MS * 1000;

/// Total application stack budget in bytes, shared by all task stacks.
/// Must fit in RAM next to `.bss` and the main stack.
pub const APP_STACK_SIZE: usize = 16 * 1024;

/// Number of words backing the stack arena.
pub const ARENA_WORDS: usize = APP_STACK_SIZE / 4;

/// Default stack size for application tasks, in bytes.
pub const DEFAULT_TASK_STACK_SIZE: usize = 1024;

/// Stack size of the idle task, in bytes.
pub const IDLE_STACK_SIZE: usize = 100;

/// Maximum task name length in bytes.
pub const TASK_NAME_LEN: usize = 12;

/// Enable the UsageFault, BusFault and MemManage handlers during `init()`.
/// When disabled these escalate to HardFault.
pub const SYSTEM_FAULTS: bool = true;

/// Core clock in Hz (STM32F103 on the 8 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 8_000_000;

/// SysTick input clock. `External` is AHB/8 on STM32F1.
pub const TICK_CLOCK_SOURCE: ClockSource = ClockSource::External;

/// Priority bits implemented by the NVIC (STM32F1: 4, in bits [7:4]).
pub const NVIC_PRIO_BITS: u32 = 4;

/// SysTick priority: above PendSV so ticks are never held up by a switch.
pub const SYSTICK_PRIORITY: u8 = 0xE0;

/// PendSV priority: lowest, so switches tail-chain after every other handler.
pub const PENDSV_PRIORITY: u8 = 0xFF;

/// Priority value as the hardware stores it.
pub const fn effective_priority(priority: u8) -> u8 {
    priority & !(0xFF >> NVIC_PRIO_BITS)
}
