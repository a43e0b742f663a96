//! # rrtos — Round-Robin Real-Time Operating System
//!
//! A small preemptive kernel for ARM Cortex-M3 microcontrollers. Tasks share
//! the processor in strict rotation, one tick at a time, and can sleep,
//! suspend, resume and delete each other.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                    │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                  │
//! │  init · create_task · delay · suspend · resume · delete │
//! ├──────────────┬────────────────────┬───────────────────┤
//! │  Scheduler   │   Task Registry    │  Tick Timer       │
//! │  scheduler.rs│   registry.rs      │  timer.rs         │
//! │  ─ select    │   ─ create         │  ─ SysTick        │
//! │  ─ expire    │   ─ control        │  ─ reload calc    │
//! ├──────────────┴────────────────────┴───────────────────┤
//! │      Task Model (task.rs) · Stack Arena (stack.rs)      │
//! │        TCB · TaskState · TaskEvent · StackRegion        │
//! ├────────────────────────────────────────────────────────┤
//! │    Arch Port (arch/cortex_m3.rs · arch/frame.rs)        │
//! │    PendSV · SysTick · First Launch · Initial Frame      │
//! ├────────────────────────────────────────────────────────┤
//! │         ARM Cortex-M3 Hardware (Thumb-2)                │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Scheduling
//!
//! Every tick the SysTick handler advances the tick counter, moves sleepers
//! whose wake tick has arrived back to Ready, and pends PendSV. PendSV saves
//! the running task's registers on its own stack, picks the next Ready task
//! after the current one in slot order, and restores that task. The idle
//! task in slot 0 only runs when nothing else is Ready.
//!
//! ## Memory Model
//!
//! - **No heap**: All state is statically allocated
//! - **Fixed-size task table**: `[TaskControlBlock; MAX_TASKS + 1]`
//! - **Stack arena**: one static buffer, carved top-down per task, never freed
//! - **Critical sections**: the `critical-section` crate, backed by
//!   `cortex-m` on target
//!
//! ## Logging
//!
//! With the `defmt` feature, kernel events go out over RTT. Without it the
//! log macros compile to nothing.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod config;
pub mod task;
pub mod stack;
pub mod registry;
pub mod scheduler;
pub mod timer;
pub mod arch;
pub mod kernel;
pub mod sync;
