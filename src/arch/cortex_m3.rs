//! # Cortex-M3 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M3 (Thumb-2) processor:
//! context switching via PendSV, the SysTick tick handler, and exception
//! configuration.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M3 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): used by the kernel and exception handlers
//! - **PSP** (Process Stack Pointer): used by tasks in Thread mode
//!
//! On exception entry, the hardware stacks R0–R3, R12, LR, PC and xPSR onto
//! the process stack. PendSV pushes R4–R11 below them, hands the resulting
//! PSP to the kernel, and pops R4–R11 of whichever task the kernel picked.
//! The exception return unstacks the rest.
//!
//! ## Interrupt Priorities
//!
//! - SysTick: 0xE0, preempts PendSV
//! - PendSV: 0xFF (lowest), runs only when no other handler is active
//!
//! The STM32F103 implements the top four priority bits only, so the two
//! values must differ in bits [7:4]: 0xF0 and 0xFF would collapse into the
//! same level.

use core::arch::{asm, naked_asm};

use cortex_m::peripheral::SCB;

use crate::config::{PENDSV_PRIORITY, SYSTICK_PRIORITY};
use crate::kernel;

/// SHCSR enable bits for MemManage, BusFault and UsageFault.
const SHCSR_FAULTS: u32 = 0b111 << 16;

// ---------------------------------------------------------------------------
// PendSV trigger
// ---------------------------------------------------------------------------

/// Pend the switch exception. It runs once no higher-priority handler is
/// active, never synchronously inside the caller.
#[inline]
pub fn trigger_pendsv() {
    SCB::set_pendsv();
}

// ---------------------------------------------------------------------------
// Exception configuration
// ---------------------------------------------------------------------------

/// Set SysTick above PendSV, with PendSV at the lowest priority.
pub fn set_interrupt_priorities() {
    // SAFETY: SHPR3 is a core register; only the SysTick and PendSV bytes
    // change, before the scheduler starts.
    unsafe {
        // System Handler Priority Register 3 (SHPR3): 0xE000_ED20
        // Bits [23:16] = PendSV priority
        // Bits [31:24] = SysTick priority
        let shpr3: *mut u32 = 0xE000_ED20 as *mut u32;
        let val = core::ptr::read_volatile(shpr3) & 0x0000_FFFF;
        let val = val | ((PENDSV_PRIORITY as u32) << 16) | ((SYSTICK_PRIORITY as u32) << 24);
        core::ptr::write_volatile(shpr3, val);
    }
}

/// Enable the UsageFault, BusFault and MemManage handlers so those faults
/// don't all escalate to HardFault.
pub fn enable_faults() {
    // SAFETY: read-modify-write of the enable bits only.
    unsafe {
        (*SCB::PTR).shcsr.modify(|r| r | SHCSR_FAULTS);
    }
}

/// Mask interrupts (PRIMASK). `start_first_task` unmasks them.
#[inline]
pub fn disable_interrupts() {
    cortex_m::interrupt::disable();
}

/// Sleep until the next interrupt.
#[inline]
pub fn wait_for_interrupt() {
    cortex_m::asm::wfi();
}

// ---------------------------------------------------------------------------
// First task launch
// ---------------------------------------------------------------------------

/// Start the first task by switching Thread mode to PSP and branching to
/// the entry point. Does not return.
///
/// The frame is consumed by hand, as an exception return would: R4–R11 are
/// skipped (all zero), R0–R3, R12 and LR are popped, PC is branched to with
/// the Thumb bit restored, and the stacked xPSR is dropped.
///
/// # Safety
/// Call once, from Thread mode on MSP with interrupts masked, with `psp`
/// pointing at a frame built by `frame::build_initial_frame`.
pub unsafe fn start_first_task(psp: *mut u32) -> ! {
    asm!(
        // Set PSP past the software-saved R4-R11
        "adds r0, #32",
        "msr psp, r0",

        // Thread mode uses PSP from here on (CONTROL.SPSEL = 1)
        "movs r0, #2",
        "msr control, r0",
        "isb",

        // Pop the hardware frame manually since we're not really returning from an exception
        "pop {{r0-r3, r12, lr}}", // R0-R3, R12, LR (task_exit)
        "pop {{r4, r5}}",         // PC (task entry), xPSR (discarded)
        "orr r4, r4, #1",         // Thumb bit for bx

        "cpsie i",
        "bx r4",

        in("r0") psp,
        options(noreturn)
    );
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

/// PendSV exception handler — performs the actual context switch.
///
/// ## Sequence
/// 1. Push R4–R11 of the running task onto its stack (PSP)
/// 2. Hand the new PSP to the kernel: save, decide, restore
/// 3. Pop R4–R11 of the next task from the PSP the kernel returned
/// 4. Return from exception on PSP; the hardware unstacks the rest
///
/// The dispatch step runs with interrupts masked so the tick handler never
/// sees the table mid-switch.
///
/// # Safety
/// Called by the NVIC only. It must follow the exact Cortex-M exception
/// entry/exit convention and must not touch R4–R11 before they are saved.
#[unsafe(no_mangle)]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        // --- Save current context ---
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11}}",

        // --- Save, decide, restore (r0 in, r0 out) ---
        "cpsid i",
        "bl {switch}",
        "cpsie i",

        // --- Restore new context ---
        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",

        // Return to Thread mode on PSP (EXC_RETURN = 0xFFFFFFFD)
        "mov lr, #0xFFFFFFFD",
        "bx lr",

        switch = sym switch_context,
    );
}

/// Kernel side of PendSV.
///
/// # Safety
/// Called from PendSV only, with interrupts masked.
unsafe extern "C" fn switch_context(psp: *mut u32) -> *mut u32 {
    kernel::kernel_mut().context_switch_at(psp)
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// SysTick exception handler — tick service entry point.
///
/// Advances kernel time, wakes expired sleepers and pends PendSV.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn SysTick() {
    let kernel = kernel::kernel_mut();
    kernel.tick();

    if kernel.switch_requested() {
        trigger_pendsv();
    }
}
