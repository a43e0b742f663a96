//! # Host Port
//!
//! Stand-in for the Cortex-M3 port when building for the development
//! machine. The free functions mirror the hardware port so the kernel API
//! compiles unchanged; [`HostCpu`] models the register file and the
//! exception entry/exit sequence so the save/decide/restore exchange can be
//! run against a real stack arena without hardware.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch::frame::{HARDWARE_FRAME_WORDS, SOFTWARE_FRAME_WORDS};
use crate::kernel::Kernel;

/// Stands in for ICSR.PENDSVSET.
static PENDSV_PENDING: AtomicBool = AtomicBool::new(false);

/// Stands in for PRIMASK.
static INTERRUPTS_MASKED: AtomicBool = AtomicBool::new(false);

/// Pend the switch exception.
pub fn trigger_pendsv() {
    PENDSV_PENDING.store(true, Ordering::Release);
}

/// Consume a pending switch exception.
pub fn take_pendsv() -> bool {
    PENDSV_PENDING.swap(false, Ordering::AcqRel)
}

pub fn set_interrupt_priorities() {}

pub fn enable_faults() {}

pub fn disable_interrupts() {
    INTERRUPTS_MASKED.store(true, Ordering::Release);
}

/// Whether `disable_interrupts` has masked interrupts.
pub fn interrupts_masked() -> bool {
    INTERRUPTS_MASKED.load(Ordering::Acquire)
}

pub fn wait_for_interrupt() {
    core::hint::spin_loop();
}

/// There are no tasks to jump into on the host.
///
/// # Safety
/// Always panics.
pub unsafe fn start_first_task(_psp: *mut u32) -> ! {
    panic!("start_first_task needs a Cortex-M target");
}

// ---------------------------------------------------------------------------
// Simulated core
// ---------------------------------------------------------------------------

/// Register file of a simulated Cortex-M core running in Thread mode on PSP.
///
/// `psp` is a word index into the kernel's stack arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCpu {
    /// R0–R12.
    pub r: [u32; 13],
    pub lr: u32,
    pub pc: u32,
    pub xpsr: u32,
    pub psp: usize,
}

impl HostCpu {
    /// Launch the first task, as `start_first_task` does on hardware: skip
    /// the software-saved words and take the hardware frame as-is.
    pub fn launch<const W: usize>(kernel: &mut Kernel<W>) -> Self {
        let sp = kernel.start_first();
        let mut cpu = HostCpu {
            r: [0; 13],
            lr: 0,
            pc: 0,
            xpsr: 0,
            psp: sp + SOFTWARE_FRAME_WORDS,
        };
        cpu.exception_return(kernel);
        cpu
    }

    /// Take the switch exception: hardware stacking, the PendSV body, and
    /// the exception return.
    pub fn pendsv<const W: usize>(&mut self, kernel: &mut Kernel<W>) {
        self.exception_entry(kernel);

        // stmdb r0!, {r4-r11}
        let mut saved = [0u32; SOFTWARE_FRAME_WORDS];
        saved.copy_from_slice(&self.r[4..12]);
        let sp = kernel.arena_mut().push(self.psp, &saved);

        let next = kernel.context_switch(sp);

        // ldmia r0!, {r4-r11}
        let sp = kernel.arena_mut().pop(next, &mut saved);
        self.r[4..12].copy_from_slice(&saved);
        self.psp = sp;

        self.exception_return(kernel);
    }

    /// Hardware stacking on exception entry.
    fn exception_entry<const W: usize>(&mut self, kernel: &mut Kernel<W>) {
        let frame = [
            self.r[0], self.r[1], self.r[2], self.r[3], self.r[12], self.lr, self.pc, self.xpsr,
        ];
        self.psp = kernel.arena_mut().push(self.psp, &frame);
    }

    /// Hardware unstacking on exception return to Thread mode.
    fn exception_return<const W: usize>(&mut self, kernel: &mut Kernel<W>) {
        let mut frame = [0u32; HARDWARE_FRAME_WORDS];
        self.psp = kernel.arena_mut().pop(self.psp, &mut frame);
        self.r[..4].copy_from_slice(&frame[..4]);
        self.r[12] = frame[4];
        self.lr = frame[5];
        self.pc = frame[6];
        self.xpsr = frame[7];
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
