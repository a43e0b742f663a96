//! # RRTOS Example Firmware
//!
//! Three tasks rotating on a 1 ms tick, exercising every kernel call:
//!
//! | Task | Stack | Behavior |
//! |------|-------|----------|
//! | `blink_task` | 512 | Toggles a counter, sleeps 500 ticks |
//! | `worker_task` | 1024 | Busy work, yields with `delay(0)` |
//! | `supervisor_task` | 512 | Pauses and resumes the worker, then retires |
//!
//! ## Expected Behavior
//!
//! 1. `blink_task` and `worker_task` share the processor; the blinker
//!    spends most of its time Blocked.
//! 2. Every 1000 ticks the supervisor suspends the worker for 200 ticks.
//!    With both others asleep, the idle task runs.
//! 3. After five rounds the supervisor deletes itself and the remaining
//!    two tasks carry on.

#![no_std]
#![no_main]

use core::cell::Cell;
use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::entry;
use critical_section::Mutex;
use panic_halt as _;

#[cfg(feature = "defmt")]
use defmt_rtt as _;

use rrtos::config::{SYSTEM_CLOCK_HZ, TICK_CLOCK_SOURCE};
use rrtos::kernel;
use rrtos::task::TaskHandle;
use rrtos::timer::SysTickTimer;

/// Blink count, visible from a debugger.
static BLINKS: AtomicU32 = AtomicU32::new(0);

/// Handle of the worker, for the supervisor.
static WORKER: Mutex<Cell<Option<TaskHandle>>> = Mutex::new(Cell::new(None));

// ---------------------------------------------------------------------------
// Task entry points
// ---------------------------------------------------------------------------

extern "C" fn blink_task() -> ! {
    loop {
        BLINKS.fetch_add(1, Ordering::Relaxed);
        kernel::delay(500);
    }
}

/// Never sleeps. Gives the rest of its slice away after each batch.
extern "C" fn worker_task() -> ! {
    let mut acc: u32 = 0;
    loop {
        for i in 0..5000 {
            acc = acc.wrapping_mul(31).wrapping_add(i);
        }
        core::hint::black_box(acc);
        kernel::delay(0);
    }
}

extern "C" fn supervisor_task() -> ! {
    let worker = critical_section::with(|cs| WORKER.borrow(cs).get());

    for _ in 0..5 {
        kernel::delay(1000);
        if let Some(worker) = worker {
            kernel::suspend(worker);
            kernel::delay(200);
            kernel::resume(worker);
        }
    }

    kernel::delete(kernel::current_task());
    loop {
        kernel::delay(0);
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Firmware entry point. Initializes the kernel, creates tasks, and
/// starts the scheduler. Does not return.
#[entry]
fn main() -> ! {
    let cp = cortex_m::Peripherals::take().unwrap();

    kernel::init();

    kernel::create_task(Some(blink_task), "BLINK", 1, 512).expect("Failed to create blink_task");

    let worker = kernel::create_task(Some(worker_task), "WORKER", 1, 1024)
        .expect("Failed to create worker_task");
    critical_section::with(|cs| WORKER.borrow(cs).set(Some(worker)));

    kernel::create_task(Some(supervisor_task), "SUPERVISOR", 1, 512)
        .expect("Failed to create supervisor_task");

    let timer = SysTickTimer::new(cp.SYST, SYSTEM_CLOCK_HZ, TICK_CLOCK_SOURCE);

    // Start the scheduler — does not return
    kernel::start(timer)
}
