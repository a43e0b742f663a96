//! # Tick Timer
//!
//! The periodic interrupt source behind the tick service. The kernel only
//! needs it armed at a fixed interval; elapsed/remaining queries are for
//! diagnostics and never feed a scheduling decision.

use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::SYST;

/// Largest value the 24-bit SysTick reload register accepts.
pub const MAX_RELOAD: u32 = 0x00FF_FFFF;

/// SysTick input clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockSource {
    /// Processor clock (AHB).
    Core,
    /// Implementation-defined reference clock; AHB/8 on STM32F1.
    External,
}

impl ClockSource {
    /// Divider between the core clock and the counter input.
    pub const fn divider(self) -> u32 {
        match self {
            ClockSource::Core => 1,
            ClockSource::External => 8,
        }
    }
}

/// Collaborator interface for the periodic tick source.
pub trait TickTimer {
    /// Fire the tick interrupt every `interval_us` microseconds.
    fn arm_periodic(&mut self, interval_us: u32);

    /// Stop the timer and its interrupt.
    fn disarm(&mut self);

    /// Microseconds since the last tick.
    fn elapsed_us(&self) -> u32;

    /// Microseconds until the next tick.
    fn remaining_us(&self) -> u32;
}

/// Counter input frequency in Hz for a core clock and source.
#[inline]
pub const fn counter_hz(clock_hz: u32, source: ClockSource) -> u32 {
    clock_hz / source.divider()
}

/// Reload value producing one interrupt every `interval_us`.
///
/// The counter counts `reload + 1` input cycles per period. The result is
/// clamped to the 24-bit register and never drops below 1.
pub fn interval_to_reload(clock_hz: u32, source: ClockSource, interval_us: u32) -> u32 {
    let cycles = interval_us as u64 * counter_hz(clock_hz, source) as u64 / 1_000_000;
    let reload = cycles.saturating_sub(1).clamp(1, MAX_RELOAD as u64) as u32;
    if cycles > MAX_RELOAD as u64 + 1 {
        warn!("tick interval {} us clamped to reload {}", interval_us, reload);
    }
    reload
}

/// Convert counter cycles back to microseconds.
#[inline]
fn cycles_to_us(cycles: u32, hz: u32) -> u32 {
    (cycles as u64 * 1_000_000 / hz.max(1) as u64) as u32
}

// ---------------------------------------------------------------------------
// SysTick implementation
// ---------------------------------------------------------------------------

/// Cortex-M SysTick as the kernel tick source.
pub struct SysTickTimer {
    syst: SYST,
    clock_hz: u32,
    source: ClockSource,
}

impl SysTickTimer {
    /// Take ownership of SysTick and select its input clock. The counter
    /// stays stopped until [`arm_periodic`](TickTimer::arm_periodic).
    pub fn new(mut syst: SYST, clock_hz: u32, source: ClockSource) -> Self {
        syst.disable_interrupt();
        syst.disable_counter();
        syst.set_clock_source(match source {
            ClockSource::Core => SystClkSource::Core,
            ClockSource::External => SystClkSource::External,
        });
        Self {
            syst,
            clock_hz,
            source,
        }
    }

    /// Give the peripheral back.
    pub fn free(mut self) -> SYST {
        self.disarm();
        self.syst
    }

    fn hz(&self) -> u32 {
        counter_hz(self.clock_hz, self.source)
    }
}

impl TickTimer for SysTickTimer {
    fn arm_periodic(&mut self, interval_us: u32) {
        let reload = interval_to_reload(self.clock_hz, self.source, interval_us);
        self.syst.set_reload(reload);
        self.syst.clear_current();
        self.syst.enable_counter();
        self.syst.enable_interrupt();
        debug!("systick armed: {} us, reload {}", interval_us, reload);
    }

    fn disarm(&mut self) {
        self.syst.disable_interrupt();
        self.syst.disable_counter();
        self.syst.set_reload(0);
        self.syst.clear_current();
    }

    fn elapsed_us(&self) -> u32 {
        let elapsed = SYST::get_reload().saturating_sub(SYST::get_current());
        cycles_to_us(elapsed, self.hz())
    }

    fn remaining_us(&self) -> u32 {
        cycles_to_us(SYST::get_current(), self.hz())
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
