//! # Synchronization Primitives
//!
//! Interrupt-safe critical sections. Any task record field that the tick
//! handler also touches (state, wake tick) is mutated inside one of these.

use critical_section::CriticalSection;

/// Execute a closure within a critical section (interrupts disabled).
///
/// On the MCU this masks interrupts through the single-core implementation
/// provided by `cortex-m`; on the host the `std` implementation of
/// `critical-section` stands in.
///
/// # Usage
/// ```ignore
/// sync::critical_section(|_cs| {
///     // Access shared kernel state safely
/// });
/// ```
///
/// Keep critical sections short: the tick interrupt is held off for the
/// whole closure.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    critical_section::with(f)
}
