//! # Architecture Abstraction Layer
//!
//! Everything that touches registers lives behind this module. Each port
//! exposes the same free functions (`trigger_pendsv`, `enable_faults`,
//! `disable_interrupts`, `set_interrupt_priorities`, `wait_for_interrupt`,
//! `start_first_task`)
//! and `port` names the one built for the current target. Scheduling logic
//! never looks past this boundary.

pub mod frame;

#[cfg(target_arch = "arm")]
pub mod cortex_m3;
#[cfg(target_arch = "arm")]
pub use cortex_m3 as port;

#[cfg(not(target_arch = "arm"))]
pub mod host;
#[cfg(not(target_arch = "arm"))]
pub use host as port;
