//! # ARMv7-M Context Frame
//!
//! Layout of a switched-out task's stack, and the builder that fakes one for
//! a task that has never run, so that its first dispatch looks exactly like
//! resuming a preempted task.
//!
//! ## Stack Layout (top = high address, growing down)
//!
//! ```text
//! [Hardware stacked frame]   <- pushed by the core on exception entry
//!   xPSR  (Thumb bit set)
//!   PC    (task entry point)
//!   LR    (task_exit)
//!   R12   (0)
//!   R3    (0)
//!   R2    (0)
//!   R1    (0)
//!   R0    (0)
//! [Software saved context]   <- pushed by PendSV with `stmdb`
//!   R11   (0)
//!   ...
//!   R4    (0)                <- saved stack pointer
//! ```

/// Words pushed by PendSV: R4–R11.
pub const SOFTWARE_FRAME_WORDS: usize = 8;

/// Words pushed by the core on exception entry: R0–R3, R12, LR, PC, xPSR.
pub const HARDWARE_FRAME_WORDS: usize = 8;

/// Full saved context.
pub const FRAME_WORDS: usize = SOFTWARE_FRAME_WORDS + HARDWARE_FRAME_WORDS;

/// Full saved context in bytes.
pub const FRAME_BYTES: usize = FRAME_WORDS * 4;

/// Offsets into the frame, counted from the saved stack pointer.
pub const R0: usize = SOFTWARE_FRAME_WORDS;
pub const R12: usize = SOFTWARE_FRAME_WORDS + 4;
pub const LR: usize = SOFTWARE_FRAME_WORDS + 5;
pub const PC: usize = SOFTWARE_FRAME_WORDS + 6;
pub const XPSR: usize = SOFTWARE_FRAME_WORDS + 7;

/// Initial program status: only the Thumb bit set.
pub const INITIAL_XPSR: u32 = 0x0100_0000;

/// Exception return loads PC from the frame, which must be halfword
/// aligned. The Thumb bit of a function address lives in xPSR instead.
pub const PC_MASK: u32 = !1;

/// Smallest stack that can hold the initial frame wherever the region
/// boundaries fall (up to 7 bytes go to aligning the top).
pub const MIN_STACK_SIZE: usize = FRAME_BYTES + 8;

/// Write the initial frame at the top of `stack` and return the offset of
/// the saved stack pointer within it.
///
/// `stack` is the task's whole region, lowest word first. `entry` goes into
/// the PC slot (Thumb bit cleared) and `exit` into LR, so returning from the
/// entry function lands in the exit trap.
pub fn build_initial_frame(stack: &mut [u32], entry: u32, exit: u32) -> usize {
    debug_assert!(stack.len() >= FRAME_WORDS);

    let sp = stack.len() - FRAME_WORDS;
    let frame = &mut stack[sp..];

    frame.fill(0);
    frame[LR] = exit;
    frame[PC] = entry & PC_MASK;
    frame[XPSR] = INITIAL_XPSR;

    sp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_frame_layout() {
        let mut stack = [0xAAAA_AAAAu32; 32];
        let sp = build_initial_frame(&mut stack, 0x0800_0101, 0x0800_0201);

        assert_eq!(sp, 16);
        let frame = &stack[sp..];
        assert!(frame[..R0].iter().all(|&w| w == 0), "R4-R11 zeroed");
        assert!(frame[R0..=R12].iter().all(|&w| w == 0), "R0-R3, R12 zeroed");
        assert_eq!(frame[LR], 0x0800_0201);
        assert_eq!(frame[PC], 0x0800_0100);
        assert_eq!(frame[XPSR], INITIAL_XPSR);

        // Nothing below the frame is touched
        assert!(stack[..sp].iter().all(|&w| w == 0xAAAA_AAAA));
    }

    #[test]
    fn test_min_stack_size_covers_alignment_slack() {
        use crate::stack::StackArena;

        for offset in 1..=8 {
            let mut arena = StackArena::<64>::new();
            arena.carve(offset);
            let region = arena.carve(MIN_STACK_SIZE);
            assert!(
                region.top - region.base >= FRAME_WORDS,
                "offset {}: {:?}",
                offset,
                region
            );
        }
    }
}
