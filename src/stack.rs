//! # Stack Arena
//!
//! All task stacks are carved out of one fixed word buffer. Regions are
//! handed out from the high end downward by a bump counter and are never
//! freed: a deleted task keeps its region for the lifetime of the kernel,
//! which bounds the leak to the arena itself.
//!
//! Stack pointers are kept as word indices into the arena. Only the port
//! layer turns them into machine addresses, when it hands them to PSP.
//!
//! ## Layout
//!
//! ```text
//! word 0                                               word WORDS
//!   │            free            │ task 2 │  task 1  │ idle │
//!   └────────────────────────────┴────────┴──────────┴──────┘
//!                                ◄── consumed (bytes) ──────►
//! ```

/// Word index range of one task's stack. The stack grows down from `top`
/// (exclusive) toward `base` (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRegion {
    /// Lowest usable word.
    pub base: usize,
    /// One past the highest usable word, 8-byte aligned.
    pub top: usize,
    /// Requested size in bytes.
    pub size: usize,
}

impl StackRegion {
    /// Placeholder for unallocated task slots.
    pub const EMPTY: Self = Self {
        base: 0,
        top: 0,
        size: 0,
    };

    /// Whether `sp` is a valid stack pointer for this region. A full
    /// descending stack may point anywhere from `base` up to `top`.
    #[inline]
    pub fn contains(&self, sp: usize) -> bool {
        sp >= self.base && sp <= self.top
    }
}

/// Backing memory, aligned for AAPCS stack frames.
#[repr(C, align(8))]
struct Words<const N: usize>([u32; N]);

/// Fixed stack budget with monotonic bump allocation.
pub struct StackArena<const WORDS: usize> {
    mem: Words<WORDS>,
    /// Bytes handed out so far.
    consumed: usize,
}

impl<const WORDS: usize> StackArena<WORDS> {
    /// Total budget in bytes.
    pub const BUDGET: usize = WORDS * 4;

    pub const fn new() -> Self {
        Self {
            mem: Words([0; WORDS]),
            consumed: 0,
        }
    }

    /// Bytes handed out so far.
    #[inline]
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Whether a request of `size` bytes may be carved.
    ///
    /// The test is `size + consumed <= budget - consumed` rather than
    /// `consumed + size <= budget`: every allocation must leave at least as
    /// much headroom as has been consumed so far.
    pub fn fits(&self, size: usize) -> bool {
        match size.checked_add(self.consumed) {
            Some(needed) => needed <= Self::BUDGET.saturating_sub(self.consumed),
            None => false,
        }
    }

    /// Carve the next region of `size` bytes. The caller checks `fits`
    /// first.
    pub fn carve(&mut self, size: usize) -> StackRegion {
        debug_assert!(self.fits(size));

        let top_byte = (Self::BUDGET - self.consumed) & !0x07;
        let base_byte = Self::BUDGET - self.consumed - size;
        self.consumed += size;

        StackRegion {
            base: base_byte.div_ceil(4),
            top: top_byte / 4,
            size,
        }
    }

    /// Mutable view of a region's words, lowest address first.
    pub fn region_mut(&mut self, region: &StackRegion) -> &mut [u32] {
        &mut self.mem.0[region.base..region.top]
    }

    /// Push `words` onto a full descending stack at `sp` (store multiple,
    /// decrement before). `words[0]` ends up at the lowest address, as
    /// with `stmdb`. Returns the new stack pointer.
    pub fn push(&mut self, sp: usize, words: &[u32]) -> usize {
        let new_sp = sp - words.len();
        self.mem.0[new_sp..sp].copy_from_slice(words);
        new_sp
    }

    /// Pop `out.len()` words from `sp` (load multiple, increment after),
    /// the inverse of [`push`](Self::push). Returns the new stack pointer.
    pub fn pop(&self, sp: usize, out: &mut [u32]) -> usize {
        let new_sp = sp + out.len();
        out.copy_from_slice(&self.mem.0[sp..new_sp]);
        new_sp
    }

    /// Machine address of word `index`.
    #[inline]
    pub fn address_of(&mut self, index: usize) -> *mut u32 {
        self.mem.0.as_mut_ptr().wrapping_add(index)
    }

    /// Word index of a machine address, if it points into the arena.
    pub fn index_of(&self, addr: *const u32) -> Option<usize> {
        let base = self.mem.0.as_ptr() as usize;
        let offset = (addr as usize).checked_sub(base)?;
        let index = offset / 4;
        (offset % 4 == 0 && index <= WORDS).then_some(index)
    }
}

impl<const WORDS: usize> Default for StackArena<WORDS> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regions_grow_downward_and_never_overlap() {
        let mut arena = StackArena::<256>::new();
        let a = arena.carve(100);
        let b = arena.carve(200);

        assert_eq!(arena.consumed(), 300);
        assert_eq!(a.top, 256);
        assert!(b.top <= a.base);
        assert!(b.base < b.top);
    }

    #[test]
    fn test_region_top_is_eight_byte_aligned() {
        let mut arena = StackArena::<256>::new();
        arena.carve(100);
        let r = arena.carve(200);
        // top byte = 1024 - 100 = 924, aligned down to 920
        assert_eq!(r.top * 4, 920);
        assert_eq!(r.base * 4, 724);
    }

    #[test]
    fn test_fits_reserves_headroom() {
        let mut arena = StackArena::<256>::new();
        arena.carve(100);
        arena.carve(200);
        arena.carve(200);

        // 1000 + 500 > 1024 - 500
        assert!(!arena.fits(1000));
        // 24 + 500 <= 1024 - 500
        assert!(arena.fits(24));
        assert!(!arena.fits(25));
        assert!(!arena.fits(usize::MAX));
    }

    #[test]
    fn test_push_pop_is_store_multiple_order() {
        let mut arena = StackArena::<64>::new();
        let sp = arena.push(64, &[4, 5, 6, 7]);
        assert_eq!(sp, 60);

        let mut out = [0u32; 4];
        let sp = arena.pop(sp, &mut out);
        assert_eq!(sp, 64);
        assert_eq!(out, [4, 5, 6, 7]);
    }

    #[test]
    fn test_address_round_trip() {
        let mut arena = StackArena::<64>::new();
        let addr = arena.address_of(17);
        assert_eq!(arena.index_of(addr), Some(17));
        assert_eq!(arena.index_of(core::ptr::null()), None);
    }
}
