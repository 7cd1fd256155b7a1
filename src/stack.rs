//! # Process Stacks & Integrity Monitor
//!
//! Every process table slot owns a private, fixed-size stack region. Stacks
//! grow downwards: an empty stack has its pointer at `STACK_SIZE` (one past
//! the highest byte) and every push moves it towards offset 0.
//!
//! ```text
//!   offset 0                      sp                    STACK_SIZE
//!   ├──────────── free ───────────┼──────── in use ────────┤
//!                                 ▲ stack top              ▲ stack bottom
//! ```
//!
//! The integrity monitor folds the in-use part (`sp..STACK_SIZE`) with XOR.
//! The fold is recorded when a process is suspended and recomputed when it is
//! resumed; a mismatch means something wrote into the suspended stack, usually
//! an overflowing neighbour. It is a corruption detector, not a digest: two
//! changes can cancel out, one changed byte never does.

use crate::config::STACK_SIZE;

/// XOR fold over the in-use part of a stack.
pub type StackChecksum = u8;

/// Stack top of a process, stored as a byte offset into its own region.
///
/// Keeping an offset rather than an address means a descriptor can never
/// point into another process's region; the port converts to and from real
/// addresses at the context-switch boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct StackPointer(usize);

impl StackPointer {
    /// Pointer of a stack with nothing pushed.
    pub const EMPTY: StackPointer = StackPointer(STACK_SIZE);

    /// Returns `None` if `offset` lies outside a stack region.
    pub const fn new(offset: usize) -> Option<Self> {
        if offset <= STACK_SIZE {
            Some(StackPointer(offset))
        } else {
            None
        }
    }

    #[inline]
    pub const fn offset(self) -> usize {
        self.0
    }

    /// Number of bytes in use below the stack bottom.
    #[inline]
    pub const fn depth(self) -> usize {
        STACK_SIZE - self.0
    }
}

/// A private stack region. Aligned to 8 bytes as required by the ARM AAPCS.
#[repr(C, align(8))]
pub struct Stack {
    bytes: [u8; STACK_SIZE],
}

impl Stack {
    pub const fn new() -> Self {
        Self {
            bytes: [0; STACK_SIZE],
        }
    }

    /// The bytes currently in use, from the stack top to the stack bottom.
    #[inline]
    pub fn used(&self, sp: StackPointer) -> &[u8] {
        &self.bytes[sp.offset()..]
    }

    /// Fold every in-use byte with XOR.
    pub fn checksum(&self, sp: StackPointer) -> StackChecksum {
        self.used(sp).iter().fold(0, |acc, byte| acc ^ byte)
    }

    /// Raw access for frame initialisation and for simulating a running process.
    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8; STACK_SIZE] {
        &mut self.bytes
    }

    /// Write `words` little-endian directly below `sp` and return the new top.
    ///
    /// Returns `None` if the words do not fit.
    pub fn push_words(&mut self, sp: StackPointer, words: &[u32]) -> Option<StackPointer> {
        let len = words.len() * 4;
        let top = sp.offset().checked_sub(len)?;
        for (chunk, word) in self.bytes[top..sp.offset()].chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        Some(StackPointer(top))
    }

    /// Address of the lowest byte of the region.
    #[inline]
    pub fn base_address(&self) -> usize {
        self.bytes.as_ptr() as usize
    }

    /// Real address corresponding to `sp`.
    #[inline]
    pub fn address_of(&self, sp: StackPointer) -> usize {
        self.base_address() + sp.offset()
    }

    /// Translate an address back into a pointer, if it lies within this region.
    pub fn pointer_at(&self, address: usize) -> Option<StackPointer> {
        address
            .checked_sub(self.base_address())
            .and_then(StackPointer::new)
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_stack_folds_to_zero() {
        let stack = Stack::new();
        assert_eq!(stack.checksum(StackPointer::EMPTY), 0);
        assert_eq!(StackPointer::EMPTY.depth(), 0);
    }

    #[test]
    fn test_checksum_covers_only_used_bytes() {
        let mut stack = Stack::new();
        let sp = StackPointer::new(STACK_SIZE - 4).unwrap();
        stack.bytes_mut()[STACK_SIZE - 4..].copy_from_slice(&[0x01, 0x02, 0x04, 0x08]);
        assert_eq!(stack.checksum(sp), 0x0F);

        // Bytes above the stack top are free space and do not count.
        stack.bytes_mut()[0] = 0xFF;
        stack.bytes_mut()[STACK_SIZE - 5] = 0xFF;
        assert_eq!(stack.checksum(sp), 0x0F);
    }

    #[test]
    fn test_single_bit_flip_always_detected() {
        let mut stack = Stack::new();
        let sp = stack
            .push_words(StackPointer::EMPTY, &[0xDEAD_BEEF, 0x0800_1235, 0, 7])
            .unwrap();
        let reference = stack.checksum(sp);

        for offset in sp.offset()..STACK_SIZE {
            for bit in 0..8 {
                stack.bytes_mut()[offset] ^= 1 << bit;
                assert_ne!(stack.checksum(sp), reference, "flip at {offset}:{bit}");
                stack.bytes_mut()[offset] ^= 1 << bit;
            }
        }
        assert_eq!(stack.checksum(sp), reference);
    }

    #[test]
    fn test_push_words_layout() {
        let mut stack = Stack::new();
        let sp = stack.push_words(StackPointer::EMPTY, &[0x1122_3344, 0xAABB_CCDD]).unwrap();
        assert_eq!(sp.depth(), 8);
        assert_eq!(stack.used(sp), &[0x44, 0x33, 0x22, 0x11, 0xDD, 0xCC, 0xBB, 0xAA]);
    }

    #[test]
    fn test_push_words_overflow_rejected() {
        let mut stack = Stack::new();
        let near_full = StackPointer::new(4).unwrap();
        assert!(stack.push_words(near_full, &[1, 2]).is_none());
    }

    #[test]
    fn test_address_round_trip_stays_in_region() {
        let stack = Stack::new();
        let sp = StackPointer::new(100).unwrap();
        assert_eq!(stack.pointer_at(stack.address_of(sp)), Some(sp));
        assert_eq!(stack.pointer_at(stack.base_address() + STACK_SIZE + 1), None);
        assert_eq!(stack.pointer_at(stack.base_address().wrapping_sub(1)), None);
        assert_eq!(stack.base_address() % 8, 0);
    }

    #[test]
    fn test_pointer_range() {
        assert!(StackPointer::new(STACK_SIZE).is_some());
        assert!(StackPointer::new(STACK_SIZE + 1).is_none());
    }
}
