//! The allocator's correctness rests on arithmetic over raw byte
//! addresses plus aligned word reads/writes into memory the allocator
//! itself owns. This module is the sole place that performs that
//! arithmetic; everything above it treats addresses as opaque handles
//! and never dereferences a raw pointer directly.
use static_assertions::const_assert_eq;
use std::mem::size_of;

/// The machine word size in bytes. All metadata sizes and alignment
/// arithmetic are expressed as multiples of `WORD`.
pub const WORD: usize = 8;

const_assert_eq!(WORD, size_of::<usize>());

/// Reads the `usize` word stored at `addr`.
///
/// # Safety
///
/// `addr` must be valid for reads of `WORD` bytes and aligned to
/// `WORD`.
#[inline(always)]
pub(crate) unsafe fn read(addr: *const u8) -> usize {
    (addr as *const usize).read()
}

/// Writes `value` as the `usize` word stored at `addr`.
///
/// # Safety
///
/// `addr` must be valid for writes of `WORD` bytes and aligned to
/// `WORD`.
#[inline(always)]
pub(crate) unsafe fn write(addr: *mut u8, value: usize) {
    (addr as *mut usize).write(value);
}

/// Rounds `n` up to the next multiple of `WORD`.
#[inline(always)]
pub(crate) fn round_up_to_word(n: usize) -> usize {
    (n + (WORD - 1)) & !(WORD - 1)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_up() {
        assert_eq!(round_up_to_word(0), 0);
        assert_eq!(round_up_to_word(1), 8);
        assert_eq!(round_up_to_word(8), 8);
        assert_eq!(round_up_to_word(9), 16);
        assert_eq!(round_up_to_word(256), 256);
    }

    #[test]
    fn read_write_roundtrip() {
        let mut buf = [0u8; 16];
        let addr = buf.as_mut_ptr();

        unsafe {
            write(addr, 0x1122_3344_5566_7788);
            assert_eq!(read(addr), 0x1122_3344_5566_7788);

            write(addr.add(8), usize::MAX);
            assert_eq!(read(addr.add(8)), usize::MAX);
            // First word must be untouched.
            assert_eq!(read(addr), 0x1122_3344_5566_7788);
        }
    }
}
