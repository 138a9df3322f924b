//! Boundary-tag primitives (`spec.md` §4.2): the only module that
//! understands the bit layout of a header/footer/marker word. Higher
//! layers (`chunk`, `block`) call through `Tag` and never inspect the
//! tag bits themselves.
#[cfg(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
))]
use contracts::*;
#[cfg(not(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts")))]
use disabled_contracts::*;

use crate::word;
use std::ptr::NonNull;

/// Set on a header/footer word that belongs to a reserved block.
pub(crate) const USED_BIT: usize = 0b01;
/// Set on a start or end marker; never set on a legal block header.
pub(crate) const MARKER_BIT: usize = 0b10;
const TAG_MASK: usize = 0b11;

/// A `Tag` is the address of a metadata word: a block header, a block
/// footer, or a chunk start/end marker. It never owns the memory it
/// points into; it is a typed view over an address the `Arena` (or
/// one of its chunks) is responsible for.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Tag(NonNull<u8>);

impl Tag {
    /// Wraps a raw address as a `Tag`.
    ///
    /// # Safety
    ///
    /// `addr` must be word-aligned and point at a live header, footer,
    /// or marker word.
    #[inline(always)]
    pub(crate) unsafe fn new(addr: NonNull<u8>) -> Self {
        Tag(addr)
    }

    #[inline(always)]
    pub(crate) fn addr(self) -> NonNull<u8> {
        self.0
    }

    #[inline(always)]
    fn raw(self) -> *mut u8 {
        self.0.as_ptr()
    }

    #[inline(always)]
    fn word(self) -> usize {
        unsafe { word::read(self.raw()) }
    }

    /// The block size encoded in this tag: header, payload, and
    /// footer together. Only meaningful for block headers/footers.
    #[inline(always)]
    pub(crate) fn size(self) -> usize {
        self.word() & !TAG_MASK
    }

    /// Whether the block this tag belongs to is reserved.
    #[inline(always)]
    pub(crate) fn used(self) -> bool {
        self.word() & USED_BIT != 0
    }

    /// `true` for either a start or an end marker.
    #[inline(always)]
    pub(crate) fn is_marker(self) -> bool {
        self.word() & MARKER_BIT != 0
    }

    /// `true` only for an end marker (`0b10`, used bit clear).
    #[inline(always)]
    pub(crate) fn is_end_marker(self) -> bool {
        self.word() & TAG_MASK == MARKER_BIT
    }

    /// `true` only for a start marker (`0b11`).
    #[inline(always)]
    pub(crate) fn is_start_marker(self) -> bool {
        self.word() & TAG_MASK == (MARKER_BIT | USED_BIT)
    }

    /// The address of the next header, reached by walking `size()`
    /// bytes forward from this header. When this tag is an interior
    /// block's header, the result is either the next block's header
    /// or the chunk's end marker.
    #[requires(!self.is_marker(), "next() is only defined for block headers")]
    #[inline(always)]
    pub(crate) fn next(self) -> Tag {
        let next = unsafe { NonNull::new_unchecked(self.raw().add(self.size())) };
        unsafe { Tag::new(next) }
    }

    /// The address of this block's footer word.
    #[requires(!self.is_marker(), "footer() is only defined for block headers")]
    #[inline(always)]
    pub(crate) fn footer(self) -> Tag {
        let footer = unsafe { NonNull::new_unchecked(self.raw().add(self.size() - word::WORD)) };
        unsafe { Tag::new(footer) }
    }

    /// The address of the header that owns this footer word.
    #[inline(always)]
    pub(crate) fn header_from_footer(self) -> Tag {
        let size = self.size();
        let header = unsafe { NonNull::new_unchecked(self.raw().add(word::WORD).sub(size)) };
        unsafe { Tag::new(header) }
    }

    /// Overwrites this word with `size | used_bit`, for a fresh block
    /// header or footer (no marker bit).
    #[requires(size & TAG_MASK == 0, "sizes are always word-aligned")]
    #[inline(always)]
    pub(crate) fn write_block(self, size: usize, used: bool) {
        let bit = if used { USED_BIT } else { 0 };
        unsafe { word::write(self.raw(), size | bit) };
    }

    /// Rewrites this tag's size, preserving whatever used bit it
    /// already carried (`spec.md` §4.2, "Writing a new size ...
    /// preserves the used bit").
    #[requires(size & TAG_MASK == 0, "sizes are always word-aligned")]
    #[inline(always)]
    pub(crate) fn set_size(self, size: usize) {
        let used = self.word() & USED_BIT;
        unsafe { word::write(self.raw(), size | used) };
    }

    #[inline(always)]
    pub(crate) fn mark_used(self) {
        let size = self.size();
        unsafe { word::write(self.raw(), size | USED_BIT) };
    }

    #[inline(always)]
    pub(crate) fn mark_free(self) {
        let size = self.size();
        unsafe { word::write(self.raw(), size) };
    }

    /// Writes a start marker (`size | 0b11`).
    #[inline(always)]
    pub(crate) fn write_start_marker(self, chunk_size: usize) {
        unsafe { word::write(self.raw(), chunk_size | MARKER_BIT | USED_BIT) };
    }

    /// Writes an end marker (`size | 0b10`).
    #[inline(always)]
    pub(crate) fn write_end_marker(self, chunk_size: usize) {
        unsafe { word::write(self.raw(), chunk_size | MARKER_BIT) };
    }

    /// Reads this tag's address as a plain pointer-sized link word
    /// (used for the prev/next-chunk link slots, which are not
    /// tagged block sizes).
    #[inline(always)]
    pub(crate) fn read_link(self) -> Option<NonNull<u8>> {
        NonNull::new(self.word() as *mut u8)
    }

    #[inline(always)]
    pub(crate) fn write_link(self, link: Option<NonNull<u8>>) {
        let value = link.map_or(0, |p| p.as_ptr() as usize);
        unsafe { word::write(self.raw(), value) };
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn tag_at(buf: &mut [u8], offset: usize) -> Tag {
        let addr = unsafe { NonNull::new_unchecked(buf.as_mut_ptr().add(offset)) };
        unsafe { Tag::new(addr) }
    }

    #[test]
    fn block_header_roundtrip() {
        let mut buf = [0u8; 64];
        let h = tag_at(&mut buf, 0);

        h.write_block(32, false);
        assert_eq!(h.size(), 32);
        assert!(!h.used());
        assert!(!h.is_marker());

        h.mark_used();
        assert!(h.used());
        assert_eq!(h.size(), 32);

        h.set_size(48);
        assert_eq!(h.size(), 48);
        assert!(h.used(), "set_size preserves the used bit");

        h.mark_free();
        assert!(!h.used());
    }

    #[test]
    fn marker_discrimination() {
        let mut buf = [0u8; 64];
        let start = tag_at(&mut buf, 0);
        let end = tag_at(&mut buf, 8);
        let header = tag_at(&mut buf, 16);

        start.write_start_marker(64);
        assert!(start.is_marker());
        assert!(start.is_start_marker());
        assert!(!start.is_end_marker());

        end.write_end_marker(64);
        assert!(end.is_marker());
        assert!(end.is_end_marker());
        assert!(!end.is_start_marker());

        header.write_block(16, true);
        assert!(!header.is_marker());
    }

    #[test]
    fn header_footer_arithmetic() {
        let mut buf = [0u8; 64];
        let h = tag_at(&mut buf, 0);

        h.write_block(32, false);
        let f = h.footer();
        assert_eq!(f.addr(), tag_at(&mut buf, 24).addr());

        f.write_block(32, false);
        let back = f.header_from_footer();
        assert_eq!(back.addr(), h.addr());
    }

    #[test]
    fn link_roundtrip() {
        let mut buf = [0u8; 16];
        let t = tag_at(&mut buf, 0);

        assert_eq!(t.read_link(), None);

        let fake = unsafe { NonNull::new_unchecked(0x1000 as *mut u8) };
        t.write_link(Some(fake));
        assert_eq!(t.read_link(), Some(fake));

        t.write_link(None);
        assert_eq!(t.read_link(), None);
    }
}
