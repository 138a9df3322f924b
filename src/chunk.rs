//! Chunk (page) primitives (`spec.md` §4.3): initializing a freshly
//! mapped chunk and walking the intrusive chunk-to-chunk chain. A
//! `Chunk` never owns its memory: it is a typed view over a region a
//! `Mapper` handed to the `Mill`, exactly the way the teacher's
//! `mill.rs` treats its chunk chain as an intrusive list embedded in
//! the mapped memory rather than a parallel out-of-line structure.
use crate::tag::Tag;
use crate::word::WORD;
use std::ptr::NonNull;

/// Number of metadata words bracketing a chunk's interior: prev-link,
/// start marker, end marker, next-link.
pub(crate) const CHUNK_OVERHEAD: usize = 4 * WORD;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct Chunk {
    base: NonNull<u8>,
}

impl Chunk {
    /// Wraps an already-initialized chunk's base address.
    ///
    /// # Safety
    ///
    /// `base` must point at a live chunk initialized by `Chunk::init`.
    #[inline(always)]
    pub(crate) unsafe fn at(base: NonNull<u8>) -> Self {
        Chunk { base }
    }

    #[inline(always)]
    pub(crate) fn base(self) -> NonNull<u8> {
        self.base
    }

    #[inline(always)]
    fn tag_at(self, offset: usize) -> Tag {
        let addr = unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) };
        unsafe { Tag::new(addr) }
    }

    #[inline(always)]
    fn prev_link_tag(self) -> Tag {
        self.tag_at(0)
    }

    #[inline(always)]
    pub(crate) fn start_marker(self) -> Tag {
        self.tag_at(WORD)
    }

    /// The whole chunk's byte length, as encoded in the start marker.
    #[inline(always)]
    pub(crate) fn size(self) -> usize {
        self.start_marker().size()
    }

    #[inline(always)]
    pub(crate) fn end_marker(self) -> Tag {
        self.tag_at(self.size() - 2 * WORD)
    }

    #[inline(always)]
    fn next_link_tag(self) -> Tag {
        self.tag_at(self.size() - WORD)
    }

    /// The first interior block's header.
    #[inline(always)]
    pub(crate) fn first_block(self) -> Tag {
        self.tag_at(2 * WORD)
    }

    #[inline(always)]
    pub(crate) fn prev_link(self) -> Option<NonNull<u8>> {
        self.prev_link_tag().read_link()
    }

    #[inline(always)]
    pub(crate) fn set_prev_link(self, link: Option<NonNull<u8>>) {
        self.prev_link_tag().write_link(link);
    }

    #[inline(always)]
    pub(crate) fn next_link(self) -> Option<NonNull<u8>> {
        self.next_link_tag().read_link()
    }

    #[inline(always)]
    pub(crate) fn set_next_link(self, link: Option<NonNull<u8>>) {
        self.next_link_tag().write_link(link);
    }

    /// Returns the next chunk in the chain, following this chunk's
    /// end-marker forward link, if any.
    #[inline(always)]
    pub(crate) fn next_chunk(self) -> Option<Chunk> {
        self.next_link().map(|base| unsafe { Chunk::at(base) })
    }

    /// Initializes a freshly mapped region of `region_size` bytes at
    /// `base` as a brand new chunk with a single free block spanning
    /// its whole interior (`spec.md` §4.3).
    ///
    /// `prev_link` is the address of the preceding chunk's end marker,
    /// or `None` if this is the head chunk.
    pub(crate) fn init(
        base: NonNull<u8>,
        region_size: usize,
        prev_link: Option<NonNull<u8>>,
    ) -> Chunk {
        debug_assert_eq!(region_size % WORD, 0);
        debug_assert!(region_size >= CHUNK_OVERHEAD + 2 * WORD);

        let chunk = unsafe { Chunk::at(base) };

        chunk.set_prev_link(prev_link);
        chunk.start_marker().write_start_marker(region_size);

        let interior_size = region_size - CHUNK_OVERHEAD;
        let block = chunk.first_block();
        block.write_block(interior_size, false);
        block.footer().write_block(interior_size, false);

        chunk.end_marker().write_end_marker(region_size);
        chunk.set_next_link(None);

        log::trace!(
            "chunk initialized at {:p}, size={}, interior={}",
            base.as_ptr(),
            region_size,
            interior_size
        );

        chunk
    }

    /// Whether this chunk's single interior block spans the whole
    /// interior and is free: the *empty chunk* transient state from
    /// `spec.md` I6.
    #[inline(always)]
    pub(crate) fn is_empty(self) -> bool {
        let block = self.first_block();
        !block.used() && block.next() == self.end_marker()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn mapped_region(size: usize) -> NonNull<u8> {
        let layout = std::alloc::Layout::from_size_align(size, WORD).unwrap();
        NonNull::new(unsafe { std::alloc::alloc_zeroed(layout) }).unwrap()
    }

    #[test]
    fn init_layout_matches_spec() {
        let size = 65536;
        let base = mapped_region(size);
        let chunk = Chunk::init(base, size, None);

        assert_eq!(chunk.prev_link(), None);
        assert_eq!(chunk.size(), size);
        assert!(chunk.start_marker().is_start_marker());
        assert!(chunk.end_marker().is_end_marker());
        assert_eq!(chunk.next_link(), None);

        let block = chunk.first_block();
        assert_eq!(block.size(), size - CHUNK_OVERHEAD);
        assert!(!block.used());
        assert_eq!(block.footer().size(), size - CHUNK_OVERHEAD);
        assert_eq!(block.next(), chunk.end_marker());

        assert!(chunk.is_empty());

        unsafe {
            std::alloc::dealloc(base.as_ptr(), std::alloc::Layout::from_size_align(size, WORD).unwrap());
        }
    }

    #[test]
    fn chunk_chain_links() {
        let size = 65536;
        let a = mapped_region(size);
        let b = mapped_region(size);

        let chunk_a = Chunk::init(a, size, None);
        let chunk_b = Chunk::init(b, size, Some(chunk_a.end_marker().addr()));
        chunk_a.set_next_link(Some(b));

        assert_eq!(chunk_a.next_chunk(), Some(chunk_b));
        assert_eq!(chunk_b.prev_link(), Some(chunk_a.end_marker().addr()));

        unsafe {
            std::alloc::dealloc(a.as_ptr(), std::alloc::Layout::from_size_align(size, WORD).unwrap());
            std::alloc::dealloc(b.as_ptr(), std::alloc::Layout::from_size_align(size, WORD).unwrap());
        }
    }
}
