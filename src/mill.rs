//! A `Mill` turns `Mapper` successes into freshly initialized chunks
//! and splices them onto the chunk chain, the way the teacher's
//! `mill.rs` hands out chunks to its callers on exhaustion
//! (`spec.md` §4.4).
use crate::chunk::{Chunk, CHUNK_OVERHEAD};
use crate::error::MapError;
use crate::mapper::Mapper;
use crate::word::WORD;
use std::ffi::c_void;

/// Grabbing an address space of at least this many bytes is the
/// default chunk size; larger requests get exactly as much room as
/// they need.
pub(crate) const BASE_ALLOC_SIZE: usize = 1 << 16;

pub(crate) struct Mill<'a> {
    mapper: &'a dyn Mapper,
}

impl<'a> Mill<'a> {
    pub(crate) fn new(mapper: &'a dyn Mapper) -> Self {
        Mill { mapper }
    }

    /// Acquires a fresh chunk sized to hold at least one block of
    /// `min_block_size` bytes, and splices it onto the chain after
    /// `tail` (or becomes the head chunk if `tail` is `None`).
    ///
    /// `spec.md` §4.4: requests `max(BASE_ALLOC_SIZE, min_block_size +
    /// 4W)` bytes from the mapper.
    pub(crate) fn acquire_chunk(
        &self,
        min_block_size: usize,
        tail: Option<Chunk>,
    ) -> Result<Chunk, MapError> {
        let region_size = std::cmp::max(BASE_ALLOC_SIZE, min_block_size + CHUNK_OVERHEAD);

        log::trace!(
            "mill acquiring chunk: min_block_size={} region_size={}",
            min_block_size,
            region_size
        );

        let region = self.mapper.map(region_size)?;
        let base = unsafe { std::ptr::NonNull::new_unchecked(region.as_ptr() as *mut u8) };

        let prev_link = tail.map(|c| c.end_marker().addr());
        let chunk = Chunk::init(base, region_size, prev_link);

        if let Some(tail) = tail {
            tail.set_next_link(Some(base));
        }

        Ok(chunk)
    }

    /// Releases a chunk's backing memory back to the mapper.
    pub(crate) fn release_chunk(&self, chunk: Chunk) -> Result<(), MapError> {
        let size = chunk.size();
        let base = chunk.base();

        log::trace!("mill releasing chunk at {:p}, size={}", base.as_ptr(), size);

        let base = unsafe { std::ptr::NonNull::new_unchecked(base.as_ptr() as *mut c_void) };
        self.mapper.unmap(base, size)
    }
}

// `min_block_size + CHUNK_OVERHEAD` is exactly `s_req + 4W` from
// `spec.md` §4.4, since CHUNK_OVERHEAD == 4 * WORD.
const _: () = assert!(CHUNK_OVERHEAD == 4 * WORD);

#[cfg(test)]
mod test {
    use super::*;
    use crate::mapper::get_mapper;

    #[test]
    fn acquire_small_request_uses_base_size() {
        let mapper = get_mapper(None).unwrap();
        let mill = Mill::new(mapper);

        let chunk = mill.acquire_chunk(272, None).expect("should acquire");
        assert_eq!(chunk.size(), BASE_ALLOC_SIZE);

        mill.release_chunk(chunk).expect("should release");
    }

    #[test]
    fn acquire_large_request_sizes_exactly() {
        let mapper = get_mapper(None).unwrap();
        let mill = Mill::new(mapper);

        let requested = 1usize << 19;
        let chunk = mill.acquire_chunk(requested, None).expect("should acquire");
        assert_eq!(chunk.size(), requested + CHUNK_OVERHEAD);

        mill.release_chunk(chunk).expect("should release");
    }

    #[test]
    fn acquire_links_tail_chunk() {
        let mapper = get_mapper(None).unwrap();
        let mill = Mill::new(mapper);

        let first = mill.acquire_chunk(272, None).expect("should acquire");
        let second = mill.acquire_chunk(272, Some(first)).expect("should acquire");

        assert_eq!(first.next_chunk(), Some(second));
        assert_eq!(second.prev_link(), Some(first.end_marker().addr()));

        mill.release_chunk(second).expect("should release");
        mill.release_chunk(first).expect("should release");
    }
}
