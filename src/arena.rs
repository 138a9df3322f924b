//! `Arena` owns the root of the chunk chain and the `Mapper` used to
//! grow it. This file defines the type and its lifecycle
//! (construction, teardown, dump); `block.rs` defines the allocate,
//! release, and resize operations as a separate `impl Arena` block,
//! the way the teacher splits `Class`'s definition (`class.rs`) from
//! its allocate/release methods (`individual.rs`).
use crate::chunk::Chunk;
use crate::mapper::{get_mapper, Mapper};
use std::sync::Mutex;

/// An allocator instance: a chunk chain and the mapper that grows it.
///
/// `Arena` is a plain owned value with no interior synchronization:
/// callers that need a shared, mutex-guarded instance should use the
/// free functions at the crate root, which wrap a process-wide
/// singleton (`spec.md` §5, §9).
#[derive(Debug)]
pub struct Arena {
    root: Option<Chunk>,
    mapper: &'static dyn Mapper,
}

// `Arena` holds a `Chunk` chain (raw `NonNull<u8>` pointers into
// OS-mapped memory, never thread-affine) and a `&'static dyn Mapper`.
// It is safe to `Send` because the global singleton only ever reaches
// another thread already wrapped in a `Mutex`, which serializes all
// access; nothing here relies on thread-local state.
unsafe impl Send for Arena {}

impl Arena {
    /// Builds an empty arena backed by the default anonymous-mmap
    /// mapper.
    pub fn new() -> Self {
        Arena::with_mapper(get_mapper(None).expect("the default mapper always resolves"))
    }

    /// Builds an empty arena backed by `mapper`.
    pub fn with_mapper(mapper: &'static dyn Mapper) -> Self {
        Arena { root: None, mapper }
    }

    pub(crate) fn root(&self) -> Option<Chunk> {
        self.root
    }

    pub(crate) fn set_root(&mut self, root: Option<Chunk>) {
        self.root = root;
    }

    pub(crate) fn mapper(&self) -> &dyn Mapper {
        self.mapper
    }

    /// Number of live chunks currently mapped. Exposed for tests and
    /// diagnostics, not part of the core arithmetic.
    pub fn chunk_count(&self) -> usize {
        let mut count = 0;
        let mut chunk = self.root;
        while let Some(c) = chunk {
            count += 1;
            chunk = c.next_chunk();
        }
        count
    }

    /// Unmaps every chunk, returning the arena to its initial empty
    /// state (`spec.md` §4.10, §8). Best-effort: the OS unmap return
    /// value is not consulted, matching the release path's chunk
    /// unmap.
    pub fn teardown(&mut self) {
        let mut chunk = self.root.take();

        while let Some(c) = chunk {
            let next = c.next_chunk();
            let size = c.size();
            let base = c.base();

            log::trace!("teardown: unmapping chunk at {:p}, size={}", base.as_ptr(), size);

            let base = unsafe { std::ptr::NonNull::new_unchecked(base.as_ptr() as *mut std::ffi::c_void) };
            if let Err(e) = self.mapper.unmap(base, size) {
                log::warn!("teardown: failed to unmap chunk at {:p}: {}", base.as_ptr(), e);
            }

            chunk = next;
        }
    }

    /// Traverses every chunk from the root, logging each chunk's base
    /// and size and the address/size/used-bit of every interior block
    /// (`spec.md` §4.10). Purely observational.
    pub fn dump(&self) {
        let mut chunk = self.root;
        if chunk.is_none() {
            log::info!("arena: empty");
        }

        while let Some(c) = chunk {
            log::info!("chunk {:p}: size={}", c.base().as_ptr(), c.size());

            let end = c.end_marker();
            let mut h = c.first_block();
            while h != end {
                log::info!(
                    "  block {:p}: size={} used={}",
                    h.addr().as_ptr(),
                    h.size(),
                    h.used()
                );
                h = h.next();
            }

            chunk = c.next_chunk();
        }
    }
}

impl Default for Arena {
    fn default() -> Self {
        Arena::new()
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        self.teardown();
    }
}

lazy_static::lazy_static! {
    static ref GLOBAL_ARENA: Mutex<Arena> = Mutex::new(Arena::new());
}

/// Allocates at least `n` bytes from the process-wide default arena.
pub fn allocate(n: usize) -> Option<std::ptr::NonNull<std::ffi::c_void>> {
    GLOBAL_ARENA.lock().unwrap().allocate(n)
}

/// Releases a pointer previously returned by [`allocate`] or
/// [`resize`] on the process-wide default arena.
pub fn release(p: Option<std::ptr::NonNull<std::ffi::c_void>>) {
    GLOBAL_ARENA.lock().unwrap().release(p)
}

/// Resizes a pointer previously returned by [`allocate`] or
/// [`resize`] on the process-wide default arena.
pub fn resize(
    p: Option<std::ptr::NonNull<std::ffi::c_void>>,
    n_prime: usize,
) -> Option<std::ptr::NonNull<std::ffi::c_void>> {
    GLOBAL_ARENA.lock().unwrap().resize(p, n_prime)
}

/// Unmaps every chunk owned by the process-wide default arena.
pub fn teardown() {
    GLOBAL_ARENA.lock().unwrap().teardown()
}

/// Logs a diagnostic snapshot of the process-wide default arena.
pub fn dump() {
    GLOBAL_ARENA.lock().unwrap().dump()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_arena_has_no_chunks() {
        let arena = Arena::new();
        assert_eq!(arena.chunk_count(), 0);
    }

    #[test]
    fn teardown_unmaps_everything() {
        let mut arena = Arena::new();
        let _a = arena.allocate(256).expect("alloc A");
        let _b = arena.allocate(1 << 19).expect("alloc B (forces a second chunk)");
        assert_eq!(arena.chunk_count(), 2);

        arena.teardown();
        assert_eq!(arena.chunk_count(), 0);
    }

    #[test]
    fn dump_does_not_mutate() {
        let mut arena = Arena::new();
        let a = arena.allocate(128).expect("alloc");
        arena.dump();
        arena.release(Some(a));
    }

    #[test]
    fn global_singleton_roundtrip() {
        let p = allocate(64).expect("should allocate");
        dump();
        release(Some(p));
        teardown();
    }
}
