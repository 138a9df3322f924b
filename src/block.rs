//! This module services individual allocation, release, and resize
//! calls (`spec.md` §4.5-§4.9), the majority of public calls into the
//! allocator, and the hard part: every operation here mutates a graph
//! of self-describing boundary-tag records. Mirrors the teacher's
//! `individual.rs`, which implements `Class::allocate`/`release` in a
//! file separate from the `Class`/`ClassInfo` definitions.
#[cfg(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts"
))]
use contracts::*;
#[cfg(not(any(
    all(test, feature = "check_contracts_in_tests"),
    feature = "check_contracts")))]
use disabled_contracts::*;

use crate::arena::Arena;
use crate::chunk::{Chunk, CHUNK_OVERHEAD};
use crate::error::{fatal_misuse, MapError};
use crate::mill::Mill;
use crate::tag::Tag;
use crate::word::{round_up_to_word, WORD};
use std::ffi::c_void;
use std::ptr::NonNull;

/// Normalizes a user-requested byte count into a block size: a
/// multiple of `WORD` with room for the header and footer
/// (`spec.md` §4.1).
#[inline(always)]
fn normalize(n: usize) -> usize {
    round_up_to_word(n) + 2 * WORD
}

#[inline(always)]
fn payload_ptr(h: Tag) -> NonNull<c_void> {
    unsafe { NonNull::new_unchecked(h.addr().as_ptr().add(WORD) as *mut c_void) }
}

#[inline(always)]
fn header_from_payload(p: NonNull<c_void>) -> Tag {
    let addr = unsafe { NonNull::new_unchecked((p.as_ptr() as *mut u8).sub(WORD)) };
    unsafe { Tag::new(addr) }
}

/// Splits off the trailing remainder of a found free block when it is
/// large enough to host metadata plus at least one usable byte, then
/// marks the (possibly shrunk) block used (`spec.md` §4.6 steps 5–6).
fn split_and_use(h: Tag, s: usize) {
    let total = h.size();
    let remainder = total - s;

    if remainder >= 2 * WORD {
        let new_header =
            unsafe { Tag::new(NonNull::new_unchecked(h.addr().as_ptr().add(s))) };
        new_header.write_block(remainder, false);
        new_header.footer().write_block(remainder, false);

        h.set_size(s);
    }

    h.mark_used();
    h.footer().write_block(h.size(), true);
}

/// In-place shrink (`spec.md` §4.9.1). `d == 0` is treated as an
/// explicit no-op, per the Open Question noted in `spec.md` §9.
fn shrink(h: Tag, s_prime: usize) {
    let s = h.size();
    let d = s - s_prime;

    if d == 0 {
        return;
    }

    let next = h.next();
    let next_is_free = !next.is_marker() && !next.used();

    if d < 2 * WORD && !next_is_free {
        // The freed tail is too small to host a new free block, and
        // there's no free neighbor to extend. Keep the original size;
        // the block sacrifices `d` bytes internally.
        return;
    }

    if next_is_free {
        let next_size = next.size();
        let combined = next_size + d;
        let new_next_header =
            unsafe { Tag::new(NonNull::new_unchecked(h.addr().as_ptr().add(s_prime))) };
        new_next_header.write_block(combined, false);
        new_next_header.footer().write_block(combined, false);
    } else {
        let new_free_header =
            unsafe { Tag::new(NonNull::new_unchecked(h.addr().as_ptr().add(s_prime))) };
        new_free_header.write_block(d, false);
        new_free_header.footer().write_block(d, false);
    }

    h.set_size(s_prime);
    h.footer().write_block(s_prime, true);
}

/// Attempts in-place grow by absorbing a sufficiently large following
/// free block (`spec.md` §4.9.2). Returns `false` when the following
/// block cannot supply the extra `d` bytes, in which case the caller
/// must fall back to a move.
fn try_grow_in_place(h: Tag, s_prime: usize) -> bool {
    let s = h.size();
    let d = s_prime - s;

    let next = h.next();
    let next_is_free = !next.is_marker() && !next.used();

    if !(next_is_free && next.size() >= d) {
        return false;
    }

    let next_size = next.size();
    if next_size - d < 2 * WORD {
        h.set_size(s + next_size);
    } else {
        let new_next_header =
            unsafe { Tag::new(NonNull::new_unchecked(h.addr().as_ptr().add(s_prime))) };
        new_next_header.write_block(next_size - d, false);
        new_next_header.footer().write_block(next_size - d, false);

        h.set_size(s_prime);
    }

    h.mark_used();
    h.footer().write_block(h.size(), true);
    true
}

impl Arena {
    /// Attempts to return a newly allocated block of at least `n`
    /// bytes. Returns `None` for `n == 0` or on mapper exhaustion
    /// (`spec.md` §4.6).
    #[ensures(ret.is_none() || crate::debug_arena_map::check_rep(self).is_ok(),
              "A successful allocation leaves the arena's invariants intact.")]
    pub fn allocate(&mut self, n: usize) -> Option<NonNull<c_void>> {
        if n == 0 {
            return None;
        }

        let s = normalize(n);
        self.allocate_block(s).ok().map(payload_ptr)
    }

    fn allocate_block(&mut self, s: usize) -> Result<Tag, MapError> {
        let h = self.find_or_grow(s)?;
        split_and_use(h, s);
        Ok(h)
    }

    /// First-fit search across the chunk chain, acquiring a fresh
    /// chunk from the `Mill` whenever the chain is exhausted
    /// (`spec.md` §4.4, §4.5).
    fn find_or_grow(&mut self, s: usize) -> Result<Tag, MapError> {
        if self.root().is_none() {
            let mill = Mill::new(self.mapper());
            let chunk = mill.acquire_chunk(s, None)?;
            self.set_root(Some(chunk));
        }

        let mut chunk = self.root().expect("root was just ensured");
        loop {
            let end = chunk.end_marker();
            let mut h = chunk.first_block();

            while h != end {
                if !h.used() && h.size() >= s {
                    log::trace!(
                        "first-fit: found free block at {:p}, size={}",
                        h.addr().as_ptr(),
                        h.size()
                    );
                    return Ok(h);
                }
                h = h.next();
            }

            chunk = match chunk.next_chunk() {
                Some(next) => next,
                None => {
                    let mill = Mill::new(self.mapper());
                    mill.acquire_chunk(s, Some(chunk))?
                }
            };
        }
    }

    /// Marks `p`'s block free, coalesces with free neighbors, and
    /// unmaps the host chunk if it becomes empty (`spec.md` §4.7).
    ///
    /// # Panics
    ///
    /// Aborts if `p` is `Some` and its header is not marked used.
    #[ensures(crate::debug_arena_map::check_rep(self).is_ok(),
              "Release always leaves the arena's invariants intact.")]
    pub fn release(&mut self, p: Option<NonNull<c_void>>) {
        let p = match p {
            Some(p) => p,
            None => return,
        };

        let mut h = header_from_payload(p);
        if !h.used() {
            fatal_misuse("release() called on a pointer whose header is not marked used");
        }

        h.mark_free();
        h.footer().write_block(h.size(), false);

        // Coalesce forward first: backward coalescing may move `h`.
        let next = h.next();
        if !next.is_marker() && !next.used() {
            let combined = h.size() + next.size();
            h.set_size(combined);
            next.footer().write_block(combined, false);
        }

        // Coalesce backward.
        let before = tag_before(h);
        if !before.is_start_marker() {
            let prev_header = before.header_from_footer();
            if !prev_header.used() {
                let combined = prev_header.size() + h.size();
                prev_header.set_size(combined);
                h.footer().write_block(combined, false);
                h = prev_header;
            }
        }

        // If `h` is now the chunk's sole interior block, the chunk is
        // empty and must be unmapped.
        let before = tag_before(h);
        if before.is_start_marker() {
            let chunk_base =
                unsafe { NonNull::new_unchecked(before.addr().as_ptr().sub(WORD)) };
            let chunk = unsafe { Chunk::at(chunk_base) };

            if h.size() == chunk.size() - CHUNK_OVERHEAD {
                self.unmap_chunk(chunk);
            }
        }
    }

    /// Dispatches to shrink, in-place grow, or move-and-copy
    /// (`spec.md` §4.9).
    ///
    /// # Panics
    ///
    /// Aborts if `p` is `Some` and its header is not marked used.
    #[ensures(crate::debug_arena_map::check_rep(self).is_ok(),
              "Resize always leaves the arena's invariants intact.")]
    pub fn resize(&mut self, p: Option<NonNull<c_void>>, n_prime: usize) -> Option<NonNull<c_void>> {
        let p = match p {
            Some(p) => p,
            None => return self.allocate(n_prime),
        };

        if n_prime == 0 {
            self.release(Some(p));
            return None;
        }

        let h = header_from_payload(p);
        if !h.used() {
            fatal_misuse("resize() called on a pointer whose header is not marked used");
        }

        let s_prime = normalize(n_prime);
        let s = h.size();

        if s_prime == s {
            return Some(p);
        }

        if s_prime < s {
            shrink(h, s_prime);
            return Some(p);
        }

        if try_grow_in_place(h, s_prime) {
            return Some(p);
        }

        // Fallback move: allocate, copy, release. If the search fails,
        // return `None` without releasing the original block: the
        // caller's data must survive a failed grow.
        let new_header = self.allocate_block(s_prime).ok()?;
        let new_payload = payload_ptr(new_header);

        unsafe {
            std::ptr::copy_nonoverlapping(
                h.addr().as_ptr().add(WORD),
                new_payload.as_ptr() as *mut u8,
                s - 2 * WORD,
            );
        }

        self.release(Some(p));
        Some(new_payload)
    }

    /// Unmaps an empty chunk's backing memory and splices it out of
    /// the chain (`spec.md` §4.8). Always reads the chunk's own
    /// prev-link word rather than recomputing it from an interior
    /// header, resolving the Open Question in `spec.md` §9.
    fn unmap_chunk(&mut self, chunk: Chunk) {
        let next = chunk.next_chunk();
        let prev_link = chunk.prev_link();

        let mill = Mill::new(self.mapper());
        if let Err(e) = mill.release_chunk(chunk) {
            // The OS unmap call's return value is not consulted for
            // correctness (`spec.md` §7): we've already spliced the
            // chunk out logically, so we only log the failure.
            log::warn!("failed to unmap empty chunk: {}", e);
        }

        match prev_link {
            Some(prev_end_marker) => {
                let next_link_tag = unsafe {
                    Tag::new(NonNull::new_unchecked(prev_end_marker.as_ptr().add(WORD)))
                };
                next_link_tag.write_link(next.map(Chunk::base));
            }
            None => self.set_root(next),
        }

        if let Some(next_chunk) = next {
            next_chunk.set_prev_link(prev_link);
        }
    }
}

/// The address immediately before `h`: either the previous block's
/// footer, or the chunk's start marker if `h` is the first interior
/// block.
#[inline(always)]
fn tag_before(h: Tag) -> Tag {
    let addr = unsafe { NonNull::new_unchecked(h.addr().as_ptr().sub(WORD)) };
    unsafe { Tag::new(addr) }
}


#[cfg(test)]
mod proptest_test {
    use crate::arena::Arena;
    use proptest::collection::vec;
    use proptest::prelude::*;
    use std::ffi::c_void;
    use std::ptr::NonNull;

    proptest! {
        // L3: bulk allocate/release in a random-ish order should
        // always leave the arena with zero mapped chunks once every
        // live pointer has been released.
        #[test]
        fn random_order_leaves_no_chunks(indices in vec(0..16usize, 1..80)) {
            let mut arena = Arena::new();
            let mut slots: Vec<Option<NonNull<c_void>>> = Vec::new();
            slots.resize(16, None);

            for idx in indices {
                match slots[idx] {
                    None => {
                        let p = arena.allocate(64).expect("allocate should succeed");
                        slots[idx] = Some(p);
                    }
                    Some(p) => {
                        arena.release(Some(p));
                        slots[idx] = None;
                    }
                }
            }

            for slot in slots.iter_mut() {
                if let Some(p) = slot.take() {
                    arena.release(Some(p));
                }
            }

            prop_assert_eq!(arena.chunk_count(), 0);
        }

        // L2: resizing to the byte count that already normalizes to
        // the current block size is a pointer-preserving no-op.
        #[test]
        fn resize_to_same_normalized_size_is_noop(n in 1usize..4096) {
            let mut arena = Arena::new();
            let p = arena.allocate(n).expect("allocate should succeed");

            let resized = arena.resize(Some(p), n).expect("resize should succeed");
            prop_assert_eq!(resized, p);

            arena.release(Some(resized));
        }
    }
}
