//! Feature-gated invariant checker: walks a live `Arena`'s chunk and
//! block graph and reports any violation of `spec.md` §3/§8 (I1–I6,
//! P1–P5) as an `Err`. Mirrors the teacher's `debug_arange_map.rs` in
//! shape (same feature gate, same "walk live state and return a
//! descriptive `Err`" contract) though not in subject: the teacher
//! tracks address-range reservations, this walks boundary-tag blocks.
use crate::arena::Arena;
use crate::chunk::CHUNK_OVERHEAD;

/// Walks every chunk and block reachable from `arena`'s root and
/// confirms the invariants that are expected to hold between public
/// calls. Returns the first violation found, if any.
pub fn check_rep(arena: &Arena) -> Result<(), String> {
    let mut chunk = arena.root();
    let mut prev_end_marker = None;

    while let Some(c) = chunk {
        // I4 / P4: prev-link must point back at the predecessor's end
        // marker (or none for the head).
        if c.prev_link() != prev_end_marker {
            return Err(format!(
                "chunk {:p}: prev-link {:?} does not match predecessor's end marker {:?}",
                c.base().as_ptr(),
                c.prev_link(),
                prev_end_marker
            ));
        }

        let end = c.end_marker();
        if !end.is_end_marker() {
            return Err(format!("chunk {:p}: end marker word is malformed", c.base().as_ptr()));
        }
        if !c.start_marker().is_start_marker() {
            return Err(format!("chunk {:p}: start marker word is malformed", c.base().as_ptr()));
        }

        let mut h = c.first_block();
        let mut total = 0usize;
        let mut prev_was_free = false;
        let mut block_count = 0usize;

        loop {
            if h == end {
                break;
            }

            // I5: size is word-aligned.
            if h.size() % 8 != 0 {
                return Err(format!("block {:p}: size {} is not 8-aligned", h.addr().as_ptr(), h.size()));
            }

            // I1 / P2: header and footer carry identical words.
            let footer = h.footer();
            if footer.size() != h.size() || footer.used() != h.used() {
                return Err(format!(
                    "block {:p}: header/footer mismatch (header size={} used={}, footer size={} used={})",
                    h.addr().as_ptr(),
                    h.size(),
                    h.used(),
                    footer.size(),
                    footer.used()
                ));
            }

            // I3 / P3: no two adjacent free blocks.
            if !h.used() && prev_was_free {
                return Err(format!("block {:p}: adjacent free block violates I3/P3", h.addr().as_ptr()));
            }

            total += h.size();
            prev_was_free = !h.used();
            block_count += 1;

            if block_count > 1_000_000 {
                return Err(format!("chunk {:p}: block chain did not terminate (P1)", c.base().as_ptr()));
            }

            // I2: h + size(h) addresses the next header or the end marker.
            h = h.next();
        }

        // P1: sum of interior block sizes equals chunk_size - 4W.
        if total != c.size() - CHUNK_OVERHEAD {
            return Err(format!(
                "chunk {:p}: interior blocks sum to {}, expected {}",
                c.base().as_ptr(),
                total,
                c.size() - CHUNK_OVERHEAD
            ));
        }

        // I6: an empty chunk (single free block spanning the whole
        // interior) must never survive to be observed here.
        if c.is_empty() {
            return Err(format!("chunk {:p}: empty chunk was not unmapped", c.base().as_ptr()));
        }

        prev_end_marker = Some(end.addr());
        chunk = c.next_chunk();
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::arena::Arena;

    #[test]
    fn fresh_arena_passes() {
        let arena = Arena::new();
        assert!(check_rep(&arena).is_ok());
    }

    #[test]
    fn single_allocation_passes() {
        let mut arena = Arena::new();
        let p = arena.allocate(256).expect("alloc");
        assert!(check_rep(&arena).is_ok());
        arena.release(Some(p));
        assert!(check_rep(&arena).is_ok());
    }

    #[test]
    fn interleaved_allocations_pass() {
        let mut arena = Arena::new();
        let a = arena.allocate(64).expect("alloc A");
        let b = arena.allocate(128).expect("alloc B");
        let c = arena.allocate(32).expect("alloc C");
        assert!(check_rep(&arena).is_ok());

        arena.release(Some(b));
        assert!(check_rep(&arena).is_ok());
        arena.release(Some(a));
        assert!(check_rep(&arena).is_ok());
        arena.release(Some(c));
        assert!(check_rep(&arena).is_ok());
    }
}
